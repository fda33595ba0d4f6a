//! Coinfeed Persistence - Image cache tiers and SQLite storage

pub mod cache;
pub mod sqlite;

pub use cache::{DiskImageCache, LogoUrlCache, MemoryImageCache};
pub use sqlite::Database;

//! Caching layers: image memory tier, image disk tier, best-logo URLs

mod disk;
mod logo_urls;
mod memory;

pub use disk::DiskImageCache;
pub use logo_urls::LogoUrlCache;
pub use memory::MemoryImageCache;

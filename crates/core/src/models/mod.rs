//! Data models for market records, quotes, ticks, and images

mod coin;
mod detail;
mod image;
mod quote;
mod tick;

pub use coin::*;
pub use detail::*;
pub use image::*;
pub use quote::*;
pub use tick::*;

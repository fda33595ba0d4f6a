//! Coinfeed Networking - REST clients, price stream and image loading

pub mod api;
pub mod http;
pub mod images;
pub mod websocket;

pub use api::QuoteClient;
pub use http::MarketClient;
pub use images::{ImageCache, ImageCacheStats};
pub use websocket::{ConnectionState, StreamConnection, StreamSettings};

//! REST client for the primary market-data provider

mod client;

pub use client::MarketClient;

//! Secondary REST provider: bulk fast quotes and logo probing
//!
//! Everything here is fail-soft. Errors are logged and the caller gets
//! its input back (or an empty result) instead of an error.

mod quotes;

pub use quotes::QuoteClient;

//! SQLite database management

mod connection;
mod responses;
mod settings;

pub use connection::Database;
pub use responses::*;
pub use settings::*;

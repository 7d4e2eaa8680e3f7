pub mod connection;
pub mod helpers;
pub mod models;
pub mod repositories;
mod schema;

pub use connection::Database;
pub use models::DurationRecord;

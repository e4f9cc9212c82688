pub mod connection;
pub mod schema;
pub mod queries;

pub use connection::*;
pub use queries::SurrealStore;

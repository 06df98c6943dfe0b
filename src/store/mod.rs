//! Persistence layer: key/value datastore with libSQL and in-memory backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlDatastore;
pub use memory::MemoryDatastore;
pub use traits::{Datastore, Query};

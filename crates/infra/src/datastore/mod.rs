//! Datastore implementations of the core persistence ports

mod memory;
mod postgres;
mod schema;

pub use memory::InMemoryDatastore;
pub use postgres::PgDatastore;
pub use schema::SCHEMA;

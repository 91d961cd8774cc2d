//! `AuthStore` adapters.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryAuthStore;
pub use postgres::PostgresAuthStore;

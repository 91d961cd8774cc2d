//! Infrastructure layer: store adapters, schema, seed data, config, workers.

pub mod config;
pub mod migrations;
pub mod seed;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{AppConfig, ConfigError};
pub use store::{InMemoryAuthStore, PostgresAuthStore};
pub use workers::{SessionSweeper, WorkerHandle};

//! Repository implementations for database operations.

pub mod configuration;

pub use configuration::PgConfigurationRepository;

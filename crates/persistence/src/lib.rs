//! Persistence layer for the business configuration service.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - The Postgres implementation of `domain::repository::ConfigurationRepository`
//!
//! Migrations live in `src/migrations` and are applied by the API binary.

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;

pub use db::{create_pool, DatabaseConfig};
pub use repositories::PgConfigurationRepository;

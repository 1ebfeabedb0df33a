//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod configuration;

pub use configuration::{
    CategoryDb, ConfigurationEntity, ConfigurationHistoryEntity, EntityError, HistoryActionDb,
    ScopeDb,
};

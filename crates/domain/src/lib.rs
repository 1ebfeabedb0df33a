//! Domain layer for the bizconf configuration engine.
//!
//! This crate contains:
//! - Value objects (key, scope, category, value)
//! - Configuration and history models
//! - The repository abstraction and an in-memory implementation
//! - Business logic services (rules, validation, resolution, versioning)
//! - Domain error types

pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod value_objects;

pub use error::{ConfigError, ErrorKind, FieldError};

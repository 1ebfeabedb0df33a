//! Shared utilities and common types for the bizconf backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Offset pagination primitives
//! - Common validation logic (configuration key grammar, scope ids)

pub mod pagination;
pub mod validation;

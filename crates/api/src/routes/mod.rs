//! HTTP route handlers.

pub mod configurations;
pub mod health;

//! Value objects that turn raw input into well-formed configuration primitives.

pub mod category;
pub mod key;
pub mod scope;
pub mod value;

pub use category::ConfigurationCategory;
pub use key::ConfigurationKey;
pub use scope::ConfigurationScope;
pub use value::{ConfigurationValue, DEFAULT_MAX_VALUE_BYTES};

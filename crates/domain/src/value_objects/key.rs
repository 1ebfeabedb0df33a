//! Configuration key value object.

use serde::{Deserialize, Serialize};
use shared::validation::{
    normalize_config_key, CONFIG_KEY_REGEX, MAX_CONFIG_KEY_LENGTH, MIN_CONFIG_KEY_LENGTH,
};
use std::str::FromStr;

use crate::error::ConfigError;

/// A normalized, dotted configuration key such as `tax.vat.standard_rate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigurationKey(String);

impl ConfigurationKey {
    /// Trims, lowercases and validates a raw key.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let normalized = normalize_config_key(raw);
        let len = normalized.chars().count();

        if len < MIN_CONFIG_KEY_LENGTH || len > MAX_CONFIG_KEY_LENGTH {
            return Err(ConfigError::InvalidKey(format!(
                "'{}' must be {}-{} characters long",
                normalized, MIN_CONFIG_KEY_LENGTH, MAX_CONFIG_KEY_LENGTH
            )));
        }
        if normalized.starts_with('.') || normalized.ends_with('.') {
            return Err(ConfigError::InvalidKey(format!(
                "'{}' cannot start or end with a dot",
                normalized
            )));
        }
        if normalized.contains("..") {
            return Err(ConfigError::InvalidKey(format!(
                "'{}' cannot contain consecutive dots",
                normalized
            )));
        }
        if !CONFIG_KEY_REGEX.is_match(&normalized) {
            return Err(ConfigError::InvalidKey(format!(
                "'{}' may only contain lowercase letters, digits, underscores and dots",
                normalized
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Dot-separated segments of the key.
    pub fn parts(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }

    /// First segment, e.g. `tax` for `tax.vat.rate`.
    pub fn base_category(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Last segment, e.g. `rate` for `tax.vat.rate`.
    pub fn final_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    /// `tax.vat` is a parent of `tax.vat.rate` but not of `tax.vatx`.
    pub fn is_parent_of(&self, other: &ConfigurationKey) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    pub fn is_child_of(&self, other: &ConfigurationKey) -> bool {
        other.is_parent_of(self)
    }
}

impl std::fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConfigurationKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConfigurationKey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConfigurationKey> for String {
    fn from(key: ConfigurationKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ConfigurationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_parse_normalizes() {
        let key = ConfigurationKey::parse("  Tax.VAT.Standard_Rate ").unwrap();
        assert_eq!(key.as_str(), "tax.vat.standard_rate");
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for bad in ["", "ab", ".tax.rate", "tax.rate.", "tax..rate", "tax-rate", "tax rate", "täx.rate"] {
            let err = ConfigurationKey::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "expected rejection of {bad:?}");
        }
    }

    #[test]
    fn test_parse_rejects_overlong_key() {
        let long = format!("a.{}", "b".repeat(MAX_CONFIG_KEY_LENGTH));
        assert!(matches!(
            ConfigurationKey::parse(&long),
            Err(ConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_parts_and_names() {
        let key = ConfigurationKey::parse("tax.vat.rate").unwrap();
        assert_eq!(key.parts(), vec!["tax", "vat", "rate"]);
        assert_eq!(key.base_category(), "tax");
        assert_eq!(key.final_name(), "rate");
        assert_eq!(key.depth(), 3);

        let single = ConfigurationKey::parse("currency").unwrap();
        assert_eq!(single.base_category(), "currency");
        assert_eq!(single.final_name(), "currency");
    }

    #[test]
    fn test_parent_child_relation_uses_dot_boundary() {
        let parent = ConfigurationKey::parse("tax.vat").unwrap();
        let child = ConfigurationKey::parse("tax.vat.rate").unwrap();
        let lookalike = ConfigurationKey::parse("tax.vatx.rate").unwrap();

        assert!(parent.is_parent_of(&child));
        assert!(child.is_child_of(&parent));
        assert!(!parent.is_parent_of(&lookalike));
        assert!(!parent.is_parent_of(&parent));
        assert!(!child.is_parent_of(&parent));
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let key: ConfigurationKey = serde_json::from_str("\"Pricing.Margin\"").unwrap();
        assert_eq!(key.as_str(), "pricing.margin");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"pricing.margin\"");
        assert!(serde_json::from_str::<ConfigurationKey>("\"bad..key\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_keys_parse_to_their_normal_form(
            raw in "[a-zA-Z0-9_]{3,20}(\\.[a-zA-Z0-9_]{1,20}){0,4}",
            pad in " {0,3}",
        ) {
            let input = format!("{pad}{raw}{pad}");
            let key = ConfigurationKey::parse(&input).unwrap();
            prop_assert_eq!(key.as_str(), raw.to_lowercase());
        }

        #[test]
        fn prop_keys_with_forbidden_characters_fail(
            prefix in "[a-z]{2,10}",
            bad in "[-@# /:]",
            suffix in "[a-z]{1,10}",
        ) {
            let input = format!("{prefix}{bad}{suffix}");
            prop_assert!(ConfigurationKey::parse(&input).is_err());
        }
    }
}

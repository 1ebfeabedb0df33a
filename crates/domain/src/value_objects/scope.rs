//! Configuration scope levels.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

/// Nesting level a configuration row applies to.
///
/// Variants are declared in precedence order, so the derived `Ord` sorts
/// `System < Company < Branch < User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationScope {
    System,
    Company,
    Branch,
    User,
}

impl ConfigurationScope {
    /// All scopes, lowest priority first.
    pub const ALL: [ConfigurationScope; 4] = [
        ConfigurationScope::System,
        ConfigurationScope::Company,
        ConfigurationScope::Branch,
        ConfigurationScope::User,
    ];

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "company" => Ok(Self::Company),
            "branch" => Ok(Self::Branch),
            "user" => Ok(Self::User),
            other => Err(ConfigError::InvalidScope(format!(
                "'{}' is not one of system, company, branch, user",
                other
            ))),
        }
    }

    /// Higher wins during resolution.
    pub fn priority(&self) -> u8 {
        match self {
            Self::System => 1,
            Self::Company => 2,
            Self::Branch => 3,
            Self::User => 4,
        }
    }

    pub fn requires_scope_id(&self) -> bool {
        !matches!(self, Self::System)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Company => "company",
            Self::Branch => "branch",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for ConfigurationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

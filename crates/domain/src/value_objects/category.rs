//! Business categories for configuration entries.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationCategory {
    Tax,
    Pricing,
    Workflow,
    Notification,
    Inventory,
    Accounting,
    General,
}

impl ConfigurationCategory {
    pub const ALL: [ConfigurationCategory; 7] = [
        ConfigurationCategory::Tax,
        ConfigurationCategory::Pricing,
        ConfigurationCategory::Workflow,
        ConfigurationCategory::Notification,
        ConfigurationCategory::Inventory,
        ConfigurationCategory::Accounting,
        ConfigurationCategory::General,
    ];

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let normalized = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                ConfigError::InvalidCategory(format!(
                    "'{}' is not a known category",
                    normalized
                ))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tax => "tax",
            Self::Pricing => "pricing",
            Self::Workflow => "workflow",
            Self::Notification => "notification",
            Self::Inventory => "inventory",
            Self::Accounting => "accounting",
            Self::General => "general",
        }
    }

    /// Human-readable description shown in admin tooling.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Tax => "Tax rates, exemptions and reporting rules",
            Self::Pricing => "Price lists, margins and discount rules",
            Self::Workflow => "Approval chains and document workflows",
            Self::Notification => "Email, SMS and in-app notification settings",
            Self::Inventory => "Stock levels, reorder points and warehouse rules",
            Self::Accounting => "Ledgers, fiscal periods and posting rules",
            Self::General => "Miscellaneous application settings",
        }
    }
}

impl std::fmt::Display for ConfigurationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

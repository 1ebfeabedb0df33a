//! Configuration domain model and request DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::ConfigError;
use crate::value_objects::{
    ConfigurationCategory, ConfigurationKey, ConfigurationScope, ConfigurationValue,
};

/// Metadata flag marking a row as approval-gated.
pub const REQUIRES_APPROVAL_FLAG: &str = "requiresApproval";

/// One version of a configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: Uuid,
    pub config_key: ConfigurationKey,
    pub scope: ConfigurationScope,
    pub scope_id: Option<String>,
    pub category: ConfigurationCategory,
    pub config_value: ConfigurationValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    pub version: i32,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Configuration {
    /// The chain this row belongs to.
    pub fn chain(&self) -> ChainKey {
        ChainKey {
            config_key: self.config_key.clone(),
            scope: self.scope,
            scope_id: self.scope_id.clone(),
        }
    }

    /// Inclusive validity window check; missing bounds are open.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= at)
            && self.valid_until.map_or(true, |until| until >= at)
    }

    /// Active and inside the validity window.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.is_valid_at(at)
    }

    pub fn requires_approval(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(REQUIRES_APPROVAL_FLAG))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_pending_approval(&self) -> bool {
        self.requires_approval() && self.approved_by.is_none()
    }

    pub fn has_validity_range(&self) -> bool {
        self.valid_from.is_some() || self.valid_until.is_some()
    }
}

/// Identity of a version chain: key + scope + scope owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub config_key: ConfigurationKey,
    pub scope: ConfigurationScope,
    pub scope_id: Option<String>,
}

impl ChainKey {
    /// Builds a chain key, enforcing that `scope_id` is present iff the scope
    /// is not `system`.
    pub fn new(
        config_key: ConfigurationKey,
        scope: ConfigurationScope,
        scope_id: Option<String>,
    ) -> Result<Self, ConfigError> {
        let scope_id = normalize_scope_id(scope_id);
        validate_scope_pair(scope, scope_id.as_deref())?;
        Ok(Self {
            config_key,
            scope,
            scope_id,
        })
    }
}

impl std::fmt::Display for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope_id {
            Some(id) => write!(f, "{}@{}:{}", self.config_key, self.scope, id),
            None => write!(f, "{}@{}", self.config_key, self.scope),
        }
    }
}

/// Trims the scope id and treats an empty string as absent.
pub fn normalize_scope_id(scope_id: Option<String>) -> Option<String> {
    scope_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `scope_id` must be absent for `system` and present otherwise.
pub fn validate_scope_pair(
    scope: ConfigurationScope,
    scope_id: Option<&str>,
) -> Result<(), ConfigError> {
    match (scope.requires_scope_id(), scope_id) {
        (false, Some(id)) => Err(ConfigError::ScopeMismatch(format!(
            "system scope cannot have a scope id (got '{}')",
            id
        ))),
        (true, None) => Err(ConfigError::ScopeMismatch(format!(
            "{} scope requires a scope id",
            scope
        ))),
        (true, Some(id)) if id.trim().is_empty() => Err(ConfigError::ScopeMismatch(format!(
            "{} scope requires a non-empty scope id",
            scope
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Request payload for creating a configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConfigurationRequest {
    #[validate(custom(function = "shared::validation::validate_config_key"))]
    pub config_key: String,

    #[validate(length(min = 1, max = 20, message = "Scope is required"))]
    pub scope: String,

    #[validate(custom(function = "shared::validation::validate_scope_id"))]
    pub scope_id: Option<String>,

    #[validate(length(min = 1, max = 50, message = "Category is required"))]
    pub category: String,

    pub config_value: serde_json::Value,

    pub schema: Option<serde_json::Value>,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    pub valid_from: Option<DateTime<Utc>>,

    pub valid_until: Option<DateTime<Utc>>,

    pub metadata: Option<serde_json::Value>,

    #[validate(length(max = 500, message = "Change reason must be at most 500 characters"))]
    pub change_reason: Option<String>,
}

/// Request payload for updating a configuration.
///
/// A changed `configValue` produces a new version; every other field is
/// applied in place.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigurationRequest {
    pub config_value: Option<serde_json::Value>,

    /// `null` removes the schema; absent leaves it unchanged.
    #[serde(default, deserialize_with = "nullable")]
    pub schema: Option<Option<serde_json::Value>>,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,

    pub is_active: Option<bool>,

    /// `null` opens the window at the start.
    #[serde(default, deserialize_with = "nullable")]
    pub valid_from: Option<Option<DateTime<Utc>>>,

    /// `null` removes the end of the window.
    #[serde(default, deserialize_with = "nullable")]
    pub valid_until: Option<Option<DateTime<Utc>>>,

    pub metadata: Option<serde_json::Value>,

    #[validate(length(max = 500, message = "Change reason must be at most 500 characters"))]
    pub change_reason: Option<String>,
}

/// Keeps an explicit `null` apart from an absent field: absent stays `None`
/// through `#[serde(default)]`, `null` becomes `Some(None)`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateConfigurationRequest {
    /// True when the request touches anything besides the value.
    pub fn has_metadata_changes(&self) -> bool {
        self.schema.is_some()
            || self.description.is_some()
            || self.is_active.is_some()
            || self.valid_from.is_some()
            || self.valid_until.is_some()
            || self.metadata.is_some()
    }
}

/// Request payload for rolling a chain back to an earlier version.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    #[validate(custom(function = "shared::validation::validate_config_key"))]
    pub config_key: String,

    #[validate(length(min = 1, max = 20, message = "Scope is required"))]
    pub scope: String,

    #[validate(custom(function = "shared::validation::validate_scope_id"))]
    pub scope_id: Option<String>,

    #[validate(range(min = 1, message = "Target version must be positive"))]
    pub target_version: i32,

    #[validate(length(max = 500, message = "Change reason must be at most 500 characters"))]
    pub change_reason: Option<String>,
}

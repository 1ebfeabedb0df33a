//! Append-only audit history for configuration changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::pagination::PageRequest;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::configuration::Configuration;
use crate::value_objects::{
    ConfigurationCategory, ConfigurationKey, ConfigurationScope, ConfigurationValue,
};

/// State transition recorded by a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    Deleted,
    Rollback,
    Approved,
    Deactivated,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Deleted => "deleted",
            HistoryAction::Rollback => "rollback",
            HistoryAction::Approved => "approved",
            HistoryAction::Deactivated => "deactivated",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "deleted" => Ok(HistoryAction::Deleted),
            "rollback" => Ok(HistoryAction::Rollback),
            "approved" => Ok(HistoryAction::Approved),
            "deactivated" => Ok(HistoryAction::Deactivated),
            other => Err(format!("unknown history action '{}'", other)),
        }
    }
}

/// Before/after pair for one changed leaf.
///
/// `None` means the leaf did not exist and is omitted on the wire, so a JSON
/// `null` leaf survives a round trip as `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub old: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub new: Option<serde_json::Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Client information attached to a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// Who is making a change, why, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeContext {
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub request: RequestMetadata,
}

impl ChangeContext {
    pub fn new(actor_id: Uuid) -> Self {
        Self {
            actor_id,
            reason: None,
            request: RequestMetadata::default(),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn with_request_metadata(mut self, request: RequestMetadata) -> Self {
        self.request = request;
        self
    }
}

/// Persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationHistory {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub action: HistoryAction,
    pub previous_version: Option<i32>,
    pub new_version: Option<i32>,
    pub config_key: ConfigurationKey,
    pub scope: ConfigurationScope,
    pub scope_id: Option<String>,
    pub category: ConfigurationCategory,
    pub previous_value: Option<ConfigurationValue>,
    pub new_value: Option<ConfigurationValue>,
    pub changes: BTreeMap<String, FieldChange>,
    pub changed_by: Uuid,
    pub change_reason: Option<String>,
    pub request_metadata: RequestMetadata,
    pub created_at: DateTime<Utc>,
}

/// History row before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConfigurationHistory {
    pub configuration_id: Uuid,
    pub action: HistoryAction,
    pub previous_version: Option<i32>,
    pub new_version: Option<i32>,
    pub config_key: ConfigurationKey,
    pub scope: ConfigurationScope,
    pub scope_id: Option<String>,
    pub category: ConfigurationCategory,
    pub previous_value: Option<ConfigurationValue>,
    pub new_value: Option<ConfigurationValue>,
    pub changes: BTreeMap<String, FieldChange>,
    pub changed_by: Uuid,
    pub change_reason: Option<String>,
    pub request_metadata: RequestMetadata,
}

impl NewConfigurationHistory {
    /// Snapshot of `row` as the new state.
    pub fn for_row(action: HistoryAction, row: &Configuration, changed_by: Uuid) -> Self {
        Self {
            configuration_id: row.id,
            action,
            previous_version: None,
            new_version: Some(row.version),
            config_key: row.config_key.clone(),
            scope: row.scope,
            scope_id: row.scope_id.clone(),
            category: row.category,
            previous_value: None,
            new_value: Some(row.config_value.clone()),
            changes: BTreeMap::new(),
            changed_by,
            change_reason: None,
            request_metadata: RequestMetadata::default(),
        }
    }

    pub fn with_previous(mut self, previous: &Configuration) -> Self {
        self.previous_version = Some(previous.version);
        self.previous_value = Some(previous.config_value.clone());
        self
    }

    pub fn with_changes(mut self, changes: BTreeMap<String, FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.change_reason = reason;
        self
    }

    pub fn with_request_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.request_metadata = metadata;
        self
    }

    /// Copies reason and request metadata from the change.
    pub fn with_context(self, change: &ChangeContext) -> Self {
        self.with_reason(change.reason.clone())
            .with_request_metadata(change.request.clone())
    }

    /// Assigns an id and timestamp.
    pub fn into_history(self, id: Uuid, created_at: DateTime<Utc>) -> ConfigurationHistory {
        ConfigurationHistory {
            id,
            configuration_id: self.configuration_id,
            action: self.action,
            previous_version: self.previous_version,
            new_version: self.new_version,
            config_key: self.config_key,
            scope: self.scope,
            scope_id: self.scope_id,
            category: self.category,
            previous_value: self.previous_value,
            new_value: self.new_value,
            changes: self.changes,
            changed_by: self.changed_by,
            change_reason: self.change_reason,
            request_metadata: self.request_metadata,
            created_at,
        }
    }
}

/// Selects which history rows to return.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryFilter {
    Configuration(Uuid),
    Key(ConfigurationKey),
    User(Uuid),
    DateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Action(HistoryAction),
}

impl HistoryFilter {
    pub fn matches(&self, entry: &ConfigurationHistory) -> bool {
        match self {
            HistoryFilter::Configuration(id) => entry.configuration_id == *id,
            HistoryFilter::Key(key) => entry.config_key == *key,
            HistoryFilter::User(user) => entry.changed_by == *user,
            HistoryFilter::DateRange { from, to } => {
                entry.created_at >= *from && entry.created_at <= *to
            }
            HistoryFilter::Action(action) => entry.action == *action,
        }
    }
}

/// A filtered, paginated history query. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub filter: HistoryFilter,
    pub page: PageRequest,
}

impl HistoryQuery {
    pub fn new(filter: HistoryFilter, page: PageRequest) -> Self {
        Self { filter, page }
    }
}

/// Number of changes attributed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: Uuid,
    pub changes: i64,
}

/// Aggregated change statistics over a time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_changes: i64,
    pub by_action: BTreeMap<HistoryAction, i64>,
    pub by_category: BTreeMap<ConfigurationCategory, i64>,
    pub most_active_users: Vec<UserActivity>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Number of users reported in [`HistoryStats::most_active_users`].
pub const MOST_ACTIVE_USERS_LIMIT: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_change_keeps_null_apart_from_absent() {
        let change = FieldChange {
            old: Some(serde_json::Value::Null),
            new: None,
        };
        let wire = serde_json::to_value(&change).unwrap();
        assert_eq!(wire, json!({"old": null}));

        let back: FieldChange = serde_json::from_value(wire).unwrap();
        assert_eq!(back, change);

        let both_absent: FieldChange = serde_json::from_value(json!({})).unwrap();
        assert_eq!(both_absent, FieldChange { old: None, new: None });
    }

    fn history(action: HistoryAction, changed_by: Uuid) -> ConfigurationHistory {
        NewConfigurationHistory {
            configuration_id: Uuid::new_v4(),
            action,
            previous_version: None,
            new_version: Some(1),
            config_key: ConfigurationKey::parse("pricing.margin").unwrap(),
            scope: ConfigurationScope::System,
            scope_id: None,
            category: ConfigurationCategory::Pricing,
            previous_value: None,
            new_value: Some(ConfigurationValue::new(json!({"pct": 10})).unwrap()),
            changes: BTreeMap::new(),
            changed_by,
            change_reason: Some("initial".into()),
            request_metadata: RequestMetadata::default(),
        }
        .into_history(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_action_roundtrip() {
        for action in [
            HistoryAction::Created,
            HistoryAction::Updated,
            HistoryAction::Deleted,
            HistoryAction::Rollback,
            HistoryAction::Approved,
            HistoryAction::Deactivated,
        ] {
            assert_eq!(action.as_str().parse::<HistoryAction>().unwrap(), action);
        }
        assert!("purged".parse::<HistoryAction>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let user = Uuid::new_v4();
        let entry = history(HistoryAction::Created, user);

        assert!(HistoryFilter::User(user).matches(&entry));
        assert!(!HistoryFilter::User(Uuid::new_v4()).matches(&entry));
        assert!(HistoryFilter::Action(HistoryAction::Created).matches(&entry));
        assert!(HistoryFilter::Configuration(entry.configuration_id).matches(&entry));
        assert!(HistoryFilter::Key(entry.config_key.clone()).matches(&entry));
        assert!(!HistoryFilter::DateRange {
            from: entry.created_at + chrono::Duration::hours(1),
            to: entry.created_at + chrono::Duration::hours(2),
        }
        .matches(&entry));
    }

    #[test]
    fn test_history_serializes_camel_case() {
        let entry = history(HistoryAction::Rollback, Uuid::new_v4());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "rollback");
        assert_eq!(json["configKey"], "pricing.margin");
        assert_eq!(json["newValue"], json!({"pct": 10}));
    }
}

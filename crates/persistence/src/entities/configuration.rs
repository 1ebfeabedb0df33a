//! Configuration and configuration history entities (database row mappings).

use chrono::{DateTime, Utc};
use domain::models::{
    Configuration, ConfigurationHistory, FieldChange, HistoryAction, RequestMetadata,
};
use domain::value_objects::{
    ConfigurationCategory, ConfigurationKey, ConfigurationScope, ConfigurationValue,
};
use domain::ConfigError;
use sqlx::FromRow;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// A stored row that no longer satisfies the domain invariants.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("row {id}: invalid {column}: {message}")]
    InvalidColumn {
        id: Uuid,
        column: &'static str,
        message: String,
    },
}

impl From<EntityError> for ConfigError {
    fn from(err: EntityError) -> Self {
        ConfigError::Storage(err.to_string())
    }
}

fn invalid(id: Uuid, column: &'static str, message: impl ToString) -> EntityError {
    EntityError::InvalidColumn {
        id,
        column,
        message: message.to_string(),
    }
}

/// Database enum for configuration_scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "configuration_scope", rename_all = "snake_case")]
pub enum ScopeDb {
    System,
    Company,
    Branch,
    User,
}

impl From<ScopeDb> for ConfigurationScope {
    fn from(db: ScopeDb) -> Self {
        match db {
            ScopeDb::System => Self::System,
            ScopeDb::Company => Self::Company,
            ScopeDb::Branch => Self::Branch,
            ScopeDb::User => Self::User,
        }
    }
}

impl From<ConfigurationScope> for ScopeDb {
    fn from(scope: ConfigurationScope) -> Self {
        match scope {
            ConfigurationScope::System => Self::System,
            ConfigurationScope::Company => Self::Company,
            ConfigurationScope::Branch => Self::Branch,
            ConfigurationScope::User => Self::User,
        }
    }
}

/// Database enum for configuration_category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "configuration_category", rename_all = "snake_case")]
pub enum CategoryDb {
    Tax,
    Pricing,
    Workflow,
    Notification,
    Inventory,
    Accounting,
    General,
}

impl From<CategoryDb> for ConfigurationCategory {
    fn from(db: CategoryDb) -> Self {
        match db {
            CategoryDb::Tax => Self::Tax,
            CategoryDb::Pricing => Self::Pricing,
            CategoryDb::Workflow => Self::Workflow,
            CategoryDb::Notification => Self::Notification,
            CategoryDb::Inventory => Self::Inventory,
            CategoryDb::Accounting => Self::Accounting,
            CategoryDb::General => Self::General,
        }
    }
}

impl From<ConfigurationCategory> for CategoryDb {
    fn from(category: ConfigurationCategory) -> Self {
        match category {
            ConfigurationCategory::Tax => Self::Tax,
            ConfigurationCategory::Pricing => Self::Pricing,
            ConfigurationCategory::Workflow => Self::Workflow,
            ConfigurationCategory::Notification => Self::Notification,
            ConfigurationCategory::Inventory => Self::Inventory,
            ConfigurationCategory::Accounting => Self::Accounting,
            ConfigurationCategory::General => Self::General,
        }
    }
}

/// Database enum for configuration_history_action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "configuration_history_action", rename_all = "snake_case")]
pub enum HistoryActionDb {
    Created,
    Updated,
    Deleted,
    Rollback,
    Approved,
    Deactivated,
}

impl From<HistoryActionDb> for HistoryAction {
    fn from(db: HistoryActionDb) -> Self {
        match db {
            HistoryActionDb::Created => Self::Created,
            HistoryActionDb::Updated => Self::Updated,
            HistoryActionDb::Deleted => Self::Deleted,
            HistoryActionDb::Rollback => Self::Rollback,
            HistoryActionDb::Approved => Self::Approved,
            HistoryActionDb::Deactivated => Self::Deactivated,
        }
    }
}

impl From<HistoryAction> for HistoryActionDb {
    fn from(action: HistoryAction) -> Self {
        match action {
            HistoryAction::Created => Self::Created,
            HistoryAction::Updated => Self::Updated,
            HistoryAction::Deleted => Self::Deleted,
            HistoryAction::Rollback => Self::Rollback,
            HistoryAction::Approved => Self::Approved,
            HistoryAction::Deactivated => Self::Deactivated,
        }
    }
}

/// Database row mapping for the configurations table.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigurationEntity {
    pub id: Uuid,
    pub config_key: String,
    pub scope: ScopeDb,
    pub scope_id: Option<String>,
    pub category: CategoryDb,
    pub config_value: serde_json::Value,
    pub schema: Option<serde_json::Value>,
    pub version: i32,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigurationEntity> for Configuration {
    type Error = EntityError;

    fn try_from(entity: ConfigurationEntity) -> Result<Self, Self::Error> {
        let id = entity.id;
        let config_key =
            ConfigurationKey::parse(&entity.config_key).map_err(|e| invalid(id, "config_key", e))?;
        // Stored values were size-checked on write; the limit may since have changed.
        let config_value = ConfigurationValue::with_max_bytes(entity.config_value, usize::MAX)
            .map_err(|e| invalid(id, "config_value", e))?;

        Ok(Self {
            id,
            config_key,
            scope: entity.scope.into(),
            scope_id: entity.scope_id,
            category: entity.category.into(),
            config_value,
            schema: entity.schema,
            version: entity.version,
            is_active: entity.is_active,
            valid_from: entity.valid_from,
            valid_until: entity.valid_until,
            description: entity.description,
            metadata: entity.metadata,
            created_by: entity.created_by,
            updated_by: entity.updated_by,
            approved_by: entity.approved_by,
            approved_at: entity.approved_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

/// Database row mapping for the configuration_history table.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigurationHistoryEntity {
    pub id: Uuid,
    pub configuration_id: Uuid,
    pub action: HistoryActionDb,
    pub previous_version: Option<i32>,
    pub new_version: Option<i32>,
    pub config_key: String,
    pub scope: ScopeDb,
    pub scope_id: Option<String>,
    pub category: CategoryDb,
    pub previous_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub changes: serde_json::Value,
    pub changed_by: Uuid,
    pub change_reason: Option<String>,
    pub request_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ConfigurationHistoryEntity> for ConfigurationHistory {
    type Error = EntityError;

    fn try_from(entity: ConfigurationHistoryEntity) -> Result<Self, Self::Error> {
        let id = entity.id;
        let value = |raw: Option<serde_json::Value>, column| {
            raw.map(|v| ConfigurationValue::with_max_bytes(v, usize::MAX))
                .transpose()
                .map_err(|e| invalid(id, column, e))
        };

        let changes: BTreeMap<String, FieldChange> =
            serde_json::from_value(entity.changes).map_err(|e| invalid(id, "changes", e))?;
        let request_metadata: RequestMetadata = serde_json::from_value(entity.request_metadata)
            .map_err(|e| invalid(id, "request_metadata", e))?;

        Ok(Self {
            id,
            configuration_id: entity.configuration_id,
            action: entity.action.into(),
            previous_version: entity.previous_version,
            new_version: entity.new_version,
            config_key: ConfigurationKey::parse(&entity.config_key)
                .map_err(|e| invalid(id, "config_key", e))?,
            scope: entity.scope.into(),
            scope_id: entity.scope_id,
            category: entity.category.into(),
            previous_value: value(entity.previous_value, "previous_value")?,
            new_value: value(entity.new_value, "new_value")?,
            changes,
            changed_by: entity.changed_by,
            change_reason: entity.change_reason,
            request_metadata,
            created_at: entity.created_at,
        })
    }
}

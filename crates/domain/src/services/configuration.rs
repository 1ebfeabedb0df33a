//! Configuration use cases.
//!
//! [`ConfigurationService`] wires the rule engine, schema validation,
//! resolution and versioning around one repository and exposes the
//! operations the API layer calls.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use shared::pagination::Page;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ConfigError;
use crate::models::configuration::REQUIRES_APPROVAL_FLAG;
use crate::models::{
    ChainKey, ChangeContext, Configuration, ConfigurationHistory, ConfigurationMetrics,
    CreateConfigurationRequest, HistoryAction, HistoryQuery, HistoryStats, RollbackRequest,
    UpdateConfigurationRequest,
};
use crate::repository::ConfigurationRepository;
use crate::services::resolution::ResolutionService;
use crate::services::rules::{ApprovalAuthorizer, ConfigurationRules, DEFAULT_EXPIRING_SOON_DAYS};
use crate::services::validation::{
    find_reserved_keys, SchemaCache, SchemaValidationService, DEFAULT_SCHEMA_CACHE_CAPACITY,
};
use crate::services::versioning::{VersionComparison, VersioningService};
use crate::value_objects::{
    ConfigurationCategory, ConfigurationKey, ConfigurationScope, ConfigurationValue,
    DEFAULT_MAX_VALUE_BYTES,
};

/// Tunables of the configuration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEngineSettings {
    pub max_value_bytes: usize,
    pub schema_cache_capacity: usize,
    pub expiring_soon_days: i64,
}

impl Default for ConfigurationEngineSettings {
    fn default() -> Self {
        Self {
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            schema_cache_capacity: DEFAULT_SCHEMA_CACHE_CAPACITY,
            expiring_soon_days: DEFAULT_EXPIRING_SOON_DAYS,
        }
    }
}

#[derive(Clone)]
pub struct ConfigurationService {
    repository: Arc<dyn ConfigurationRepository>,
    rules: ConfigurationRules,
    validation: SchemaValidationService,
    resolution: ResolutionService,
    versioning: VersioningService,
    settings: ConfigurationEngineSettings,
}

impl ConfigurationService {
    pub fn new(repository: Arc<dyn ConfigurationRepository>, settings: ConfigurationEngineSettings) -> Self {
        let rules = ConfigurationRules::new(repository.clone())
            .with_expiring_soon_days(settings.expiring_soon_days);
        Self {
            validation: SchemaValidationService::with_capacity(settings.schema_cache_capacity),
            resolution: ResolutionService::new(repository.clone()),
            versioning: VersioningService::new(repository.clone(), rules.clone()),
            rules,
            repository,
            settings,
        }
    }

    /// Replaces the approver role check.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn ApprovalAuthorizer>) -> Self {
        self.rules = self.rules.with_authorizer(authorizer);
        self.versioning = VersioningService::new(self.repository.clone(), self.rules.clone());
        self
    }

    /// Replaces the compiled-schema cache.
    pub fn with_schema_cache(mut self, cache: Arc<dyn SchemaCache>) -> Self {
        self.validation = SchemaValidationService::new(cache);
        self
    }

    pub fn rules(&self) -> &ConfigurationRules {
        &self.rules
    }

    pub fn validation(&self) -> &SchemaValidationService {
        &self.validation
    }

    pub fn resolution(&self) -> &ResolutionService {
        &self.resolution
    }

    pub fn versioning(&self) -> &VersioningService {
        &self.versioning
    }

    pub fn settings(&self) -> &ConfigurationEngineSettings {
        &self.settings
    }

    /// Parses raw chain coordinates.
    pub fn parse_chain(
        config_key: &str,
        scope: &str,
        scope_id: Option<String>,
    ) -> Result<ChainKey, ConfigError> {
        ChainKey::new(
            ConfigurationKey::parse(config_key)?,
            ConfigurationScope::parse(scope)?,
            scope_id,
        )
    }

    pub async fn create(
        &self,
        request: CreateConfigurationRequest,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        request.validate()?;

        let chain = Self::parse_chain(&request.config_key, &request.scope, request.scope_id.clone())?;
        let category = ConfigurationCategory::parse(&request.category)?;
        let value = self.parse_value(request.config_value)?;
        let schema = self.checked_schema(request.schema, &value)?;

        ConfigurationRules::validate_validity_range(request.valid_from, request.valid_until)?;
        self.rules.ensure_can_create(&chain).await?;
        self.rules
            .validate_no_validity_conflicts(&chain, request.valid_from, request.valid_until, None)
            .await?;

        let needs_approval = ConfigurationRules::requires_approval(category, chain.scope);
        let metadata = with_approval_flag(request.metadata, needs_approval)?;

        let now = Utc::now();
        let row = Configuration {
            id: Uuid::new_v4(),
            config_key: chain.config_key,
            scope: chain.scope,
            scope_id: chain.scope_id,
            category,
            config_value: value,
            schema,
            version: 1,
            is_active: true,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            description: request.description,
            metadata,
            created_by: change.actor_id,
            updated_by: None,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        };

        let change = change.clone().with_reason(request.change_reason.or_else(|| change.reason.clone()));
        self.versioning.create_initial(row, &change).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Configuration, ConfigError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ConfigError::not_found(format!("configuration {}", id)))
    }

    /// A changed value appends a new version; other fields change in place.
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateConfigurationRequest,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        request.validate()?;
        let current = self.rules.ensure_can_update(id, change.actor_id).await?;
        let change = change.clone().with_reason(request.change_reason.clone().or_else(|| change.reason.clone()));

        let new_value = match request.config_value.clone() {
            Some(raw) => Some(self.parse_value(raw)?).filter(|v| *v != current.config_value),
            None => None,
        };

        let mut edited = current.clone();
        match request.schema.clone() {
            Some(Some(schema)) => {
                edited.schema =
                    self.checked_schema(Some(schema), new_value.as_ref().unwrap_or(&current.config_value))?;
            }
            Some(None) => edited.schema = None,
            None => {
                if let Some(value) = &new_value {
                    self.validation.validate(value, current.schema.as_ref())?;
                }
            }
        }
        if let Some(description) = request.description.clone() {
            edited.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if request.valid_from.is_some() || request.valid_until.is_some() {
            edited.valid_from = request.valid_from.unwrap_or(current.valid_from);
            edited.valid_until = request.valid_until.unwrap_or(current.valid_until);
            ConfigurationRules::validate_validity_range(edited.valid_from, edited.valid_until)?;
            self.rules
                .validate_no_validity_conflicts(&current.chain(), edited.valid_from, edited.valid_until, Some(id))
                .await?;
        }
        if let Some(metadata) = request.metadata.clone() {
            edited.metadata = with_approval_flag(Some(metadata), current.requires_approval())?;
        }

        if let Some(value) = new_value {
            if !current.is_active {
                return Err(ConfigError::Conflict(format!(
                    "version {} of {} is not active; update the active version instead",
                    current.version,
                    current.chain()
                )));
            }
            let created = self.versioning.create_new_version(&edited, value, &change).await?;
            if request.is_active != Some(false) {
                return Ok(created);
            }
            // Value and deactivation in one request: new version first, then retire it.
            let mut deactivated = created.clone();
            deactivated.is_active = false;
            return self
                .versioning
                .apply_metadata_change(&created, deactivated, HistoryAction::Deactivated, &change)
                .await;
        }

        if let Some(is_active) = request.is_active {
            edited.is_active = is_active;
        }
        if edited == current {
            return Ok(current);
        }

        let action = if current.is_active && !edited.is_active {
            HistoryAction::Deactivated
        } else {
            HistoryAction::Updated
        };
        self.versioning
            .apply_metadata_change(&current, edited, action, &change)
            .await
    }

    pub async fn rollback(
        &self,
        request: RollbackRequest,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        request.validate()?;
        let chain = Self::parse_chain(&request.config_key, &request.scope, request.scope_id.clone())?;
        let change = change.clone().with_reason(request.change_reason.or_else(|| change.reason.clone()));
        self.versioning.rollback(&chain, request.target_version, &change).await
    }

    pub async fn approve(&self, id: Uuid, change: &ChangeContext) -> Result<Configuration, ConfigError> {
        let row = self.rules.ensure_can_approve(id, change.actor_id).await?;

        let mut approved = row.clone();
        approved.approved_by = Some(change.actor_id);
        approved.approved_at = Some(Utc::now());
        self.versioning
            .apply_metadata_change(&row, approved, HistoryAction::Approved, change)
            .await
    }

    pub async fn deactivate(&self, id: Uuid, change: &ChangeContext) -> Result<Configuration, ConfigError> {
        let row = self.rules.ensure_can_update(id, change.actor_id).await?;
        if !row.is_active {
            return Err(ConfigError::Conflict(format!("configuration {} is already inactive", id)));
        }

        let mut deactivated = row.clone();
        deactivated.is_active = false;
        self.versioning
            .apply_metadata_change(&row, deactivated, HistoryAction::Deactivated, change)
            .await
    }

    pub async fn cleanup_old_versions(
        &self,
        chain: &ChainKey,
        keep_last: usize,
        change: &ChangeContext,
    ) -> Result<u64, ConfigError> {
        self.versioning.cleanup_old_versions(chain, keep_last, change).await
    }

    pub async fn list_versions(&self, chain: &ChainKey) -> Result<Vec<Configuration>, ConfigError> {
        self.versioning.list_versions(chain).await
    }

    pub async fn compare_versions(
        &self,
        chain: &ChainKey,
        from_version: i32,
        to_version: i32,
    ) -> Result<VersionComparison, ConfigError> {
        self.versioning.compare_versions(chain, from_version, to_version).await
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<Page<ConfigurationHistory>, ConfigError> {
        self.versioning.history(query).await
    }

    pub async fn history_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HistoryStats, ConfigError> {
        self.versioning.history_stats(from, to).await
    }

    pub async fn metrics(&self, company_id: Option<&str>) -> Result<ConfigurationMetrics, ConfigError> {
        self.rules.calculate_metrics(company_id).await
    }

    pub async fn pending_approvals(&self, company_id: Option<&str>) -> Result<Vec<Configuration>, ConfigError> {
        self.repository.find_pending_approval(company_id).await
    }

    pub async fn expiring_soon(&self, company_id: Option<&str>) -> Result<Vec<Configuration>, ConfigError> {
        let now = Utc::now();
        let horizon = now + Duration::days(self.rules.expiring_soon_days());
        self.repository.find_expiring_between(now, horizon, company_id).await
    }

    pub async fn ping(&self) -> Result<(), ConfigError> {
        self.repository.ping().await
    }

    fn parse_value(&self, raw: Value) -> Result<ConfigurationValue, ConfigError> {
        let reserved = find_reserved_keys(&raw);
        if !reserved.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "reserved keys are not allowed: {}",
                reserved.join(", ")
            )));
        }
        ConfigurationValue::with_max_bytes(raw, self.settings.max_value_bytes)
    }

    /// Checks the schema itself and the value against it. An empty schema is
    /// stored as none.
    fn checked_schema(
        &self,
        schema: Option<Value>,
        value: &ConfigurationValue,
    ) -> Result<Option<Value>, ConfigError> {
        let schema = schema.filter(|s| !(s.is_null() || s.as_object().is_some_and(Map::is_empty)));
        if let Some(schema) = &schema {
            self.validation.validate_schema(schema)?;
        }
        self.validation.validate(value, schema.as_ref())?;
        Ok(schema)
    }
}

/// Ensures `metadata` is an object carrying the approval flag when needed.
fn with_approval_flag(metadata: Option<Value>, requires_approval: bool) -> Result<Option<Value>, ConfigError> {
    let mut map = match metadata {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ConfigError::InvalidValue(
                "metadata must be a JSON object".to_string(),
            ))
        }
    };

    if requires_approval {
        map.insert(REQUIRES_APPROVAL_FLAG.to_string(), Value::Bool(true));
    }
    Ok(Some(Value::Object(map)).filter(|m| m.as_object().is_some_and(|o| !o.is_empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::HistoryFilter;
    use crate::repository::InMemoryConfigurationRepository;
    use serde_json::json;
    use shared::pagination::PageRequest;

    fn service() -> ConfigurationService {
        ConfigurationService::new(
            Arc::new(InMemoryConfigurationRepository::new()),
            ConfigurationEngineSettings::default(),
        )
    }

    fn create_request(key: &str, scope: &str, scope_id: Option<&str>, category: &str, value: Value) -> CreateConfigurationRequest {
        CreateConfigurationRequest {
            config_key: key.to_string(),
            scope: scope.to_string(),
            scope_id: scope_id.map(str::to_string),
            category: category.to_string(),
            config_value: value,
            schema: None,
            description: None,
            valid_from: None,
            valid_until: None,
            metadata: None,
            change_reason: None,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_flags_approval() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());

        let row = service
            .create(create_request("Tax.VAT.Rate", "company", Some("c1"), "tax", json!({"rate": 19})), &change)
            .await
            .unwrap();
        assert_eq!(row.config_key.as_str(), "tax.vat.rate");
        assert_eq!(row.version, 1);
        assert!(row.is_pending_approval());

        let plain = service
            .create(create_request("pricing.margin", "user", Some("u1"), "pricing", json!(10)), &change)
            .await
            .unwrap();
        assert!(!plain.requires_approval());
        assert_eq!(plain.metadata, None);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());

        let cases = vec![
            create_request("tax..rate", "system", None, "tax", json!(1)),
            create_request("tax.rate", "system", Some("x"), "tax", json!(1)),
            create_request("tax.rate", "company", None, "tax", json!(1)),
            create_request("tax.rate", "galaxy", Some("x"), "tax", json!(1)),
            create_request("tax.rate", "system", None, "payroll", json!(1)),
            create_request("tax.rate", "system", None, "tax", Value::Null),
            create_request("tax.rate", "system", None, "tax", json!({"__proto__": {}})),
        ];
        for request in cases {
            let err = service.create(request.clone(), &change).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?}", request);
        }
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let request = create_request("general.locale", "system", None, "general", json!("en"));

        service.create(request.clone(), &change).await.unwrap();
        let err = service.create(request, &change).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_validates_against_schema() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let mut request = create_request("pricing.margin", "system", None, "pricing", json!({"pct": 150}));
        request.schema = Some(json!({
            "type": "object",
            "properties": {"pct": {"type": "number", "maximum": 100}}
        }));

        let err = service.create(request.clone(), &change).await.unwrap_err();
        assert_eq!(err.field_errors().len(), 1);
        assert_eq!(err.field_errors()[0].path, "/pct");

        request.config_value = json!({"pct": 15});
        let row = service.create(request, &change).await.unwrap();
        assert!(row.schema.is_some());

        let update = UpdateConfigurationRequest {
            config_value: Some(json!({"pct": 500})),
            ..Default::default()
        };
        let err = service.update(row.id, update, &change).await.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_update_value_creates_version_and_metadata_does_not() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = service
            .create(create_request("pricing.margin", "system", None, "pricing", json!({"pct": 10})), &change)
            .await
            .unwrap();

        let described = service
            .update(
                v1.id,
                UpdateConfigurationRequest {
                    description: Some("Default margin".into()),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();
        assert_eq!(described.id, v1.id);
        assert_eq!(described.version, 1);

        let v2 = service
            .update(
                v1.id,
                UpdateConfigurationRequest {
                    config_value: Some(json!({"pct": 12})),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();
        assert_ne!(v2.id, v1.id);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.description.as_deref(), Some("Default margin"));

        let err = service
            .update(
                v1.id,
                UpdateConfigurationRequest {
                    config_value: Some(json!({"pct": 13})),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let unchanged = service
            .update(
                v2.id,
                UpdateConfigurationRequest {
                    config_value: Some(json!({"pct": 12})),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();
        assert_eq!(unchanged.version, 2);
    }

    #[tokio::test]
    async fn test_update_value_and_deactivate_together() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = service
            .create(create_request("pricing.margin", "company", Some("c1"), "pricing", json!({"pct": 10})), &change)
            .await
            .unwrap();

        let v2 = service
            .update(
                v1.id,
                UpdateConfigurationRequest {
                    config_value: Some(json!({"pct": 12})),
                    is_active: Some(false),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert!(!v2.is_active);
        assert_eq!(v2.config_value.to_json(), json!({"pct": 12}));
        assert!(!service.get(v1.id).await.unwrap().is_active);

        let page = service
            .history(&HistoryQuery::new(HistoryFilter::Configuration(v2.id), PageRequest::default()))
            .await
            .unwrap();
        let actions: Vec<HistoryAction> = page.items.iter().map(|h| h.action).collect();
        assert_eq!(actions, vec![HistoryAction::Deactivated, HistoryAction::Updated]);
    }

    #[tokio::test]
    async fn test_update_null_clears_schema_and_validity() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let mut request = create_request("pricing.margin", "system", None, "pricing", json!({"pct": 10}));
        request.schema = Some(json!({"type": "object"}));
        request.valid_from = Some(Utc::now() - Duration::days(1));
        request.valid_until = Some(Utc::now() + Duration::days(30));
        let row = service.create(request, &change).await.unwrap();
        assert!(row.schema.is_some() && row.valid_until.is_some());

        let cleared = service
            .update(
                row.id,
                UpdateConfigurationRequest {
                    schema: Some(None),
                    valid_until: Some(None),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();
        assert_eq!(cleared.version, 1);
        assert_eq!(cleared.schema, None);
        assert_eq!(cleared.valid_until, None);
        assert_eq!(cleared.valid_from, row.valid_from);
    }

    #[tokio::test]
    async fn test_approval_workflow() {
        let service = service();
        let creator = ChangeContext::new(Uuid::new_v4());
        let approver = ChangeContext::new(Uuid::new_v4());

        let row = service
            .create(create_request("accounting.fiscal_year", "system", None, "accounting", json!({"start": "01-01"})), &creator)
            .await
            .unwrap();
        assert_eq!(service.pending_approvals(None).await.unwrap().len(), 1);

        let err = service.approve(row.id, &creator).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = service
            .update(
                row.id,
                UpdateConfigurationRequest {
                    description: Some("edit".into()),
                    ..Default::default()
                },
                &approver,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let approved = service.approve(row.id, &approver).await.unwrap();
        assert_eq!(approved.approved_by, Some(approver.actor_id));
        assert!(service.pending_approvals(None).await.unwrap().is_empty());

        let err = service.approve(row.id, &approver).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let history = service
            .history(&HistoryQuery::new(
                HistoryFilter::Action(HistoryAction::Approved),
                PageRequest::default(),
            ))
            .await
            .unwrap();
        assert_eq!(history.total, 1);
    }

    #[tokio::test]
    async fn test_deactivate() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let row = service
            .create(create_request("notification.email", "branch", Some("b1"), "notification", json!(true)), &change)
            .await
            .unwrap();

        let inactive = service.deactivate(row.id, &change).await.unwrap();
        assert!(!inactive.is_active);
        assert_eq!(service.deactivate(row.id, &change).await.unwrap_err().kind(), ErrorKind::Conflict);

        let recreated = service
            .create(create_request("notification.email", "branch", Some("b1"), "notification", json!(false)), &change)
            .await
            .unwrap();
        assert_eq!(recreated.version, 2);
    }

    #[tokio::test]
    async fn test_rollback_request() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = service
            .create(create_request("inventory.reorder", "company", Some("c1"), "inventory", json!({"min": 5})), &change)
            .await
            .unwrap();
        service
            .update(
                v1.id,
                UpdateConfigurationRequest {
                    config_value: Some(json!({"min": 8})),
                    ..Default::default()
                },
                &change,
            )
            .await
            .unwrap();

        let restored = service
            .rollback(
                RollbackRequest {
                    config_key: "inventory.reorder".into(),
                    scope: "company".into(),
                    scope_id: Some("c1".into()),
                    target_version: 1,
                    change_reason: Some("revert".into()),
                },
                &change,
            )
            .await
            .unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.config_value.to_json(), json!({"min": 5}));
    }

    #[tokio::test]
    async fn test_expiring_soon_and_metrics() {
        let service = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let mut request = create_request("pricing.promo", "company", Some("c1"), "pricing", json!(true));
        request.valid_until = Some(Utc::now() + Duration::days(3));
        service.create(request, &change).await.unwrap();
        service
            .create(create_request("pricing.promo", "company", Some("c2"), "pricing", json!(true)), &change)
            .await
            .unwrap();

        assert_eq!(service.expiring_soon(Some("c1")).await.unwrap().len(), 1);
        assert!(service.expiring_soon(Some("c2")).await.unwrap().is_empty());

        let metrics = service.metrics(Some("c1")).await.unwrap();
        assert_eq!(metrics.total, 1);
        assert_eq!(metrics.expiring_soon, 1);
    }

    #[test]
    fn test_with_approval_flag() {
        assert_eq!(with_approval_flag(None, false).unwrap(), None);
        assert_eq!(
            with_approval_flag(Some(json!({"owner": "ops"})), true).unwrap(),
            Some(json!({"owner": "ops", "requiresApproval": true}))
        );
        assert!(with_approval_flag(Some(json!([1])), false).is_err());
    }
}

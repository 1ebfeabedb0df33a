//! Hierarchical configuration resolution.
//!
//! Precedence is `user > branch > company > system`: the most specific active
//! row wins, and [`ResolutionService::resolve_with_merge`] layers all matching
//! rows from least to most specific.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::models::{ChainKey, Configuration};
use crate::repository::{ConfigurationRepository, ScopeTarget};
use crate::value_objects::value::WRAPPED_VALUE_KEY;
use crate::value_objects::{
    ConfigurationCategory, ConfigurationKey, ConfigurationScope, ConfigurationValue,
};

/// Who is asking: the owners whose overrides apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    pub company_id: Option<String>,
    pub branch_id: Option<String>,
    pub user_id: Option<String>,
}

impl ResolutionContext {
    /// Context with system-level rows only.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn new(
        company_id: Option<String>,
        branch_id: Option<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            company_id: clean_id(company_id),
            branch_id: clean_id(branch_id),
            user_id: clean_id(user_id),
        }
    }

    pub fn company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = clean_id(Some(company_id.into()));
        self
    }

    pub fn branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = clean_id(Some(branch_id.into()));
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = clean_id(Some(user_id.into()));
        self
    }

    /// Scope targets to search, lowest priority first.
    pub fn targets(&self) -> Vec<ScopeTarget> {
        let mut targets = vec![ScopeTarget::system()];
        if let Some(id) = &self.company_id {
            targets.push(ScopeTarget::new(ConfigurationScope::Company, id.clone()));
        }
        if let Some(id) = &self.branch_id {
            targets.push(ScopeTarget::new(ConfigurationScope::Branch, id.clone()));
        }
        if let Some(id) = &self.user_id {
            targets.push(ScopeTarget::new(ConfigurationScope::User, id.clone()));
        }
        targets
    }
}

/// Trimmed id, or `None` when blank.
fn clean_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Clone)]
pub struct ResolutionService {
    repository: Arc<dyn ConfigurationRepository>,
}

impl ResolutionService {
    pub fn new(repository: Arc<dyn ConfigurationRepository>) -> Self {
        Self { repository }
    }

    /// The highest-priority active row for `key`.
    pub async fn resolve(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
    ) -> Result<Configuration, ConfigError> {
        let winner = self.resolve_hierarchy(key, ctx).await?.into_iter().next();
        match winner {
            Some(row) => {
                tracing::debug!(
                    config_key = %key,
                    scope = %row.scope,
                    version = row.version,
                    "Resolved configuration"
                );
                Ok(row)
            }
            None => Err(ConfigError::not_found(format!("configuration '{}'", key))),
        }
    }

    /// The active row of one chain, provided it is inside its validity
    /// window at `at`.
    pub async fn resolve_effective_at(
        &self,
        chain: &ChainKey,
        at: DateTime<Utc>,
    ) -> Result<Configuration, ConfigError> {
        self.repository
            .find_active_valid_at(chain, at)
            .await?
            .ok_or_else(|| ConfigError::not_found(format!("configuration effective for {} at {}", chain, at)))
    }

    /// Every matching active row, highest priority first. Empty when nothing
    /// matches.
    pub async fn resolve_hierarchy(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
    ) -> Result<Vec<Configuration>, ConfigError> {
        let mut rows = self.repository.find_hierarchy(key, &ctx.targets()).await?;
        rows.sort_by(|a, b| {
            b.scope
                .priority()
                .cmp(&a.scope.priority())
                .then(b.version.cmp(&a.version))
        });
        Ok(rows)
    }

    /// Deep merge of every level, more specific levels winning.
    pub async fn resolve_with_merge(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
    ) -> Result<ConfigurationValue, ConfigError> {
        let rows = self.resolve_hierarchy(key, ctx).await?;
        let mut layers = rows.into_iter().rev();
        let base = layers
            .next()
            .ok_or_else(|| ConfigError::not_found(format!("configuration '{}'", key)))?;

        let merged = layers.fold(base.config_value, |acc, row| acc.merge(&row.config_value));
        tracing::debug!(config_key = %key, "Resolved merged configuration");
        Ok(merged)
    }

    /// Typed extraction of the resolved value, or of a dotted path inside it.
    ///
    /// Without a path, a wrapped scalar (`{"value": x}`) yields `x`.
    pub async fn resolve_value<T: DeserializeOwned>(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
        value_key: Option<&str>,
    ) -> Result<T, ConfigError> {
        let row = self.resolve(key, ctx).await?;
        extract_value(&row.config_value, key, value_key)
    }

    /// Falls back to `default` only when nothing resolves.
    pub async fn resolve_with_default(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
        default: ConfigurationValue,
    ) -> Result<ConfigurationValue, ConfigError> {
        match self.resolve(key, ctx).await {
            Ok(row) => Ok(row.config_value),
            Err(e) if e.is_not_found() => Ok(default),
            Err(e) => Err(e),
        }
    }

    pub async fn resolve_value_with_default<T: DeserializeOwned>(
        &self,
        key: &ConfigurationKey,
        ctx: &ResolutionContext,
        value_key: Option<&str>,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.resolve_value(key, ctx, value_key).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_not_found() => {
                tracing::debug!(config_key = %key, "Using default value");
                Ok(default)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves each key independently; keys that resolve to nothing are left
    /// out of the result.
    pub async fn resolve_multiple(
        &self,
        keys: &[ConfigurationKey],
        ctx: &ResolutionContext,
    ) -> Result<BTreeMap<ConfigurationKey, Configuration>, ConfigError> {
        let mut resolved = BTreeMap::new();
        for key in keys {
            match self.resolve(key, ctx).await {
                Ok(row) => {
                    resolved.insert(key.clone(), row);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }

    /// Effective rows of a category, one per key, most specific level winning.
    pub async fn resolve_by_category(
        &self,
        category: ConfigurationCategory,
        ctx: &ResolutionContext,
    ) -> Result<Vec<Configuration>, ConfigError> {
        let now = Utc::now();
        let mut winners: BTreeMap<ConfigurationKey, Configuration> = BTreeMap::new();

        for target in ctx.targets() {
            for row in self.repository.find_by_category(category, &target).await? {
                if !row.is_effective_at(now) {
                    continue;
                }
                let replace = winners
                    .get(&row.config_key)
                    .map_or(true, |current| row.scope.priority() > current.scope.priority());
                if replace {
                    winners.insert(row.config_key.clone(), row);
                }
            }
        }

        Ok(winners.into_values().collect())
    }
}

fn extract_value<T: DeserializeOwned>(
    value: &ConfigurationValue,
    key: &ConfigurationKey,
    value_key: Option<&str>,
) -> Result<T, ConfigError> {
    let raw = match value_key {
        Some(path) => value.get(path).cloned().ok_or_else(|| {
            ConfigError::not_found(format!("value '{}' in configuration '{}'", path, key))
        })?,
        None => match value.as_map().get(WRAPPED_VALUE_KEY) {
            Some(inner) if value.as_map().len() == 1 => inner.clone(),
            _ => value.to_json(),
        },
    };

    serde_json::from_value(raw).map_err(|e| {
        ConfigError::InvalidValue(format!("configuration '{}' has unexpected shape: {}", key, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryAction, NewConfigurationHistory};
    use crate::repository::{InMemoryConfigurationRepository, VersionTransition};
    use chrono::Duration;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    fn key(raw: &str) -> ConfigurationKey {
        ConfigurationKey::parse(raw).unwrap()
    }

    async fn put(
        repo: &InMemoryConfigurationRepository,
        key_raw: &str,
        scope: ConfigurationScope,
        scope_id: Option<&str>,
        value: serde_json::Value,
    ) -> Configuration {
        let now = Utc::now();
        let row = Configuration {
            id: Uuid::new_v4(),
            config_key: key(key_raw),
            scope,
            scope_id: scope_id.map(str::to_string),
            category: ConfigurationCategory::Pricing,
            config_value: ConfigurationValue::new(value).unwrap(),
            schema: None,
            version: 1,
            is_active: true,
            valid_from: None,
            valid_until: None,
            description: None,
            metadata: None,
            created_by: Uuid::new_v4(),
            updated_by: None,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        };
        let history = NewConfigurationHistory::for_row(HistoryAction::Created, &row, row.created_by);
        repo.insert_version(VersionTransition {
            expected_active: None,
            new_row: row,
            history,
        })
        .await
        .unwrap()
    }

    fn ctx() -> ResolutionContext {
        ResolutionContext::system().company("c1").branch("b1").user("u1")
    }

    #[test]
    fn test_builders_drop_blank_ids() {
        let built = ResolutionContext::system().company("  ").branch(" b1 ").user("");
        assert_eq!(built, ResolutionContext::new(None, Some("b1".into()), None));
        assert_eq!(built.targets().len(), 2);
    }

    #[tokio::test]
    async fn test_effective_at_respects_validity_window() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        let row = put(&repo, "pricing.promo", ConfigurationScope::Company, Some("c1"), json!({"pct": 5})).await;

        let mut windowed = row.clone();
        windowed.valid_from = Some(Utc::now() + Duration::days(1));
        windowed.valid_until = Some(Utc::now() + Duration::days(10));
        repo.update_metadata(&windowed, None).await.unwrap();

        let service = ResolutionService::new(repo);
        let chain = row.chain();
        assert!(service
            .resolve_effective_at(&chain, Utc::now())
            .await
            .unwrap_err()
            .is_not_found());

        let found = service
            .resolve_effective_at(&chain, Utc::now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(found.id, row.id);
    }

    #[tokio::test]
    async fn test_user_row_wins_regardless_of_insertion_order() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.margin", ConfigurationScope::User, Some("u1"), json!({"pct": 30})).await;
        put(&repo, "pricing.margin", ConfigurationScope::System, None, json!({"pct": 10})).await;
        put(&repo, "pricing.margin", ConfigurationScope::Company, Some("c1"), json!({"pct": 20})).await;

        let service = ResolutionService::new(repo);
        let row = service.resolve(&key("pricing.margin"), &ctx()).await.unwrap();
        assert_eq!(row.scope, ConfigurationScope::User);

        let company_only = ResolutionContext::system().company("c1");
        let row = service.resolve(&key("pricing.margin"), &company_only).await.unwrap();
        assert_eq!(row.scope, ConfigurationScope::Company);
    }

    #[tokio::test]
    async fn test_other_owners_are_ignored() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.margin", ConfigurationScope::Company, Some("c2"), json!({"pct": 20})).await;

        let service = ResolutionService::new(repo);
        let err = service.resolve(&key("pricing.margin"), &ctx()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.resolve_hierarchy(&key("pricing.margin"), &ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hierarchy_is_descending_priority() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.margin", ConfigurationScope::System, None, json!(1)).await;
        put(&repo, "pricing.margin", ConfigurationScope::Branch, Some("b1"), json!(3)).await;
        put(&repo, "pricing.margin", ConfigurationScope::Company, Some("c1"), json!(2)).await;

        let scopes: Vec<ConfigurationScope> = ResolutionService::new(repo)
            .resolve_hierarchy(&key("pricing.margin"), &ctx())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.scope)
            .collect();
        assert_eq!(
            scopes,
            vec![ConfigurationScope::Branch, ConfigurationScope::Company, ConfigurationScope::System]
        );
    }

    #[tokio::test]
    async fn test_deep_merge_across_levels() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.rules", ConfigurationScope::System, None, json!({"a": 1, "b": {"x": 1}})).await;
        put(&repo, "pricing.rules", ConfigurationScope::Company, Some("c1"), json!({"b": {"y": 2}, "c": 3})).await;

        let merged = ResolutionService::new(repo)
            .resolve_with_merge(&key("pricing.rules"), &ctx())
            .await
            .unwrap();
        assert_eq!(merged.to_json(), json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
    }

    #[tokio::test]
    async fn test_merge_with_nothing_is_not_found() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        let err = ResolutionService::new(repo)
            .resolve_with_merge(&key("pricing.rules"), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_value_paths() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Limits {
            max: u32,
        }

        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.limits", ConfigurationScope::System, None, json!({"limits": {"max": 5}})).await;
        put(&repo, "pricing.currency", ConfigurationScope::System, None, json!("EUR")).await;
        let service = ResolutionService::new(repo);

        let limits: Limits = service
            .resolve_value(&key("pricing.limits"), &ctx(), Some("limits"))
            .await
            .unwrap();
        assert_eq!(limits, Limits { max: 5 });

        let currency: String = service
            .resolve_value(&key("pricing.currency"), &ctx(), None)
            .await
            .unwrap();
        assert_eq!(currency, "EUR");

        let missing = service
            .resolve_value::<u32>(&key("pricing.limits"), &ctx(), Some("limits.min"))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        let wrong_type = service
            .resolve_value::<u32>(&key("pricing.currency"), &ctx(), None)
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, ConfigError::InvalidValue(_)));
    }

    #[tokio::test]
    async fn test_defaults_only_replace_not_found() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        let service = ResolutionService::new(repo.clone());
        let default = ConfigurationValue::new(json!({"pct": 5})).unwrap();

        let value = service
            .resolve_with_default(&key("pricing.margin"), &ctx(), default.clone())
            .await
            .unwrap();
        assert_eq!(value, default);

        let pct: u32 = service
            .resolve_value_with_default(&key("pricing.margin"), &ctx(), Some("pct"), 7)
            .await
            .unwrap();
        assert_eq!(pct, 7);

        repo.set_failing(true);
        let err = service
            .resolve_with_default(&key("pricing.margin"), &ctx(), default)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Storage(_)));
        assert!(service
            .resolve_value_with_default(&key("pricing.margin"), &ctx(), None, 7u32)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resolve_multiple_omits_missing() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.margin", ConfigurationScope::System, None, json!(10)).await;
        let service = ResolutionService::new(repo.clone());

        let keys = vec![key("pricing.margin"), key("pricing.missing")];
        let resolved = service.resolve_multiple(&keys, &ctx()).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key(&key("pricing.margin")));

        repo.set_failing(true);
        assert!(service.resolve_multiple(&keys, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_by_category_dedupes_and_skips_expired() {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        put(&repo, "pricing.margin", ConfigurationScope::System, None, json!(10)).await;
        put(&repo, "pricing.margin", ConfigurationScope::Company, Some("c1"), json!(20)).await;
        let expired = put(&repo, "pricing.promo", ConfigurationScope::System, None, json!(true)).await;

        let mut expired = expired;
        expired.valid_until = Some(Utc::now() - Duration::days(1));
        expired.valid_from = Some(Utc::now() - Duration::days(10));
        repo.update_metadata(&expired, None).await.unwrap();

        let rows = ResolutionService::new(repo)
            .resolve_by_category(ConfigurationCategory::Pricing, &ctx())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].config_key.as_str(), "pricing.margin");
        assert_eq!(rows[0].scope, ConfigurationScope::Company);
    }

    #[test]
    fn test_context_targets() {
        let targets = ResolutionContext::new(Some("c1".into()), Some("  ".into()), None).targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], ScopeTarget::system());
        assert_eq!(targets[1], ScopeTarget::new(ConfigurationScope::Company, "c1"));
    }
}

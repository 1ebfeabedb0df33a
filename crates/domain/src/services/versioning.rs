//! Version chains, rollback and audit history.
//!
//! A chain is the set of rows sharing key, scope and scope id. Value changes
//! never edit a row: they append a new version through an atomic
//! [`VersionTransition`], so each chain keeps strictly increasing versions and
//! at most one active row.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shared::pagination::Page;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::{
    ChainKey, ChangeContext, Configuration, ConfigurationHistory, FieldChange, HistoryAction,
    HistoryQuery, HistoryStats, NewConfigurationHistory,
};
use crate::repository::{ConfigurationRepository, VersionTransition};
use crate::services::rules::ConfigurationRules;
use crate::value_objects::ConfigurationValue;

/// Field-level difference between two versions of one chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub from_version: i32,
    pub to_version: i32,
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Clone)]
pub struct VersioningService {
    repository: Arc<dyn ConfigurationRepository>,
    rules: ConfigurationRules,
}

impl VersioningService {
    pub fn new(repository: Arc<dyn ConfigurationRepository>, rules: ConfigurationRules) -> Self {
        Self { repository, rules }
    }

    /// Stores the first active row of a chain.
    ///
    /// The version continues after any inactive rows left in the chain, so
    /// numbers are never reused.
    pub async fn create_initial(
        &self,
        mut row: Configuration,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        let chain = row.chain();
        row.version = self.next_version(&chain).await?;
        row.is_active = true;

        let history = NewConfigurationHistory::for_row(HistoryAction::Created, &row, change.actor_id)
            .with_context(change);
        let created = self
            .repository
            .insert_version(VersionTransition {
                expected_active: None,
                new_row: row,
                history,
            })
            .await?;

        tracing::info!(
            configuration_id = %created.id,
            chain = %chain,
            version = created.version,
            "Configuration created"
        );
        Ok(created)
    }

    /// Appends a version holding `new_value` and deactivates `current`.
    ///
    /// Fails with `Conflict` if another writer changed the chain after
    /// `current` was read.
    pub async fn create_new_version(
        &self,
        current: &Configuration,
        new_value: ConfigurationValue,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        let chain = current.chain();
        let version = self.next_version(&chain).await?.max(current.version + 1);

        let mut row = successor(current, change.actor_id);
        row.version = version;
        row.config_value = new_value;

        let changes = current.config_value.diff(&row.config_value);
        let history = NewConfigurationHistory::for_row(HistoryAction::Updated, &row, change.actor_id)
            .with_previous(current)
            .with_changes(changes)
            .with_context(change);

        let created = self
            .repository
            .insert_version(VersionTransition {
                expected_active: current.is_active.then_some(current.id),
                new_row: row,
                history,
            })
            .await?;

        tracing::info!(
            configuration_id = %created.id,
            chain = %chain,
            previous_version = current.version,
            version = created.version,
            "Configuration version created"
        );
        Ok(created)
    }

    /// Restores the value of `target_version` as a brand-new version.
    pub async fn rollback(
        &self,
        chain: &ChainKey,
        target_version: i32,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        let rows = self.repository.find_chain(chain).await?;
        let current = rows
            .iter()
            .find(|r| r.is_active)
            .or_else(|| rows.first())
            .ok_or_else(|| ConfigError::not_found(format!("configuration {}", chain)))?;
        let target = self.rules.ensure_can_rollback(current, target_version).await?;

        let latest = rows.iter().map(|r| r.version).max().unwrap_or(current.version);
        let mut row = successor(current, change.actor_id);
        row.version = latest + 1;
        row.config_value = target.config_value.clone();
        row.schema = target.schema.clone();

        let changes = current.config_value.diff(&row.config_value);
        let history = NewConfigurationHistory::for_row(HistoryAction::Rollback, &row, change.actor_id)
            .with_previous(current)
            .with_changes(changes)
            .with_context(change);

        let created = self
            .repository
            .insert_version(VersionTransition {
                expected_active: current.is_active.then_some(current.id),
                new_row: row,
                history,
            })
            .await?;

        tracing::info!(
            configuration_id = %created.id,
            chain = %chain,
            target_version,
            version = created.version,
            "Configuration rolled back"
        );
        Ok(created)
    }

    /// Persists an in-place change of non-versioned fields and records it.
    pub async fn apply_metadata_change(
        &self,
        previous: &Configuration,
        mut updated: Configuration,
        action: HistoryAction,
        change: &ChangeContext,
    ) -> Result<Configuration, ConfigError> {
        updated.updated_by = Some(change.actor_id);
        let changes = metadata_changes(previous, &updated);
        let history = NewConfigurationHistory::for_row(action, &updated, change.actor_id)
            .with_previous(previous)
            .with_changes(changes)
            .with_context(change);

        let saved = self.repository.update_metadata(&updated, Some(history)).await?;
        tracing::info!(
            configuration_id = %saved.id,
            action = %action,
            version = saved.version,
            "Configuration metadata updated"
        );
        Ok(saved)
    }

    pub fn diff(
        &self,
        before: &ConfigurationValue,
        after: &ConfigurationValue,
    ) -> BTreeMap<String, FieldChange> {
        before.diff(after)
    }

    /// Deletes inactive rows beyond the newest `keep_last` versions. The
    /// active row is never removed.
    ///
    /// Active rows other than the newest one are deactivated first. Each
    /// deactivated and deleted row gets a history entry.
    pub async fn cleanup_old_versions(
        &self,
        chain: &ChainKey,
        keep_last: usize,
        change: &ChangeContext,
    ) -> Result<u64, ConfigError> {
        let mut rows = self.repository.find_chain(chain).await?;

        if let Some(keep) = rows.iter().find(|r| r.is_active).map(|r| r.id) {
            let stray: Vec<Configuration> = rows
                .iter()
                .filter(|r| r.is_active && r.id != keep)
                .cloned()
                .collect();
            if !stray.is_empty() {
                let healed = self.repository.deactivate_old_versions(chain, keep).await?;
                tracing::warn!(chain = %chain, healed, "Deactivated stray active versions");
                for row in &stray {
                    let mut after = row.clone();
                    after.is_active = false;
                    let entry = NewConfigurationHistory::for_row(HistoryAction::Deactivated, &after, change.actor_id)
                        .with_previous(row)
                        .with_changes(metadata_changes(row, &after))
                        .with_context(change);
                    self.repository.create_history(entry).await?;
                }
                rows = self.repository.find_chain(chain).await?;
            }
        }

        let doomed: Vec<&Configuration> = rows
            .iter()
            .skip(keep_last)
            .filter(|r| !r.is_active)
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = doomed.iter().map(|r| r.id).collect();
        let deleted = self.repository.delete_versions(&ids).await?;
        for row in doomed {
            let mut entry = NewConfigurationHistory::for_row(HistoryAction::Deleted, row, change.actor_id)
                .with_previous(row)
                .with_context(change);
            entry.new_version = None;
            entry.new_value = None;
            self.repository.create_history(entry).await?;
        }

        tracing::info!(chain = %chain, keep_last, deleted, "Old configuration versions removed");
        Ok(deleted)
    }

    /// Every version of the chain, newest first.
    pub async fn list_versions(&self, chain: &ChainKey) -> Result<Vec<Configuration>, ConfigError> {
        self.repository.find_chain(chain).await
    }

    pub async fn compare_versions(
        &self,
        chain: &ChainKey,
        from_version: i32,
        to_version: i32,
    ) -> Result<VersionComparison, ConfigError> {
        let from = self.load_version(chain, from_version).await?;
        let to = self.load_version(chain, to_version).await?;
        Ok(VersionComparison {
            from_version,
            to_version,
            changes: from.config_value.diff(&to.config_value),
        })
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<Page<ConfigurationHistory>, ConfigError> {
        self.repository.get_history(query).await
    }

    pub async fn history_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HistoryStats, ConfigError> {
        if from > to {
            return Err(ConfigError::InvalidDateRange(format!(
                "from ({}) must not be after to ({})",
                from, to
            )));
        }
        self.repository.get_history_stats(from, to).await
    }

    async fn next_version(&self, chain: &ChainKey) -> Result<i32, ConfigError> {
        let rows = self.repository.find_chain(chain).await?;
        Ok(rows.iter().map(|r| r.version).max().unwrap_or(0) + 1)
    }

    async fn load_version(&self, chain: &ChainKey, version: i32) -> Result<Configuration, ConfigError> {
        self.repository
            .find_version(chain, version)
            .await?
            .ok_or_else(|| ConfigError::not_found(format!("version {} of {}", version, chain)))
    }
}

/// Fresh active row carrying over the non-versioned fields of `current`.
/// Approval starts over for every new version.
fn successor(current: &Configuration, actor_id: Uuid) -> Configuration {
    let now = Utc::now();
    Configuration {
        id: Uuid::new_v4(),
        is_active: true,
        created_by: actor_id,
        updated_by: None,
        approved_by: None,
        approved_at: None,
        created_at: now,
        updated_at: now,
        ..current.clone()
    }
}

/// Changes to the in-place fields, keyed by their camelCase name.
fn metadata_changes(before: &Configuration, after: &Configuration) -> BTreeMap<String, FieldChange> {
    let fields = [
        ("schema", json!(before.schema), json!(after.schema)),
        ("description", json!(before.description), json!(after.description)),
        ("isActive", json!(before.is_active), json!(after.is_active)),
        ("validFrom", json!(before.valid_from), json!(after.valid_from)),
        ("validUntil", json!(before.valid_until), json!(after.valid_until)),
        ("metadata", json!(before.metadata), json!(after.metadata)),
        ("approvedBy", json!(before.approved_by), json!(after.approved_by)),
    ];

    fields
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(name, old, new)| {
            let present = |v: serde_json::Value| (!v.is_null()).then_some(v);
            (
                name.to_string(),
                FieldChange {
                    old: present(old),
                    new: present(new),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryFilter;
    use crate::repository::InMemoryConfigurationRepository;
    use crate::value_objects::{ConfigurationCategory, ConfigurationKey, ConfigurationScope};
    use shared::pagination::PageRequest;

    fn chain() -> ChainKey {
        ChainKey::new(
            ConfigurationKey::parse("tax.vat.rate").unwrap(),
            ConfigurationScope::Company,
            Some("c1".into()),
        )
        .unwrap()
    }

    fn draft(value: serde_json::Value) -> Configuration {
        let chain = chain();
        let now = Utc::now();
        Configuration {
            id: Uuid::new_v4(),
            config_key: chain.config_key,
            scope: chain.scope,
            scope_id: chain.scope_id,
            category: ConfigurationCategory::Tax,
            config_value: ConfigurationValue::new(value).unwrap(),
            schema: None,
            version: 0,
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
        }
    }

    fn service() -> (Arc<InMemoryConfigurationRepository>, VersioningService) {
        let repo = Arc::new(InMemoryConfigurationRepository::new());
        let rules = ConfigurationRules::new(repo.clone());
        (repo.clone(), VersioningService::new(repo, rules))
    }

    fn value(raw: serde_json::Value) -> ConfigurationValue {
        ConfigurationValue::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_update_records_diff() {
        let (repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4()).with_reason(Some("rate change".into()));

        let v1 = versioning.create_initial(draft(serde_json::json!({"rate": 19})), &change).await.unwrap();
        assert_eq!(v1.version, 1);

        let v2 = versioning
            .create_new_version(&v1, value(serde_json::json!({"rate": 21})), &change)
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert!(!repo.find_by_id(v1.id).await.unwrap().unwrap().is_active);

        let page = versioning
            .history(&HistoryQuery::new(HistoryFilter::Configuration(v2.id), PageRequest::default()))
            .await
            .unwrap();
        let entry = &page.items[0];
        assert_eq!(entry.action, HistoryAction::Updated);
        assert_eq!(entry.previous_version, Some(1));
        assert_eq!(entry.change_reason.as_deref(), Some("rate change"));
        assert_eq!(
            entry.changes["rate"],
            FieldChange {
                old: Some(serde_json::json!(19)),
                new: Some(serde_json::json!(21)),
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_allocates_fresh_version() {
        let (_repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());

        let v1 = versioning.create_initial(draft(serde_json::json!({"rate": 19})), &change).await.unwrap();
        versioning
            .create_new_version(&v1, value(serde_json::json!({"rate": 21})), &change)
            .await
            .unwrap();

        let v3 = versioning.rollback(&chain(), 1, &change).await.unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.config_value.to_json(), serde_json::json!({"rate": 19}));

        let versions: Vec<(i32, bool)> = versioning
            .list_versions(&chain())
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.version, r.is_active))
            .collect();
        assert_eq!(versions, vec![(3, true), (2, false), (1, false)]);

        let page = versioning
            .history(&HistoryQuery::new(
                HistoryFilter::Action(HistoryAction::Rollback),
                PageRequest::default(),
            ))
            .await
            .unwrap();
        let entry = &page.items[0];
        assert_eq!(entry.previous_value, Some(value(serde_json::json!({"rate": 21}))));
        assert_eq!(entry.new_value, Some(value(serde_json::json!({"rate": 19}))));
    }

    #[tokio::test]
    async fn test_stale_current_conflicts() {
        let (_repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = versioning.create_initial(draft(serde_json::json!(1)), &change).await.unwrap();

        versioning.create_new_version(&v1, value(serde_json::json!(2)), &change).await.unwrap();
        let err = versioning
            .create_new_version(&v1, value(serde_json::json!(3)), &change)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_new_version_clears_approval() {
        let (_repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let mut gated = draft(serde_json::json!(1));
        gated.metadata = Some(serde_json::json!({"requiresApproval": true}));
        gated.approved_by = Some(Uuid::new_v4());
        gated.approved_at = Some(Utc::now());

        let v1 = versioning.create_initial(gated, &change).await.unwrap();
        assert!(!v1.is_pending_approval());

        let v2 = versioning.create_new_version(&v1, value(serde_json::json!(2)), &change).await.unwrap();
        assert!(v2.is_pending_approval());
        assert_eq!(v2.created_by, change.actor_id);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest_and_active() {
        let (repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let mut current = versioning.create_initial(draft(serde_json::json!(0)), &change).await.unwrap();
        for n in 1..5 {
            current = versioning
                .create_new_version(&current, value(serde_json::json!(n)), &change)
                .await
                .unwrap();
        }
        assert_eq!(repo.row_count().await, 5);

        let deleted = versioning.cleanup_old_versions(&chain(), 2, &change).await.unwrap();
        assert_eq!(deleted, 3);
        let versions: Vec<i32> = versioning
            .list_versions(&chain())
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![5, 4]);

        assert_eq!(versioning.cleanup_old_versions(&chain(), 0, &change).await.unwrap(), 1);
        assert_eq!(repo.find_active(&chain()).await.unwrap().unwrap().version, 5);

        let deletions = versioning
            .history(&HistoryQuery::new(
                HistoryFilter::Action(HistoryAction::Deleted),
                PageRequest::default(),
            ))
            .await
            .unwrap();
        assert_eq!(deletions.total, 4);
        assert!(deletions.items.iter().all(|h| h.new_version.is_none() && h.previous_version.is_some()));
    }

    #[tokio::test]
    async fn test_cleanup_deactivates_stray_active_rows() {
        let (repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = versioning.create_initial(draft(serde_json::json!(1)), &change).await.unwrap();
        let v2 = versioning.create_new_version(&v1, value(serde_json::json!(2)), &change).await.unwrap();

        // Legacy data: v1 still flagged active next to v2.
        repo.seed(Configuration {
            is_active: true,
            ..v1.clone()
        })
        .await;

        let deleted = versioning.cleanup_old_versions(&chain(), 10, &change).await.unwrap();
        assert_eq!(deleted, 0);

        let active: Vec<Uuid> = versioning
            .list_versions(&chain())
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| r.id)
            .collect();
        assert_eq!(active, vec![v2.id]);

        let page = versioning
            .history(&HistoryQuery::new(HistoryFilter::Configuration(v1.id), PageRequest::default()))
            .await
            .unwrap();
        assert_eq!(page.items[0].action, HistoryAction::Deactivated);
    }

    #[tokio::test]
    async fn test_compare_versions() {
        let (_repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = versioning
            .create_initial(draft(serde_json::json!({"rate": 19, "name": "vat"})), &change)
            .await
            .unwrap();
        versioning
            .create_new_version(&v1, value(serde_json::json!({"rate": 21, "name": "vat"})), &change)
            .await
            .unwrap();

        let comparison = versioning.compare_versions(&chain(), 1, 2).await.unwrap();
        assert_eq!(comparison.changes.len(), 1);
        assert!(comparison.changes.contains_key("rate"));
        assert!(versioning.compare_versions(&chain(), 1, 9).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metadata_change_keeps_version() {
        let (_repo, versioning) = service();
        let change = ChangeContext::new(Uuid::new_v4());
        let v1 = versioning.create_initial(draft(serde_json::json!(1)), &change).await.unwrap();

        let mut edited = v1.clone();
        edited.description = Some("Standard VAT".into());
        let saved = versioning
            .apply_metadata_change(&v1, edited, HistoryAction::Updated, &change)
            .await
            .unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.description.as_deref(), Some("Standard VAT"));

        let page = versioning
            .history(&HistoryQuery::new(HistoryFilter::Configuration(v1.id), PageRequest::default()))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let latest = &page.items[0];
        assert_eq!(latest.changes["description"].new, Some(serde_json::json!("Standard VAT")));
        assert_eq!(latest.changes["description"].old, None);
    }

    #[tokio::test]
    async fn test_history_stats_rejects_inverted_range() {
        let (_repo, versioning) = service();
        let now = Utc::now();
        let err = versioning
            .history_stats(now, now - chrono::Duration::days(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDateRange(_)));
    }
}

//! In-process repository backed by a single `RwLock`.
//!
//! Every write takes the write lock once, so a [`VersionTransition`] is applied
//! atomically with respect to all other operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::pagination::Page;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{visible_to_company, ConfigurationRepository, RepositoryResult, ScopeTarget, VersionTransition};
use crate::error::ConfigError;
use crate::models::history::{UserActivity, MOST_ACTIVE_USERS_LIMIT};
use crate::models::{
    ChainKey, Configuration, ConfigurationHistory, HistoryQuery, HistoryStats,
    NewConfigurationHistory,
};
use crate::value_objects::{ConfigurationCategory, ConfigurationKey, ConfigurationScope};

#[derive(Debug, Default)]
struct Store {
    rows: HashMap<Uuid, Configuration>,
    history: Vec<ConfigurationHistory>,
}

impl Store {
    fn chain_rows<'a>(&'a self, chain: &'a ChainKey) -> impl Iterator<Item = &'a Configuration> + 'a {
        self.rows.values().filter(move |r| {
            r.config_key == chain.config_key && r.scope == chain.scope && r.scope_id == chain.scope_id
        })
    }

    fn active_id(&self, chain: &ChainKey) -> Option<Uuid> {
        self.chain_rows(chain).find(|r| r.is_active).map(|r| r.id)
    }

    fn visible<'a>(&'a self, company_id: Option<&'a str>) -> impl Iterator<Item = &'a Configuration> + 'a {
        self.rows
            .values()
            .filter(move |r| visible_to_company(r, company_id))
    }
}

/// Repository keeping all rows in memory.
#[derive(Debug, Default)]
pub struct InMemoryConfigurationRepository {
    store: RwLock<Store>,
    simulate_failure: AtomicBool,
}

impl InMemoryConfigurationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository whose every call fails with a storage error.
    pub fn failing() -> Self {
        let repo = Self::default();
        repo.set_failing(true);
        repo
    }

    pub fn set_failing(&self, failing: bool) {
        self.simulate_failure.store(failing, Ordering::SeqCst);
    }

    /// Number of stored rows, active or not.
    pub async fn row_count(&self) -> usize {
        self.store.read().await.rows.len()
    }

    /// Stores a row as-is, bypassing every chain check.
    #[cfg(test)]
    pub(crate) async fn seed(&self, row: Configuration) {
        self.store.write().await.rows.insert(row.id, row);
    }

    fn check_available(&self) -> RepositoryResult<()> {
        if self.simulate_failure.load(Ordering::SeqCst) {
            tracing::warn!("In-memory repository simulating failure");
            return Err(ConfigError::Storage("simulated storage failure".to_string()));
        }
        Ok(())
    }

    async fn read(&self) -> RepositoryResult<RwLockReadGuard<'_, Store>> {
        self.check_available()?;
        Ok(self.store.read().await)
    }

    async fn write(&self) -> RepositoryResult<RwLockWriteGuard<'_, Store>> {
        self.check_available()?;
        Ok(self.store.write().await)
    }
}

fn sorted_by_version_desc(mut rows: Vec<Configuration>) -> Vec<Configuration> {
    rows.sort_by(|a, b| b.version.cmp(&a.version));
    rows
}

#[async_trait]
impl ConfigurationRepository for InMemoryConfigurationRepository {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Configuration>> {
        Ok(self.read().await?.rows.get(&id).cloned())
    }

    async fn find_version(
        &self,
        chain: &ChainKey,
        version: i32,
    ) -> RepositoryResult<Option<Configuration>> {
        let store = self.read().await?;
        let found = store.chain_rows(chain).find(|r| r.version == version).cloned();
        Ok(found)
    }

    async fn find_chain(&self, chain: &ChainKey) -> RepositoryResult<Vec<Configuration>> {
        let store = self.read().await?;
        let rows = store.chain_rows(chain).cloned().collect();
        Ok(sorted_by_version_desc(rows))
    }

    async fn find_active(&self, chain: &ChainKey) -> RepositoryResult<Option<Configuration>> {
        let store = self.read().await?;
        let found = store.chain_rows(chain).find(|r| r.is_active).cloned();
        Ok(found)
    }

    async fn find_active_valid_at(
        &self,
        chain: &ChainKey,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Configuration>> {
        let store = self.read().await?;
        let found = store
            .chain_rows(chain)
            .find(|r| r.is_effective_at(at))
            .cloned();
        Ok(found)
    }

    async fn find_hierarchy(
        &self,
        key: &ConfigurationKey,
        targets: &[ScopeTarget],
    ) -> RepositoryResult<Vec<Configuration>> {
        let store = self.read().await?;
        let mut rows: Vec<Configuration> = store
            .rows
            .values()
            .filter(|r| r.is_active && &r.config_key == key)
            .filter(|r| targets.iter().any(|t| t.matches(r)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scope.cmp(&a.scope).then(b.version.cmp(&a.version)));
        Ok(rows)
    }

    async fn find_by_category(
        &self,
        category: ConfigurationCategory,
        target: &ScopeTarget,
    ) -> RepositoryResult<Vec<Configuration>> {
        let store = self.read().await?;
        let mut rows: Vec<Configuration> = store
            .rows
            .values()
            .filter(|r| r.is_active && r.category == category && target.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.config_key.cmp(&b.config_key));
        Ok(rows)
    }

    async fn find_pending_approval(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>> {
        let store = self.read().await?;
        let mut rows: Vec<Configuration> = store
            .visible(company_id)
            .filter(|r| r.is_active && r.is_pending_approval())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn find_expiring_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>> {
        let store = self.read().await?;
        let mut rows: Vec<Configuration> = store
            .visible(company_id)
            .filter(|r| r.is_active)
            .filter(|r| matches!(r.valid_until, Some(end) if end >= from && end <= until))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.valid_until.cmp(&b.valid_until));
        Ok(rows)
    }

    async fn count_total(&self, company_id: Option<&str>) -> RepositoryResult<i64> {
        Ok(self.read().await?.visible(company_id).count() as i64)
    }

    async fn count_active(&self, company_id: Option<&str>) -> RepositoryResult<i64> {
        let store = self.read().await?;
        let count = store.visible(company_id).filter(|r| r.is_active).count();
        Ok(count as i64)
    }

    async fn count_by_scope(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationScope, i64>> {
        let store = self.read().await?;
        let mut counts = BTreeMap::new();
        for row in store.visible(company_id) {
            *counts.entry(row.scope).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_category(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationCategory, i64>> {
        let store = self.read().await?;
        let mut counts = BTreeMap::new();
        for row in store.visible(company_id) {
            *counts.entry(row.category).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_version(&self, transition: VersionTransition) -> RepositoryResult<Configuration> {
        let mut store = self.write().await?;
        let VersionTransition {
            expected_active,
            mut new_row,
            history,
        } = transition;
        let chain = new_row.chain();

        let active_id = store.active_id(&chain);
        if active_id != expected_active {
            tracing::warn!(
                chain = %chain,
                expected = ?expected_active,
                actual = ?active_id,
                "Active version changed concurrently"
            );
            return Err(ConfigError::Conflict(format!(
                "active version of {} changed concurrently",
                chain
            )));
        }
        if store.chain_rows(&chain).any(|r| r.version == new_row.version) {
            return Err(ConfigError::Conflict(format!(
                "version {} of {} already exists",
                new_row.version, chain
            )));
        }
        if store.rows.contains_key(&new_row.id) {
            return Err(ConfigError::Conflict(format!(
                "configuration {} already exists",
                new_row.id
            )));
        }

        let now = Utc::now();
        if let Some(previous) = active_id.and_then(|id| store.rows.get_mut(&id)) {
            previous.is_active = false;
            previous.updated_by = Some(new_row.created_by);
            previous.updated_at = now;
        }

        new_row.is_active = true;
        store.rows.insert(new_row.id, new_row.clone());
        store.history.push(history.into_history(Uuid::new_v4(), now));

        Ok(new_row)
    }

    async fn update_metadata(
        &self,
        row: &Configuration,
        history: Option<NewConfigurationHistory>,
    ) -> RepositoryResult<Configuration> {
        let mut store = self.write().await?;

        if row.is_active {
            let chain = row.chain();
            if let Some(active) = store.active_id(&chain).filter(|id| *id != row.id) {
                return Err(ConfigError::Conflict(format!(
                    "{} already has active version {}",
                    chain, active
                )));
            }
        }

        let now = Utc::now();
        let updated = {
            let existing = store
                .rows
                .get_mut(&row.id)
                .ok_or_else(|| ConfigError::not_found(format!("configuration {}", row.id)))?;
            existing.schema = row.schema.clone();
            existing.description = row.description.clone();
            existing.is_active = row.is_active;
            existing.valid_from = row.valid_from;
            existing.valid_until = row.valid_until;
            existing.metadata = row.metadata.clone();
            existing.updated_by = row.updated_by;
            existing.approved_by = row.approved_by;
            existing.approved_at = row.approved_at;
            existing.updated_at = now;
            existing.clone()
        };

        if let Some(entry) = history {
            store.history.push(entry.into_history(Uuid::new_v4(), now));
        }
        Ok(updated)
    }

    async fn deactivate_old_versions(&self, chain: &ChainKey, keep_id: Uuid) -> RepositoryResult<u64> {
        let mut store = self.write().await?;
        let ids: Vec<Uuid> = store
            .chain_rows(chain)
            .filter(|r| r.is_active && r.id != keep_id)
            .map(|r| r.id)
            .collect();

        let now = Utc::now();
        for id in &ids {
            if let Some(row) = store.rows.get_mut(id) {
                row.is_active = false;
                row.updated_at = now;
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete_versions(&self, ids: &[Uuid]) -> RepositoryResult<u64> {
        let mut store = self.write().await?;
        let mut deleted = 0;
        for id in ids {
            if store.rows.get(id).is_some_and(|r| !r.is_active) {
                store.rows.remove(id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn create_history(
        &self,
        entry: NewConfigurationHistory,
    ) -> RepositoryResult<ConfigurationHistory> {
        let mut store = self.write().await?;
        let history = entry.into_history(Uuid::new_v4(), Utc::now());
        store.history.push(history.clone());
        Ok(history)
    }

    async fn get_history(&self, query: &HistoryQuery) -> RepositoryResult<Page<ConfigurationHistory>> {
        let store = self.read().await?;
        let mut matching: Vec<&ConfigurationHistory> = store
            .history
            .iter()
            .rev()
            .filter(|h| query.filter.matches(h))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(query.page.offset() as usize)
            .take(query.page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, query.page))
    }

    async fn get_history_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<HistoryStats> {
        let store = self.read().await?;
        let mut by_action = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut by_user: HashMap<Uuid, i64> = HashMap::new();
        let mut total = 0;

        for entry in store
            .history
            .iter()
            .filter(|h| h.created_at >= from && h.created_at <= to)
        {
            total += 1;
            *by_action.entry(entry.action).or_insert(0) += 1;
            *by_category.entry(entry.category).or_insert(0) += 1;
            *by_user.entry(entry.changed_by).or_insert(0) += 1;
        }

        let mut most_active_users: Vec<UserActivity> = by_user
            .into_iter()
            .map(|(user_id, changes)| UserActivity { user_id, changes })
            .collect();
        most_active_users.sort_by(|a, b| b.changes.cmp(&a.changes).then(a.user_id.cmp(&b.user_id)));
        most_active_users.truncate(MOST_ACTIVE_USERS_LIMIT);

        Ok(HistoryStats {
            total_changes: total,
            by_action,
            by_category,
            most_active_users,
            from,
            to,
        })
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.check_available()
    }
}

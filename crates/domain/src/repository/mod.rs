//! Storage abstraction for configuration rows and their history.
//!
//! Services only talk to [`ConfigurationRepository`]. The Postgres
//! implementation lives in the persistence crate; [`memory`] holds an
//! in-process implementation used by tests and local tooling.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::pagination::Page;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::{
    ChainKey, Configuration, ConfigurationHistory, HistoryQuery, HistoryStats,
    NewConfigurationHistory,
};
use crate::value_objects::{ConfigurationCategory, ConfigurationKey, ConfigurationScope};

pub use memory::InMemoryConfigurationRepository;

pub type RepositoryResult<T> = Result<T, ConfigError>;

/// A scope level paired with its owner id (`None` for system).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeTarget {
    pub scope: ConfigurationScope,
    pub scope_id: Option<String>,
}

impl ScopeTarget {
    pub fn system() -> Self {
        Self {
            scope: ConfigurationScope::System,
            scope_id: None,
        }
    }

    pub fn new(scope: ConfigurationScope, scope_id: impl Into<String>) -> Self {
        Self {
            scope,
            scope_id: Some(scope_id.into()),
        }
    }

    pub fn matches(&self, row: &Configuration) -> bool {
        row.scope == self.scope && row.scope_id == self.scope_id
    }
}

/// Atomic version transition for one chain.
///
/// Applied as a single unit: the chain's active row must still be
/// `expected_active` (compare-and-swap), it is deactivated, `new_row` is
/// inserted as the active row and `history` is appended. A mismatch fails
/// with [`ConfigError::Conflict`] and nothing is written.
#[derive(Debug, Clone)]
pub struct VersionTransition {
    pub expected_active: Option<Uuid>,
    pub new_row: Configuration,
    pub history: NewConfigurationHistory,
}

/// Restricts aggregate queries to the rows visible to one company: system rows
/// plus company rows owned by it.
pub fn visible_to_company(row: &Configuration, company_id: Option<&str>) -> bool {
    match company_id {
        None => true,
        Some(company) => match row.scope {
            ConfigurationScope::System => true,
            ConfigurationScope::Company => row.scope_id.as_deref() == Some(company),
            ConfigurationScope::Branch | ConfigurationScope::User => false,
        },
    }
}

#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Configuration>>;

    async fn find_version(
        &self,
        chain: &ChainKey,
        version: i32,
    ) -> RepositoryResult<Option<Configuration>>;

    /// Every row of the chain, newest version first.
    async fn find_chain(&self, chain: &ChainKey) -> RepositoryResult<Vec<Configuration>>;

    async fn find_active(&self, chain: &ChainKey) -> RepositoryResult<Option<Configuration>>;

    async fn find_active_valid_at(
        &self,
        chain: &ChainKey,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Configuration>>;

    /// Active rows for `key` at any of the given scope targets.
    async fn find_hierarchy(
        &self,
        key: &ConfigurationKey,
        targets: &[ScopeTarget],
    ) -> RepositoryResult<Vec<Configuration>>;

    /// Active rows of a category at one scope target.
    async fn find_by_category(
        &self,
        category: ConfigurationCategory,
        target: &ScopeTarget,
    ) -> RepositoryResult<Vec<Configuration>>;

    /// Active rows flagged for approval that nobody approved yet.
    async fn find_pending_approval(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>>;

    /// Active rows whose `valid_until` falls inside `[from, until]`.
    async fn find_expiring_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>>;

    async fn count_total(&self, company_id: Option<&str>) -> RepositoryResult<i64>;

    async fn count_active(&self, company_id: Option<&str>) -> RepositoryResult<i64>;

    async fn count_by_scope(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationScope, i64>>;

    async fn count_by_category(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationCategory, i64>>;

    /// Applies a [`VersionTransition`] atomically and returns the inserted row.
    async fn insert_version(&self, transition: VersionTransition) -> RepositoryResult<Configuration>;

    /// Rewrites the non-versioned fields of an existing row, optionally
    /// appending a history entry in the same unit of work.
    async fn update_metadata(
        &self,
        row: &Configuration,
        history: Option<NewConfigurationHistory>,
    ) -> RepositoryResult<Configuration>;

    /// Deactivates every active row of the chain except `keep_id`.
    async fn deactivate_old_versions(&self, chain: &ChainKey, keep_id: Uuid) -> RepositoryResult<u64>;

    /// Physically deletes the given rows. Active rows are never deleted.
    async fn delete_versions(&self, ids: &[Uuid]) -> RepositoryResult<u64>;

    async fn create_history(
        &self,
        entry: NewConfigurationHistory,
    ) -> RepositoryResult<ConfigurationHistory>;

    /// Newest first.
    async fn get_history(&self, query: &HistoryQuery) -> RepositoryResult<Page<ConfigurationHistory>>;

    async fn get_history_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<HistoryStats>;

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

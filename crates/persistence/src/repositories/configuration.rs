//! Postgres-backed configuration repository.
//!
//! Version transitions run in a single transaction guarded by a per-chain
//! advisory lock plus `SELECT ... FOR UPDATE` on the active row. The partial
//! unique index on active rows is the last line: a unique violation surfaces
//! as [`ConfigError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    ChainKey, Configuration, ConfigurationHistory, HistoryFilter, HistoryQuery, HistoryStats,
    NewConfigurationHistory, UserActivity, MOST_ACTIVE_USERS_LIMIT,
};
use domain::repository::{ConfigurationRepository, RepositoryResult, ScopeTarget, VersionTransition};
use domain::value_objects::{ConfigurationCategory, ConfigurationKey, ConfigurationScope};
use domain::ConfigError;
use shared::pagination::Page;
use sqlx::{PgPool, Postgres};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::{
    CategoryDb, ConfigurationEntity, ConfigurationHistoryEntity, HistoryActionDb, ScopeDb,
};
use crate::metrics::{record_pool_metrics, record_version_conflict, QueryTimer};

const CONFIGURATION_COLUMNS: &str = "id, config_key, scope, scope_id, category, config_value, \
    schema, version, is_active, valid_from, valid_until, description, metadata, created_by, \
    updated_by, approved_by, approved_at, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, configuration_id, action, previous_version, new_version, \
    config_key, scope, scope_id, category, previous_value, new_value, changes, changed_by, \
    change_reason, request_metadata, created_at";

/// Rows of one chain: `$1` key, `$2` scope, `$3` scope id.
const CHAIN_PREDICATE: &str = "config_key = $1 AND scope = $2 AND scope_id IS NOT DISTINCT FROM $3";

/// System rows plus rows of company `$1`; everything when `$1` is NULL.
const COMPANY_VISIBILITY: &str = "($1::text IS NULL OR scope = 'system' \
    OR (scope = 'company' AND scope_id = $1))";

const UNIQUE_VIOLATION: &str = "23505";

/// Maps sqlx errors onto the domain error model.
pub(crate) fn map_db_error(err: sqlx::Error) -> ConfigError {
    match &err {
        sqlx::Error::RowNotFound => ConfigError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            tracing::warn!(constraint = ?db.constraint(), "Unique constraint violated");
            ConfigError::Conflict(db.message().to_string())
        }
        _ => {
            tracing::error!(error = %err, "Database error");
            ConfigError::Storage(err.to_string())
        }
    }
}

fn into_rows(entities: Vec<ConfigurationEntity>) -> RepositoryResult<Vec<Configuration>> {
    entities
        .into_iter()
        .map(|e| Configuration::try_from(e).map_err(ConfigError::from))
        .collect()
}

fn into_row(entity: Option<ConfigurationEntity>) -> RepositoryResult<Option<Configuration>> {
    entity
        .map(|e| Configuration::try_from(e).map_err(ConfigError::from))
        .transpose()
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> RepositoryResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| ConfigError::Storage(format!("failed to encode {}: {}", what, e)))
}

/// Appends a history row through any Postgres executor (pool or transaction).
async fn insert_history<'e, E>(
    executor: E,
    entry: &NewConfigurationHistory,
) -> RepositoryResult<ConfigurationHistoryEntity>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let changes = to_json(&entry.changes, "history changes")?;
    let request_metadata = to_json(&entry.request_metadata, "request metadata")?;
    sqlx::query_as::<_, ConfigurationHistoryEntity>(
        r#"
        INSERT INTO configuration_history (
            configuration_id, action, previous_version, new_version, config_key, scope,
            scope_id, category, previous_value, new_value, changes, changed_by,
            change_reason, request_metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id, configuration_id, action, previous_version, new_version, config_key,
                  scope, scope_id, category, previous_value, new_value, changes, changed_by,
                  change_reason, request_metadata, created_at
        "#,
    )
    .bind(entry.configuration_id)
    .bind(HistoryActionDb::from(entry.action))
    .bind(entry.previous_version)
    .bind(entry.new_version)
    .bind(entry.config_key.as_str())
    .bind(ScopeDb::from(entry.scope))
    .bind(entry.scope_id.as_deref())
    .bind(CategoryDb::from(entry.category))
    .bind(entry.previous_value.as_ref().map(|v| v.to_json()))
    .bind(entry.new_value.as_ref().map(|v| v.to_json()))
    .bind(changes)
    .bind(entry.changed_by)
    .bind(entry.change_reason.as_deref())
    .bind(request_metadata)
    .fetch_one(executor)
    .await
    .map_err(map_db_error)
}

/// WHERE clause for one history filter plus the number of parameters it binds.
struct HistoryFilterClause {
    condition: &'static str,
    param_count: usize,
}

impl HistoryFilterClause {
    fn build(filter: &HistoryFilter) -> Self {
        let (condition, param_count) = match filter {
            HistoryFilter::Configuration(_) => ("configuration_id = $1", 1),
            HistoryFilter::Key(_) => ("config_key = $1", 1),
            HistoryFilter::User(_) => ("changed_by = $1", 1),
            HistoryFilter::DateRange { .. } => ("created_at >= $1 AND created_at <= $2", 2),
            HistoryFilter::Action(_) => ("action = $1", 1),
        };
        Self {
            condition,
            param_count,
        }
    }

    fn where_clause(&self) -> &'static str {
        self.condition
    }

    /// Position of the next free bind parameter.
    fn next_param(&self) -> usize {
        self.param_count + 1
    }
}

/// Binds the parameters of a history filter to a sqlx query builder.
macro_rules! bind_history_filter {
    ($builder:expr, $filter:expr) => {{
        let b = $builder;
        match $filter {
            HistoryFilter::Configuration(id) => b.bind(*id),
            HistoryFilter::Key(key) => b.bind(key.as_str().to_string()),
            HistoryFilter::User(user) => b.bind(*user),
            HistoryFilter::DateRange { from, to } => b.bind(*from).bind(*to),
            HistoryFilter::Action(action) => b.bind(HistoryActionDb::from(*action)),
        }
    }};
}

/// Repository for configuration rows and their audit history.
#[derive(Clone)]
pub struct PgConfigurationRepository {
    pool: PgPool,
}

impl PgConfigurationRepository {
    /// Creates a new PgConfigurationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(
        &self,
        timer: QueryTimer,
        query: sqlx::query::QueryAs<'_, Postgres, ConfigurationEntity, sqlx::postgres::PgArguments>,
    ) -> RepositoryResult<Vec<Configuration>> {
        let result = query.fetch_all(&self.pool).await;
        timer.record();
        into_rows(result.map_err(map_db_error)?)
    }

    async fn fetch_row(
        &self,
        timer: QueryTimer,
        query: sqlx::query::QueryAs<'_, Postgres, ConfigurationEntity, sqlx::postgres::PgArguments>,
    ) -> RepositoryResult<Option<Configuration>> {
        let result = query.fetch_optional(&self.pool).await;
        timer.record();
        into_row(result.map_err(map_db_error)?)
    }

    async fn apply_transition(&self, transition: VersionTransition) -> RepositoryResult<Configuration> {
        let VersionTransition {
            expected_active,
            new_row,
            history,
        } = transition;
        let chain = new_row.chain();
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // Serializes writers of one chain, including the first insert where
        // there is no active row to lock yet.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(chain.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let active_id: Option<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM configurations WHERE {CHAIN_PREDICATE} AND is_active FOR UPDATE"
        ))
        .bind(chain.config_key.as_str())
        .bind(ScopeDb::from(chain.scope))
        .bind(chain.scope_id.as_deref())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;

        if active_id != expected_active {
            record_version_conflict("insert_configuration_version");
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

        if let Some(previous) = active_id {
            sqlx::query(
                r#"
                UPDATE configurations
                SET is_active = false, updated_by = $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(previous)
            .bind(new_row.created_by)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        let sql = format!(
            r#"
            INSERT INTO configurations (
                id, config_key, scope, scope_id, category, config_value, schema, version,
                is_active, valid_from, valid_until, description, metadata, created_by,
                updated_by, approved_by, approved_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {CONFIGURATION_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(new_row.id)
            .bind(new_row.config_key.as_str())
            .bind(ScopeDb::from(new_row.scope))
            .bind(new_row.scope_id.as_deref())
            .bind(CategoryDb::from(new_row.category))
            .bind(new_row.config_value.to_json())
            .bind(new_row.schema.as_ref())
            .bind(new_row.version)
            .bind(new_row.valid_from)
            .bind(new_row.valid_until)
            .bind(new_row.description.as_deref())
            .bind(new_row.metadata.as_ref())
            .bind(new_row.created_by)
            .bind(new_row.updated_by)
            .bind(new_row.approved_by)
            .bind(new_row.approved_at)
            .bind(new_row.created_at)
            .bind(new_row.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

        insert_history(&mut *tx, &history).await?;
        tx.commit().await.map_err(map_db_error)?;

        Ok(Configuration::try_from(inserted)?)
    }

    async fn apply_metadata(
        &self,
        row: &Configuration,
        history: Option<NewConfigurationHistory>,
    ) -> RepositoryResult<Configuration> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        if row.is_active {
            let chain = row.chain();
            let other: Option<Uuid> = sqlx::query_scalar(&format!(
                "SELECT id FROM configurations WHERE {CHAIN_PREDICATE} AND is_active AND id <> $4 FOR UPDATE"
            ))
            .bind(chain.config_key.as_str())
            .bind(ScopeDb::from(chain.scope))
            .bind(chain.scope_id.as_deref())
            .bind(row.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;

            if let Some(active) = other {
                return Err(ConfigError::Conflict(format!(
                    "{} already has active version {}",
                    chain, active
                )));
            }
        }

        let sql = format!(
            r#"
            UPDATE configurations
            SET schema = $2, description = $3, is_active = $4, valid_from = $5,
                valid_until = $6, metadata = $7, updated_by = $8, approved_by = $9,
                approved_at = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {CONFIGURATION_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(row.id)
            .bind(row.schema.as_ref())
            .bind(row.description.as_deref())
            .bind(row.is_active)
            .bind(row.valid_from)
            .bind(row.valid_until)
            .bind(row.metadata.as_ref())
            .bind(row.updated_by)
            .bind(row.approved_by)
            .bind(row.approved_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| ConfigError::not_found(format!("configuration {}", row.id)))?;

        if let Some(entry) = history {
            insert_history(&mut *tx, &entry).await?;
        }
        tx.commit().await.map_err(map_db_error)?;

        Ok(Configuration::try_from(updated)?)
    }
}

#[async_trait]
impl ConfigurationRepository for PgConfigurationRepository {
    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Configuration>> {
        let sql = format!("SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE id = $1");
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql).bind(id);
        self.fetch_row(QueryTimer::new("find_configuration_by_id"), query).await
    }

    async fn find_version(
        &self,
        chain: &ChainKey,
        version: i32,
    ) -> RepositoryResult<Option<Configuration>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE {CHAIN_PREDICATE} AND version = $4"
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(chain.config_key.as_str())
            .bind(ScopeDb::from(chain.scope))
            .bind(chain.scope_id.as_deref())
            .bind(version);
        self.fetch_row(QueryTimer::new("find_configuration_version"), query).await
    }

    async fn find_chain(&self, chain: &ChainKey) -> RepositoryResult<Vec<Configuration>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE {CHAIN_PREDICATE} ORDER BY version DESC"
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(chain.config_key.as_str())
            .bind(ScopeDb::from(chain.scope))
            .bind(chain.scope_id.as_deref());
        self.fetch_rows(QueryTimer::new("find_configuration_chain"), query).await
    }

    async fn find_active(&self, chain: &ChainKey) -> RepositoryResult<Option<Configuration>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE {CHAIN_PREDICATE} AND is_active"
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(chain.config_key.as_str())
            .bind(ScopeDb::from(chain.scope))
            .bind(chain.scope_id.as_deref());
        self.fetch_row(QueryTimer::new("find_active_configuration"), query).await
    }

    async fn find_active_valid_at(
        &self,
        chain: &ChainKey,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Configuration>> {
        let sql = format!(
            r#"
            SELECT {CONFIGURATION_COLUMNS}
            FROM configurations
            WHERE {CHAIN_PREDICATE} AND is_active
              AND (valid_from IS NULL OR valid_from <= $4)
              AND (valid_until IS NULL OR valid_until >= $4)
            "#
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(chain.config_key.as_str())
            .bind(ScopeDb::from(chain.scope))
            .bind(chain.scope_id.as_deref())
            .bind(at);
        self.fetch_row(QueryTimer::new("find_active_configuration_valid_at"), query)
            .await
    }

    async fn find_hierarchy(
        &self,
        key: &ConfigurationKey,
        targets: &[ScopeTarget],
    ) -> RepositoryResult<Vec<Configuration>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let scopes: Vec<String> = targets.iter().map(|t| t.scope.as_str().to_string()).collect();
        let scope_ids: Vec<String> = targets
            .iter()
            .map(|t| t.scope_id.clone().unwrap_or_default())
            .collect();

        let sql = format!(
            r#"
            SELECT {CONFIGURATION_COLUMNS}
            FROM configurations
            WHERE config_key = $1 AND is_active
              AND (scope::text, COALESCE(scope_id, '')) IN (
                  SELECT * FROM UNNEST($2::text[], $3::text[])
              )
            ORDER BY scope DESC, version DESC
            "#
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(key.as_str())
            .bind(scopes)
            .bind(scope_ids);
        self.fetch_rows(QueryTimer::new("find_configuration_hierarchy"), query).await
    }

    async fn find_by_category(
        &self,
        category: ConfigurationCategory,
        target: &ScopeTarget,
    ) -> RepositoryResult<Vec<Configuration>> {
        let sql = format!(
            r#"
            SELECT {CONFIGURATION_COLUMNS}
            FROM configurations
            WHERE category = $1 AND scope = $2 AND scope_id IS NOT DISTINCT FROM $3 AND is_active
            ORDER BY config_key
            "#
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(CategoryDb::from(category))
            .bind(ScopeDb::from(target.scope))
            .bind(target.scope_id.as_deref());
        self.fetch_rows(QueryTimer::new("find_configurations_by_category"), query)
            .await
    }

    async fn find_pending_approval(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>> {
        let sql = format!(
            r#"
            SELECT {CONFIGURATION_COLUMNS}
            FROM configurations
            WHERE {COMPANY_VISIBILITY} AND is_active AND approved_by IS NULL
              AND metadata -> 'requiresApproval' = 'true'::jsonb
            ORDER BY created_at
            "#
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql).bind(company_id);
        self.fetch_rows(QueryTimer::new("find_pending_approval_configurations"), query)
            .await
    }

    async fn find_expiring_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        company_id: Option<&str>,
    ) -> RepositoryResult<Vec<Configuration>> {
        let sql = format!(
            r#"
            SELECT {CONFIGURATION_COLUMNS}
            FROM configurations
            WHERE {COMPANY_VISIBILITY} AND is_active
              AND valid_until IS NOT NULL AND valid_until >= $2 AND valid_until <= $3
            ORDER BY valid_until
            "#
        );
        let query = sqlx::query_as::<_, ConfigurationEntity>(&sql)
            .bind(company_id)
            .bind(from)
            .bind(until);
        self.fetch_rows(QueryTimer::new("find_expiring_configurations"), query)
            .await
    }

    async fn count_total(&self, company_id: Option<&str>) -> RepositoryResult<i64> {
        let timer = QueryTimer::new("count_configurations");
        let result = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM configurations WHERE {COMPANY_VISIBILITY}"
        ))
        .bind(company_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result.map_err(map_db_error)
    }

    async fn count_active(&self, company_id: Option<&str>) -> RepositoryResult<i64> {
        let timer = QueryTimer::new("count_active_configurations");
        let result = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM configurations WHERE {COMPANY_VISIBILITY} AND is_active"
        ))
        .bind(company_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result.map_err(map_db_error)
    }

    async fn count_by_scope(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationScope, i64>> {
        let timer = QueryTimer::new("count_configurations_by_scope");
        let result = sqlx::query_as::<_, (ScopeDb, i64)>(&format!(
            "SELECT scope, COUNT(*) FROM configurations WHERE {COMPANY_VISIBILITY} GROUP BY scope"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result
            .map_err(map_db_error)?
            .into_iter()
            .map(|(scope, count)| (scope.into(), count))
            .collect())
    }

    async fn count_by_category(
        &self,
        company_id: Option<&str>,
    ) -> RepositoryResult<BTreeMap<ConfigurationCategory, i64>> {
        let timer = QueryTimer::new("count_configurations_by_category");
        let result = sqlx::query_as::<_, (CategoryDb, i64)>(&format!(
            "SELECT category, COUNT(*) FROM configurations WHERE {COMPANY_VISIBILITY} GROUP BY category"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(result
            .map_err(map_db_error)?
            .into_iter()
            .map(|(category, count)| (category.into(), count))
            .collect())
    }

    async fn insert_version(&self, transition: VersionTransition) -> RepositoryResult<Configuration> {
        let timer = QueryTimer::new("insert_configuration_version");
        let result = self.apply_transition(transition).await;
        timer.record();
        result
    }

    async fn update_metadata(
        &self,
        row: &Configuration,
        history: Option<NewConfigurationHistory>,
    ) -> RepositoryResult<Configuration> {
        let timer = QueryTimer::new("update_configuration_metadata");
        let result = self.apply_metadata(row, history).await;
        timer.record();
        result
    }

    async fn deactivate_old_versions(&self, chain: &ChainKey, keep_id: Uuid) -> RepositoryResult<u64> {
        let timer = QueryTimer::new("deactivate_old_configuration_versions");
        let result = sqlx::query(&format!(
            r#"
            UPDATE configurations
            SET is_active = false, updated_at = NOW()
            WHERE {CHAIN_PREDICATE} AND is_active AND id <> $4
            "#
        ))
        .bind(chain.config_key.as_str())
        .bind(ScopeDb::from(chain.scope))
        .bind(chain.scope_id.as_deref())
        .bind(keep_id)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result.map_err(map_db_error)?.rows_affected())
    }

    async fn delete_versions(&self, ids: &[Uuid]) -> RepositoryResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let timer = QueryTimer::new("delete_configuration_versions");
        let result = sqlx::query("DELETE FROM configurations WHERE id = ANY($1) AND NOT is_active")
            .bind(ids)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result.map_err(map_db_error)?.rows_affected())
    }

    async fn create_history(
        &self,
        entry: NewConfigurationHistory,
    ) -> RepositoryResult<ConfigurationHistory> {
        let timer = QueryTimer::new("create_configuration_history");
        let result = insert_history(&self.pool, &entry).await;
        timer.record();
        Ok(ConfigurationHistory::try_from(result?)?)
    }

    async fn get_history(&self, query: &HistoryQuery) -> RepositoryResult<Page<ConfigurationHistory>> {
        let timer = QueryTimer::new("get_configuration_history");

        let clause = HistoryFilterClause::build(&query.filter);

        let count_sql = format!(
            "SELECT COUNT(*) FROM configuration_history WHERE {}",
            clause.where_clause()
        );
        let total: i64 = bind_history_filter!(sqlx::query_scalar::<_, i64>(&count_sql), &query.filter)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;

        let limit_param = clause.next_param();
        let select_sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM configuration_history WHERE {} \
             ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            clause.where_clause(),
            limit_param,
            limit_param + 1
        );
        let rows = bind_history_filter!(
            sqlx::query_as::<_, ConfigurationHistoryEntity>(&select_sql),
            &query.filter
        )
        .bind(query.page.limit())
        .bind(query.page.offset())
        .fetch_all(&self.pool)
        .await;
        timer.record();

        let items = rows
            .map_err(map_db_error)?
            .into_iter()
            .map(|e| ConfigurationHistory::try_from(e).map_err(ConfigError::from))
            .collect::<RepositoryResult<Vec<_>>>()?;
        Ok(Page::new(items, total, query.page))
    }

    async fn get_history_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<HistoryStats> {
        let timer = QueryTimer::new("get_configuration_history_stats");

        let actions = sqlx::query_as::<_, (HistoryActionDb, i64)>(
            r#"
            SELECT action, COUNT(*)
            FROM configuration_history
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY action
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let categories = sqlx::query_as::<_, (CategoryDb, i64)>(
            r#"
            SELECT category, COUNT(*)
            FROM configuration_history
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY category
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let users = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT changed_by, COUNT(*) AS changes
            FROM configuration_history
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY changed_by
            ORDER BY changes DESC, changed_by
            LIMIT $3
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(MOST_ACTIVE_USERS_LIMIT as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        timer.record();

        let by_action: BTreeMap<_, i64> = actions
            .into_iter()
            .map(|(action, count)| (action.into(), count))
            .collect();
        Ok(HistoryStats {
            total_changes: by_action.values().sum(),
            by_action,
            by_category: categories
                .into_iter()
                .map(|(category, count)| (category.into(), count))
                .collect(),
            most_active_users: users
                .into_iter()
                .map(|(user_id, changes)| UserActivity { user_id, changes })
                .collect(),
            from,
            to,
        })
    }

    async fn ping(&self) -> RepositoryResult<()> {
        let timer = QueryTimer::new("ping");
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        timer.record();
        record_pool_metrics(&self.pool);
        result.map(|_| ()).map_err(map_db_error)
    }
}

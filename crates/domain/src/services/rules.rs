//! Business rules guarding configuration changes.
//!
//! Every check returns a typed [`ConfigError`] rather than a boolean so callers
//! can propagate the reason with `?`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::configuration::validate_scope_pair;
use crate::models::{ChainKey, Configuration, ConfigurationMetrics};
use crate::repository::ConfigurationRepository;
use crate::value_objects::{ConfigurationCategory, ConfigurationScope};

/// Default look-ahead window for "expiring soon" metrics.
pub const DEFAULT_EXPIRING_SOON_DAYS: i64 = 30;

/// Decides whether a user holds an approver role. Roles are managed outside
/// the configuration engine.
#[async_trait]
pub trait ApprovalAuthorizer: Send + Sync {
    async fn can_approve(
        &self,
        approver_id: Uuid,
        configuration: &Configuration,
    ) -> Result<bool, ConfigError>;
}

/// Authorizer that accepts every approver.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllApprovers;

#[async_trait]
impl ApprovalAuthorizer for AllowAllApprovers {
    async fn can_approve(&self, _approver_id: Uuid, _configuration: &Configuration) -> Result<bool, ConfigError> {
        Ok(true)
    }
}

#[derive(Clone)]
pub struct ConfigurationRules {
    repository: Arc<dyn ConfigurationRepository>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    expiring_soon_days: i64,
}

impl ConfigurationRules {
    pub fn new(repository: Arc<dyn ConfigurationRepository>) -> Self {
        Self {
            repository,
            authorizer: Arc::new(AllowAllApprovers),
            expiring_soon_days: DEFAULT_EXPIRING_SOON_DAYS,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn ApprovalAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_expiring_soon_days(mut self, days: i64) -> Self {
        self.expiring_soon_days = days.max(0);
        self
    }

    pub fn validate_scope_consistency(
        &self,
        scope: ConfigurationScope,
        scope_id: Option<&str>,
    ) -> Result<(), ConfigError> {
        validate_scope_pair(scope, scope_id)
    }

    /// A chain may only be created while it has no active row.
    pub async fn ensure_can_create(&self, chain: &ChainKey) -> Result<(), ConfigError> {
        self.validate_scope_consistency(chain.scope, chain.scope_id.as_deref())?;

        if let Some(active) = self.repository.find_active(chain).await? {
            tracing::warn!(chain = %chain, active_id = %active.id, "Rejected duplicate configuration");
            return Err(ConfigError::Conflict(format!(
                "{} already has an active version ({})",
                chain, active.version
            )));
        }
        Ok(())
    }

    /// Tax, accounting and workflow settings at system or company level need
    /// a second pair of eyes.
    pub fn requires_approval(category: ConfigurationCategory, scope: ConfigurationScope) -> bool {
        matches!(
            category,
            ConfigurationCategory::Tax
                | ConfigurationCategory::Accounting
                | ConfigurationCategory::Workflow
        ) && matches!(scope, ConfigurationScope::System | ConfigurationScope::Company)
    }

    /// Rows awaiting approval may only be edited by their creator.
    pub async fn ensure_can_update(&self, id: Uuid, user_id: Uuid) -> Result<Configuration, ConfigError> {
        let row = self.load(id).await?;
        if row.is_pending_approval() && row.created_by != user_id {
            tracing::warn!(
                configuration_id = %id,
                user_id = %user_id,
                "Rejected edit of configuration pending approval"
            );
            return Err(ConfigError::Forbidden(
                "configuration is pending approval and can only be edited by its creator"
                    .to_string(),
            ));
        }
        Ok(row)
    }

    /// Loads the row by id and checks that `target_version` can be restored.
    pub async fn can_rollback(&self, id: Uuid, target_version: i32) -> Result<Configuration, ConfigError> {
        let current = self.load(id).await?;
        self.ensure_can_rollback(&current, target_version).await
    }

    /// Returns the target row when `0 < target_version < current.version` and
    /// the version exists in the chain.
    pub async fn ensure_can_rollback(
        &self,
        current: &Configuration,
        target_version: i32,
    ) -> Result<Configuration, ConfigError> {
        if target_version <= 0 || target_version >= current.version {
            tracing::warn!(
                configuration_id = %current.id,
                current_version = current.version,
                target_version,
                "Rejected rollback"
            );
            return Err(ConfigError::RollbackIneligible(format!(
                "target version {} must be between 1 and {}",
                target_version,
                current.version - 1
            )));
        }

        self.repository
            .find_version(&current.chain(), target_version)
            .await?
            .ok_or_else(|| {
                ConfigError::RollbackIneligible(format!(
                    "version {} of {} no longer exists",
                    target_version,
                    current.chain()
                ))
            })
    }

    pub fn validate_validity_range(
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ConfigError> {
        match (from, until) {
            (Some(from), Some(until)) if from >= until => Err(ConfigError::InvalidDateRange(
                format!("validFrom ({}) must be before validUntil ({})", from, until),
            )),
            _ => Ok(()),
        }
    }

    /// Checks the candidate window against the chain's current row.
    pub async fn validate_no_validity_conflicts(
        &self,
        chain: &ChainKey,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ConfigError> {
        if from.is_none() && until.is_none() {
            return Ok(());
        }

        let current = self
            .repository
            .find_active(chain)
            .await?
            .filter(|row| Some(row.id) != exclude_id);
        let Some(current) = current else {
            return Ok(());
        };

        if !current.has_validity_range() {
            return Err(ConfigError::Conflict(format!(
                "{} already has an unbounded active version",
                chain
            )));
        }

        if windows_overlap((from, until), (current.valid_from, current.valid_until)) {
            return Err(ConfigError::Conflict(format!(
                "validity window overlaps version {} of {}",
                current.version, chain
            )));
        }
        Ok(())
    }

    pub async fn ensure_can_approve(&self, id: Uuid, approver_id: Uuid) -> Result<Configuration, ConfigError> {
        let row = self.load(id).await?;

        if !row.requires_approval() {
            return Err(ConfigError::Conflict(format!(
                "configuration {} does not require approval",
                id
            )));
        }
        if row.approved_by.is_some() {
            return Err(ConfigError::Conflict(format!(
                "configuration {} is already approved",
                id
            )));
        }
        if row.created_by == approver_id {
            tracing::warn!(configuration_id = %id, approver_id = %approver_id, "Rejected self-approval");
            return Err(ConfigError::Forbidden(
                "a configuration cannot be approved by its creator".to_string(),
            ));
        }
        if !self.authorizer.can_approve(approver_id, &row).await? {
            return Err(ConfigError::Forbidden(format!(
                "user {} is not allowed to approve configurations",
                approver_id
            )));
        }
        Ok(row)
    }

    /// Counts for dashboards, optionally narrowed to one company.
    pub async fn calculate_metrics(&self, company_id: Option<&str>) -> Result<ConfigurationMetrics, ConfigError> {
        let now = Utc::now();
        let horizon = now + Duration::days(self.expiring_soon_days);

        let mut by_scope: BTreeMap<ConfigurationScope, i64> =
            ConfigurationScope::ALL.iter().map(|s| (*s, 0)).collect();
        by_scope.extend(self.repository.count_by_scope(company_id).await?);

        let mut by_category: BTreeMap<ConfigurationCategory, i64> =
            ConfigurationCategory::ALL.iter().map(|c| (*c, 0)).collect();
        by_category.extend(self.repository.count_by_category(company_id).await?);

        let pending_approval = self.repository.find_pending_approval(company_id).await?.len() as i64;
        let expiring_soon = self
            .repository
            .find_expiring_between(now, horizon, company_id)
            .await?
            .len() as i64;

        Ok(ConfigurationMetrics {
            total: self.repository.count_total(company_id).await?,
            active: self.repository.count_active(company_id).await?,
            by_scope,
            by_category,
            pending_approval,
            expiring_soon,
            generated_at: now,
        })
    }

    pub fn expiring_soon_days(&self) -> i64 {
        self.expiring_soon_days
    }

    async fn load(&self, id: Uuid) -> Result<Configuration, ConfigError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ConfigError::not_found(format!("configuration {}", id)))
    }
}

type Window = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// Open-ended interval overlap: a missing start has always begun, a missing
/// end never ends.
fn windows_overlap(a: Window, b: Window) -> bool {
    let ends_before = |end: Option<DateTime<Utc>>, start: Option<DateTime<Utc>>| match (end, start) {
        (Some(end), Some(start)) => end < start,
        _ => false,
    };
    !(ends_before(a.1, b.0) || ends_before(b.1, a.0))
}

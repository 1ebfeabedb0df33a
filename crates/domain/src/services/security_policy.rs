//! Security policies resolved from hierarchical configuration.
//!
//! Password and session rules live under `security.*` keys. Missing entries
//! fall back to built-in defaults; any other resolution failure propagates.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::services::resolution::{ResolutionContext, ResolutionService};
use crate::value_objects::ConfigurationKey;

pub const PASSWORD_POLICY_KEY: &str = "security.password_policy";
pub const SESSION_POLICY_KEY: &str = "security.session_policy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordPolicy {
    pub min_length: u32,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// Days until a password must be changed; 0 disables expiry.
    pub max_age_days: u32,
    pub history_size: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
            max_age_days: 0,
            history_size: 0,
        }
    }
}

impl PasswordPolicy {
    /// Names of the rules `password` violates.
    pub fn violations(&self, password: &str) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if (password.chars().count() as u32) < self.min_length {
            violations.push("min_length");
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            violations.push("require_uppercase");
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            violations.push("require_lowercase");
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("require_digit");
        }
        if self.require_special && password.chars().all(char::is_alphanumeric) {
            violations.push("require_special");
        }
        violations
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPolicy {
    pub idle_timeout_minutes: u32,
    pub absolute_timeout_hours: u32,
    pub max_concurrent_sessions: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            absolute_timeout_hours: 12,
            max_concurrent_sessions: 5,
        }
    }
}

#[derive(Clone)]
pub struct SecurityPolicyService {
    resolution: ResolutionService,
}

impl SecurityPolicyService {
    pub fn new(resolution: ResolutionService) -> Self {
        Self { resolution }
    }

    pub async fn password_policy(&self, ctx: &ResolutionContext) -> Result<PasswordPolicy, ConfigError> {
        let key = ConfigurationKey::parse(PASSWORD_POLICY_KEY)?;
        self.resolution
            .resolve_value_with_default(&key, ctx, None, PasswordPolicy::default())
            .await
    }

    pub async fn session_policy(&self, ctx: &ResolutionContext) -> Result<SessionPolicy, ConfigError> {
        let key = ConfigurationKey::parse(SESSION_POLICY_KEY)?;
        self.resolution
            .resolve_value_with_default(&key, ctx, None, SessionPolicy::default())
            .await
    }

    /// Idle timeout alone, read from a dotted path inside the session policy.
    pub async fn idle_timeout_minutes(&self, ctx: &ResolutionContext) -> Result<u32, ConfigError> {
        let key = ConfigurationKey::parse(SESSION_POLICY_KEY)?;
        self.resolution
            .resolve_value_with_default(
                &key,
                ctx,
                Some("idleTimeoutMinutes"),
                SessionPolicy::default().idle_timeout_minutes,
            )
            .await
    }
}

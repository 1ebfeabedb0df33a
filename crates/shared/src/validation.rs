//! Common validation utilities.

use validator::ValidationError;

/// Minimum length of a configuration key.
pub const MIN_CONFIG_KEY_LENGTH: usize = 3;

/// Maximum length of a configuration key.
pub const MAX_CONFIG_KEY_LENGTH: usize = 255;

/// Maximum length of a scope owner id.
pub const MAX_SCOPE_ID_LENGTH: usize = 255;

lazy_static::lazy_static! {
    /// Dotted lowercase key grammar: `[a-z0-9_]+` segments joined by single dots.
    pub static ref CONFIG_KEY_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").unwrap();
}

/// Trims and lowercases a raw configuration key.
pub fn normalize_config_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Validates a configuration key after normalization.
pub fn validate_config_key(key: &str) -> Result<(), ValidationError> {
    let normalized = normalize_config_key(key);
    let len = normalized.chars().count();

    if !(MIN_CONFIG_KEY_LENGTH..=MAX_CONFIG_KEY_LENGTH).contains(&len) {
        let mut err = ValidationError::new("config_key_length");
        err.message = Some(
            format!(
                "Configuration key must be {}-{} characters",
                MIN_CONFIG_KEY_LENGTH, MAX_CONFIG_KEY_LENGTH
            )
            .into(),
        );
        return Err(err);
    }

    if !CONFIG_KEY_REGEX.is_match(&normalized) {
        let mut err = ValidationError::new("config_key_format");
        err.message = Some(
            "Configuration key must be dot-separated segments of lowercase letters, digits or underscores"
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a scope owner id is not blank.
pub fn validate_scope_id(scope_id: &str) -> Result<(), ValidationError> {
    let trimmed = scope_id.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("scope_id_blank");
        err.message = Some("Scope id cannot be blank".into());
        return Err(err);
    }
    if trimmed.chars().count() > MAX_SCOPE_ID_LENGTH {
        let mut err = ValidationError::new("scope_id_length");
        err.message = Some(format!("Scope id must be at most {} characters", MAX_SCOPE_ID_LENGTH).into());
        return Err(err);
    }
    Ok(())
}

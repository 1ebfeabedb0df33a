//! Aggregate counts over the configuration store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::value_objects::{ConfigurationCategory, ConfigurationScope};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationMetrics {
    pub total: i64,
    pub active: i64,
    pub by_scope: BTreeMap<ConfigurationScope, i64>,
    pub by_category: BTreeMap<ConfigurationCategory, i64>,
    pub pending_approval: i64,
    pub expiring_soon: i64,
    pub generated_at: DateTime<Utc>,
}

//! Domain models for the configuration engine.

pub mod configuration;
pub mod history;
pub mod metrics;

pub use configuration::{
    ChainKey, Configuration, CreateConfigurationRequest, RollbackRequest,
    UpdateConfigurationRequest,
};
pub use history::{
    ChangeContext, ConfigurationHistory, FieldChange, HistoryAction, HistoryFilter, HistoryQuery,
    HistoryStats, NewConfigurationHistory, RequestMetadata, UserActivity, MOST_ACTIVE_USERS_LIMIT,
};
pub use metrics::ConfigurationMetrics;

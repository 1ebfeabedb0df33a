//! Business logic services for the configuration engine.

pub mod configuration;
pub mod resolution;
pub mod rules;
pub mod security_policy;
pub mod validation;
pub mod versioning;

pub use configuration::{ConfigurationEngineSettings, ConfigurationService};
pub use resolution::{ResolutionContext, ResolutionService};
pub use rules::{AllowAllApprovers, ApprovalAuthorizer, ConfigurationRules};
pub use security_policy::{PasswordPolicy, SecurityPolicyService, SessionPolicy};
pub use validation::{InMemorySchemaCache, SchemaCache, SchemaValidationService};
pub use versioning::{VersionComparison, VersioningService};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::repository::ConfigurationRepository;
use domain::services::ConfigurationService;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{configurations, health};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<ConfigurationService>,
}

/// Builds the router over any repository implementation.
pub fn create_app(config: Config, repository: Arc<dyn ConfigurationRepository>) -> Router {
    let service = ConfigurationService::new(repository, config.engine.settings());
    create_app_with_service(config, service)
}

/// Builds the router around a pre-wired service (custom authorizer or schema cache).
pub fn create_app_with_service(config: Config, service: ConfigurationService) -> Router {
    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        service: Arc::new(service),
    };

    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let configuration_routes = Router::new()
        .route(
            "/api/v1/configurations",
            post(configurations::create_configuration),
        )
        .route(
            "/api/v1/configurations/rollback",
            post(configurations::rollback_configuration),
        )
        .route(
            "/api/v1/configurations/resolve",
            get(configurations::resolve_configuration),
        )
        .route(
            "/api/v1/configurations/effective",
            get(configurations::get_effective_configuration),
        )
        .route(
            "/api/v1/configurations/metrics",
            get(configurations::get_configuration_metrics),
        )
        .route(
            "/api/v1/configurations/pending-approval",
            get(configurations::list_pending_approvals),
        )
        .route(
            "/api/v1/configurations/expiring",
            get(configurations::list_expiring),
        )
        .route(
            "/api/v1/configurations/history/stats",
            get(configurations::get_history_stats),
        )
        .route(
            "/api/v1/configurations/:id",
            get(configurations::get_configuration).put(configurations::update_configuration),
        )
        .route(
            "/api/v1/configurations/:id/approve",
            post(configurations::approve_configuration),
        )
        .route(
            "/api/v1/configurations/:id/deactivate",
            post(configurations::deactivate_configuration),
        )
        .route(
            "/api/v1/configurations/:id/history",
            get(configurations::get_configuration_history),
        );

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(configuration_routes)
        // Bottom layers run first.
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}

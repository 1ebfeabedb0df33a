//! Common test utilities for integration tests.
//!
//! The router runs against `InMemoryConfigurationRepository`, so no database
//! is needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use bizconf_api::{
    app::create_app,
    config::{Config, DatabaseConfig, EngineConfig, LoggingConfig, ServerConfig},
    extractors::USER_ID_HEADER,
};
use domain::repository::InMemoryConfigurationRepository;
use fake::{Fake, Faker};
use std::sync::Arc;
use uuid::Uuid;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 30,
            cors_origins: Vec::new(),
        },
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: 1,
            idle_timeout_secs: 1,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        },
        engine: EngineConfig::default(),
    }
}

/// App plus the repository behind it.
pub fn create_test_app() -> (Router, Arc<InMemoryConfigurationRepository>) {
    let repository = Arc::new(InMemoryConfigurationRepository::new());
    let app = create_app(test_config(), repository.clone());
    (app, repository)
}

pub fn random_user() -> Uuid {
    Faker.fake()
}

pub fn json_request(method: Method, uri: &str, body: serde_json::Value, user: Uuid) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(USER_ID_HEADER, user.to_string())
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn post_request(uri: &str, user: Uuid) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(USER_ID_HEADER, user.to_string())
        .body(Body::empty())
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

//! Acting-user extractor.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in `X-User-Id`. The extractor also captures client details for
//! the audit trail.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use domain::models::{ChangeContext, RequestMetadata};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::trace_id::get_request_id;

pub const USER_ID_HEADER: &str = "X-User-Id";

const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// The user performing a write, plus request metadata for history rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub request: RequestMetadata,
}

impl Actor {
    /// Change context for a write with an optional free-text reason.
    pub fn change(&self, reason: Option<String>) -> ChangeContext {
        ChangeContext::new(self.user_id)
            .with_reason(reason)
            .with_request_metadata(self.request.clone())
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header_str(parts, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {} header", USER_ID_HEADER)))?;

        // First hop of X-Forwarded-For is the original client.
        let ip_address = header_str(parts, FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let request = RequestMetadata {
            ip_address,
            user_agent: header_str(parts, header::USER_AGENT.as_str()).map(str::to_string),
            request_id: get_request_id(&parts.extensions),
        };

        Ok(Self { user_id, request })
    }
}

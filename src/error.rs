// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Errors returned to webhook senders.

use crate::event::Source;
use crate::limiter::RateLimitReason;
use crate::store::StoreError;
use crate::transform::TransformError;
use crate::validator::ValidationError;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Epoch ms at which the minute window reopens.
pub const HEADER_RESET_MINUTE: &str = "x-ratelimit-reset-minute";
/// Epoch ms at which the hour window reopens.
pub const HEADER_RESET_HOUR: &str = "x-ratelimit-reset-hour";

/// Boxed cause of an internal failure.
pub type InternalCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reasons a webhook was not accepted.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("webhook configuration not found")]
    ConfigurationMissing,

    #[error("source {0} is not enabled")]
    SourceDisabled(Source),

    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        reason: RateLimitReason,
        reset_minute_ms: Option<i64>,
        reset_hour_ms: Option<i64>,
    },

    #[error("malformed JSON payload")]
    MalformedJson,

    #[error("invalid payload structure: {0}")]
    InvalidStructure(ValidationError),

    #[error("invalid signature")]
    SignatureInvalid,

    /// Store or handler failure. The cause is logged, never returned.
    #[error("internal error: {0}")]
    Internal(#[source] InternalCause),
}

impl DispatchError {
    pub fn internal(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        DispatchError::Internal(Box::new(cause))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownSource(_) => StatusCode::NOT_FOUND,
            Self::ConfigurationMissing | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SourceDisabled(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MalformedJson | Self::InvalidStructure(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        DispatchError::internal(e)
    }
}

impl From<TransformError> for DispatchError {
    fn from(e: TransformError) -> Self {
        DispatchError::internal(e)
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(_) => "internal server error".to_string(),
            Self::RateLimited { .. } => "rate limit exceeded".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorResponse { error: message })).into_response();

        if let Self::RateLimited {
            reset_minute_ms,
            reset_hour_ms,
            ..
        } = &self
        {
            let headers = response.headers_mut();
            for (name, reset) in [
                (HEADER_RESET_MINUTE, reset_minute_ms),
                (HEADER_RESET_HOUR, reset_hour_ms),
            ] {
                if let Some(reset) = reset {
                    headers.insert(HeaderName::from_static(name), HeaderValue::from(*reset));
                }
            }
        }

        response
    }
}

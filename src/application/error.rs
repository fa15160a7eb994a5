use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{listings::ListingError, repos::SourceError},
    cache::{InvalidFilterError, StoreError},
    config::LoadError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

impl ListingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ListingError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            ListingError::Source(SourceError::InvalidInput { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ListingError::Source(SourceError::Timeout | SourceError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ListingError::Source(SourceError::Persistence(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            ListingError::InvalidFilter(_) | ListingError::Source(SourceError::InvalidInput { .. }) => {
                "Request could not be processed"
            }
            ListingError::Source(SourceError::Timeout | SourceError::Unavailable(_)) => {
                "Service temporarily unavailable"
            }
            ListingError::Source(SourceError::Persistence(_)) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for ListingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::listings::ListingError", status, &self);
        let mut response = (status, self.presentation_message()).into_response();
        report.attach(&mut response);
        response
    }
}

/// Top-level error of the `listing-cache` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Filter(#[from] InvalidFilterError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("every warm target failed: {0}")]
    WarmFailed(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filters_map_to_bad_request() {
        let err = ListingError::from(InvalidFilterError::missing("lat"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["filter `lat` is required".to_string()]);
    }

    #[test]
    fn unavailable_source_maps_to_service_unavailable() {
        let err = ListingError::from(SourceError::unavailable("engine down"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn store_failures_surface_as_store_errors() {
        let err = AppError::from(StoreError::unavailable("connection refused"));
        assert!(matches!(err, AppError::Store(StoreError::Unavailable(_))));
        assert_eq!(
            err.to_string(),
            "cache store unavailable: connection refused"
        );
    }
}

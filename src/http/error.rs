//! API error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use opentelemetry::trace::Status;

use crate::observability::tracing::{set_attribute, set_status};

pub const NOT_FOUND_MESSAGE: &str = "Item no encontrado";
pub const VALIDATION_MESSAGE: &str = "Nombre y descripción son requeridos";
pub const SIMULATED_MESSAGE: &str = "Error simulado";
pub const INTERNAL_MESSAGE: &str = "Error interno del servidor";

/// Errors returned by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Item no encontrado")]
    NotFound,

    #[error("Nombre y descripción son requeridos")]
    Validation,

    #[error("invalid JSON body: {0}")]
    InvalidBody(String),

    #[error("Error simulado")]
    Simulated,

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Simulated | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable reason, set as the span's `error` attribute.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound => "item_not_found",
            ApiError::Validation => "invalid_input",
            ApiError::InvalidBody(_) => "invalid_json",
            ApiError::Simulated => "simulated_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Log the error and tag the active span with its code.
    ///
    /// Client errors log at warn and mark the span failed without an
    /// exception event. Server errors log at error with the source chain and
    /// leave the span to record the exception when the handler returns.
    pub fn record(&self) {
        set_attribute("error", self.code());
        if self.status().is_client_error() {
            set_status(Status::error(self.code()));
        }
        self.log();
    }

    fn log(&self) {
        if self.status().is_client_error() {
            tracing::warn!(status = self.status().as_u16(), error = %self, "Request rejected");
        } else {
            tracing::error!(
                status = self.status().as_u16(),
                error = %self,
                chain = %error_chain(self),
                "Request failed"
            );
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::NotFound => NOT_FOUND_MESSAGE.to_string(),
            ApiError::Validation => VALIDATION_MESSAGE.to_string(),
            ApiError::InvalidBody(_) => "Cuerpo JSON inválido".to_string(),
            ApiError::Simulated => SIMULATED_MESSAGE.to_string(),
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// `outer: inner: root` rendering of an error and its sources.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

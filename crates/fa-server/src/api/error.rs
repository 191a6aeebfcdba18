//! JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fa_core::AnalysisError;
use serde::{Deserialize, Serialize};

use crate::population::PopulationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum AppError {
    Analysis(AnalysisError),
    Population(PopulationError),
    NotFound(String),
    /// Too many analyses in flight
    Busy,
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Analysis(err) => {
                let status = match err {
                    AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    AnalysisError::GeometryRepairFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    AnalysisError::ElevationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    AnalysisError::Cancelled => StatusCode::CONFLICT,
                    AnalysisError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code())
            }
            Self::Population(PopulationError::NotConfigured) => {
                (StatusCode::BAD_REQUEST, "POPULATION_NOT_CONFIGURED")
            }
            Self::Population(_) => (StatusCode::INTERNAL_SERVER_ERROR, "POPULATION_LOAD_FAILED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Busy => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_JOBS"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Analysis(err) => err.to_string(),
            Self::Population(err) => err.to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Busy => "too many analyses running, retry later".to_string(),
            Self::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            tracing::error!("{}: {}", code, self.message());
        }
        let body = ApiError {
            code: code.to_string(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        Self::Analysis(err)
    }
}

impl From<PopulationError> for AppError {
    fn from(err: PopulationError) -> Self {
        Self::Population(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

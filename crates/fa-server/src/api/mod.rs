//! HTTP API for the analysis service.

pub mod error;
pub mod request_id;
mod routes;
pub mod ws;

use axum::Router;
use std::sync::Arc;

pub use error::{ApiError, AppError};
pub use routes::{GroundRiskRequest, GroundRiskResponse, LosRequest, VisibilityRequest};

pub fn routes() -> Router<Arc<crate::state::AppState>> {
    routes::create_router()
}

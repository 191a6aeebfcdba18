//! Error taxonomy for the analysis pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Malformed flight path, empty station list, or missing aircraft data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A single population polygon could not be made valid.
    #[error("geometry repair failed for polygon {polygon_id}: {reason}")]
    GeometryRepairFailure { polygon_id: String, reason: String },
    /// The elevation source as a whole is unusable.
    #[error("elevation source unavailable: {0}")]
    ElevationUnavailable(String),
    /// The run was aborted by the caller; no partial result exists.
    #[error("analysis cancelled")]
    Cancelled,
    /// Lookup table miss; indicates an upstream invariant violation.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AnalysisError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::GeometryRepairFailure { .. } => "GEOMETRY_REPAIR_FAILURE",
            Self::ElevationUnavailable(_) => "ELEVATION_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Record of a polygon dropped from an intersection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPolygon {
    pub polygon_id: String,
    pub reason: String,
}

impl From<AnalysisError> for SkippedPolygon {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::GeometryRepairFailure { polygon_id, reason } => {
                SkippedPolygon { polygon_id, reason }
            }
            other => SkippedPolygon {
                polygon_id: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

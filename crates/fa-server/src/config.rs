//! Server configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub log_json: bool,

    /// Open-Meteo compatible elevation endpoint
    pub terrain_provider_url: String,
    /// Serve constant terrain instead of calling the provider
    pub terrain_flat_elevation_m: Option<f64>,
    pub terrain_cache_ttl_s: u64,
    pub terrain_cache_max_entries: usize,
    pub terrain_sample_spacing_m: f64,
    pub terrain_max_grid_points: usize,
    pub terrain_max_points_per_request: usize,
    pub terrain_request_timeout_s: u64,
    pub terrain_fetch_concurrency: usize,

    pub population_dataset_path: Option<PathBuf>,
    pub polygon_cache_max_entries: usize,
    pub polygon_cache_ttl_s: u64,

    pub los_sample_distance_m: f64,
    pub minimum_offset_m: f64,
    pub corridor_floor_m: f64,
    pub degraded_fidelity_threshold: f64,

    pub job_retention_s: u64,
    pub max_concurrent_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            log_json: false,
            terrain_provider_url: "https://api.open-meteo.com/v1/elevation".to_string(),
            terrain_flat_elevation_m: None,
            terrain_cache_ttl_s: 900,
            terrain_cache_max_entries: 64,
            terrain_sample_spacing_m: 30.0,
            terrain_max_grid_points: 40_000,
            terrain_max_points_per_request: 100,
            terrain_request_timeout_s: 10,
            terrain_fetch_concurrency: 4,
            population_dataset_path: None,
            polygon_cache_max_entries: 256,
            polygon_cache_ttl_s: 600,
            los_sample_distance_m: 30.0,
            minimum_offset_m: 1.0,
            corridor_floor_m: fa_core::DEFAULT_CORRIDOR_FLOOR_M,
            degraded_fidelity_threshold: 0.05,
            job_retention_s: 3600,
            max_concurrent_jobs: 8,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parsed("FA_PORT").unwrap_or(defaults.server_port),
            log_json: flag("FA_LOG_JSON"),
            terrain_provider_url: env::var("FA_TERRAIN_PROVIDER_URL")
                .unwrap_or(defaults.terrain_provider_url),
            terrain_flat_elevation_m: parsed("FA_TERRAIN_FLAT_M"),
            terrain_cache_ttl_s: parsed("FA_TERRAIN_CACHE_TTL_S")
                .unwrap_or(defaults.terrain_cache_ttl_s),
            terrain_cache_max_entries: parsed("FA_TERRAIN_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.terrain_cache_max_entries),
            terrain_sample_spacing_m: parsed("FA_TERRAIN_SAMPLE_SPACING_M")
                .unwrap_or(defaults.terrain_sample_spacing_m),
            terrain_max_grid_points: parsed("FA_TERRAIN_MAX_GRID_POINTS")
                .unwrap_or(defaults.terrain_max_grid_points),
            terrain_max_points_per_request: parsed("FA_TERRAIN_MAX_POINTS_PER_REQUEST")
                .unwrap_or(defaults.terrain_max_points_per_request),
            terrain_request_timeout_s: parsed("FA_TERRAIN_TIMEOUT_S")
                .unwrap_or(defaults.terrain_request_timeout_s),
            terrain_fetch_concurrency: parsed("FA_TERRAIN_FETCH_CONCURRENCY")
                .unwrap_or(defaults.terrain_fetch_concurrency),
            population_dataset_path: env::var("FA_POPULATION_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            polygon_cache_max_entries: parsed("FA_POLYGON_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.polygon_cache_max_entries),
            polygon_cache_ttl_s: parsed("FA_POLYGON_CACHE_TTL_S")
                .unwrap_or(defaults.polygon_cache_ttl_s),
            los_sample_distance_m: parsed("FA_LOS_SAMPLE_DISTANCE_M")
                .unwrap_or(defaults.los_sample_distance_m),
            minimum_offset_m: parsed("FA_MINIMUM_OFFSET_M").unwrap_or(defaults.minimum_offset_m),
            corridor_floor_m: parsed("FA_CORRIDOR_FLOOR_M").unwrap_or(defaults.corridor_floor_m),
            degraded_fidelity_threshold: parsed("FA_DEGRADED_FIDELITY_THRESHOLD")
                .unwrap_or(defaults.degraded_fidelity_threshold),
            job_retention_s: parsed("FA_JOB_RETENTION_S").unwrap_or(defaults.job_retention_s),
            max_concurrent_jobs: parsed("FA_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
        }
    }

    /// LOS defaults applied when a request leaves them out.
    pub fn los_options(&self) -> fa_core::LosOptions {
        fa_core::LosOptions {
            sample_distance_m: self.los_sample_distance_m,
            minimum_offset_m: self.minimum_offset_m,
            ..fa_core::LosOptions::default()
        }
    }

    pub fn visibility_options(&self) -> fa_core::VisibilityOptions {
        fa_core::VisibilityOptions {
            los: self.los_options(),
            degraded_fidelity_threshold: self.degraded_fidelity_threshold,
            ..fa_core::VisibilityOptions::default()
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

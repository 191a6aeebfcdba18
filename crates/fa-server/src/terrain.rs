//! Terrain provider for server-side analyses.
//!
//! Elevation comes from an Open-Meteo compatible endpoint as a regular grid
//! over the padded bounds of the requested points. Grids are cached by bounds
//! and spacing. Every analysis runs against a [`TerrainSession`] that pins the
//! grid it fetched, so cache eviction never changes terrain mid-run.

use fa_core::elevation::{ElevationSource, TerrainGrid, TerrainLookup};
use fa_core::{AnalysisError, Coordinate3D, FlatTerrain};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::cache::{CacheLookup, TtlCache};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    /// Bounds of `(lon, lat)` pairs, skipping non-finite ones.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut bounds = Self {
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
        };
        for (lon, lat) in points {
            if !lat.is_finite() || !lon.is_finite() {
                continue;
            }
            bounds.min_lat = bounds.min_lat.min(lat);
            bounds.max_lat = bounds.max_lat.max(lat);
            bounds.min_lon = bounds.min_lon.min(lon);
            bounds.max_lon = bounds.max_lon.max(lon);
        }
        bounds.min_lat.is_finite().then_some(bounds)
    }

    pub fn expand(&self, pad_ratio: f64) -> Self {
        let pad_lat = ((self.max_lat - self.min_lat) * pad_ratio).max(0.0015);
        let pad_lon = ((self.max_lon - self.min_lon) * pad_ratio).max(0.0015);
        Self {
            min_lat: self.min_lat - pad_lat,
            max_lat: self.max_lat + pad_lat,
            min_lon: self.min_lon - pad_lon,
            max_lon: self.max_lon + pad_lon,
        }
    }

    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    fn cache_key(&self, spacing_m: f64) -> String {
        format!(
            "terrain:{:.4}:{:.4}:{:.4}:{:.4}:{:.1}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon, spacing_m
        )
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoElevationResponse {
    elevation: Option<Vec<Option<f64>>>,
}

/// Shared terrain backend held in application state.
pub enum TerrainService {
    OpenMeteo(OpenMeteoTerrain),
    Flat(FlatTerrain),
}

impl TerrainService {
    pub fn from_config(config: &Config, client: Client) -> Self {
        match config.terrain_flat_elevation_m {
            Some(elevation) => {
                tracing::info!("Using flat terrain at {:.1} m", elevation);
                Self::Flat(FlatTerrain::new(elevation))
            }
            None => Self::OpenMeteo(OpenMeteoTerrain::new(config, client)),
        }
    }

    /// Fresh per-analysis view of the terrain.
    pub fn session(self: &Arc<Self>) -> TerrainSession {
        match self.as_ref() {
            Self::Flat(flat) => TerrainSession::Flat(*flat),
            Self::OpenMeteo(_) => TerrainSession::Remote {
                service: Arc::clone(self),
                grid: RwLock::new(None),
            },
        }
    }
}

pub struct OpenMeteoTerrain {
    client: Client,
    provider_url: String,
    sample_spacing_m: f64,
    max_grid_points: usize,
    max_points_per_request: usize,
    timeout: Duration,
    concurrency: usize,
    cache: TtlCache<String, Arc<TerrainGrid>>,
}

impl OpenMeteoTerrain {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            provider_url: config.terrain_provider_url.clone(),
            sample_spacing_m: config.terrain_sample_spacing_m.max(5.0),
            max_grid_points: config.terrain_max_grid_points,
            max_points_per_request: config.terrain_max_points_per_request.max(1),
            timeout: Duration::from_secs(config.terrain_request_timeout_s.max(3)),
            concurrency: config.terrain_fetch_concurrency.max(1),
            cache: TtlCache::new(
                Duration::from_secs(config.terrain_cache_ttl_s.max(30)),
                config.terrain_cache_max_entries,
            ),
        }
    }

    pub fn check_ready(&self) -> Result<(), AnalysisError> {
        if self.provider_url.trim().is_empty() {
            return Err(AnalysisError::ElevationUnavailable(
                "terrain provider URL is empty".to_string(),
            ));
        }
        if self.max_grid_points == 0 {
            return Err(AnalysisError::ElevationUnavailable(
                "terrain max grid points must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Grid covering `bounds` (already padded), from cache when possible.
    pub async fn fetch_grid(&self, bounds: &GeoBounds) -> Result<Arc<TerrainGrid>, AnalysisError> {
        self.check_ready()?;
        let key = bounds.cache_key(self.sample_spacing_m);
        let stale = match self.cache.lookup(&key) {
            CacheLookup::Fresh(grid) => return Ok(grid),
            CacheLookup::Stale(grid) => Some(grid),
            CacheLookup::Miss => None,
        };

        match self.download(bounds).await {
            Ok(grid) => {
                let grid = Arc::new(grid);
                self.cache.insert(key, Arc::clone(&grid));
                Ok(grid)
            }
            Err(err) => match stale {
                Some(grid) => {
                    tracing::warn!("Terrain fetch failed, using stale cache: {}", err);
                    Ok(grid)
                }
                None => Err(AnalysisError::ElevationUnavailable(err)),
            },
        }
    }

    async fn download(&self, bounds: &GeoBounds) -> Result<TerrainGrid, String> {
        let (rows, cols, lat_step_deg, lon_step_deg) =
            resolve_grid_dims(bounds, self.sample_spacing_m, self.max_grid_points);
        let total = rows.saturating_mul(cols);

        let mut latitudes = Vec::with_capacity(total);
        let mut longitudes = Vec::with_capacity(total);
        for row in 0..rows {
            let lat = bounds.min_lat + row as f64 * lat_step_deg;
            for col in 0..cols {
                latitudes.push(lat);
                longitudes.push(bounds.min_lon + col as f64 * lon_step_deg);
            }
        }

        let chunks: Vec<(usize, usize)> = (0..total)
            .step_by(self.max_points_per_request)
            .map(|start| (start, (start + self.max_points_per_request).min(total)))
            .collect();
        tracing::debug!(
            "Fetching terrain grid {}x{} in {} requests",
            rows,
            cols,
            chunks.len()
        );

        let results: Vec<Result<(usize, Vec<Option<f64>>), String>> = stream::iter(chunks)
            .map(|(start, end)| {
                let url = build_provider_url(
                    &self.provider_url,
                    &join_params(&latitudes[start..end]),
                    &join_params(&longitudes[start..end]),
                );
                async move {
                    let values = self.fetch_chunk(url, end - start).await?;
                    Ok::<_, String>((start, values))
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // Gaps become NaN cells, which the grid reports as missing samples.
        let mut elevations = vec![f64::NAN; total];
        for result in results {
            let (start, values) = result?;
            for (offset, value) in values.into_iter().enumerate() {
                elevations[start + offset] = value.filter(|v| v.is_finite()).unwrap_or(f64::NAN);
            }
        }

        TerrainGrid::new(
            bounds.min_lat,
            bounds.min_lon,
            lat_step_deg,
            lon_step_deg,
            rows,
            cols,
            elevations,
        )
        .map_err(|err| err.to_string())
    }

    async fn fetch_chunk(&self, url: String, expected: usize) -> Result<Vec<Option<f64>>, String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("terrain provider HTTP {}", response.status()));
        }
        let payload: OpenMeteoElevationResponse =
            response.json().await.map_err(|err| err.to_string())?;
        let values = payload
            .elevation
            .ok_or_else(|| "terrain provider missing elevation".to_string())?;
        if values.len() != expected {
            return Err("terrain provider returned unexpected sample count".to_string());
        }
        Ok(values)
    }
}

/// Per-analysis terrain view.
pub enum TerrainSession {
    Flat(FlatTerrain),
    Remote {
        service: Arc<TerrainService>,
        grid: RwLock<Option<Arc<TerrainGrid>>>,
    },
}

impl TerrainSession {
    fn pinned(&self) -> Option<Arc<TerrainGrid>> {
        match self {
            Self::Flat(_) => None,
            Self::Remote { grid, .. } => grid.read().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}

impl TerrainLookup for TerrainSession {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        match self {
            Self::Flat(flat) => flat.elevation(lon, lat),
            Self::Remote { .. } => self.pinned()?.sample(lat, lon),
        }
    }
}

impl ElevationSource for TerrainSession {
    async fn ensure_ready(&self) -> Result<(), AnalysisError> {
        match self {
            Self::Flat(_) => Ok(()),
            Self::Remote { service, .. } => match service.as_ref() {
                TerrainService::OpenMeteo(remote) => remote.check_ready(),
                TerrainService::Flat(_) => Ok(()),
            },
        }
    }

    async fn preload_area(&self, coordinates: &[Coordinate3D]) -> Result<(), AnalysisError> {
        let Self::Remote { service, grid } = self else {
            return Ok(());
        };
        let TerrainService::OpenMeteo(remote) = service.as_ref() else {
            return Ok(());
        };
        let Some(bounds) = GeoBounds::from_points(coordinates.iter().map(|c| (c.lon, c.lat))) else {
            return Ok(());
        };

        if let Some(current) = self.pinned() {
            if current.covers(bounds.min_lon, bounds.min_lat)
                && current.covers(bounds.max_lon, bounds.max_lat)
            {
                return Ok(());
            }
        }

        let fetched = remote.fetch_grid(&bounds.expand(0.2)).await?;
        *grid.write().unwrap_or_else(PoisonError::into_inner) = Some(fetched);
        Ok(())
    }
}

pub(crate) fn resolve_grid_dims(
    bounds: &GeoBounds,
    spacing_m: f64,
    max_points: usize,
) -> (usize, usize, f64, f64) {
    let mean_lat = (bounds.min_lat + bounds.max_lat) / 2.0;
    let meters_per_deg_lat = fa_core::spatial::meters_per_deg_lat(mean_lat);
    let meters_per_deg_lon = fa_core::spatial::meters_per_deg_lon(mean_lat).max(1.0);
    let mut spacing = spacing_m.max(5.0);
    let max_points = max_points.max(4);

    loop {
        let lat_step_deg = spacing / meters_per_deg_lat;
        let lon_step_deg = spacing / meters_per_deg_lon;
        let rows = ((bounds.max_lat - bounds.min_lat) / lat_step_deg).ceil().max(1.0) as usize + 1;
        let cols = ((bounds.max_lon - bounds.min_lon) / lon_step_deg).ceil().max(1.0) as usize + 1;
        let total = rows.saturating_mul(cols);
        if total <= max_points || spacing > 2000.0 {
            return (rows, cols, lat_step_deg, lon_step_deg);
        }
        spacing *= ((total as f64) / (max_points as f64)).sqrt().max(1.1);
    }
}

fn join_params(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format!("{:.6}", value))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_provider_url(base: &str, latitudes: &str, longitudes: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}latitude={latitudes}&longitude={longitudes}")
}

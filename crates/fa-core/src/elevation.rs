//! Terrain elevation access.
//!
//! The analysis never owns terrain data. It talks to an injected
//! [`ElevationSource`] and treats missing samples as non-occluding.

use std::collections::HashMap;
use std::future::Future;

use crate::error::AnalysisError;
use crate::models::{Coordinate3D, GeoPoint};

/// Coordinate quantum used to key batched elevation results (~1 cm).
const KEY_SCALE: f64 = 1e7;

/// Synchronous point lookup used by the line-of-sight profiler.
pub trait TerrainLookup {
    /// Ground elevation in meters AMSL, or `None` when the source has no data.
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64>;
}

/// Shared, read-mostly elevation provider.
///
/// `ensure_ready` and `preload_area` must be idempotent. Implementations are
/// used concurrently by independent analyses and are never mutated by them.
pub trait ElevationSource: TerrainLookup + Send + Sync {
    fn ensure_ready(&self) -> impl Future<Output = Result<(), AnalysisError>> + Send {
        async { Ok(()) }
    }

    fn preload_area(
        &self,
        coordinates: &[Coordinate3D],
    ) -> impl Future<Output = Result<(), AnalysisError>> + Send {
        let _ = coordinates;
        async { Ok(()) }
    }

    /// Batched lookup; results are returned in the order of `points`.
    ///
    /// Fails when the area cannot be loaded at all. Individual gaps inside a
    /// loaded area come back as `None`.
    fn elevations(
        &self,
        points: &[GeoPoint],
    ) -> impl Future<Output = Result<Vec<Option<f64>>, AnalysisError>> + Send {
        async move {
            let coordinates: Vec<Coordinate3D> = points
                .iter()
                .map(|p| Coordinate3D::new(p.lon, p.lat, 0.0))
                .collect();
            self.preload_area(&coordinates).await?;
            Ok(points.iter().map(|p| self.elevation(p.lon, p.lat)).collect())
        }
    }
}

/// Constant-height terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatTerrain {
    pub elevation_m: f64,
}

impl FlatTerrain {
    pub fn new(elevation_m: f64) -> Self {
        Self { elevation_m }
    }
}

impl TerrainLookup for FlatTerrain {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        Some(self.elevation_m)
    }
}

impl ElevationSource for FlatTerrain {}

/// Regular latitude/longitude elevation grid with bilinear sampling.
///
/// Row 0 is the southern edge, column 0 the western edge.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainGrid {
    min_lat: f64,
    min_lon: f64,
    lat_step_deg: f64,
    lon_step_deg: f64,
    rows: usize,
    cols: usize,
    elevations_m: Vec<f64>,
}

impl TerrainGrid {
    pub fn new(
        min_lat: f64,
        min_lon: f64,
        lat_step_deg: f64,
        lon_step_deg: f64,
        rows: usize,
        cols: usize,
        elevations_m: Vec<f64>,
    ) -> Result<Self, AnalysisError> {
        if rows < 2 || cols < 2 {
            return Err(AnalysisError::InvalidInput(
                "terrain grid needs at least 2x2 samples".to_string(),
            ));
        }
        if elevations_m.len() != rows * cols {
            return Err(AnalysisError::InvalidInput(format!(
                "terrain grid expects {} samples, got {}",
                rows * cols,
                elevations_m.len()
            )));
        }
        if !(lat_step_deg > 0.0 && lon_step_deg > 0.0) {
            return Err(AnalysisError::InvalidInput(
                "terrain grid steps must be positive".to_string(),
            ));
        }
        if !min_lat.is_finite() || !min_lon.is_finite() {
            return Err(AnalysisError::InvalidInput(
                "terrain grid origin must be finite".to_string(),
            ));
        }
        Ok(Self {
            min_lat,
            min_lon,
            lat_step_deg,
            lon_step_deg,
            rows,
            cols,
            elevations_m,
        })
    }

    /// Build a grid by evaluating `f(lon, lat)` at every node.
    pub fn from_fn<F>(
        min_lat: f64,
        min_lon: f64,
        lat_step_deg: f64,
        lon_step_deg: f64,
        rows: usize,
        cols: usize,
        mut f: F,
    ) -> Result<Self, AnalysisError>
    where
        F: FnMut(f64, f64) -> f64,
    {
        let mut elevations = Vec::with_capacity(rows.saturating_mul(cols));
        for row in 0..rows {
            let lat = min_lat + row as f64 * lat_step_deg;
            for col in 0..cols {
                let lon = min_lon + col as f64 * lon_step_deg;
                elevations.push(f(lon, lat));
            }
        }
        Self::new(min_lat, min_lon, lat_step_deg, lon_step_deg, rows, cols, elevations)
    }

    pub fn max_lat(&self) -> f64 {
        self.min_lat + (self.rows - 1) as f64 * self.lat_step_deg
    }

    pub fn max_lon(&self) -> f64 {
        self.min_lon + (self.cols - 1) as f64 * self.lon_step_deg
    }

    pub fn covers(&self, lon: f64, lat: f64) -> bool {
        let eps_lat = self.lat_step_deg * 1e-6;
        let eps_lon = self.lon_step_deg * 1e-6;
        lat >= self.min_lat - eps_lat
            && lat <= self.max_lat() + eps_lat
            && lon >= self.min_lon - eps_lon
            && lon <= self.max_lon() + eps_lon
    }

    pub fn sample(&self, lat: f64, lon: f64) -> Option<f64> {
        if !lat.is_finite() || !lon.is_finite() || !self.covers(lon, lat) {
            return None;
        }

        let max_y = (self.rows - 1) as f64;
        let max_x = (self.cols - 1) as f64;
        let y = ((lat - self.min_lat) / self.lat_step_deg).clamp(0.0, max_y);
        let x = ((lon - self.min_lon) / self.lon_step_deg).clamp(0.0, max_x);

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(self.rows - 1);
        let x1 = (x0 + 1).min(self.cols - 1);
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        // Corners with zero weight may be gaps without affecting the result.
        let corners = [
            (y0, x0, (1.0 - dx) * (1.0 - dy)),
            (y0, x1, dx * (1.0 - dy)),
            (y1, x0, (1.0 - dx) * dy),
            (y1, x1, dx * dy),
        ];
        let mut value = 0.0;
        for (row, col, weight) in corners {
            if weight > 0.0 {
                value += self.value_at(row, col)? * weight;
            }
        }
        Some(value)
    }

    fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        let idx = row.saturating_mul(self.cols) + col.min(self.cols - 1);
        self.elevations_m
            .get(idx)
            .copied()
            .filter(|value| value.is_finite())
    }
}

impl TerrainLookup for TerrainGrid {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        self.sample(lat, lon)
    }
}

impl ElevationSource for TerrainGrid {}

/// Quantized key for a horizontal position.
pub fn sample_key(lon: f64, lat: f64) -> (i64, i64) {
    ((lon * KEY_SCALE).round() as i64, (lat * KEY_SCALE).round() as i64)
}

/// Result of one batched elevation request, frozen for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct ElevationTable {
    values: HashMap<(i64, i64), Option<f64>>,
}

impl ElevationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch every point through `source` in a single batch.
    pub async fn fetch<S: ElevationSource>(
        source: &S,
        points: &[GeoPoint],
    ) -> Result<Self, AnalysisError> {
        let mut unique: Vec<GeoPoint> = Vec::new();
        let mut values = HashMap::with_capacity(points.len());
        for point in points {
            let key = sample_key(point.lon, point.lat);
            if !values.contains_key(&key) {
                values.insert(key, None);
                unique.push(*point);
            }
        }

        let fetched = source.elevations(&unique).await?;
        for (point, elevation) in unique.iter().zip(fetched) {
            values.insert(sample_key(point.lon, point.lat), elevation);
        }
        tracing::debug!("Fetched {} unique elevation samples", unique.len());
        Ok(Self { values })
    }

    pub fn insert(&mut self, lon: f64, lat: f64, elevation: Option<f64>) {
        self.values.insert(sample_key(lon, lat), elevation);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn missing(&self) -> usize {
        self.values.values().filter(|v| v.is_none()).count()
    }
}

impl TerrainLookup for ElevationTable {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        self.values.get(&sample_key(lon, lat)).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_grid() -> TerrainGrid {
        // 0.01 degree spacing, elevation rises 10 m per column.
        TerrainGrid::from_fn(-27.50, 153.00, 0.01, 0.01, 3, 3, |lon, _| {
            ((lon - 153.00) / 0.01).round() * 10.0
        })
        .unwrap()
    }

    #[test]
    fn grid_interpolates_between_nodes() {
        let grid = ramp_grid();
        let value = grid.sample(-27.49, 153.005).unwrap();
        assert!((value - 5.0).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn grid_returns_none_outside_coverage() {
        let grid = ramp_grid();
        assert!(grid.sample(-27.40, 153.005).is_none());
        assert!(grid.sample(-27.49, 152.90).is_none());
        assert!(grid.sample(f64::NAN, 153.0).is_none());
    }

    #[test]
    fn grid_treats_nan_cells_as_gaps() {
        let mut elevations = vec![1.0; 4];
        elevations[3] = f64::NAN;
        let grid = TerrainGrid::new(0.0, 0.0, 1.0, 1.0, 2, 2, elevations).unwrap();
        assert!(grid.sample(0.5, 0.5).is_none());
        assert_eq!(grid.sample(0.0, 0.0), Some(1.0));
        // On the southern edge the NaN corner has no weight.
        assert_eq!(grid.sample(0.0, 0.5), Some(1.0));
        assert!(grid.sample(0.999, 0.999).is_none());
    }

    #[test]
    fn grid_rejects_mismatched_sample_count() {
        assert!(TerrainGrid::new(0.0, 0.0, 1.0, 1.0, 2, 2, vec![0.0; 3]).is_err());
    }

    #[tokio::test]
    async fn table_deduplicates_and_preserves_gaps() {
        let grid = ramp_grid();
        let points = vec![
            GeoPoint { lon: 153.0, lat: -27.5 },
            GeoPoint { lon: 153.0, lat: -27.5 },
            GeoPoint { lon: 150.0, lat: -27.5 },
        ];
        let table = ElevationTable::fetch(&grid, &points).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.missing(), 1);
        assert_eq!(table.elevation(153.0, -27.5), Some(0.0));
        assert_eq!(table.elevation(150.0, -27.5), None);
    }

    struct Unreachable;

    impl TerrainLookup for Unreachable {
        fn elevation(&self, _lon: f64, _lat: f64) -> Option<f64> {
            None
        }
    }

    impl ElevationSource for Unreachable {
        async fn preload_area(&self, _coordinates: &[Coordinate3D]) -> Result<(), AnalysisError> {
            Err(AnalysisError::ElevationUnavailable("provider offline".to_string()))
        }
    }

    #[tokio::test]
    async fn table_fails_when_source_cannot_load() {
        let points = [GeoPoint { lon: 153.0, lat: -27.5 }];
        let err = ElevationTable::fetch(&Unreachable, &points).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ElevationUnavailable(_)));
    }
}

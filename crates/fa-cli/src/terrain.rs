//! In-memory terrain described inside a scenario file.

use anyhow::Result;
use fa_core::elevation::{ElevationSource, TerrainLookup};
use fa_core::{FlatTerrain, TerrainGrid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerrainSpec {
    Flat {
        elevation_m: f64,
    },
    /// Row-major samples, row 0 at `min_lat`
    Grid {
        min_lat: f64,
        min_lon: f64,
        lat_step_deg: f64,
        lon_step_deg: f64,
        rows: usize,
        cols: usize,
        elevations_m: Vec<f64>,
    },
}

impl Default for TerrainSpec {
    fn default() -> Self {
        Self::Flat { elevation_m: 0.0 }
    }
}

impl TerrainSpec {
    pub fn build(&self) -> Result<ScenarioTerrain> {
        Ok(match self {
            Self::Flat { elevation_m } => ScenarioTerrain::Flat(FlatTerrain::new(*elevation_m)),
            Self::Grid {
                min_lat,
                min_lon,
                lat_step_deg,
                lon_step_deg,
                rows,
                cols,
                elevations_m,
            } => ScenarioTerrain::Grid(TerrainGrid::new(
                *min_lat,
                *min_lon,
                *lat_step_deg,
                *lon_step_deg,
                *rows,
                *cols,
                elevations_m.clone(),
            )?),
        })
    }
}

pub enum ScenarioTerrain {
    Flat(FlatTerrain),
    Grid(TerrainGrid),
}

impl TerrainLookup for ScenarioTerrain {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        match self {
            Self::Flat(flat) => flat.elevation(lon, lat),
            Self::Grid(grid) => grid.elevation(lon, lat),
        }
    }
}

impl ElevationSource for ScenarioTerrain {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_spec_parses_and_samples() {
        let spec: TerrainSpec = serde_json::from_str(
            r#"{"kind":"grid","min_lat":0.0,"min_lon":0.0,"lat_step_deg":1.0,"lon_step_deg":1.0,
                "rows":2,"cols":2,"elevations_m":[0.0,10.0,0.0,10.0]}"#,
        )
        .unwrap();
        let terrain = spec.build().unwrap();
        assert_eq!(terrain.elevation(0.5, 0.5), Some(5.0));
        assert_eq!(terrain.elevation(3.0, 0.5), None);
    }

    #[test]
    fn bad_grid_is_rejected() {
        let spec = TerrainSpec::Grid {
            min_lat: 0.0,
            min_lon: 0.0,
            lat_step_deg: 1.0,
            lon_step_deg: 1.0,
            rows: 2,
            cols: 2,
            elevations_m: vec![1.0],
        };
        assert!(spec.build().is_err());
    }
}

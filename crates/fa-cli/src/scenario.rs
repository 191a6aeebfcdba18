//! Scenario files for offline analysis runs.

use anyhow::{bail, Context, Result};
use fa_core::spatial::offset_by_bearing;
use fa_core::{
    analyze_flight_path_visibility, corridor_buffer_m, estimate_intersections,
    ground_risk_from_intersections, AircraftConfiguration, Coordinate3D, EstimatorOptions,
    FlightPath, IgrcResult, IgrcTable, IntersectionReport, OperationType, PopulationPolygon,
    Station, StationType, TowerFilter, TowerSite, VisibilityOptions, VisibilityReport,
    DEFAULT_CORRIDOR_FLOOR_M,
};
use fa_core::elevation::TerrainLookup;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::terrain::TerrainSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub path: FlightPath,
    #[serde(default)]
    pub stations: Vec<Station>,
    /// Mobile tower sites offered as extra repeaters
    #[serde(default)]
    pub towers: Vec<TowerSite>,
    #[serde(default)]
    pub tower_filter: TowerFilter,
    #[serde(default)]
    pub terrain: TerrainSpec,
    #[serde(default)]
    pub polygons: Vec<PopulationPolygon>,
    #[serde(default)]
    pub aircraft: Option<AircraftConfiguration>,
    #[serde(default)]
    pub visibility: VisibilityOptions,
    #[serde(default)]
    pub estimator: EstimatorOptions,
    /// Corridor half-width; derived from the operating altitude when absent
    #[serde(default)]
    pub buffer_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundRiskOutput {
    pub buffer_m: f64,
    pub intersections: IntersectionReport,
    pub ground_risk: IgrcResult,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub async fn run_visibility(
        &self,
        cancel: &CancellationToken,
        progress: impl FnMut(f64) + Send,
    ) -> Result<VisibilityReport> {
        let terrain = self.terrain.build()?;
        let stations = self.stations_over(&terrain);
        let report = analyze_flight_path_visibility(
            &self.path,
            &stations,
            &terrain,
            &self.visibility,
            cancel,
            progress,
        )
        .await?;
        Ok(report)
    }

    /// Configured stations followed by the towers that pass the filter.
    pub fn stations_over<T: TerrainLookup>(&self, terrain: &T) -> Vec<Station> {
        let mut stations = self.stations.clone();
        stations.extend(fa_core::tower_stations(&self.towers, &self.tower_filter, terrain));
        stations
    }

    pub fn run_ground_risk(&self, table: &IgrcTable) -> Result<GroundRiskOutput> {
        let Some(aircraft) = self.aircraft.as_ref() else {
            bail!("scenario {} has no aircraft configuration", self.label());
        };
        let buffer_m = self.buffer_m.unwrap_or_else(|| {
            corridor_buffer_m(aircraft.operation_altitude_agl_m, DEFAULT_CORRIDOR_FLOOR_M)
        });
        let intersections = estimate_intersections(&self.polygons, &self.path, buffer_m, &self.estimator)?;
        let ground_risk = ground_risk_from_intersections(&intersections.results, aircraft, table)?;
        Ok(GroundRiskOutput {
            buffer_m,
            intersections,
            ground_risk,
        })
    }
}

/// Built-in scenario: a 1.2 km eastbound leg over a town block, with a
/// ground station and a repeater on flat ground.
pub fn demo_scenario(center_lat: f64, center_lon: f64) -> Result<Scenario> {
    if !(center_lat.is_finite() && center_lon.is_finite()) {
        bail!("demo centre must be finite");
    }
    let at = |distance_m: f64, bearing_deg: f64, elevation_m: f64| {
        let (lat, lon) = offset_by_bearing(center_lat, center_lon, distance_m, bearing_deg.to_radians());
        Coordinate3D::new(lon, lat, elevation_m)
    };
    let ring = |east_m: f64, north_m: f64, half_m: f64| -> Vec<[f64; 2]> {
        [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0)]
            .iter()
            .map(|(dx, dy)| {
                let (lat, lon) = fa_core::spatial::offset_position(
                    center_lat,
                    center_lon,
                    north_m + dy * half_m,
                    east_m + dx * half_m,
                );
                [lon, lat]
            })
            .collect()
    };

    let path = FlightPath::new(vec![
        at(600.0, 270.0, 80.0),
        at(0.0, 0.0, 90.0),
        at(600.0, 90.0, 80.0),
    ])?;

    let polygon = |id: &str, east_m: f64, half_m: f64, density: f64| PopulationPolygon {
        id: id.to_string(),
        exterior: ring(east_m, 0.0, half_m),
        holes: Vec::new(),
        area_km2: 0.0,
        population_density: density,
        land_use_category: None,
    };

    Ok(Scenario {
        name: Some("demo".to_string()),
        path,
        stations: vec![
            Station {
                id: "gcs".to_string(),
                station_type: StationType::GroundControlStation,
                position: at(650.0, 260.0, 2.0),
            },
            Station {
                id: "repeater".to_string(),
                station_type: StationType::Repeater,
                position: at(300.0, 120.0, 30.0),
            },
        ],
        towers: Vec::new(),
        tower_filter: TowerFilter::default(),
        terrain: TerrainSpec::default(),
        polygons: vec![
            polygon("farmland", -400.0, 150.0, 3.0),
            polygon("town", 0.0, 100.0, 1800.0),
            polygon("suburb", 400.0, 120.0, 300.0),
        ],
        aircraft: Some(AircraftConfiguration {
            aircraft_type: "quadcopter".to_string(),
            max_dimension_m: 1.2,
            max_speed_mps: 18.0,
            operation_type: OperationType::Bvlos,
            operation_altitude_agl_m: 80.0,
        }),
        visibility: VisibilityOptions {
            sample_interval_m: Some(50.0),
            ..VisibilityOptions::default()
        },
        estimator: EstimatorOptions::default(),
        buffer_m: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fa_core::GroundRiskClass;

    #[tokio::test]
    async fn demo_visibility_is_fully_covered_on_flat_ground() {
        let scenario = demo_scenario(-33.8688, 151.2093).unwrap();
        let mut last = 0.0;
        let report = scenario
            .run_visibility(&CancellationToken::new(), |p| last = p)
            .await
            .unwrap();
        assert!((report.stats.coverage_percentage - 100.0).abs() < 1e-9);
        assert_eq!(report.stats.station_stats.len(), 2);
        assert_eq!(last, 100.0);
    }

    #[test]
    fn demo_ground_risk_classifies_each_block() {
        let scenario = demo_scenario(-33.8688, 151.2093).unwrap();
        let output = scenario.run_ground_risk(&IgrcTable::standard()).unwrap();
        assert_eq!(output.buffer_m, 80.0);
        assert_eq!(output.intersections.results.len(), 3);
        assert_eq!(output.ground_risk.table_key, "BVLOS-3");
        let classes: Vec<GroundRiskClass> = output
            .ground_risk
            .breakdown
            .iter()
            .map(|b| b.ground_risk_class)
            .collect();
        assert_eq!(
            classes,
            vec![
                GroundRiskClass::ScarcelyPopulated,
                GroundRiskClass::SparselyPopulated,
                GroundRiskClass::Suburban,
            ]
        );
    }

    #[test]
    fn scenario_round_trips_through_json() {
        let scenario = demo_scenario(47.0, 8.0).unwrap();
        let text = serde_json::to_string(&scenario).unwrap();
        let parsed: Scenario = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.path, scenario.path);
        assert_eq!(parsed.polygons.len(), 3);
    }

    #[test]
    fn ground_risk_needs_aircraft() {
        let mut scenario = demo_scenario(47.0, 8.0).unwrap();
        scenario.aircraft = None;
        assert!(scenario.run_ground_risk(&IgrcTable::standard()).is_err());
    }

    #[test]
    fn minimal_scenario_uses_defaults() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"path":[{"lon":8.0,"lat":47.0,"elevation_m":50.0},{"lon":8.01,"lat":47.0,"elevation_m":50.0}]}"#,
        )
        .unwrap();
        assert_eq!(scenario.terrain, TerrainSpec::Flat { elevation_m: 0.0 });
        assert!(scenario.stations.is_empty());
        assert!(scenario.visibility.sample_interval_m.is_none());
    }

    #[tokio::test]
    async fn tower_sites_join_the_station_list() {
        let mut scenario: Scenario = serde_json::from_str(
            r#"{
                "path": [{"lon":8.0,"lat":47.0,"elevation_m":120.0},{"lon":8.01,"lat":47.0,"elevation_m":120.0}],
                "terrain": {"kind":"flat","elevation_m":400.0},
                "towers": [
                    {"id":"77","name":"Hill 5G","lon":8.005,"lat":46.998,
                     "devices":[{"client_id":"1561","height_m":35.0}]},
                    {"id":"78","lon":8.006,"lat":46.998,
                     "devices":[{"licensee":"Vodafone Hutchison","frequency_hz":2.1e9}]}
                ],
                "tower_filter": {"carriers":["optus"]}
            }"#,
        )
        .unwrap();
        scenario.visibility.sample_interval_m = Some(100.0);

        let stations = scenario.stations_over(&fa_core::FlatTerrain::new(400.0));
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "tower-77");
        assert_eq!(stations[0].position.elevation_m, 435.0);

        // Flight altitude is below the flat ground, so nothing is visible.
        let report = scenario
            .run_visibility(&CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.stats.station_stats.len(), 1);
        assert_eq!(report.stats.coverage_percentage, 0.0);
    }
}

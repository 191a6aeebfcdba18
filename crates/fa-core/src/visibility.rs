//! Flight-path visibility analysis against a set of ground stations.
//!
//! Every analysed coordinate is tested against every station with the LOS
//! profiler. Terrain for the whole Cartesian product of (coordinate, station)
//! profiles is fetched in one batch up front, so the classification pass never
//! waits on the elevation provider and runs against a frozen snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::elevation::{ElevationSource, ElevationTable};
use crate::error::AnalysisError;
use crate::los::{distance_and_bearing, los_profile, profile_sample_points, LosOptions};
use crate::models::{Coordinate3D, FlightPath, GeoPoint, Station, StationType, VisibilitySegment};
use crate::spatial::{planar_distance, planar_length};

/// Share of the progress range spent on the terrain batch.
const FETCH_PROGRESS: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityOptions {
    /// Densify the path to this spacing before analysis. Leave unset when the
    /// producer already emits a dense (e.g. terrain-following) path.
    pub sample_interval_m: Option<f64>,
    pub los: LosOptions,
    /// Station/point pairs further apart than this are not profiled
    pub max_range_m: Option<f64>,
    /// Missing-sample ratio above which the result is flagged as degraded
    pub degraded_fidelity_threshold: f64,
}

impl Default for VisibilityOptions {
    fn default() -> Self {
        Self {
            sample_interval_m: None,
            los: LosOptions::default(),
            max_range_m: None,
            degraded_fidelity_threshold: 0.05,
        }
    }
}

/// Visibility of one analysed coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointVisibility {
    pub coordinate: Coordinate3D,
    pub visible: bool,
    pub station_indices: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationCoverage {
    pub station_index: usize,
    pub station_id: String,
    pub station_type: StationType,
    pub visible_length_m: f64,
    pub coverage_percentage: f64,
    pub visible_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationTypeCoverage {
    pub station_type: StationType,
    pub station_count: usize,
    pub visible_length_m: f64,
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityStats {
    pub total_length_m: f64,
    pub visible_length_m: f64,
    pub coverage_percentage: f64,
    pub analysis_time_ms: u64,
    pub point_count: usize,
    pub visible_point_count: usize,
    /// Coordinates that formed single-point runs and were not emitted
    pub discarded_points: usize,
    pub pruned_pairs: usize,
    pub elevation_samples: usize,
    pub missing_elevation_samples: usize,
    pub station_stats: Vec<StationCoverage>,
    pub station_type_stats: Vec<StationTypeCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityReport {
    pub segments: Vec<VisibilitySegment>,
    pub points: Vec<PointVisibility>,
    pub stats: VisibilityStats,
    /// Set when too many terrain samples were unavailable
    pub degraded_fidelity: bool,
}

/// Densify a path, interpolating altitude within each source segment.
///
/// Altitude steps between source segments are preserved exactly because every
/// source vertex is emitted unchanged.
pub fn resample_path(coordinates: &[Coordinate3D], interval_m: f64) -> Vec<Coordinate3D> {
    if coordinates.len() < 2 || !interval_m.is_finite() || interval_m <= 0.0 {
        return coordinates.to_vec();
    }

    let mut out = Vec::with_capacity(coordinates.len());
    for pair in coordinates.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let length = planar_distance(&a, &b);
        // Tolerate rounding in the measured length so exact multiples do not gain a step.
        let steps = (length / interval_m - 1e-6).ceil().max(1.0) as usize;
        for k in 0..steps {
            let t = k as f64 / steps as f64;
            out.push(Coordinate3D::new(
                a.lon + (b.lon - a.lon) * t,
                a.lat + (b.lat - a.lat) * t,
                a.elevation_m + (b.elevation_m - a.elevation_m) * t,
            ));
        }
    }
    if let Some(last) = coordinates.last() {
        out.push(*last);
    }
    out
}

/// Merge per-coordinate visibility into segments of at least two coordinates.
///
/// Returns the segments and the number of coordinates dropped as single-point runs.
pub fn build_segments(points: &[PointVisibility]) -> (Vec<VisibilitySegment>, usize) {
    let mut segments = Vec::new();
    let mut discarded = 0usize;
    let mut start = 0usize;

    while start < points.len() {
        let visible = points[start].visible;
        let mut end = start;
        while end + 1 < points.len() && points[end + 1].visible == visible {
            end += 1;
        }

        if end > start {
            let run = &points[start..=end];
            let coordinates: Vec<Coordinate3D> = run.iter().map(|p| p.coordinate).collect();
            let station_indices = run
                .iter()
                .flat_map(|p| p.station_indices.iter().copied())
                .collect();
            segments.push(VisibilitySegment {
                start_index: start,
                end_index: end,
                visible,
                station_indices,
                length_m: planar_length(&coordinates),
                coordinates,
            });
        } else {
            discarded += 1;
        }
        start = end + 1;
    }

    (segments, discarded)
}

/// Analyse which parts of `path` are in line of sight of at least one station.
///
/// `progress` receives values in `0..=100`. Cancellation is honoured while the
/// terrain batch is in flight and between coordinates; a cancelled run returns
/// [`AnalysisError::Cancelled`] and no partial data.
pub async fn analyze_flight_path_visibility<S, P>(
    path: &FlightPath,
    stations: &[Station],
    source: &S,
    options: &VisibilityOptions,
    cancel: &CancellationToken,
    mut progress: P,
) -> Result<VisibilityReport, AnalysisError>
where
    S: ElevationSource,
    P: FnMut(f64) + Send,
{
    let prepared =
        PreparedVisibility::prepare(path, stations, source, options, cancel, &mut progress).await?;
    prepared.classify(stations, options, cancel, progress)
}

/// A visibility run whose terrain has been fetched.
///
/// Splitting the run lets callers move the CPU-bound [`classify`] pass onto a
/// blocking thread while the fetch stays on the async runtime.
///
/// [`classify`]: PreparedVisibility::classify
#[derive(Debug)]
pub struct PreparedVisibility {
    coordinates: Vec<Coordinate3D>,
    in_range: Vec<Vec<bool>>,
    pruned_pairs: usize,
    table: ElevationTable,
    started: Instant,
}

impl PreparedVisibility {
    /// Validate inputs, resample the path and fetch terrain for every profile.
    ///
    /// Fails with [`AnalysisError::ElevationUnavailable`] when the source cannot
    /// load the area at all; nothing is classified in that case.
    pub async fn prepare<S, P>(
        path: &FlightPath,
        stations: &[Station],
        source: &S,
        options: &VisibilityOptions,
        cancel: &CancellationToken,
        progress: &mut P,
    ) -> Result<Self, AnalysisError>
    where
        S: ElevationSource,
        P: FnMut(f64) + Send,
    {
        let started = Instant::now();

        if stations.is_empty() {
            return Err(AnalysisError::InvalidInput("no stations configured".to_string()));
        }
        if let Some(station) = stations.iter().find(|s| !s.position.is_finite()) {
            return Err(AnalysisError::InvalidInput(format!(
                "station {} has a non-finite position",
                station.id
            )));
        }
        if path.length_m() <= f64::EPSILON {
            return Err(AnalysisError::InvalidInput(
                "flight path has degenerate geometry (zero length)".to_string(),
            ));
        }

        let coordinates = match options.sample_interval_m {
            Some(interval) => resample_path(path.coordinates(), interval),
            None => path.coordinates().to_vec(),
        };

        tracing::info!(
            "Visibility analysis: {} points x {} stations",
            coordinates.len(),
            stations.len()
        );
        progress(0.0);

        source.ensure_ready().await.map_err(elevation_unavailable)?;

        // Which (point, station) pairs need a profile at all.
        let mut pruned_pairs = 0usize;
        let mut in_range: Vec<Vec<bool>> = Vec::with_capacity(coordinates.len());
        let mut sample_points: Vec<GeoPoint> = Vec::new();
        for coordinate in &coordinates {
            let mut row = Vec::with_capacity(stations.len());
            for station in stations {
                let (distance, _) = distance_and_bearing(&station.position, coordinate);
                let reachable = options.max_range_m.map(|max| distance <= max).unwrap_or(true);
                if reachable {
                    sample_points.extend(
                        profile_sample_points(
                            &station.position,
                            coordinate,
                            options.los.sample_distance_m,
                        )
                        .into_iter()
                        .map(|(_, point)| point),
                    );
                } else {
                    pruned_pairs += 1;
                }
                row.push(reachable);
            }
            in_range.push(row);
        }

        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let table = tokio::select! {
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            table = ElevationTable::fetch(source, &sample_points) => {
                table.map_err(elevation_unavailable)?
            }
        };
        drop(sample_points);
        progress(FETCH_PROGRESS);

        Ok(Self {
            coordinates,
            in_range,
            pruned_pairs,
            table,
            started,
        })
    }

    pub fn point_count(&self) -> usize {
        self.coordinates.len()
    }

    /// Classify every coordinate against the frozen terrain table.
    pub fn classify<P>(
        self,
        stations: &[Station],
        options: &VisibilityOptions,
        cancel: &CancellationToken,
        mut progress: P,
    ) -> Result<VisibilityReport, AnalysisError>
    where
        P: FnMut(f64),
    {
        if self.in_range.iter().any(|row| row.len() != stations.len()) {
            return Err(AnalysisError::InvalidInput(
                "station list changed between preparation and classification".to_string(),
            ));
        }

        let mut points = Vec::with_capacity(self.coordinates.len());
        let mut tested_samples = 0usize;
        let mut missing_samples = 0usize;
        let total = self.coordinates.len().max(1) as f64;

        for (idx, coordinate) in self.coordinates.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Visibility analysis cancelled at point {}", idx);
                return Err(AnalysisError::Cancelled);
            }

            let mut station_indices = BTreeSet::new();
            for (station_idx, station) in stations.iter().enumerate() {
                if !self.in_range[idx][station_idx] {
                    continue;
                }
                let profile = los_profile(&station.position, coordinate, &options.los, &self.table);
                tested_samples += profile.tested_samples;
                missing_samples += profile.missing_samples;
                if profile.clear {
                    station_indices.insert(station_idx);
                }
            }

            points.push(PointVisibility {
                coordinate: *coordinate,
                visible: !station_indices.is_empty(),
                station_indices,
            });
            progress(FETCH_PROGRESS + (100.0 - FETCH_PROGRESS) * (idx + 1) as f64 / total);
        }
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let (segments, discarded_points) = build_segments(&points);
        let stats = compute_stats(
            &points,
            stations,
            StatsInputs {
                analysis_time_ms: self.started.elapsed().as_millis() as u64,
                discarded_points,
                pruned_pairs: self.pruned_pairs,
                tested_samples,
                missing_samples,
            },
        );

        let missing_ratio = if tested_samples > 0 {
            missing_samples as f64 / tested_samples as f64
        } else {
            0.0
        };
        let degraded_fidelity = missing_ratio > options.degraded_fidelity_threshold;
        if degraded_fidelity {
            tracing::warn!(
                "Visibility analysis degraded: {}/{} terrain samples unavailable",
                missing_samples,
                tested_samples
            );
        }

        tracing::info!(
            "Visibility analysis done: {} segments, {:.1}% coverage in {} ms",
            segments.len(),
            stats.coverage_percentage,
            stats.analysis_time_ms
        );

        Ok(VisibilityReport {
            segments,
            points,
            stats,
            degraded_fidelity,
        })
    }
}

fn elevation_unavailable(err: AnalysisError) -> AnalysisError {
    match err {
        AnalysisError::ElevationUnavailable(_) | AnalysisError::Cancelled => err,
        other => AnalysisError::ElevationUnavailable(other.to_string()),
    }
}

struct StatsInputs {
    analysis_time_ms: u64,
    discarded_points: usize,
    pruned_pairs: usize,
    tested_samples: usize,
    missing_samples: usize,
}

fn percentage(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        (part / total * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn compute_stats(
    points: &[PointVisibility],
    stations: &[Station],
    inputs: StatsInputs,
) -> VisibilityStats {
    // Every path edge counts, weighted by the share of its two endpoints that
    // are visible, so single-point runs still move the coverage figure.
    let station_types: BTreeSet<StationType> = stations.iter().map(|s| s.station_type).collect();
    let mut total_length_m = 0.0f64;
    let mut visible_length_m = 0.0f64;
    let mut station_lengths = vec![0.0f64; stations.len()];
    let mut type_lengths: BTreeMap<StationType, f64> = BTreeMap::new();
    for pair in points.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let edge = planar_distance(&a.coordinate, &b.coordinate);
        total_length_m += edge;
        visible_length_m += edge * endpoint_share(a.visible, b.visible);
        for (idx, length) in station_lengths.iter_mut().enumerate() {
            let share = endpoint_share(a.station_indices.contains(&idx), b.station_indices.contains(&idx));
            *length += edge * share;
        }
        for &station_type in &station_types {
            let sees = |p: &PointVisibility| {
                p.station_indices
                    .iter()
                    .any(|&i| stations[i].station_type == station_type)
            };
            *type_lengths.entry(station_type).or_insert(0.0) += edge * endpoint_share(sees(a), sees(b));
        }
    }

    let station_stats = stations
        .iter()
        .enumerate()
        .map(|(idx, station)| StationCoverage {
            station_index: idx,
            station_id: station.id.clone(),
            station_type: station.station_type,
            visible_length_m: station_lengths[idx],
            coverage_percentage: percentage(station_lengths[idx], total_length_m),
            visible_points: points.iter().filter(|p| p.station_indices.contains(&idx)).count(),
        })
        .collect();

    let mut type_counts: BTreeMap<StationType, usize> = BTreeMap::new();
    for station in stations {
        *type_counts.entry(station.station_type).or_insert(0) += 1;
    }
    let station_type_stats = type_counts
        .into_iter()
        .map(|(station_type, station_count)| {
            let length = type_lengths.get(&station_type).copied().unwrap_or(0.0);
            StationTypeCoverage {
                station_type,
                station_count,
                visible_length_m: length,
                coverage_percentage: percentage(length, total_length_m),
            }
        })
        .collect();

    VisibilityStats {
        total_length_m,
        visible_length_m,
        coverage_percentage: percentage(visible_length_m, total_length_m),
        analysis_time_ms: inputs.analysis_time_ms,
        point_count: points.len(),
        visible_point_count: points.iter().filter(|p| p.visible).count(),
        discarded_points: inputs.discarded_points,
        pruned_pairs: inputs.pruned_pairs,
        elevation_samples: inputs.tested_samples,
        missing_elevation_samples: inputs.missing_samples,
        station_stats,
        station_type_stats,
    }
}

fn endpoint_share(a: bool, b: bool) -> f64 {
    match (a, b) {
        (true, true) => 1.0,
        (false, false) => 0.0,
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::{FlatTerrain, TerrainLookup};
    use crate::spatial::offset_position;
    use std::time::Duration;

    const LAT: f64 = -35.2809;
    const LON: f64 = 149.13;

    fn at(east_m: f64, north_m: f64, elevation_m: f64) -> Coordinate3D {
        let (lat, lon) = offset_position(LAT, LON, north_m, east_m);
        Coordinate3D::new(lon, lat, elevation_m)
    }

    fn point(visible: bool, stations: &[usize], east_m: f64) -> PointVisibility {
        PointVisibility {
            coordinate: at(east_m, 0.0, 50.0),
            visible,
            station_indices: stations.iter().copied().collect(),
        }
    }

    #[test]
    fn resample_keeps_source_vertices_and_altitude_steps() {
        let source = vec![at(0.0, 0.0, 50.0), at(100.0, 0.0, 50.0), at(200.0, 0.0, 80.0)];
        let dense = resample_path(&source, 25.0);
        assert_eq!(dense.len(), 9);
        assert_eq!(dense[0], source[0]);
        assert_eq!(dense[4], source[1]);
        assert_eq!(dense[8], source[2]);
        // First source segment is level; the climb only starts after vertex 1.
        assert!(dense[..=4].iter().all(|c| (c.elevation_m - 50.0).abs() < 1e-9));
        assert!((dense[6].elevation_m - 65.0).abs() < 1e-9);
    }

    #[test]
    fn segments_discard_single_point_runs() {
        let points = vec![
            point(true, &[0], 0.0),
            point(true, &[1], 10.0),
            point(false, &[], 20.0),
            point(true, &[0], 30.0),
            point(true, &[0], 40.0),
            point(false, &[], 50.0),
            point(false, &[], 60.0),
        ];
        let (segments, discarded) = build_segments(&points);
        assert_eq!(discarded, 1);
        assert_eq!(segments.len(), 3);
        assert_eq!((segments[0].start_index, segments[0].end_index), (0, 1));
        assert_eq!(segments[0].station_indices, [0, 1].into_iter().collect());
        assert_eq!((segments[1].start_index, segments[1].end_index), (3, 4));
        assert!(!segments[2].visible);
        assert!(segments[2].station_indices.is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_stations_and_degenerate_paths() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(100.0, 0.0, 50.0)]).unwrap();
        let err = analyze_flight_path_visibility(
            &path,
            &[],
            &FlatTerrain::new(0.0),
            &VisibilityOptions::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(msg) if msg.contains("stations")));

        let stationary = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(0.0, 0.0, 60.0)]).unwrap();
        let station = Station {
            id: "gcs".to_string(),
            station_type: StationType::GroundControlStation,
            position: at(0.0, 0.0, 2.0),
        };
        let err = analyze_flight_path_visibility(
            &stationary,
            &[station],
            &FlatTerrain::new(0.0),
            &VisibilityOptions::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(msg) if msg.contains("degenerate")));
    }

    #[tokio::test]
    async fn cancelled_run_returns_no_result() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(500.0, 0.0, 50.0)]).unwrap();
        let station = Station {
            id: "obs".to_string(),
            station_type: StationType::Observer,
            position: at(0.0, -100.0, 2.0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = analyze_flight_path_visibility(
            &path,
            &[station],
            &FlatTerrain::new(0.0),
            &VisibilityOptions::default(),
            &cancel,
            |_| {},
        )
        .await;
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    }

    #[tokio::test]
    async fn max_range_prunes_distant_pairs() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(1000.0, 0.0, 50.0)]).unwrap();
        let station = Station {
            id: "rpt".to_string(),
            station_type: StationType::Repeater,
            position: at(0.0, 0.0, 2.0),
        };
        let options = VisibilityOptions {
            sample_interval_m: Some(100.0),
            max_range_m: Some(550.0),
            ..VisibilityOptions::default()
        };
        let report = analyze_flight_path_visibility(
            &path,
            &[station],
            &FlatTerrain::new(0.0),
            &options,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(report.stats.pruned_pairs, 5);
        assert_eq!(report.segments.len(), 2);
        assert!(report.segments[0].visible);
        assert!(!report.segments[1].visible);
        assert!(report.stats.coverage_percentage > 0.0 && report.stats.coverage_percentage < 100.0);
    }

    #[tokio::test]
    async fn per_station_coverage_is_tracked_independently() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(1000.0, 0.0, 50.0)]).unwrap();
        let near = Station {
            id: "gcs".to_string(),
            station_type: StationType::GroundControlStation,
            position: at(0.0, 0.0, 2.0),
        };
        let far = Station {
            id: "obs".to_string(),
            station_type: StationType::Observer,
            position: at(1000.0, 0.0, 2.0),
        };
        let options = VisibilityOptions {
            sample_interval_m: Some(100.0),
            max_range_m: Some(450.0),
            ..VisibilityOptions::default()
        };
        let report = analyze_flight_path_visibility(
            &path,
            &[near, far],
            &FlatTerrain::new(0.0),
            &options,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

        // Points 0..=4 see the near station, 6..=10 the far one, 5 sees neither.
        assert_eq!(report.stats.discarded_points, 1);
        let gcs = &report.stats.station_stats[0];
        let obs = &report.stats.station_stats[1];
        assert_eq!(gcs.visible_points, 5);
        assert_eq!(obs.visible_points, 5);
        assert!(gcs.coverage_percentage < report.stats.coverage_percentage);
        assert!((gcs.coverage_percentage - obs.coverage_percentage).abs() < 1.0);
        assert_eq!(report.stats.station_type_stats.len(), 2);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_completes() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(300.0, 0.0, 50.0)]).unwrap();
        let station = Station {
            id: "gcs".to_string(),
            station_type: StationType::GroundControlStation,
            position: at(0.0, -50.0, 2.0),
        };
        let mut seen = Vec::new();
        analyze_flight_path_visibility(
            &path,
            &[station],
            &FlatTerrain::new(0.0),
            &VisibilityOptions { sample_interval_m: Some(50.0), ..VisibilityOptions::default() },
            &CancellationToken::new(),
            |p| seen.push(p),
        )
        .await
        .unwrap();
        assert_eq!(seen.first().copied(), Some(0.0));
        assert!((seen.last().copied().unwrap() - 100.0).abs() < 1e-9);
        assert!(seen.windows(2).all(|w| w[1] >= w[0]));
    }

    fn observer() -> Station {
        Station {
            id: "obs".to_string(),
            station_type: StationType::Observer,
            position: at(0.0, -100.0, 2.0),
        }
    }

    fn stats_for(points: &[PointVisibility]) -> VisibilityStats {
        let (_, discarded_points) = build_segments(points);
        compute_stats(
            points,
            &[observer()],
            StatsInputs {
                analysis_time_ms: 0,
                discarded_points,
                pruned_pairs: 0,
                tested_samples: 0,
                missing_samples: 0,
            },
        )
    }

    #[test]
    fn lone_occluded_point_lowers_coverage() {
        let points: Vec<PointVisibility> = (0..11)
            .map(|i| {
                let visible = i != 5;
                let stations: &[usize] = if visible { &[0] } else { &[] };
                point(visible, stations, i as f64 * 10.0)
            })
            .collect();
        let stats = stats_for(&points);
        assert_eq!(stats.discarded_points, 1);
        assert!(stats.coverage_percentage < 100.0);
        assert!((stats.coverage_percentage - 90.0).abs() < 0.01, "{}", stats.coverage_percentage);
        assert!((stats.total_length_m - 100.0).abs() < 0.01);
        assert!((stats.station_stats[0].coverage_percentage - 90.0).abs() < 0.01);
    }

    #[test]
    fn alternating_visibility_counts_half_of_each_edge() {
        let pattern = [true, false, true, false, true];
        let points: Vec<PointVisibility> = pattern
            .iter()
            .enumerate()
            .map(|(i, &visible)| {
                let stations: &[usize] = if visible { &[0] } else { &[] };
                point(visible, stations, i as f64 * 10.0)
            })
            .collect();
        let (segments, discarded) = build_segments(&points);
        assert!(segments.is_empty());
        assert_eq!(discarded, 5);

        let stats = stats_for(&points);
        assert!(stats.coverage_percentage > 0.0);
        assert!((stats.coverage_percentage - 50.0).abs() < 0.01, "{}", stats.coverage_percentage);

        let hidden: Vec<PointVisibility> = (0..5).map(|i| point(false, &[], i as f64 * 10.0)).collect();
        assert_eq!(stats_for(&hidden).coverage_percentage, 0.0);
    }

    #[tokio::test]
    async fn cancel_between_points_discards_partial_work() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(1000.0, 0.0, 50.0)]).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut calls = 0usize;
        let result = analyze_flight_path_visibility(
            &path,
            &[observer()],
            &FlatTerrain::new(0.0),
            &VisibilityOptions { sample_interval_m: Some(50.0), ..VisibilityOptions::default() },
            &cancel,
            |p| {
                calls += 1;
                if p > 60.0 {
                    trigger.cancel();
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
        // 0, fetch, and roughly half of the 21 points before the run stopped.
        assert!(calls > 2 && calls < 23, "{calls} progress calls");
    }

    struct StalledTerrain;

    impl TerrainLookup for StalledTerrain {
        fn elevation(&self, _lon: f64, _lat: f64) -> Option<f64> {
            Some(0.0)
        }
    }

    impl ElevationSource for StalledTerrain {
        async fn preload_area(&self, _coordinates: &[Coordinate3D]) -> Result<(), AnalysisError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_while_terrain_is_loading() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(500.0, 0.0, 50.0)]).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut furthest = 0.0f64;
        let result = analyze_flight_path_visibility(
            &path,
            &[observer()],
            &StalledTerrain,
            &VisibilityOptions::default(),
            &cancel,
            |p| furthest = furthest.max(p),
        )
        .await;
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
        assert_eq!(furthest, 0.0);
    }

    struct OfflineTerrain;

    impl TerrainLookup for OfflineTerrain {
        fn elevation(&self, _lon: f64, _lat: f64) -> Option<f64> {
            None
        }
    }

    impl ElevationSource for OfflineTerrain {
        async fn preload_area(&self, _coordinates: &[Coordinate3D]) -> Result<(), AnalysisError> {
            Err(AnalysisError::ElevationUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn unreachable_terrain_aborts_before_classification() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(500.0, 0.0, 50.0)]).unwrap();
        let mut furthest = 0.0f64;
        let result = analyze_flight_path_visibility(
            &path,
            &[observer()],
            &OfflineTerrain,
            &VisibilityOptions::default(),
            &CancellationToken::new(),
            |p| furthest = furthest.max(p),
        )
        .await;
        assert!(matches!(result, Err(AnalysisError::ElevationUnavailable(_))));
        assert_eq!(furthest, 0.0);
    }

    #[tokio::test]
    async fn prepared_run_classifies_on_a_blocking_thread() {
        let path = FlightPath::new(vec![at(0.0, 0.0, 50.0), at(400.0, 0.0, 50.0)]).unwrap();
        let stations = vec![observer()];
        let options = VisibilityOptions { sample_interval_m: Some(100.0), ..VisibilityOptions::default() };
        let cancel = CancellationToken::new();
        let prepared = PreparedVisibility::prepare(
            &path,
            &stations,
            &FlatTerrain::new(0.0),
            &options,
            &cancel,
            &mut |_: f64| {},
        )
        .await
        .unwrap();
        assert_eq!(prepared.point_count(), 5);

        let report = tokio::task::spawn_blocking(move || {
            prepared.classify(&stations, &options, &cancel, |_| {})
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report.points.len(), 5);
        assert_eq!(report.stats.coverage_percentage, 100.0);
    }
}

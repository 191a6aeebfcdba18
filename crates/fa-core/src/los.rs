//! Line-of-sight profiling between two 3-D points over terrain.
//!
//! The straight line between observer and target is sampled at a fixed
//! horizontal spacing. At each interior sample the ray altitude is linearly
//! interpolated between the endpoint elevations and compared with the terrain
//! plus a required vertical clearance.

use serde::{Deserialize, Serialize};

use crate::elevation::TerrainLookup;
use crate::models::{Coordinate3D, GeoPoint};
use crate::spatial::{
    bearing, haversine_distance, offset_by_bearing, planar_distance, EARTH_RADIUS_M,
    PLANAR_LIMIT_M,
};

/// Effective earth radius for standard atmospheric refraction (4/3 model).
const EFFECTIVE_EARTH_RADIUS_M: f64 = EARTH_RADIUS_M * 4.0 / 3.0;

/// Observer and target closer than this are trivially in sight.
const COINCIDENT_DISTANCE_M: f64 = 0.01;

const MIN_SAMPLE_DISTANCE_M: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LosOptions {
    /// Horizontal spacing between profile samples
    pub sample_distance_m: f64,
    /// Required clearance between the ray and the terrain
    pub minimum_offset_m: f64,
    /// Apply the 4/3-radius earth curvature drop to the terrain
    pub earth_curvature: bool,
}

impl Default for LosOptions {
    fn default() -> Self {
        Self {
            sample_distance_m: 30.0,
            minimum_offset_m: 1.0,
            earth_curvature: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    /// Horizontal distance from the observer
    pub distance_m: f64,
    pub lon: f64,
    pub lat: f64,
    /// Ground elevation, `None` when the source has no data here
    pub terrain_m: Option<f64>,
    pub los_altitude_m: f64,
    /// Ray altitude minus (terrain + offset); negative means occluded
    pub clearance_m: Option<f64>,
    pub occluded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosProfile {
    pub clear: bool,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub samples: Vec<ProfileSample>,
    pub first_obstruction: Option<ProfileSample>,
    /// Interior samples with no terrain data (treated as non-occluding)
    pub missing_samples: usize,
    /// Interior samples that were tested for occlusion
    pub tested_samples: usize,
}

/// Horizontal distance and bearing (degrees) from `observer` to `target`.
pub fn distance_and_bearing(observer: &Coordinate3D, target: &Coordinate3D) -> (f64, f64) {
    let great_circle = haversine_distance(observer.lat, observer.lon, target.lat, target.lon);
    let distance = if great_circle < PLANAR_LIMIT_M {
        planar_distance(observer, target)
    } else {
        great_circle
    };
    let bearing_deg = bearing(observer.lat, observer.lon, target.lat, target.lon)
        .to_degrees()
        .rem_euclid(360.0);
    (distance, bearing_deg)
}

/// Deterministic sample positions `(distance_m, point)` along the observer→target line,
/// inclusive of both endpoints.
///
/// Batched elevation pre-fetch and [`los_profile`] both call this so they query
/// exactly the same coordinates.
pub fn profile_sample_points(
    observer: &Coordinate3D,
    target: &Coordinate3D,
    sample_distance_m: f64,
) -> Vec<(f64, GeoPoint)> {
    let (distance, bearing_deg) = distance_and_bearing(observer, target);
    if !distance.is_finite() || distance < COINCIDENT_DISTANCE_M {
        return vec![(0.0, observer.horizontal())];
    }

    let spacing = if sample_distance_m.is_finite() {
        sample_distance_m.max(MIN_SAMPLE_DISTANCE_M)
    } else {
        MIN_SAMPLE_DISTANCE_M
    };
    let steps = (distance / spacing).ceil().max(1.0) as usize;
    let great_circle = distance >= PLANAR_LIMIT_M;
    let bearing_rad = bearing_deg.to_radians();

    (0..=steps)
        .map(|k| {
            let fraction = k as f64 / steps as f64;
            let d = distance * fraction;
            let point = if k == steps {
                target.horizontal()
            } else if great_circle {
                let (lat, lon) = offset_by_bearing(observer.lat, observer.lon, d, bearing_rad);
                GeoPoint { lon, lat }
            } else {
                GeoPoint {
                    lon: observer.lon + (target.lon - observer.lon) * fraction,
                    lat: observer.lat + (target.lat - observer.lat) * fraction,
                }
            };
            (d, point)
        })
        .collect()
}

/// Compute the terrain profile and clearance between `observer` and `target`.
///
/// Missing terrain samples never occlude. The endpoints are reported in the
/// profile but are not tested, since they are the observer and target themselves.
pub fn los_profile<T: TerrainLookup + ?Sized>(
    observer: &Coordinate3D,
    target: &Coordinate3D,
    options: &LosOptions,
    terrain: &T,
) -> LosProfile {
    let (distance, bearing_deg) = distance_and_bearing(observer, target);

    if !distance.is_finite() || distance < COINCIDENT_DISTANCE_M {
        return LosProfile {
            clear: true,
            distance_m: 0.0,
            bearing_deg,
            samples: Vec::new(),
            first_obstruction: None,
            missing_samples: 0,
            tested_samples: 0,
        };
    }

    let points = profile_sample_points(observer, target, options.sample_distance_m);
    let last = points.len().saturating_sub(1);
    let rise = target.elevation_m - observer.elevation_m;

    let mut samples = Vec::with_capacity(points.len());
    let mut first_obstruction = None;
    let mut missing_samples = 0usize;
    let mut tested_samples = 0usize;

    for (idx, (d, point)) in points.into_iter().enumerate() {
        let fraction = if distance > 0.0 { d / distance } else { 0.0 };
        let los_altitude_m = observer.elevation_m + rise * fraction;
        let terrain_m = terrain.elevation(point.lon, point.lat);
        let interior = idx > 0 && idx < last;

        let clearance_m = terrain_m.map(|ground| {
            let drop = if options.earth_curvature {
                d * (distance - d) / (2.0 * EFFECTIVE_EARTH_RADIUS_M)
            } else {
                0.0
            };
            los_altitude_m - (ground - drop + options.minimum_offset_m)
        });

        let occluded = interior && clearance_m.map(|c| c < 0.0).unwrap_or(false);
        if interior {
            tested_samples += 1;
            if terrain_m.is_none() {
                missing_samples += 1;
            }
        }

        let sample = ProfileSample {
            distance_m: d,
            lon: point.lon,
            lat: point.lat,
            terrain_m,
            los_altitude_m,
            clearance_m,
            occluded,
        };
        if occluded && first_obstruction.is_none() {
            first_obstruction = Some(sample);
        }
        samples.push(sample);
    }

    LosProfile {
        clear: first_obstruction.is_none(),
        distance_m: distance,
        bearing_deg,
        samples,
        first_obstruction,
        missing_samples,
        tested_samples,
    }
}

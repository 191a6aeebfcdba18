//! Flight corridor: the buffered region around the full flight line.
//!
//! Built in local east/north metres as the union of one stadium (capsule) per
//! path edge. Containment and outline distance are answered analytically from
//! the centreline, so they stay exact even where the polygon approximation of
//! the round caps is coarse.

use geo::{coord, BooleanOps, BoundingRect, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::AnalysisError;
use crate::models::FlightPath;
use crate::spatial::{point_ring_distance, LocalFrame};

pub const DEFAULT_CORRIDOR_FLOOR_M: f64 = 50.0;

/// Buffer width for an operation: the altitude AGL, never below `floor_m`.
pub fn corridor_buffer_m(operation_altitude_agl_m: f64, floor_m: f64) -> f64 {
    if operation_altitude_agl_m.is_finite() {
        operation_altitude_agl_m.max(floor_m)
    } else {
        floor_m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorridorOptions {
    /// Polygon vertices used for each semicircular cap
    pub cap_segments: usize,
}

impl Default for CorridorOptions {
    fn default() -> Self {
        Self { cap_segments: 16 }
    }
}

#[derive(Debug, Clone)]
pub struct Corridor {
    frame: LocalFrame,
    buffer_m: f64,
    centerline: Vec<(f64, f64)>,
    polygon: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl Corridor {
    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn buffer_m(&self) -> f64 {
        self.buffer_m
    }

    /// Corridor outline in local metres.
    pub fn polygon(&self) -> &MultiPolygon<f64> {
        &self.polygon
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn centerline(&self) -> &[(f64, f64)] {
        &self.centerline
    }

    /// Distance from a local point to the flight centreline.
    pub fn centerline_distance(&self, east_m: f64, north_m: f64) -> f64 {
        point_ring_distance((east_m, north_m), &self.centerline)
    }

    pub fn contains_point(&self, east_m: f64, north_m: f64) -> bool {
        self.centerline_distance(east_m, north_m) <= self.buffer_m
    }

    /// Unsigned distance from a local point to the corridor outline.
    pub fn outline_distance(&self, east_m: f64, north_m: f64) -> f64 {
        (self.centerline_distance(east_m, north_m) - self.buffer_m).abs()
    }

    pub fn contains_geographic(&self, lon: f64, lat: f64) -> bool {
        let (east, north) = self.frame.to_local(lon, lat);
        self.contains_point(east, north)
    }
}

/// Buffer `path` by `buffer_m` in `frame`.
pub fn build_corridor(
    path: &FlightPath,
    buffer_m: f64,
    frame: &LocalFrame,
    options: &CorridorOptions,
) -> Result<Corridor, AnalysisError> {
    if !buffer_m.is_finite() || buffer_m <= 0.0 {
        return Err(AnalysisError::InvalidInput(format!(
            "corridor buffer must be positive, got {buffer_m}"
        )));
    }

    let mut centerline: Vec<(f64, f64)> = Vec::with_capacity(path.len());
    for coordinate in path.coordinates() {
        let local = frame.to_local(coordinate.lon, coordinate.lat);
        let duplicate = centerline
            .last()
            .map(|last| (last.0 - local.0).hypot(last.1 - local.1) < 1e-6)
            .unwrap_or(false);
        if !duplicate {
            centerline.push(local);
        }
    }

    let cap_segments = options.cap_segments.max(4);
    // Circumscribed radius so the polygon never undercuts the true buffer.
    let radius = buffer_m / (PI / (2.0 * cap_segments as f64)).cos();

    let capsules: Vec<Polygon<f64>> = if centerline.len() == 1 {
        vec![disc(centerline[0], radius, cap_segments * 2)]
    } else {
        centerline
            .windows(2)
            .map(|pair| stadium(pair[0], pair[1], radius, cap_segments))
            .collect()
    };

    let polygon = union_all(capsules);
    let bounds = polygon.bounding_rect().ok_or_else(|| {
        AnalysisError::InvalidInput("flight corridor has no extent".to_string())
    })?;

    tracing::debug!(
        "Built corridor: {} centreline vertices, buffer {:.1} m",
        centerline.len(),
        buffer_m
    );

    Ok(Corridor {
        frame: *frame,
        buffer_m,
        centerline,
        polygon,
        bounds,
    })
}

fn union_all(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut iter = polygons.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon::new(Vec::new());
    };
    iter.fold(MultiPolygon::new(vec![first]), |acc, polygon| {
        acc.union(&MultiPolygon::new(vec![polygon]))
    })
}

fn disc(center: (f64, f64), radius: f64, segments: usize) -> Polygon<f64> {
    let ring: Vec<_> = (0..segments)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / segments as f64;
            coord! { x: center.0 + radius * angle.cos(), y: center.1 + radius * angle.sin() }
        })
        .collect();
    Polygon::new(LineString::new(ring), Vec::new())
}

/// Convex capsule around segment `a`-`b`, counter-clockwise.
fn stadium(a: (f64, f64), b: (f64, f64), radius: f64, cap_segments: usize) -> Polygon<f64> {
    let heading = (b.1 - a.1).atan2(b.0 - a.0);
    let mut ring = Vec::with_capacity(2 * (cap_segments + 1));

    // Cap around b sweeps from the right side to the left side of travel.
    for k in 0..=cap_segments {
        let angle = heading - PI / 2.0 + PI * k as f64 / cap_segments as f64;
        ring.push(coord! { x: b.0 + radius * angle.cos(), y: b.1 + radius * angle.sin() });
    }
    for k in 0..=cap_segments {
        let angle = heading + PI / 2.0 + PI * k as f64 / cap_segments as f64;
        ring.push(coord! { x: a.0 + radius * angle.cos(), y: a.1 + radius * angle.sin() });
    }
    Polygon::new(LineString::new(ring), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate3D;
    use geo::{Area, Contains, Point};

    fn straight_path(frame: &LocalFrame, length_m: f64) -> FlightPath {
        let (lon0, lat0) = frame.to_geographic(0.0, 0.0);
        let (lon1, lat1) = frame.to_geographic(length_m, 0.0);
        FlightPath::new(vec![
            Coordinate3D::new(lon0, lat0, 100.0),
            Coordinate3D::new(lon1, lat1, 100.0),
        ])
        .unwrap()
    }

    #[test]
    fn buffer_respects_floor() {
        assert_eq!(corridor_buffer_m(30.0, DEFAULT_CORRIDOR_FLOOR_M), 50.0);
        assert_eq!(corridor_buffer_m(120.0, DEFAULT_CORRIDOR_FLOOR_M), 120.0);
        assert_eq!(corridor_buffer_m(f64::NAN, DEFAULT_CORRIDOR_FLOOR_M), 50.0);
    }

    #[test]
    fn straight_corridor_area_matches_stadium() {
        let frame = LocalFrame::new(-33.86, 151.2);
        let path = straight_path(&frame, 1000.0);
        let corridor = build_corridor(&path, 50.0, &frame, &CorridorOptions::default()).unwrap();

        let expected = 1000.0 * 100.0 + PI * 50.0 * 50.0;
        let area = corridor.polygon().unsigned_area();
        assert!((area - expected).abs() / expected < 0.02, "area {area}");

        let bounds = corridor.bounds();
        assert!(bounds.min().x <= -50.0 && bounds.max().x >= 1050.0);
        assert!(bounds.min().y <= -50.0 && bounds.max().y >= 50.0);
    }

    #[test]
    fn containment_follows_centerline_distance() {
        let frame = LocalFrame::new(-33.86, 151.2);
        let path = straight_path(&frame, 1000.0);
        let corridor = build_corridor(&path, 50.0, &frame, &CorridorOptions::default()).unwrap();

        assert!(corridor.contains_point(500.0, 49.0));
        assert!(!corridor.contains_point(500.0, 51.0));
        assert!(corridor.contains_point(1030.0, 0.0));
        assert!((corridor.outline_distance(500.0, 0.0) - 50.0).abs() < 1e-6);
        assert!((corridor.outline_distance(500.0, 80.0) - 30.0).abs() < 1e-6);
        assert!(corridor.polygon().contains(&Point::new(500.0, 49.0)));
    }

    #[test]
    fn dogleg_path_produces_single_outline() {
        let frame = LocalFrame::new(-33.86, 151.2);
        let points = [(0.0, 0.0), (500.0, 0.0), (500.0, 500.0)];
        let coordinates = points
            .iter()
            .map(|&(e, n)| {
                let (lon, lat) = frame.to_geographic(e, n);
                Coordinate3D::new(lon, lat, 80.0)
            })
            .collect();
        let path = FlightPath::new(coordinates).unwrap();
        let corridor = build_corridor(&path, 60.0, &frame, &CorridorOptions::default()).unwrap();
        assert_eq!(corridor.polygon().0.len(), 1);
        assert!(corridor.contains_point(540.0, 540.0));
        assert!(!corridor.contains_point(250.0, 250.0));
    }

    #[test]
    fn stationary_path_is_a_disc() {
        let frame = LocalFrame::new(-33.86, 151.2);
        let (lon, lat) = frame.to_geographic(0.0, 0.0);
        let path = FlightPath::new(vec![
            Coordinate3D::new(lon, lat, 10.0),
            Coordinate3D::new(lon, lat, 90.0),
        ])
        .unwrap();
        let corridor = build_corridor(&path, 50.0, &frame, &CorridorOptions::default()).unwrap();
        let area = corridor.polygon().unsigned_area();
        assert!((area - PI * 2500.0).abs() / (PI * 2500.0) < 0.02);
    }

    #[test]
    fn rejects_non_positive_buffer() {
        let frame = LocalFrame::new(0.0, 0.0);
        let path = straight_path(&frame, 100.0);
        assert!(build_corridor(&path, 0.0, &frame, &CorridorOptions::default()).is_err());
    }
}

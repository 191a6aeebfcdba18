//! Spatial math for line-of-sight sampling, corridor building and path lengths.

use crate::models::Coordinate3D;

/// Mean earth radius used by the great-circle helpers.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Beyond this horizontal distance the LOS profiler switches from the planar
/// approximation to great-circle distance and bearing.
pub const PLANAR_LIMIT_M: f64 = 20_000.0;

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Calculate bearing from point 1 to point 2 in radians.
/// Returns bearing in radians, 0 = north, π/2 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Offset a position by meters in the north and east directions.
///
/// Returns `(new_lat, new_lon)` in degrees.
pub fn offset_position(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let distance_m = (north_m * north_m + east_m * east_m).sqrt();
    if distance_m <= f64::EPSILON {
        return (lat, lon);
    }
    let bearing_rad = east_m.atan2(north_m);
    offset_by_bearing(lat, lon, distance_m, bearing_rad)
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `lat`, `lon` - Starting position in degrees
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Local east/north projection around a reference latitude/longitude.
///
/// Accurate to well under a metre over the few-kilometre extents of a flight
/// corridor, which is all the corridor and intersection code needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    pub origin_lat: f64,
    pub origin_lon: f64,
    m_per_deg_lat: f64,
    m_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            m_per_deg_lat: meters_per_deg_lat(origin_lat).max(1e-9),
            m_per_deg_lon: meters_per_deg_lon(origin_lat).max(1e-9),
        }
    }

    /// Frame centred on the mean position of the given coordinates.
    pub fn around(coordinates: &[Coordinate3D]) -> Option<Self> {
        let finite: Vec<&Coordinate3D> = coordinates.iter().filter(|c| c.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let count = finite.len() as f64;
        let lat = finite.iter().map(|c| c.lat).sum::<f64>() / count;
        let lon = finite.iter().map(|c| c.lon).sum::<f64>() / count;
        Some(Self::new(lat, lon))
    }

    /// Project `(lon, lat)` to `(east_m, north_m)`.
    pub fn to_local(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.origin_lon) * self.m_per_deg_lon,
            (lat - self.origin_lat) * self.m_per_deg_lat,
        )
    }

    /// Inverse of [`LocalFrame::to_local`], returns `(lon, lat)`.
    pub fn to_geographic(&self, east_m: f64, north_m: f64) -> (f64, f64) {
        (
            self.origin_lon + east_m / self.m_per_deg_lon,
            self.origin_lat + north_m / self.m_per_deg_lat,
        )
    }

    /// Scale factor from square degrees to square kilometres at the origin.
    pub fn km2_per_deg2(&self) -> f64 {
        self.m_per_deg_lat * self.m_per_deg_lon / 1_000_000.0
    }
}

/// Horizontal planar distance between two coordinates, projected at their mid-latitude.
pub fn planar_distance(a: &Coordinate3D, b: &Coordinate3D) -> f64 {
    let mid_lat = (a.lat + b.lat) / 2.0;
    let dx = (b.lon - a.lon) * meters_per_deg_lon(mid_lat);
    let dy = (b.lat - a.lat) * meters_per_deg_lat(mid_lat);
    (dx * dx + dy * dy).sqrt()
}

/// Sum of planar edge lengths along a coordinate run.
pub fn planar_length(coordinates: &[Coordinate3D]) -> f64 {
    coordinates
        .windows(2)
        .map(|pair| planar_distance(&pair[0], &pair[1]))
        .sum()
}

/// Distance from a point to a segment, all in the same planar frame.
pub fn point_segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let sx = b.0 - a.0;
    let sy = b.1 - a.1;
    let px = p.0 - a.0;
    let py = p.1 - a.1;
    let seg_len_sq = sx * sx + sy * sy;

    if seg_len_sq < 1e-12 {
        // Segment is essentially a point
        return (px * px + py * py).sqrt();
    }

    let t = ((px * sx + py * sy) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * sx;
    let dy = py - t * sy;
    (dx * dx + dy * dy).sqrt()
}

/// Minimum distance from a point to a closed or open ring of planar coordinates.
pub fn point_ring_distance(p: (f64, f64), ring: &[(f64, f64)]) -> f64 {
    if ring.is_empty() {
        return f64::INFINITY;
    }
    if ring.len() == 1 {
        let dx = p.0 - ring[0].0;
        let dy = p.1 - ring[0].1;
        return (dx * dx + dy * dy).sqrt();
    }
    ring.windows(2)
        .map(|pair| point_segment_distance(p, pair[0], pair[1]))
        .fold(f64::INFINITY, f64::min)
}

pub(crate) fn segments_intersect_2d(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> bool {
    // Epsilon in meters; inputs are locally projected coordinates.
    const EPS_M: f64 = 1e-6;

    fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    }

    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPS_M;
        let max = a.max(b) + EPS_M;
        value >= min && value <= max
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        within(p.0, q.0, r.0) && within(p.1, q.1, r.1)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if o1.abs() <= EPS_M && on_segment(a1, a2, b1) {
        return true;
    }
    if o2.abs() <= EPS_M && on_segment(a1, a2, b2) {
        return true;
    }
    if o3.abs() <= EPS_M && on_segment(b1, b2, a1) {
        return true;
    }
    if o4.abs() <= EPS_M && on_segment(b1, b2, a2) {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

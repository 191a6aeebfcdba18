//! Core data models for flight-path analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::AnalysisError;

/// A WGS84 position with an absolute (AMSL) elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate3D {
    pub lon: f64,
    pub lat: f64,
    /// Meters above mean sea level
    pub elevation_m: f64,
}

impl Coordinate3D {
    pub fn new(lon: f64, lat: f64, elevation_m: f64) -> Self {
        Self { lon, lat, elevation_m }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite() && self.elevation_m.is_finite()
    }

    pub fn horizontal(&self) -> GeoPoint {
        GeoPoint { lon: self.lon, lat: self.lat }
    }
}

/// A horizontal position used for terrain queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// Ordered, directed sequence of at least two finite coordinates.
///
/// The coordinates are never mutated once the path is built; resampling
/// produces a new sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlightPath {
    coordinates: Vec<Coordinate3D>,
}

impl FlightPath {
    pub fn new(coordinates: Vec<Coordinate3D>) -> Result<Self, AnalysisError> {
        if coordinates.is_empty() {
            return Err(AnalysisError::InvalidInput("flight path is empty".to_string()));
        }
        if coordinates.len() < 2 {
            return Err(AnalysisError::InvalidInput(
                "flight path needs at least 2 coordinates".to_string(),
            ));
        }
        if let Some(index) = coordinates.iter().position(|c| !c.is_finite()) {
            return Err(AnalysisError::InvalidInput(format!(
                "flight path coordinate {index} is not finite"
            )));
        }
        Ok(Self { coordinates })
    }

    pub fn coordinates(&self) -> &[Coordinate3D] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Horizontal planar length of the whole path in meters.
    pub fn length_m(&self) -> f64 {
        crate::spatial::planar_length(&self.coordinates)
    }

    pub fn into_coordinates(self) -> Vec<Coordinate3D> {
        self.coordinates
    }
}

impl<'de> Deserialize<'de> for FlightPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let coordinates = Vec::<Coordinate3D>::deserialize(deserializer)?;
        FlightPath::new(coordinates).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationType {
    GroundControlStation,
    Observer,
    Repeater,
}

impl StationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroundControlStation => "ground_control_station",
            Self::Observer => "observer",
            Self::Repeater => "repeater",
        }
    }
}

/// A ground station whose elevation offset has already been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub station_type: StationType,
    pub position: Coordinate3D,
}

/// Contiguous run of path coordinates sharing one visibility state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilitySegment {
    /// Index of the first coordinate in the analysed sequence
    pub start_index: usize,
    /// Index of the last coordinate (inclusive)
    pub end_index: usize,
    pub visible: bool,
    /// Union of the station indices with line of sight over the run
    pub station_indices: BTreeSet<usize>,
    pub coordinates: Vec<Coordinate3D>,
    pub length_m: f64,
}

/// Population reporting polygon ("meshblock"), read-only to the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationPolygon {
    pub id: String,
    /// Exterior ring as `[lon, lat]` pairs
    pub exterior: Vec<[f64; 2]>,
    /// Interior rings as `[lon, lat]` pairs
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
    /// Reported area; when zero or missing the geometric area is used
    #[serde(default)]
    pub area_km2: f64,
    /// People per square kilometre
    pub population_density: f64,
    #[serde(default)]
    pub land_use_category: Option<String>,
}

impl PopulationPolygon {
    /// Land-use category marking a controlled ground area.
    pub const CONTROLLED_GROUND: &'static str = "controlled_ground";

    pub fn is_controlled_ground(&self) -> bool {
        self.land_use_category
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(Self::CONTROLLED_GROUND))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "VLOS", alias = "vlos")]
    Vlos,
    #[serde(rename = "BVLOS", alias = "bvlos")]
    Bvlos,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vlos => "VLOS",
            Self::Bvlos => "BVLOS",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Characteristic-dimension bucket in meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SizeCategory {
    One,
    Three,
    Eight,
    Twenty,
    Forty,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 5] = [
        SizeCategory::One,
        SizeCategory::Three,
        SizeCategory::Eight,
        SizeCategory::Twenty,
        SizeCategory::Forty,
    ];

    pub fn from_dimension(max_dimension_m: f64) -> Self {
        if max_dimension_m <= 1.0 {
            Self::One
        } else if max_dimension_m <= 3.0 {
            Self::Three
        } else if max_dimension_m <= 8.0 {
            Self::Eight
        } else if max_dimension_m <= 20.0 {
            Self::Twenty
        } else {
            // NaN falls through to the largest bucket.
            Self::Forty
        }
    }

    pub fn meters(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Three => 3,
            Self::Eight => 8,
            Self::Twenty => 20,
            Self::Forty => 40,
        }
    }
}

impl From<SizeCategory> for u8 {
    fn from(value: SizeCategory) -> Self {
        value.meters()
    }
}

impl TryFrom<u8> for SizeCategory {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            3 => Ok(Self::Three),
            8 => Ok(Self::Eight),
            20 => Ok(Self::Twenty),
            40 => Ok(Self::Forty),
            other => Err(format!("unknown size category {other}")),
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.meters())
    }
}

/// Aircraft and operation parameters for the iGRC lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftConfiguration {
    #[serde(default)]
    pub aircraft_type: String,
    pub max_dimension_m: f64,
    #[serde(default)]
    pub max_speed_mps: f64,
    pub operation_type: OperationType,
    #[serde(default)]
    pub operation_altitude_agl_m: f64,
}

impl AircraftConfiguration {
    /// Derived on every call from `max_dimension_m`; never cached.
    pub fn size_category(&self) -> SizeCategory {
        SizeCategory::from_dimension(self.max_dimension_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_path_rejects_short_and_non_finite_input() {
        assert!(matches!(
            FlightPath::new(Vec::new()),
            Err(AnalysisError::InvalidInput(msg)) if msg.contains("empty")
        ));
        assert!(FlightPath::new(vec![Coordinate3D::new(0.0, 0.0, 0.0)]).is_err());
        assert!(FlightPath::new(vec![
            Coordinate3D::new(0.0, 0.0, 0.0),
            Coordinate3D::new(f64::NAN, 0.0, 0.0),
        ])
        .is_err());
    }

    #[test]
    fn flight_path_deserialization_validates() {
        let err = serde_json::from_str::<FlightPath>(r#"[{"lon":1.0,"lat":2.0,"elevation_m":3.0}]"#);
        assert!(err.is_err());
        let ok = serde_json::from_str::<FlightPath>(
            r#"[{"lon":1.0,"lat":2.0,"elevation_m":3.0},{"lon":1.1,"lat":2.0,"elevation_m":3.0}]"#,
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn size_category_buckets() {
        assert_eq!(SizeCategory::from_dimension(0.5), SizeCategory::One);
        assert_eq!(SizeCategory::from_dimension(1.0), SizeCategory::One);
        assert_eq!(SizeCategory::from_dimension(2.0), SizeCategory::Three);
        assert_eq!(SizeCategory::from_dimension(2.5), SizeCategory::Three);
        assert_eq!(SizeCategory::from_dimension(8.0), SizeCategory::Eight);
        assert_eq!(SizeCategory::from_dimension(20.0), SizeCategory::Twenty);
        assert_eq!(SizeCategory::from_dimension(21.0), SizeCategory::Forty);
    }

    #[test]
    fn size_category_follows_dimension_changes() {
        let mut config = AircraftConfiguration {
            aircraft_type: "multirotor".to_string(),
            max_dimension_m: 2.0,
            max_speed_mps: 15.0,
            operation_type: OperationType::Vlos,
            operation_altitude_agl_m: 60.0,
        };
        assert_eq!(config.size_category(), SizeCategory::Three);
        config.max_dimension_m = 2.5;
        assert_eq!(config.size_category(), SizeCategory::Three);
        config.max_dimension_m = 5.0;
        assert_eq!(config.size_category(), SizeCategory::Eight);
    }

    #[test]
    fn operation_type_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&OperationType::Bvlos).unwrap(), "\"BVLOS\"");
        let parsed: OperationType = serde_json::from_str("\"vlos\"").unwrap();
        assert_eq!(parsed, OperationType::Vlos);
    }
}

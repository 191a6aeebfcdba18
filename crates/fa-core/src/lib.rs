pub mod corridor;
pub mod elevation;
pub mod error;
pub mod intersection;
pub mod layers;
pub mod los;
pub mod models;
pub mod risk;
pub mod spatial;
pub mod towers;
pub mod visibility;

pub use corridor::{build_corridor, corridor_buffer_m, Corridor, CorridorOptions, DEFAULT_CORRIDOR_FLOOR_M};
pub use elevation::{ElevationSource, ElevationTable, FlatTerrain, TerrainGrid, TerrainLookup};
pub use error::{AnalysisError, SkippedPolygon};
pub use intersection::{
    estimate_intersections, EstimatorOptions, IntersectionReport, IntersectionResult,
    IntersectionTest, OverlapMethod, OverlapMode, RepairAction,
};
pub use layers::{Layer, LayerEvent, LayerKind, LayerRegistry, LayerSummary};
pub use los::{los_profile, LosOptions, LosProfile, ProfileSample};
pub use models::{
    AircraftConfiguration, Coordinate3D, FlightPath, GeoPoint, OperationType, PopulationPolygon,
    SizeCategory, Station, StationType, VisibilitySegment,
};
pub use risk::{
    aggregate_by_risk_class, calculate_ground_risk_analysis, ground_risk_from_intersections,
    GroundRiskClass, IgrcRange, IgrcResult, IgrcTable, RiskClassTotals, RiskLevel,
};
pub use spatial::{haversine_distance, LocalFrame};
pub use towers::{tower_stations, Carrier, MobileTower, Technology, TowerFilter, TowerSite};
pub use visibility::{
    analyze_flight_path_visibility, resample_path, PreparedVisibility, VisibilityOptions, VisibilityReport,
    VisibilityStats,
};

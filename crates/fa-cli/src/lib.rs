//! Flight assurance CLI - offline analysis tools.
//!
//! - fa-analyze: visibility or ground-risk analysis of a JSON scenario
//! - fa-table: prints the iGRC lookup table

pub mod scenario;
pub mod terrain;

pub use scenario::{demo_scenario, GroundRiskOutput, Scenario};
pub use terrain::{ScenarioTerrain, TerrainSpec};

//! Intrinsic ground risk class (iGRC) classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AnalysisError;
use crate::intersection::IntersectionResult;
use crate::models::{AircraftConfiguration, OperationType, SizeCategory};

/// Population-density bucket used as the iGRC lookup key, least to most dense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundRiskClass {
    ControlledGroundArea,
    Isolated,
    ScarcelyPopulated,
    LightlyPopulated,
    SparselyPopulated,
    Suburban,
    HighDensityMetro,
    AssembliesOfPeople,
}

impl GroundRiskClass {
    pub const ALL: [GroundRiskClass; 8] = [
        GroundRiskClass::ControlledGroundArea,
        GroundRiskClass::Isolated,
        GroundRiskClass::ScarcelyPopulated,
        GroundRiskClass::LightlyPopulated,
        GroundRiskClass::SparselyPopulated,
        GroundRiskClass::Suburban,
        GroundRiskClass::HighDensityMetro,
        GroundRiskClass::AssembliesOfPeople,
    ];

    /// Bucket for a density in people per km². Controlled ground is never
    /// derived from density; use [`GroundRiskClass::for_polygon`].
    pub fn from_density(people_per_km2: f64) -> Self {
        match people_per_km2 {
            d if d < 0.5 => Self::Isolated,
            d if d < 5.0 => Self::ScarcelyPopulated,
            d if d < 50.0 => Self::LightlyPopulated,
            d if d < 500.0 => Self::SparselyPopulated,
            d if d < 5_000.0 => Self::Suburban,
            d if d < 50_000.0 => Self::HighDensityMetro,
            // NaN lands here too.
            _ => Self::AssembliesOfPeople,
        }
    }

    pub fn for_polygon(density: f64, controlled_ground: bool) -> Self {
        if controlled_ground {
            Self::ControlledGroundArea
        } else {
            Self::from_density(density)
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlledGroundArea => "CONTROLLED_GROUND_AREA",
            Self::Isolated => "ISOLATED",
            Self::ScarcelyPopulated => "SCARCELY_POPULATED",
            Self::LightlyPopulated => "LIGHTLY_POPULATED",
            Self::SparselyPopulated => "SPARSELY_POPULATED",
            Self::Suburban => "SUBURBAN",
            Self::HighDensityMetro => "HIGH_DENSITY_METRO",
            Self::AssembliesOfPeople => "ASSEMBLIES_OF_PEOPLE",
        }
    }
}

impl fmt::Display for GroundRiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_igrc(igrc: u8) -> Self {
        match igrc {
            0..=3 => Self::Low,
            4..=6 => Self::Medium,
            7..=8 => Self::High,
            _ => Self::VeryHigh,
        }
    }
}

/// iGRC values per [`GroundRiskClass`], in [`GroundRiskClass::ALL`] order.
pub type IgrcRow = [u8; 8];

/// BVLOS rows by size category (1, 3, 8, 20, 40 m).
const BVLOS_COLUMNS: [[u8; 5]; 8] = [
    [1, 1, 2, 3, 3],
    [1, 2, 3, 4, 5],
    [2, 2, 4, 5, 6],
    [3, 4, 5, 6, 7],
    [4, 5, 6, 7, 8],
    [5, 6, 7, 8, 9],
    [6, 7, 8, 9, 10],
    [7, 8, 9, 10, 10],
];

/// String-keyed lookup table, one row per `"{operation}-{size}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgrcTable {
    rows: BTreeMap<String, IgrcRow>,
}

impl IgrcTable {
    pub fn key(operation: OperationType, size: SizeCategory) -> String {
        format!("{}-{}", operation.as_str(), size.meters())
    }

    /// The built-in table. VLOS rows sit one class below BVLOS, floored at 1.
    pub fn standard() -> Self {
        let mut rows = BTreeMap::new();
        for (column, size) in SizeCategory::ALL.iter().enumerate() {
            let mut bvlos = [0u8; 8];
            for (class_idx, row) in BVLOS_COLUMNS.iter().enumerate() {
                bvlos[class_idx] = row[column];
            }
            let vlos = bvlos.map(|v| v.saturating_sub(1).max(1));
            rows.insert(Self::key(OperationType::Bvlos, *size), bvlos);
            rows.insert(Self::key(OperationType::Vlos, *size), vlos);
        }
        Self { rows }
    }

    pub fn from_rows(rows: BTreeMap<String, IgrcRow>) -> Result<Self, AnalysisError> {
        let table = Self { rows };
        table.validate()?;
        Ok(table)
    }

    pub fn row(&self, operation: OperationType, size: SizeCategory) -> Result<&IgrcRow, AnalysisError> {
        let key = Self::key(operation, size);
        self.rows
            .get(&key)
            .ok_or_else(|| AnalysisError::Configuration(format!("no iGRC table row for {key}")))
    }

    pub fn lookup(
        &self,
        operation: OperationType,
        size: SizeCategory,
        class: GroundRiskClass,
    ) -> Result<u8, AnalysisError> {
        Ok(self.row(operation, size)?[class.index()])
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &IgrcRow)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every operation/size combination resolves and every value is in 1..=10.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for operation in [OperationType::Vlos, OperationType::Bvlos] {
            for size in SizeCategory::ALL {
                let row = self.row(operation, size)?;
                if let Some(value) = row.iter().find(|v| !(1..=10).contains(*v)) {
                    return Err(AnalysisError::Configuration(format!(
                        "iGRC value {value} out of range in row {}",
                        Self::key(operation, size)
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for IgrcTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskClassTotals {
    pub count: usize,
    pub area_km2: f64,
    pub population: f64,
}

/// Group intersection results by ground risk class.
pub fn aggregate_by_risk_class(
    results: &[IntersectionResult],
) -> BTreeMap<GroundRiskClass, RiskClassTotals> {
    let mut totals: BTreeMap<GroundRiskClass, RiskClassTotals> = BTreeMap::new();
    for result in results {
        let entry = totals.entry(result_class(result)).or_default();
        entry.count += 1;
        entry.area_km2 += result.intersection_area_km2;
        entry.population += result.scaled_population;
    }
    totals
}

fn result_class(result: &IntersectionResult) -> GroundRiskClass {
    let controlled = result
        .land_use_category
        .as_deref()
        .map(|c| c.eq_ignore_ascii_case(crate::models::PopulationPolygon::CONTROLLED_GROUND))
        .unwrap_or(false);
    GroundRiskClass::for_polygon(result.population_density, controlled)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskClassBreakdown {
    pub ground_risk_class: GroundRiskClass,
    pub count: usize,
    pub area_km2: f64,
    pub population: f64,
    pub igrc: u8,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgrcRange {
    pub min: u8,
    pub max: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighRiskArea {
    pub polygon_id: String,
    pub ground_risk_class: GroundRiskClass,
    pub igrc: u8,
    pub scaled_population: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgrcResult {
    pub operation_type: OperationType,
    pub size_category: SizeCategory,
    pub table_key: String,
    pub breakdown: Vec<RiskClassBreakdown>,
    /// `None` when no class is populated
    pub igrc_range: Option<IgrcRange>,
    pub overall_risk_level: RiskLevel,
    pub total_population: f64,
    pub highest_risk_areas: Vec<HighRiskArea>,
    pub recommendations: Vec<String>,
}

/// Polygons whose own class maps to at least this iGRC are listed as highest risk.
pub const HIGH_RISK_IGRC: u8 = 7;

/// Classify per-class population totals for an aircraft configuration.
///
/// `intersections` only feeds the highest-risk-area list; pass an empty slice
/// when the totals did not come from an intersection run.
pub fn calculate_ground_risk_analysis(
    population_by_risk_class: &BTreeMap<GroundRiskClass, RiskClassTotals>,
    aircraft: &AircraftConfiguration,
    table: &IgrcTable,
    intersections: &[IntersectionResult],
) -> Result<IgrcResult, AnalysisError> {
    let operation = aircraft.operation_type;
    let size = aircraft.size_category();
    let row = table.row(operation, size)?;

    let breakdown: Vec<RiskClassBreakdown> = population_by_risk_class
        .iter()
        .filter(|(_, totals)| totals.count > 0 && totals.population > 0.0)
        .map(|(class, totals)| {
            let igrc = row[class.index()];
            RiskClassBreakdown {
                ground_risk_class: *class,
                count: totals.count,
                area_km2: totals.area_km2,
                population: totals.population,
                igrc,
                risk_level: RiskLevel::from_igrc(igrc),
            }
        })
        .collect();

    let igrc_range = breakdown.iter().fold(None, |range: Option<IgrcRange>, b| {
        Some(match range {
            Some(r) => IgrcRange {
                min: r.min.min(b.igrc),
                max: r.max.max(b.igrc),
            },
            None => IgrcRange { min: b.igrc, max: b.igrc },
        })
    });

    let mut highest_risk_areas: Vec<HighRiskArea> = intersections
        .iter()
        .filter_map(|result| {
            let class = result_class(result);
            let igrc = row[class.index()];
            (igrc >= HIGH_RISK_IGRC).then(|| HighRiskArea {
                polygon_id: result.polygon_id.clone(),
                ground_risk_class: class,
                igrc,
                scaled_population: result.scaled_population,
            })
        })
        .collect();
    highest_risk_areas.sort_by(|a, b| {
        b.igrc
            .cmp(&a.igrc)
            .then(b.scaled_population.total_cmp(&a.scaled_population))
    });

    let max = igrc_range.map(|r| r.max);
    let overall_risk_level = max.map(RiskLevel::from_igrc).unwrap_or(RiskLevel::Low);
    let recommendations = recommendations(operation, max);

    tracing::info!(
        "iGRC {}: range {:?}, {} high-risk areas",
        IgrcTable::key(operation, size),
        igrc_range,
        highest_risk_areas.len()
    );

    Ok(IgrcResult {
        operation_type: operation,
        size_category: size,
        table_key: IgrcTable::key(operation, size),
        total_population: breakdown.iter().map(|b| b.population).sum(),
        breakdown,
        igrc_range,
        overall_risk_level,
        highest_risk_areas,
        recommendations,
    })
}

/// Aggregate an intersection run and classify it in one step.
pub fn ground_risk_from_intersections(
    intersections: &[IntersectionResult],
    aircraft: &AircraftConfiguration,
    table: &IgrcTable,
) -> Result<IgrcResult, AnalysisError> {
    let totals = aggregate_by_risk_class(intersections);
    calculate_ground_risk_analysis(&totals, aircraft, table, intersections)
}

pub fn recommendations(operation: OperationType, max_igrc: Option<u8>) -> Vec<String> {
    let mut out = Vec::new();
    match max_igrc {
        None => out.push(
            "Low risk: no populated areas intersect the flight corridor. Standard operating procedures apply."
                .to_string(),
        ),
        Some(max) if max >= 9 => out.push(format!(
            "Very high risk (iGRC {max}): consider an alternate route avoiding densely populated areas."
        )),
        Some(max) if max >= 7 => out.push(format!(
            "High risk (iGRC {max}): additional operational procedures and mitigations are required."
        )),
        Some(max) if max >= 4 => out.push(format!(
            "Medium risk (iGRC {max}): apply standard enhanced operating procedures."
        )),
        Some(max) => out.push(format!(
            "Low risk (iGRC {max}): standard operating procedures apply."
        )),
    }

    if operation == OperationType::Bvlos && max_igrc.map_or(false, |max| max >= 6) {
        out.push(
            "BVLOS over populated areas: confirm detect-and-avoid capability and a reliable command and control link."
                .to_string(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aircraft(operation: OperationType, max_dimension_m: f64) -> AircraftConfiguration {
        AircraftConfiguration {
            aircraft_type: "multirotor".to_string(),
            max_dimension_m,
            max_speed_mps: 20.0,
            operation_type: operation,
            operation_altitude_agl_m: 120.0,
        }
    }

    fn totals(entries: &[(GroundRiskClass, usize, f64)]) -> BTreeMap<GroundRiskClass, RiskClassTotals> {
        entries
            .iter()
            .map(|&(class, count, population)| {
                (
                    class,
                    RiskClassTotals {
                        count,
                        area_km2: 0.1,
                        population,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn density_thresholds() {
        assert_eq!(GroundRiskClass::from_density(0.0), GroundRiskClass::Isolated);
        assert_eq!(GroundRiskClass::from_density(0.49), GroundRiskClass::Isolated);
        assert_eq!(GroundRiskClass::from_density(0.5), GroundRiskClass::ScarcelyPopulated);
        assert_eq!(GroundRiskClass::from_density(0.7), GroundRiskClass::ScarcelyPopulated);
        assert_eq!(GroundRiskClass::from_density(4.99), GroundRiskClass::ScarcelyPopulated);
        assert_eq!(GroundRiskClass::from_density(5.0), GroundRiskClass::LightlyPopulated);
        assert_eq!(GroundRiskClass::from_density(1_200.0), GroundRiskClass::Suburban);
        assert_eq!(GroundRiskClass::from_density(60_000.0), GroundRiskClass::AssembliesOfPeople);
        assert_eq!(GroundRiskClass::from_density(f64::NAN), GroundRiskClass::AssembliesOfPeople);
        assert_eq!(
            GroundRiskClass::for_polygon(10_000.0, true),
            GroundRiskClass::ControlledGroundArea
        );
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_igrc(3), RiskLevel::Low);
        assert_eq!(RiskLevel::from_igrc(4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_igrc(6), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_igrc(8), RiskLevel::High);
        assert_eq!(RiskLevel::from_igrc(9), RiskLevel::VeryHigh);
    }

    #[test]
    fn standard_table_has_every_row() {
        let table = IgrcTable::standard();
        table.validate().unwrap();
        assert_eq!(table.rows().count(), 10);
        assert_eq!(IgrcTable::key(OperationType::Bvlos, SizeCategory::Twenty), "BVLOS-20");
    }

    #[test]
    fn missing_row_is_a_configuration_error() {
        let mut rows: BTreeMap<String, IgrcRow> = IgrcTable::standard()
            .rows()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        rows.remove("VLOS-8");
        let err = IgrcTable::from_rows(rows).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(msg) if msg.contains("VLOS-8")));
    }

    #[test]
    fn unpopulated_classes_are_ignored() {
        let result = calculate_ground_risk_analysis(
            &totals(&[
                (GroundRiskClass::ScarcelyPopulated, 2, 3.0),
                (GroundRiskClass::Suburban, 0, 0.0),
            ]),
            &aircraft(OperationType::Bvlos, 2.0),
            &IgrcTable::standard(),
            &[],
        )
        .unwrap();
        assert_eq!(result.breakdown.len(), 1);
        assert_eq!(result.igrc_range, Some(IgrcRange { min: 2, max: 2 }));
    }

    #[test]
    fn range_and_recommendations_follow_max() {
        let result = calculate_ground_risk_analysis(
            &totals(&[
                (GroundRiskClass::LightlyPopulated, 1, 10.0),
                (GroundRiskClass::HighDensityMetro, 3, 900.0),
            ]),
            &aircraft(OperationType::Bvlos, 7.5),
            &IgrcTable::standard(),
            &[],
        )
        .unwrap();
        assert_eq!(result.table_key, "BVLOS-8");
        assert_eq!(result.igrc_range, Some(IgrcRange { min: 5, max: 8 }));
        assert_eq!(result.overall_risk_level, RiskLevel::High);
        assert!(result.recommendations[0].starts_with("High risk"));
        assert!(result.recommendations[1].contains("BVLOS"));
    }

    #[test]
    fn no_population_is_low_risk() {
        let result = calculate_ground_risk_analysis(
            &BTreeMap::new(),
            &aircraft(OperationType::Vlos, 1.0),
            &IgrcTable::standard(),
            &[],
        )
        .unwrap();
        assert!(result.igrc_range.is_none());
        assert_eq!(result.overall_risk_level, RiskLevel::Low);
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.recommendations[0].to_lowercase().contains("low risk"));
    }

    #[test]
    fn vlos_never_adds_bvlos_recommendation() {
        let recs = recommendations(OperationType::Vlos, Some(9));
        assert_eq!(recs.len(), 1);
        assert!(recs[0].starts_with("Very high risk"));
        assert_eq!(recommendations(OperationType::Bvlos, Some(5)).len(), 1);
        assert_eq!(recommendations(OperationType::Bvlos, Some(6)).len(), 2);
    }
}

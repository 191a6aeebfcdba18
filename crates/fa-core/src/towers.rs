//! Mobile network towers as candidate repeater stations.
//!
//! Tower records arrive already extracted (one record per site). Carrier and
//! radio technology are inferred from licensee and emission metadata so a run
//! can be limited to, say, one carrier's 4G sites.

use serde::{Deserialize, Serialize};

use crate::elevation::TerrainLookup;
use crate::models::{Coordinate3D, Station, StationType};

/// Antenna height used when a site reports none.
pub const DEFAULT_TOWER_HEIGHT_M: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    Telstra,
    Optus,
    Vodafone,
    Other,
}

struct CarrierRule {
    carrier: Carrier,
    client_ids: &'static [&'static str],
    name_patterns: &'static [&'static str],
}

const CARRIER_RULES: [CarrierRule; 3] = [
    CarrierRule {
        carrier: Carrier::Telstra,
        client_ids: &["1104504", "20053843", "20006709"],
        name_patterns: &["telstra", "amplitel", "tcl"],
    },
    CarrierRule {
        carrier: Carrier::Optus,
        client_ids: &["1561", "510769", "512112"],
        name_patterns: &["optus", "singtel"],
    },
    CarrierRule {
        carrier: Carrier::Vodafone,
        client_ids: &["536353", "1103274", "1133304", "1136980"],
        name_patterns: &["vodafone", "tpg", "hutchison", "vha"],
    },
];

impl Carrier {
    /// Licensee client ids win over name matching.
    pub fn identify(client_id: &str, name: &str) -> Self {
        let client_id = client_id.trim();
        if let Some(rule) = CARRIER_RULES
            .iter()
            .find(|r| r.client_ids.iter().any(|id| *id == client_id))
        {
            return rule.carrier;
        }
        let name = name.to_lowercase();
        CARRIER_RULES
            .iter()
            .find(|r| r.name_patterns.iter().any(|p| name.contains(p)))
            .map(|r| r.carrier)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telstra => "telstra",
            Self::Optus => "optus",
            Self::Vodafone => "vodafone",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Technology {
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "5g")]
    G5,
}

struct TechnologyRule {
    technology: Technology,
    frequency_ranges_mhz: &'static [(f64, f64)],
    emission_patterns: &'static [&'static str],
    name_patterns: &'static [&'static str],
}

// Checked in this order; bands overlap, so newer technologies take precedence.
const TECHNOLOGY_RULES: [TechnologyRule; 3] = [
    TechnologyRule {
        technology: Technology::G5,
        frequency_ranges_mhz: &[(3300.0, 3800.0), (24000.0, 30000.0), (700.0, 800.0)],
        emission_patterns: &["9M86G7W", "G7W"],
        name_patterns: &["5g", "amplitel monopole", "mmwave"],
    },
    TechnologyRule {
        technology: Technology::G4,
        frequency_ranges_mhz: &[(700.0, 900.0), (1800.0, 2100.0), (2300.0, 2600.0)],
        emission_patterns: &["5M00G7W", "10M0G7W", "15M0G7W", "20M0G7W"],
        name_patterns: &["4g", "lte", "b28"],
    },
    TechnologyRule {
        technology: Technology::G3,
        frequency_ranges_mhz: &[(850.0, 950.0), (1800.0, 2200.0)],
        emission_patterns: &["5M00F9W", "F9W"],
        name_patterns: &["3g", "umts", "hspa", "wcdma"],
    },
];

impl Technology {
    /// Site name first, then emission designator, then frequency band.
    /// Falls back to 4G when nothing matches.
    pub fn identify(frequency_hz: Option<f64>, emission: Option<&str>, name: &str) -> Self {
        let name = name.to_lowercase();
        if let Some(rule) = TECHNOLOGY_RULES
            .iter()
            .find(|r| r.name_patterns.iter().any(|p| name.contains(p)))
        {
            return rule.technology;
        }
        if let Some(emission) = emission.filter(|e| !e.is_empty()) {
            if let Some(rule) = TECHNOLOGY_RULES
                .iter()
                .find(|r| r.emission_patterns.iter().any(|p| emission.contains(p)))
            {
                return rule.technology;
            }
        }
        let mhz = frequency_hz.filter(|f| f.is_finite() && *f > 0.0).map(|f| f / 1e6);
        if let Some(mhz) = mhz {
            if let Some(rule) = TECHNOLOGY_RULES.iter().find(|r| {
                r.frequency_ranges_mhz
                    .iter()
                    .any(|&(lo, hi)| (lo..=hi).contains(&mhz))
            }) {
                return rule.technology;
            }
        }
        Self::G4
    }
}

/// One licensed device at a site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerDevice {
    pub client_id: String,
    pub licensee: String,
    pub frequency_hz: Option<f64>,
    pub emission: Option<String>,
    pub height_m: Option<f64>,
}

/// A tower site with its devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TowerSite {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    #[serde(default)]
    pub devices: Vec<TowerDevice>,
}

/// A classified tower ready to be used as a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileTower {
    pub id: String,
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    /// Tallest reported antenna above ground
    pub height_m: Option<f64>,
    pub carriers: Vec<Carrier>,
    pub technologies: Vec<Technology>,
}

impl MobileTower {
    /// Aggregate a site's devices. Sites without a usable position (including
    /// the 0,0 placeholder) yield `None`.
    pub fn from_site(site: &TowerSite) -> Option<Self> {
        if !site.lat.is_finite() || !site.lon.is_finite() || (site.lat == 0.0 && site.lon == 0.0) {
            return None;
        }

        let mut carriers = Vec::new();
        let mut technologies = Vec::new();
        let mut height_m: Option<f64> = None;
        for device in &site.devices {
            let name = if device.licensee.is_empty() {
                site.name.as_str()
            } else {
                device.licensee.as_str()
            };
            carriers.push(Carrier::identify(&device.client_id, name));
            technologies.push(Technology::identify(
                device.frequency_hz,
                device.emission.as_deref(),
                &site.name,
            ));
            if let Some(h) = device.height_m.filter(|h| h.is_finite() && *h >= 0.0) {
                height_m = Some(height_m.map_or(h, |current| current.max(h)));
            }
        }
        carriers.sort();
        carriers.dedup();
        technologies.sort();
        technologies.dedup();

        Some(Self {
            id: site.id.clone(),
            name: site.name.clone(),
            lon: site.lon,
            lat: site.lat,
            height_m,
            carriers,
            technologies,
        })
    }

    /// Repeater station at antenna height over the local terrain.
    ///
    /// Ground falls back to 0 m AMSL where the terrain has no sample.
    pub fn to_station<T: TerrainLookup + ?Sized>(&self, terrain: &T) -> Station {
        let ground = terrain.elevation(self.lon, self.lat).unwrap_or(0.0);
        Station {
            id: format!("tower-{}", self.id),
            station_type: StationType::Repeater,
            position: Coordinate3D::new(
                self.lon,
                self.lat,
                ground + self.height_m.unwrap_or(DEFAULT_TOWER_HEIGHT_M),
            ),
        }
    }
}

/// Which towers to promote to stations. Empty lists match everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerFilter {
    pub carriers: Vec<Carrier>,
    pub technologies: Vec<Technology>,
}

impl TowerFilter {
    pub fn matches(&self, tower: &MobileTower) -> bool {
        let carrier_ok =
            self.carriers.is_empty() || tower.carriers.iter().any(|c| self.carriers.contains(c));
        let technology_ok = self.technologies.is_empty()
            || tower.technologies.iter().any(|t| self.technologies.contains(t));
        carrier_ok && technology_ok
    }
}

/// Classify `sites` and convert the matching towers into repeater stations.
pub fn tower_stations<T: TerrainLookup + ?Sized>(
    sites: &[TowerSite],
    filter: &TowerFilter,
    terrain: &T,
) -> Vec<Station> {
    let stations: Vec<Station> = sites
        .iter()
        .filter_map(MobileTower::from_site)
        .filter(|tower| filter.matches(tower))
        .map(|tower| tower.to_station(terrain))
        .collect();
    tracing::debug!("{} of {} tower sites usable as repeaters", stations.len(), sites.len());
    stations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::FlatTerrain;

    fn device(client_id: &str, licensee: &str, frequency_mhz: f64, height_m: f64) -> TowerDevice {
        TowerDevice {
            client_id: client_id.to_string(),
            licensee: licensee.to_string(),
            frequency_hz: Some(frequency_mhz * 1e6),
            emission: None,
            height_m: Some(height_m),
        }
    }

    #[test]
    fn carrier_prefers_client_id_over_name() {
        assert_eq!(Carrier::identify("1561", "Telstra Corporation"), Carrier::Optus);
        assert_eq!(Carrier::identify("999", "TPG Telecom"), Carrier::Vodafone);
        assert_eq!(Carrier::identify("999", "Amplitel Pty Ltd"), Carrier::Telstra);
        assert_eq!(Carrier::identify("999", "Council radio"), Carrier::Other);
    }

    #[test]
    fn technology_checks_name_then_emission_then_band() {
        assert_eq!(Technology::identify(Some(3500e6), None, "Hilltop LTE"), Technology::G4);
        assert_eq!(Technology::identify(Some(2400e6), Some("5M00F9W"), "Hilltop"), Technology::G3);
        assert_eq!(Technology::identify(Some(3500e6), None, "Hilltop"), Technology::G5);
        // 750 MHz sits in both the 5G and 4G bands.
        assert_eq!(Technology::identify(Some(750e6), None, ""), Technology::G5);
        assert_eq!(Technology::identify(Some(2400e6), None, ""), Technology::G4);
        assert_eq!(Technology::identify(None, None, ""), Technology::G4);
    }

    #[test]
    fn site_aggregates_devices() {
        let site = TowerSite {
            id: "9001".to_string(),
            name: "Ridge Rd".to_string(),
            lon: 149.1,
            lat: -35.3,
            devices: vec![
                device("1104504", "", 2350.0, 25.0),
                device("1561", "", 3500.0, 42.0),
                device("1104504", "", 2400.0, 18.0),
            ],
        };
        let tower = MobileTower::from_site(&site).unwrap();
        assert_eq!(tower.carriers, vec![Carrier::Telstra, Carrier::Optus]);
        assert_eq!(tower.technologies, vec![Technology::G4, Technology::G5]);
        assert_eq!(tower.height_m, Some(42.0));

        let station = tower.to_station(&FlatTerrain::new(600.0));
        assert_eq!(station.id, "tower-9001");
        assert_eq!(station.station_type, StationType::Repeater);
        assert_eq!(station.position.elevation_m, 642.0);
    }

    #[test]
    fn placeholder_positions_and_filters_drop_sites() {
        let mut placeholder = TowerSite {
            id: "1".to_string(),
            name: String::new(),
            lon: 0.0,
            lat: 0.0,
            devices: vec![device("1561", "", 900.0, 20.0)],
        };
        assert!(MobileTower::from_site(&placeholder).is_none());

        placeholder.lon = 151.0;
        placeholder.lat = -33.0;
        let bare = TowerSite {
            id: "2".to_string(),
            name: "Depot".to_string(),
            lon: 151.01,
            lat: -33.0,
            devices: Vec::new(),
        };
        let optus_only = TowerFilter {
            carriers: vec![Carrier::Optus],
            technologies: Vec::new(),
        };
        let stations = tower_stations(&[placeholder, bare], &optus_only, &FlatTerrain::new(0.0));
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].id, "tower-1");

        let all = tower_stations(
            &[TowerSite {
                id: "2".to_string(),
                name: "Depot".to_string(),
                lon: 151.01,
                lat: -33.0,
                devices: Vec::new(),
            }],
            &TowerFilter::default(),
            &FlatTerrain::new(10.0),
        );
        assert_eq!(all[0].position.elevation_m, 10.0 + DEFAULT_TOWER_HEIGHT_M);
    }
}

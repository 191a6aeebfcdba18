//! Shared application state.

use fa_core::{IgrcTable, LayerRegistry};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::jobs::JobTracker;
use crate::population::PopulationStore;
use crate::terrain::{TerrainService, TerrainSession};

pub struct AppState {
    config: Config,
    terrain: Arc<TerrainService>,
    population: PopulationStore,
    jobs: JobTracker,
    layers: Arc<LayerRegistry>,
    igrc_table: IgrcTable,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let terrain = TerrainService::from_config(&config, reqwest::Client::new());
        Self::with_terrain(config, terrain)
    }

    pub fn with_terrain(config: Config, terrain: TerrainService) -> Self {
        Self {
            population: PopulationStore::new(
                config.population_dataset_path.clone(),
                config.polygon_cache_max_entries,
                Duration::from_secs(config.polygon_cache_ttl_s),
            ),
            jobs: JobTracker::new(
                Duration::from_secs(config.job_retention_s),
                config.max_concurrent_jobs,
            ),
            terrain: Arc::new(terrain),
            layers: Arc::new(LayerRegistry::new()),
            igrc_table: IgrcTable::standard(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Terrain view pinned for a single analysis.
    pub fn terrain_session(&self) -> TerrainSession {
        self.terrain.session()
    }

    pub fn population(&self) -> &PopulationStore {
        &self.population
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn layers(&self) -> &Arc<LayerRegistry> {
        &self.layers
    }

    pub fn igrc_table(&self) -> &IgrcTable {
        &self.igrc_table
    }
}

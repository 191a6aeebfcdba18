//! Population polygon dataset with versioned snapshots.
//!
//! A reload swaps in a new snapshot; runs that already hold an `Arc` to the
//! previous one keep reading it. Query results are cached per snapshot
//! version, so a reload never serves polygons from an older dataset.

use chrono::{DateTime, Utc};
use fa_core::PopulationPolygon;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::cache::TtlCache;
use crate::terrain::GeoBounds;

#[derive(Debug, Error)]
pub enum PopulationError {
    #[error("no population dataset configured")]
    NotConfigured,
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Accepted dataset layouts.
#[derive(Deserialize)]
#[serde(untagged)]
enum DatasetFile {
    Wrapped { polygons: Vec<PopulationPolygon> },
    Bare(Vec<PopulationPolygon>),
}

impl DatasetFile {
    fn into_polygons(self) -> Vec<PopulationPolygon> {
        match self {
            Self::Wrapped { polygons } | Self::Bare(polygons) => polygons,
        }
    }
}

#[derive(Debug)]
pub struct PopulationSnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    polygons: Vec<PopulationPolygon>,
    bounds: Vec<Option<GeoBounds>>,
}

impl PopulationSnapshot {
    fn new(version: u64, polygons: Vec<PopulationPolygon>) -> Self {
        let bounds = polygons
            .iter()
            .map(|polygon| GeoBounds::from_points(polygon.exterior.iter().map(|p| (p[0], p[1]))))
            .collect();
        Self {
            version,
            loaded_at: Utc::now(),
            polygons,
            bounds,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    fn within(&self, area: &GeoBounds) -> Vec<PopulationPolygon> {
        self.polygons
            .iter()
            .zip(&self.bounds)
            .filter(|(_, bounds)| bounds.map(|b| b.intersects(area)).unwrap_or(false))
            .map(|(polygon, _)| polygon.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub version: u64,
    pub polygon_count: usize,
    pub loaded_at: DateTime<Utc>,
    pub source: Option<String>,
}

pub struct PopulationStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<PopulationSnapshot>>,
    queries: TtlCache<String, Arc<Vec<PopulationPolygon>>>,
}

impl PopulationStore {
    pub fn new(path: Option<PathBuf>, cache_max_entries: usize, cache_ttl: Duration) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(PopulationSnapshot::new(0, Vec::new()))),
            queries: TtlCache::new(cache_ttl, cache_max_entries),
        }
    }

    pub fn snapshot(&self) -> Arc<PopulationSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn info(&self) -> DatasetInfo {
        let snapshot = self.snapshot();
        DatasetInfo {
            version: snapshot.version,
            polygon_count: snapshot.len(),
            loaded_at: snapshot.loaded_at,
            source: self.path.as_ref().map(|p| p.display().to_string()),
        }
    }

    /// Install `polygons` as the next snapshot.
    pub fn replace(&self, polygons: Vec<PopulationPolygon>) -> Arc<PopulationSnapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(PopulationSnapshot::new(current.version + 1, polygons));
        *current = Arc::clone(&next);
        drop(current);
        self.queries.clear();
        tracing::info!(
            "Population dataset v{} loaded ({} polygons)",
            next.version,
            next.len()
        );
        next
    }

    /// Re-read the configured dataset file.
    pub async fn reload(&self) -> Result<Arc<PopulationSnapshot>, PopulationError> {
        let path = self.path.as_deref().ok_or(PopulationError::NotConfigured)?;
        let polygons = read_dataset(path).await?;
        Ok(self.replace(polygons))
    }

    /// Polygons of `snapshot` whose bounds intersect `area`.
    pub fn query(&self, snapshot: &PopulationSnapshot, area: &GeoBounds) -> Arc<Vec<PopulationPolygon>> {
        let key = format!(
            "v{}:{:.5}:{:.5}:{:.5}:{:.5}",
            snapshot.version, area.min_lat, area.min_lon, area.max_lat, area.max_lon
        );
        if let Some(hit) = self.queries.get_fresh(&key) {
            return hit;
        }
        let polygons = Arc::new(snapshot.within(area));
        tracing::debug!(
            "Population query v{} matched {} of {} polygons",
            snapshot.version,
            polygons.len(),
            snapshot.len()
        );
        self.queries.insert(key, Arc::clone(&polygons));
        polygons
    }
}

async fn read_dataset(path: &Path) -> Result<Vec<PopulationPolygon>, PopulationError> {
    let display = path.display().to_string();
    let bytes = tokio::fs::read(path).await.map_err(|source| PopulationError::Io {
        path: display.clone(),
        source,
    })?;
    let file: DatasetFile =
        serde_json::from_slice(&bytes).map_err(|source| PopulationError::Parse { path: display, source })?;
    Ok(file.into_polygons())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, lon: f64, lat: f64) -> PopulationPolygon {
        let d = 0.01;
        PopulationPolygon {
            id: id.to_string(),
            exterior: vec![[lon, lat], [lon + d, lat], [lon + d, lat + d], [lon, lat + d], [lon, lat]],
            holes: Vec::new(),
            area_km2: 1.0,
            population_density: 120.0,
            land_use_category: None,
        }
    }

    fn area() -> GeoBounds {
        GeoBounds {
            min_lat: -0.005,
            max_lat: 0.005,
            min_lon: -0.005,
            max_lon: 0.005,
        }
    }

    fn store() -> PopulationStore {
        PopulationStore::new(None, 16, Duration::from_secs(60))
    }

    #[test]
    fn query_filters_by_bounds() {
        let store = store();
        let snapshot = store.replace(vec![square("near", 0.0, 0.0), square("far", 1.0, 1.0)]);
        let hits = store.query(&snapshot, &area());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");
    }

    #[test]
    fn held_snapshot_survives_replace() {
        let store = store();
        let old = store.replace(vec![square("a", 0.0, 0.0)]);
        let first = store.query(&old, &area());

        let new = store.replace(vec![square("b", 0.0, 0.0), square("c", -0.001, -0.001)]);
        assert_eq!(new.version(), old.version() + 1);
        assert_eq!(store.query(&new, &area()).len(), 2);

        // The in-flight run still sees its own dataset.
        let again = store.query(&old, &area());
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first[0].id);
    }

    #[tokio::test]
    async fn reload_reads_wrapped_and_bare_files() {
        let dir = std::env::temp_dir();
        let wrapped = dir.join(format!("fa-pop-{}.json", uuid::Uuid::new_v4()));
        let bare = dir.join(format!("fa-pop-{}.json", uuid::Uuid::new_v4()));
        let polygons = vec![square("x", 0.0, 0.0)];
        std::fs::write(&wrapped, serde_json::json!({ "polygons": polygons }).to_string()).unwrap();
        std::fs::write(&bare, serde_json::to_string(&polygons).unwrap()).unwrap();

        for path in [&wrapped, &bare] {
            let store = PopulationStore::new(Some(path.clone()), 4, Duration::from_secs(60));
            let snapshot = store.reload().await.unwrap();
            assert_eq!(snapshot.len(), 1);
            assert_eq!(store.info().version, 1);
            std::fs::remove_file(path).ok();
        }
    }

    #[tokio::test]
    async fn reload_without_path_or_with_bad_json_fails() {
        assert!(matches!(store().reload().await, Err(PopulationError::NotConfigured)));

        let path = std::env::temp_dir().join(format!("fa-pop-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{ not json").unwrap();
        let store = PopulationStore::new(Some(path.clone()), 4, Duration::from_secs(60));
        assert!(matches!(store.reload().await, Err(PopulationError::Parse { .. })));
        assert_eq!(store.snapshot().version(), 0);
        std::fs::remove_file(path).ok();
    }
}

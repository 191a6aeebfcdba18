//! Registry of named map overlays with change notification.
//!
//! Constructed explicitly and shared by reference (typically in an `Arc`);
//! there is no process-wide instance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::error::AnalysisError;

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Visibility,
    GroundRisk,
    Stations,
    Terrain,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    /// Overlay payload (e.g. segment or polygon features)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            visible: true,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Layer metadata without its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub has_data: bool,
}

impl From<&Layer> for LayerSummary {
    fn from(layer: &Layer) -> Self {
        Self {
            name: layer.name.clone(),
            kind: layer.kind,
            visible: layer.visible,
            has_data: layer.data.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerEvent {
    Added { name: String },
    Replaced { name: String },
    Removed { name: String },
    VisibilityChanged { name: String, visible: bool },
}

pub struct LayerRegistry {
    layers: RwLock<BTreeMap<String, Layer>>,
    events: broadcast::Sender<LayerEvent>,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how many events a slow subscriber may lag behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            layers: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayerEvent> {
        self.events.subscribe()
    }

    /// Insert or replace a layer by name.
    pub fn add(&self, layer: Layer) {
        let name = layer.name.clone();
        let replaced = {
            let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
            layers.insert(name.clone(), layer).is_some()
        };
        let event = if replaced {
            LayerEvent::Replaced { name }
        } else {
            LayerEvent::Added { name }
        };
        self.notify(event);
    }

    pub fn remove(&self, name: &str) -> Option<Layer> {
        let removed = self
            .layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            self.notify(LayerEvent::Removed {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Notifies subscribers only when the visibility actually changes.
    pub fn set_visibility(&self, name: &str, visible: bool) -> Result<(), AnalysisError> {
        let changed = {
            let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
            let layer = layers
                .get_mut(name)
                .ok_or_else(|| AnalysisError::InvalidInput(format!("unknown layer {name}")))?;
            let changed = layer.visible != visible;
            layer.visible = visible;
            changed
        };
        if changed {
            self.notify(LayerEvent::VisibilityChanged {
                name: name.to_string(),
                visible,
            });
        }
        Ok(())
    }

    /// Flip visibility, returning the new state.
    pub fn toggle(&self, name: &str) -> Result<bool, AnalysisError> {
        let visible = self
            .get(name)
            .map(|layer| !layer.visible)
            .ok_or_else(|| AnalysisError::InvalidInput(format!("unknown layer {name}")))?;
        self.set_visibility(name, visible)?;
        Ok(visible)
    }

    pub fn get(&self, name: &str) -> Option<Layer> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<LayerSummary> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(LayerSummary::from)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.layers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, event: LayerEvent) {
        tracing::debug!("Layer event: {:?}", event);
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replace_remove_emit_events() {
        let registry = LayerRegistry::new();
        let mut rx = registry.subscribe();

        registry.add(Layer::new("visibility", LayerKind::Visibility));
        registry.add(Layer::new("visibility", LayerKind::Visibility).with_data(serde_json::json!([])));
        assert!(registry.remove("visibility").is_some());
        assert!(registry.remove("visibility").is_none());

        assert_eq!(rx.try_recv().unwrap(), LayerEvent::Added { name: "visibility".into() });
        assert_eq!(rx.try_recv().unwrap(), LayerEvent::Replaced { name: "visibility".into() });
        assert_eq!(rx.try_recv().unwrap(), LayerEvent::Removed { name: "visibility".into() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn visibility_changes_notify_once() {
        let registry = LayerRegistry::new();
        registry.add(Layer::new("stations", LayerKind::Stations));
        let mut rx = registry.subscribe();

        registry.set_visibility("stations", true).unwrap();
        assert!(rx.try_recv().is_err());

        assert!(!registry.toggle("stations").unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            LayerEvent::VisibilityChanged { name: "stations".into(), visible: false }
        );
        assert!(!registry.get("stations").unwrap().visible);
    }

    #[test]
    fn unknown_layer_is_rejected() {
        let registry = LayerRegistry::new();
        assert!(registry.set_visibility("missing", false).is_err());
        assert!(registry.toggle("missing").is_err());
    }

    #[test]
    fn registries_are_independent() {
        let a = LayerRegistry::new();
        let b = LayerRegistry::new();
        a.add(Layer::new("terrain", LayerKind::Terrain));
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert_eq!(a.list()[0].name, "terrain");
        assert!(!a.list()[0].has_data);
    }
}

//! PersistenceLayer trait: pluggable storage backend
//!
//! Model states and predictions go through this trait so the pipeline does
//! not care where they land:
//! - `InMemoryStore`: bounded in-process store for tests and ephemeral runs
//! - `SledStore`: embedded on-disk store

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

use crate::config::defaults::IN_MEMORY_PREDICTION_LIMIT;
use crate::model::{ModelError, ModelKey, ModelState};
use crate::types::Prediction;

/// Trait for pluggable persistence backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks and the trainer thread.
pub trait PersistenceLayer: Send + Sync {
    /// Store the latest state for its key, replacing any older one
    fn save_model(&self, state: &ModelState) -> Result<(), PersistenceError>;

    /// Latest stored state for `key`
    fn load_model(&self, key: &ModelKey) -> Result<Option<ModelState>, PersistenceError>;

    fn list_model_keys(&self) -> Result<Vec<ModelKey>, PersistenceError>;

    fn append_prediction(&self, prediction: &Prediction) -> Result<(), PersistenceError>;

    /// Most recent predictions, newest first
    fn recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>, PersistenceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("stored model is unreadable: {0}")]
    Model(#[from] ModelError),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

/// In-memory persistence for testing and ephemeral runs
///
/// Thread-safe via `RwLock`. Not durable, contents are lost on restart.
/// Models are kept as serialized bytes so loads go through the same
/// validation as the on-disk backend.
pub struct InMemoryStore {
    models: RwLock<BTreeMap<ModelKey, Vec<u8>>>,
    predictions: RwLock<VecDeque<Prediction>>,
    max_predictions: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_limit(IN_MEMORY_PREDICTION_LIMIT)
    }

    pub fn with_limit(max_predictions: usize) -> Self {
        Self {
            models: RwLock::new(BTreeMap::new()),
            predictions: RwLock::new(VecDeque::new()),
            max_predictions: max_predictions.max(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceLayer for InMemoryStore {
    fn save_model(&self, state: &ModelState) -> Result<(), PersistenceError> {
        let bytes = state.serialize()?;
        let mut models = self
            .models
            .write()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;
        models.insert(state.key.clone(), bytes);
        Ok(())
    }

    fn load_model(&self, key: &ModelKey) -> Result<Option<ModelState>, PersistenceError> {
        let models = self
            .models
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;
        models
            .get(key)
            .map(|bytes| ModelState::deserialize(bytes).map_err(PersistenceError::from))
            .transpose()
    }

    fn list_model_keys(&self) -> Result<Vec<ModelKey>, PersistenceError> {
        let models = self
            .models
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;
        Ok(models.keys().cloned().collect())
    }

    fn append_prediction(&self, prediction: &Prediction) -> Result<(), PersistenceError> {
        let mut store = self
            .predictions
            .write()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;

        store.push_back(prediction.clone());

        // Evict oldest if over limit
        while store.len() > self.max_predictions {
            store.pop_front();
        }

        Ok(())
    }

    fn recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>, PersistenceError> {
        let store = self
            .predictions
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;

        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::cfc::NetworkConfig;
    use crate::config::{ModelConfig, TrainingConfig};
    use crate::model::{ModelKey, ModelState};
    use crate::types::{FeatureSchema, Prediction};

    pub fn model(key: ModelKey, version: u64) -> ModelState {
        let schema = Arc::new(FeatureSchema::default());
        let network = NetworkConfig::from_model_config(
            &ModelConfig {
                sensory_neurons: 12,
                inter_neurons: 4,
                command_neurons: 4,
                motor_neurons: 4,
                ..ModelConfig::default()
            },
            schema.len(),
        );
        ModelState::bootstrap(
            key,
            version,
            schema,
            network,
            &TrainingConfig::default(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    pub fn prediction(satellite_id: &str, secs: i64) -> Prediction {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        Prediction {
            satellite_id: satellite_id.into(),
            for_timestamp: ts,
            produced_at: ts,
            model_version: 1,
            model_key: "shared".into(),
            schema_fingerprint: "fp".into(),
            forecast_vector: vec![0.5],
            forecast_physical: vec![1.5],
            uncertainty: vec![1.0],
            lower: vec![-1.5],
            upper: vec![2.5],
            confidence_level: 0.95,
            staleness_secs: 0.0,
            stale_weather: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{model, prediction};
    use super::*;

    #[test]
    fn test_in_memory_model_replaced_by_key() {
        let store = InMemoryStore::new();
        store.save_model(&model(ModelKey::Shared, 1)).unwrap();
        store.save_model(&model(ModelKey::Shared, 2)).unwrap();
        store
            .save_model(&model(ModelKey::Satellite("A".into()), 7))
            .unwrap();

        assert_eq!(store.load_model(&ModelKey::Shared).unwrap().unwrap().version, 2);
        assert_eq!(store.list_model_keys().unwrap().len(), 2);
        assert!(store
            .load_model(&ModelKey::Satellite("B".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_in_memory_prediction_order_and_limit() {
        let store = InMemoryStore::with_limit(2);
        store.append_prediction(&prediction("A", 100)).unwrap();
        store.append_prediction(&prediction("A", 200)).unwrap();
        store.append_prediction(&prediction("A", 300)).unwrap();

        let list = store.recent_predictions(10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].for_timestamp.timestamp(), 300); // most recent first
        assert_eq!(list[1].for_timestamp.timestamp(), 200);
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn PersistenceLayer> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.append_prediction(&prediction("A", 42)).unwrap();
        assert_eq!(store.recent_predictions(10).unwrap().len(), 1);
    }
}

//! Sled-backed persistence.
//!
//! Two trees:
//! - `models`: key = model key string, value = serialized `ModelState`
//! - `predictions`: key = produced_at nanos (big-endian, offset to sort
//!   correctly) followed by a sled-generated id, value = JSON `Prediction`

use std::path::Path;

use crate::model::{ModelKey, ModelState};
use crate::types::Prediction;

use super::persistence::{PersistenceError, PersistenceLayer};

const MODELS_TREE: &str = "models";
const PREDICTIONS_TREE: &str = "predictions";

#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    models: sled::Tree,
    predictions: sled::Tree,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let models = db.open_tree(MODELS_TREE)?;
        let predictions = db.open_tree(PREDICTIONS_TREE)?;
        tracing::info!(path = %path_ref.display(), "Sled store opened");
        Ok(Self {
            db,
            models,
            predictions,
        })
    }

    fn prediction_key(&self, prediction: &Prediction) -> Result<[u8; 16], PersistenceError> {
        let nanos = prediction
            .produced_at
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX);
        // Flip the sign bit so negative times sort before positive ones
        let ordered = (nanos as u64) ^ (1 << 63);
        let id = self.db.generate_id()?;
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&ordered.to_be_bytes());
        key[8..].copy_from_slice(&id.to_be_bytes());
        Ok(key)
    }

    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }
}

impl PersistenceLayer for SledStore {
    fn save_model(&self, state: &ModelState) -> Result<(), PersistenceError> {
        let bytes = state.serialize()?;
        self.models.insert(state.key.to_string().as_bytes(), bytes)?;
        Ok(())
    }

    fn load_model(&self, key: &ModelKey) -> Result<Option<ModelState>, PersistenceError> {
        match self.models.get(key.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(ModelState::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_model_keys(&self) -> Result<Vec<ModelKey>, PersistenceError> {
        let mut keys = Vec::new();
        for item in self.models.iter() {
            let (raw, _) = item?;
            match std::str::from_utf8(&raw).ok().and_then(|s| s.parse().ok()) {
                Some(key) => keys.push(key),
                None => tracing::warn!(key = ?raw, "Skipping unreadable model key"),
            }
        }
        Ok(keys)
    }

    fn append_prediction(&self, prediction: &Prediction) -> Result<(), PersistenceError> {
        let key = self.prediction_key(prediction)?;
        let value = serde_json::to_vec(prediction)?;
        self.predictions.insert(key, value)?;
        Ok(())
    }

    fn recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>, PersistenceError> {
        let mut out = Vec::with_capacity(limit.min(1024));
        for item in self.predictions.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            match serde_json::from_slice::<Prediction>(&value) {
                Ok(p) => out.push(p),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable prediction"),
            }
        }
        Ok(out)
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

#[cfg(test)]
mod tests {
    use super::super::persistence::test_support::{model, prediction};
    use super::*;

    #[test]
    fn test_models_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let state = model(ModelKey::Satellite("25544".into()), 3);
        {
            let store = SledStore::open(&path).unwrap();
            store.save_model(&state).unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(
            store.list_model_keys().unwrap(),
            vec![ModelKey::Satellite("25544".into())]
        );
        let loaded = store
            .load_model(&ModelKey::Satellite("25544".into()))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_recent_predictions_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("p.db")).unwrap();
        for secs in [300, 100, 200] {
            store.append_prediction(&prediction("A", secs)).unwrap();
        }
        let recent = store.recent_predictions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].produced_at.timestamp(), 300);
        assert_eq!(recent[1].produced_at.timestamp(), 200);
    }

    #[test]
    fn test_corrupt_model_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("c.db")).unwrap();
        store.models.insert("shared", &b"not json"[..]).unwrap();
        assert!(store.load_model(&ModelKey::Shared).is_err());
    }
}

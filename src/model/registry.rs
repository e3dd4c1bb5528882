//! Model slots with atomic publication.
//!
//! Each slot is an `ArcSwapOption<ModelState>`: readers take a snapshot
//! with one atomic load and keep using it while the trainer publishes the
//! next version with one pointer swap. No reader ever observes a partially
//! built state.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::state::{ModelError, ModelKey, ModelState};
use crate::cfc::NetworkConfig;
use crate::config::{ForecastConfig, ModelScope, TrainingConfig};
use crate::types::FeatureSchema;

type Slot = Arc<ArcSwapOption<ModelState>>;

pub struct ModelRegistry {
    scope: ModelScope,
    schema: Arc<FeatureSchema>,
    network: NetworkConfig,
    training: TrainingConfig,
    slots: RwLock<BTreeMap<ModelKey, Slot>>,
}

impl ModelRegistry {
    pub fn new(
        scope: ModelScope,
        schema: Arc<FeatureSchema>,
        network: NetworkConfig,
        training: TrainingConfig,
    ) -> Self {
        Self {
            scope,
            schema,
            network,
            training,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &ForecastConfig, schema: Arc<FeatureSchema>) -> Self {
        let network = NetworkConfig::from_model_config(&config.model, schema.len());
        Self::new(config.model.scope, schema, network, config.training.clone())
    }

    pub const fn scope(&self) -> ModelScope {
        self.scope
    }

    /// Schema every model in this registry is trained against.
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Slot serving `satellite_id` under the configured scope.
    pub fn key_for(&self, satellite_id: &str) -> ModelKey {
        match self.scope {
            ModelScope::Shared => ModelKey::Shared,
            ModelScope::PerSatellite => ModelKey::Satellite(satellite_id.to_string()),
        }
    }

    fn slot(&self, key: &ModelKey) -> Option<Slot> {
        let slots = self.slots.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.get(key).cloned()
    }

    fn slot_or_insert(&self, key: &ModelKey) -> Slot {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Latest published state for `key`.
    pub fn snapshot(&self, key: &ModelKey) -> Option<Arc<ModelState>> {
        self.slot(key).and_then(|slot| slot.load_full())
    }

    /// Latest state serving `satellite_id`.
    pub fn snapshot_for(&self, satellite_id: &str) -> Option<Arc<ModelState>> {
        self.snapshot(&self.key_for(satellite_id))
    }

    /// Untrained state for `key` from this registry's template.
    pub fn fresh_state(&self, key: ModelKey, version: u64, now: DateTime<Utc>) -> ModelState {
        ModelState::bootstrap(
            key,
            version,
            Arc::clone(&self.schema),
            self.network,
            &self.training,
            now,
        )
    }

    /// Current state for `key`, bootstrapping version 0 into an empty slot.
    pub fn get_or_bootstrap(&self, key: &ModelKey, now: DateTime<Utc>) -> Arc<ModelState> {
        let slot = self.slot_or_insert(key);
        if let Some(state) = slot.load_full() {
            return state;
        }
        let fresh = Arc::new(self.fresh_state(key.clone(), 0, now));
        let prev = slot.compare_and_swap(&None::<Arc<ModelState>>, Some(Arc::clone(&fresh)));
        match &*prev {
            // Lost a bootstrap race; serve the winner
            Some(existing) => Arc::clone(existing),
            None => {
                info!(model_key = %key, "Bootstrapped untrained model");
                fresh
            }
        }
    }

    /// Put a restored state into an empty slot. Any version is accepted.
    pub fn restore(&self, state: ModelState) -> Result<Arc<ModelState>, ModelError> {
        let key = state.key.clone();
        let slot = self.slot_or_insert(&key);
        let new = Arc::new(state);
        let prev = slot.compare_and_swap(&None::<Arc<ModelState>>, Some(Arc::clone(&new)));
        match &*prev {
            Some(existing) => Err(ModelError::VersionConflict {
                key,
                current: Some(existing.version),
                proposed: new.version,
            }),
            None => {
                debug!(model_key = %key, version = new.version, "Restored model state");
                Ok(new)
            }
        }
    }

    /// Publish the successor of the current state.
    ///
    /// Requires `state.version == current.version + 1`; a conflicting
    /// publish leaves the slot unchanged.
    pub fn publish(&self, state: ModelState) -> Result<Arc<ModelState>, ModelError> {
        let key = state.key.clone();
        let slot = self.slot_or_insert(&key);
        let current = slot.load_full();
        let expected = current.as_ref().map_or(0, |c| c.version + 1);
        let valid = match &current {
            Some(_) => state.version == expected,
            None => true,
        };
        if !valid {
            return Err(ModelError::VersionConflict {
                key,
                current: current.map(|c| c.version),
                proposed: state.version,
            });
        }

        let new = Arc::new(state);
        let prev = slot.compare_and_swap(&current, Some(Arc::clone(&new)));
        let unchanged = match (&*prev, &current) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            return Err(ModelError::VersionConflict {
                key,
                current: (*prev).as_ref().map(|c| c.version),
                proposed: new.version,
            });
        }
        Ok(new)
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        let slots = self.slots.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.keys().cloned().collect()
    }

    /// Latest state of every populated slot, in key order.
    pub fn snapshots(&self) -> Vec<Arc<ModelState>> {
        let slots = self.slots.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.values().filter_map(|slot| slot.load_full()).collect()
    }
}

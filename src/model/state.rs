//! Immutable, versioned model states.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calibration::ResidualCalibration;
use crate::cfc::{AdamOptimizer, CfcNetwork, Gradients, NetworkConfig};
use crate::config::TrainingConfig;
use crate::types::{FeatureSchema, SchemaError};

/// Registry slot a model state lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ModelKey {
    /// One model for every satellite, identity as an input feature.
    Shared,
    Satellite(String),
}

const SATELLITE_PREFIX: &str = "satellite/";

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKey::Shared => f.write_str("shared"),
            ModelKey::Satellite(id) => write!(f, "{SATELLITE_PREFIX}{id}"),
        }
    }
}

impl FromStr for ModelKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "shared" {
            return Ok(ModelKey::Shared);
        }
        match s.strip_prefix(SATELLITE_PREFIX) {
            Some(id) if !id.is_empty() => Ok(ModelKey::Satellite(id.to_string())),
            _ => Err(ModelError::InvalidKey(s.to_string())),
        }
    }
}

impl From<ModelKey> for String {
    fn from(key: ModelKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ModelKey {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("update diverged: {0}")]
    Diverged(String),
    #[error("version conflict on {key}: current {current:?}, proposed {proposed}")]
    VersionConflict {
        key: ModelKey,
        current: Option<u64>,
        proposed: u64,
    },
    #[error("invalid model key '{0}'")]
    InvalidKey(String),
    #[error("model state does not match its network shape")]
    Shape,
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("model state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Everything trainable, plus the optimizer moments and residual statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelParameters {
    pub network: CfcNetwork,
    pub optimizer: AdamOptimizer,
    pub calibration: ResidualCalibration,
}

/// One averaged, clipped gradient step computed by the trainer.
#[derive(Debug, Clone)]
pub struct ParameterUpdate {
    pub grads: Gradients,
    /// Mean mini-batch loss
    pub loss: f64,
    /// Residuals of the newest window (fed to calibration)
    pub residuals: Vec<f64>,
    pub max_param_norm: f64,
    pub now: DateTime<Utc>,
}

/// A model version. Never mutated once published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelState {
    pub key: ModelKey,
    pub version: u64,
    pub schema: Arc<FeatureSchema>,
    pub parameters: ModelParameters,
    pub training_step_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ModelState {
    /// Untrained state at `version`. Fresh keys start at 0.
    pub fn bootstrap(
        key: ModelKey,
        version: u64,
        schema: Arc<FeatureSchema>,
        network: NetworkConfig,
        training: &TrainingConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let network = CfcNetwork::new(network);
        let optimizer = AdamOptimizer::new(network.num_params(), training);
        let calibration = ResidualCalibration::new(network.config().outputs);
        Self {
            key,
            version,
            schema,
            parameters: ModelParameters {
                network,
                optimizer,
                calibration,
            },
            training_step_count: 0,
            created_at: now,
        }
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema.fingerprint
    }

    /// Apply one optimizer step and return the next version.
    ///
    /// `self` is untouched either way. Non-finite loss or parameters, or a
    /// parameter norm above the limit, yield [`ModelError::Diverged`].
    pub(crate) fn apply_update(&self, update: ParameterUpdate) -> Result<ModelState, ModelError> {
        if !update.loss.is_finite() {
            return Err(ModelError::Diverged(format!("non-finite loss {}", update.loss)));
        }
        if !update.grads.is_finite() {
            return Err(ModelError::Diverged("non-finite gradient".into()));
        }

        let mut optimizer = self.parameters.optimizer.clone();
        let mut flat = self.parameters.network.weights().to_flat();
        optimizer.step(&mut flat, &update.grads.to_flat());
        let network = self.parameters.network.with_flat_params(&flat);

        if !network.weights().all_finite() {
            return Err(ModelError::Diverged("non-finite parameters".into()));
        }
        let norm = network.weights().param_norm();
        if norm > update.max_param_norm {
            return Err(ModelError::Diverged(format!(
                "parameter norm {norm:.3} exceeds {}",
                update.max_param_norm
            )));
        }

        let mut calibration = self.parameters.calibration.clone();
        calibration.observe(&update.residuals);

        Ok(ModelState {
            key: self.key.clone(),
            version: self.version + 1,
            schema: Arc::clone(&self.schema),
            parameters: ModelParameters {
                network,
                optimizer,
                calibration,
            },
            training_step_count: self.training_step_count + 1,
            created_at: update.now,
        })
    }

    /// Bytes that restore an identical state through [`Self::deserialize`].
    pub fn serialize(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ModelError> {
        let state: ModelState = serde_json::from_slice(bytes)?;
        state.schema.verify()?;
        let net = &state.parameters.network;
        if !net.is_consistent()
            || net.config().inputs != state.schema.len()
            || state.parameters.optimizer.num_params() != net.num_params()
            || state.parameters.calibration.len() != net.config().outputs
        {
            return Err(ModelError::Shape);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use chrono::TimeZone;

    fn fresh(key: ModelKey) -> ModelState {
        let schema = Arc::new(FeatureSchema::default());
        let network = NetworkConfig::from_model_config(&ModelConfig::default(), schema.len());
        ModelState::bootstrap(
            key,
            0,
            schema,
            network,
            &TrainingConfig::default(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    fn update(state: &ModelState, grad: f64, max_param_norm: f64) -> ParameterUpdate {
        let mut grads = Gradients::zeros(state.parameters.network.weights());
        grads.d_b_out.iter_mut().for_each(|g| *g = grad);
        ParameterUpdate {
            grads,
            loss: 0.5,
            residuals: vec![0.1; state.schema.len()],
            max_param_norm,
            now: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        }
    }

    #[test]
    fn test_model_key_display_and_parse() {
        assert_eq!(ModelKey::Shared.to_string(), "shared");
        let key = ModelKey::Satellite("25544".into());
        assert_eq!(key.to_string(), "satellite/25544");
        assert_eq!("satellite/25544".parse::<ModelKey>().unwrap(), key);
        assert!("satellite/".parse::<ModelKey>().is_err());
        assert!("bogus".parse::<ModelKey>().is_err());
    }

    #[test]
    fn test_apply_update_increments_version() {
        let state = fresh(ModelKey::Shared);
        let next = state.apply_update(update(&state, 1.0, 1e4)).unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.training_step_count, 1);
        assert_ne!(next.parameters.network, state.parameters.network);
        assert_eq!(next.parameters.calibration.observations, 1);
        // Original untouched
        assert_eq!(state.version, 0);
        assert_eq!(state.parameters.optimizer.steps, 0);
    }

    #[test]
    fn test_divergence_on_non_finite_gradient() {
        let state = fresh(ModelKey::Shared);
        let err = state.apply_update(update(&state, f64::NAN, 1e4)).unwrap_err();
        assert!(matches!(err, ModelError::Diverged(_)));
    }

    #[test]
    fn test_divergence_on_param_norm() {
        let state = fresh(ModelKey::Shared);
        let err = state.apply_update(update(&state, 1.0, 1e-3)).unwrap_err();
        assert!(matches!(err, ModelError::Diverged(msg) if msg.contains("parameter norm")));
    }

    #[test]
    fn test_serialize_round_trip_is_byte_exact() {
        let state = fresh(ModelKey::Satellite("ISS".into()));
        let state = state.apply_update(update(&state, 0.3, 1e4)).unwrap();
        let bytes = state.serialize().unwrap();
        let restored = ModelState::deserialize(&bytes).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.serialize().unwrap(), bytes);
    }

    #[test]
    fn test_deserialize_rejects_tampered_schema() {
        let state = fresh(ModelKey::Shared);
        let mut value: serde_json::Value = serde_json::from_slice(&state.serialize().unwrap()).unwrap();
        value["schema"]["fingerprint"] = serde_json::Value::String("0000".into());
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            ModelState::deserialize(&bytes),
            Err(ModelError::Schema(_))
        ));
    }
}

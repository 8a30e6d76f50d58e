//! Simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NestError, NestResult, ValidationError};

/// Runtime switches for a simulation core and the trees it generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Share compiled samplers of a child group on the parent instance.
    pub hoist: bool,
    /// Seed for the tree RNG. `None` draws a seed from OS entropy.
    pub seed: Option<u64>,
    /// Fail `generate` when an exogenous input is not supplied.
    pub strict_exogenous: bool,
    /// Upper bound for a single `sample_n` request.
    pub max_sample_batch: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            hoist: true,
            seed: None,
            strict_exogenous: false,
            max_sample_batch: 1_000_000,
        }
    }
}

impl SimulationConfig {
    /// Config with a fixed seed and every other field at its default.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Enable or disable sampler hoisting.
    #[must_use]
    pub const fn with_hoist(mut self, hoist: bool) -> Self {
        self.hoist = hoist;
        self
    }

    /// Enable or disable strict exogenous inputs.
    #[must_use]
    pub const fn with_strict_exogenous(mut self, strict: bool) -> Self {
        self.strict_exogenous = strict;
        self
    }

    /// Validate the config.
    ///
    /// This must be called before constructing a `SimulationCore`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_sample_batch == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_sample_batch must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> NestResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> NestResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NestError::internal(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        SimulationConfig::default().validate().unwrap();
        assert!(SimulationConfig::default().hoist);
    }

    #[test]
    fn config_rejects_zero_batch() {
        let mut c = SimulationConfig::default();
        c.max_sample_batch = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_partial_json_uses_defaults() {
        let c = SimulationConfig::from_json_str(r#"{"seed": 7, "hoist": false}"#).unwrap();
        assert_eq!(c.seed, Some(7));
        assert!(!c.hoist);
        assert_eq!(c.max_sample_batch, 1_000_000);
    }

    #[test]
    fn config_bad_json_is_validation_error() {
        let err = SimulationConfig::from_json_str("{not json").unwrap_err();
        assert!(err.is_validation());
        let err = SimulationConfig::from_json_str(r#"{"max_sample_batch": 0}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, r#"{"strict_exogenous": true}"#).unwrap();
        let c = SimulationConfig::from_json_file(&path).unwrap();
        assert!(c.strict_exogenous);
        assert!(c.hoist);

        let missing = SimulationConfig::from_json_file(dir.path().join("nope.json")).unwrap_err();
        assert!(missing.is_internal());
    }
}

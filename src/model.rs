//! The model capability consumed by fitting code.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;

use crate::error::NestResult;
use crate::simulation::{ParameterTree, SimulationCore};

/// What a fitting algorithm needs from a model.
pub trait BayesianModel {
    /// One draw of the model's parameters.
    type Instance;

    /// Draw an instance from the prior.
    ///
    /// # Errors
    ///
    /// Propagates generation errors.
    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> NestResult<Self::Instance>;

    /// Log prior density of an instance.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors.
    fn evaluate_prior(&self, instance: &Self::Instance) -> NestResult<f64>;

    /// Log likelihood of the data given an instance.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors.
    fn evaluate_likelihood(&self, instance: &Self::Instance) -> NestResult<f64>;

    /// Log prior plus log likelihood.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors.
    fn evaluate_posterior(&self, instance: &Self::Instance) -> NestResult<f64> {
        Ok(self.evaluate_prior(instance)? + self.evaluate_likelihood(instance)?)
    }
}

type Likelihood = dyn Fn(&ParameterTree) -> NestResult<f64> + Send + Sync;

/// A simulation core with fixed exogenous inputs and a likelihood.
///
/// Each prior draw is a fresh [`ParameterTree`]; its prior is the deep log
/// prior of the root.
pub struct HierarchicalModel {
    core: Arc<SimulationCore>,
    nickname: String,
    exo: IndexMap<String, f64>,
    likelihood: Box<Likelihood>,
}

impl HierarchicalModel {
    /// Model with a zero likelihood.
    #[must_use]
    pub fn new(core: Arc<SimulationCore>, nickname: impl Into<String>) -> Self {
        Self {
            core,
            nickname: nickname.into(),
            exo: IndexMap::new(),
            likelihood: Box::new(|_| Ok(0.0)),
        }
    }

    /// Supply an exogenous input for every draw.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: f64) -> Self {
        self.exo.insert(name.into(), value);
        self
    }

    /// Set the likelihood.
    #[must_use]
    pub fn with_likelihood<F>(mut self, f: F) -> Self
    where
        F: Fn(&ParameterTree) -> NestResult<f64> + Send + Sync + 'static,
    {
        self.likelihood = Box::new(f);
        self
    }

    /// The underlying core.
    #[must_use]
    pub fn core(&self) -> &Arc<SimulationCore> {
        &self.core
    }
}

impl fmt::Debug for HierarchicalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalModel")
            .field("nickname", &self.nickname)
            .field("exo", &self.exo)
            .finish_non_exhaustive()
    }
}

impl BayesianModel for HierarchicalModel {
    type Instance = ParameterTree;

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> NestResult<ParameterTree> {
        self.core.generate_seeded(&self.nickname, &self.exo, rng.gen())
    }

    fn evaluate_prior(&self, instance: &ParameterTree) -> NestResult<f64> {
        instance.deep_log_prior(instance.root())
    }

    fn evaluate_likelihood(&self, instance: &ParameterTree) -> NestResult<f64> {
        (self.likelihood)(instance)
    }
}

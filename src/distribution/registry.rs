//! Name to constructor table for distribution families.

use std::collections::HashMap;

use super::Distribution;
use crate::error::{ExecutionError, ValidationError};

/// Builds a distribution from already-evaluated arguments.
///
/// Called with exactly `params.len()` arguments.
pub type DistributionCtor = fn(&[f64]) -> Result<Distribution, ExecutionError>;

/// A registered distribution family.
#[derive(Debug, Clone, Copy)]
pub struct DistributionSpec {
    /// Parameter names, in call order.
    pub params: &'static [&'static str],
    /// Constructor.
    pub ctor: DistributionCtor,
}

impl DistributionSpec {
    /// Check a call with `actual` arguments.
    pub fn check_arity(&self, name: &str, actual: usize) -> Result<(), ValidationError> {
        if actual == self.params.len() {
            Ok(())
        } else {
            Err(ValidationError::InvalidArity {
                name: name.to_string(),
                expected: self.params.len().to_string(),
                actual,
            })
        }
    }
}

/// Table of distribution families known to the script reader.
#[derive(Debug, Clone, Default)]
pub struct DistributionRegistry {
    families: HashMap<String, DistributionSpec>,
}

impl DistributionRegistry {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in family.
    #[must_use]
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register("k", &["value"], |a| Distribution::constant(a[0]));
        reg.register("norm", &["mean", "sd"], |a| Distribution::normal(a[0], a[1]));
        reg.register("lnorm", &["meanlog", "sdlog"], |a| Distribution::log_normal(a[0], a[1]));
        reg.register("gamma", &["shape", "rate"], |a| Distribution::gamma(a[0], a[1]));
        reg.register("exp", &["rate"], |a| Distribution::exponential(a[0]));
        reg.register("unif", &["min", "max"], |a| Distribution::uniform(a[0], a[1]));
        reg.register("beta", &["alpha", "beta"], |a| Distribution::beta(a[0], a[1]));
        reg.register("binom", &["size", "prob"], |a| Distribution::binomial(a[0], a[1]));
        reg.register("chisq", &["df"], |a| Distribution::chi_squared(a[0]));
        reg.register("invgamma", &["shape", "rate"], |a| Distribution::inv_gamma(a[0], a[1]));
        reg.register("triangle", &["a", "m", "b"], |a| Distribution::triangular(a[0], a[1], a[2]));
        reg.register("pois", &["rate"], |a| Distribution::poisson(a[0]));
        reg
    }

    /// Register or replace a family.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: &'static [&'static str],
        ctor: DistributionCtor,
    ) {
        self.families.insert(name.into(), DistributionSpec { params, ctor });
    }

    /// Look up a family.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DistributionSpec> {
        self.families.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }
}

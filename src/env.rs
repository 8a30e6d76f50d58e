//! Value environments.
//!
//! Everything that evaluates a node reads its inputs through [`Lookup`], so the
//! same code runs against a plain map, a scratch layer over a parameter core,
//! or a whole chain of ancestor cores.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use indexmap::IndexMap;

/// Read-only access to named values.
pub trait Lookup {
    /// Returns the value bound to `name`, if any.
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl<S: BuildHasher> Lookup for HashMap<String, f64, S> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<S: BuildHasher> Lookup for IndexMap<String, f64, S> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Lookup for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<T: Lookup + ?Sized> Lookup for &T {
    fn lookup(&self, name: &str) -> Option<f64> {
        (**self).lookup(name)
    }
}

/// An environment with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

impl Lookup for Empty {
    fn lookup(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// A writable scratch layer over a read-only base environment.
///
/// Values written to the layer shadow the base.
pub struct Layered<'a> {
    /// Values produced in this layer.
    pub top: IndexMap<String, f64>,
    base: &'a dyn Lookup,
}

impl<'a> Layered<'a> {
    /// Create an empty layer over `base`.
    #[must_use]
    pub fn new(base: &'a dyn Lookup) -> Self {
        Self {
            top: IndexMap::new(),
            base,
        }
    }

    /// Bind `name` in the scratch layer.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.top.insert(name.into(), value);
    }
}

impl Lookup for Layered<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.top.get(name).copied().or_else(|| self.base.lookup(name))
    }
}

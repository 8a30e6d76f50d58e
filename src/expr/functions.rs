//! Function table for math expressions.

use std::collections::HashMap;

use crate::error::ValidationError;

/// Signature of every expression function. Arity is checked at parse time.
pub type MathFn = fn(&[f64]) -> f64;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments.
    Exact(usize),
    /// This many arguments or more.
    AtLeast(usize),
}

impl Arity {
    /// Check a call of `name` with `actual` arguments.
    pub fn check(self, name: &str, actual: usize) -> Result<(), ValidationError> {
        let (ok, expected) = match self {
            Self::Exact(n) => (actual == n, n.to_string()),
            Self::AtLeast(n) => (actual >= n, format!("at least {n}")),
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidArity {
                name: name.to_string(),
                expected,
                actual,
            })
        }
    }
}

/// A registered function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    /// Accepted argument count.
    pub arity: Arity,
    /// Implementation.
    pub func: MathFn,
}

/// Name to function table used when compiling expressions.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard math functions.
    #[must_use]
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register("exp", Arity::Exact(1), |a| a[0].exp());
        reg.register("log", Arity::Exact(1), |a| a[0].ln());
        reg.register("sqrt", Arity::Exact(1), |a| a[0].sqrt());
        reg.register("abs", Arity::Exact(1), |a| a[0].abs());
        reg.register("sin", Arity::Exact(1), |a| a[0].sin());
        reg.register("cos", Arity::Exact(1), |a| a[0].cos());
        reg.register("tan", Arity::Exact(1), |a| a[0].tan());
        reg.register("ceil", Arity::Exact(1), |a| a[0].ceil());
        reg.register("floor", Arity::Exact(1), |a| a[0].floor());
        reg.register("round", Arity::Exact(1), |a| a[0].round());
        reg.register("erf", Arity::Exact(1), |a| erf(a[0]));
        reg.register("logit", Arity::Exact(1), |a| (a[0] / (1.0 - a[0])).ln());
        reg.register("expit", Arity::Exact(1), |a| 1.0 / (1.0 + (-a[0]).exp()));
        reg.register("pow", Arity::Exact(2), |a| a[0].powf(a[1]));
        reg.register("hypot", Arity::Exact(2), |a| a[0].hypot(a[1]));
        reg.register("min", Arity::AtLeast(1), |a| a.iter().copied().fold(f64::INFINITY, f64::min));
        reg.register("max", Arity::AtLeast(1), |a| {
            a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        });
        reg
    }

    /// Register or replace a function.
    pub fn register(&mut self, name: impl Into<String>, arity: Arity, func: MathFn) {
        self.functions.insert(name.into(), FunctionSpec { arity, func });
    }

    /// Look up a function.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Error function (Abramowitz and Stegun 7.1.26, |error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_has_math_functions() {
        let reg = FunctionRegistry::standard();
        for name in ["exp", "log", "pow", "min", "max", "logit", "expit", "erf"] {
            assert!(reg.contains(name), "{name}");
        }
        assert!(!reg.contains("binom"));
    }

    #[test]
    fn arity_check() {
        assert!(Arity::Exact(2).check("pow", 2).is_ok());
        assert!(Arity::Exact(2).check("pow", 1).is_err());
        assert!(Arity::AtLeast(1).check("max", 4).is_ok());
        assert!(Arity::AtLeast(1).check("max", 0).is_err());
    }

    #[test]
    fn erf_matches_known_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
    }

    #[test]
    fn custom_function() {
        let mut reg = FunctionRegistry::new();
        reg.register("twice", Arity::Exact(1), |a| 2.0 * a[0]);
        let spec = reg.get("twice").unwrap();
        assert_eq!((spec.func)(&[4.0]), 8.0);
    }
}

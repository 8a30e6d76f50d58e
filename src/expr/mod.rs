//! Math expression language used by Function nodes and distribution arguments.
//!
//! Expressions are lexed with logos, parsed by a small Pratt parser, and bound
//! to a [`FunctionRegistry`] at compile time so that evaluation never has to
//! resolve names other than variables.

pub mod functions;
pub mod lexer;
pub mod parser;

pub use functions::{Arity, FunctionRegistry, FunctionSpec, MathFn};
pub use parser::{BinaryOp, Expr};

use crate::env::Lookup;
use crate::error::{ExecutionError, ValidationError};

/// A compiled expression with its free variables.
#[derive(Debug, Clone)]
pub struct MathExpression {
    source: String,
    root: Expr,
    variables: Vec<String>,
}

impl MathExpression {
    /// Compile `source` against `functions`.
    pub fn parse(source: &str, functions: &FunctionRegistry) -> Result<Self, ValidationError> {
        let source = source.trim();
        let root = parser::parse(source, functions)?;
        let mut variables = Vec::new();
        collect_variables(&root, &mut variables);
        Ok(Self {
            source: source.to_string(),
            root,
            variables,
        })
    }

    /// The source text, trimmed.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free variables in order of first appearance. Function names are not included.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Returns true if the expression has no free variables.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.variables.is_empty()
    }

    /// Evaluate against `env`.
    ///
    /// Fails with `MissingInput` if a variable is unbound, and with `NonFinite`
    /// if the result is NaN or infinite.
    pub fn evaluate(&self, env: &dyn Lookup) -> Result<f64, ExecutionError> {
        let value = eval(&self.root, env)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExecutionError::NonFinite {
                expr: self.source.clone(),
                value,
            })
        }
    }
}

impl std::fmt::Display for MathExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_variables(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Var(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Neg(inner) => collect_variables(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_variables(arg, out);
            }
        }
    }
}

fn eval(expr: &Expr, env: &dyn Lookup) -> Result<f64, ExecutionError> {
    match expr {
        Expr::Number(v) => Ok(*v),
        Expr::Var(name) => env
            .lookup(name)
            .ok_or_else(|| ExecutionError::MissingInput { name: name.clone() }),
        Expr::Neg(inner) => Ok(-eval(inner, env)?),
        Expr::Binary { op, lhs, rhs } => Ok(op.apply(eval(lhs, env)?, eval(rhs, env)?)),
        Expr::Call { func, args, .. } => {
            let values = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(func(&values))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn variables_in_first_appearance_order() {
        let e = MathExpression::parse("b * exp(a) + b / c", &FunctionRegistry::standard()).unwrap();
        assert_eq!(e.variables(), ["b", "a", "c"]);
        assert!(!e.is_constant());
        assert!(MathExpression::parse("max(1, 2)", &FunctionRegistry::standard())
            .unwrap()
            .is_constant());
    }

    #[test]
    fn evaluates_against_env() {
        let e = MathExpression::parse(" a + 3 ", &FunctionRegistry::standard()).unwrap();
        assert_eq!(e.source(), "a + 3");
        assert_eq!(e.evaluate(&env(&[("a", 7.0)])).unwrap(), 10.0);
    }

    #[test]
    fn missing_variable_is_missing_input() {
        let e = MathExpression::parse("d + c", &FunctionRegistry::standard()).unwrap();
        let err = e.evaluate(&env(&[("d", 1.0)])).unwrap_err();
        assert_eq!(err, ExecutionError::MissingInput { name: "c".into() });
    }

    #[test]
    fn non_finite_is_rejected() {
        let e = MathExpression::parse("1 / x", &FunctionRegistry::standard()).unwrap();
        assert!(matches!(
            e.evaluate(&env(&[("x", 0.0)])),
            Err(ExecutionError::NonFinite { .. })
        ));
    }
}

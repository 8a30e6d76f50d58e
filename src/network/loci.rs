//! Typed network nodes.

use std::fmt;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::distribution::{Distribution, DistributionSpec};
use crate::env::Lookup;
use crate::error::{ExecutionError, ValidationError};
use crate::expr::MathExpression;
use crate::registry::Registry;

/// How a node's value is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LociKind {
    /// A literal constant.
    Value,
    /// Supplied from outside the network.
    ExoValue,
    /// Deterministic expression over parents.
    Function,
    /// Drawn from a distribution parametrized by parents.
    Distribution,
    /// Structural placeholder; never realized.
    Pseudo,
}

impl fmt::Display for LociKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Value => "Value",
            Self::ExoValue => "ExoValue",
            Self::Function => "Function",
            Self::Distribution => "Distribution",
            Self::Pseudo => "Pseudo",
        };
        f.write_str(s)
    }
}

/// A distribution call such as `binom(b, 0.5)` whose arguments are expressions.
#[derive(Debug, Clone)]
pub struct DistributionCall {
    source: String,
    family: String,
    args: Vec<MathExpression>,
    spec: DistributionSpec,
}

fn call_pattern() -> Result<Regex, ValidationError> {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)$").map_err(|e| ValidationError::Parse {
        input: String::new(),
        reason: e.to_string(),
    })
}

/// Split on commas that are not nested inside parentheses.
pub(crate) fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

impl DistributionCall {
    /// Parse `family(arg, ...)` against the registry.
    pub fn parse(source: &str, registry: &Registry) -> Result<Self, ValidationError> {
        let source = source.trim();
        let caps = call_pattern()?
            .captures(source)
            .ok_or_else(|| ValidationError::Parse {
                input: source.to_string(),
                reason: "expected a distribution call like name(args)".to_string(),
            })?;
        let family = caps[1].to_string();
        let spec = *registry
            .distributions
            .get(&family)
            .ok_or_else(|| ValidationError::UnknownDistribution { name: family.clone() })?;
        let args = split_top_level(&caps[2])
            .into_iter()
            .map(|a| MathExpression::parse(a, &registry.functions))
            .collect::<Result<Vec<_>, _>>()?;
        spec.check_arity(&family, args.len())?;
        Ok(Self {
            source: source.to_string(),
            family,
            args,
            spec,
        })
    }

    /// Distribution family name.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Variables referenced by any argument, in first-appearance order.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for arg in &self.args {
            for v in arg.variables() {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
        }
        out
    }

    /// Evaluate the arguments and build the distribution.
    pub fn resolve(&self, env: &dyn Lookup) -> Result<Distribution, ExecutionError> {
        let values = self
            .args
            .iter()
            .map(|a| a.evaluate(env))
            .collect::<Result<Vec<_>, _>>()?;
        (self.spec.ctor)(&values)
    }
}

impl fmt::Display for DistributionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Kind-specific payload of a node.
#[derive(Debug, Clone)]
pub enum Definition {
    /// Constant.
    Value(f64),
    /// Supplied from outside the network.
    ExoValue,
    /// Deterministic expression over the parents.
    Function(MathExpression),
    /// Random draw.
    Distribution(DistributionCall),
    /// Placeholder over the listed parents; never sampled.
    Pseudo(Vec<String>),
}

/// One node of a Bayesian network.
#[derive(Debug, Clone)]
pub struct Loci {
    name: String,
    definition: Definition,
}

impl Loci {
    /// A constant.
    #[must_use]
    pub fn value(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            definition: Definition::Value(value),
        }
    }

    /// An externally supplied value.
    #[must_use]
    pub fn exo(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: Definition::ExoValue,
        }
    }

    /// A deterministic function of its parents.
    pub fn function(name: impl Into<String>, expr: &str, registry: &Registry) -> Result<Self, ValidationError> {
        Ok(Self {
            name: name.into(),
            definition: Definition::Function(MathExpression::parse(expr, &registry.functions)?),
        })
    }

    /// A random variable.
    pub fn distribution(
        name: impl Into<String>,
        call: &str,
        registry: &Registry,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            name: name.into(),
            definition: Definition::Distribution(DistributionCall::parse(call, registry)?),
        })
    }

    /// A placeholder that only records dependencies.
    #[must_use]
    pub fn pseudo<I, S>(name: impl Into<String>, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ps: Vec<String> = Vec::new();
        for p in parents {
            let p = p.into();
            if !ps.contains(&p) {
                ps.push(p);
            }
        }
        Self {
            name: name.into(),
            definition: Definition::Pseudo(ps),
        }
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind-specific payload.
    #[must_use]
    pub const fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> LociKind {
        match self.definition {
            Definition::Value(_) => LociKind::Value,
            Definition::ExoValue => LociKind::ExoValue,
            Definition::Function(_) => LociKind::Function,
            Definition::Distribution(_) => LociKind::Distribution,
            Definition::Pseudo(_) => LociKind::Pseudo,
        }
    }

    /// Parent names in first-appearance order.
    #[must_use]
    pub fn parents(&self) -> Vec<String> {
        match &self.definition {
            Definition::Value(_) | Definition::ExoValue => Vec::new(),
            Definition::Function(expr) => expr.variables().to_vec(),
            Definition::Distribution(call) => call.variables(),
            Definition::Pseudo(ps) => ps.clone(),
        }
    }

    /// Definition text: the literal, the expression, or the distribution call.
    #[must_use]
    pub fn definition_text(&self) -> String {
        match &self.definition {
            Definition::Value(v) => v.to_string(),
            Definition::ExoValue => String::new(),
            Definition::Function(expr) => expr.source().to_string(),
            Definition::Distribution(call) => call.to_string(),
            Definition::Pseudo(ps) => format!("f({})", ps.join(", ")),
        }
    }

    /// Returns true for Distribution nodes.
    #[must_use]
    pub const fn is_random(&self) -> bool {
        matches!(self.definition, Definition::Distribution(_))
    }

    /// Returns true for nodes that cannot be derived inside the network.
    #[must_use]
    pub const fn is_exogenous(&self) -> bool {
        matches!(self.definition, Definition::ExoValue | Definition::Pseudo(_))
    }

    /// Realize this node given its parents in `env`.
    pub fn sample<R: Rng + ?Sized>(&self, env: &dyn Lookup, rng: &mut R) -> Result<f64, ExecutionError> {
        match &self.definition {
            Definition::Value(v) => Ok(*v),
            Definition::ExoValue => self.read_exo(env),
            Definition::Function(expr) => expr.evaluate(env),
            Definition::Distribution(call) => call.resolve(env)?.sample(rng),
            Definition::Pseudo(_) => Err(self.pseudo_error()),
        }
    }

    /// Log-density contribution of this node's value in `env`. Zero for non-random nodes.
    pub fn evaluate(&self, env: &dyn Lookup) -> Result<f64, ExecutionError> {
        match &self.definition {
            Definition::Value(_) | Definition::ExoValue | Definition::Function(_) => Ok(0.0),
            Definition::Distribution(call) => {
                let x = env.lookup(&self.name).ok_or_else(|| ExecutionError::MissingInput {
                    name: self.name.clone(),
                })?;
                Ok(call.resolve(env)?.log_density(x))
            }
            Definition::Pseudo(_) => Err(self.pseudo_error()),
        }
    }

    /// Pre-evaluate against fixed parents.
    ///
    /// Deterministic kinds collapse to a point mass so every node can be cached
    /// the same way.
    pub fn freeze(&self, env: &dyn Lookup) -> Result<Distribution, ExecutionError> {
        match &self.definition {
            Definition::Value(v) => Distribution::constant(*v),
            Definition::ExoValue => Distribution::constant(self.read_exo(env)?),
            Definition::Function(expr) => Distribution::constant(expr.evaluate(env)?),
            Definition::Distribution(call) => call.resolve(env),
            Definition::Pseudo(_) => Err(self.pseudo_error()),
        }
    }

    fn read_exo(&self, env: &dyn Lookup) -> Result<f64, ExecutionError> {
        env.lookup(&self.name).ok_or_else(|| ExecutionError::MissingInput {
            name: self.name.clone(),
        })
    }

    fn pseudo_error(&self) -> ExecutionError {
        ExecutionError::PseudoNotRealizable {
            name: self.name.clone(),
        }
    }

    /// Serialize with an optional description.
    #[must_use]
    pub fn to_json(&self, description: Option<&str>) -> LociJson {
        let def = match &self.definition {
            Definition::Value(v) => Some(serde_json::json!(v)),
            Definition::ExoValue => None,
            _ => Some(serde_json::Value::String(self.definition_text())),
        };
        LociJson {
            name: self.name.clone(),
            kind: self.kind(),
            def,
            parents: self.parents(),
            des: description.map(str::to_string),
        }
    }

    /// Rebuild from JSON.
    pub fn from_json(js: &LociJson, registry: &Registry) -> Result<Self, ValidationError> {
        let text = || -> Result<String, ValidationError> {
            match &js.def {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                _ => Err(ValidationError::InconsistentJson {
                    reason: format!("node '{}' has no definition", js.name),
                }),
            }
        };
        match js.kind {
            LociKind::Value => {
                let raw = text()?;
                let v = raw.trim().parse::<f64>().map_err(|e| ValidationError::Parse {
                    input: raw.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Self::value(&js.name, v))
            }
            LociKind::ExoValue => Ok(Self::exo(&js.name)),
            LociKind::Function => Self::function(&js.name, &text()?, registry),
            LociKind::Distribution => Self::distribution(&js.name, &text()?, registry),
            LociKind::Pseudo => Ok(Self::pseudo(&js.name, js.parents.iter().cloned())),
        }
    }
}

impl fmt::Display for Loci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.definition {
            Definition::ExoValue => f.write_str(&self.name),
            Definition::Distribution(call) => write!(f, "{} ~ {call}", self.name),
            _ => write!(f, "{} = {}", self.name, self.definition_text()),
        }
    }
}

/// JSON form of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LociJson {
    /// Node name.
    pub name: String,
    /// Node kind.
    #[serde(rename = "Type")]
    pub kind: LociKind,
    /// Value, expression text, or distribution source. Absent for inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub def: Option<serde_json::Value>,
    /// Parent names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub des: Option<String>,
}

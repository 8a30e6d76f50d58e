//! Actor blueprints.
//!
//! A blueprint is the resolved recipe for sampling one floating node at one
//! level. It is realized into an [`Actor`](crate::simulation::Actor) when a
//! parameter core is generated or bred.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a floating node is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlueprintKind {
    /// Every parent is fixed upstream; the distribution is evaluated once and cached.
    Frozen,
    /// Every parent is fixed, some at the instance itself; parents are read per call.
    Single,
    /// Some ancestor is still random; the chain is resampled on every call.
    Compound,
}

impl fmt::Display for BlueprintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Frozen => "Frozen",
            Self::Single => "Single",
            Self::Compound => "Compound",
        };
        f.write_str(s)
    }
}

/// Resolved sampling recipe for one floating node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorBlueprint {
    /// Target node.
    pub name: String,
    /// Blueprint kind.
    #[serde(rename = "Type")]
    pub kind: BlueprintKind,
    /// Nodes read from the enclosing context, in topological order.
    pub to_read: Vec<String>,
    /// Nodes drawn fresh before the target, in topological order. Empty unless Compound.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub to_sample: Vec<String>,
}

impl ActorBlueprint {
    /// Frozen blueprint reading `to_read`.
    #[must_use]
    pub fn frozen(name: impl Into<String>, to_read: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: BlueprintKind::Frozen,
            to_read,
            to_sample: Vec::new(),
        }
    }

    /// Single blueprint reading `to_read`.
    #[must_use]
    pub fn single(name: impl Into<String>, to_read: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: BlueprintKind::Single,
            to_read,
            to_sample: Vec::new(),
        }
    }

    /// Compound blueprint.
    #[must_use]
    pub fn compound(name: impl Into<String>, to_read: Vec<String>, to_sample: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: BlueprintKind::Compound,
            to_read,
            to_sample,
        }
    }

    /// Returns true if the realized actor caches its distribution.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.kind == BlueprintKind::Frozen
    }
}

impl fmt::Display for ActorBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] <- ({})", self.kind, self.name, self.to_read.join(", "))?;
        if !self.to_sample.is_empty() {
            write!(f, " ~ ({})", self.to_sample.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_inputs() {
        let bp = ActorBlueprint::compound("x", vec!["n".into()], vec!["p".into()]);
        assert_eq!(bp.to_string(), "Compound[x] <- (n) ~ (p)");
        assert_eq!(ActorBlueprint::frozen("x", vec![]).to_string(), "Frozen[x] <- ()");
        assert!(ActorBlueprint::frozen("x", vec![]).is_cached());
        assert!(!ActorBlueprint::single("x", vec![]).is_cached());
    }

    #[test]
    fn json_shape() {
        let js = serde_json::to_value(ActorBlueprint::single("x", vec!["a".into()])).unwrap();
        assert_eq!(js, serde_json::json!({"Name": "x", "Type": "Single", "ToRead": ["a"]}));
    }
}

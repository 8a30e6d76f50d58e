//! Error types for nestdag.
//!
//! All errors are strongly typed using thiserror. Structural and declaration
//! problems are `ValidationError`s and are raised before anything is mutated;
//! lookup and semantic failures at run time are `ExecutionError`s and are
//! local to the failing call.

use thiserror::Error;

/// Validation errors raised while building networks or resolving hierarchies.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Node '{name}' is already defined")]
    DuplicateNode {
        name: String,
    },

    #[error("Adding node '{name}' would create a cycle")]
    CyclicDependency {
        name: String,
    },

    #[error("Unknown function '{name}'")]
    UnknownFunction {
        name: String,
    },

    #[error("Unknown distribution '{name}'")]
    UnknownDistribution {
        name: String,
    },

    #[error("'{name}' takes {expected} argument(s), got {actual}")]
    InvalidArity {
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("Cannot parse '{input}': {reason}")]
    Parse {
        input: String,
        reason: String,
    },

    #[error("Network '{name}' is frozen")]
    NetworkFrozen {
        name: String,
    },

    #[error("Network '{name}' must be completed first")]
    NetworkNotFrozen {
        name: String,
    },

    #[error("Unknown node '{name}'")]
    UnknownNode {
        name: String,
    },

    #[error("Level '{level}' floats '{floating}', which is upstream of its fixed node '{fixed}'")]
    OrderingViolation {
        level: String,
        floating: String,
        fixed: String,
    },

    #[error("Node '{node}' is declared more than once on the path to level '{level}'")]
    DuplicateDeclaration {
        level: String,
        node: String,
    },

    #[error("Pseudo node '{node}' cannot be declared at level '{level}'")]
    PseudoDeclared {
        level: String,
        node: String,
    },

    #[error("Group name '{name}' is used more than once")]
    DuplicateGroup {
        name: String,
    },

    #[error("Level '{level}' is already resolved")]
    HierarchyFrozen {
        level: String,
    },

    #[error("Group '{parent}' has no child group '{group}'")]
    UnknownGroup {
        parent: String,
        group: String,
    },

    #[error("Nickname '{nickname}' is already used under '{parent}'")]
    DuplicateNickname {
        parent: String,
        nickname: String,
    },

    #[error("Network fingerprint mismatch: expected {expected}, got {actual}")]
    NetworkMismatch {
        expected: String,
        actual: String,
    },

    #[error("Inconsistent network JSON: {reason}")]
    InconsistentJson {
        reason: String,
    },

    #[error("Invalid simulation config: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while generating, sampling, or mutating instances.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Sampler '{name}' not found for '{core}'")]
    SamplerNotFound {
        name: String,
        core: String,
    },

    #[error("Child '{nickname}' not found")]
    ChildNotFound {
        nickname: String,
    },

    #[error("Parameter core #{index} does not exist")]
    CoreNotFound {
        index: usize,
    },

    #[error("Missing input value for '{name}'")]
    MissingInput {
        name: String,
    },

    #[error("Pseudo node '{name}' cannot be sampled or evaluated")]
    PseudoNotRealizable {
        name: String,
    },

    #[error("Invalid distribution '{name}': {reason}")]
    InvalidDistribution {
        name: String,
        reason: String,
    },

    #[error("Expression '{expr}' produced a non-finite value ({value})")]
    NonFinite {
        expr: String,
        value: f64,
    },

    #[error("Sample batch of {requested} exceeds the limit of {max}")]
    BatchTooLarge {
        requested: usize,
        max: usize,
    },
}

/// Top-level error type for nestdag.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum NestError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NestError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if a named sampler, child, or core could not be found.
    ///
    /// Lookup failures never affect the rest of the tree.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::SamplerNotFound { .. }
                    | ExecutionError::ChildNotFound { .. }
                    | ExecutionError::CoreNotFound { .. }
            )
        )
    }

    /// Returns true if a required input value was missing.
    #[must_use]
    pub const fn is_missing_input(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::MissingInput { .. }))
    }
}

/// Result type alias for nestdag operations.
pub type NestResult<T> = Result<T, NestError>;

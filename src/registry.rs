//! The function and distribution tables handed to network builders.

use crate::distribution::DistributionRegistry;
use crate::expr::FunctionRegistry;

/// Everything a network needs to compile node definitions.
///
/// Passed explicitly (usually as `Arc<Registry>`) to the script and JSON
/// readers; there is no process-wide table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Functions callable from expressions.
    pub functions: FunctionRegistry,
    /// Distribution families callable after `~`.
    pub distributions: DistributionRegistry,
}

impl Registry {
    /// The built-in math functions and distribution families.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            functions: FunctionRegistry::standard(),
            distributions: DistributionRegistry::standard(),
        }
    }
}

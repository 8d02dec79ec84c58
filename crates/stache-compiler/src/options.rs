use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// Compile flags shared by every nested compile of one top-level template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Maximum number of nested partial, parent and lambda compiles.
    pub max_include_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

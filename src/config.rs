//! Compiler configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Generate source text and load it instead of interpreting the program.
    pub use_jit: bool,
    /// Keep the generated source of every loaded module.
    pub gen_debug_info: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            use_jit: true,
            gen_debug_info: false,
        }
    }
}

impl CompilerConfig {
    pub fn interpreted() -> Self {
        Self {
            use_jit: false,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::InvalidDeclaration {
            message: format!("compiler config: {}", e),
        })
    }
}

/// What the host platform allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformCapabilities {
    /// Whether generated code may be loaded at runtime.
    pub dynamic_code: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self { dynamic_code: true }
    }
}

//! Configuration for the meshing sandbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Default bounding-box output address in guest memory.
///
/// Guests that cannot leave address 0 free export `sdf_aabb_addr` to move it.
pub const DEFAULT_AABB_ADDR: u32 = 0;

/// How guest code is executed.
///
/// Both modes produce identical meshes; they only trade speed for
/// portability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Ahead-of-time compiled to native code with Cranelift
    #[default]
    Compiled,
    /// Compiled to Pulley bytecode and run by wasmtime's interpreter
    Interpreted,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Compiled => write!(f, "compiled"),
            ExecutionMode::Interpreted => write!(f, "interpreted"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compiled" | "fast" => Ok(ExecutionMode::Compiled),
            "interpreted" | "compatible" => Ok(ExecutionMode::Interpreted),
            other => Err(BridgeError::Config(format!(
                "unknown execution mode '{}', use compiled or interpreted",
                other
            ))),
        }
    }
}

/// Configuration for a [`Renderer`](crate::Renderer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Execution strategy for guest code
    pub mode: ExecutionMode,

    /// Mesh resolution passed to the guest entry point (cells per axis)
    pub mesh_cells: u32,

    /// Maximum guest memory in bytes (default = 256MB)
    pub max_memory: usize,

    /// Where the bounding-box query writes its six floats unless the guest
    /// asks for another address
    pub aabb_addr: u32,

    /// wasmtime cache configuration file for compiled guests
    pub cache_path: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Compiled,
            mesh_cells: 64,
            max_memory: 256 * 1024 * 1024, // 256 MB
            aabb_addr: DEFAULT_AABB_ADDR,
            cache_path: None,
        }
    }
}

impl RendererConfig {
    /// Native-code execution.
    pub fn fast() -> Self {
        Self::default()
    }

    /// Interpreted execution, for hosts without a Cranelift backend.
    pub fn compatible() -> Self {
        Self {
            mode: ExecutionMode::Interpreted,
            ..Default::default()
        }
    }

    /// Builder: set execution mode
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: set mesh resolution
    pub fn mesh_cells(mut self, cells: u32) -> Self {
        self.mesh_cells = cells;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set default bounding-box address
    pub fn aabb_addr(mut self, addr: u32) -> Self {
        self.aabb_addr = addr;
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Check the values a render depends on.
    pub fn validate(&self) -> Result<()> {
        if self.mesh_cells == 0 {
            return Err(BridgeError::Config("mesh_cells must be positive".to_string()));
        }
        if self.mesh_cells > i32::MAX as u32 {
            return Err(BridgeError::Config(format!(
                "mesh_cells {} does not fit the guest's i32 parameter",
                self.mesh_cells
            )));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| BridgeError::Config(e.to_string()))
    }
}

//! WebAssembly sandbox for meshing guests.
//!
//! Guests are plain `wasm32` modules with no WASI access. The only things a
//! guest can reach are its own linear memory and the three host callbacks in
//! [`host_functions`].
//!
//! ## Security Model
//!
//! - **Memory isolation**: each render gets a fresh store and linear memory
//! - **Checked access**: every pointer a guest hands over is bounds-checked
//!   before the host reads or writes through it
//! - **Closed import set**: guests importing anything outside `env` are
//!   rejected at load time
//! - **Bounded growth**: memory is capped by [`RendererConfig::max_memory`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use isosurface_bridge::wasm::{HostContext, MeshSandbox, RendererConfig};
//!
//! let sandbox = MeshSandbox::new(RendererConfig::compatible())?;
//! let guest = sandbox.load_guest("mesher.wasm")?;
//! let mut instance = sandbox.instantiate(&guest, HostContext::new(field, tx, 0))?;
//! instance.mesh(32)?;
//! ```

mod config;
pub mod host_functions;
pub mod memory;
mod runtime;

pub use config::{ExecutionMode, RendererConfig, DEFAULT_AABB_ADDR};
pub use host_functions::{assemble_triangles, read_mesh, HOST_FUNCTIONS, HOST_MODULE};
pub use runtime::{
    GuestInstance, GuestModule, HostContext, MeshSandbox, RenderStats, AABB_ADDR_EXPORT,
    MESH_EXPORT,
};

//! # Isosurface Bridge
//!
//! Host side of a sandboxed isosurface mesher. A meshing algorithm compiled to
//! WebAssembly runs inside wasmtime; the host answers its bounding-box and
//! distance queries from a [`DistanceField`] and streams the triangles it
//! produces into a [`TriangleSink`].
//!
//! ## Protocol
//!
//! | Direction | Call | Purpose |
//! |-----------|------|---------|
//! | host → guest | `mesh(cells: i32)` | Run the mesher at the given resolution |
//! | guest → host | `env.sdf_aabb() -> i32` | Write the field's bounding box, return its address |
//! | guest → host | `env.sdf_eval(ptr: i32) -> f32` | Distance at the point stored at `ptr` |
//! | guest → host | `env.sdf_mesh_receiver(vp, vl, ip, il)` | Deliver vertex and index buffers |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use isosurface_bridge::{triangle_channel, Renderer};
//! use isosurface_bridge::field::{Cuboid, Difference, Sphere};
//!
//! let renderer = Renderer::fast("mesher", &std::fs::read("mesher.wasm")?)?;
//! let field = Arc::new(Difference::new(Cuboid::cube(0.5), Sphere::new(0.6)));
//!
//! let (tx, rx) = triangle_channel(None);
//! let consumer = std::thread::spawn(move || rx.iter().count());
//! renderer.render(field, tx)?;
//! let triangles = consumer.join().unwrap();
//! ```
//!
//! ## Execution Modes
//!
//! - [`ExecutionMode::Compiled`] - Cranelift native code, fastest
//! - [`ExecutionMode::Interpreted`] - Pulley bytecode interpreter, runs anywhere

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod field;
pub mod geometry;
pub mod renderer;
pub mod sink;
pub mod wasm;

// Re-export main types
pub use error::{BridgeError, ProtocolError, Result};
pub use field::DistanceField;
pub use geometry::{BoundingBox3, Point3, Triangle3};
pub use renderer::{RenderSession, RenderState, Renderer};
pub use sink::{triangle_channel, TriangleSink};
pub use wasm::{ExecutionMode, GuestModule, MeshSandbox, RenderStats, RendererConfig};

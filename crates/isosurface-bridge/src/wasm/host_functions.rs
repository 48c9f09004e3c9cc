//! Host callback set imported by meshing guests.
//!
//! ## Import Module
//!
//! All three functions live in the `env` namespace:
//! ```wat
//! (import "env" "sdf_aabb" (func $sdf_aabb (result i32)))
//! (import "env" "sdf_eval" (func $sdf_eval (param i32) (result f32)))
//! (import "env" "sdf_mesh_receiver" (func $sdf_mesh_receiver (param i32 i32 i32 i32)))
//! ```
//!
//! ## Memory Convention
//!
//! - Pointers are i32 byte offsets into the guest's exported `memory`
//! - Points are three packed f32 `[x, y, z]`
//! - The bounding box is six packed f32 `[min.x, min.y, min.z, max.x, max.y, max.z]`
//! - Vertex buffers are packed f32 triples; lengths count floats, not bytes
//! - Index buffers are u32, three per triangle; lengths count indices
//!
//! Arguments are passed directly as wasm values (no shared value stack).
//! Every host function fetches its per-request [`HostContext`] from the
//! store, so nothing request-specific is captured by the registered closures.

use wasmtime::{Caller, Linker, Memory};

use super::memory::{read_f32_slice, read_f32x3, read_u32_slice, write_f32_slice};
use super::runtime::HostContext;
use crate::error::{BridgeError, ProtocolError, Result};
use crate::geometry::{Point3, Triangle3};

/// Import namespace for the host callback set.
pub const HOST_MODULE: &str = "env";

/// Bounding-box query.
pub const SDF_AABB: &str = "sdf_aabb";
/// Field evaluation.
pub const SDF_EVAL: &str = "sdf_eval";
/// Mesh-result delivery.
pub const SDF_MESH_RECEIVER: &str = "sdf_mesh_receiver";

/// Every function a guest may import.
pub const HOST_FUNCTIONS: [&str; 3] = [SDF_AABB, SDF_EVAL, SDF_MESH_RECEIVER];

/// Register the host callback set with the wasmtime linker.
pub fn register_host_functions(linker: &mut Linker<HostContext>) -> Result<()> {
    register_aabb(linker)?;
    register_eval(linker)?;
    register_mesh_receiver(linker)?;
    Ok(())
}

fn register_aabb(linker: &mut Linker<HostContext>) -> Result<()> {
    linker
        .func_wrap(
            HOST_MODULE,
            SDF_AABB,
            |mut caller: Caller<'_, HostContext>| -> wasmtime::Result<i32> {
                let memory = get_memory(&mut caller)?;
                let (data, ctx) = memory.data_and_store_mut(&mut caller);
                let addr = ctx.write_bounding_box(data)?;
                Ok(addr as i32)
            },
        )
        .map_err(|e| BridgeError::Instantiate(format!("failed to register {}: {}", SDF_AABB, e)))?;
    Ok(())
}

fn register_eval(linker: &mut Linker<HostContext>) -> Result<()> {
    linker
        .func_wrap(
            HOST_MODULE,
            SDF_EVAL,
            |mut caller: Caller<'_, HostContext>, ptr: i32| -> wasmtime::Result<f32> {
                let memory = get_memory(&mut caller)?;
                let (data, ctx) = memory.data_and_store_mut(&mut caller);
                Ok(ctx.evaluate_at(data, ptr as u32)?)
            },
        )
        .map_err(|e| BridgeError::Instantiate(format!("failed to register {}: {}", SDF_EVAL, e)))?;
    Ok(())
}

fn register_mesh_receiver(linker: &mut Linker<HostContext>) -> Result<()> {
    linker
        .func_wrap(
            HOST_MODULE,
            SDF_MESH_RECEIVER,
            |mut caller: Caller<'_, HostContext>,
             vertices_ptr: i32,
             vertices_len: i32,
             indices_ptr: i32,
             indices_len: i32|
             -> wasmtime::Result<()> {
                let memory = get_memory(&mut caller)?;
                let (data, ctx) = memory.data_and_store_mut(&mut caller);
                ctx.receive_mesh(
                    data,
                    vertices_ptr as u32,
                    vertices_len as u32,
                    indices_ptr as u32,
                    indices_len as u32,
                )?;
                Ok(())
            },
        )
        .map_err(|e| {
            BridgeError::Instantiate(format!("failed to register {}: {}", SDF_MESH_RECEIVER, e))
        })?;
    Ok(())
}

/// Get the memory export from the caller.
fn get_memory(caller: &mut Caller<'_, HostContext>) -> std::result::Result<Memory, ProtocolError> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or(ProtocolError::MissingMemory)
}

impl HostContext {
    /// Bounding-box query: write the field's box at the agreed address and
    /// return that address.
    pub fn write_bounding_box(&mut self, memory: &mut [u8]) -> std::result::Result<u32, ProtocolError> {
        let bounds = self.field.bounding_box();
        write_f32_slice(memory, self.aabb_addr, &bounds.to_f32_array()).inspect_err(|e| {
            tracing::warn!(error = %e, "bounding-box write rejected");
        })?;
        self.stats.aabb_queries += 1;
        Ok(self.aabb_addr)
    }

    /// Evaluation query: read `[x, y, z]` at `ptr` and return the distance.
    pub fn evaluate_at(&mut self, memory: &[u8], ptr: u32) -> std::result::Result<f32, ProtocolError> {
        let [x, y, z] = read_f32x3(memory, ptr).inspect_err(|e| {
            tracing::warn!(error = %e, "evaluation read rejected");
        })?;

        let p = Point3::new(f64::from(x), f64::from(y), f64::from(z));
        let distance = self.field.evaluate(p) as f32;
        self.stats.evaluations += 1;
        tracing::trace!(?p, distance, "sdf_eval");
        Ok(distance)
    }

    /// Mesh-result delivery: copy both buffers out of guest memory, rebuild
    /// the triangles and push them into the sink in index order.
    ///
    /// Returns the number of triangles delivered. The batch is validated in
    /// full before the first triangle is pushed.
    pub fn receive_mesh(
        &mut self,
        memory: &[u8],
        vertices_ptr: u32,
        vertices_len: u32,
        indices_ptr: u32,
        indices_len: u32,
    ) -> Result<usize> {
        let triangles = read_mesh(memory, vertices_ptr, vertices_len, indices_ptr, indices_len)
            .inspect_err(|e| tracing::warn!(error = %e, "mesh delivery rejected"))?;

        tracing::debug!(
            vertices = vertices_len / 3,
            indices = indices_len,
            triangles = triangles.len(),
            "received mesh batch"
        );

        let count = triangles.len();
        for triangle in triangles {
            self.sink.push(triangle)?;
            self.stats.triangles += 1;
        }
        self.stats.batches += 1;
        Ok(count)
    }
}

/// Copy a vertex/index buffer pair out of guest memory and rebuild its
/// triangles.
pub fn read_mesh(
    memory: &[u8],
    vertices_ptr: u32,
    vertices_len: u32,
    indices_ptr: u32,
    indices_len: u32,
) -> std::result::Result<Vec<Triangle3>, ProtocolError> {
    if vertices_len % 3 != 0 {
        return Err(ProtocolError::MalformedLength {
            buffer: "vertex buffer",
            len: vertices_len,
        });
    }
    if indices_len % 3 != 0 {
        return Err(ProtocolError::MalformedLength {
            buffer: "index buffer",
            len: indices_len,
        });
    }

    let vertices = read_f32_slice(memory, vertices_ptr, vertices_len)?;
    let indices = read_u32_slice(memory, indices_ptr, indices_len)?;
    assemble_triangles(&vertices, &indices)
}

/// Build triangles from packed vertex coordinates and index triples.
///
/// Vertex `i` is `vertices[3i..3i + 3]`. An index past the last vertex fails
/// the whole batch instead of wrapping or being skipped.
pub fn assemble_triangles(
    vertices: &[f32],
    indices: &[u32],
) -> std::result::Result<Vec<Triangle3>, ProtocolError> {
    let vertex_count = (vertices.len() / 3) as u32;
    let vertex = |index: u32| -> std::result::Result<Point3, ProtocolError> {
        if index >= vertex_count {
            return Err(ProtocolError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        let base = index as usize * 3;
        Ok(Point3::new(
            f64::from(vertices[base]),
            f64::from(vertices[base + 1]),
            f64::from(vertices[base + 2]),
        ))
    };

    let mut triangles = Vec::with_capacity(indices.len() / 3);
    for face in indices.chunks_exact(3) {
        triangles.push(Triangle3::new(
            vertex(face[0])?,
            vertex(face[1])?,
            vertex(face[2])?,
        ));
    }
    Ok(triangles)
}

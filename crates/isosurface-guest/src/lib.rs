//! Surface-nets meshing guest.
//!
//! Build with `cargo build --release --target wasm32-unknown-unknown` and
//! hand the resulting `isosurface_guest.wasm` to the host renderer.
//!
//! The guest asks the host for the field's bounding box, pads it by 10%,
//! samples the field on a regular lattice through `sdf_eval`, places one
//! vertex per sign-changing cell and connects the vertices of the four cells
//! around every sign-changing lattice edge. The finished mesh goes back to
//! the host in a single `sdf_mesh_receiver` call.

use std::cell::UnsafeCell;

// =============================================================================
// Host Function Imports
// =============================================================================

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "env")]
extern "C" {
    /// Writes the bounding box as six f32 and returns its address.
    fn sdf_aabb() -> *const f32;

    /// Signed distance at the `[x, y, z]` point stored at `point`.
    fn sdf_eval(point: *const f32) -> f32;

    /// Delivers a vertex buffer (float count) and an index buffer (index count).
    fn sdf_mesh_receiver(
        vertices_ptr: *const f32,
        vertices_len: u32,
        indices_ptr: *const u32,
        indices_len: u32,
    );
}

/// Slot the host writes the bounding box into.
#[repr(C, align(4))]
struct AabbSlot(UnsafeCell<[f32; 6]>);

// The guest is single-threaded; the slot is only touched by the host call.
unsafe impl Sync for AabbSlot {}

static AABB_SLOT: AabbSlot = AabbSlot(UnsafeCell::new([0.0; 6]));

/// Tell the host where to write the bounding box.
///
/// Address 0 sits at the bottom of the shadow stack in Rust-built modules,
/// so the box gets its own static instead.
#[no_mangle]
pub extern "C" fn sdf_aabb_addr() -> i32 {
    AABB_SLOT.0.get() as usize as i32
}

// =============================================================================
// Field Access
// =============================================================================

/// What the mesher needs from a distance field.
pub trait Field {
    /// Minimum and maximum corners of the region to mesh.
    fn bounds(&self) -> ([f32; 3], [f32; 3]);

    /// Signed distance at `p`, negative inside.
    fn eval(&self, p: [f32; 3]) -> f32;
}

/// The field behind the host callbacks.
#[cfg(target_arch = "wasm32")]
struct HostField;

#[cfg(target_arch = "wasm32")]
impl Field for HostField {
    fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        let b = unsafe {
            let ptr = sdf_aabb();
            std::ptr::read_unaligned(ptr as *const [f32; 6])
        };
        ([b[0], b[1], b[2]], [b[3], b[4], b[5]])
    }

    fn eval(&self, p: [f32; 3]) -> f32 {
        unsafe { sdf_eval(p.as_ptr()) }
    }
}

// =============================================================================
// Meshing
// =============================================================================

/// Fraction of the bounding box added around the field so surfaces touching
/// the box still close.
const PADDING: f32 = 0.1;

const NO_VERTEX: u32 = u32::MAX;

/// Indexed triangle mesh in field coordinates.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Mesh {
    /// Packed `[x, y, z]` vertex coordinates
    pub vertices: Vec<f32>,
    /// Three vertex indices per triangle
    pub indices: Vec<u32>,
}

/// Smallest power of two that is at least `n` (1 for 0).
pub fn next_power_of_two(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

/// Lattice over the padded bounding box.
struct Grid {
    origin: [f32; 3],
    step: [f32; 3],
    cells: usize,
}

impl Grid {
    fn new(min: [f32; 3], max: [f32; 3], cells: usize) -> Self {
        let mut origin = [0.0; 3];
        let mut step = [0.0; 3];
        for a in 0..3 {
            let size = max[a] - min[a];
            origin[a] = min[a] - size * (PADDING / 2.0);
            step[a] = size * (1.0 + PADDING) / cells as f32;
        }
        Self { origin, step, cells }
    }

    fn points(&self) -> usize {
        self.cells + 1
    }

    fn point(&self, i: usize, j: usize, k: usize) -> [f32; 3] {
        [
            self.origin[0] + i as f32 * self.step[0],
            self.origin[1] + j as f32 * self.step[1],
            self.origin[2] + k as f32 * self.step[2],
        ]
    }

    fn point_index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.points() + j) * self.points() + i
    }

    fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.cells + j) * self.cells + i
    }
}

const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

const CELL_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [2, 3],
    [4, 5],
    [6, 7],
    [0, 2],
    [1, 3],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Mesh `field` with `cells` lattice cells per axis (rounded up to a power
/// of two).
pub fn surface_nets(field: &impl Field, cells: u32) -> Mesh {
    let (min, max) = field.bounds();
    let grid = Grid::new(min, max, next_power_of_two(cells) as usize);
    let n = grid.points();

    let mut samples = vec![0.0f32; n * n * n];
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                samples[grid.point_index(i, j, k)] = field.eval(grid.point(i, j, k));
            }
        }
    }
    let sample = |i: usize, j: usize, k: usize| samples[grid.point_index(i, j, k)];

    let mut mesh = Mesh::default();
    let mut cell_vertex = vec![NO_VERTEX; grid.cells * grid.cells * grid.cells];

    for k in 0..grid.cells {
        for j in 0..grid.cells {
            for i in 0..grid.cells {
                let mut values = [0.0f32; 8];
                let mut positions = [[0.0f32; 3]; 8];
                for (c, [di, dj, dk]) in CORNERS.iter().enumerate() {
                    values[c] = sample(i + di, j + dj, k + dk);
                    positions[c] = grid.point(i + di, j + dj, k + dk);
                }

                let mut sum = [0.0f32; 3];
                let mut crossings = 0;
                for [a, b] in CELL_EDGES {
                    let (va, vb) = (values[a], values[b]);
                    if (va < 0.0) == (vb < 0.0) {
                        continue;
                    }
                    let t = va / (va - vb);
                    for axis in 0..3 {
                        sum[axis] += positions[a][axis] + t * (positions[b][axis] - positions[a][axis]);
                    }
                    crossings += 1;
                }
                if crossings == 0 {
                    continue;
                }

                cell_vertex[grid.cell_index(i, j, k)] = (mesh.vertices.len() / 3) as u32;
                for s in sum {
                    mesh.vertices.push(s / crossings as f32);
                }
            }
        }
    }

    let cells = grid.cells;
    let vertex = |i: usize, j: usize, k: usize| cell_vertex[grid.cell_index(i, j, k)];
    let mut quad = |inside: bool, q: [u32; 4]| {
        if q.contains(&NO_VERTEX) {
            return;
        }
        let [a, b, c, d] = if inside { q } else { [q[0], q[3], q[2], q[1]] };
        mesh.indices.extend_from_slice(&[a, b, c, a, c, d]);
    };

    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let v0 = sample(i, j, k);
                let inside = v0 < 0.0;

                // Edge along +x, shared by the four cells around it
                if i < cells && j > 0 && k > 0 && j < cells && k < cells && inside != (sample(i + 1, j, k) < 0.0) {
                    quad(
                        inside,
                        [vertex(i, j - 1, k - 1), vertex(i, j, k - 1), vertex(i, j, k), vertex(i, j - 1, k)],
                    );
                }
                // Edge along +y
                if j < cells && i > 0 && k > 0 && i < cells && k < cells && inside != (sample(i, j + 1, k) < 0.0) {
                    quad(
                        inside,
                        [vertex(i - 1, j, k - 1), vertex(i - 1, j, k), vertex(i, j, k), vertex(i, j, k - 1)],
                    );
                }
                // Edge along +z
                if k < cells && i > 0 && j > 0 && i < cells && j < cells && inside != (sample(i, j, k + 1) < 0.0) {
                    quad(
                        inside,
                        [vertex(i - 1, j - 1, k), vertex(i, j - 1, k), vertex(i, j, k), vertex(i - 1, j, k)],
                    );
                }
            }
        }
    }

    mesh
}

// =============================================================================
// Entry Point
// =============================================================================

/// Mesh the host's field at `mesh_cells` resolution and deliver the result.
#[cfg(target_arch = "wasm32")]
#[no_mangle]
pub extern "C" fn mesh(mesh_cells: u32) {
    let mesh = surface_nets(&HostField, mesh_cells);
    // The host copies both buffers before returning; they are freed here.
    unsafe {
        sdf_mesh_receiver(
            mesh.vertices.as_ptr(),
            mesh.vertices.len() as u32,
            mesh.indices.as_ptr(),
            mesh.indices.len() as u32,
        );
    }
}

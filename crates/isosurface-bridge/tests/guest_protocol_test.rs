//! Host/guest protocol tests with small hand-written guests.
//!
//! Each guest exercises one part of the calling convention: the bounding-box
//! query, evaluation, result delivery, and the ways a guest can break them.

use std::sync::Arc;

use isosurface_bridge::field::{Cuboid, FnField, Sphere, Torus};
use isosurface_bridge::wasm::{HostContext, MeshSandbox, DEFAULT_AABB_ADDR};
use isosurface_bridge::{
    triangle_channel, BoundingBox3, BridgeError, DistanceField, Point3, ProtocolError,
    RenderState, RenderStats, Renderer, RendererConfig, Result, Triangle3,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Writes four vertices and two index triples, then delivers them in three
/// batches: both triangles, the second alone, the first alone.
const BATCHES_GUEST: &str = r#"
(module
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func $v (param $addr i32) (param $x f32) (param $y f32) (param $z f32)
    (f32.store (local.get $addr) (local.get $x))
    (f32.store offset=4 (local.get $addr) (local.get $y))
    (f32.store offset=8 (local.get $addr) (local.get $z)))
  (func (export "mesh") (param $n i32)
    (call $v (i32.const 1024) (f32.const 0.1) (f32.const 0.2) (f32.const 0.3))
    (call $v (i32.const 1036) (f32.const 1) (f32.const 0) (f32.const 0))
    (call $v (i32.const 1048) (f32.const 0) (f32.const 1) (f32.const 0))
    (call $v (i32.const 1060) (f32.const -2.5) (f32.const 3.25) (f32.const 0.001))
    (i32.store (i32.const 2048) (i32.const 0))
    (i32.store (i32.const 2052) (i32.const 1))
    (i32.store (i32.const 2056) (i32.const 2))
    (i32.store (i32.const 2060) (i32.const 3))
    (i32.store (i32.const 2064) (i32.const 2))
    (i32.store (i32.const 2068) (i32.const 1))
    (call $recv (i32.const 1024) (i32.const 12) (i32.const 2048) (i32.const 6))
    (call $recv (i32.const 1024) (i32.const 12) (i32.const 2060) (i32.const 3))
    (call $recv (i32.const 1024) (i32.const 12) (i32.const 2048) (i32.const 3))))
"#;

/// Stores `[0.25, -0.5, 2.0]` at an unaligned address, evaluates it and
/// delivers one degenerate triangle at `(distance, n, 0)`.
const EVAL_GUEST: &str = r#"
(module
  (import "env" "sdf_eval" (func $eval (param i32) (result f32)))
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (f32.store (i32.const 65) (f32.const 0.25))
    (f32.store (i32.const 69) (f32.const -0.5))
    (f32.store (i32.const 73) (f32.const 2.0))
    (f32.store (i32.const 1024) (call $eval (i32.const 65)))
    (f32.store (i32.const 1028) (f32.convert_i32_s (local.get $n)))
    (f32.store (i32.const 1032) (f32.const 0))
    (call $recv (i32.const 1024) (i32.const 3) (i32.const 2048) (i32.const 3))))
"#;

/// Evaluates `n` points laid out from 1024 and stores the results from 8192.
const EVAL_TABLE_GUEST: &str = r#"
(module
  (import "env" "sdf_eval" (func $eval (param i32) (result f32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (local $t i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_s (local.get $t) (local.get $n)))
        (f32.store
          (i32.add (i32.const 8192) (i32.shl (local.get $t) (i32.const 2)))
          (call $eval (i32.add (i32.const 1024) (i32.mul (local.get $t) (i32.const 12)))))
        (local.set $t (i32.add (local.get $t) (i32.const 1)))
        (br $next)))))
"#;

/// Delivers an empty batch.
const EMPTY_GUEST: &str = r#"
(module
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (call $recv (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))))
"#;

/// Returns a status word and never delivers anything.
const SILENT_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32) (result i32) (i32.const 7)))
"#;

/// Evaluates a point that straddles the end of memory, then tries to deliver.
const BAD_EVAL_GUEST: &str = r#"
(module
  (import "env" "sdf_eval" (func $eval (param i32) (result f32)))
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (drop (call $eval (i32.const 65530)))
    (call $recv (i32.const 0) (i32.const 3) (i32.const 64) (i32.const 3))))
"#;

/// Delivers one good triangle, then a batch referencing vertex 5 of 3.
const BAD_INDEX_GUEST: &str = r#"
(module
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (i32.store (i32.const 2052) (i32.const 1))
    (i32.store (i32.const 2056) (i32.const 2))
    (i32.store (i32.const 2060) (i32.const 0))
    (i32.store (i32.const 2064) (i32.const 1))
    (i32.store (i32.const 2068) (i32.const 5))
    (call $recv (i32.const 1024) (i32.const 9) (i32.const 2048) (i32.const 3))
    (call $recv (i32.const 1024) (i32.const 9) (i32.const 2060) (i32.const 3))))
"#;

/// Hands over an index count that cannot describe whole triangles.
const ODD_LENGTH_GUEST: &str = r#"
(module
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (call $recv (i32.const 1024) (i32.const 9) (i32.const 2048) (i32.const 4))))
"#;

/// Hands over a vertex buffer that runs past the end of memory.
const VERTEX_OVERRUN_GUEST: &str = r#"
(module
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (call $recv (i32.const 65532) (i32.const 3) (i32.const 0) (i32.const 0))))
"#;

const TRAP_GUEST: &str = r#"
(module
  (import "env" "sdf_aabb" (func $aabb (result i32)))
  (memory (export "memory") 1)
  (func (export "mesh") (param $n i32)
    (drop (call $aabb))
    unreachable))
"#;

/// Copies the bounding box it is given into a triangle `(min, max, max)`.
fn echo_aabb_guest(aabb_addr_export: Option<i32>) -> String {
    let export = aabb_addr_export
        .map(|addr| format!(r#"(func (export "sdf_aabb_addr") (result i32) (i32.const {}))"#, addr))
        .unwrap_or_default();
    format!(
        r#"
(module
  (import "env" "sdf_aabb" (func $aabb (result i32)))
  (import "env" "sdf_mesh_receiver" (func $recv (param i32 i32 i32 i32)))
  (memory (export "memory") 1)
  {}
  (func (export "mesh") (param $n i32)
    (local $box i32)
    (local.set $box (call $aabb))
    (f32.store (i32.const 1024) (f32.load (local.get $box)))
    (f32.store (i32.const 1028) (f32.load offset=4 (local.get $box)))
    (f32.store (i32.const 1032) (f32.load offset=8 (local.get $box)))
    (f32.store (i32.const 1036) (f32.load offset=12 (local.get $box)))
    (f32.store (i32.const 1040) (f32.load offset=16 (local.get $box)))
    (f32.store (i32.const 1044) (f32.load offset=20 (local.get $box)))
    (i32.store (i32.const 2048) (i32.const 0))
    (i32.store (i32.const 2052) (i32.const 1))
    (i32.store (i32.const 2056) (i32.const 1))
    (call $recv (i32.const 1024) (i32.const 6) (i32.const 2048) (i32.const 3))))
"#,
        export
    )
}

fn render(
    guest: &str,
    config: RendererConfig,
    field: Arc<dyn DistanceField>,
) -> (Result<RenderStats>, Vec<Triangle3>) {
    let renderer = Renderer::from_bytes(config, "probe", guest.as_bytes()).unwrap();
    let (tx, rx) = triangle_channel(None);
    let result = renderer.render(field, tx);
    (result, rx.iter().collect())
}

fn p(x: f32, y: f32, z: f32) -> Point3 {
    Point3::new(f64::from(x), f64::from(y), f64::from(z))
}

#[test]
fn test_batches_arrive_in_order() {
    let (result, triangles) = render(BATCHES_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    let stats = result.unwrap();

    let first = Triangle3::new(p(0.1, 0.2, 0.3), p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0));
    let second = Triangle3::new(p(-2.5, 3.25, 0.001), p(0.0, 1.0, 0.0), p(1.0, 0.0, 0.0));
    assert_eq!(triangles, vec![first, second, second, first]);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.triangles, 4);
}

#[test]
fn test_delivered_vertices_are_bit_identical() {
    let (result, triangles) = render(BATCHES_GUEST, RendererConfig::compatible(), Arc::new(Sphere::new(1.0)));
    result.unwrap();

    let v = triangles[0].vertices()[0];
    assert_eq!((v.x as f32).to_bits(), 0.1f32.to_bits());
    assert_eq!((v.y as f32).to_bits(), 0.2f32.to_bits());
    assert_eq!(v.z, f64::from(0.3f32));
}

#[test]
fn test_eval_reads_point_and_returns_distance() {
    let bounds = BoundingBox3::new(Point3::splat(-4.0), Point3::splat(4.0));
    let field = FnField::new(bounds, |q: Point3| q.x * 3.0 + q.y - q.z);
    let config = RendererConfig::default().mesh_cells(5);

    let (result, triangles) = render(EVAL_GUEST, config, Arc::new(field));
    let stats = result.unwrap();

    assert_eq!(stats.evaluations, 1);
    assert_eq!(triangles.len(), 1);
    let expected = Point3::new(-1.75, 5.0, 0.0);
    assert_eq!(triangles[0], Triangle3::new(expected, expected, expected));
}

#[test]
fn test_eval_matches_host_for_random_points() {
    let field = Torus::new(1.0, 0.25);
    let sandbox = MeshSandbox::new(RendererConfig::default()).unwrap();
    let guest = sandbox.load_guest_bytes("table", EVAL_TABLE_GUEST.as_bytes()).unwrap();
    let (tx, _rx) = triangle_channel(None);
    let ctx = HostContext::new(Arc::new(field), tx, DEFAULT_AABB_ADDR);
    let mut instance = sandbox.instantiate(&guest, ctx).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<[f32; 3]> = (0..200)
        .map(|_| {
            [
                rng.gen_range(-1.5f32..1.5),
                rng.gen_range(-0.5f32..0.5),
                rng.gen_range(-1.5f32..1.5),
            ]
        })
        .collect();
    let bytes: Vec<u8> = points
        .iter()
        .flat_map(|pt| pt.iter().flat_map(|c| c.to_le_bytes()))
        .collect();
    instance.write_memory(1024, &bytes).unwrap();

    instance.mesh(points.len() as u32).unwrap();

    let out = instance.read_memory(8192, points.len() * 4).unwrap();
    for (pt, chunk) in points.iter().zip(out.chunks_exact(4)) {
        let got = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let want = field.evaluate(p(pt[0], pt[1], pt[2])) as f32;
        assert_eq!(got.to_bits(), want.to_bits(), "point {:?}", pt);
    }
    assert_eq!(instance.context().stats().evaluations, points.len() as u64);
}

#[test]
fn test_aabb_written_at_default_address() {
    let field = Cuboid::new(Point3::new(2.0, 4.0, 6.0));
    let (result, triangles) = render(&echo_aabb_guest(None), RendererConfig::default(), Arc::new(field));
    assert_eq!(result.unwrap().aabb_queries, 1);

    let min = Point3::new(-1.0, -2.0, -3.0);
    let max = Point3::new(1.0, 2.0, 3.0);
    assert_eq!(triangles, vec![Triangle3::new(min, max, max)]);
}

#[test]
fn test_aabb_address_from_config() {
    let config = RendererConfig::default().aabb_addr(512);
    let (result, triangles) = render(&echo_aabb_guest(None), config, Arc::new(Sphere::new(0.5)));
    result.unwrap();
    let lo = Point3::splat(-0.5);
    let hi = Point3::splat(0.5);
    assert_eq!(triangles, vec![Triangle3::new(lo, hi, hi)]);
}

#[test]
fn test_aabb_address_negotiated_by_guest() {
    let sandbox = MeshSandbox::new(RendererConfig::default()).unwrap();
    let guest = sandbox
        .load_guest_bytes("echo", echo_aabb_guest(Some(200)).as_bytes())
        .unwrap();
    let (tx, rx) = triangle_channel(None);
    let ctx = HostContext::new(Arc::new(Sphere::new(1.5)), tx, DEFAULT_AABB_ADDR);
    let mut instance = sandbox.instantiate(&guest, ctx).unwrap();
    assert_eq!(instance.context().aabb_addr(), 200);

    instance.mesh(1).unwrap();

    // The default slot is left alone
    assert!(instance.read_memory(0, 24).unwrap().iter().all(|&b| b == 0));
    let written = instance.read_memory(200, 24).unwrap();
    assert_eq!(&written[0..4], &(-1.5f32).to_le_bytes());
    assert_eq!(&written[20..24], &1.5f32.to_le_bytes());

    let tri = rx.try_recv().unwrap();
    assert_eq!(tri.vertices()[0], Point3::splat(-1.5));
}

#[test]
fn test_empty_delivery_is_empty_mesh() {
    let (result, triangles) = render(EMPTY_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    let stats = result.unwrap();
    assert!(triangles.is_empty());
    assert_eq!(stats.batches, 1);
}

#[test]
fn test_no_delivery_is_empty_mesh() {
    let (result, triangles) = render(SILENT_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    let stats = result.unwrap();
    assert!(triangles.is_empty());
    assert_eq!(stats.batches, 0);
}

#[test]
fn test_out_of_bounds_eval_aborts() {
    let (result, triangles) = render(BAD_EVAL_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    assert!(matches!(
        result,
        Err(BridgeError::Protocol(ProtocolError::OutOfBounds {
            offset: 65530,
            len: 12,
            memory_size: 65536
        }))
    ));
    assert!(triangles.is_empty());
}

#[test]
fn test_bad_index_fails_render() {
    let (result, triangles) = render(BAD_INDEX_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    assert!(matches!(
        result,
        Err(BridgeError::Protocol(ProtocolError::IndexOutOfRange {
            index: 5,
            vertex_count: 3
        }))
    ));
    // Only the batch before the faulty one reached the sink
    assert_eq!(triangles.len(), 1);
}

#[test]
fn test_malformed_index_length_fails_render() {
    let (result, triangles) = render(ODD_LENGTH_GUEST, RendererConfig::default(), Arc::new(Sphere::new(1.0)));
    assert!(matches!(
        result,
        Err(BridgeError::Protocol(ProtocolError::MalformedLength { len: 4, .. }))
    ));
    assert!(triangles.is_empty());
}

#[test]
fn test_vertex_overrun_fails_render() {
    let (result, triangles) =
        render(VERTEX_OVERRUN_GUEST, RendererConfig::compatible(), Arc::new(Sphere::new(1.0)));
    assert!(matches!(
        result,
        Err(BridgeError::Protocol(ProtocolError::OutOfBounds { offset: 65532, .. }))
    ));
    assert!(triangles.is_empty());
}

#[test]
fn test_guest_trap_fails_session() {
    let renderer = Renderer::from_bytes(RendererConfig::default(), "trap", TRAP_GUEST.as_bytes()).unwrap();
    let (tx, rx) = triangle_channel(None);
    let mut session = renderer.session(Arc::new(Sphere::new(1.0)), tx);

    let result = session.run();
    assert!(matches!(result, Err(BridgeError::Trap(_))));
    assert_eq!(session.state(), RenderState::Failed);
    assert!(rx.iter().next().is_none());
}

#[test]
fn test_trap_in_both_modes() {
    for config in [RendererConfig::fast(), RendererConfig::compatible()] {
        let (result, _) = render(TRAP_GUEST, config, Arc::new(Sphere::new(1.0)));
        assert!(matches!(result, Err(BridgeError::Trap(_))));
    }
}

#[test]
fn test_instantiation_failure_fails_session() {
    let wat = r#"(module (memory (export "memory") 8) (func (export "mesh") (param i32)))"#;
    let config = RendererConfig::default().max_memory(64 * 1024);
    let renderer = Renderer::from_bytes(config, "greedy", wat.as_bytes()).unwrap();
    let (tx, _rx) = triangle_channel(None);
    let mut session = renderer.session(Arc::new(Sphere::new(1.0)), tx);

    assert!(matches!(session.bind(), Err(BridgeError::Instantiate(_))));
    assert_eq!(session.state(), RenderState::Failed);
    assert!(session.run().is_err());
}

#[test]
fn test_unsupported_guest_is_rejected_before_render() {
    let wat = r#"
    (module
      (import "env" "host_log" (func (param i32)))
      (memory (export "memory") 1)
      (func (export "mesh") (param i32)))
    "#;
    let result = Renderer::from_bytes(RendererConfig::default(), "chatty", wat.as_bytes());
    assert!(matches!(result, Err(BridgeError::Instantiate(_))));
}

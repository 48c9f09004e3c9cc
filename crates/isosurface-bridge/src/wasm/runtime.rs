//! Sandbox runtime built on wasmtime.
//!
//! One [`MeshSandbox`] owns an engine configured for the selected
//! [`ExecutionMode`]. Guests are compiled once into a [`GuestModule`] and can
//! be instantiated any number of times; every instantiation gets its own
//! store, linear memory and [`HostContext`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use wasmtime::*;

use super::config::{ExecutionMode, RendererConfig};
use super::host_functions::{register_host_functions, HOST_MODULE, HOST_FUNCTIONS};
use crate::error::{BridgeError, ProtocolError, Result};
use crate::field::DistanceField;
use crate::sink::TriangleSink;

/// Guest export that runs the meshing algorithm.
pub const MESH_EXPORT: &str = "mesh";

/// Optional guest export returning the address the host should write the
/// bounding box to.
pub const AABB_ADDR_EXPORT: &str = "sdf_aabb_addr";

/// Counters collected while a guest runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Triangles pushed into the sink
    pub triangles: u64,
    /// Mesh-result deliveries received
    pub batches: u64,
    /// Field evaluations requested by the guest
    pub evaluations: u64,
    /// Bounding-box queries requested by the guest
    pub aabb_queries: u64,
    /// Wall time spent inside the guest entry point in microseconds
    pub execution_time_us: u64,
}

/// Per-request state reachable from every host function through its
/// `Caller`.
///
/// Holds the field being meshed and the sink receiving triangles, so one
/// compiled guest can serve sequential requests without any shared mutable
/// state between them.
pub struct HostContext {
    pub(crate) field: Arc<dyn DistanceField>,
    pub(crate) sink: Box<dyn TriangleSink>,
    pub(crate) aabb_addr: u32,
    pub(crate) stats: RenderStats,
    limits: StoreLimits,
}

impl HostContext {
    /// Create a context for one meshing request.
    pub fn new(
        field: Arc<dyn DistanceField>,
        sink: impl TriangleSink + 'static,
        aabb_addr: u32,
    ) -> Self {
        Self {
            field,
            sink: Box::new(sink),
            aabb_addr,
            stats: RenderStats::default(),
            limits: StoreLimits::default(),
        }
    }

    /// Address the bounding-box query writes to.
    pub fn aabb_addr(&self) -> u32 {
        self.aabb_addr
    }

    /// Counters collected so far.
    pub fn stats(&self) -> RenderStats {
        self.stats
    }
}

/// Sandbox runtime handle: an engine plus the host configuration.
pub struct MeshSandbox {
    engine: Engine,
    config: RendererConfig,
}

/// A compiled, protocol-checked guest artifact.
#[derive(Clone)]
pub struct GuestModule {
    module: Module,
    name: String,
}

/// An instantiated guest with its private store.
pub struct GuestInstance {
    store: Store<HostContext>,
    instance: Instance,
}

impl MeshSandbox {
    /// Create a sandbox with the given configuration.
    pub fn new(config: RendererConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        match config.mode {
            ExecutionMode::Compiled => {
                engine_config.strategy(Strategy::Cranelift);
                engine_config.cranelift_opt_level(OptLevel::Speed);
            }
            ExecutionMode::Interpreted => {
                engine_config
                    .target(pulley_target())
                    .map_err(|e| BridgeError::Engine(format!("pulley target: {}", e)))?;
            }
        }

        // Configure caching if path provided
        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| BridgeError::Engine(format!("engine creation failed: {}", e)))?;

        tracing::info!(mode = %config.mode, "created meshing sandbox");
        Ok(Self { engine, config })
    }

    /// Load and check a guest artifact from a file.
    pub fn load_guest(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = std::fs::read(path)?;
        self.load_guest_bytes(&name, &bytes)
    }

    /// Load and check a guest artifact from bytes (binary or text format).
    pub fn load_guest_bytes(&self, name: &str, bytes: &[u8]) -> Result<GuestModule> {
        let start = Instant::now();
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| BridgeError::Compile(format!("{}: {}", name, e)))?;
        tracing::debug!(
            guest = name,
            mode = %self.config.mode,
            elapsed_us = start.elapsed().as_micros() as u64,
            "compiled guest"
        );

        let guest = GuestModule {
            module,
            name: name.to_string(),
        };
        guest.check_protocol()?;
        Ok(guest)
    }

    /// Build a linker with the host callback set registered under
    /// [`HOST_MODULE`].
    pub fn host_linker(&self) -> Result<Linker<HostContext>> {
        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;
        Ok(linker)
    }

    /// Instantiate a guest against a fresh store holding `context`.
    pub fn instantiate(&self, guest: &GuestModule, context: HostContext) -> Result<GuestInstance> {
        let linker = self.host_linker()?;
        self.instantiate_with(&linker, guest, context)
    }

    /// Instantiate a guest with an existing linker.
    pub fn instantiate_with(
        &self,
        linker: &Linker<HostContext>,
        guest: &GuestModule,
        mut context: HostContext,
    ) -> Result<GuestInstance> {
        context.limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();
        let mut store = Store::new(&self.engine, context);

        // Configure resource limits via the stored limiter
        store.limiter(|ctx| &mut ctx.limits);

        let instance = linker
            .instantiate(&mut store, &guest.module)
            .map_err(|e| BridgeError::Instantiate(format!("{}: {}", guest.name, e)))?;

        let mut instance = GuestInstance { store, instance };
        instance.negotiate_aabb_addr()?;
        Ok(instance)
    }

    /// Get the configuration.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub(crate) fn set_mesh_cells(&mut self, mesh_cells: u32) {
        self.config.mesh_cells = mesh_cells;
    }

    /// Execution mode of the engine.
    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }
}

/// Pulley flavor matching the host pointer width.
fn pulley_target() -> &'static str {
    if cfg!(target_pointer_width = "64") {
        "pulley64"
    } else {
        "pulley32"
    }
}

impl GuestModule {
    /// Get the guest name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Reject guests that cannot speak the meshing protocol before any store
    /// is created for them.
    fn check_protocol(&self) -> Result<()> {
        for import in self.module.imports() {
            if import.module() != HOST_MODULE || !HOST_FUNCTIONS.contains(&import.name()) {
                return Err(BridgeError::Instantiate(format!(
                    "{}: unsupported import {}.{}",
                    self.name,
                    import.module(),
                    import.name()
                )));
            }
        }

        let mesh = self
            .module
            .get_export(MESH_EXPORT)
            .and_then(|e| e.func().cloned())
            .ok_or_else(|| BridgeError::MissingExport(MESH_EXPORT.to_string()))?;
        let params: Vec<ValType> = mesh.params().collect();
        if params.len() != 1 || !matches!(params[0], ValType::I32) {
            return Err(BridgeError::Instantiate(format!(
                "{}: '{}' must take exactly one i32 parameter",
                self.name, MESH_EXPORT
            )));
        }

        if !matches!(self.module.get_export("memory"), Some(ExternType::Memory(_))) {
            return Err(BridgeError::MissingExport("memory".to_string()));
        }

        Ok(())
    }
}

impl GuestInstance {
    /// Let the guest move the bounding-box output address, if it exports
    /// [`AABB_ADDR_EXPORT`].
    fn negotiate_aabb_addr(&mut self) -> Result<()> {
        let Ok(func) = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, AABB_ADDR_EXPORT)
        else {
            return Ok(());
        };

        let addr = func
            .call(&mut self.store, ())
            .map_err(classify_guest_error)? as u32;
        tracing::debug!(addr, "guest requested bounding-box address");
        self.store.data_mut().aabb_addr = addr;
        Ok(())
    }

    /// Run the guest's meshing entry point to completion.
    ///
    /// Triangles reach the sink while this call is in progress. Any trap or
    /// protocol violation aborts the call.
    pub fn mesh(&mut self, mesh_cells: u32) -> Result<()> {
        let func = self
            .instance
            .get_func(&mut self.store, MESH_EXPORT)
            .ok_or_else(|| BridgeError::MissingExport(MESH_EXPORT.to_string()))?;

        // Guests may return a status word; it carries no meaning here.
        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];

        let start = Instant::now();
        let outcome = func.call(&mut self.store, &[Val::I32(mesh_cells as i32)], &mut results);
        self.store.data_mut().stats.execution_time_us += start.elapsed().as_micros() as u64;

        outcome.map_err(classify_guest_error)
    }

    /// Write bytes to guest memory at the given offset.
    pub fn write_memory(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let memory = self.get_memory()?;
        let mem_data = memory.data_mut(&mut self.store);

        let end = offset.checked_add(data.len()).filter(|&end| end <= mem_data.len());
        let Some(end) = end else {
            return Err(ProtocolError::OutOfBounds {
                offset: offset as u64,
                len: data.len() as u64,
                memory_size: mem_data.len() as u64,
            }
            .into());
        };

        mem_data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read bytes from guest memory at the given offset.
    pub fn read_memory(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let memory = self.get_memory()?;
        let mem_data = memory.data(&self.store);

        let end = offset.checked_add(len).filter(|&end| end <= mem_data.len());
        let Some(end) = end else {
            return Err(ProtocolError::OutOfBounds {
                offset: offset as u64,
                len: len as u64,
                memory_size: mem_data.len() as u64,
            }
            .into());
        };

        Ok(mem_data[offset..end].to_vec())
    }

    /// Current size of guest memory in bytes.
    pub fn memory_size(&mut self) -> Result<usize> {
        let memory = self.get_memory()?;
        Ok(memory.data_size(&self.store))
    }

    /// Get the memory export.
    fn get_memory(&mut self) -> Result<Memory> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or(BridgeError::Protocol(ProtocolError::MissingMemory))
    }

    /// Per-request context.
    pub fn context(&self) -> &HostContext {
        self.store.data()
    }

    /// Drop the store and return the per-request context.
    pub fn into_context(self) -> HostContext {
        self.store.into_data()
    }
}

/// Turn an error surfaced by a guest call back into a typed bridge error.
///
/// Host callbacks raise [`ProtocolError`] or [`BridgeError`]; wasmtime hands
/// them back from the entry point wrapped with backtrace context.
fn classify_guest_error(err: wasmtime::Error) -> BridgeError {
    if let Some(protocol) = err.downcast_ref::<ProtocolError>() {
        return BridgeError::Protocol(protocol.clone());
    }
    let err = match err.downcast::<BridgeError>() {
        Ok(bridge) => return bridge,
        Err(err) => err,
    };
    match err.downcast_ref::<Trap>() {
        Some(trap) => BridgeError::Trap(trap.to_string()),
        None => BridgeError::Trap(format!("{:#}", err)),
    }
}

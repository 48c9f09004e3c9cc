//! The renderer: drives one guest meshing call per request.
//!
//! A render moves through `Idle → Bound → Running → Done`. Any failure on
//! the way lands in `Failed`, which is terminal: the attempt is abandoned and
//! the error goes back to the caller untouched.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::field::DistanceField;
use crate::sink::TriangleSink;
use crate::wasm::{ExecutionMode, GuestInstance, GuestModule, HostContext, MeshSandbox, RenderStats, RendererConfig};

/// Lifecycle of a single render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// Request context created, nothing registered yet
    Idle,
    /// Host callbacks bound to a fresh guest instance
    Bound,
    /// Guest entry point in progress
    Running,
    /// Entry point returned normally
    Done,
    /// Setup, trap or protocol fault; terminal
    Failed,
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RenderState::Idle => "idle",
            RenderState::Bound => "bound",
            RenderState::Running => "running",
            RenderState::Done => "done",
            RenderState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Meshes distance fields by running a sandboxed guest.
///
/// The guest is compiled once when the renderer is built; each call to
/// [`render`](Renderer::render) instantiates it into a fresh store, so
/// sequential renders never share guest memory or request state.
pub struct Renderer {
    sandbox: MeshSandbox,
    guest: GuestModule,
}

impl Renderer {
    /// Create a renderer for an already compiled guest.
    pub fn new(sandbox: MeshSandbox, guest: GuestModule) -> Result<Self> {
        sandbox.config().validate()?;
        Ok(Self { sandbox, guest })
    }

    /// Compile `bytes` as the guest and build a renderer around it.
    pub fn from_bytes(config: RendererConfig, name: &str, bytes: &[u8]) -> Result<Self> {
        config.validate()?;
        let sandbox = MeshSandbox::new(config)?;
        let guest = sandbox.load_guest_bytes(name, bytes)?;
        Self::new(sandbox, guest)
    }

    /// Load the guest from a file and build a renderer around it.
    pub fn from_file(config: RendererConfig, path: impl AsRef<Path>) -> Result<Self> {
        config.validate()?;
        let sandbox = MeshSandbox::new(config)?;
        let guest = sandbox.load_guest(path)?;
        Self::new(sandbox, guest)
    }

    /// Natively compiled guest execution.
    pub fn fast(name: &str, bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(RendererConfig::fast(), name, bytes)
    }

    /// Interpreted guest execution.
    pub fn compatible(name: &str, bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(RendererConfig::compatible(), name, bytes)
    }

    /// Human-readable description of the active configuration.
    pub fn info(&self) -> String {
        let config = self.sandbox.config();
        format!(
            "Sandboxed isosurface renderer (meshCells: {}, mode: {})",
            config.mesh_cells, config.mode
        )
    }

    /// Get the configuration.
    pub fn config(&self) -> &RendererConfig {
        self.sandbox.config()
    }

    /// Execution mode in use.
    pub fn mode(&self) -> ExecutionMode {
        self.sandbox.mode()
    }

    /// The compiled guest.
    pub fn guest(&self) -> &GuestModule {
        &self.guest
    }

    /// Change the resolution used by subsequent renders.
    pub fn set_mesh_cells(&mut self, mesh_cells: u32) -> Result<()> {
        let config = self.sandbox.config().clone().mesh_cells(mesh_cells);
        config.validate()?;
        // Resolution is a call argument only; the engine stays as built.
        self.sandbox.set_mesh_cells(mesh_cells);
        Ok(())
    }

    /// Start a render session without running it.
    pub fn session(
        &self,
        field: Arc<dyn DistanceField>,
        sink: impl TriangleSink + 'static,
    ) -> RenderSession<'_> {
        let context = HostContext::new(field, sink, self.sandbox.config().aabb_addr);
        RenderSession {
            renderer: self,
            state: RenderState::Idle,
            context: Some(context),
            instance: None,
        }
    }

    /// Mesh `field`, pushing triangles into `sink` as the guest delivers
    /// them. Blocks until the guest entry point returns.
    pub fn render(
        &self,
        field: Arc<dyn DistanceField>,
        sink: impl TriangleSink + 'static,
    ) -> Result<RenderStats> {
        let mut session = self.session(field, sink);
        session.run()
    }
}

/// One render attempt and its state machine.
pub struct RenderSession<'r> {
    renderer: &'r Renderer,
    state: RenderState,
    context: Option<HostContext>,
    instance: Option<GuestInstance>,
}

impl RenderSession<'_> {
    /// Current state.
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// `Idle → Bound`: register the host callbacks and instantiate the guest
    /// against this request's context.
    pub fn bind(&mut self) -> Result<()> {
        if self.state != RenderState::Idle {
            return Err(self.invalid_transition(RenderState::Bound));
        }
        let Some(context) = self.context.take() else {
            return Err(self.invalid_transition(RenderState::Bound));
        };

        match self
            .renderer
            .sandbox
            .instantiate(&self.renderer.guest, context)
        {
            Ok(instance) => {
                self.instance = Some(instance);
                self.transition(RenderState::Bound);
                Ok(())
            }
            Err(e) => {
                self.transition(RenderState::Failed);
                Err(e)
            }
        }
    }

    /// `Bound → Running → Done`: call the guest entry point with the
    /// configured resolution. Binds first when still idle.
    pub fn run(&mut self) -> Result<RenderStats> {
        if self.state == RenderState::Idle {
            self.bind()?;
        }
        if self.state != RenderState::Bound {
            return Err(self.invalid_transition(RenderState::Running));
        }
        let Some(mut instance) = self.instance.take() else {
            return Err(self.invalid_transition(RenderState::Running));
        };

        let mesh_cells = self.renderer.sandbox.config().mesh_cells;
        self.transition(RenderState::Running);
        tracing::debug!(guest = self.renderer.guest.name(), mesh_cells, "calling guest entry point");

        match instance.mesh(mesh_cells) {
            Ok(()) => {
                self.transition(RenderState::Done);
                let stats = instance.context().stats();
                if stats.batches == 0 {
                    tracing::debug!("guest returned without delivering a mesh");
                }
                tracing::info!(
                    triangles = stats.triangles,
                    evaluations = stats.evaluations,
                    execution_time_us = stats.execution_time_us,
                    "render complete"
                );
                Ok(stats)
            }
            Err(e) => {
                self.transition(RenderState::Failed);
                tracing::warn!(error = %e, "render aborted");
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: RenderState) {
        tracing::trace!(from = %self.state, to = %next, "render state");
        self.state = next;
    }

    fn invalid_transition(&self, to: RenderState) -> BridgeError {
        BridgeError::Config(format!("cannot move render from {} to {}", self.state, to))
    }
}

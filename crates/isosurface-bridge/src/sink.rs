//! Triangle sink: the one-way channel from the bridge to a mesh consumer.
//!
//! The bridge only ever pushes. Whoever owns the receiving end decides when
//! iteration stops; the bridge never closes the channel on its own. Senders
//! handed to a render are dropped when the render finishes, so callers that
//! want to keep the channel open across renders pass a clone.

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{BridgeError, Result};
use crate::geometry::Triangle3;

/// Destination for reconstructed triangles.
///
/// `push` may block when the sink applies backpressure. It fails only when
/// the consumer has gone away, which aborts the render.
pub trait TriangleSink {
    /// Hand one triangle to the consumer.
    fn push(&mut self, triangle: Triangle3) -> Result<()>;
}

impl TriangleSink for Sender<Triangle3> {
    fn push(&mut self, triangle: Triangle3) -> Result<()> {
        self.send(triangle).map_err(|_| BridgeError::SinkClosed)
    }
}

impl TriangleSink for std::sync::mpsc::Sender<Triangle3> {
    fn push(&mut self, triangle: Triangle3) -> Result<()> {
        self.send(triangle).map_err(|_| BridgeError::SinkClosed)
    }
}

impl TriangleSink for std::sync::mpsc::SyncSender<Triangle3> {
    fn push(&mut self, triangle: Triangle3) -> Result<()> {
        self.send(triangle).map_err(|_| BridgeError::SinkClosed)
    }
}

/// Create a triangle channel.
///
/// `None` gives an unbounded channel; `Some(n)` blocks the bridge once `n`
/// triangles are waiting for the consumer.
pub fn triangle_channel(capacity: Option<usize>) -> (Sender<Triangle3>, Receiver<Triangle3>) {
    match capacity {
        Some(n) => channel::bounded(n),
        None => channel::unbounded(),
    }
}

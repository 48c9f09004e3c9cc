//! Error types for the bridge crate.

use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Failed to build the wasmtime engine
    #[error("engine error: {0}")]
    Engine(String),

    /// Guest artifact failed to compile
    #[error("guest compilation failed: {0}")]
    Compile(String),

    /// Host module registration or guest instantiation failed
    #[error("instantiation failed: {0}")]
    Instantiate(String),

    /// Guest does not export something the protocol requires
    #[error("guest is missing export '{0}'")]
    MissingExport(String),

    /// Guest broke the host/guest memory protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Guest trapped while meshing
    #[error("guest trapped: {0}")]
    Trap(String),

    /// The consumer side of the triangle sink is gone
    #[error("triangle sink closed by consumer")]
    SinkClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A guest/host protocol fault raised from inside a host callback.
///
/// These are never recoverable: the in-flight meshing call is aborted and
/// nothing from the offending batch reaches the sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Access past the end of guest linear memory
    #[error("access of {len} bytes at offset {offset} exceeds guest memory of {memory_size} bytes")]
    OutOfBounds {
        /// Byte offset requested by the guest
        offset: u64,
        /// Number of bytes accessed
        len: u64,
        /// Current size of guest memory
        memory_size: u64,
    },

    /// Buffer length that cannot describe whole vertices or triangles
    #[error("{buffer} length {len} is not a multiple of 3")]
    MalformedLength {
        /// Which buffer was malformed
        buffer: &'static str,
        /// Element count passed by the guest
        len: u32,
    },

    /// Triangle refers to a vertex the guest never delivered
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index
        index: u32,
        /// Number of vertices in the batch
        vertex_count: u32,
    },

    /// Guest does not export its linear memory
    #[error("guest does not export 'memory'")]
    MissingMemory,
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

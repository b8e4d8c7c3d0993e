//! ## SDR Flow-Graph Runtime
use thiserror::Error;

mod block;
mod block_meta;
pub mod config;
mod data_type;
mod flowgraph;
mod logging;
mod pipe;
#[allow(clippy::module_inception)]
mod runtime;
pub mod scheduler;
mod stream_io;
mod topology;

pub use block::Block;
pub use block::Kernel;
pub use block_meta::BlockMeta;
pub use block_meta::BlockMetaBuilder;
pub use data_type::DataType;
pub use data_type::SampleVec;
pub use data_type::BIT;
pub use data_type::BYTE;
pub use data_type::COMPLEX_FLOAT32;
pub use data_type::FLOAT32;
pub use flowgraph::BlockId;
pub use flowgraph::CompositeId;
pub use flowgraph::Endpoint;
pub use flowgraph::Flowgraph;
pub use pipe::PipeReader;
pub use pipe::PipeWriter;
pub use runtime::FlowgraphHandle;
pub use runtime::Runtime;
pub use stream_io::PortSpec;
pub use stream_io::SignatureBuilder;
pub use stream_io::StreamInput;
pub use stream_io::StreamIo;
pub use stream_io::StreamOutput;
pub use stream_io::TypeSignature;
pub use topology::Topology;

/// Initialize the runtime (logging, configuration).
///
/// Called implicitly when a [Runtime] is constructed; safe to call more than
/// once.
pub fn init() {
    logging::init();
}

/// Outcome of one cooperative tick of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    /// At least one output sample was written to every output pipe.
    Produced,
    /// No samples this tick; downstream blocks may be skipped.
    Idle,
    /// Upstream ended; the block closed its outputs.
    Eof,
}

/// Runtime error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown port, double connect, or an alias declaration with the wrong
    /// polarity.
    #[error("malformed connection: {0}")]
    MalformedConnection(String),
    /// Unconnected input or a cycle in the dependency graph.
    #[error("topology error: {0}")]
    Topology(String),
    /// No declared signature of the block matches the upstream output types.
    #[error("type mismatch in block {block}: {msg}")]
    TypeMismatch { block: String, msg: String },
    /// Inputs of the block disagree on sample rate, or a source declares none.
    #[error("rate mismatch in block {block}: {msg}")]
    RateMismatch { block: String, msg: String },
    /// Unexpected pipe read/write failure (not EOF).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// A fork/signal/wait primitive failed.
    #[error("os error: {call} failed ({errno})")]
    Os {
        call: &'static str,
        errno: std::io::Error,
    },
    /// A block failed while running.
    #[error("block {block} failed: {msg}")]
    BlockRuntime { block: String, msg: String },
    /// Block id does not refer to a block of this flowgraph.
    #[error("invalid block id")]
    InvalidBlock,
}

impl Error {
    pub(crate) fn os(call: &'static str) -> Error {
        Error::Os {
            call,
            errno: std::io::Error::last_os_error(),
        }
    }
}

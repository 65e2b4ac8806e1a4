use crate::ir::{BlockIx, ShaderKind};
use thiserror::Error;

/// Errors raised while planning instrumentation. All of them are decided at
/// instrumentation time; none reaches the instrumented program.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("trace buffer size {0} is not a power of two of at least 16 bytes")]
    InvalidBufferSize(u32),

    #[error(
        "block {block} of `{function}` needs {bytes} bytes of trace space, \
         but a block may use at most {limit}"
    )]
    StaticOverflow {
        function: String,
        block: BlockIx,
        bytes: u32,
        limit: u32,
    },

    #[error(
        "block {block} of `{function}` writes {steps} step records, \
         more than a block header can count"
    )]
    TooManySteps {
        function: String,
        block: BlockIx,
        steps: usize,
    },

    #[error("shader kind {0:?} has no invocation selector")]
    UnsupportedShaderKind(ShaderKind),

    #[error("malformed module: {0}")]
    MalformedModule(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("could not serialize report: {0}")]
    Report(serde_json::Error),
}

/// Errors raised by the reference executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("path is empty")]
    EmptyPath,

    #[error("path starts at block {0}, not at the entry block")]
    NotEntry(BlockIx),

    #[error("block {to} is not a successor of block {from}")]
    InvalidEdge { from: BlockIx, to: BlockIx },

    #[error("block {0} has no instrumentation plan")]
    UnplannedBlock(BlockIx),

    #[error("record stored before the invocation identifier was established")]
    NoIdentity,
}

/// Errors raised while decoding a trace buffer snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("snapshot holds {got} words, layout needs {want}")]
    SizeMismatch { got: usize, want: usize },

    #[error("unknown record tag {tag} at byte {offset}")]
    UnknownTag { tag: u8, offset: u32 },

    #[error("record at byte {offset} declares {words} words, {tag} needs {want}")]
    BadSize {
        offset: u32,
        tag: u8,
        words: u8,
        want: u8,
    },
}

/// Errors raised while parsing schema text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema line does not start with `Block#<ordinal>:`: {0:?}")]
    BadPrefix(String),

    #[error("malformed schema entry {0:?}")]
    BadEntry(String),
}

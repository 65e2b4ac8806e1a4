//! Per-invocation execution tracing for GPU programs.
//!
//! Given a module of entry functions, this library plans the logging code
//! that records which blocks a single chosen invocation runs and the values
//! it computes. Each invocation appends fixed-layout records into a shared
//! ring buffer through atomic reservations; a schema line per block lets a
//! host decoder turn the buffer back into a trace.

mod config;
mod decode;
mod error;
mod execute;
pub mod ir;
mod plan;
mod record;
mod report;
mod schema;
mod select;
mod trace;
mod value;

#[cfg(feature = "python")]
mod interop;

pub use config::{InstrumentConfig, SelectorTarget};
pub use decode::{decode, DecodedRecord, DecodedTrace, HalfTrace};
pub use error::{DecodeError, ExecError, InstrumentError, SchemaError};
pub use execute::{Invocation, Outcome, Runner};
pub use ir::{Module, ModuleBuilder, ShaderKind};
pub use plan::{
    plan_function, BlockPlan, FunctionPlan, InsertPoint, Insertion, Instrumentation,
    Instrumenter, PlanningContext, Prologue,
};
pub use record::{
    encode_block, encode_step, pack_value_ordinal, Header, RecordType, RecordWrite, Step,
    TraceOp, ValueOrdinal, ValuePart, Word, BLOCK_TAG, PREFIX_BYTES,
};
pub use report::{FunctionReport, Report};
pub use schema::{parse_schema, Access, SchemaEntry, SchemaLine};
pub use select::{select_invocation, Comparison, InputValue, Selection, SystemInput};
pub use trace::{BufferLayout, InterestClass, Reservation, TraceBuffer, TraceWindow};
pub use value::{encoding_of, widen_bits, StepKind, ValueType, Widen};

#[cfg(feature = "python")]
pub use interop::shadertrace;

#[cfg(feature = "python")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

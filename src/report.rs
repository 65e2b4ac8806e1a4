use crate::error::InstrumentError;
use crate::ir::{ShaderKind, SystemValue};
use crate::plan::Instrumentation;
use crate::select::Selection;
use crate::trace::{InterestClass, TraceWindow};
use serde::Serialize;

/// Summary of an instrumentation run, handed back to the host alongside the
/// schema text.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub buffer_size: u32,
    pub offset_mask: u32,
    pub overflow_threshold: u32,
    pub selected: TraceWindow,
    pub unselected: TraceWindow,
    pub functions: Vec<FunctionReport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct FunctionReport<'a> {
    pub name: &'a str,
    pub kind: ShaderKind,
    pub selection: &'a Selection,
    /// Inputs the host must add to the function signature.
    pub required_inputs: &'a [SystemValue],
    /// Largest per-visit trace use of any block.
    pub max_block_bytes: u32,
    pub schema: Vec<String>,
}

impl Instrumentation {
    pub fn report(&self) -> Report<'_> {
        let functions = self
            .ordered()
            .into_iter()
            .map(|p| FunctionReport {
                name: &p.name,
                kind: p.kind,
                selection: &p.prologue.selection,
                required_inputs: p.required_inputs(),
                max_block_bytes: p.blocks.iter().map(|b| b.bytes).max().unwrap_or(0),
                schema: p.schema_lines().collect(),
            })
            .collect();

        Report {
            buffer_size: self.layout.size(),
            offset_mask: self.layout.offset_mask(),
            overflow_threshold: self.layout.overflow_threshold(),
            selected: self.layout.window(InterestClass::Selected),
            unselected: self.layout.window(InterestClass::Unselected),
            functions,
        }
    }
}

impl Report<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Instrumentation {
    /// The report rendered as JSON.
    pub fn report_json(&self) -> Result<String, InstrumentError> {
        self.report().to_json().map_err(InstrumentError::Report)
    }
}

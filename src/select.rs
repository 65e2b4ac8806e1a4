//! Invocation selection.
//!
//! Each entry kind decides, once at function entry, whether the running
//! invocation is the one being debugged. The decision is a conjunction of
//! equality tests between system inputs and caller-supplied targets.

use crate::config::SelectorTarget;
use crate::error::InstrumentError;
use crate::ir::{Function, ShaderKind, SystemValue};
use serde::Serialize;
use smallvec::SmallVec;

/// A system input an invocation can be identified by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemInput {
    /// Fragment coordinate, truncated to an integer before comparing.
    FragCoordX,
    FragCoordY,
    VertexId,
    InstanceId,
    DispatchThreadId(u8),
    PrimitiveId,
    GsInstanceId,
    OutputControlPointId,
    DispatchRaysIndex(u8),
}

impl SystemInput {
    /// The signature element this input is read from, if it is read from
    /// the function's declared inputs rather than an intrinsic.
    pub fn signature_element(self) -> Option<SystemValue> {
        match self {
            SystemInput::FragCoordX | SystemInput::FragCoordY => Some(SystemValue::Position),
            SystemInput::VertexId => Some(SystemValue::VertexId),
            SystemInput::InstanceId => Some(SystemValue::InstanceId),
            _ => None,
        }
    }
}

/// The runtime value of a system input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Uint(u32),
    Float(f32),
}

impl InputValue {
    /// The integer compared against the target; floats are truncated.
    pub fn as_u32(self) -> u32 {
        match self {
            InputValue::Uint(u) => u,
            InputValue::Float(f) => f as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Comparison {
    pub input: SystemInput,
    pub target: u32,
}

/// The selection test for one entry function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// All of these must hold. Empty means every invocation is selected.
    pub terms: SmallVec<[Comparison; 3]>,
    /// Signature elements the host has to add to the function's inputs
    /// before the test can be emitted.
    pub required_inputs: SmallVec<[SystemValue; 2]>,
}

impl Selection {
    pub fn always(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluates the test. Inputs the lookup cannot provide read as zero.
    pub fn evaluate<F>(&self, lookup: F) -> bool
    where
        F: Fn(SystemInput) -> Option<InputValue>,
    {
        self.terms.iter().all(|c| {
            lookup(c.input).map_or(0, InputValue::as_u32) == c.target
        })
    }
}

/// Builds the selection test for `func`, which is an entry of kind `kind`.
pub fn select_invocation(
    kind: ShaderKind,
    func: &Function,
    target: &SelectorTarget,
) -> Result<Selection, InstrumentError> {
    use SystemInput::*;

    let [p0, p1, p2] = target.parameters;
    let inputs: SmallVec<[(SystemInput, u32); 3]> = match kind {
        ShaderKind::Pixel => [(FragCoordX, p0), (FragCoordY, p1)].into_iter().collect(),
        ShaderKind::Vertex => [(VertexId, p0), (InstanceId, p1)].into_iter().collect(),
        ShaderKind::Compute | ShaderKind::Mesh | ShaderKind::Amplification => [
            (DispatchThreadId(0), p0),
            (DispatchThreadId(1), p1),
            (DispatchThreadId(2), p2),
        ]
        .into_iter()
        .collect(),
        ShaderKind::Geometry => {
            let mut v: SmallVec<[(SystemInput, u32); 3]> = SmallVec::new();
            v.push((PrimitiveId, p0));
            if func.gs_instances > 1 {
                v.push((GsInstanceId, p1));
            }
            v
        }
        ShaderKind::Hull => [(PrimitiveId, p0), (OutputControlPointId, p1)]
            .into_iter()
            .collect(),
        ShaderKind::Domain => [(PrimitiveId, p0)].into_iter().collect(),
        ShaderKind::RayGeneration
        | ShaderKind::Intersection
        | ShaderKind::AnyHit
        | ShaderKind::ClosestHit
        | ShaderKind::Miss => [
            (DispatchRaysIndex(0), p0),
            (DispatchRaysIndex(1), p1),
            (DispatchRaysIndex(2), p2),
        ]
        .into_iter()
        .collect(),
        ShaderKind::Node => SmallVec::new(),
        ShaderKind::Callable | ShaderKind::Library => {
            return Err(InstrumentError::UnsupportedShaderKind(kind))
        }
    };

    let mut required_inputs: SmallVec<[SystemValue; 2]> = SmallVec::new();
    for (input, _) in &inputs {
        if let Some(sv) = input.signature_element() {
            if !func.declares(sv) && !required_inputs.contains(&sv) {
                required_inputs.push(sv);
            }
        }
    }

    Ok(Selection {
        terms: inputs
            .into_iter()
            .map(|(input, target)| Comparison { input, target })
            .collect(),
        required_inputs,
    })
}

//! The on-wire record protocol.
//!
//! Every record starts with three little-endian words: a header word, the
//! invocation identifier, and an ordinal (the first instruction of the block
//! for block headers, the source instruction for steps). Value-carrying steps
//! append their payload and a value ordinal word.
//!
//! ```text
//! header: bits 0-3 size in words | 4-7 flags | 8-15 type tag | 16-31 payload
//! ```

use crate::ir::InstIx;
use crate::value::{encoding_of, StepKind, ValueType, Widen};
use smallvec::{smallvec, SmallVec};

/// Type tag of block header records.
pub const BLOCK_TAG: u8 = 249;

/// Size of the prefix every record starts with.
pub const PREFIX_BYTES: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Block,
    Step(StepKind),
}

impl RecordType {
    pub fn tag(self) -> u8 {
        match self {
            RecordType::Block => BLOCK_TAG,
            RecordType::Step(k) => k.tag(),
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        if tag == BLOCK_TAG {
            Some(RecordType::Block)
        } else {
            StepKind::from_tag(tag).map(RecordType::Step)
        }
    }

    /// Total bytes a record of this type occupies.
    pub fn bytes(self) -> u32 {
        match self {
            RecordType::Block => PREFIX_BYTES,
            RecordType::Step(k) if k.carries_value() => PREFIX_BYTES + k.payload_bytes() + 4,
            RecordType::Step(_) => PREFIX_BYTES,
        }
    }

    pub fn words(self) -> u8 {
        (self.bytes() / 4) as u8
    }
}

/// The unpacked header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub size_words: u8,
    pub flags: u8,
    pub tag: u8,
    pub payload: u16,
}

impl Header {
    pub fn pack(self) -> u32 {
        (self.size_words as u32 & 0xf)
            | ((self.flags as u32 & 0xf) << 4)
            | ((self.tag as u32) << 8)
            | ((self.payload as u32) << 16)
    }

    pub fn unpack(word: u32) -> Self {
        Self {
            size_words: (word & 0xf) as u8,
            flags: ((word >> 4) & 0xf) as u8,
            tag: ((word >> 8) & 0xff) as u8,
            payload: (word >> 16) as u16,
        }
    }
}

/// Which named value a step carries: `(base << 16) | (index & 0xFFFF)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueOrdinal {
    Static { base: u32, index: u32 },
    /// The index is only known at runtime, from the given instruction.
    Dynamic { base: u32, index: InstIx },
}

pub fn pack_value_ordinal(base: u32, index: u32) -> u32 {
    (base << 16) | (index & 0xffff)
}

/// Which part of a value a store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValuePart {
    Whole(Widen),
    Low,
    High,
    /// Halves of a double, produced by a split rather than a bitcast.
    DoubleLow,
    DoubleHigh,
}

/// Where a stored word comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Word {
    Const(u32),
    InvocationId,
    Value { inst: InstIx, part: ValuePart },
    DynamicOrdinal { base: u32, index: InstIx },
}

/// One lowered operation. A record lowers to a single `Reserve` followed by
/// one `Store` per word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceOp {
    /// `p = atomic_add(counter, bytes)`, `cursor = (p & mask) | bias`. If
    /// `identity` is set, `p` becomes the invocation identifier.
    Reserve { bytes: u32, identity: bool },
    /// `buffer[cursor] = word`, `cursor += 4`.
    Store(Word),
}

/// A step as decided by the planner, before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Ret,
    Void,
    Value {
        kind: StepKind,
        inst: InstIx,
        widen: Widen,
        ordinal: ValueOrdinal,
    },
}

impl Step {
    /// The step recording the value `inst` of type `ty`, or `None` if values
    /// of that type are never traced.
    pub fn for_value(inst: InstIx, ty: ValueType, ordinal: ValueOrdinal) -> Option<Self> {
        let (kind, widen) = encoding_of(ty)?;
        Some(match kind {
            StepKind::Void | StepKind::Ret => Step::Void,
            kind => Step::Value {
                kind,
                inst,
                widen,
                ordinal,
            },
        })
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Ret => StepKind::Ret,
            Step::Void => StepKind::Void,
            Step::Value { kind, .. } => *kind,
        }
    }
}

/// A fully encoded record: its type and the words that make it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrite {
    pub ty: RecordType,
    pub words: SmallVec<[Word; 6]>,
}

impl RecordWrite {
    pub fn bytes(&self) -> u32 {
        self.words.len() as u32 * 4
    }

    /// Lowers the record into the reservation and store sequence emitted
    /// into the program.
    pub fn ops(&self, identity: bool) -> SmallVec<[TraceOp; 7]> {
        let mut ops = SmallVec::with_capacity(self.words.len() + 1);
        ops.push(TraceOp::Reserve {
            bytes: self.bytes(),
            identity,
        });
        ops.extend(self.words.iter().copied().map(TraceOp::Store));
        ops
    }
}

fn header(ty: RecordType, payload: u16) -> Word {
    Word::Const(
        Header {
            size_words: ty.words(),
            flags: 0,
            tag: ty.tag(),
            payload,
        }
        .pack(),
    )
}

/// Encodes the block header. `steps` is the number of step records the block
/// produces.
pub fn encode_block(first_ordinal: u32, steps: u16) -> RecordWrite {
    let ty = RecordType::Block;
    RecordWrite {
        ty,
        words: smallvec![
            header(ty, steps),
            Word::InvocationId,
            Word::Const(first_ordinal)
        ],
    }
}

/// Encodes a step for the instruction with the given ordinal.
pub fn encode_step(ordinal: u32, step: &Step) -> RecordWrite {
    let ty = RecordType::Step(step.kind());
    let mut words: SmallVec<[Word; 6]> =
        smallvec![header(ty, 0), Word::InvocationId, Word::Const(ordinal)];

    if let Step::Value {
        kind,
        inst,
        widen,
        ordinal,
    } = *step
    {
        match kind {
            StepKind::UInt64 => {
                words.push(Word::Value {
                    inst,
                    part: ValuePart::Low,
                });
                words.push(Word::Value {
                    inst,
                    part: ValuePart::High,
                });
            }
            StepKind::Double => {
                words.push(Word::Value {
                    inst,
                    part: ValuePart::DoubleLow,
                });
                words.push(Word::Value {
                    inst,
                    part: ValuePart::DoubleHigh,
                });
            }
            _ => words.push(Word::Value {
                inst,
                part: ValuePart::Whole(widen),
            }),
        }

        words.push(match ordinal {
            ValueOrdinal::Static { base, index } => Word::Const(pack_value_ordinal(base, index)),
            ValueOrdinal::Dynamic { base, index } => Word::DynamicOrdinal { base, index },
        });
    }

    RecordWrite { ty, words }
}

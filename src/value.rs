use half::f16;
use serde::{Deserialize, Serialize};

/// The type of the value an instruction produces, as far as the tracer
/// cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Void,
    /// Integer of the given bit width.
    Int(u8),
    Half,
    Float,
    Double,
    Pointer,
    /// Vector with the given component count.
    Vector(u8),
    Struct,
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Void
    }
}

impl ValueType {
    pub fn is_int(&self) -> bool {
        matches!(self, ValueType::Int(_))
    }

}

/// The six shapes a step record can take on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    Ret,
    Void,
    Float32,
    UInt32,
    UInt64,
    Double,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Ret,
        StepKind::Void,
        StepKind::Float32,
        StepKind::UInt32,
        StepKind::UInt64,
        StepKind::Double,
    ];

    /// The record type tag written into bits 8-15 of the header word.
    pub fn tag(self) -> u8 {
        match self {
            StepKind::Ret => 250,
            StepKind::Void => 251,
            StepKind::Float32 => 252,
            StepKind::UInt32 => 253,
            StepKind::UInt64 => 254,
            StepKind::Double => 255,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    /// Bytes of type-specific payload, not counting the fixed prefix or the
    /// value ordinal.
    pub fn payload_bytes(self) -> u32 {
        match self {
            StepKind::Ret | StepKind::Void => 0,
            StepKind::Float32 | StepKind::UInt32 => 4,
            StepKind::UInt64 | StepKind::Double => 8,
        }
    }

    /// Whether records of this kind carry a value (and so a value ordinal).
    pub fn carries_value(self) -> bool {
        self.payload_bytes() != 0
    }

    pub fn type_char(self) -> char {
        match self {
            StepKind::Ret => 'r',
            StepKind::Void => 'v',
            StepKind::Float32 => 'f',
            StepKind::UInt32 => '3',
            StepKind::UInt64 => '6',
            StepKind::Double => 'd',
        }
    }

    pub fn from_type_char(c: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.type_char() == c)
    }
}

/// How a value is brought up to its wire width before being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Widen {
    None,
    /// Zero-extend an integer of the given width to 32 bits.
    ZeroExtend(u8),
    HalfToFloat,
}

/// Picks the wire shape for a value of type `ty`.
///
/// Returns `None` for types that are never traced: pointers carry no stable
/// meaning across invocations, and vectors have no decomposition here.
pub fn encoding_of(ty: ValueType) -> Option<(StepKind, Widen)> {
    match ty {
        ValueType::Void | ValueType::Struct => Some((StepKind::Void, Widen::None)),
        ValueType::Int(b) if b < 32 => Some((StepKind::UInt32, Widen::ZeroExtend(b))),
        ValueType::Int(32) => Some((StepKind::UInt32, Widen::None)),
        ValueType::Int(64) => Some((StepKind::UInt64, Widen::None)),
        ValueType::Int(_) => None,
        ValueType::Half => Some((StepKind::Float32, Widen::HalfToFloat)),
        ValueType::Float => Some((StepKind::Float32, Widen::None)),
        ValueType::Double => Some((StepKind::Double, Widen::None)),
        ValueType::Pointer | ValueType::Vector(_) => None,
    }
}

/// Applies `widen` to the raw bits of a value, yielding the 32-bit word that
/// goes on the wire.
pub fn widen_bits(bits: u64, widen: Widen) -> u32 {
    match widen {
        Widen::None => bits as u32,
        Widen::ZeroExtend(b) if b == 0 => 0,
        Widen::ZeroExtend(b) => (bits as u32) & (u32::MAX >> (32 - b.min(32) as u32)),
        Widen::HalfToFloat => f16::from_bits(bits as u16).to_f32().to_bits(),
    }
}

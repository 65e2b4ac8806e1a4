//! Host-side reading of a trace buffer snapshot.
//!
//! Each half is read from its bias up to the smaller of its counter and its
//! capacity. Once the counter has passed the capacity the half has wrapped,
//! older records may be torn, and decoding stops at the first header that
//! does not make sense instead of failing.

use crate::error::DecodeError;
use crate::record::{Header, RecordType, PREFIX_BYTES};
use crate::trace::{BufferLayout, InterestClass};
use crate::value::StepKind;
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Byte offset into the buffer.
    pub offset: u32,
    pub ty: RecordType,
    /// Step count for block headers, zero otherwise.
    pub header_payload: u16,
    pub invocation: u32,
    pub ordinal: u32,
    pub payload: SmallVec<[u32; 2]>,
    pub value_ordinal: Option<u32>,
}

impl DecodedRecord {
    pub fn is_block(&self) -> bool {
        self.ty == RecordType::Block
    }

    /// The payload as raw bits, low word first.
    pub fn bits(&self) -> Option<u64> {
        match self.payload.as_slice() {
            [lo] => Some(*lo as u64),
            [lo, hi] => Some(*lo as u64 | (*hi as u64) << 32),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self.ty {
            RecordType::Step(StepKind::Float32) => self.bits().map(|b| f32::from_bits(b as u32)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.ty {
            RecordType::Step(StepKind::Double) => self.bits().map(f64::from_bits),
            _ => None,
        }
    }

    /// Register base and index of the value ordinal.
    pub fn slot(&self) -> Option<(u32, u32)> {
        self.value_ordinal.map(|v| (v >> 16, v & 0xffff))
    }
}

/// The records of one interest class, in reservation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalfTrace {
    pub class: InterestClass,
    pub counter: u32,
    pub overflowed: bool,
    pub records: Vec<DecodedRecord>,
}

impl HalfTrace {
    /// Records grouped by invocation. Each group keeps reservation order.
    pub fn by_invocation(&self) -> HashMap<u32, Vec<&DecodedRecord>> {
        let mut groups: HashMap<u32, Vec<&DecodedRecord>> = HashMap::new();
        for r in &self.records {
            groups.entry(r.invocation).or_default().push(r);
        }
        groups
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrace {
    pub selected: HalfTrace,
    pub unselected: HalfTrace,
}

impl DecodedTrace {
    pub fn half(&self, class: InterestClass) -> &HalfTrace {
        match class {
            InterestClass::Selected => &self.selected,
            InterestClass::Unselected => &self.unselected,
        }
    }
}

/// Decodes both halves of a snapshot taken with the given layout.
pub fn decode(words: &[u32], layout: BufferLayout) -> Result<DecodedTrace, DecodeError> {
    let want = (layout.size() / 4) as usize;
    if words.len() != want {
        return Err(DecodeError::SizeMismatch {
            got: words.len(),
            want,
        });
    }

    Ok(DecodedTrace {
        selected: decode_half(words, layout, InterestClass::Selected)?,
        unselected: decode_half(words, layout, InterestClass::Unselected)?,
    })
}

fn decode_half(
    words: &[u32],
    layout: BufferLayout,
    class: InterestClass,
) -> Result<HalfTrace, DecodeError> {
    let window = layout.window(class);
    let word = |byte: u32| words[(byte as usize >> 2) & (words.len() - 1)];

    let counter = word(window.counter_offset);
    let overflowed = counter > layout.capacity();
    if overflowed {
        warn!(?class, counter, capacity = layout.capacity(), "trace half overflowed");
    }

    let end = counter.min(layout.capacity());
    let mut records = vec![];
    let mut off = 0;
    while off < end {
        let at = window.offset_bias + off;
        let header = Header::unpack(word(at));

        let ty = match RecordType::from_tag(header.tag) {
            Some(ty) => ty,
            None if overflowed => break,
            None => {
                return Err(DecodeError::UnknownTag {
                    tag: header.tag,
                    offset: at,
                })
            }
        };
        if header.size_words != ty.words() {
            if overflowed {
                break;
            }
            return Err(DecodeError::BadSize {
                offset: at,
                tag: header.tag,
                words: header.size_words,
                want: ty.words(),
            });
        }

        let (payload, value_ordinal) = match ty {
            RecordType::Step(k) if k.carries_value() => {
                let n = k.payload_bytes() / 4;
                let payload = (0..n).map(|i| word(at + PREFIX_BYTES + 4 * i)).collect();
                (payload, Some(word(at + PREFIX_BYTES + 4 * n)))
            }
            _ => (SmallVec::new(), None),
        };

        trace!(offset = at, tag = header.tag, "decoded record");
        records.push(DecodedRecord {
            offset: at,
            ty,
            header_payload: header.payload,
            invocation: word(at + 4),
            ordinal: word(at + 8),
            payload,
            value_ordinal,
        });
        off += ty.bytes();
    }

    Ok(HalfTrace {
        class,
        counter,
        overflowed,
        records,
    })
}

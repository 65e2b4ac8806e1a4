//! Trace buffer layout and space reservation.
//!
//! The buffer is split into four quarters. Selected invocations start their
//! records in quarter one and may run into quarter two; the last word of
//! quarter two is their counter cell. Quarters three and four do the same
//! for everyone else.

use crate::error::InstrumentError;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Which half of the buffer an invocation writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterestClass {
    Selected,
    Unselected,
}

impl InterestClass {
    pub fn of(selected: bool) -> Self {
        if selected {
            InterestClass::Selected
        } else {
            InterestClass::Unselected
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferLayout {
    size: u32,
}

impl BufferLayout {
    pub const MIN_SIZE: u32 = 16;

    pub fn new(size: u32) -> Result<Self, InstrumentError> {
        if size < Self::MIN_SIZE || !size.is_power_of_two() {
            return Err(InstrumentError::InvalidBufferSize(size));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset_mask(&self) -> u32 {
        self.size / 4 - 1
    }

    /// Bytes each interest class may reserve before its records start to
    /// overwrite each other.
    pub fn capacity(&self) -> u32 {
        self.size / 4
    }

    /// The longest record sequence guaranteed not to corrupt itself.
    pub fn overflow_threshold(&self) -> u32 {
        self.size / 4 - 1
    }

    /// Whether a block needing `bytes` of trace space can be instrumented.
    pub fn fits(&self, bytes: u32) -> bool {
        bytes <= self.overflow_threshold()
    }

    pub fn window(&self, class: InterestClass) -> TraceWindow {
        match class {
            InterestClass::Selected => TraceWindow {
                offset_mask: self.offset_mask(),
                offset_bias: 0,
                counter_offset: self.size / 2 - 4,
            },
            InterestClass::Unselected => TraceWindow {
                offset_mask: self.offset_mask(),
                offset_bias: self.size / 2,
                counter_offset: self.size - 4,
            },
        }
    }
}

/// The three constants an invocation carries after the entry fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TraceWindow {
    pub offset_mask: u32,
    pub offset_bias: u32,
    pub counter_offset: u32,
}

impl TraceWindow {
    /// Where a record reserved at raw counter value `p` starts.
    pub fn cursor(&self, p: u32) -> u32 {
        (p & self.offset_mask) | self.offset_bias
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Counter value before the add. The first one an invocation sees is its
    /// identifier.
    pub raw: u32,
    pub cursor: u32,
}

/// A host-side trace buffer. Reservation and stores behave like the code the
/// planner emits: one atomic add per record, plain word stores after it.
#[derive(Debug)]
pub struct TraceBuffer {
    layout: BufferLayout,
    words: Vec<AtomicU32>,
}

impl TraceBuffer {
    pub fn new(layout: BufferLayout) -> Self {
        let words = (0..layout.size() / 4).map(|_| AtomicU32::new(0)).collect();
        Self { layout, words }
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    fn word_ix(&self, byte_offset: u32) -> usize {
        (byte_offset as usize >> 2) & (self.words.len() - 1)
    }

    pub fn reserve(&self, window: &TraceWindow, bytes: u32) -> Reservation {
        let counter = &self.words[self.word_ix(window.counter_offset)];
        let raw = counter.fetch_add(bytes, Ordering::AcqRel);
        Reservation {
            raw,
            cursor: window.cursor(raw),
        }
    }

    /// Stores one word. Offsets past the end wrap around.
    pub fn store(&self, byte_offset: u32, value: u32) {
        self.words[self.word_ix(byte_offset)].store(value, Ordering::Relaxed);
    }

    pub fn load(&self, byte_offset: u32) -> u32 {
        self.words[self.word_ix(byte_offset)].load(Ordering::Relaxed)
    }

    pub fn counter(&self, class: InterestClass) -> u32 {
        self.load(self.layout.window(class).counter_offset)
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Acquire)).collect()
    }
}

use crate::error::InstrumentError;
use crate::trace::BufferLayout;
use serde::{Deserialize, Serialize};

/// Target parameters the selector compares system inputs against. Their
/// meaning depends on the entry kind: x/y for pixels, vertex and instance id
/// for vertices, the three dispatch coordinates for compute and rays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTarget {
    pub parameters: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Trace buffer size in bytes.
    pub buffer_size: u32,
    pub target: SelectorTarget,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1 << 20,
            target: SelectorTarget::default(),
        }
    }
}

impl InstrumentConfig {
    pub fn new(buffer_size: u32, parameters: [u32; 3]) -> Self {
        Self {
            buffer_size,
            target: SelectorTarget { parameters },
        }
    }

    pub fn from_json(s: &str) -> Result<Self, InstrumentError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InstrumentError> {
        self.layout().map(|_| ())
    }

    pub fn layout(&self) -> Result<BufferLayout, InstrumentError> {
        BufferLayout::new(self.buffer_size)
    }
}

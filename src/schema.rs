//! The schema side channel: one text line per block telling an offline
//! decoder which records the block produces and in what order.
//!
//! ```text
//! Block#<firstOrdinal>:<ordinal>,<typeChar>,<reg>,<token>[,<extra>];...
//! ```

use crate::error::SchemaError;
use crate::value::StepKind;
use std::fmt;
use std::str::FromStr;

/// How the traced instruction writes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Ret,
    Void,
    /// Single assignment to a virtual register.
    Assign,
    /// Store to a local slot at a compile-time offset. No record is written.
    Static { base: u32, index: u32 },
    /// Store to a local slot at a runtime offset; the record carries the
    /// offset.
    Dynamic { base: u32, array_size: u32 },
}

impl Access {
    pub fn token(&self) -> char {
        match self {
            Access::Ret => 'r',
            Access::Void => 'v',
            Access::Assign => 'a',
            Access::Static { .. } => 's',
            Access::Dynamic { .. } => 'd',
        }
    }

    /// Whether a record is written to the buffer for this access.
    pub fn writes_record(&self) -> bool {
        !matches!(self, Access::Static { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaEntry {
    pub ordinal: u32,
    pub ty: StepKind,
    pub reg: u32,
    pub access: Access,
}

impl fmt::Display for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.ordinal,
            self.ty.type_char(),
            self.reg,
            self.access.token()
        )?;
        match self.access {
            Access::Static { base, index } => write!(f, ",{}+{}", base, index)?,
            Access::Dynamic { base, array_size } => write!(f, ",{}-{}", base, array_size)?,
            _ => {}
        }
        f.write_str(";")
    }
}

impl FromStr for SchemaEntry {
    type Err = SchemaError;

    /// Parses one entry, without its trailing `;`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SchemaError::BadEntry(s.to_string());
        let num = |x: &str| x.parse::<u32>().map_err(|_| bad());
        let pair = |x: &str, sep: char| {
            let (a, b) = x.split_once(sep).ok_or_else(bad)?;
            Ok::<_, SchemaError>((num(a)?, num(b)?))
        };

        let fields: Vec<&str> = s.split(',').collect();
        let (ordinal, ty, reg, token, extra) = match fields.as_slice() {
            [o, t, r, k] => (o, t, r, k, None),
            [o, t, r, k, e] => (o, t, r, k, Some(*e)),
            _ => return Err(bad()),
        };

        let mut ty_chars = ty.chars();
        let ty = match (ty_chars.next(), ty_chars.next()) {
            (Some(c), None) => StepKind::from_type_char(c).ok_or_else(bad)?,
            _ => return Err(bad()),
        };

        let access = match (*token, extra) {
            ("r", None) => Access::Ret,
            ("v", None) => Access::Void,
            ("a", None) => Access::Assign,
            ("s", Some(e)) => {
                let (base, index) = pair(e, '+')?;
                Access::Static { base, index }
            }
            ("d", Some(e)) => {
                let (base, array_size) = pair(e, '-')?;
                Access::Dynamic { base, array_size }
            }
            _ => return Err(bad()),
        };

        Ok(SchemaEntry {
            ordinal: num(*ordinal)?,
            ty,
            reg: num(*reg)?,
            access,
        })
    }
}

/// The schema of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SchemaLine {
    pub first_ordinal: u32,
    pub entries: Vec<SchemaEntry>,
}

impl SchemaLine {
    pub fn new(first_ordinal: u32) -> Self {
        Self {
            first_ordinal,
            entries: vec![],
        }
    }

    pub fn push(&mut self, entry: SchemaEntry) {
        self.entries.push(entry);
    }

    /// Number of step records the block writes.
    pub fn record_count(&self) -> usize {
        self.entries.iter().filter(|e| e.access.writes_record()).count()
    }
}

impl fmt::Display for SchemaLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block#{}:", self.first_ordinal)?;
        for e in &self.entries {
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl FromStr for SchemaLine {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SchemaError::BadPrefix(s.to_string());
        let (head, body) = s
            .strip_prefix("Block#")
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(bad)?;
        let first_ordinal = head.parse().map_err(|_| bad())?;

        let entries = body
            .split_terminator(';')
            .map(str::parse::<SchemaEntry>)
            .collect::<Result<_, _>>()?;

        Ok(SchemaLine {
            first_ordinal,
            entries,
        })
    }
}

/// Parses a whole schema text, one block per line.
pub fn parse_schema(text: &str) -> Result<Vec<SchemaLine>, SchemaError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().parse())
        .collect()
}

//! The block instrumentation planner.
//!
//! Walks every block of an entry function, decides for each instruction
//! what (if anything) is traced and where the logging code goes, and emits
//! the schema line describing the block's records as it goes. Records and
//! schema entries come from the same decision, so the two cannot disagree.

use crate::config::InstrumentConfig;
use crate::error::InstrumentError;
use crate::ir::{BlockIx, FuncIx, InstIx, Module, Op, ShaderKind, SlotIndex, SystemValue};
use crate::record::{encode_block, encode_step, RecordWrite, Step, TraceOp, ValueOrdinal};
use crate::schema::{Access, SchemaEntry, SchemaLine};
use crate::select::{select_invocation, Selection};
use crate::trace::{BufferLayout, InterestClass, TraceWindow};
use crate::value::{encoding_of, StepKind, ValueType, Widen};
use hashbrown::HashMap;
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

/// Where a piece of logging code is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertPoint {
    After(InstIx),
    /// Phis stay contiguous at the block head, so their logging goes here.
    BeforeFirstNonPhi(BlockIx),
    BeforeTerminator(BlockIx),
}

/// One record to emit at one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub at: InsertPoint,
    pub record: RecordWrite,
    /// The reservation of this record establishes the invocation id.
    pub identity: bool,
}

impl Insertion {
    pub fn ops(&self) -> SmallVec<[TraceOp; 7]> {
        self.record.ops(self.identity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub block: BlockIx,
    pub first_ordinal: u32,
    /// In the order they execute.
    pub insertions: Vec<Insertion>,
    pub schema: SchemaLine,
    /// Trace space the block uses per visit, header included.
    pub bytes: u32,
}

/// Code run once at function entry: the selection test, then a two-way
/// fork that joins with the window constants as phis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prologue {
    pub selection: Selection,
    pub selected: TraceWindow,
    pub unselected: TraceWindow,
}

impl Prologue {
    pub fn window(&self, class: InterestClass) -> TraceWindow {
        match class {
            InterestClass::Selected => self.selected,
            InterestClass::Unselected => self.unselected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPlan {
    pub func: FuncIx,
    pub name: String,
    pub kind: ShaderKind,
    pub prologue: Prologue,
    /// In function block order; the first is the entry block.
    pub blocks: Vec<BlockPlan>,
}

impl FunctionPlan {
    pub fn block(&self, b: BlockIx) -> Option<&BlockPlan> {
        self.blocks.iter().find(|p| p.block == b)
    }

    pub fn required_inputs(&self) -> &[SystemValue] {
        &self.prologue.selection.required_inputs
    }

    pub fn schema_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.blocks.iter().map(|b| b.schema.to_string())
    }
}

/// Per-function planning state. Each function gets its own context, so
/// functions can be planned on separate threads.
pub struct PlanningContext<'m> {
    module: &'m Module,
    layout: BufferLayout,
    func: FuncIx,
    identity_assigned: bool,
}

impl<'m> PlanningContext<'m> {
    pub fn new(module: &'m Module, layout: BufferLayout, func: FuncIx) -> Self {
        Self {
            module,
            layout,
            func,
            identity_assigned: false,
        }
    }

    /// Decides how instruction `ix` is traced. `None` means not at all;
    /// a schema entry without a step means schema only.
    pub fn classify(&self, ix: InstIx) -> Option<(SchemaEntry, Option<Step>)> {
        let inst = self.module.inst(ix);
        let ordinal = inst.ordinal;
        let void = |access| SchemaEntry {
            ordinal,
            ty: StepKind::Void,
            reg: 0,
            access,
        };

        match &inst.op {
            Op::Return => Some((
                SchemaEntry {
                    ordinal,
                    ty: StepKind::Ret,
                    reg: 0,
                    access: Access::Ret,
                },
                Some(Step::Ret),
            )),
            Op::Branch { .. } | Op::SentinelLoad => Some((void(Access::Void), Some(Step::Void))),
            Op::Store { slot, stored } => {
                let (kind, _) = encoding_of(*stored).or_else(|| {
                    debug!(ordinal, ty = ?stored, "store of untraceable type skipped");
                    None
                })?;

                match slot.index {
                    SlotIndex::Static(index) => Some((
                        SchemaEntry {
                            ordinal,
                            ty: kind,
                            reg: slot.base + index,
                            access: Access::Static {
                                base: slot.base,
                                index,
                            },
                        },
                        None,
                    )),
                    SlotIndex::Dynamic(index) => {
                        let array_size = slot.array_size.unwrap_or_else(|| {
                            warn!(ordinal, base = slot.base, "no enclosing array, assuming size 1");
                            1
                        });
                        let widen = match encoding_of(self.module.inst(index).ty) {
                            Some((StepKind::UInt32, w)) => w,
                            _ => Widen::None,
                        };
                        Some((
                            SchemaEntry {
                                ordinal,
                                ty: kind,
                                reg: slot.base,
                                access: Access::Dynamic {
                                    base: slot.base,
                                    array_size,
                                },
                            },
                            Some(Step::Value {
                                kind: StepKind::UInt32,
                                inst: index,
                                widen,
                                ordinal: ValueOrdinal::Dynamic {
                                    base: slot.base,
                                    index,
                                },
                            }),
                        ))
                    }
                }
            }
            Op::Phi | Op::Value => {
                if inst.ty == ValueType::Void {
                    return Some((void(Access::Void), Some(Step::Void)));
                }

                let reg = inst.reg.unwrap_or(0);
                let ordinal_word = ValueOrdinal::Static { base: reg, index: 0 };
                let step = Step::for_value(ix, inst.ty, ordinal_word);
                match step {
                    None => {
                        debug!(ordinal, ty = ?inst.ty, "value of untraceable type skipped");
                        None
                    }
                    Some(Step::Void) => Some((void(Access::Void), Some(Step::Void))),
                    Some(_) if inst.reg.is_none() => {
                        debug!(ordinal, "value without a register skipped");
                        None
                    }
                    Some(step) => Some((
                        SchemaEntry {
                            ordinal,
                            ty: step.kind(),
                            reg,
                            access: Access::Assign,
                        },
                        Some(step),
                    )),
                }
            }
        }
    }

    fn insert_point(&self, ix: InstIx) -> InsertPoint {
        let inst = self.module.inst(ix);
        match inst.op {
            Op::Phi => InsertPoint::BeforeFirstNonPhi(inst.block),
            Op::Branch { .. } | Op::Return => InsertPoint::BeforeTerminator(inst.block),
            _ => InsertPoint::After(ix),
        }
    }

    pub fn plan_block(&mut self, b: BlockIx) -> Result<BlockPlan, InstrumentError> {
        let block = self.module.block(b);
        let mut schema = SchemaLine::new(block.first_ordinal);
        let mut steps: Vec<Insertion> = vec![];
        let mut terminator = None;

        for &ix in &block.insts {
            let (entry, step) = match self.classify(ix) {
                Some(c) => c,
                None => continue,
            };
            schema.push(entry);

            let step = match step {
                Some(s) => s,
                None => continue,
            };
            let insertion = Insertion {
                at: self.insert_point(ix),
                record: encode_step(entry.ordinal, &step),
                identity: false,
            };
            if block.terminator() == Some(ix) {
                terminator = Some(insertion);
            } else {
                steps.push(insertion);
            }
        }

        let step_count = steps.len() + terminator.iter().count();
        let header_count =
            u16::try_from(step_count).map_err(|_| InstrumentError::TooManySteps {
                function: self.module.name(self.func).to_string(),
                block: b,
                steps: step_count,
            })?;
        let header = Insertion {
            at: InsertPoint::BeforeTerminator(b),
            record: encode_block(block.first_ordinal, header_count),
            identity: false,
        };

        let mut insertions = steps;
        insertions.push(header);
        insertions.extend(terminator);

        let bytes: u32 = insertions.iter().map(|i| i.record.bytes()).sum();
        if !self.layout.fits(bytes) {
            return Err(InstrumentError::StaticOverflow {
                function: self.module.name(self.func).to_string(),
                block: b,
                bytes,
                limit: self.layout.overflow_threshold(),
            });
        }

        if !self.identity_assigned {
            insertions[0].identity = true;
            self.identity_assigned = true;
        }

        debug!(block = b, bytes, steps = step_count, "planned block");
        Ok(BlockPlan {
            block: b,
            first_ordinal: block.first_ordinal,
            insertions,
            schema,
            bytes,
        })
    }
}

/// Plans a single entry function.
pub fn plan_function(
    module: &Module,
    config: &InstrumentConfig,
    func: FuncIx,
) -> Result<FunctionPlan, InstrumentError> {
    let layout = config.layout()?;
    let f = module.func(func);
    let name = module.name(func);
    let kind = f.kind.ok_or_else(|| {
        InstrumentError::MalformedModule(format!("`{}` is not an entry function", name))
    })?;

    let selection = select_invocation(kind, f, &config.target)?;
    let prologue = Prologue {
        selection,
        selected: layout.window(InterestClass::Selected),
        unselected: layout.window(InterestClass::Unselected),
    };

    let mut ctx = PlanningContext::new(module, layout, func);
    let blocks = f
        .blocks
        .iter()
        .map(|b| ctx.plan_block(*b))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        function = name,
        ?kind,
        blocks = blocks.len(),
        requested_inputs = prologue.selection.required_inputs.len(),
        "planned function"
    );

    Ok(FunctionPlan {
        func,
        name: name.to_string(),
        kind,
        prologue,
        blocks,
    })
}

/// An `Instrumenter` plans every requested entry function of a module,
/// one function per worker.
pub struct Instrumenter<'m> {
    module: &'m Module,
    config: InstrumentConfig,
    layout: BufferLayout,
}

impl<'m> Instrumenter<'m> {
    pub fn new(module: &'m Module, config: InstrumentConfig) -> Result<Self, InstrumentError> {
        let layout = config.layout()?;
        Ok(Self {
            module,
            config,
            layout,
        })
    }

    /// Plans every entry function whose kind can be debugged. Callable and
    /// library entries are left alone.
    pub fn run(&self) -> Result<Instrumentation, InstrumentError> {
        let entries: Vec<FuncIx> = self
            .module
            .funcs()
            .filter(|(_, f)| f.kind.map_or(false, ShaderKind::is_debuggable))
            .map(|(ix, _)| ix)
            .collect();
        self.run_for(&entries)
    }

    /// Plans the given functions. Any failure aborts the whole attempt,
    /// including a requested function that cannot be debugged.
    pub fn run_for(&self, funcs: &[FuncIx]) -> Result<Instrumentation, InstrumentError> {
        let plans = funcs
            .par_iter()
            .map(|f| plan_function(self.module, &self.config, *f).map(|p| (*f, p)))
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(Instrumentation {
            layout: self.layout,
            plans,
        })
    }
}

/// The outcome of instrumenting a module: one plan per function, keyed by
/// function.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub layout: BufferLayout,
    pub plans: HashMap<FuncIx, FunctionPlan>,
}

impl Instrumentation {
    pub fn plan(&self, f: FuncIx) -> Option<&FunctionPlan> {
        self.plans.get(&f)
    }

    /// Plans in function order.
    pub fn ordered(&self) -> Vec<&FunctionPlan> {
        let mut v: Vec<&FunctionPlan> = self.plans.values().collect();
        v.sort_by_key(|p| p.func);
        v
    }

    /// The schema of every planned function, one line per block.
    pub fn schema_text(&self) -> String {
        let mut out = String::new();
        for p in self.ordered() {
            for line in p.schema_lines() {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

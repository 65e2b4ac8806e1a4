use crate::error::ExecError;
use crate::ir::{BlockIx, InstIx, Module};
use crate::plan::FunctionPlan;
use crate::record::{pack_value_ordinal, TraceOp, ValuePart, Word};
use crate::select::{InputValue, SystemInput};
use crate::trace::{InterestClass, TraceBuffer, TraceWindow};
use crate::value::widen_bits;
use hashbrown::HashMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

/// Everything needed to replay one invocation: its system inputs, the
/// blocks it passes through, and the raw bits of the values it computes.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub inputs: HashMap<SystemInput, InputValue>,
    pub path: Vec<BlockIx>,
    /// Values missing here read as zero.
    pub values: HashMap<InstIx, u64>,
}

impl Invocation {
    pub fn new(path: Vec<BlockIx>) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: SystemInput, value: InputValue) -> Self {
        self.inputs.insert(input, value);
        self
    }

    pub fn with_value(mut self, inst: InstIx, bits: u64) -> Self {
        self.values.insert(inst, bits);
        self
    }

    fn bits(&self, inst: InstIx) -> u64 {
        self.values.get(&inst).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub id: u32,
    pub class: InterestClass,
    pub records: usize,
    pub bytes: u32,
}

/// A `Runner` replays planned functions the way the instrumented program
/// would run them, writing into a shared `TraceBuffer`.
pub struct Runner<'a> {
    module: &'a Module,
    plan: &'a FunctionPlan,
}

impl<'a> Runner<'a> {
    pub fn new(module: &'a Module, plan: &'a FunctionPlan) -> Self {
        Self { module, plan }
    }

    /// Runs one invocation to completion.
    pub fn run(&self, inv: &Invocation, buf: &TraceBuffer) -> Result<Outcome, ExecError> {
        let mut env = self.env(inv)?;
        while env.step(buf)? {}
        env.outcome()
    }

    /// Runs all invocations concurrently.
    pub fn run_all(
        &self,
        invs: &[Invocation],
        buf: &TraceBuffer,
    ) -> Result<Vec<Outcome>, ExecError> {
        invs.par_iter().map(|inv| self.run(inv, buf)).collect()
    }

    /// Runs all invocations on one thread, interleaving them one operation
    /// at a time in an order drawn from `seed`.
    pub fn run_interleaved(
        &self,
        invs: &[Invocation],
        buf: &TraceBuffer,
        seed: u64,
    ) -> Result<Vec<Outcome>, ExecError> {
        let mut envs = invs
            .iter()
            .map(|inv| self.env(inv))
            .collect::<Result<Vec<_>, _>>()?;
        let mut live: Vec<usize> = (0..envs.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        while !live.is_empty() {
            let k = rng.gen_range(0..live.len());
            if !envs[live[k]].step(buf)? {
                live.swap_remove(k);
            }
        }

        envs.iter().map(ExecEnv::outcome).collect()
    }

    fn check_path(&self, path: &[BlockIx]) -> Result<(), ExecError> {
        let entry = self.module.func(self.plan.func).entry();
        match path.first() {
            None => return Err(ExecError::EmptyPath),
            Some(b) if Some(*b) != entry => return Err(ExecError::NotEntry(*b)),
            _ => {}
        }

        for w in path.windows(2) {
            if !self.module.block(w[0]).succs.contains(&w[1]) {
                return Err(ExecError::InvalidEdge {
                    from: w[0],
                    to: w[1],
                });
            }
        }
        Ok(())
    }

    fn env<'i>(&self, inv: &'i Invocation) -> Result<ExecEnv<'i>, ExecError> {
        self.check_path(&inv.path)?;

        let mut ops = vec![];
        for b in &inv.path {
            let bp = self.plan.block(*b).ok_or(ExecError::UnplannedBlock(*b))?;
            for ins in &bp.insertions {
                ops.extend(ins.ops());
            }
        }

        let selection = &self.plan.prologue.selection;
        let class = InterestClass::of(selection.evaluate(|i| inv.inputs.get(&i).copied()));

        Ok(ExecEnv {
            inv,
            ops,
            pc: 0,
            class,
            window: self.plan.prologue.window(class),
            id: None,
            cursor: 0,
            records: 0,
            bytes: 0,
        })
    }
}

/// An `ExecEnv` is the state of one running invocation.
struct ExecEnv<'i> {
    inv: &'i Invocation,
    ops: Vec<TraceOp>,
    pc: usize,
    class: InterestClass,
    window: TraceWindow,
    id: Option<u32>,
    cursor: u32,
    records: usize,
    bytes: u32,
}

impl<'i> ExecEnv<'i> {
    /// Executes the next operation. Returns false once there is none left.
    fn step(&mut self, buf: &TraceBuffer) -> Result<bool, ExecError> {
        let op = match self.ops.get(self.pc) {
            Some(op) => *op,
            None => return Ok(false),
        };

        match op {
            TraceOp::Reserve { bytes, identity } => {
                let r = buf.reserve(&self.window, bytes);
                if identity && self.id.is_none() {
                    self.id = Some(r.raw);
                }
                self.cursor = r.cursor;
                self.records += 1;
                self.bytes += bytes;
            }
            TraceOp::Store(word) => {
                let v = self.eval(word)?;
                buf.store(self.cursor, v);
                self.cursor = self.cursor.wrapping_add(4);
            }
        }

        self.pc += 1;
        Ok(true)
    }

    fn eval(&self, word: Word) -> Result<u32, ExecError> {
        Ok(match word {
            Word::Const(c) => c,
            Word::InvocationId => self.id.ok_or(ExecError::NoIdentity)?,
            Word::Value { inst, part } => {
                let bits = self.inv.bits(inst);
                match part {
                    ValuePart::Whole(w) => widen_bits(bits, w),
                    ValuePart::Low | ValuePart::DoubleLow => bits as u32,
                    ValuePart::High | ValuePart::DoubleHigh => (bits >> 32) as u32,
                }
            }
            Word::DynamicOrdinal { base, index } => {
                pack_value_ordinal(base, self.inv.bits(index) as u32)
            }
        })
    }

    fn outcome(&self) -> Result<Outcome, ExecError> {
        Ok(Outcome {
            id: self.id.ok_or(ExecError::NoIdentity)?,
            class: self.class,
            records: self.records,
            bytes: self.bytes,
        })
    }
}

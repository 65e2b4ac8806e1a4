use crate::error::InstrumentError;
use crate::value::ValueType;
use hashbrown::HashSet;
use lasso::{Rodeo, RodeoReader, Spur};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// An index to access an `Instruction` in a `Module`.
pub type InstIx = usize;
/// An index to access a `Block` in a `Module`.
pub type BlockIx = usize;
/// An index to access a `Function` in a `Module`.
pub type FuncIx = usize;

/// The pipeline stage (or work-graph node) a function is the entry of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShaderKind {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
    Mesh,
    Amplification,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
    Node,
    Library,
}

impl ShaderKind {
    /// Whether an invocation of this kind can be singled out for debugging.
    /// Callers filter on this before planning.
    pub fn is_debuggable(self) -> bool {
        !matches!(self, ShaderKind::Callable | ShaderKind::Library)
    }
}

/// Signature elements the selector may need in a function's declared inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemValue {
    Position,
    VertexId,
    InstanceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotIndex {
    /// Compile-time offset into the local's storage.
    Static(u32),
    /// Offset computed at runtime by the given instruction.
    Dynamic(InstIx),
}

/// A write target inside a mutable local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// First virtual register covered by the local.
    pub base: u32,
    pub index: SlotIndex,
    /// Element count of the enclosing local array, if one was found.
    #[serde(default)]
    pub array_size: Option<u32>,
}

/// What an instruction does, as far as the planner distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    Phi,
    /// Any other instruction; produces a value unless its type is `Void`.
    Value,
    Store {
        slot: Slot,
        stored: ValueType,
    },
    /// Load through the debug sentinel address. Only a step marker.
    SentinelLoad,
    Branch {
        #[serde(default)]
        targets: SmallVec<[BlockIx; 2]>,
    },
    Return,
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Branch { .. } | Op::Return)
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Op::Phi)
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub ordinal: u32,
    pub block: BlockIx,
    pub ty: ValueType,
    /// Virtual register the value is numbered as, if any.
    pub reg: Option<u32>,
    pub op: Op,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub func: FuncIx,
    pub insts: Vec<InstIx>,
    pub first_ordinal: u32,
    pub succs: SmallVec<[BlockIx; 2]>,
}

impl Block {
    pub fn terminator(&self) -> Option<InstIx> {
        self.insts.last().copied()
    }

    /// Position of the first instruction that is not a phi.
    pub fn first_non_phi(&self, module: &Module) -> usize {
        self.insts
            .iter()
            .position(|i| !module.inst(*i).op.is_phi())
            .unwrap_or(self.insts.len())
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Spur,
    pub kind: Option<ShaderKind>,
    pub blocks: Vec<BlockIx>,
    pub inputs: HashSet<SystemValue>,
    /// Instances the geometry stage emits per primitive.
    pub gs_instances: u32,
}

impl Function {
    pub fn entry(&self) -> Option<BlockIx> {
        self.blocks.first().copied()
    }

    pub fn declares(&self, v: SystemValue) -> bool {
        self.inputs.contains(&v)
    }
}

/// A `Module` holds the read-only program the planner walks: functions,
/// blocks and instructions are allocated in contiguous vectors and refer to
/// each other by index, and function names sit in a frozen interner so the
/// module can be shared between planning threads.
#[derive(Debug)]
pub struct Module {
    funcs: Vec<Function>,
    blocks: Vec<Block>,
    insts: Vec<Instruction>,
    strs: RodeoReader<Spur>,
}

impl Module {
    pub fn func(&self, f: FuncIx) -> &Function {
        &self.funcs[f]
    }

    pub fn block(&self, b: BlockIx) -> &Block {
        &self.blocks[b]
    }

    pub fn inst(&self, i: InstIx) -> &Instruction {
        &self.insts[i]
    }

    pub fn funcs(&self) -> impl Iterator<Item = (FuncIx, &Function)> {
        self.funcs.iter().enumerate()
    }

    pub fn name(&self, f: FuncIx) -> &str {
        self.strs.resolve(&self.funcs[f].name)
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncIx> {
        let spur = self.strs.get(name)?;
        self.funcs.iter().position(|f| f.name == spur)
    }

    /// Loads a module from its JSON description.
    ///
    /// Branch targets in the description are block positions within their
    /// function; dynamic slot indices are positions in the flat list of all
    /// instructions of the description.
    pub fn from_json(s: &str) -> Result<Self, InstrumentError> {
        let desc: ModuleDesc = serde_json::from_str(s)
            .map_err(|e| InstrumentError::MalformedModule(e.to_string()))?;
        Self::from_desc(desc)
    }

    pub fn from_desc(desc: ModuleDesc) -> Result<Self, InstrumentError> {
        let mut b = ModuleBuilder::new();

        for fdesc in desc.functions {
            let f = b.function(&fdesc.name, fdesc.kind);
            for v in fdesc.inputs {
                b.declare_input(f, v);
            }
            b.set_gs_instances(f, fdesc.gs_instances);

            let blocks: Vec<BlockIx> = fdesc.blocks.iter().map(|_| b.block(f)).collect();
            for (bdesc, block) in fdesc.blocks.into_iter().zip(blocks.iter()) {
                for idesc in bdesc.insts {
                    let op = match idesc.op {
                        Op::Branch { targets } => Op::Branch {
                            targets: targets
                                .into_iter()
                                .map(|t| {
                                    blocks.get(t).copied().ok_or_else(|| {
                                        InstrumentError::MalformedModule(format!(
                                            "branch to block {} of `{}`, which has {} blocks",
                                            t,
                                            fdesc.name,
                                            blocks.len()
                                        ))
                                    })
                                })
                                .collect::<Result<_, _>>()?,
                        },
                        op => op,
                    };
                    b.push(*block, op, idesc.ty, idesc.reg);
                }
            }
        }

        b.build()
    }
}

/// JSON form of a `Module`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDesc {
    pub functions: Vec<FunctionDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDesc {
    pub name: String,
    #[serde(default)]
    pub kind: Option<ShaderKind>,
    #[serde(default)]
    pub inputs: Vec<SystemValue>,
    #[serde(default = "one")]
    pub gs_instances: u32,
    pub blocks: Vec<BlockDesc>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDesc {
    pub insts: Vec<InstDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstDesc {
    pub op: Op,
    #[serde(default)]
    pub ty: ValueType,
    #[serde(default)]
    pub reg: Option<u32>,
}

/// Builds a `Module`, numbering instructions with module-wide ordinals in
/// the order they are pushed.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    funcs: Vec<Function>,
    blocks: Vec<Block>,
    insts: Vec<Instruction>,
    strs: Rodeo<Spur>,
    next_ordinal: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&mut self, name: &str, kind: Option<ShaderKind>) -> FuncIx {
        let name = self.strs.get_or_intern(name);
        self.funcs.push(Function {
            name,
            kind,
            blocks: vec![],
            inputs: HashSet::new(),
            gs_instances: 1,
        });
        self.funcs.len() - 1
    }

    pub fn declare_input(&mut self, f: FuncIx, v: SystemValue) {
        self.funcs[f].inputs.insert(v);
    }

    pub fn set_gs_instances(&mut self, f: FuncIx, n: u32) {
        self.funcs[f].gs_instances = n;
    }

    pub fn block(&mut self, f: FuncIx) -> BlockIx {
        self.blocks.push(Block {
            func: f,
            insts: vec![],
            first_ordinal: 0,
            succs: SmallVec::new(),
        });
        let b = self.blocks.len() - 1;
        self.funcs[f].blocks.push(b);
        b
    }

    pub fn push(&mut self, block: BlockIx, op: Op, ty: ValueType, reg: Option<u32>) -> InstIx {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        if let Op::Branch { targets } = &op {
            self.blocks[block].succs.extend(targets.iter().copied());
        }

        self.insts.push(Instruction {
            ordinal,
            block,
            ty,
            reg,
            op,
        });
        let ix = self.insts.len() - 1;

        let b = &mut self.blocks[block];
        if b.insts.is_empty() {
            b.first_ordinal = ordinal;
        }
        b.insts.push(ix);
        ix
    }

    pub fn value(&mut self, block: BlockIx, ty: ValueType, reg: Option<u32>) -> InstIx {
        self.push(block, Op::Value, ty, reg)
    }

    pub fn phi(&mut self, block: BlockIx, ty: ValueType, reg: u32) -> InstIx {
        self.push(block, Op::Phi, ty, Some(reg))
    }

    pub fn store(&mut self, block: BlockIx, slot: Slot, stored: ValueType) -> InstIx {
        self.push(block, Op::Store { slot, stored }, ValueType::Void, None)
    }

    pub fn sentinel_load(&mut self, block: BlockIx) -> InstIx {
        self.push(block, Op::SentinelLoad, ValueType::Int(32), None)
    }

    pub fn branch(&mut self, block: BlockIx, targets: &[BlockIx]) -> InstIx {
        let op = Op::Branch {
            targets: targets.iter().copied().collect(),
        };
        self.push(block, op, ValueType::Void, None)
    }

    pub fn ret(&mut self, block: BlockIx) -> InstIx {
        self.push(block, Op::Return, ValueType::Void, None)
    }

    /// Checks the structural rules the planner relies on and freezes the
    /// module.
    pub fn build(self) -> Result<Module, InstrumentError> {
        let bad = |msg: String| Err(InstrumentError::MalformedModule(msg));

        for f in &self.funcs {
            let name = self.strs.resolve(&f.name);
            if f.blocks.is_empty() {
                return bad(format!("function `{}` has no blocks", name));
            }

            for &b in &f.blocks {
                let block = &self.blocks[b];
                let last = match block.insts.last() {
                    Some(l) => *l,
                    None => return bad(format!("block {} of `{}` is empty", b, name)),
                };
                if !self.insts[last].op.is_terminator() {
                    return bad(format!("block {} of `{}` has no terminator", b, name));
                }

                let mut seen_non_phi = false;
                for &i in &block.insts {
                    let inst = &self.insts[i];
                    if i != last && inst.op.is_terminator() {
                        return bad(format!(
                            "instruction {} terminates block {} early",
                            inst.ordinal, b
                        ));
                    }
                    if inst.op.is_phi() && seen_non_phi {
                        return bad(format!(
                            "phi {} follows a non-phi instruction in block {}",
                            inst.ordinal, b
                        ));
                    }
                    seen_non_phi |= !inst.op.is_phi();

                    if let Op::Store {
                        slot:
                            Slot {
                                index: SlotIndex::Dynamic(ix),
                                ..
                            },
                        ..
                    } = inst.op
                    {
                        if !self.insts.get(ix).map_or(false, |x| x.ty.is_int()) {
                            return bad(format!(
                                "store {} is indexed by {}, which is not an integer instruction",
                                inst.ordinal, ix
                            ));
                        }
                    }
                }

                if let Some(s) = block.succs.iter().find(|s| {
                    self.blocks.get(**s).map_or(true, |t| t.func != block.func)
                }) {
                    return bad(format!(
                        "block {} of `{}` branches to foreign block {}",
                        b, name, s
                    ));
                }
            }
        }

        Ok(Module {
            funcs: self.funcs,
            blocks: self.blocks,
            insts: self.insts,
            strs: self.strs.into_reader(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_are_module_wide() {
        let mut b = ModuleBuilder::new();
        let f = b.function("main", Some(ShaderKind::Compute));
        let b0 = b.block(f);
        let b1 = b.block(f);
        b.value(b0, ValueType::Int(32), Some(0));
        b.branch(b0, &[b1]);
        b.ret(b1);
        let m = b.build().unwrap();

        assert_eq!(m.block(b0).first_ordinal, 0);
        assert_eq!(m.block(b1).first_ordinal, 2);
        assert_eq!(m.block(b0).succs.as_slice(), &[b1]);
        assert_eq!(m.name(f), "main");
        assert_eq!(m.func_by_name("main"), Some(f));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut b = ModuleBuilder::new();
        let f = b.function("main", None);
        let b0 = b.block(f);
        b.value(b0, ValueType::Float, Some(0));
        assert!(matches!(b.build(), Err(InstrumentError::MalformedModule(_))));
    }

    #[test]
    fn rejects_late_phi() {
        let mut b = ModuleBuilder::new();
        let f = b.function("main", None);
        let b0 = b.block(f);
        b.value(b0, ValueType::Float, Some(0));
        b.phi(b0, ValueType::Float, 1);
        b.ret(b0);
        assert!(matches!(b.build(), Err(InstrumentError::MalformedModule(_))));
    }

    #[test]
    fn rejects_non_integer_dynamic_index() {
        let mut b = ModuleBuilder::new();
        let f = b.function("main", None);
        let b0 = b.block(f);
        let x = b.value(b0, ValueType::Float, Some(0));
        let slot = Slot {
            base: 4,
            index: SlotIndex::Dynamic(x),
            array_size: Some(2),
        };
        b.store(b0, slot, ValueType::Float);
        b.ret(b0);
        assert!(matches!(b.build(), Err(InstrumentError::MalformedModule(_))));
    }

    #[test]
    fn loads_json_description() {
        let json = r#"{
            "functions": [{
                "name": "main",
                "kind": "pixel",
                "inputs": ["position"],
                "blocks": [
                    { "insts": [
                        { "op": "value", "ty": { "int": 32 }, "reg": 3 },
                        { "op": { "branch": { "targets": [1] } } }
                    ] },
                    { "insts": [
                        { "op": { "store": {
                            "slot": { "base": 8, "index": { "dynamic": 0 }, "array_size": 4 },
                            "stored": "float"
                        } } },
                        { "op": "return" }
                    ] }
                ]
            }]
        }"#;
        let m = Module::from_json(json).unwrap();
        let f = m.func(0);

        assert_eq!(f.kind, Some(ShaderKind::Pixel));
        assert!(f.declares(SystemValue::Position));
        assert_eq!(f.gs_instances, 1);
        assert_eq!(m.block(f.blocks[0]).succs.as_slice(), &[f.blocks[1]]);
        assert_eq!(m.inst(0).ty, ValueType::Int(32));
        assert_eq!(m.block(f.blocks[1]).first_ordinal, 2);
    }

    #[test]
    fn json_branch_out_of_range() {
        let json = r#"{"functions": [{"name": "f", "blocks": [
            {"insts": [{"op": {"branch": {"targets": [7]}}}]}
        ]}]}"#;
        assert!(matches!(
            Module::from_json(json),
            Err(InstrumentError::MalformedModule(_))
        ));
    }
}

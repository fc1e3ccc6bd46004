//! Target functions: typed basic blocks of instructions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{FnSig, LirType};

/// Index of an instruction within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

/// Index of a basic block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// An operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Result of an instruction.
    Inst(InstId),
    /// Function parameter.
    Param(u32),
    /// Integer literal.
    Int {
        /// The value.
        value: i64,
        /// Bit width.
        bits: u32,
    },
    /// Float literal.
    Float(f64),
    /// Null pointer.
    Null,
    /// Address of a named function.
    Symbol(String),
}

impl Value {
    /// A 64-bit integer literal.
    pub fn i64(value: i64) -> Self {
        Value::Int { value, bits: 64 }
    }

    /// A 32-bit integer literal.
    pub fn i32(value: i32) -> Self {
        Value::Int {
            value: i64::from(value),
            bits: 32,
        }
    }

    /// Address of a named function.
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// Integer literal value, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Inst(id) => write!(f, "%{}", id.0),
            Value::Param(i) => write!(f, "%arg{i}"),
            Value::Int { value, .. } => write!(f, "{value}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Null => write!(f, "null"),
            Value::Symbol(name) => write!(f, "@{name}"),
        }
    }
}

/// Call target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    /// A named function.
    Direct(String),
    /// A function pointer value.
    Indirect(Value),
}

/// Instruction kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    /// Function call.
    Call {
        /// Call target.
        callee: Callee,
        /// Arguments.
        args: Vec<Value>,
    },
    /// Stack allocation of one value of type `ty`.
    Alloca {
        /// Allocated type.
        ty: LirType,
    },
    /// Load through a pointer; the loaded type is the instruction type.
    Load {
        /// Address.
        ptr: Value,
    },
    /// Store through a pointer.
    Store {
        /// Stored value.
        value: Value,
        /// Address.
        ptr: Value,
    },
    /// Address of field `index` of the struct at `ptr`.
    FieldPtr {
        /// Struct type at `ptr`.
        aggregate: LirType,
        /// Base address.
        ptr: Value,
        /// Field index.
        index: u32,
    },
    /// Struct value built from its fields.
    Aggregate {
        /// Field values in order.
        fields: Vec<Value>,
    },
    /// Field `index` of a struct value.
    ExtractValue {
        /// Struct value.
        aggregate: Value,
        /// Field index.
        index: u32,
    },
    /// `value == null`.
    IsNull {
        /// Pointer value.
        value: Value,
    },
    /// Float negation.
    FNeg {
        /// Operand.
        value: Value,
    },
    /// Value merge keyed by predecessor block.
    Phi {
        /// `(value, predecessor)` pairs.
        incoming: Vec<(Value, BlockId)>,
    },
}

/// An instruction and its result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    /// What the instruction does.
    pub kind: InstKind,
    /// Result type, `void` when there is none.
    pub ty: LirType,
}

/// Block terminators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional branch.
    Br(BlockId),
    /// Two-way branch on an `i1`.
    CondBr {
        /// Condition.
        cond: Value,
        /// Successor when true.
        then_block: BlockId,
        /// Successor when false.
        else_block: BlockId,
    },
    /// Return.
    Ret(Option<Value>),
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Label, unique within the function.
    pub label: String,
    /// Instructions in order.
    pub insts: Vec<InstId>,
    /// Terminator, once the block is closed.
    pub terminator: Option<Terminator>,
}

/// A function in the target representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirFunction {
    /// Symbol name.
    pub name: String,
    /// Signature.
    pub sig: FnSig,
    /// Basic blocks; the first is the entry.
    pub blocks: Vec<Block>,
    /// Instruction arena.
    pub insts: Vec<Inst>,
}

impl LirFunction {
    /// Get an instruction.
    #[inline]
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    /// Get a block.
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Find a block by label.
    pub fn block_by_label(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .and_then(|i| u32::try_from(i).ok())
            .map(BlockId)
    }

    /// Type of an operand.
    pub fn value_type(&self, value: &Value) -> LirType {
        match value {
            Value::Inst(id) => self.inst(*id).ty.clone(),
            Value::Param(i) => self
                .sig
                .params
                .get(*i as usize)
                .cloned()
                .unwrap_or(LirType::Void),
            Value::Int { bits, .. } => LirType::Int(*bits),
            Value::Float(_) => LirType::F64,
            Value::Null | Value::Symbol(_) => LirType::Ptr,
        }
    }

    /// Instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Inst)> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .map(|&id| (id, self.inst(id)))
    }

    /// Arguments of every direct call to `callee`, in block order.
    pub fn calls_to<'a>(&'a self, callee: &'a str) -> impl Iterator<Item = &'a [Value]> + 'a {
        self.instructions().filter_map(move |(_, inst)| match &inst.kind {
            InstKind::Call {
                callee: Callee::Direct(name),
                args,
            } if name == callee => Some(args.as_slice()),
            _ => None,
        })
    }

    /// Names of directly called functions, in block order.
    pub fn direct_callees(&self) -> Vec<&str> {
        self.instructions()
            .filter_map(|(_, inst)| match &inst.kind {
                InstKind::Call {
                    callee: Callee::Direct(name),
                    ..
                } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn write_typed(&self, f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
        write!(f, "{} {value}", self.value_type(value))
    }

    fn write_inst(&self, f: &mut fmt::Formatter<'_>, id: InstId, inst: &Inst) -> fmt::Result {
        write!(f, "  ")?;
        if !inst.ty.is_void() && !matches!(inst.kind, InstKind::Store { .. }) {
            write!(f, "%{} = ", id.0)?;
        }
        match &inst.kind {
            InstKind::Call { callee, args } => {
                write!(f, "call {} ", inst.ty)?;
                match callee {
                    Callee::Direct(name) => write!(f, "@{name}(")?,
                    Callee::Indirect(target) => write!(f, "{target}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_typed(f, arg)?;
                }
                write!(f, ")")
            }
            InstKind::Alloca { ty } => write!(f, "alloca {ty}"),
            InstKind::Load { ptr } => write!(f, "load {}, ptr {ptr}", inst.ty),
            InstKind::Store { value, ptr } => {
                write!(f, "store ")?;
                self.write_typed(f, value)?;
                write!(f, ", ptr {ptr}")
            }
            InstKind::FieldPtr {
                aggregate,
                ptr,
                index,
            } => write!(f, "getelementptr {aggregate}, ptr {ptr}, i32 0, i32 {index}"),
            InstKind::Aggregate { fields } => {
                write!(f, "aggregate {} [", inst.ty)?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.write_typed(f, field)?;
                }
                write!(f, "]")
            }
            InstKind::ExtractValue { aggregate, index } => {
                write!(f, "extractvalue ")?;
                self.write_typed(f, aggregate)?;
                write!(f, ", {index}")
            }
            InstKind::IsNull { value } => write!(f, "icmp eq ptr {value}, null"),
            InstKind::FNeg { value } => write!(f, "fneg double {value}"),
            InstKind::Phi { incoming } => {
                write!(f, "phi {} ", inst.ty)?;
                for (i, (value, block)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {value}, %{} ]", self.block(*block).label)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for LirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.sig.ret, self.name)?;
        for (i, param) in self.sig.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param} %arg{i}")?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for &id in &block.insts {
                self.write_inst(f, id, self.inst(id))?;
                writeln!(f)?;
            }
            match &block.terminator {
                Some(Terminator::Br(target)) => {
                    writeln!(f, "  br label %{}", self.block(*target).label)?;
                }
                Some(Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                }) => writeln!(
                    f,
                    "  br i1 {cond}, label %{}, label %{}",
                    self.block(*then_block).label,
                    self.block(*else_block).label
                )?,
                Some(Terminator::Ret(Some(value))) => {
                    write!(f, "  ret ")?;
                    self.write_typed(f, value)?;
                    writeln!(f)?;
                }
                Some(Terminator::Ret(None)) => writeln!(f, "  ret void")?,
                None => writeln!(f, "  <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

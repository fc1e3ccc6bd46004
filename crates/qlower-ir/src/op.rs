//! Operations of the quantum kernel IR.

use serde::{Deserialize, Serialize};

use crate::gate::GateKind;
use crate::types::Type;

/// An index or bound that is either an attribute constant or an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Index {
    /// Compile-time constant carried on the operation itself.
    Const(u64),
    /// The value is the next operand of the operation.
    Operand,
}

impl Index {
    /// Check if this index occupies an operand slot.
    #[inline]
    pub fn is_operand(&self) -> bool {
        matches!(self, Index::Operand)
    }
}

/// The function value a callable is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    /// A named function known at compile time.
    Symbol(String),
    /// A function pointer computed at runtime (operand 0).
    Value,
}

/// The kind of operation.
///
/// Operand layouts are documented per variant. Operands are edges in the
/// function's use-def graph, not fields of the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Function parameter. No operands.
    Argument {
        /// Parameter position.
        index: u32,
    },
    /// Integer constant. No operands.
    Constant {
        /// The value.
        value: i64,
    },
    /// Float constant. No operands.
    ConstantFloat {
        /// The value.
        value: f64,
    },
    /// Allocate a qubit or qubit vector.
    ///
    /// Operands: `[size]` for a vector of unspecified size, otherwise none.
    Alloca,
    /// Initialize a freshly allocated vector from a state.
    ///
    /// Operands: `[veq, state]`. The result aliases the vector.
    InitializeState,
    /// Release a qubit or qubit vector. Operands: `[ref | veq]`.
    Dealloc,
    /// Project one qubit out of a vector.
    ///
    /// Operands: `[veq]`, followed by `[index]` if the index is an operand.
    ExtractRef {
        /// The index.
        index: Index,
    },
    /// Project the inclusive range `[lower, upper]` out of a vector.
    ///
    /// Operands: `[veq]`, then `[lower]` and `[upper]` for each bound that
    /// is an operand, in that order.
    SubVeq {
        /// Lower bound.
        lower: Index,
        /// Upper bound (inclusive).
        upper: Index,
    },
    /// Runtime size of a vector. Operands: `[veq]`.
    VeqSize,
    /// Apply a gate.
    ///
    /// Operands: rotation parameters, then controls (each a `ref` or a
    /// `veq`), then targets.
    Gate {
        /// The gate.
        gate: GateKind,
        /// Apply the adjoint.
        adjoint: bool,
        /// Number of rotation parameter operands.
        num_params: u32,
        /// Number of control operands.
        num_controls: u32,
        /// Number of target operands.
        num_targets: u32,
    },
    /// Measure in the Z basis. Operands: `[ref]`.
    Measure,
    /// Reset to |0⟩. Operands: `[ref]`.
    Reset,
    /// Build a callable, binding the operands as its capture payload.
    ///
    /// Operands: `[fn_ptr]` if the callee is a [`Callee::Value`], then
    /// the captured values in order.
    Instantiate {
        /// The function the callable invokes.
        callee: Callee,
    },
    /// Invoke a callable. Operands: `[callable, args...]`.
    CallCallable,
    /// Stack slot holding one value of the given type. No operands.
    StackSlot {
        /// Type of the stored value.
        ty: Type,
    },
    /// Load from a slot. Operands: `[slot]`.
    Load,
    /// Store to a slot. Operands: `[value, slot]`.
    Store,
    /// Direct call to a named function. Operands: the arguments.
    Call {
        /// Name of the called function or external declaration.
        callee: String,
    },
    /// Return from the function. Operands: `[value]` or none.
    Return,
}

impl OpKind {
    /// Get the mnemonic of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Argument { .. } => "arg",
            OpKind::Constant { .. } => "constant",
            OpKind::ConstantFloat { .. } => "constant_f64",
            OpKind::Alloca => "alloca",
            OpKind::InitializeState => "init_state",
            OpKind::Dealloc => "dealloc",
            OpKind::ExtractRef { .. } => "extract_ref",
            OpKind::SubVeq { .. } => "subveq",
            OpKind::VeqSize => "veq_size",
            OpKind::Gate { .. } => "gate",
            OpKind::Measure => "mz",
            OpKind::Reset => "reset",
            OpKind::Instantiate { .. } => "instantiate",
            OpKind::CallCallable => "call_callable",
            OpKind::StackSlot { .. } => "stack_slot",
            OpKind::Load => "load",
            OpKind::Store => "store",
            OpKind::Call { .. } => "call",
            OpKind::Return => "return",
        }
    }

    /// Check if this is an allocation.
    #[inline]
    pub fn is_alloca(&self) -> bool {
        matches!(self, OpKind::Alloca)
    }

    /// Check if this is a deallocation.
    #[inline]
    pub fn is_dealloc(&self) -> bool {
        matches!(self, OpKind::Dealloc)
    }

    /// Operand slot of the dynamic index of an `ExtractRef`.
    pub fn extract_index_slot(&self) -> Option<u32> {
        match self {
            OpKind::ExtractRef {
                index: Index::Operand,
            } => Some(1),
            _ => None,
        }
    }

    /// Operand slots of the dynamic bounds of a `SubVeq`.
    ///
    /// Returns `(lower_slot, upper_slot)`; a slot is `None` when the bound
    /// is an attribute constant.
    pub fn subveq_bound_slots(&self) -> (Option<u32>, Option<u32>) {
        match self {
            OpKind::SubVeq { lower, upper } => {
                let lower_slot = lower.is_operand().then_some(1);
                let upper_slot = upper
                    .is_operand()
                    .then_some(if lower.is_operand() { 2 } else { 1 });
                (lower_slot, upper_slot)
            }
            _ => (None, None),
        }
    }
}

/// An operation together with its result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The kind of operation.
    pub kind: OpKind,
    /// Type of the single result, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Type>,
}

impl Operation {
    /// Create an operation.
    pub fn new(kind: OpKind, result: Option<Type>) -> Self {
        Self { kind, result }
    }

    /// Create an operation without a result.
    pub fn effect(kind: OpKind) -> Self {
        Self { kind, result: None }
    }

    /// Get the mnemonic of this operation.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Result type, if the operation produces a value.
    #[inline]
    pub fn result_type(&self) -> Option<&Type> {
        self.result.as_ref()
    }

    /// Check if this op allocates a vector of compile-time size.
    pub fn is_sized_veq_alloca(&self) -> bool {
        self.kind.is_alloca() && self.result.as_ref().and_then(Type::veq_size).is_some()
    }
}

//! High-level kernel builder API.

use crate::error::IrResult;
use crate::function::{Function, OpId};
use crate::gate::GateKind;
use crate::op::{Callee, Index, OpKind, Operation};
use crate::types::{Signature, Type};

/// Builds a function body op by op in program order.
///
/// This is the convenient front door for front-ends and tests; every
/// method appends to the end of the body and returns the new op's id.
pub struct KernelBuilder {
    /// The function under construction.
    function: Function,
}

impl KernelBuilder {
    /// Start a new function.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            function: Function::new(name, signature),
        }
    }

    /// Operation holding parameter `index`.
    pub fn arg(&self, index: usize) -> Option<OpId> {
        self.function.argument(index)
    }

    /// The function built so far.
    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Finish building.
    pub fn finish(self) -> Function {
        self.function
    }

    fn push(&mut self, kind: OpKind, result: Option<Type>, operands: &[OpId]) -> IrResult<OpId> {
        self.function
            .append(Operation::new(kind, result), operands)
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// 64-bit integer constant.
    pub fn constant(&mut self, value: i64) -> IrResult<OpId> {
        self.push(OpKind::Constant { value }, Some(Type::I64), &[])
    }

    /// Float constant.
    pub fn constant_f64(&mut self, value: f64) -> IrResult<OpId> {
        self.push(OpKind::ConstantFloat { value }, Some(Type::F64), &[])
    }

    // =========================================================================
    // Qubit allocation
    // =========================================================================

    /// Allocate one qubit.
    pub fn alloca_ref(&mut self) -> IrResult<OpId> {
        self.push(OpKind::Alloca, Some(Type::Ref), &[])
    }

    /// Allocate a vector of `size` qubits.
    pub fn alloca_veq(&mut self, size: u64) -> IrResult<OpId> {
        self.push(OpKind::Alloca, Some(Type::veq(size)), &[])
    }

    /// Allocate a vector whose size is the runtime value `size`.
    pub fn alloca_veq_dynamic(&mut self, size: OpId) -> IrResult<OpId> {
        self.push(OpKind::Alloca, Some(Type::veq_dynamic()), &[size])
    }

    /// Initialize a fresh vector from the state pointed to by `state`.
    pub fn init_state(&mut self, veq: OpId, state: OpId) -> IrResult<OpId> {
        let ty = self.function.result_type(veq).cloned();
        self.push(OpKind::InitializeState, ty, &[veq, state])
    }

    /// Release a qubit or vector.
    pub fn dealloc(&mut self, value: OpId) -> IrResult<OpId> {
        self.push(OpKind::Dealloc, None, &[value])
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Extract the qubit at a constant index.
    pub fn extract(&mut self, veq: OpId, index: u64) -> IrResult<OpId> {
        self.push(
            OpKind::ExtractRef {
                index: Index::Const(index),
            },
            Some(Type::Ref),
            &[veq],
        )
    }

    /// Extract the qubit at the index held by `index`.
    pub fn extract_dynamic(&mut self, veq: OpId, index: OpId) -> IrResult<OpId> {
        self.push(
            OpKind::ExtractRef {
                index: Index::Operand,
            },
            Some(Type::Ref),
            &[veq, index],
        )
    }

    /// Slice the inclusive range `[lower, upper]` with constant bounds.
    pub fn subveq(&mut self, veq: OpId, lower: u64, upper: u64) -> IrResult<OpId> {
        let size = upper.checked_sub(lower).map(|d| d + 1);
        self.push(
            OpKind::SubVeq {
                lower: Index::Const(lower),
                upper: Index::Const(upper),
            },
            Some(Type::Veq(size)),
            &[veq],
        )
    }

    /// Slice with bounds held by values.
    pub fn subveq_dynamic(&mut self, veq: OpId, lower: OpId, upper: OpId) -> IrResult<OpId> {
        self.push(
            OpKind::SubVeq {
                lower: Index::Operand,
                upper: Index::Operand,
            },
            Some(Type::veq_dynamic()),
            &[veq, lower, upper],
        )
    }

    /// Runtime size of a vector.
    pub fn veq_size(&mut self, veq: OpId) -> IrResult<OpId> {
        self.push(OpKind::VeqSize, Some(Type::I64), &[veq])
    }

    // =========================================================================
    // Gates and measurement
    // =========================================================================

    /// Apply a gate with rotation parameters, controls and targets.
    pub fn apply(
        &mut self,
        gate: GateKind,
        params: &[OpId],
        controls: &[OpId],
        targets: &[OpId],
    ) -> IrResult<OpId> {
        self.apply_gate(gate, false, params, controls, targets)
    }

    /// Apply the adjoint of a gate.
    pub fn apply_adjoint(
        &mut self,
        gate: GateKind,
        params: &[OpId],
        controls: &[OpId],
        targets: &[OpId],
    ) -> IrResult<OpId> {
        self.apply_gate(gate, true, params, controls, targets)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn apply_gate(
        &mut self,
        gate: GateKind,
        adjoint: bool,
        params: &[OpId],
        controls: &[OpId],
        targets: &[OpId],
    ) -> IrResult<OpId> {
        let operands: Vec<OpId> = params
            .iter()
            .chain(controls)
            .chain(targets)
            .copied()
            .collect();
        self.push(
            OpKind::Gate {
                gate,
                adjoint,
                num_params: params.len() as u32,
                num_controls: controls.len() as u32,
                num_targets: targets.len() as u32,
            },
            None,
            &operands,
        )
    }

    /// Apply Hadamard.
    pub fn h(&mut self, target: OpId) -> IrResult<OpId> {
        self.apply(GateKind::H, &[], &[], &[target])
    }

    /// Apply Pauli-X with optional controls.
    pub fn x(&mut self, controls: &[OpId], target: OpId) -> IrResult<OpId> {
        self.apply(GateKind::X, &[], controls, &[target])
    }

    /// Apply an X rotation by the angle held in `theta`.
    pub fn rx(&mut self, theta: OpId, target: OpId) -> IrResult<OpId> {
        self.apply(GateKind::Rx, &[theta], &[], &[target])
    }

    /// Measure in the Z basis.
    pub fn mz(&mut self, target: OpId) -> IrResult<OpId> {
        self.push(OpKind::Measure, Some(Type::Bool), &[target])
    }

    /// Reset to |0⟩.
    pub fn reset(&mut self, target: OpId) -> IrResult<OpId> {
        self.push(OpKind::Reset, None, &[target])
    }

    // =========================================================================
    // Callables
    // =========================================================================

    /// Build a callable invoking the named function with `captures` bound.
    pub fn instantiate(
        &mut self,
        callee: impl Into<String>,
        captures: &[OpId],
        signature: Signature,
    ) -> IrResult<OpId> {
        self.push(
            OpKind::Instantiate {
                callee: Callee::Symbol(callee.into()),
            },
            Some(Type::callable(signature)),
            captures,
        )
    }

    /// Build a callable from a runtime function pointer.
    pub fn instantiate_value(
        &mut self,
        function: OpId,
        captures: &[OpId],
        signature: Signature,
    ) -> IrResult<OpId> {
        let mut operands = Vec::with_capacity(captures.len() + 1);
        operands.push(function);
        operands.extend_from_slice(captures);
        self.push(
            OpKind::Instantiate {
                callee: Callee::Value,
            },
            Some(Type::callable(signature)),
            &operands,
        )
    }

    /// Invoke a callable.
    pub fn call_callable(&mut self, callable: OpId, args: &[OpId]) -> IrResult<OpId> {
        let result = self
            .function
            .result_type(callable)
            .and_then(Type::as_callable)
            .and_then(|sig| sig.result.clone());
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callable);
        operands.extend_from_slice(args);
        self.push(OpKind::CallCallable, result, &operands)
    }

    // =========================================================================
    // Memory, calls and control
    // =========================================================================

    /// Stack slot for one value of type `ty`.
    pub fn stack_slot(&mut self, ty: Type) -> IrResult<OpId> {
        self.push(OpKind::StackSlot { ty }, Some(Type::Ptr), &[])
    }

    /// Load the value held in `slot`.
    pub fn load(&mut self, slot: OpId) -> IrResult<OpId> {
        let ty = match self.function.op(slot).map(|op| &op.kind) {
            Some(OpKind::StackSlot { ty }) => Some(ty.clone()),
            _ => None,
        };
        self.push(OpKind::Load, ty, &[slot])
    }

    /// Store `value` into `slot`.
    pub fn store(&mut self, value: OpId, slot: OpId) -> IrResult<OpId> {
        self.push(OpKind::Store, None, &[value, slot])
    }

    /// Call a named function.
    pub fn call(
        &mut self,
        callee: impl Into<String>,
        args: &[OpId],
        result: Option<Type>,
    ) -> IrResult<OpId> {
        self.push(
            OpKind::Call {
                callee: callee.into(),
            },
            result,
            args,
        )
    }

    /// Return, optionally with a value.
    pub fn ret(&mut self, value: Option<OpId>) -> IrResult<OpId> {
        let operands: Vec<OpId> = value.into_iter().collect();
        self.push(OpKind::Return, None, &operands)
    }
}

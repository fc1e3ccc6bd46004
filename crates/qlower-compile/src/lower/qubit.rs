//! Qubit runtime mapping.
//!
//! | Operation            | Runtime call                                   |
//! |----------------------|------------------------------------------------|
//! | `alloca veq<N>`      | `qubit_allocate_array(N)`                      |
//! | `alloca ref`         | `qubit_allocate()`                             |
//! | `init_state`         | `qubit_allocate_array_with_state_fp64(N, s)`   |
//! | `extract_ref[i]`     | `array_get_element_ptr_1d(a, i)` (+ load)      |
//! | `subveq[lo..hi]`     | `array_slice(a, 1, lo, 1, hi)`                 |
//! | `veq_size`           | `array_get_size_1d(a)`                         |
//! | `dealloc`            | `qubit_release_array(a)` / `qubit_release(q)`  |
//! | `mz`                 | `mz(q)` then `read_result(r)`                  |
//! | `reset`              | `reset(q)`                                     |

use rustc_hash::FxHashSet;

use qlower_ir::{Function, Index, OpId, OpKind, Type};
use qlower_lir::{ElementAccess, LirType, RuntimeFn, Value};

use crate::error::CompileResult;
use crate::lower::LoweringContext;

/// Allocations consumed by an `init_state`.
///
/// These are not lowered on their own: the runtime allocates and prepares
/// the array in one call, so the `init_state` is their only permitted use.
pub(crate) fn deferred_allocations(function: &Function) -> CompileResult<FxHashSet<OpId>> {
    let mut deferred = FxHashSet::default();
    for (id, op) in function.ops() {
        if !matches!(op.kind, OpKind::InitializeState) {
            continue;
        }
        let Some(veq) = function.operand(id, 0) else {
            continue;
        };
        let is_alloca = function.op(veq).is_some_and(|o| o.kind.is_alloca());
        if !is_alloca || function.users(veq).len() != 1 {
            return Err(crate::error::CompileError::Unlowerable {
                function: function.name().to_string(),
                op: "init_state",
                reason: "state must initialize a fresh allocation with no other uses".into(),
            });
        }
        deferred.insert(veq);
    }
    Ok(deferred)
}

/// Lower one qubit operation.
pub(crate) fn lower(cx: &mut LoweringContext<'_>, id: OpId) -> CompileResult<()> {
    let function = cx.function;
    let op = function.get(id)?;
    let value = match &op.kind {
        OpKind::Alloca => {
            if cx.deferred.contains(&id) {
                return Ok(());
            }
            match &op.result {
                Some(Type::Veq(Some(size))) => {
                    cx.call_runtime(RuntimeFn::QubitAllocateArray, vec![size_value(*size)])?
                }
                Some(Type::Veq(None)) => {
                    let size = cx.operand(id, 0)?;
                    cx.call_runtime(RuntimeFn::QubitAllocateArray, vec![size])?
                }
                _ => cx.call_runtime(RuntimeFn::QubitAllocate, vec![])?,
            }
        }
        OpKind::InitializeState => {
            let veq = function
                .operand(id, 0)
                .ok_or(qlower_ir::IrError::InvalidOperand { op: id, slot: 0 })?;
            let size = match function.result_type(veq).and_then(Type::veq_size) {
                Some(size) => size_value(size),
                None => cx.operand(veq, 0)?,
            };
            let state = cx.operand(id, 1)?;
            let array = cx.call_runtime(RuntimeFn::QubitAllocateArrayWithState, vec![size, state])?;
            cx.values.insert(veq, array.clone());
            array
        }
        OpKind::Dealloc => {
            let target = cx.operand(id, 0)?;
            let releases_array = function
                .operand(id, 0)
                .and_then(|def| function.result_type(def))
                .is_some_and(Type::is_veq);
            let release = if releases_array {
                RuntimeFn::QubitReleaseArray
            } else {
                RuntimeFn::QubitRelease
            };
            cx.call_runtime(release, vec![target])?;
            return Ok(());
        }
        OpKind::ExtractRef { index } => {
            let array = cx.operand(id, 0)?;
            let index = index_value(cx, id, *index, op.kind.extract_index_slot())?;
            let element = cx.call_runtime(RuntimeFn::ArrayGetElementPtr1d, vec![array, index])?;
            match cx.properties.abi.element_access {
                ElementAccess::Direct => element,
                ElementAccess::Indirect => cx.builder.load(LirType::Ptr, element)?,
            }
        }
        OpKind::SubVeq { lower, upper } => {
            let array = cx.operand(id, 0)?;
            let (lower_slot, upper_slot) = op.kind.subveq_bound_slots();
            let lower = index_value(cx, id, *lower, lower_slot)?;
            let upper = index_value(cx, id, *upper, upper_slot)?;
            cx.call_runtime(
                RuntimeFn::ArraySlice,
                vec![array, Value::i32(1), lower, Value::i64(1), upper],
            )?
        }
        OpKind::VeqSize => {
            let veq = function
                .operand(id, 0)
                .ok_or(qlower_ir::IrError::InvalidOperand { op: id, slot: 0 })?;
            group_size(cx, veq)?
        }
        OpKind::Measure => {
            let qubit = cx.operand(id, 0)?;
            let result = cx.call_runtime(RuntimeFn::Measure, vec![qubit])?;
            cx.call_runtime(RuntimeFn::ReadResult, vec![result])?
        }
        OpKind::Reset => {
            let qubit = cx.operand(id, 0)?;
            cx.call_runtime(RuntimeFn::Reset, vec![qubit])?;
            return Ok(());
        }
        _ => return Err(cx.unlowerable(op.name(), "not a qubit operation")),
    };
    cx.values.insert(id, value);
    Ok(())
}

/// Number of qubits in `veq`: a literal when the size is static, a
/// runtime query otherwise.
pub(crate) fn group_size(cx: &mut LoweringContext<'_>, veq: OpId) -> CompileResult<Value> {
    match cx.function.result_type(veq).and_then(Type::veq_size) {
        Some(size) => Ok(size_value(size)),
        None => {
            let array = cx.value(veq)?;
            cx.call_runtime(RuntimeFn::ArrayGetSize1d, vec![array])
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn size_value(size: u64) -> Value {
    Value::i64(size as i64)
}

fn index_value(
    cx: &LoweringContext<'_>,
    id: OpId,
    index: Index,
    slot: Option<u32>,
) -> CompileResult<Value> {
    match (index, slot) {
        (Index::Const(value), _) => Ok(size_value(value)),
        (Index::Operand, Some(slot)) => cx.operand(id, slot),
        (Index::Operand, None) => {
            Err(qlower_ir::IrError::InvalidOperand { op: id, slot: 0 }.into())
        }
    }
}

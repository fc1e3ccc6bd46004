//! Allocation factoring.
//!
//! Splits `alloca veq<N>` into N independent `alloca ref` when every use of
//! the vector can be resolved to a fixed qubit at compile time. Downstream
//! dependency analysis then sees N unrelated qubits instead of one
//! aggregate.
//!
//! A use is *convertible* when it is:
//! - a deallocation,
//! - an `extract_ref` at a constant index, or
//! - a `subveq` with constant bounds whose own uses are all convertible.
//!
//! Each allocation is rewritten in two phases. Planning walks the use tree
//! and resolves every index into a flat list of actions without touching
//! the body; only a complete plan is applied, so a failure leaves that
//! allocation exactly as it was.

use tracing::{debug, trace};

use qlower_ir::{Function, OpId, OpKind, Operation, Type};

use crate::error::{CompileError, CompileResult};
use crate::pass::{Pass, PassKind};
use crate::passes::scalarize::is_state_initialized;
use crate::property::PropertySet;

/// Statistics recorded by [`FactorQuantumAllocs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactoringStats {
    /// Vector allocations replaced by scalar allocations.
    pub allocations_factored: usize,
    /// Scalar allocations created.
    pub scalars_created: usize,
}

/// Rewrites statically-sized vector allocations into scalar allocations.
///
/// Must run after [`ScalarizeDeallocs`](super::ScalarizeDeallocs).
pub struct FactorQuantumAllocs;

impl Pass for FactorQuantumAllocs {
    fn name(&self) -> &'static str {
        "factor_quantum_allocs"
    }

    fn kind(&self) -> PassKind {
        PassKind::Transformation
    }

    fn should_run(&self, _function: &Function, properties: &PropertySet) -> bool {
        properties.options.factor_allocations
    }

    fn run(&self, function: &mut Function, properties: &mut PropertySet) -> CompileResult<()> {
        let candidates = factorable_allocations(function);
        if candidates.is_empty() {
            trace!("No factorable allocations in '{}'", function.name());
            return Ok(());
        }

        let mut stats = FactoringStats::default();
        for alloca in candidates {
            let plan = plan_rewrite(function, alloca)?;
            let size = plan.size;
            apply_rewrite(function, plan)?;
            debug!(
                "Factored allocation {:?} in '{}' into {} qubits",
                alloca,
                function.name(),
                size
            );
            stats.allocations_factored += 1;
            stats.scalars_created += usize::try_from(size).unwrap_or(usize::MAX);
        }

        properties.update::<FactoringStats>(|s| {
            s.allocations_factored += stats.allocations_factored;
            s.scalars_created += stats.scalars_created;
        });
        Ok(())
    }
}

/// Sized vector allocations whose every use is convertible.
pub fn factorable_allocations(function: &Function) -> Vec<OpId> {
    function
        .ops()
        .filter(|(_, op)| op.is_sized_veq_alloca())
        .map(|(id, _)| id)
        .filter(|&id| !is_state_initialized(function, id) && all_uses_convertible(function, id))
        .collect()
}

/// Check whether every transitive use of `value` is convertible.
pub fn all_uses_convertible(function: &Function, value: OpId) -> bool {
    let mut worklist = vec![value];
    while let Some(value) = worklist.pop() {
        for user in function.users(value) {
            let Some(op) = function.op(user) else {
                return false;
            };
            match &op.kind {
                OpKind::Dealloc => {}
                OpKind::ExtractRef { .. } => {
                    if function.extract_index(user).is_none() {
                        return false;
                    }
                }
                OpKind::SubVeq { .. } => match function.subveq_bounds(user) {
                    (Some(_), Some(_)) => worklist.push(user),
                    _ => return false,
                },
                _ => return false,
            }
        }
    }
    true
}

#[derive(Debug)]
enum Action {
    /// Replace an `extract_ref` with scalar `index`.
    Replace { op: OpId, index: u64 },
    /// Release scalars `first..first + len` in place of a deallocation.
    Dealloc { op: OpId, first: u64, len: u64 },
    /// Erase a slice once its uses are rewritten.
    EraseSlice(OpId),
}

#[derive(Debug)]
struct Plan {
    alloca: OpId,
    size: u64,
    actions: Vec<Action>,
}

fn plan_rewrite(function: &Function, alloca: OpId) -> CompileResult<Plan> {
    let fail = |reason: String| CompileError::FactoringFailed {
        function: function.name().to_string(),
        reason,
    };
    let size = function
        .result_type(alloca)
        .and_then(Type::veq_size)
        .ok_or_else(|| fail(format!("{alloca:?} is not a sized vector allocation")))?;

    let mut actions = Vec::new();
    // (value, offset into the allocation, length of the value)
    let mut worklist = vec![(alloca, 0u64, size)];
    while let Some((value, offset, len)) = worklist.pop() {
        for user in function.users(value) {
            let op = function.get(user)?;
            match &op.kind {
                OpKind::Dealloc => actions.push(Action::Dealloc {
                    op: user,
                    first: offset,
                    len,
                }),
                OpKind::ExtractRef { .. } => {
                    let index = function
                        .extract_index(user)
                        .ok_or_else(|| fail(format!("index of {user:?} is not constant")))?;
                    if index >= len {
                        return Err(fail(format!(
                            "index {index} of {user:?} is out of range for {len} qubits"
                        )));
                    }
                    actions.push(Action::Replace {
                        op: user,
                        index: offset + index,
                    });
                }
                OpKind::SubVeq { .. } => {
                    let (Some(lower), Some(upper)) = function.subveq_bounds(user) else {
                        return Err(fail(format!("bounds of {user:?} are not constant")));
                    };
                    if lower > upper || upper >= len {
                        return Err(fail(format!(
                            "slice [{lower}, {upper}] of {user:?} is out of range for {len} qubits"
                        )));
                    }
                    actions.push(Action::EraseSlice(user));
                    worklist.push((user, offset + lower, upper - lower + 1));
                }
                _ => {
                    return Err(fail(format!(
                        "'{}' use {user:?} cannot be factored",
                        op.name()
                    )));
                }
            }
        }
    }

    Ok(Plan {
        alloca,
        size,
        actions,
    })
}

fn apply_rewrite(function: &mut Function, plan: Plan) -> CompileResult<()> {
    let mut scalars = Vec::with_capacity(usize::try_from(plan.size).unwrap_or(0));
    for _ in 0..plan.size {
        scalars.push(function.insert_before(
            plan.alloca,
            Operation::new(OpKind::Alloca, Some(Type::Ref)),
            &[],
        )?);
    }
    let scalar = |index: u64| -> OpId { scalars[usize::try_from(index).unwrap_or(usize::MAX)] };

    let mut slices = Vec::new();
    for action in plan.actions {
        match action {
            Action::Replace { op, index } => {
                function.replace_op(op, scalar(index))?;
            }
            Action::Dealloc { op, first, len } => {
                let Some(last) = len.checked_sub(1) else {
                    function.erase(op)?;
                    continue;
                };
                for index in first..first + last {
                    function.insert_before(
                        op,
                        Operation::effect(OpKind::Dealloc),
                        &[scalar(index)],
                    )?;
                }
                function.set_operand(op, 0, scalar(first + last))?;
            }
            Action::EraseSlice(op) => slices.push(op),
        }
    }

    // Nested slices were planned after their parents.
    for slice in slices.into_iter().rev() {
        function.erase(slice)?;
    }
    function.erase(plan.alloca)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlower_ir::{GateKind, KernelBuilder, Signature};

    fn factor(function: &mut Function) -> PropertySet {
        let mut props = PropertySet::new();
        FactorQuantumAllocs.run(function, &mut props).unwrap();
        props
    }

    #[test]
    fn test_constant_extracts_factor() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_veq(2).unwrap();
        let q0 = b.extract(q, 0).unwrap();
        let q1 = b.extract(q, 1).unwrap();
        b.x(&[q0], q1).unwrap();
        let mut f = b.finish();

        let props = factor(&mut f);

        assert!(f.op(q).is_none());
        assert_eq!(
            f.count_ops(|op| op.kind.is_alloca() && op.result == Some(Type::Ref)),
            2
        );
        assert_eq!(
            props.get::<FactoringStats>(),
            Some(&FactoringStats {
                allocations_factored: 1,
                scalars_created: 2
            })
        );
        f.verify().unwrap();
    }

    #[test]
    fn test_dynamic_index_blocks_factoring() {
        let mut b = KernelBuilder::new("k", Signature::new([Type::I64], None));
        let i = b.arg(0).unwrap();
        let q = b.alloca_veq(4).unwrap();
        let qi = b.extract_dynamic(q, i).unwrap();
        b.h(qi).unwrap();
        let f = b.finish();

        assert!(factorable_allocations(&f).is_empty());
    }

    #[test]
    fn test_constant_operand_index_is_convertible() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_veq(4).unwrap();
        let c = b.constant(3).unwrap();
        let q3 = b.extract_dynamic(q, c).unwrap();
        b.h(q3).unwrap();
        let mut f = b.finish();

        factor(&mut f);

        assert_eq!(f.count_ops(|op| op.is_sized_veq_alloca()), 0);
        f.verify().unwrap();
    }

    #[test]
    fn test_vector_control_blocks_factoring() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_veq(2).unwrap();
        let t = b.alloca_ref().unwrap();
        b.apply(GateKind::X, &[], &[q], &[t]).unwrap();
        let f = b.finish();

        assert!(!all_uses_convertible(&f, q));
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_veq(2).unwrap();
        b.extract(q, 5).unwrap();
        let mut f = b.finish();
        let before = f.to_string();

        let mut props = PropertySet::new();
        let err = FactorQuantumAllocs.run(&mut f, &mut props).unwrap_err();

        assert!(matches!(err, CompileError::FactoringFailed { .. }));
        assert_eq!(f.to_string(), before);
    }

    #[test]
    fn test_failure_keeps_earlier_rewrites() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let first = b.alloca_veq(2).unwrap();
        let a = b.extract(first, 0).unwrap();
        b.h(a).unwrap();
        let second = b.alloca_veq(2).unwrap();
        let bad = b.extract(second, 5).unwrap();
        b.h(bad).unwrap();
        let mut f = b.finish();

        let mut props = PropertySet::new();
        let err = FactorQuantumAllocs.run(&mut f, &mut props).unwrap_err();

        assert!(matches!(err, CompileError::FactoringFailed { .. }));
        assert!(f.op(first).is_none());
        assert_eq!(
            f.count_ops(|op| op.kind.is_alloca() && op.result == Some(Type::Ref)),
            2
        );
        assert_eq!(f.result_type(second), Some(&Type::veq(2)));
        assert_eq!(f.users(second), vec![bad]);
        assert_eq!(props.get::<FactoringStats>(), None);
        f.verify().unwrap();
    }

    #[test]
    fn test_vector_dealloc_released_per_qubit() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_veq(3).unwrap();
        let d = b.dealloc(q).unwrap();
        let mut f = b.finish();

        factor(&mut f);

        assert_eq!(f.count_ops(|op| op.kind.is_dealloc()), 3);
        assert_eq!(f.result_type(f.operand(d, 0).unwrap()), Some(&Type::Ref));
        f.verify().unwrap();
    }
}

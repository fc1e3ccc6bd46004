//! Deallocation scalarization.
//!
//! Rewrites `dealloc %v : veq<N>` into N `extract_ref` + `dealloc` pairs so
//! that allocation factoring only ever sees scalar deallocations.

use tracing::debug;

use qlower_ir::{Function, Index, OpId, OpKind, Operation, Type};

use crate::error::CompileResult;
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;

/// Statistics recorded by [`ScalarizeDeallocs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalarizeStats {
    /// Vector deallocations replaced by per-qubit deallocations.
    pub deallocs_expanded: usize,
}

/// Expands deallocations of statically-sized vectors into per-qubit
/// deallocations.
///
/// The last scalar deallocation reuses the original operation, so anything
/// anchored on it is unaffected. Vectors of unspecified size and vectors
/// produced from an initialized state are left alone.
pub struct ScalarizeDeallocs;

impl Pass for ScalarizeDeallocs {
    fn name(&self) -> &'static str {
        "scalarize_deallocs"
    }

    fn kind(&self) -> PassKind {
        PassKind::Transformation
    }

    fn run(&self, function: &mut Function, properties: &mut PropertySet) -> CompileResult<()> {
        let deallocs: Vec<OpId> = function
            .ops()
            .filter(|(_, op)| op.kind.is_dealloc())
            .map(|(id, _)| id)
            .collect();

        let mut expanded = 0;
        for dealloc in deallocs {
            let Some(veq) = function.operand(dealloc, 0) else {
                continue;
            };
            let Some(size) = function.result_type(veq).and_then(Type::veq_size) else {
                continue;
            };
            if is_state_initialized(function, veq) {
                continue;
            }
            scalarize_dealloc(function, dealloc, veq, size)?;
            expanded += 1;
        }

        if expanded > 0 {
            debug!(
                "Expanded {} vector deallocations in '{}'",
                expanded,
                function.name()
            );
        }
        properties.update::<ScalarizeStats>(|s| s.deallocs_expanded += expanded);
        Ok(())
    }
}

/// Check if a vector value carries a pre-initialized state.
pub(crate) fn is_state_initialized(function: &Function, veq: OpId) -> bool {
    let defined_by_init = function
        .op(veq)
        .is_some_and(|op| matches!(op.kind, OpKind::InitializeState));
    defined_by_init
        || function.users(veq).into_iter().any(|user| {
            function
                .op(user)
                .is_some_and(|op| matches!(op.kind, OpKind::InitializeState))
        })
}

fn scalarize_dealloc(
    function: &mut Function,
    dealloc: OpId,
    veq: OpId,
    size: u64,
) -> CompileResult<()> {
    let Some(last) = size.checked_sub(1) else {
        function.erase(dealloc)?;
        return Ok(());
    };
    for index in 0..last {
        let qubit = insert_extract(function, dealloc, veq, index)?;
        function.insert_before(dealloc, Operation::effect(OpKind::Dealloc), &[qubit])?;
    }
    let qubit = insert_extract(function, dealloc, veq, last)?;
    function.set_operand(dealloc, 0, qubit)?;
    Ok(())
}

fn insert_extract(
    function: &mut Function,
    anchor: OpId,
    veq: OpId,
    index: u64,
) -> CompileResult<OpId> {
    Ok(function.insert_before(
        anchor,
        Operation::new(
            OpKind::ExtractRef {
                index: Index::Const(index),
            },
            Some(Type::Ref),
        ),
        &[veq],
    )?)
}

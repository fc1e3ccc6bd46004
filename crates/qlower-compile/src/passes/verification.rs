//! Verification passes for ensuring compilation correctness.
//!
//! These passes validate that transformation passes have left the body
//! structurally sound and allocation-balanced.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use qlower_ir::{Function, OpId, OpKind};

use crate::error::{CompileError, CompileResult};
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;

/// Result of [`IrVerification`], accumulated across functions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    /// Number of functions verified.
    pub functions_checked: usize,
    /// Number of operations verified.
    pub ops_checked: usize,
    /// Number of allocations whose deallocations were counted.
    pub allocations_checked: usize,
}

/// What one deallocation releases of an allocation.
#[derive(Debug, Clone, Copy)]
enum Release {
    /// The whole allocation.
    Whole,
    /// One element; `None` when the index is only known at run time.
    Element(Option<u64>),
}

/// Releases seen so far for one allocation.
#[derive(Debug, Default)]
struct Released {
    whole: bool,
    elements: bool,
    indices: FxHashSet<u64>,
}

impl Released {
    /// Record a release; `false` if it overlaps an earlier one.
    fn record(&mut self, release: Release) -> bool {
        if self.whole {
            return false;
        }
        match release {
            Release::Whole => {
                self.whole = true;
                !self.elements
            }
            Release::Element(index) => {
                self.elements = true;
                // Dynamic indices cannot be compared with each other.
                index.is_none_or(|i| self.indices.insert(i))
            }
        }
    }
}

/// Analysis pass that checks the body after transformation.
///
/// Runs the structural verifier of the IR, then checks that no qubit
/// allocation is released more than once. A later pass that duplicated a
/// deallocation would otherwise surface only as a runtime double free.
pub struct IrVerification;

impl Pass for IrVerification {
    fn name(&self) -> &'static str {
        "ir_verification"
    }

    fn kind(&self) -> PassKind {
        PassKind::Analysis
    }

    fn run(&self, function: &mut Function, properties: &mut PropertySet) -> CompileResult<()> {
        function.verify()?;

        // Map every projected qubit back to its allocation and record what
        // each deallocation releases of it.
        let mut roots: FxHashMap<OpId, OpId> = FxHashMap::default();
        let mut released: FxHashMap<OpId, Released> = FxHashMap::default();
        let mut allocations = 0;
        for (id, op) in function.ops() {
            match &op.kind {
                OpKind::Alloca | OpKind::InitializeState => {
                    allocations += 1;
                    roots.insert(id, id);
                }
                OpKind::Dealloc => {
                    let Some(operand) = function.operand(id, 0) else {
                        continue;
                    };
                    let target = match function.op(operand).map(|o| &o.kind) {
                        Some(OpKind::ExtractRef { .. }) => {
                            let index = function.extract_index(operand);
                            function
                                .operand(operand, 0)
                                .and_then(|veq| roots.get(&veq))
                                .map(|&root| (root, Release::Element(index)))
                        }
                        _ => roots.get(&operand).map(|&root| (root, Release::Whole)),
                    };
                    let Some((root, release)) = target else {
                        continue;
                    };
                    if !released.entry(root).or_default().record(release) {
                        return Err(CompileError::PassFailed {
                            name: self.name().to_string(),
                            reason: format!(
                                "{id:?} releases a qubit of {root:?} that is already released"
                            ),
                        });
                    }
                }
                _ => {}
            }
        }

        debug!(
            "Verified '{}': {} ops, {} allocations",
            function.name(),
            function.num_ops(),
            allocations
        );
        let ops = function.num_ops();
        properties.update::<VerificationResult>(|r| {
            r.functions_checked += 1;
            r.ops_checked += ops;
            r.allocations_checked += allocations;
        });
        Ok(())
    }
}

//! Property-based tests for allocation factoring and gate dispatch.

use proptest::prelude::*;
use qlower_compile::{PassManagerBuilder, PropertySet, compile_module, lower_module};
use qlower_ir::{Function, GateKind, KernelBuilder, Module, OpKind, Signature, Type};
use qlower_lir::{Callee, InstKind, LirFunction, Value};

const DISPATCH: &str = "generalizedInvokeWithRotationsControlsTargets";

/// A projection of one qubit out of a `veq<size>`.
#[derive(Debug, Clone)]
enum Access {
    /// `extract(q, index)`
    Direct(u64),
    /// `extract(subveq(q, lower, upper), offset)`
    Sliced { lower: u64, upper: u64, offset: u64 },
    /// `extract(subveq(subveq(q, outer.0, outer.1), inner.0, inner.1), offset)`,
    /// with inner bounds relative to the outer slice
    Nested {
        outer: (u64, u64),
        inner: (u64, u64),
        offset: u64,
    },
}

impl Access {
    fn qubit(&self) -> u64 {
        match *self {
            Access::Direct(index) => index,
            Access::Sliced { lower, offset, .. } => lower + offset,
            Access::Nested { outer, inner, offset } => outer.0 + inner.0 + offset,
        }
    }
}

/// Inclusive bounds of a slice of a vector of length `len`.
fn arb_bounds(len: u64) -> impl Strategy<Value = (u64, u64)> {
    (0..len, 0..len).prop_map(|(a, b)| (a.min(b), a.max(b)))
}

fn arb_access(size: u64) -> impl Strategy<Value = Access> {
    prop_oneof![
        (0..size).prop_map(Access::Direct),
        arb_bounds(size).prop_flat_map(|(lower, upper)| {
            (0..=upper - lower).prop_map(move |offset| Access::Sliced {
                lower,
                upper,
                offset,
            })
        }),
        arb_bounds(size)
            .prop_flat_map(|outer| (Just(outer), arb_bounds(outer.1 - outer.0 + 1)))
            .prop_flat_map(|(outer, inner)| {
                (0..=inner.1 - inner.0).prop_map(move |offset| Access::Nested {
                    outer,
                    inner,
                    offset,
                })
            }),
    ]
}

/// A kernel allocating `veq<size>`, applying H through every access, then
/// releasing the vector.
fn arb_kernel() -> impl Strategy<Value = (u64, Vec<Access>)> {
    (1_u64..=8).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec(arb_access(size), 0..=10),
        )
    })
}

fn build_kernel(size: u64, accesses: &[Access]) -> Function {
    let mut b = KernelBuilder::new("k", Signature::unit());
    let q = b.alloca_veq(size).unwrap();
    for access in accesses {
        let r = match *access {
            Access::Direct(index) => b.extract(q, index).unwrap(),
            Access::Sliced {
                lower,
                upper,
                offset,
            } => {
                let s = b.subveq(q, lower, upper).unwrap();
                b.extract(s, offset).unwrap()
            }
            Access::Nested {
                outer,
                inner,
                offset,
            } => {
                let s = b.subveq(q, outer.0, outer.1).unwrap();
                let t = b.subveq(s, inner.0, inner.1).unwrap();
                b.extract(t, offset).unwrap()
            }
        };
        b.h(r).unwrap();
    }
    b.dealloc(q).unwrap();
    b.ret(None).unwrap();
    b.finish()
}

fn compile(function: Function) -> Module {
    let mut module = Module::new("m");
    module.add_function(function).unwrap();
    let (pm, mut props) = PassManagerBuilder::new().build();
    let (_, report) = compile_module(&mut module, &pm, &mut props);
    assert!(report.is_ok(), "{report:?}");
    module
}

/// Values produced by scalar qubit allocations, in order.
fn scalar_qubits(f: &LirFunction) -> Vec<Value> {
    f.instructions()
        .filter(|(_, inst)| {
            matches!(
                &inst.kind,
                InstKind::Call { callee: Callee::Direct(name), .. }
                    if name == "__quantum__rt__qubit_allocate"
            )
        })
        .map(|(id, _)| Value::Inst(id))
        .collect()
}

proptest! {
    /// Factoring conserves qubits: N allocated, N released, and every
    /// access lands on the scalar for its flat index.
    #[test]
    fn factoring_conserves_qubits((size, accesses) in arb_kernel()) {
        let module = compile(build_kernel(size, &accesses));
        let f = module.function("k").unwrap();

        let scalars: Vec<_> = f
            .ops()
            .filter(|(_, op)| op.kind.is_alloca())
            .map(|(id, _)| id)
            .collect();
        prop_assert_eq!(scalars.len() as u64, size);
        prop_assert!(scalars.iter().all(|&id| f.result_type(id) == Some(&Type::Ref)));
        prop_assert_eq!(f.count_ops(|op| op.kind.is_dealloc()) as u64, size);
        prop_assert_eq!(
            f.count_ops(|op| matches!(op.kind, OpKind::ExtractRef { .. } | OpKind::SubVeq { .. })),
            0
        );

        let targets: Vec<_> = f
            .ops()
            .filter(|(_, op)| matches!(op.kind, OpKind::Gate { .. }))
            .filter_map(|(id, _)| f.operand(id, 0))
            .collect();
        prop_assert_eq!(targets.len(), accesses.len());
        for (target, access) in targets.iter().zip(&accesses) {
            let index = usize::try_from(access.qubit()).unwrap();
            prop_assert_eq!(*target, scalars[index]);
        }
        prop_assert!(f.verify().is_ok());
    }

    /// Running the pipeline on its own output changes nothing.
    #[test]
    fn factoring_is_idempotent((size, accesses) in arb_kernel()) {
        let mut module = compile(build_kernel(size, &accesses));
        let once = module.to_string();

        let (pm, mut props) = PassManagerBuilder::new().build();
        let (_, report) = compile_module(&mut module, &pm, &mut props);

        prop_assert!(report.is_ok());
        prop_assert_eq!(module.to_string(), once);
    }

    /// Generalized dispatch passes counts, then controls, targets and
    /// angles in operand order.
    #[test]
    fn dispatch_preserves_operand_order(num_controls in 2_usize..=6, theta in -3.0_f64..3.0) {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let controls: Vec<_> = (0..num_controls).map(|_| b.alloca_ref().unwrap()).collect();
        let target = b.alloca_ref().unwrap();
        let angle = b.constant_f64(theta).unwrap();
        b.apply(GateKind::Rx, &[angle], &controls, &[target]).unwrap();
        let mut module = Module::new("m");
        module.add_function(b.finish()).unwrap();

        let (lowered, report) = lower_module(&module, &PropertySet::new());
        prop_assert!(report.is_ok());
        let k = lowered.function("k").unwrap();
        let qubits = scalar_qubits(k);
        let calls: Vec<_> = k.calls_to(DISPATCH).collect();
        prop_assert_eq!(calls.len(), 1);
        let args = calls[0];

        let mut expected = vec![
            Value::i64(1),
            Value::i64(0),
            Value::i64(num_controls as i64),
            Value::i64(1),
            Value::symbol("__quantum__qis__rx"),
        ];
        expected.extend(qubits.iter().cloned());
        expected.push(Value::Float(theta));
        prop_assert_eq!(args, expected.as_slice());
    }
}

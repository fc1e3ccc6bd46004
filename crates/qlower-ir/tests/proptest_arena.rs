//! Property-based tests for the use-def arena.

use proptest::prelude::*;
use qlower_ir::{Function, KernelBuilder, OpId, OpKind, Operation, Signature, Type};

/// A kernel with one `veq<size>` and a gate on each listed index.
fn build(size: u64, indices: &[u64]) -> (Function, OpId, Vec<OpId>) {
    let mut b = KernelBuilder::new("k", Signature::unit());
    let q = b.alloca_veq(size).unwrap();
    let refs: Vec<_> = indices
        .iter()
        .map(|&i| {
            let r = b.extract(q, i).unwrap();
            b.h(r).unwrap();
            r
        })
        .collect();
    (b.finish(), q, refs)
}

fn arb_kernel() -> impl Strategy<Value = (u64, Vec<u64>)> {
    (1_u64..=6).prop_flat_map(|size| (Just(size), prop::collection::vec(0..size, 1..=8)))
}

proptest! {
    /// Every user of an op lists that op among its operands, and the
    /// reverse.
    #[test]
    fn users_mirror_operands((size, indices) in arb_kernel()) {
        let (f, _, _) = build(size, &indices);
        for (id, _) in f.ops() {
            for user in f.users(id) {
                prop_assert!(f.operands(user).contains(&id));
            }
            for operand in f.operands(id) {
                prop_assert!(f.users(operand).contains(&id));
            }
        }
        prop_assert!(f.verify().is_ok());
    }

    /// Redirecting every use of the vector leaves it erasable, and the
    /// body stays well formed.
    #[test]
    fn replace_all_uses_moves_every_user((size, indices) in arb_kernel()) {
        let (mut f, q, refs) = build(size, &indices);
        let users_before = f.users(q);
        let replacement = f
            .insert_before(q, Operation::new(OpKind::Alloca, Some(Type::veq(size))), &[])
            .unwrap();

        prop_assert!(f.erase(q).is_err());
        f.replace_all_uses(q, replacement).unwrap();

        prop_assert!(f.users(q).is_empty());
        prop_assert_eq!(f.users(replacement), users_before);
        f.erase(q).unwrap();
        prop_assert_eq!(f.num_ops(), 1 + 2 * refs.len());
        prop_assert!(f.verify().is_ok());
    }
}

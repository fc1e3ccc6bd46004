//! Gate and control lowering.
//!
//! A gate application becomes one of two call shapes.
//!
//! The *direct* form calls a per-gate entry point with the controls, then
//! the targets, then the rotation angles. It is used for uncontrolled gates
//! and for a single scalar control when the gate has a controlled entry
//! point.
//!
//! Everything else goes through the *generalized* dispatch entry point:
//!
//! ```text
//! dispatch(R, C1, C2, T, base,
//!          size(g1), g1, ..., size(gC1), gC1,   // vector control groups
//!          c1, ..., cC2,                        // scalar controls
//!          t1, ..., tT,                         // targets
//!          r1, ..., rR)                         // rotation angles
//! ```
//!
//! where `base` is the address of the gate's uncontrolled entry point.

use tracing::trace;

use qlower_ir::{GateKind, OpId, OpKind, Type};
use qlower_lir::{AbiTable, RuntimeFn, Value};

use crate::error::{CompileError, CompileResult};
use crate::lower::LoweringContext;
use crate::lower::qubit::group_size;

/// A gate's control operands, split by shape.
#[derive(Debug, Default)]
struct Controls {
    /// Vector-valued control groups, in operand order.
    groups: Vec<OpId>,
    /// Scalar controls, in operand order.
    scalars: Vec<OpId>,
}

/// Lower one gate application.
pub(crate) fn lower(cx: &mut LoweringContext<'_>, id: OpId) -> CompileResult<()> {
    let function = cx.function;
    let op = function.get(id)?;
    let OpKind::Gate {
        gate,
        adjoint,
        num_params,
        num_controls,
        num_targets,
    } = op.kind
    else {
        return Err(cx.unlowerable(op.name(), "not a gate"));
    };

    if num_targets != gate.num_targets() || num_params != gate.num_params() {
        return Err(CompileError::GateArity {
            gate: gate.name().to_string(),
            expected_targets: gate.num_targets(),
            expected_params: gate.num_params(),
            targets: num_targets,
            params: num_params,
        });
    }

    let operands = function.operands(id);
    let (params, rest) = operands.split_at(num_params as usize);
    let (controls, targets) = rest.split_at(num_controls as usize);

    let mut split = Controls::default();
    for &control in controls {
        if function.result_type(control).is_some_and(Type::is_veq) {
            split.groups.push(control);
        } else {
            split.scalars.push(control);
        }
    }

    let entry = cx
        .properties
        .abi
        .gate(gate.name())
        .ok_or_else(|| CompileError::UnknownEntryPoint(gate.name().to_string()))?
        .clone();

    // Adjoints come from a dedicated entry point when the runtime has one,
    // otherwise from the base entry point with negated angles.
    let use_adjoint_entry = adjoint && !gate.is_self_adjoint() && gate.num_params() == 0;
    let base = if use_adjoint_entry {
        entry
            .adjoint
            .clone()
            .ok_or_else(|| CompileError::UnknownEntryPoint(format!("{}<adj>", gate.name())))?
    } else {
        entry.base.clone()
    };
    let params = param_values(cx, gate, adjoint, params)?;
    let targets = targets
        .iter()
        .map(|&t| cx.value(t))
        .collect::<CompileResult<Vec<_>>>()?;

    let direct = if split.groups.is_empty() && split.scalars.is_empty() {
        Some(base.clone())
    } else if split.groups.is_empty() && split.scalars.len() == 1 && !use_adjoint_entry {
        entry.controlled.clone()
    } else {
        None
    };

    if let Some(callee) = direct {
        let mut args = split
            .scalars
            .iter()
            .map(|&c| cx.value(c))
            .collect::<CompileResult<Vec<_>>>()?;
        args.extend(targets);
        args.extend(params);
        let sig = AbiTable::gate_signature(split.scalars.len(), num_targets as usize, num_params as usize);
        cx.declare(&callee, &sig)?;
        trace!("{} -> direct call {}", gate, callee);
        cx.builder.call(&callee, args, sig.ret)?;
        return Ok(());
    }

    let base_sig = AbiTable::gate_signature(0, num_targets as usize, num_params as usize);
    cx.declare(&base, &base_sig)?;

    let mut args = vec![
        count(num_params as usize),
        count(split.groups.len()),
        count(split.scalars.len()),
        count(num_targets as usize),
        Value::symbol(base.as_str()),
    ];
    for &group in &split.groups {
        args.push(group_size(cx, group)?);
        args.push(cx.value(group)?);
    }
    for &scalar in &split.scalars {
        args.push(cx.value(scalar)?);
    }
    args.extend(targets);
    args.extend(params);

    trace!("{} -> generalized dispatch through {}", gate, base);
    cx.call_runtime(RuntimeFn::GeneralizedInvoke, args)?;
    Ok(())
}

#[allow(clippy::cast_possible_wrap)]
fn count(n: usize) -> Value {
    Value::i64(n as i64)
}

/// Rotation angles, negated (and for `u3`, reordered) for an adjoint.
fn param_values(
    cx: &mut LoweringContext<'_>,
    gate: GateKind,
    adjoint: bool,
    params: &[OpId],
) -> CompileResult<Vec<Value>> {
    let values = params
        .iter()
        .map(|&p| cx.value(p))
        .collect::<CompileResult<Vec<_>>>()?;
    if !adjoint || values.is_empty() {
        return Ok(values);
    }
    // u3(θ, φ, λ)† = u3(-θ, -λ, -φ)
    let ordered = match (gate, values.as_slice()) {
        (GateKind::U3, [theta, phi, lambda]) => vec![theta.clone(), lambda.clone(), phi.clone()],
        _ => values,
    };
    ordered.into_iter().map(|v| negate(cx, v)).collect()
}

fn negate(cx: &mut LoweringContext<'_>, value: Value) -> CompileResult<Value> {
    match value {
        Value::Float(v) => Ok(Value::Float(-v)),
        other => Ok(cx.builder.fneg(other)?),
    }
}

#[cfg(test)]
mod tests {
    use qlower_ir::{Function, KernelBuilder, Module, Signature};
    use qlower_lir::LirFunction;

    use crate::lower::lower_module;
    use crate::property::PropertySet;

    use super::*;

    const DISPATCH: &str = "generalizedInvokeWithRotationsControlsTargets";

    fn lower_one(function: Function) -> LirFunction {
        let name = function.name().to_string();
        let mut module = Module::new("m");
        module.add_function(function).unwrap();
        let (out, report) = lower_module(&module, &PropertySet::new());
        assert!(report.is_ok(), "{report:?}");
        out.function(&name).unwrap().clone()
    }

    #[test]
    fn test_single_scalar_control_is_direct() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let c = b.alloca_ref().unwrap();
        let t = b.alloca_ref().unwrap();
        b.x(&[c], t).unwrap();
        let k = lower_one(b.finish());

        let calls: Vec<_> = k.calls_to("__quantum__qis__x__ctl").collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(k.calls_to(DISPATCH).count(), 0);
    }

    #[test]
    fn test_rotation_operand_order() {
        let mut b = KernelBuilder::new("k", Signature::new([Type::F64], None));
        let theta = b.arg(0).unwrap();
        let c = b.alloca_ref().unwrap();
        let t = b.alloca_ref().unwrap();
        b.apply(GateKind::Ry, &[theta], &[c], &[t]).unwrap();
        let k = lower_one(b.finish());

        let calls: Vec<_> = k.calls_to("__quantum__qis__ry__ctl").collect();
        assert_eq!(calls[0][2], Value::Param(0));
    }

    #[test]
    fn test_two_controls_use_dispatch() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let c0 = b.alloca_ref().unwrap();
        let c1 = b.alloca_ref().unwrap();
        let t = b.alloca_ref().unwrap();
        b.x(&[c0, c1], t).unwrap();
        let k = lower_one(b.finish());

        let calls: Vec<_> = k.calls_to(DISPATCH).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0][..5],
            [
                Value::i64(0),
                Value::i64(0),
                Value::i64(2),
                Value::i64(1),
                Value::symbol("__quantum__qis__x"),
            ]
        );
    }

    #[test]
    fn test_u3_without_controlled_variant_uses_dispatch() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let params: Vec<_> = [0.1, 0.2, 0.3]
            .into_iter()
            .map(|v| b.constant_f64(v).unwrap())
            .collect();
        let c = b.alloca_ref().unwrap();
        let t = b.alloca_ref().unwrap();
        b.apply(GateKind::U3, &params, &[c], &[t]).unwrap();
        let k = lower_one(b.finish());

        let calls: Vec<_> = k.calls_to(DISPATCH).collect();
        assert_eq!(calls[0][0], Value::i64(3));
        assert_eq!(
            calls[0][7..],
            [Value::Float(0.1), Value::Float(0.2), Value::Float(0.3)]
        );
    }

    #[test]
    fn test_adjoint_entry_points() {
        let mut b = KernelBuilder::new("k", Signature::new([Type::F64], None));
        let theta = b.arg(0).unwrap();
        let q = b.alloca_ref().unwrap();
        b.apply_adjoint(GateKind::T, &[], &[], &[q]).unwrap();
        b.apply_adjoint(GateKind::H, &[], &[], &[q]).unwrap();
        b.apply_adjoint(GateKind::Rz, &[theta], &[], &[q]).unwrap();
        let k = lower_one(b.finish());

        assert_eq!(k.calls_to("__quantum__qis__t__adj").count(), 1);
        assert_eq!(k.calls_to("__quantum__qis__h").count(), 1);
        let rz: Vec<_> = k.calls_to("__quantum__qis__rz").collect();
        assert!(matches!(rz[0][1], Value::Inst(_)));
        assert!(k.to_string().contains("fneg double %arg0"));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut b = KernelBuilder::new("k", Signature::unit());
        let q = b.alloca_ref().unwrap();
        b.apply(GateKind::Swap, &[], &[], &[q]).unwrap();
        let mut module = Module::new("m");
        module.add_function(b.finish()).unwrap();

        let (_, report) = lower_module(&module, &PropertySet::new());
        assert!(matches!(
            report.result("k"),
            Some(Err(CompileError::GateArity { .. }))
        ));
    }
}

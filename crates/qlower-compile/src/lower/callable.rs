//! Callable ABI lowering.
//!
//! Every callable is a `{ ptr code, ptr capture }` pair. `capture` is null
//! when nothing was bound; otherwise it points at a stack-allocated struct
//! holding the captured values in order.
//!
//! The two cases use different calling conventions. A captureless callee
//! takes only the explicit arguments, while a capturing callee takes the
//! capture struct by value first. A call site that cannot see which one it
//! has branches on the capture pointer:
//!
//! ```text
//!   %code = extractvalue { ptr, ptr } %c, 0
//!   %cap  = extractvalue { ptr, ptr } %c, 1
//!   %none = icmp eq ptr %cap, null
//!   br i1 %none, label %callable.nocapture, label %callable.capture
//! callable.nocapture:
//!   %r0 = call %code(args...)
//! callable.capture:
//!   %env = load { ... }, ptr %cap
//!   %r1 = call %code(%env, args...)
//! callable.join:
//!   %r = phi [ %r0, %callable.nocapture ], [ %r1, %callable.capture ]
//! ```
//!
//! Capture storage lives in the frame of the function that instantiates
//! the callable, so a capturing callable must not outlive that frame:
//! [`check_capture_escape`] rejects returns and stores to memory that is
//! not a local stack slot.

use rustc_hash::FxHashSet;
use tracing::trace;

use qlower_ir::{Callee, Function, OpId, OpKind, Type};
use qlower_lir::{LirType, Value};

use crate::error::{CompileError, CompileResult};
use crate::lower::{LoweringContext, lir_signature, lir_type};

/// Reject capturing callables whose storage could outlive the frame.
pub fn check_capture_escape(function: &Function) -> CompileResult<()> {
    for (id, op) in function.ops() {
        if !matches!(op.kind, OpKind::Instantiate { .. }) || captures(function, id).is_empty() {
            continue;
        }
        if let Some(via) = escape_route(function, id) {
            return Err(CompileError::EscapingCapture {
                function: function.name().to_string(),
                op: id,
                via,
            });
        }
    }
    Ok(())
}

fn escape_route(function: &Function, callable: OpId) -> Option<&'static str> {
    let mut worklist = vec![callable];
    let mut seen = FxHashSet::default();
    while let Some(value) = worklist.pop() {
        if !seen.insert(value) {
            continue;
        }
        for user in function.users(value) {
            let Some(op) = function.op(user) else {
                continue;
            };
            match &op.kind {
                OpKind::Return => return Some("return"),
                OpKind::Store => {
                    let slot = function.operand(user, 1).filter(|&s| {
                        function
                            .op(s)
                            .is_some_and(|o| matches!(o.kind, OpKind::StackSlot { .. }))
                    });
                    let Some(slot) = slot else {
                        return Some("a store to non-local memory");
                    };
                    worklist.extend(function.users(slot).into_iter().filter(|&u| {
                        function.op(u).is_some_and(|o| matches!(o.kind, OpKind::Load))
                    }));
                }
                // Captured by another callable: that one must not escape either.
                OpKind::Instantiate { .. } => worklist.push(user),
                _ => {}
            }
        }
    }
    None
}

/// Captured operands of an `Instantiate`.
fn captures(function: &Function, id: OpId) -> Vec<OpId> {
    let operands = function.operands(id);
    match function.op(id).map(|op| &op.kind) {
        Some(OpKind::Instantiate {
            callee: Callee::Value,
        }) => operands.into_iter().skip(1).collect(),
        _ => operands,
    }
}

fn capture_types(function: &Function, id: OpId) -> Vec<Type> {
    captures(function, id)
        .into_iter()
        .map(|c| function.result_type(c).cloned().unwrap_or(Type::Ptr))
        .collect()
}

fn static_callee(cx: &LoweringContext<'_>, id: OpId) -> CompileResult<String> {
    match cx.function.op(id).map(|op| &op.kind) {
        Some(OpKind::Instantiate {
            callee: Callee::Symbol(name),
        }) => Ok(name.clone()),
        _ => Err(CompileError::UnsupportedCallableValue {
            function: cx.function.name().to_string(),
            op: id,
        }),
    }
}

/// Lower `Instantiate` to a `{ code, capture }` pair.
pub(crate) fn lower_instantiate(cx: &mut LoweringContext<'_>, id: OpId) -> CompileResult<()> {
    let function = cx.function;
    let module = cx.module;
    let name = static_callee(cx, id)?;
    let sig = function
        .result_type(id)
        .and_then(Type::as_callable)
        .ok_or_else(|| cx.unlowerable("instantiate", "result is not a callable"))?;
    let capture_types = capture_types(function, id);

    let callee_sig = module
        .lookup_signature(&name)
        .ok_or_else(|| CompileError::UnknownSymbol(name.clone()))?;
    let expected: Vec<Type> = if capture_types.is_empty() {
        sig.params.clone()
    } else {
        std::iter::once(Type::Struct(capture_types.clone()))
            .chain(sig.params.iter().cloned())
            .collect()
    };
    if callee_sig.params != expected || callee_sig.result != sig.result {
        return Err(CompileError::CallableSignature {
            callee: name,
            reason: format!(
                "expected ({}) -> {}, found {}",
                expected
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                sig.result
                    .as_ref()
                    .map_or_else(|| "()".to_string(), ToString::to_string),
                callee_sig
            ),
        });
    }
    if module.function(&name).is_none() {
        cx.declare(&name, &lir_signature(callee_sig))?;
    }

    let capture = if capture_types.is_empty() {
        Value::Null
    } else {
        let env_ty = LirType::Struct(capture_types.iter().map(lir_type).collect());
        let env = cx.builder.entry_alloca(env_ty.clone());
        for (index, capture) in (0u32..).zip(captures(function, id)) {
            let value = cx.value(capture)?;
            let field = cx.builder.field_ptr(env_ty.clone(), env.clone(), index)?;
            cx.builder.store(value, field)?;
        }
        env
    };
    let pair = cx.builder.aggregate(
        LirType::callable_pair(),
        vec![Value::symbol(name.as_str()), capture],
    )?;
    cx.values.insert(id, pair);
    Ok(())
}

/// How the capture payload of a called callable is known.
struct Provenance {
    /// Types of the captured values.
    captures: Vec<Type>,
    /// The `Instantiate` that built the callable, when it is the direct
    /// operand of the call.
    instantiate: Option<OpId>,
}

/// Trace a callable back to the `Instantiate`s that may have built it.
///
/// Follows loads through local stack slots. Captureless callables reach the
/// null arm of the call and place no constraint on the layout; every
/// capturing one must agree on it.
fn provenance(cx: &LoweringContext<'_>, callable: OpId) -> CompileResult<Provenance> {
    let function = cx.function;
    let unknown = || CompileError::UnknownCaptureLayout {
        function: function.name().to_string(),
        op: callable,
    };

    let mut layout: Option<Vec<Type>> = None;
    let mut reached = false;
    let mut worklist = vec![callable];
    let mut seen = FxHashSet::default();
    while let Some(value) = worklist.pop() {
        if !seen.insert(value) {
            continue;
        }
        let op = function.get(value)?;
        match &op.kind {
            OpKind::Instantiate { .. } => {
                static_callee(cx, value)?;
                reached = true;
                let types = capture_types(function, value);
                if types.is_empty() {
                    continue;
                }
                match &layout {
                    Some(existing) if *existing != types => return Err(unknown()),
                    Some(_) => {}
                    None => layout = Some(types),
                }
            }
            OpKind::Load => {
                let slot = function.operand(value, 0).ok_or_else(unknown)?;
                if !matches!(function.get(slot)?.kind, OpKind::StackSlot { .. }) {
                    return Err(unknown());
                }
                let stores: Vec<OpId> = function
                    .users(slot)
                    .into_iter()
                    .filter(|&u| {
                        function.op(u).is_some_and(|o| matches!(o.kind, OpKind::Store))
                            && function.operand(u, 1) == Some(slot)
                    })
                    .collect();
                if stores.is_empty() {
                    return Err(unknown());
                }
                for store in stores {
                    worklist.push(function.operand(store, 0).ok_or_else(unknown)?);
                }
            }
            _ => return Err(unknown()),
        }
    }

    if !reached {
        return Err(unknown());
    }
    let captures = layout.unwrap_or_default();
    let instantiate = function
        .op(callable)
        .is_some_and(|op| matches!(op.kind, OpKind::Instantiate { .. }))
        .then_some(callable);
    Ok(Provenance {
        captures,
        instantiate,
    })
}

/// Lower `CallCallable`.
pub(crate) fn lower_call(cx: &mut LoweringContext<'_>, id: OpId) -> CompileResult<()> {
    let function = cx.function;
    let operands = function.operands(id);
    let Some((&callable, explicit)) = operands.split_first() else {
        return Err(cx.unlowerable("call_callable", "missing callable operand"));
    };
    let ret = function.result_type(id).map_or(LirType::Void, lir_type);
    let args = explicit
        .iter()
        .map(|&a| cx.value(a))
        .collect::<CompileResult<Vec<_>>>()?;

    let origin = provenance(cx, callable)?;
    let env_ty = LirType::Struct(origin.captures.iter().map(lir_type).collect());

    if let (true, Some(instantiate)) = (cx.properties.options.elide_known_captures, origin.instantiate) {
        let name = static_callee(cx, instantiate)?;
        let mut call_args = Vec::with_capacity(args.len() + 1);
        let captured = captures(function, instantiate);
        if !captured.is_empty() {
            let fields = captured
                .iter()
                .map(|&c| cx.value(c))
                .collect::<CompileResult<Vec<_>>>()?;
            call_args.push(cx.builder.aggregate(env_ty, fields)?);
        }
        call_args.extend(args);
        trace!("Direct call to {} for callable {:?}", name, callable);
        let result = cx.builder.call(&name, call_args, ret.clone())?;
        if !ret.is_void() {
            cx.values.insert(id, result);
        }
        return Ok(());
    }

    let pair = cx.value(callable)?;
    let code = cx.builder.extract_value(pair.clone(), 0, LirType::Ptr)?;
    let capture = cx.builder.extract_value(pair, 1, LirType::Ptr)?;
    let is_null = cx.builder.is_null(capture.clone())?;

    let no_capture = cx.builder.append_block("callable.nocapture");
    let with_capture = cx.builder.append_block("callable.capture");
    let join = cx.builder.append_block("callable.join");
    cx.builder.cond_br(is_null, no_capture, with_capture)?;

    cx.builder.position_at_end(no_capture);
    let plain = cx
        .builder
        .call_indirect(code.clone(), args.clone(), ret.clone())?;
    cx.builder.br(join)?;

    cx.builder.position_at_end(with_capture);
    let env = cx.builder.load(env_ty, capture)?;
    let mut captured_args = Vec::with_capacity(args.len() + 1);
    captured_args.push(env);
    captured_args.extend(args);
    let captured = cx.builder.call_indirect(code, captured_args, ret.clone())?;
    cx.builder.br(join)?;

    cx.builder.position_at_end(join);
    if !ret.is_void() {
        let merged = cx
            .builder
            .phi(ret, vec![(plain, no_capture), (captured, with_capture)])?;
        cx.values.insert(id, merged);
    }
    Ok(())
}

//! Callable ABI lowering: the `{ code, capture }` convention, direct-call
//! elision and rejection of callables that escape their frame.

use qlower_compile::{CompileError, LoweringOptions, PropertySet, lower_module};
use qlower_ir::{KernelBuilder, Module, Signature, Type};
use qlower_lir::{Callee, InstKind, LirFunction, LirModule, LirType, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `(i64) -> i64`, the explicit signature of every callable here.
fn unary() -> Signature {
    Signature::new([Type::I64], Some(Type::I64))
}

/// Module with `offset(struct<i64>, i64) -> i64` and `identity(i64) -> i64`.
fn module_with_callees() -> Module {
    let mut module = Module::new("callables");

    let mut b = KernelBuilder::new(
        "offset",
        Signature::new([Type::Struct(vec![Type::I64]), Type::I64], Some(Type::I64)),
    );
    let x = b.arg(1).unwrap();
    b.ret(Some(x)).unwrap();
    module.add_function(b.finish()).unwrap();

    let mut b = KernelBuilder::new("identity", unary());
    let x = b.arg(0).unwrap();
    b.ret(Some(x)).unwrap();
    module.add_function(b.finish()).unwrap();

    module
}

fn no_elision() -> PropertySet {
    PropertySet::new()
        .with_options(LoweringOptions::from_json(r#"{"elide_known_captures": false}"#).unwrap())
}

fn lower_ok(module: &Module, properties: &PropertySet) -> LirModule {
    init_tracing();
    let (lowered, report) = lower_module(module, properties);
    assert!(report.is_ok(), "{report:?}");
    lowered
}

/// Lower `module` and check that `function` failed with an error matching
/// `expected`.
fn assert_rejected(module: &Module, function: &str, expected: impl FnOnce(&CompileError) -> bool) {
    init_tracing();
    let (lowered, report) = lower_module(module, &PropertySet::new());
    assert!(lowered.function(function).is_none());
    match report.result(function) {
        Some(Err(e)) => assert!(expected(e), "unexpected error: {e}"),
        other => panic!("expected '{function}' to fail, got {other:?}"),
    }
}

/// Argument lists of indirect calls in the block labelled `label`.
fn indirect_calls<'a>(f: &'a LirFunction, label: &str) -> Vec<&'a [Value]> {
    let block = f.block_by_label(label).unwrap();
    f.block(block)
        .insts
        .iter()
        .filter_map(|&id| match &f.inst(id).kind {
            InstKind::Call {
                callee: Callee::Indirect(_),
                args,
            } => Some(args.as_slice()),
            _ => None,
        })
        .collect()
}

fn aggregates(f: &LirFunction) -> Vec<&[Value]> {
    f.instructions()
        .filter_map(|(_, inst)| match &inst.kind {
            InstKind::Aggregate { fields } => Some(fields.as_slice()),
            _ => None,
        })
        .collect()
}

/// Caller that binds 7 into `offset` and calls the result with 1.
fn add_capturing_caller(module: &mut Module) {
    let mut b = KernelBuilder::new("caller", Signature::new([], Some(Type::I64)));
    let seven = b.constant(7).unwrap();
    let callable = b.instantiate("offset", &[seven], unary()).unwrap();
    let one = b.constant(1).unwrap();
    let r = b.call_callable(callable, &[one]).unwrap();
    b.ret(Some(r)).unwrap();
    module.add_function(b.finish()).unwrap();
}

// ============================================================================
// Capture convention
// ============================================================================

#[test]
fn test_capturing_callable_round_trip() {
    let mut module = module_with_callees();
    add_capturing_caller(&mut module);
    let lowered = lower_ok(&module, &no_elision());
    let caller = lowered.function("caller").unwrap();

    // Capture storage is a stack struct holding the bound value.
    let env_ty = LirType::Struct(vec![LirType::Int(64)]);
    assert!(
        caller
            .instructions()
            .any(|(_, inst)| inst.kind == InstKind::Alloca { ty: env_ty.clone() })
    );
    assert!(caller.instructions().any(|(_, inst)| matches!(
        &inst.kind,
        InstKind::Store { value, .. } if *value == Value::i64(7)
    )));
    let pairs = aggregates(caller);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0][0], Value::symbol("offset"));
    assert!(matches!(pairs[0][1], Value::Inst(_)));

    // The capturing branch passes the loaded struct ahead of the arguments.
    let captured = indirect_calls(caller, "callable.capture");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].len(), 2);
    assert!(matches!(captured[0][0], Value::Inst(_)));
    assert_eq!(captured[0][1], Value::i64(1));

    let plain = indirect_calls(caller, "callable.nocapture");
    assert_eq!(plain, vec![&[Value::i64(1)][..]]);

    let join = caller.block_by_label("callable.join").unwrap();
    assert!(
        caller
            .block(join)
            .insts
            .iter()
            .any(|&id| matches!(caller.inst(id).kind, InstKind::Phi { .. }))
    );
}

#[test]
fn test_captureless_callable_has_null_capture() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("caller", Signature::new([], Some(Type::I64)));
    let callable = b.instantiate("identity", &[], unary()).unwrap();
    let two = b.constant(2).unwrap();
    let r = b.call_callable(callable, &[two]).unwrap();
    b.ret(Some(r)).unwrap();
    module.add_function(b.finish()).unwrap();

    let lowered = lower_ok(&module, &no_elision());
    let caller = lowered.function("caller").unwrap();

    assert_eq!(
        aggregates(caller),
        vec![&[Value::symbol("identity"), Value::Null][..]]
    );
    assert!(
        !caller
            .instructions()
            .any(|(_, inst)| matches!(inst.kind, InstKind::Alloca { .. }))
    );
}

#[test]
fn test_known_callable_elides_dispatch() {
    let mut module = module_with_callees();
    add_capturing_caller(&mut module);
    let lowered = lower_ok(&module, &PropertySet::new());
    let caller = lowered.function("caller").unwrap();

    let calls: Vec<_> = caller.calls_to("offset").collect();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0][0], Value::Inst(_)));
    assert_eq!(calls[0][1], Value::i64(1));
    assert!(caller.block_by_label("callable.capture").is_none());
}

#[test]
fn test_callable_copied_through_stack_slot() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("caller", Signature::new([], Some(Type::I64)));
    let seven = b.constant(7).unwrap();
    let callable = b.instantiate("offset", &[seven], unary()).unwrap();
    let slot = b.stack_slot(Type::callable(unary())).unwrap();
    b.store(callable, slot).unwrap();
    let copy = b.load(slot).unwrap();
    let one = b.constant(1).unwrap();
    let r = b.call_callable(copy, &[one]).unwrap();
    b.ret(Some(r)).unwrap();
    module.add_function(b.finish()).unwrap();

    let lowered = lower_ok(&module, &PropertySet::new());
    let caller = lowered.function("caller").unwrap();

    let captured = indirect_calls(caller, "callable.capture");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].len(), 2);
}

#[test]
fn test_slot_holding_either_convention() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("caller", Signature::new([], Some(Type::I64)));
    let slot = b.stack_slot(Type::callable(unary())).unwrap();
    let plain = b.instantiate("identity", &[], unary()).unwrap();
    b.store(plain, slot).unwrap();
    let seven = b.constant(7).unwrap();
    let bound = b.instantiate("offset", &[seven], unary()).unwrap();
    b.store(bound, slot).unwrap();
    let copy = b.load(slot).unwrap();
    let one = b.constant(1).unwrap();
    let r = b.call_callable(copy, &[one]).unwrap();
    b.ret(Some(r)).unwrap();
    module.add_function(b.finish()).unwrap();

    let lowered = lower_ok(&module, &PropertySet::new());
    let caller = lowered.function("caller").unwrap();

    assert_eq!(
        indirect_calls(caller, "callable.nocapture"),
        vec![&[Value::i64(1)][..]]
    );
    let captured = indirect_calls(caller, "callable.capture");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].len(), 2);
    assert_eq!(captured[0][1], Value::i64(1));
    // The capture arm loads the layout of the capturing callable.
    assert!(caller.instructions().any(|(_, inst)| {
        matches!(inst.kind, InstKind::Load { .. }) && inst.ty == LirType::Struct(vec![LirType::I64])
    }));

    let join = caller.block_by_label("callable.join").unwrap();
    assert!(
        caller
            .block(join)
            .insts
            .iter()
            .any(|&id| matches!(caller.inst(id).kind, InstKind::Phi { .. }))
    );
}

#[test]
fn test_slot_of_captureless_callables_loads_empty_struct() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("caller", Signature::unit());
    let slot = b.stack_slot(Type::callable(unary())).unwrap();
    let callable = b.instantiate("identity", &[], unary()).unwrap();
    b.store(callable, slot).unwrap();
    let copy = b.load(slot).unwrap();
    let one = b.constant(1).unwrap();
    b.call_callable(copy, &[one]).unwrap();
    b.ret(None).unwrap();
    module.add_function(b.finish()).unwrap();

    let lowered = lower_ok(&module, &PropertySet::new());
    let caller = lowered.function("caller").unwrap();

    assert_eq!(indirect_calls(caller, "callable.capture").len(), 1);
    assert!(caller.instructions().any(|(_, inst)| {
        matches!(inst.kind, InstKind::Load { .. }) && inst.ty == LirType::Struct(vec![])
    }));
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn test_returned_capture_rejected() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("leak", Signature::new([], Some(Type::callable(unary()))));
    let seven = b.constant(7).unwrap();
    let callable = b.instantiate("offset", &[seven], unary()).unwrap();
    b.ret(Some(callable)).unwrap();
    module.add_function(b.finish()).unwrap();

    assert_rejected(&module, "leak", |e| {
        matches!(e, CompileError::EscapingCapture { via: "return", .. })
    });
}

#[test]
fn test_store_to_foreign_memory_rejected() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("leak", Signature::new([Type::Ptr], None));
    let out = b.arg(0).unwrap();
    let seven = b.constant(7).unwrap();
    let callable = b.instantiate("offset", &[seven], unary()).unwrap();
    b.store(callable, out).unwrap();
    b.ret(None).unwrap();
    module.add_function(b.finish()).unwrap();

    assert_rejected(&module, "leak", |e| {
        matches!(e, CompileError::EscapingCapture { .. })
    });
}

#[test]
fn test_captureless_callable_may_be_returned() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("make", Signature::new([], Some(Type::callable(unary()))));
    let callable = b.instantiate("identity", &[], unary()).unwrap();
    b.ret(Some(callable)).unwrap();
    module.add_function(b.finish()).unwrap();

    let lowered = lower_ok(&module, &PropertySet::new());
    assert!(lowered.function("make").is_some());
}

#[test]
fn test_runtime_function_pointer_unsupported() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("dynamic", Signature::new([Type::Ptr], None));
    let code = b.arg(0).unwrap();
    let callable = b.instantiate_value(code, &[], unary()).unwrap();
    let one = b.constant(1).unwrap();
    b.call_callable(callable, &[one]).unwrap();
    b.ret(None).unwrap();
    module.add_function(b.finish()).unwrap();

    assert_rejected(&module, "dynamic", |e| {
        matches!(e, CompileError::UnsupportedCallableValue { .. })
    });
    // Siblings still lower.
    let (lowered, _) = lower_module(&module, &PropertySet::new());
    assert!(lowered.function("identity").is_some());
}

#[test]
fn test_callable_parameter_has_unknown_layout() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new(
        "apply",
        Signature::new([Type::callable(unary())], Some(Type::I64)),
    );
    let callable = b.arg(0).unwrap();
    let one = b.constant(1).unwrap();
    let r = b.call_callable(callable, &[one]).unwrap();
    b.ret(Some(r)).unwrap();
    module.add_function(b.finish()).unwrap();

    assert_rejected(&module, "apply", |e| {
        matches!(e, CompileError::UnknownCaptureLayout { .. })
    });
}

#[test]
fn test_callee_signature_mismatch() {
    let mut module = module_with_callees();
    let mut b = KernelBuilder::new("caller", Signature::unit());
    // `offset` expects a capture struct first.
    b.instantiate("offset", &[], unary()).unwrap();
    b.ret(None).unwrap();
    module.add_function(b.finish()).unwrap();

    assert_rejected(&module, "caller", |e| {
        matches!(e, CompileError::CallableSignature { .. })
    });
}

//! Lowering of kernel functions to calls against the runtime ABI.
//!
//! Each function is lowered independently, in program order, into one
//! [`LirFunction`]. The three operation families each live in their own
//! module:
//! - [`qubit`]: allocation, projection, measurement and release
//! - [`gate`]: direct and generalized-dispatch gate calls
//! - [`callable`]: the `{ code, capture }` pair convention
//!
//! Runtime entry points are declared in the output module the first time
//! a successfully lowered function uses them.

pub mod callable;
pub mod gate;
pub mod qubit;

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, instrument, warn};

use qlower_ir::{Function, Module, OpId, OpKind, Signature, Type};
use qlower_lir::{FnSig, FunctionBuilder, LirFunction, LirModule, LirType, RuntimeFn, Value};

use crate::error::{CompileError, CompileResult};
use crate::manager::{ModuleReport, PassManager};
use crate::property::PropertySet;

/// Target type of an IR type.
pub fn lir_type(ty: &Type) -> LirType {
    match ty {
        Type::Int(bits) => LirType::Int(*bits),
        Type::F64 => LirType::F64,
        Type::Bool => LirType::I1,
        Type::Ptr | Type::Ref | Type::Veq(_) => LirType::Ptr,
        Type::Struct(fields) => LirType::Struct(fields.iter().map(lir_type).collect()),
        Type::Callable(_) => LirType::callable_pair(),
    }
}

/// Target signature of an IR signature.
pub fn lir_signature(sig: &Signature) -> FnSig {
    FnSig::new(
        sig.params.iter().map(lir_type),
        sig.result.as_ref().map_or(LirType::Void, lir_type),
    )
}

/// Run the pass pipeline on `module`, then lower every function that
/// compiled.
///
/// Functions that fail a pass or fail to lower are left out of the output
/// and reported; the rest are unaffected.
pub fn compile_module(
    module: &mut Module,
    pm: &PassManager,
    properties: &mut PropertySet,
) -> (LirModule, ModuleReport) {
    let mut report = pm.run_module(module, properties);
    let skip: FxHashSet<String> = report.failures().map(|(name, _)| name.to_string()).collect();
    let (lowered, mut lowering) = lower_filtered(module, properties, |name| !skip.contains(name));
    for function in module.functions() {
        if let Some(result) = lowering.remove_result(function.name()) {
            report.record(function.name(), result);
        }
    }
    (lowered, report)
}

/// Lower every function of `module`.
pub fn lower_module(module: &Module, properties: &PropertySet) -> (LirModule, ModuleReport) {
    let (lowered, mut lowering) = lower_filtered(module, properties, |_| true);
    let mut report = ModuleReport::default();
    for function in module.functions() {
        if let Some(result) = lowering.remove_result(function.name()) {
            report.record(function.name(), result);
        }
    }
    (lowered, report)
}

/// Lowering outcomes by function name.
struct LoweringResults(FxHashMap<String, CompileResult<()>>);

impl LoweringResults {
    fn remove_result(&mut self, name: &str) -> Option<CompileResult<()>> {
        self.0.remove(name)
    }
}

#[instrument(skip_all, fields(module = module.name()))]
fn lower_filtered(
    module: &Module,
    properties: &PropertySet,
    include: impl Fn(&str) -> bool,
) -> (LirModule, LoweringResults) {
    let mut out = LirModule::new(module.name());
    let mut results = FxHashMap::default();
    for function in module.functions().filter(|f| include(f.name())) {
        let result = lower_function(function, module, properties).and_then(|lowered| {
            for (name, sig) in &lowered.declarations {
                out.declare(name, sig)?;
            }
            out.add_function(lowered.function)?;
            Ok(())
        });
        if let Err(err) = &result {
            warn!("Lowering '{}' failed: {}", function.name(), err);
        }
        results.insert(function.name().to_string(), result);
    }
    info!("Lowered {} functions", out.functions().count());
    (out, LoweringResults(results))
}

/// A lowered function and the external entry points it calls.
#[derive(Debug)]
pub struct LoweredFunction {
    /// The function body.
    pub function: LirFunction,
    /// Entry points to declare in the output module.
    pub declarations: BTreeMap<String, FnSig>,
}

/// Lower one function.
#[instrument(skip_all, fields(function = function.name()))]
pub fn lower_function(
    function: &Function,
    module: &Module,
    properties: &PropertySet,
) -> CompileResult<LoweredFunction> {
    if properties.options.check_capture_escape {
        callable::check_capture_escape(function)?;
    }

    let mut cx = LoweringContext::new(function, module, properties);
    cx.deferred = qubit::deferred_allocations(function)?;

    for (id, op) in function.ops() {
        match &op.kind {
            OpKind::Argument { index } => {
                cx.values.insert(id, Value::Param(*index));
            }
            OpKind::Constant { value } => {
                let bits = match &op.result {
                    Some(Type::Int(bits)) => *bits,
                    Some(Type::Bool) => 1,
                    _ => 64,
                };
                cx.values.insert(
                    id,
                    Value::Int {
                        value: *value,
                        bits,
                    },
                );
            }
            OpKind::ConstantFloat { value } => {
                cx.values.insert(id, Value::Float(*value));
            }
            OpKind::Alloca
            | OpKind::InitializeState
            | OpKind::Dealloc
            | OpKind::ExtractRef { .. }
            | OpKind::SubVeq { .. }
            | OpKind::VeqSize
            | OpKind::Measure
            | OpKind::Reset => qubit::lower(&mut cx, id)?,
            OpKind::Gate { .. } => gate::lower(&mut cx, id)?,
            OpKind::Instantiate { .. } => callable::lower_instantiate(&mut cx, id)?,
            OpKind::CallCallable => callable::lower_call(&mut cx, id)?,
            OpKind::StackSlot { ty } => {
                let slot = cx.builder.entry_alloca(lir_type(ty));
                cx.values.insert(id, slot);
            }
            OpKind::Load => {
                let ptr = cx.operand(id, 0)?;
                let ty = op.result.as_ref().map_or(LirType::Void, lir_type);
                let value = cx.builder.load(ty, ptr)?;
                cx.values.insert(id, value);
            }
            OpKind::Store => {
                let value = cx.operand(id, 0)?;
                let ptr = cx.operand(id, 1)?;
                cx.builder.store(value, ptr)?;
            }
            OpKind::Call { callee } => lower_direct_call(&mut cx, id, callee)?,
            OpKind::Return => {
                let value = match function.operand(id, 0) {
                    Some(def) => Some(cx.value(def)?),
                    None => None,
                };
                cx.builder.ret(value)?;
            }
        }
    }

    let current = cx.builder.current_block();
    if cx.builder.function().block(current).terminator.is_none() {
        if function.signature().result.is_some() {
            return Err(cx.unlowerable("return", "function ends without returning a value"));
        }
        cx.builder.ret(None)?;
    }

    let function_out = cx.builder.finish()?;
    debug!(
        "Lowered '{}' into {} blocks, {} instructions",
        function_out.name,
        function_out.blocks.len(),
        function_out.insts.len()
    );
    Ok(LoweredFunction {
        function: function_out,
        declarations: cx.declarations,
    })
}

fn lower_direct_call(cx: &mut LoweringContext<'_>, id: OpId, callee: &str) -> CompileResult<()> {
    let sig = cx
        .module
        .lookup_signature(callee)
        .ok_or_else(|| CompileError::UnknownSymbol(callee.to_string()))?;
    let sig = lir_signature(sig);
    let args = cx
        .function
        .operands(id)
        .into_iter()
        .map(|def| cx.value(def))
        .collect::<CompileResult<Vec<_>>>()?;
    if cx.module.function(callee).is_none() {
        cx.declare(callee, &sig)?;
    }
    let ret = sig.ret.clone();
    let value = cx.builder.call(callee, args, ret)?;
    if !sig.ret.is_void() {
        cx.values.insert(id, value);
    }
    Ok(())
}

/// State threaded through the lowering of one function.
pub(crate) struct LoweringContext<'a> {
    /// The function being lowered.
    pub(crate) function: &'a Function,
    /// The module it belongs to, for callee signatures.
    pub(crate) module: &'a Module,
    /// Options and ABI table.
    pub(crate) properties: &'a PropertySet,
    /// Output under construction.
    pub(crate) builder: FunctionBuilder,
    /// Lowered value of every op with a result.
    pub(crate) values: FxHashMap<OpId, Value>,
    /// Entry points used so far.
    pub(crate) declarations: BTreeMap<String, FnSig>,
    /// Allocations lowered together with their `init_state`.
    pub(crate) deferred: FxHashSet<OpId>,
}

impl<'a> LoweringContext<'a> {
    fn new(function: &'a Function, module: &'a Module, properties: &'a PropertySet) -> Self {
        Self {
            function,
            module,
            properties,
            builder: FunctionBuilder::new(function.name(), lir_signature(function.signature())),
            values: FxHashMap::default(),
            declarations: BTreeMap::new(),
            deferred: FxHashSet::default(),
        }
    }

    /// Lowered value of `def`.
    pub(crate) fn value(&self, def: OpId) -> CompileResult<Value> {
        self.values.get(&def).cloned().ok_or_else(|| {
            let name = self.function.op(def).map_or("unknown", |op| op.name());
            self.unlowerable(name, format!("{def:?} has no lowered value"))
        })
    }

    /// Lowered value of operand `slot` of `id`.
    pub(crate) fn operand(&self, id: OpId, slot: u32) -> CompileResult<Value> {
        let def = self
            .function
            .operand(id, slot)
            .ok_or(qlower_ir::IrError::InvalidOperand { op: id, slot })?;
        self.value(def)
    }

    /// Record that `name` must be declared with `sig`.
    pub(crate) fn declare(&mut self, name: &str, sig: &FnSig) -> CompileResult<()> {
        match self.declarations.get(name) {
            Some(existing) if existing != sig => Err(qlower_lir::LirError::ConflictingDeclaration {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: sig.to_string(),
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                self.declarations.insert(name.to_string(), sig.clone());
                Ok(())
            }
        }
    }

    /// Call a runtime entry point, declaring it.
    pub(crate) fn call_runtime(&mut self, f: RuntimeFn, args: Vec<Value>) -> CompileResult<Value> {
        let name = self.properties.abi.runtime_name(f).to_string();
        let sig = f.signature();
        self.declare(&name, &sig)?;
        Ok(self.builder.call(&name, args, sig.ret)?)
    }

    pub(crate) fn unlowerable(&self, op: &'static str, reason: impl Into<String>) -> CompileError {
        CompileError::Unlowerable {
            function: self.function.name().to_string(),
            op,
            reason: reason.into(),
        }
    }
}

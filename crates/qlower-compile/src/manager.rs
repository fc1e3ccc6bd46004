//! Pass manager for orchestrating compilation.

use tracing::{debug, info, instrument, warn};

use qlower_ir::{Function, Module};
use qlower_lir::AbiTable;

use crate::error::{CompileError, CompileResult};
use crate::pass::Pass;
use crate::passes::{FactorQuantumAllocs, IrVerification, ScalarizeDeallocs};
use crate::property::{LoweringOptions, PropertySet};

/// Manages and executes a sequence of compilation passes.
pub struct PassManager {
    /// The passes to execute, in order.
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Create a new empty pass manager.
    pub fn new() -> Self {
        Self { passes: vec![] }
    }

    /// Add a pass to the manager.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Run all passes on one function.
    ///
    /// Stops at the first failing pass; earlier rewrites are kept.
    #[instrument(skip(self, function, properties), fields(function = function.name()))]
    pub fn run(&self, function: &mut Function, properties: &mut PropertySet) -> CompileResult<()> {
        debug!(
            "Running {} passes on function with {} ops",
            self.passes.len(),
            function.num_ops()
        );

        for pass in &self.passes {
            if pass.should_run(function, properties) {
                debug!("Running pass: {}", pass.name());
                pass.run(function, properties)?;
                debug!("Pass {} completed, ops: {}", pass.name(), function.num_ops());
            } else {
                debug!("Skipping pass: {}", pass.name());
            }
        }
        Ok(())
    }

    /// Run all passes on every function of a module.
    ///
    /// Failures are scoped to the function they occur in: a failing
    /// function stops its own pass list, the others still run.
    #[instrument(skip(self, module, properties), fields(module = module.name()))]
    pub fn run_module(&self, module: &mut Module, properties: &mut PropertySet) -> ModuleReport {
        let mut report = ModuleReport::default();
        for function in module.functions_mut() {
            let result = self.run(function, properties);
            if let Err(err) = &result {
                warn!("Function '{}' failed: {}", function.name(), err);
            }
            report.record(function.name(), result);
        }
        info!(
            "Pass manager completed: {} functions, {} failed",
            report.len(),
            report.failures().count()
        );
        report
    }

    /// Get the number of passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the manager has no passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-function outcome of a module compilation, in module order.
#[derive(Debug, Default)]
pub struct ModuleReport {
    results: Vec<(String, CompileResult<()>)>,
}

impl ModuleReport {
    /// Record the outcome for a function, replacing a success with a
    /// later failure.
    pub fn record(&mut self, function: &str, result: CompileResult<()>) {
        match self.results.iter_mut().find(|(name, _)| name == function) {
            Some((_, existing)) => {
                if existing.is_ok() {
                    *existing = result;
                }
            }
            None => self.results.push((function.to_string(), result)),
        }
    }

    /// Outcome for a function.
    pub fn result(&self, function: &str) -> Option<&CompileResult<()>> {
        self.results
            .iter()
            .find(|(name, _)| name == function)
            .map(|(_, r)| r)
    }

    /// Check if a function compiled without error.
    pub fn succeeded(&self, function: &str) -> bool {
        matches!(self.result(function), Some(Ok(())))
    }

    /// Functions that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CompileError)> {
        self.results.iter().filter_map(|(name, r)| match r {
            Ok(()) => None,
            Err(err) => Some((name.as_str(), err)),
        })
    }

    /// Check if every function compiled.
    pub fn is_ok(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Number of functions reported.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if no function was reported.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Builder for the standard pipeline.
pub struct PassManagerBuilder {
    /// Properties handed to the passes.
    properties: PropertySet,
}

impl PassManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            properties: PropertySet::new(),
        }
    }

    /// Set the pipeline options.
    #[must_use]
    pub fn with_options(mut self, options: LoweringOptions) -> Self {
        self.properties.options = options;
        self
    }

    /// Set the runtime ABI table.
    #[must_use]
    pub fn with_abi(mut self, abi: AbiTable) -> Self {
        self.properties.abi = abi;
        self
    }

    /// Set all properties.
    #[must_use]
    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }

    /// Build the pass manager and return it with the properties.
    ///
    /// Scalarization always runs before factoring; factoring is skipped at
    /// run time when `factor_allocations` is off.
    pub fn build(self) -> (PassManager, PropertySet) {
        let mut pm = PassManager::new();
        pm.add_pass(ScalarizeDeallocs);
        pm.add_pass(FactorQuantumAllocs);
        pm.add_pass(IrVerification);
        (pm, self.properties)
    }
}

impl Default for PassManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

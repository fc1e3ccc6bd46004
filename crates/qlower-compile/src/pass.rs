//! Pass trait and types for compilation passes.

use qlower_ir::Function;

use crate::error::CompileResult;
use crate::property::PropertySet;

/// The kind of compilation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Analysis pass that reads but does not modify the function.
    Analysis,
    /// Transformation pass that modifies the function.
    Transformation,
}

/// A compilation pass that operates on one function body.
///
/// Each function is an independent unit of work: a pass sees one body at
/// a time and shares only the [`PropertySet`] with the passes around it.
pub trait Pass: Send + Sync {
    /// Get the name of this pass.
    fn name(&self) -> &str;

    /// Get the kind of this pass.
    fn kind(&self) -> PassKind;

    /// Run the pass on the given function.
    ///
    /// Analysis passes must leave the body untouched but may record
    /// results in the `PropertySet`.
    fn run(&self, function: &mut Function, properties: &mut PropertySet) -> CompileResult<()>;

    /// Check if this pass should run based on current state.
    fn should_run(&self, _function: &Function, _properties: &PropertySet) -> bool {
        true
    }
}

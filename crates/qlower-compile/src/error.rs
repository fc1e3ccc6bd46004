//! Error types for the compilation crate.

use qlower_ir::OpId;
use thiserror::Error;

/// Errors that can occur during compilation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// Error from the IR crate.
    #[error("IR error: {0}")]
    Ir(#[from] qlower_ir::IrError),

    /// Error from the target representation.
    #[error("Target error: {0}")]
    Lir(#[from] qlower_lir::LirError),

    /// Malformed JSON configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// An index classified as constant could not be resolved, or fell
    /// outside the allocation, while factoring.
    #[error("Allocation factoring failed in '{function}': {reason}")]
    FactoringFailed { function: String, reason: String },

    /// A callable built from a runtime function pointer.
    #[error("Callable {op:?} in '{function}' is built from a non-static function value")]
    UnsupportedCallableValue { function: String, op: OpId },

    /// Capture storage would outlive the frame that owns it.
    #[error("Capture storage of callable {op:?} in '{function}' escapes through {via}")]
    EscapingCapture {
        function: String,
        op: OpId,
        via: &'static str,
    },

    /// The capture payload of a called callable cannot be determined.
    #[error("Capture layout of callable {op:?} in '{function}' is not known at the call site")]
    UnknownCaptureLayout { function: String, op: OpId },

    /// The callee of a callable does not accept its captures and arguments.
    #[error("Callee '{callee}' does not match its callable: {reason}")]
    CallableSignature { callee: String, reason: String },

    /// Gate applied with the wrong number of targets or rotations.
    #[error(
        "Gate '{gate}' takes {expected_targets} targets and {expected_params} rotations, got {targets} and {params}"
    )]
    GateArity {
        gate: String,
        expected_targets: u32,
        expected_params: u32,
        targets: u32,
        params: u32,
    },

    /// The ABI table has no entry point for a gate form.
    #[error("No runtime entry point for '{0}'")]
    UnknownEntryPoint(String),

    /// A called symbol is neither defined nor declared.
    #[error("Unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// An operation that cannot be expressed against the runtime ABI.
    #[error("Cannot lower '{op}' in '{function}': {reason}")]
    Unlowerable {
        function: String,
        op: &'static str,
        reason: String,
    },

    /// Pass execution failed.
    #[error("Pass '{name}' failed: {reason}")]
    PassFailed { name: String, reason: String },
}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;

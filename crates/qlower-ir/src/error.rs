//! Error types for the IR crate.

use thiserror::Error;

use crate::function::OpId;

/// Errors that can occur in IR operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IrError {
    /// Operation not found in the function body.
    #[error("Operation %{} not found in function{}", .op.index(), format_fn_context(.function))]
    OpNotFound {
        /// The operation that was not found.
        op: OpId,
        /// Optional function name for context.
        function: Option<String>,
    },

    /// Attempted to erase an operation whose result is still used.
    #[error("Cannot erase %{} while it still has {users} user(s)", .op.index())]
    OpHasUsers {
        /// The operation that still has users.
        op: OpId,
        /// Number of remaining users.
        users: usize,
    },

    /// Operand slot out of range for the operation.
    #[error("Operation %{} has no operand slot {slot}", .op.index())]
    InvalidOperand {
        /// The operation.
        op: OpId,
        /// The requested slot.
        slot: u32,
    },

    /// An operand has the wrong type for the operation consuming it.
    #[error("Type mismatch at %{}: expected {expected}, got {got}", .op.index())]
    TypeMismatch {
        /// The consuming operation.
        op: OpId,
        /// Human readable description of the expected type.
        expected: String,
        /// The type that was found.
        got: String,
    },

    /// Operation has the wrong number of operands.
    #[error("Operation %{} ({name}) expects {expected} operands, got {got}", .op.index())]
    OperandCountMismatch {
        /// The operation.
        op: OpId,
        /// Mnemonic of the operation.
        name: &'static str,
        /// Expected operand count.
        expected: usize,
        /// Actual operand count.
        got: usize,
    },

    /// A value is used before it is defined in body order.
    #[error("Operand %{} of %{} does not dominate its use", .def.index(), .user.index())]
    UseBeforeDef {
        /// The defining operation.
        def: OpId,
        /// The using operation.
        user: OpId,
    },

    /// Function name is not unique within the module.
    #[error("Duplicate symbol '{0}' in module")]
    DuplicateSymbol(String),

    /// Malformed function body.
    #[error("Invalid function body: {0}")]
    InvalidBody(String),
}

/// Helper function to format optional function context.
#[allow(clippy::ref_option)]
fn format_fn_context(function: &Option<String>) -> String {
    match function {
        Some(name) => format!(" (function: {name})"),
        None => String::new(),
    }
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;

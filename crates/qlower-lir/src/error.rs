//! Error types for the target representation.

use thiserror::Error;

/// Errors that can occur while building target code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LirError {
    /// Instruction appended to a block that already has a terminator.
    #[error("Block '{0}' is already terminated")]
    BlockTerminated(String),

    /// A block was left without a terminator.
    #[error("Block '{block}' in function '{function}' has no terminator")]
    UnterminatedBlock {
        /// Function name.
        function: String,
        /// Block label.
        block: String,
    },

    /// The same symbol was declared with two different signatures.
    #[error("Conflicting declarations for '{name}': {existing} vs {requested}")]
    ConflictingDeclaration {
        /// Symbol name.
        name: String,
        /// Signature already declared.
        existing: String,
        /// Signature requested now.
        requested: String,
    },

    /// A function with the same name was already added.
    #[error("Duplicate function '{0}'")]
    DuplicateFunction(String),
}

/// Result type for target code construction.
pub type LirResult<T> = Result<T, LirError>;

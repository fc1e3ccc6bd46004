//! Built-in compilation passes.
//!
//! Passes run per function in this order:
//! - [`ScalarizeDeallocs`]: per-qubit deallocation of sized vectors
//! - [`FactorQuantumAllocs`]: split sized vector allocations into scalars
//! - [`IrVerification`]: structural and allocation-balance checks

pub mod factor;
pub mod scalarize;
pub mod verification;

pub use factor::{FactorQuantumAllocs, FactoringStats, all_uses_convertible, factorable_allocations};
pub use scalarize::{ScalarizeDeallocs, ScalarizeStats};
pub use verification::{IrVerification, VerificationResult};

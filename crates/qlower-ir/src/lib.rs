//! Quantum Kernel Intermediate Representation
//!
//! This crate provides the data model shared by the allocation-factoring
//! and runtime-lowering passes in `qlower-compile`.
//!
//! # Overview
//!
//! A [`Function`] is an arena of [`Operation`]s with explicit use-def
//! edges: every operation knows its operands and its users, and indices
//! ([`OpId`]) stay stable when other operations are erased. Program order
//! is kept separately, so rewrites can insert before an anchor and replace
//! uses without renumbering.
//!
//! # Core Components
//!
//! - **Types**: [`Type`] covers qubit handles (`ref`), qubit vectors
//!   (`veq<N>` / `veq<?>`), scalars, capture aggregates and callables
//! - **Gates**: [`GateKind`] with per-gate target and rotation arity
//! - **Operations**: [`OpKind`] / [`Operation`] for allocation, projection,
//!   gate application, measurement, callables and memory
//! - **Functions and modules**: [`Function`], [`Module`], [`ExternDecl`]
//! - **Builder**: [`KernelBuilder`] for constructing bodies in order
//!
//! # Example: Factorable Allocation
//!
//! ```rust
//! use qlower_ir::{KernelBuilder, Signature};
//!
//! let mut b = KernelBuilder::new("ghz", Signature::unit());
//! let q = b.alloca_veq(3).unwrap();
//! let q0 = b.extract(q, 0).unwrap();
//! let q1 = b.extract(q, 1).unwrap();
//! let q2 = b.extract(q, 2).unwrap();
//! b.h(q0).unwrap();
//! b.x(&[q0], q1).unwrap();
//! b.x(&[q1], q2).unwrap();
//! b.dealloc(q).unwrap();
//! b.ret(None).unwrap();
//!
//! let kernel = b.finish();
//! kernel.verify().unwrap();
//! assert_eq!(kernel.users(q).len(), 4);
//! ```

pub mod builder;
pub mod error;
pub mod function;
pub mod gate;
pub mod module;
pub mod op;
pub mod types;

pub use builder::KernelBuilder;
pub use error::{IrError, IrResult};
pub use function::{Function, FunctionDump, OpDump, OpId, Use};
pub use gate::GateKind;
pub use module::{ExternDecl, Module};
pub use op::{Callee, Index, OpKind, Operation};
pub use types::{Signature, Type};

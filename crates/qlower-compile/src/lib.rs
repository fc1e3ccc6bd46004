//! Quantum Allocation Factoring and Runtime Lowering
//!
//! This crate turns kernel functions from `qlower-ir` into calls against
//! the external quantum runtime ABI, expressed in the `qlower-lir` target
//! representation.
//!
//! # Architecture
//!
//! ```text
//! Kernel Module (qlower-ir)
//!       │
//!       ▼
//! ┌─────────────┐
//! │ PassManager │ ◄── PropertySet (LoweringOptions, AbiTable, stats)
//! └─────────────┘
//!       │   per function:
//!       ├── ScalarizeDeallocs     dealloc veq<N> → N × dealloc ref
//!       ├── FactorQuantumAllocs   alloca veq<N>  → N × alloca ref
//!       └── IrVerification
//!       │
//!       ▼
//! ┌─────────────┐
//! │  lowering   │ qubit ops, gates, callables → runtime calls
//! └─────────────┘
//!       │
//!       ▼
//! LirModule (qlower-lir)
//! ```
//!
//! Functions are independent units: a function that fails a pass or fails
//! to lower is reported in the [`ModuleReport`] and left out of the
//! output, and its siblings are unaffected.
//!
//! # Example
//!
//! ```rust
//! use qlower_compile::{PassManagerBuilder, compile_module};
//! use qlower_ir::{KernelBuilder, Module, Signature};
//!
//! let mut b = KernelBuilder::new("bell", Signature::unit());
//! let q = b.alloca_veq(2).unwrap();
//! let q0 = b.extract(q, 0).unwrap();
//! let q1 = b.extract(q, 1).unwrap();
//! b.h(q0).unwrap();
//! b.x(&[q0], q1).unwrap();
//! b.dealloc(q).unwrap();
//! b.ret(None).unwrap();
//!
//! let mut module = Module::new("demo");
//! module.add_function(b.finish()).unwrap();
//!
//! let (pm, mut props) = PassManagerBuilder::new().build();
//! let (lowered, report) = compile_module(&mut module, &pm, &mut props);
//! assert!(report.is_ok());
//!
//! // The vector was factored into two independently allocated qubits.
//! let bell = lowered.function("bell").unwrap();
//! assert_eq!(bell.calls_to("__quantum__rt__qubit_allocate").count(), 2);
//! assert_eq!(bell.calls_to("__quantum__qis__x__ctl").count(), 1);
//! ```
//!
//! # Custom Passes
//!
//! ```rust
//! use qlower_compile::{CompileResult, Pass, PassKind, PropertySet};
//! use qlower_ir::Function;
//!
//! struct CountOps;
//!
//! impl Pass for CountOps {
//!     fn name(&self) -> &str { "count_ops" }
//!     fn kind(&self) -> PassKind { PassKind::Analysis }
//!
//!     fn run(&self, function: &mut Function, props: &mut PropertySet) -> CompileResult<()> {
//!         let ops = function.num_ops();
//!         props.update::<usize>(|n| *n += ops);
//!         Ok(())
//!     }
//! }
//! ```

pub mod error;
pub mod lower;
pub mod manager;
pub mod pass;
pub mod property;

// Built-in passes
pub mod passes;

pub use error::{CompileError, CompileResult};
pub use lower::{LoweredFunction, compile_module, lower_function, lower_module};
pub use manager::{ModuleReport, PassManager, PassManagerBuilder};
pub use pass::{Pass, PassKind};
pub use property::{LoweringOptions, PropertySet};

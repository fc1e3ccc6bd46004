//! Low-level target representation
//!
//! The output form of lowering: functions made of typed basic blocks with
//! calls, branches and value merges, plus the [`AbiTable`] naming the
//! external quantum runtime entry points those calls target.
//!
//! # Example
//!
//! ```rust
//! use qlower_lir::{AbiTable, FnSig, FunctionBuilder, LirModule, LirType, RuntimeFn, Value};
//!
//! let abi = AbiTable::qir();
//! let alloc = RuntimeFn::QubitAllocateArray;
//!
//! let mut module = LirModule::new("demo");
//! module.declare(abi.runtime_name(alloc), &alloc.signature()).unwrap();
//!
//! let mut b = FunctionBuilder::new("kernel", FnSig::new([], LirType::Void));
//! b.call(abi.runtime_name(alloc), vec![Value::i64(2)], LirType::Ptr).unwrap();
//! b.ret(None).unwrap();
//! module.add_function(b.finish().unwrap()).unwrap();
//!
//! assert!(module.to_string().contains("call ptr @__quantum__rt__qubit_allocate_array(i64 2)"));
//! ```

pub mod abi;
pub mod builder;
pub mod error;
pub mod function;
pub mod module;
pub mod types;

pub use abi::{AbiTable, ElementAccess, GateEntryPoints, RuntimeFn};
pub use builder::FunctionBuilder;
pub use error::{LirError, LirResult};
pub use function::{Block, BlockId, Callee, Inst, InstId, InstKind, LirFunction, Terminator, Value};
pub use module::LirModule;
pub use types::{FnSig, LirType};

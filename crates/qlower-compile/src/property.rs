//! `PropertySet` and lowering configuration.
//!
//! The [`PropertySet`] is the shared context handed to every pass and to
//! the lowering driver. It carries the [`LoweringOptions`], the runtime
//! [`AbiTable`], and arbitrary typed properties that passes use to report
//! statistics.
//!
//! # Examples
//!
//! ## Loading options from JSON
//!
//! ```
//! use qlower_compile::{LoweringOptions, PropertySet};
//!
//! let options = LoweringOptions::from_json(r#"{"factor_allocations": false}"#).unwrap();
//! assert!(!options.factor_allocations);
//! assert!(options.elide_known_captures);
//!
//! let props = PropertySet::new().with_options(options);
//! assert!(!props.options.factor_allocations);
//! ```
//!
//! ## Custom properties for pass communication
//!
//! ```
//! use qlower_compile::PropertySet;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct GateCount(usize);
//!
//! let mut props = PropertySet::new();
//! props.insert(GateCount(12));
//! assert_eq!(props.get::<GateCount>(), Some(&GateCount(12)));
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};

use qlower_lir::AbiTable;

use crate::error::CompileResult;

/// Switches controlling optional pipeline behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringOptions {
    /// Run allocation factoring.
    pub factor_allocations: bool,
    /// Call the callee directly when a callable is instantiated in the
    /// same body it is invoked from.
    pub elide_known_captures: bool,
    /// Reject capturing callables whose storage may outlive the frame.
    pub check_capture_escape: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            factor_allocations: true,
            elide_known_captures: true,
            check_capture_escape: true,
        }
    }
}

impl LoweringOptions {
    /// Parse options from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A set of properties shared between passes.
#[derive(Debug, Default)]
pub struct PropertySet {
    /// Pipeline switches.
    pub options: LoweringOptions,

    /// Runtime entry points used by lowering.
    pub abi: AbiTable,

    /// Custom properties storage (type-erased).
    custom: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PropertySet {
    /// Create a property set with default options and the QIR table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pipeline options.
    #[must_use]
    pub fn with_options(mut self, options: LoweringOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the runtime ABI table.
    #[must_use]
    pub fn with_abi(mut self, abi: AbiTable) -> Self {
        self.abi = abi;
        self
    }

    /// Insert a custom property.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.custom.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a custom property.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.custom
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Get a mutable custom property.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.custom
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Remove a custom property.
    pub fn remove<T: Any>(&mut self) -> Option<T> {
        self.custom
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }

    /// Apply `update` to a custom property, starting from its default.
    pub fn update<T: Any + Send + Sync + Default>(&mut self, update: impl FnOnce(&mut T)) {
        let mut value = self.remove::<T>().unwrap_or_default();
        update(&mut value);
        self.insert(value);
    }
}

//! Compilation units: functions plus external declarations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::function::Function;
use crate::types::Signature;

/// An external function known only by its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternDecl {
    /// Symbol name.
    pub name: String,
    /// Signature.
    pub signature: Signature,
}

/// A module of kernel functions and external declarations.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name.
    name: String,
    /// Defined functions, in insertion order.
    functions: Vec<Function>,
    /// External declarations by name.
    externs: BTreeMap<String, ExternDecl>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a function definition.
    pub fn add_function(&mut self, function: Function) -> IrResult<()> {
        if self.lookup_signature(function.name()).is_some() {
            return Err(IrError::DuplicateSymbol(function.name().to_string()));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Declare an external function.
    pub fn declare_extern(&mut self, name: impl Into<String>, signature: Signature) -> IrResult<()> {
        let name = name.into();
        if self.lookup_signature(&name).is_some() {
            return Err(IrError::DuplicateSymbol(name));
        }
        self.externs.insert(
            name.clone(),
            ExternDecl {
                name,
                signature,
            },
        );
        Ok(())
    }

    /// Get a function definition by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Get a mutable function definition by name.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name() == name)
    }

    /// Iterate over function definitions.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    /// Iterate mutably over function definitions.
    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut()
    }

    /// Iterate over external declarations, sorted by name.
    pub fn externs(&self) -> impl Iterator<Item = &ExternDecl> {
        self.externs.values()
    }

    /// Signature of a defined or declared symbol.
    pub fn lookup_signature(&self, name: &str) -> Option<&Signature> {
        self.function(name)
            .map(Function::signature)
            .or_else(|| self.externs.get(name).map(|d| &d.signature))
    }

    /// Verify every function body.
    pub fn verify(&self) -> IrResult<()> {
        self.functions.iter().try_for_each(Function::verify)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module @{}", self.name)?;
        for decl in self.externs.values() {
            writeln!(f, "extern @{}{}", decl.name, decl.signature)?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

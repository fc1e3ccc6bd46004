//! Output modules: declarations plus defined functions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LirError, LirResult};
use crate::function::LirFunction;
use crate::types::FnSig;

/// A module in the target representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LirModule {
    /// Module name.
    pub name: String,
    /// External declarations by name.
    declarations: BTreeMap<String, FnSig>,
    /// Defined functions, in insertion order.
    functions: Vec<LirFunction>,
}

impl LirModule {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare an external function.
    ///
    /// Declaring the same name twice with the same signature is a no-op;
    /// a different signature is an error.
    pub fn declare(&mut self, name: &str, sig: &FnSig) -> LirResult<()> {
        match self.declarations.get(name) {
            Some(existing) if existing == sig => Ok(()),
            Some(existing) => Err(LirError::ConflictingDeclaration {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: sig.to_string(),
            }),
            None => {
                self.declarations.insert(name.to_string(), sig.clone());
                Ok(())
            }
        }
    }

    /// Add a defined function.
    pub fn add_function(&mut self, function: LirFunction) -> LirResult<()> {
        if self.function(&function.name).is_some() {
            return Err(LirError::DuplicateFunction(function.name));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Get a defined function by name.
    pub fn function(&self, name: &str) -> Option<&LirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Iterate over defined functions.
    pub fn functions(&self) -> impl Iterator<Item = &LirFunction> {
        self.functions.iter()
    }

    /// Signature of a declared function.
    pub fn declaration(&self, name: &str) -> Option<&FnSig> {
        self.declarations.get(name)
    }

    /// Iterate over declarations, sorted by name.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, &FnSig)> {
        self.declarations.iter().map(|(n, s)| (n.as_str(), s))
    }
}

impl fmt::Display for LirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for (name, sig) in &self.declarations {
            write!(f, "declare {} @{name}(", sig.ret)?;
            for (i, param) in sig.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{param}")?;
            }
            if sig.variadic {
                write!(f, ", ...")?;
            }
            writeln!(f, ")")?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LirType;

    #[test]
    fn test_declare_is_idempotent() {
        let mut m = LirModule::new("m");
        let sig = FnSig::new([LirType::I64], LirType::Ptr);
        m.declare("alloc", &sig).unwrap();
        m.declare("alloc", &sig).unwrap();
        assert_eq!(m.declarations().count(), 1);

        let other = FnSig::new([LirType::I32], LirType::Ptr);
        assert!(matches!(
            m.declare("alloc", &other),
            Err(LirError::ConflictingDeclaration { .. })
        ));
    }

    #[test]
    fn test_display_variadic_declaration() {
        let mut m = LirModule::new("m");
        m.declare("dispatch", &FnSig::variadic([LirType::I64], LirType::Void))
            .unwrap();
        assert!(m.to_string().contains("declare void @dispatch(i64, ...)"));
    }
}

//! Value types for the quantum kernel IR.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a value produced by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Signless integer of the given bit width.
    Int(u32),
    /// 64-bit IEEE float.
    F64,
    /// Boolean (measurement outcome).
    Bool,
    /// Opaque pointer.
    Ptr,
    /// Handle to a single qubit.
    Ref,
    /// Ordered vector of qubit handles.
    ///
    /// `Some(n)` carries a compile-time size, `None` means the size is
    /// only known at runtime.
    Veq(Option<u64>),
    /// Ordered aggregate of values (capture payloads).
    Struct(Vec<Type>),
    /// First-class callable with the given explicit signature.
    Callable(Box<Signature>),
}

impl Type {
    /// The 64-bit integer type used for indices and sizes.
    pub const I64: Type = Type::Int(64);

    /// A qubit vector of compile-time size `n`.
    pub fn veq(n: u64) -> Self {
        Type::Veq(Some(n))
    }

    /// A qubit vector whose size is only known at runtime.
    pub fn veq_dynamic() -> Self {
        Type::Veq(None)
    }

    /// A callable type with the given explicit signature.
    pub fn callable(signature: Signature) -> Self {
        Type::Callable(Box::new(signature))
    }

    /// Check if this is a qubit vector.
    #[inline]
    pub fn is_veq(&self) -> bool {
        matches!(self, Type::Veq(_))
    }

    /// Check if this is a single qubit handle.
    #[inline]
    pub fn is_ref(&self) -> bool {
        matches!(self, Type::Ref)
    }

    /// Check if this is a quantum handle of either kind.
    #[inline]
    pub fn is_quantum(&self) -> bool {
        matches!(self, Type::Ref | Type::Veq(_))
    }

    /// Compile-time size of a qubit vector, if specified.
    #[inline]
    pub fn veq_size(&self) -> Option<u64> {
        match self {
            Type::Veq(size) => *size,
            _ => None,
        }
    }

    /// Signature of a callable type.
    pub fn as_callable(&self) -> Option<&Signature> {
        match self {
            Type::Callable(sig) => Some(sig),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::F64 => write!(f, "f64"),
            Type::Bool => write!(f, "bool"),
            Type::Ptr => write!(f, "ptr"),
            Type::Ref => write!(f, "ref"),
            Type::Veq(Some(n)) => write!(f, "veq<{n}>"),
            Type::Veq(None) => write!(f, "veq<?>"),
            Type::Struct(fields) => {
                write!(f, "struct<")?;
                write_list(f, fields)?;
                write!(f, ">")
            }
            Type::Callable(sig) => write!(f, "callable<{sig}>"),
        }
    }
}

/// Function or callable signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types, in order.
    pub params: Vec<Type>,
    /// Result type, if the function returns a value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Type>,
}

impl Signature {
    /// Create a signature.
    pub fn new(params: impl IntoIterator<Item = Type>, result: Option<Type>) -> Self {
        Self {
            params: params.into_iter().collect(),
            result,
        }
    }

    /// A signature with no parameters and no result.
    pub fn unit() -> Self {
        Self::default()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        write_list(f, &self.params)?;
        write!(f, ")")?;
        if let Some(result) = &self.result {
            write!(f, " -> {result}")?;
        }
        Ok(())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::veq(3).to_string(), "veq<3>");
        assert_eq!(Type::veq_dynamic().to_string(), "veq<?>");
        assert_eq!(Type::I64.to_string(), "i64");

        let sig = Signature::new([Type::Ref, Type::F64], None);
        assert_eq!(Type::callable(sig).to_string(), "callable<(ref, f64)>");
    }

    #[test]
    fn test_veq_size() {
        assert_eq!(Type::veq(5).veq_size(), Some(5));
        assert_eq!(Type::veq_dynamic().veq_size(), None);
        assert_eq!(Type::Ref.veq_size(), None);
        assert!(Type::Ref.is_quantum());
        assert!(!Type::F64.is_quantum());
    }
}

//! Target value types and function signatures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a target value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LirType {
    /// No value.
    Void,
    /// Integer of the given bit width.
    Int(u32),
    /// 64-bit float.
    F64,
    /// Opaque pointer.
    Ptr,
    /// Literal struct.
    Struct(Vec<LirType>),
}

impl LirType {
    /// Boolean.
    pub const I1: LirType = LirType::Int(1);
    /// 32-bit integer.
    pub const I32: LirType = LirType::Int(32);
    /// 64-bit integer.
    pub const I64: LirType = LirType::Int(64);

    /// The `{ code, capture }` pointer pair every callable lowers to.
    pub fn callable_pair() -> Self {
        LirType::Struct(vec![LirType::Ptr, LirType::Ptr])
    }

    /// Check if this is `void`.
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, LirType::Void)
    }
}

impl fmt::Display for LirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirType::Void => write!(f, "void"),
            LirType::Int(bits) => write!(f, "i{bits}"),
            LirType::F64 => write!(f, "double"),
            LirType::Ptr => write!(f, "ptr"),
            LirType::Struct(fields) if fields.is_empty() => write!(f, "{{}}"),
            LirType::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnSig {
    /// Fixed parameter types.
    pub params: Vec<LirType>,
    /// Return type.
    pub ret: LirType,
    /// Accepts additional arguments after the fixed ones.
    #[serde(default)]
    pub variadic: bool,
}

impl FnSig {
    /// Create a non-variadic signature.
    pub fn new(params: impl IntoIterator<Item = LirType>, ret: LirType) -> Self {
        Self {
            params: params.into_iter().collect(),
            ret,
            variadic: false,
        }
    }

    /// Create a variadic signature.
    pub fn variadic(params: impl IntoIterator<Item = LirType>, ret: LirType) -> Self {
        Self {
            variadic: true,
            ..Self::new(params, ret)
        }
    }
}

impl fmt::Display for FnSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

//! Runtime values that can live in a constant pool.

use crate::bytecode::BytecodeFunction;
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::{borrow::Borrow, fmt, hash, mem, ops::Deref};
use itertools::Itertools;
use malachite_bigint::BigInt;
use num_traits::ToPrimitive;

/// An interned-by-value method or constant name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self(name.into())
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Describes one dynamic call site. The VM pairs every instance with its own
/// inline cache cell, so two sites never share a `CallSiteInfo` even when the
/// name and arity match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteInfo {
    pub name: Symbol,
    pub argument_count: u32,
}

impl CallSiteInfo {
    pub fn new(name: impl Into<Symbol>, argument_count: u32) -> Self {
        Self {
            name: name.into(),
            argument_count,
        }
    }
}

impl fmt::Display for CallSiteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallSiteInfo{{name: {:?}, argument_count: {}}}",
            self.name, self.argument_count
        )
    }
}

/// A runtime value as it appears in a constant pool.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    /// The default integer type while its magnitude fits a machine word.
    SmallInt(i64),
    /// The default integer type outside the `i64` range. Never holds a value
    /// that would fit `SmallInt`; build integers through [`Value::int`].
    BigInt(Box<BigInt>),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f64),
    Float32(f32),
    String(String),
    Char(char),
    Symbol(Symbol),
    Tuple(Vec<Value>),
    Function(Arc<BytecodeFunction>),
    CallSite(Arc<CallSiteInfo>),
}

impl Value {
    /// Builds a default integer, demoting to the machine-word form when it fits.
    pub fn int(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::SmallInt(small),
            None => Self::BigInt(Box::new(value)),
        }
    }

    /// Widens a default integer to arbitrary precision.
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Self::SmallInt(v) => Some(BigInt::from(*v)),
            Self::BigInt(v) => Some((**v).clone()),
            _ => None,
        }
    }

    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// Name of the standard class this value is an instance of.
    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::Nil => "Std::Nil",
            Self::Bool(true) => "Std::True",
            Self::Bool(false) => "Std::False",
            Self::SmallInt(_) | Self::BigInt(_) => "Std::Int",
            Self::Int8(_) => "Std::Int8",
            Self::Int16(_) => "Std::Int16",
            Self::Int32(_) => "Std::Int32",
            Self::Int64(_) => "Std::Int64",
            Self::UInt8(_) => "Std::UInt8",
            Self::UInt16(_) => "Std::UInt16",
            Self::UInt32(_) => "Std::UInt32",
            Self::UInt64(_) => "Std::UInt64",
            Self::Float(_) => "Std::Float",
            Self::Float32(_) => "Std::Float32",
            Self::String(_) => "Std::String",
            Self::Char(_) => "Std::Char",
            Self::Symbol(_) => "Std::Symbol",
            Self::Tuple(_) => "Std::Tuple",
            Self::Function(_) => "Std::Function",
            Self::CallSite(_) => "Std::CallSiteInfo",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::SmallInt(value)
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Self::int(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (SmallInt(a), SmallInt(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Int8(a), Int8(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt8(a), UInt8(b)) => a == b,
            (UInt16(a), UInt16(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            // pool entries compare floats by representation, so `0.0` and `-0.0`
            // stay distinct and NaN can be reused
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Float32(a), Float32(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (Function(a), Function(b)) => Arc::ptr_eq(a, b),
            (CallSite(a), CallSite(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl hash::Hash for Value {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        use Value::*;

        mem::discriminant(self).hash(state);
        match self {
            Nil => {}
            Bool(v) => v.hash(state),
            SmallInt(v) | Int64(v) => v.hash(state),
            BigInt(v) => v.hash(state),
            Int8(v) => v.hash(state),
            Int16(v) => v.hash(state),
            Int32(v) => v.hash(state),
            UInt8(v) => v.hash(state),
            UInt16(v) => v.hash(state),
            UInt32(v) => v.hash(state),
            UInt64(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
            Float32(v) => v.to_bits().hash(state),
            String(v) => v.hash(state),
            Char(v) => v.hash(state),
            Symbol(v) => v.hash(state),
            Tuple(v) => v.hash(state),
            Function(v) => core::ptr::hash(v.as_ref(), state),
            CallSite(v) => core::ptr::hash(v.as_ref(), state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}i8"),
            Self::Int16(v) => write!(f, "{v}i16"),
            Self::Int32(v) => write!(f, "{v}i32"),
            Self::Int64(v) => write!(f, "{v}i64"),
            Self::UInt8(v) => write!(f, "{v}u8"),
            Self::UInt16(v) => write!(f, "{v}u16"),
            Self::UInt32(v) => write!(f, "{v}u32"),
            Self::UInt64(v) => write!(f, "{v}u64"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Float32(v) => write!(f, "{v:?}f32"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Char(v) => write!(f, "{v:?}"),
            Self::Symbol(v) => write!(f, "{v:?}"),
            Self::Tuple(elements) => write!(f, "({})", elements.iter().format(", ")),
            Self::Function(function) => write!(f, "<function: {}>", function.name),
            Self::CallSite(site) => site.fmt(f),
        }
    }
}

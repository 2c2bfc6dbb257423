use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use kestrel_compiler_core::Symbol;

/// A static type attached to a node by the checker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Type {
    /// Nothing is known statically.
    #[default]
    Untyped,
    /// The expression never produces a value.
    Never,
    Void,
    /// A class, mixin, module or interface by its fully qualified name.
    Named(Symbol),
    Nilable(Box<Type>),
    Union(Vec<Type>),
}

impl Type {
    pub fn std(std: StdType) -> Self {
        Self::Named(Symbol::from(std.name()))
    }

    pub fn named(name: impl Into<Symbol>) -> Self {
        Self::Named(name.into())
    }

    #[must_use]
    pub fn nilable(self) -> Self {
        Self::Nilable(Box::new(self))
    }

    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// The standard type this is exactly, if any.
    pub fn as_std(&self) -> Option<StdType> {
        self.as_named().and_then(StdType::from_name)
    }

    pub const fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }

    pub const fn is_untyped(&self) -> bool {
        matches!(self, Self::Untyped)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untyped => f.write_str("untyped"),
            Self::Never => f.write_str("never"),
            Self::Void => f.write_str("void"),
            Self::Named(name) => f.write_str(name),
            Self::Nilable(inner) => match **inner {
                Self::Union(_) => write!(f, "({inner})?"),
                _ => write!(f, "{inner}?"),
            },
            Self::Union(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    element.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! std_types {
    ($($variant:ident => $name:literal,)*) => {
        /// Classes of the standard library the compiler needs to know about.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum StdType {
            $($variant,)*
        }

        impl StdType {
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

std_types! {
    Object => "Std::Object",
    Nil => "Std::Nil",
    Bool => "Std::Bool",
    True => "Std::True",
    False => "Std::False",
    Int => "Std::Int",
    Int8 => "Std::Int8",
    Int16 => "Std::Int16",
    Int32 => "Std::Int32",
    Int64 => "Std::Int64",
    UInt8 => "Std::UInt8",
    UInt16 => "Std::UInt16",
    UInt32 => "Std::UInt32",
    UInt64 => "Std::UInt64",
    Float => "Std::Float",
    Float32 => "Std::Float32",
    String => "Std::String",
    Char => "Std::Char",
    Symbol => "Std::Symbol",
    Error => "Std::Error",
}

impl StdType {
    /// Integer classes whose values the VM can switch on without a method call.
    pub const INTEGERS: &'static [Self] = &[
        Self::Int,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
    ];

    pub const FLOATS: &'static [Self] = &[Self::Float, Self::Float32];

    /// Non-numeric classes with builtin equality.
    pub const VALUE_TYPES: &'static [Self] = &[
        Self::String,
        Self::Char,
        Self::Symbol,
        Self::Nil,
        Self::Bool,
        Self::True,
        Self::False,
    ];

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    pub const fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Float | Self::Float32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ty = Type::Union(vec![Type::std(StdType::Int), Type::std(StdType::String)]);
        assert_eq!(ty.to_string(), "Std::Int | Std::String");
        assert_eq!(ty.nilable().to_string(), "(Std::Int | Std::String)?");
        assert_eq!(Type::std(StdType::Float).nilable().to_string(), "Std::Float?");
    }

    #[test]
    fn test_std_lookup() {
        assert_eq!(StdType::from_name("Std::UInt16"), Some(StdType::UInt16));
        assert_eq!(Type::std(StdType::Int8).as_std(), Some(StdType::Int8));
        assert!(StdType::Int8.is_integer());
        assert!(!StdType::Float32.is_integer());
        assert!(StdType::Float32.is_numeric());
    }
}

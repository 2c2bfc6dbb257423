//! The typed syntax tree handed to the compiler by the type checker, and the
//! `Checker` capability the compiler queries while lowering it.

extern crate alloc;

mod ast;
mod checker;
mod types;

pub use ast::*;
pub use checker::{Checker, NamespaceEntry, NamespaceNode, NamespaceTree, NominalChecker};
pub use kestrel_compiler_core::{Symbol, bytecode::NamespaceKind};
pub use types::{StdType, Type};

type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;

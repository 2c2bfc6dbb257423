//! Compile a typed Kestrel syntax tree into bytecode.

#![doc(html_root_url = "https://docs.rs/kestrel-codegen/")]

#[macro_use]
extern crate log;

extern crate alloc;

type IndexSet<T> = indexmap::IndexSet<T, ahash::RandomState>;

mod closure;
pub mod compile;
mod definitions;
pub mod dispatch;
pub mod error;
mod exception;
mod flow;
pub mod ir;
mod loops;
pub mod resolver;
pub mod scope;

pub use compile::{CompileOpts, CompiledProgram, compile_program};
pub use error::{CodegenError, CodegenErrorType, Diagnostic, DiagnosticList, Severity};

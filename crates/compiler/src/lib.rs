use kestrel_codegen::compile;
use ruff_source_file::{SourceFile, SourceFileBuilder, SourceLocation};

pub use kestrel_codegen::{CompileOpts, CompiledProgram, Diagnostic, DiagnosticList, Severity};
pub use kestrel_compiler_core::bytecode::BytecodeFunction;

// these crates are maintained separately. re-exporting them here for convenience.
pub use kestrel_ast as ast;
pub use kestrel_codegen as codegen;
pub use kestrel_compiler_core as core;
use thiserror::Error;

#[macro_use]
extern crate log;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Codegen(#[from] codegen::error::CodegenError),
    /// The earliest failure of a program together with every diagnostic,
    /// warnings included, its units produced.
    #[error("{first}")]
    Failed {
        first: codegen::error::CodegenError,
        diagnostics: Vec<Diagnostic>,
    },
}

impl CompileError {
    const fn codegen_error(&self) -> &codegen::error::CodegenError {
        match self {
            Self::Codegen(codegen_error) | Self::Failed { first: codegen_error, .. } => {
                codegen_error
            }
        }
    }

    pub const fn location(&self) -> Option<SourceLocation> {
        self.codegen_error().location
    }

    /// Every failure recorded while compiling, in source order.
    pub fn failures(&self) -> Vec<&Diagnostic> {
        match self {
            Self::Codegen(_) => Vec::new(),
            Self::Failed { diagnostics, .. } => diagnostics
                .iter()
                .filter(|diagnostic| diagnostic.is_failure())
                .collect(),
        }
    }

    /// One-based line and column, `(0, 0)` when the error has no position.
    pub const fn line_and_column(&self) -> (usize, usize) {
        if let Some(location) = self.location() {
            (location.line.get(), location.character_offset.get())
        } else {
            (0, 0)
        }
    }

    pub fn source_path(&self) -> &str {
        &self.codegen_error().source_path
    }
}

/// A program that has been compiled, with the warnings produced on the way.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub program: CompiledProgram,
    pub warnings: Vec<Diagnostic>,
}

/// Compile a checked syntax tree into bytecode.
///
/// `source` is the text the tree was parsed from; it is only used to map
/// ranges to line numbers.
pub fn compile(
    program: &ast::Program,
    source: &str,
    source_path: &str,
    checker: &dyn ast::Checker,
    opts: CompileOpts,
) -> Result<Compiled, CompileError> {
    let source_file = SourceFileBuilder::new(source_path, source).finish();
    let diagnostics = DiagnosticList::new();
    match compile::compile_program(program, &source_file, checker, &opts, &diagnostics) {
        Ok(program) => Ok(Compiled {
            program,
            warnings: diagnostics.into_inner(),
        }),
        Err(first) => {
            let mut diagnostics = diagnostics.into_inner();
            diagnostics.sort_by_key(|diagnostic| diagnostic.range.start());
            Err(CompileError::Failed { first, diagnostics })
        }
    }
}

fn _compile(
    program: &ast::Program,
    source_file: &SourceFile,
    checker: &dyn ast::Checker,
    opts: &CompileOpts,
    diagnostics: &DiagnosticList,
) -> Result<CompiledProgram, CompileError> {
    compile::compile_program(program, source_file, checker, opts, diagnostics).map_err(Into::into)
}

/// One source file handed to [`compile_units`].
#[derive(Debug, Clone, Copy)]
pub struct Unit<'a> {
    pub program: &'a ast::Program,
    pub source: &'a str,
    pub source_path: &'a str,
}

/// Compile independent units in parallel.
///
/// Every unit runs on a thread of its own and appends its warnings and
/// failures to `diagnostics`. Results are returned in the order of `units`.
pub fn compile_units(
    units: &[Unit<'_>],
    checker: &dyn ast::Checker,
    opts: &CompileOpts,
    diagnostics: &DiagnosticList,
) -> Vec<Result<CompiledProgram, CompileError>> {
    debug!("compiling {} units", units.len());
    std::thread::scope(|scope| {
        let handles: Vec<_> = units
            .iter()
            .map(|unit| {
                scope.spawn(move || {
                    let source_file = SourceFileBuilder::new(unit.source_path, unit.source).finish();
                    _compile(unit.program, &source_file, checker, opts, diagnostics)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

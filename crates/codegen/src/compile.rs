//!
//! Take a typed syntax tree and transform it into bytecode.
//!
//! The top-level program and every method are compiled as independent units:
//! a failure aborts its own unit while the driver carries on with the others,
//! so one pass reports every independent failure. Closures are compiled by
//! the unit that contains them, on a stack of function states that chains
//! each closure to its parent for upvalue lookups.

use crate::{
    closure::Upvalue,
    definitions::{self, Definitions},
    dispatch::{self, Dispatch},
    error::{
        CodegenError, CodegenErrorType, Diagnostic, DiagnosticList, InternalError, Severity,
        WarningType,
    },
    ir::{CodeInfo, PatchSite},
    loops::{ControlFrame, LoopContext},
    resolver::{ResolveError, StaticResolver},
    scope::{ScopeKind, ScopeStack, SlotRange},
};
use alloc::{string::String, sync::Arc, vec::Vec};
use kestrel_ast::{AssignOp, BinaryOp, Checker, Expr, ExprKind, LogicalOp, Program, UnaryOp};
use kestrel_compiler_core::{
    CallSiteInfo, OneIndexed, PositionEncoding, SourceFile, Symbol, Value,
    bytecode::{BytecodeFunction, FunctionFlags, Opcode},
};
use ruff_text_size::TextRange;

pub(crate) type CompileResult<T> = Result<T, CodegenError>;

#[derive(Debug, Clone)]
pub struct CompileOpts {
    /// Operator folding is disabled at 0. Literals and statically known
    /// conditions are resolved at every level.
    pub optimize: u8,
    /// Record warnings. Failures are recorded regardless.
    pub warnings: bool,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            optimize: 1,
            warnings: true,
        }
    }
}

/// Everything produced for one source file.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub main: Arc<BytecodeFunction>,
    /// `<namespaceDefinitions>`, present when the checker knows namespaces.
    pub namespace_definitions: Option<Arc<BytecodeFunction>>,
    /// `<methodDefinitions>`, present when the file defines methods.
    pub method_definitions: Option<Arc<BytecodeFunction>>,
    /// `<ivarIndices>`, present when some class declares instance variables.
    pub ivar_indices: Option<Arc<BytecodeFunction>>,
}

impl CompiledProgram {
    /// The top-level functions in the order the VM runs them.
    pub fn functions(&self) -> impl Iterator<Item = &Arc<BytecodeFunction>> {
        self.namespace_definitions
            .iter()
            .chain(&self.ivar_indices)
            .chain(&self.method_definitions)
            .chain(core::iter::once(&self.main))
    }
}

/// Compile a program to bytecode.
///
/// Warnings and failures of every unit are appended to `diagnostics`; the
/// first failure is also returned.
pub fn compile_program(
    program: &Program,
    source_file: &SourceFile,
    checker: &dyn Checker,
    opts: &CompileOpts,
    diagnostics: &DiagnosticList,
) -> Result<CompiledProgram, CodegenError> {
    debug!("compiling {}", source_file.name());
    let units = definitions::collect_units(program);
    let mut failures = Vec::new();
    for &(ref error, range) in &units.failures {
        let err = codegen_error(source_file, error.clone(), range);
        diagnostics.push(Diagnostic::from(&err));
        failures.push(err);
    }

    let main = run_unit(source_file, checker, opts, diagnostics, |compiler| {
        compiler.compile_main(&units.main, program.range)
    });

    let mut methods = Vec::with_capacity(units.methods.len());
    for method in &units.methods {
        let compiled = run_unit(source_file, checker, opts, diagnostics, |compiler| {
            compiler.compile_method(method.definition)
        });
        match compiled {
            Ok(function) => methods.push((method.owner.as_deref(), Arc::new(function))),
            Err(err) => failures.push(err),
        }
    }

    let definitions = run_unit(source_file, checker, opts, diagnostics, |compiler| {
        compiler.compile_definitions(&methods)
    });

    let (main, definitions) = match (main, definitions) {
        (Ok(main), Ok(definitions)) if failures.is_empty() => (main, definitions),
        (main, definitions) => {
            failures.extend(main.err());
            failures.extend(definitions.err());
            failures.sort_by_key(|err| err.range.start());
            let first = failures.into_iter().next();
            return Err(first.unwrap_or_else(|| {
                codegen_error(
                    source_file,
                    InternalError::NoFunction.into(),
                    program.range,
                )
            }));
        }
    };

    let Definitions {
        namespace_definitions,
        method_definitions,
        ivar_indices,
    } = definitions;
    trace!("compilation of {} completed", source_file.name());
    Ok(CompiledProgram {
        main: Arc::new(main),
        namespace_definitions,
        method_definitions,
        ivar_indices,
    })
}

/// Runs one unit on a fresh compiler and flushes its diagnostics.
fn run_unit<'a, T>(
    source_file: &'a SourceFile,
    checker: &'a dyn Checker,
    opts: &'a CompileOpts,
    diagnostics: &DiagnosticList,
    unit: impl FnOnce(&mut Compiler<'a>) -> CompileResult<T>,
) -> CompileResult<T> {
    let mut compiler = Compiler::new(source_file, checker, opts);
    let result = unit(&mut compiler);
    let mut records = core::mem::take(&mut compiler.warnings);
    if let Err(err) = &result {
        records.push(Diagnostic::from(err));
    }
    diagnostics.extend(records);
    result
}

pub(crate) fn codegen_error(
    source_file: &SourceFile,
    error: CodegenErrorType,
    range: TextRange,
) -> CodegenError {
    let location = source_file
        .to_source_code()
        .source_location(range.start(), PositionEncoding::Utf8);
    CodegenError {
        location: Some(location),
        range,
        error,
        source_path: source_file.name().to_owned(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    TopLevel,
    Method,
    Closure,
    Spawn,
    Synthetic,
}

impl FunctionKind {
    /// Whether names the function does not declare are looked up in the
    /// enclosing function.
    pub(crate) const fn captures(self) -> bool {
        matches!(self, Self::Closure | Self::Spawn)
    }
}

/// Compilation state of one function on the stack.
pub(crate) struct FunctionState {
    pub(crate) code: CodeInfo,
    pub(crate) kind: FunctionKind,
    pub(crate) scopes: ScopeStack,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) controls: Vec<ControlFrame>,
    pub(crate) upvalues: Vec<Upvalue>,
    /// Slots holding the values caught by the enclosing handlers.
    pub(crate) handlers: Vec<u16>,
}

/// Main structure holding the state of compilation of one unit.
pub(crate) struct Compiler<'a> {
    pub(crate) functions: Vec<FunctionState>,
    source_file: &'a SourceFile,
    pub(crate) checker: &'a dyn Checker,
    resolver: StaticResolver<'a>,
    pub(crate) opts: &'a CompileOpts,
    pub(crate) current_source_range: TextRange,
    pub(crate) warnings: Vec<Diagnostic>,
}

/// Where an assignment stores its value.
enum Store<'e> {
    Local(u16),
    Upvalue(usize),
    Ivar(&'e str),
}

impl<'a> Compiler<'a> {
    fn new(source_file: &'a SourceFile, checker: &'a dyn Checker, opts: &'a CompileOpts) -> Self {
        Self {
            functions: Vec::new(),
            source_file,
            checker,
            resolver: StaticResolver::new(checker),
            opts,
            current_source_range: TextRange::default(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn error(&self, error: CodegenErrorType) -> CodegenError {
        self.error_ranged(error, self.current_source_range)
    }

    pub(crate) fn error_ranged(&self, error: CodegenErrorType, range: TextRange) -> CodegenError {
        codegen_error(self.source_file, error, range)
    }

    pub(crate) fn warn(&mut self, warning: WarningType, range: TextRange) {
        if !self.opts.warnings {
            return;
        }
        let location = self
            .source_file
            .to_source_code()
            .source_location(range.start(), PositionEncoding::Utf8);
        self.warnings.push(Diagnostic {
            severity: Severity::Warning,
            message: warning.to_string(),
            range,
            location: Some(location),
            source_path: self.source_file.name().to_owned(),
        });
    }

    pub(crate) fn line_at(&self, range: TextRange) -> OneIndexed {
        self.source_file.to_source_code().line_index(range.start())
    }

    fn line(&self) -> OneIndexed {
        self.line_at(self.current_source_range)
    }

    pub(crate) fn current(&mut self) -> CompileResult<&mut FunctionState> {
        let (source_file, range) = (self.source_file, self.current_source_range);
        self.functions
            .last_mut()
            .ok_or_else(|| codegen_error(source_file, InternalError::NoFunction.into(), range))
    }

    /// Lifts an error of the lower layers to a failure at the current node.
    pub(crate) fn check<T>(&self, result: Result<T, CodegenErrorType>) -> CompileResult<T> {
        result.map_err(|err| self.error(err))
    }

    pub(crate) fn push_function(
        &mut self,
        name: Symbol,
        flags: FunctionFlags,
        kind: FunctionKind,
        range: TextRange,
    ) {
        let first_line = self.line_at(range);
        trace!("entering function {name}");
        self.functions.push(FunctionState {
            code: CodeInfo::new(name, flags, range, first_line),
            kind,
            scopes: ScopeStack::new(),
            loops: Vec::new(),
            controls: Vec::new(),
            upvalues: Vec::new(),
            handlers: Vec::new(),
        });
    }

    pub(crate) fn pop_function(&mut self) -> CompileResult<BytecodeFunction> {
        let Some(state) = self.functions.pop() else {
            return Err(self.error(InternalError::NoFunction.into()));
        };
        let upvalues = state
            .upvalues
            .iter()
            .map(|upvalue| upvalue.descriptor)
            .collect();
        let finalized = state.code.finalize_code(
            state.scopes.high_water_mark(),
            self.source_file.name(),
            upvalues,
        );
        self.check(finalized)
    }

    // Emission

    pub(crate) fn offset(&mut self) -> CompileResult<usize> {
        Ok(self.current()?.code.offset())
    }

    pub(crate) fn emit_op(&mut self, op: Opcode) -> CompileResult<()> {
        let line = self.line();
        self.current()?.code.emit_op(line, op);
        Ok(())
    }

    pub(crate) fn emit_bytes(&mut self, bytes: &[u8]) -> CompileResult<()> {
        let line = self.line();
        self.current()?.code.emit(line, bytes);
        Ok(())
    }

    pub(crate) fn emit_indexed(
        &mut self,
        short: Opcode,
        long: Opcode,
        index: usize,
        overflow: CodegenErrorType,
    ) -> CompileResult<()> {
        let line = self.line();
        let emitted = self
            .current()?
            .code
            .emit_indexed(line, short, long, index, overflow);
        self.check(emitted)
    }

    pub(crate) fn emit_jump(&mut self, op: Opcode) -> CompileResult<PatchSite> {
        let line = self.line();
        Ok(self.current()?.code.emit_jump(line, op))
    }

    pub(crate) fn emit_tag_jump(&mut self, tag: u8) -> CompileResult<PatchSite> {
        let line = self.line();
        Ok(self.current()?.code.emit_tag_jump(line, tag))
    }

    pub(crate) fn emit_jump_to(&mut self, op: Opcode, target: usize) -> CompileResult<()> {
        let line = self.line();
        let emitted = self.current()?.code.emit_jump_to(line, op, target);
        self.check(emitted)
    }

    pub(crate) fn patch(&mut self, site: PatchSite, target: usize) -> CompileResult<()> {
        let patched = self.current()?.code.patch(site, target);
        self.check(patched)
    }

    pub(crate) fn patch_here(&mut self, site: PatchSite) -> CompileResult<()> {
        let target = self.offset()?;
        self.patch(site, target)
    }

    pub(crate) fn patch_all_here(
        &mut self,
        sites: impl IntoIterator<Item = PatchSite>,
    ) -> CompileResult<()> {
        let target = self.offset()?;
        for site in sites {
            self.patch(site, target)?;
        }
        Ok(())
    }

    pub(crate) fn add_constant(&mut self, value: Value) -> CompileResult<usize> {
        let added = self.current()?.code.add_constant(value);
        self.check(added)
    }

    /// Loads `value` with the shortest instruction that produces it.
    pub(crate) fn emit_value(&mut self, value: Value) -> CompileResult<()> {
        match value {
            Value::Nil => self.emit_op(Opcode::Nil),
            Value::Bool(true) => self.emit_op(Opcode::True),
            Value::Bool(false) => self.emit_op(Opcode::False),
            Value::SmallInt(small) if i8::try_from(small).is_ok() => {
                let [byte] = (small as i8).to_be_bytes();
                self.emit_bytes(&[Opcode::LoadInt8 as u8, byte])
            }
            value => {
                let index = self.add_constant(value)?;
                self.emit_indexed(
                    Opcode::LoadValue8,
                    Opcode::LoadValue16,
                    index,
                    CodegenErrorType::TooManyConstants,
                )
            }
        }
    }

    /// Emits an instruction whose operand is a symbol in the constant pool.
    pub(crate) fn emit_symbol_op(
        &mut self,
        short: Opcode,
        long: Opcode,
        name: &str,
    ) -> CompileResult<()> {
        let index = self.add_constant(Value::Symbol(Symbol::from(name)))?;
        self.emit_indexed(short, long, index, CodegenErrorType::TooManyConstants)
    }

    /// Emits a method call through a call site of its own.
    pub(crate) fn emit_call(
        &mut self,
        has_receiver: bool,
        name: &str,
        argument_count: usize,
    ) -> CompileResult<()> {
        let argument_count = u32::try_from(argument_count)
            .map_err(|_| self.error(CodegenErrorType::TooManyArguments))?;
        let call_site = Value::CallSite(Arc::new(CallSiteInfo::new(name, argument_count)));
        let index = self.add_constant(call_site)?;
        let (short, long) = if has_receiver {
            (Opcode::CallMethod8, Opcode::CallMethod16)
        } else {
            (Opcode::CallSelf8, Opcode::CallSelf16)
        };
        self.emit_indexed(short, long, index, CodegenErrorType::TooManyConstants)
    }

    fn emit_dispatch(&mut self, dispatch: Dispatch) -> CompileResult<()> {
        match dispatch {
            Dispatch::Specialized(op) | Dispatch::Builtin(op) => self.emit_op(op),
            Dispatch::Dynamic {
                method,
                argument_count,
                negate,
            } => {
                self.emit_call(true, method, argument_count as usize)?;
                if negate {
                    self.emit_op(Opcode::Not)?;
                }
                Ok(())
            }
        }
    }

    // Scopes

    pub(crate) fn scope_depth(&mut self) -> CompileResult<usize> {
        Ok(self.current()?.scopes.depth())
    }

    pub(crate) fn open_scope(&mut self, kind: ScopeKind) -> CompileResult<()> {
        self.current()?.scopes.open_scope(kind);
        Ok(())
    }

    pub(crate) fn close_scope(&mut self) -> CompileResult<()> {
        let released = self.current()?.scopes.close_scope();
        match released.map_err(|err| self.error(err.into()))? {
            Some(slots) => self.emit_leave_scope(slots),
            None => Ok(()),
        }
    }

    /// Releases the slots of every scope deeper than `depth` without closing
    /// them, for jumps that leave those scopes.
    pub(crate) fn leave_scopes_to(&mut self, depth: usize) -> CompileResult<()> {
        match self.current()?.scopes.slots_above(depth) {
            Some(slots) => self.emit_leave_scope(slots),
            None => Ok(()),
        }
    }

    fn emit_leave_scope(&mut self, slots: SlotRange) -> CompileResult<()> {
        match (u8::try_from(slots.last), u8::try_from(slots.count)) {
            (Ok(last), Ok(count)) => self.emit_bytes(&[Opcode::LeaveScope8 as u8, last, count]),
            _ => {
                let [last_hi, last_lo] = slots.last.to_be_bytes();
                let [count_hi, count_lo] = slots.count.to_be_bytes();
                self.emit_bytes(&[
                    Opcode::LeaveScope16 as u8,
                    last_hi,
                    last_lo,
                    count_hi,
                    count_lo,
                ])
            }
        }
    }

    pub(crate) fn declare_local(&mut self, name: &str, mutable: bool) -> CompileResult<u16> {
        let declared = self.current()?.scopes.declare_local(name, mutable);
        self.check(declared)
    }

    // Static resolution

    /// Resolves `expr`, recording the warnings of a successful resolution.
    pub(crate) fn resolve(&mut self, expr: &Expr) -> CompileResult<Option<Value>> {
        let resolved = self.resolver.resolve(expr);
        let warnings = self.resolver.take_warnings();
        match resolved {
            Ok(value) => {
                for (warning, range) in warnings {
                    self.warn(warning, range);
                }
                Ok(value)
            }
            Err(ResolveError { error, range }) => Err(self.error_ranged(error, range)),
        }
    }

    pub(crate) fn static_truthiness(&mut self, condition: &Expr) -> CompileResult<Option<bool>> {
        Ok(self.resolve(condition)?.map(|value| value.is_truthy()))
    }

    /// Like [`Self::static_truthiness`] but without side effects, for
    /// reachability analysis.
    pub(crate) fn peek_truthiness(&mut self, condition: &Expr) -> Option<bool> {
        let resolved = self.resolver.resolve(condition);
        self.resolver.take_warnings();
        resolved.ok().flatten().map(|value| value.is_truthy())
    }

    // Units

    pub(crate) fn compile_main(
        &mut self,
        body: &[&Expr],
        range: TextRange,
    ) -> CompileResult<BytecodeFunction> {
        self.current_source_range = range;
        self.push_function(
            Symbol::from("<main>"),
            FunctionFlags::empty(),
            FunctionKind::TopLevel,
            range,
        );
        let compiled = self
            .open_scope(ScopeKind::Function)
            .and_then(|()| self.compile_statements(body.iter().copied()))
            .and_then(|()| {
                // the implicit return belongs to the last statement
                if let Some(last) = body.last() {
                    self.current_source_range = last.range;
                }
                self.emit_op(Opcode::Return)
            });
        let function = self.pop_function();
        compiled?;
        function
    }

    // Statements

    /// Compiles a sequence whose value is that of its last element, `nil`
    /// when empty.
    pub(crate) fn compile_statements<'e>(
        &mut self,
        body: impl IntoIterator<Item = &'e Expr>,
    ) -> CompileResult<()> {
        let body: Vec<&Expr> = body.into_iter().collect();
        let Some(last) = body.len().checked_sub(1) else {
            return self.emit_op(Opcode::Nil);
        };
        for (i, statement) in body.iter().enumerate() {
            self.compile_expression(statement)?;
            if i == last {
                break;
            }
            if self.never_completes(statement) {
                let skipped = body[i + 1..]
                    .iter()
                    .map(|statement| statement.range)
                    .reduce(TextRange::cover);
                if let Some(range) = skipped {
                    self.warn(WarningType::UnreachableCode, range);
                }
                return Ok(());
            }
            self.emit_op(Opcode::Pop)?;
        }
        Ok(())
    }

    pub(crate) fn compile_block(&mut self, body: &[Expr], kind: ScopeKind) -> CompileResult<()> {
        self.open_scope(kind)?;
        self.compile_statements(body)?;
        self.close_scope()
    }

    pub(crate) fn compile_expression(&mut self, expr: &Expr) -> CompileResult<()> {
        let prev_source_range = core::mem::replace(&mut self.current_source_range, expr.range);
        let compiled = self.compile_expression_inner(expr);
        self.current_source_range = prev_source_range;
        compiled
    }

    fn compile_expression_inner(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.node {
            ExprKind::Nil
            | ExprKind::True
            | ExprKind::False
            | ExprKind::Int(_)
            | ExprKind::Int8(_)
            | ExprKind::Int16(_)
            | ExprKind::Int32(_)
            | ExprKind::Int64(_)
            | ExprKind::UInt8(_)
            | ExprKind::UInt16(_)
            | ExprKind::UInt32(_)
            | ExprKind::UInt64(_)
            | ExprKind::Float(_)
            | ExprKind::Float32(_)
            | ExprKind::String(_)
            | ExprKind::Char(_)
            | ExprKind::Symbol(_) => {
                let value = self.resolve(expr)?.unwrap_or(Value::Nil);
                self.emit_value(value)
            }
            ExprKind::SelfValue => self.emit_op(Opcode::SelfValue),
            ExprKind::Identifier(name) => self.compile_load_name(name),
            ExprKind::Constant(path) => {
                self.emit_symbol_op(Opcode::GetConst8, Opcode::GetConst16, path)
            }
            ExprKind::InstanceVariable(name) => {
                self.emit_symbol_op(Opcode::GetIvar8, Opcode::GetIvar16, name)
            }
            ExprKind::ArrayList(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit_indexed(
                    Opcode::NewArrayList8,
                    Opcode::NewArrayList16,
                    elements.len(),
                    CodegenErrorType::TooManyArguments,
                )
            }
            ExprKind::Unary { op, operand } => self.compile_unary(expr, *op, operand),
            ExprKind::Binary { op, left, right } => self.compile_binary(expr, *op, left, right),
            ExprKind::Logical { op, left, right } => {
                self.compile_logical(expr, *op, left, right)
            }
            ExprKind::VariableDeclaration {
                name,
                value,
                mutable,
            } => self.compile_declaration(name, value.as_deref(), *mutable),
            ExprKind::Assignment { op, target, value } => {
                self.compile_assignment(*op, target, value)
            }
            ExprKind::If {
                condition,
                then_body,
                else_body,
            } => self.compile_if(condition, then_body, else_body, false),
            ExprKind::Unless {
                condition,
                then_body,
                else_body,
            } => self.compile_if(condition, then_body, else_body, true),
            ExprKind::While {
                label,
                condition,
                body,
            } => self.compile_while(label.as_deref(), Some(&**condition), body, false),
            ExprKind::Until {
                label,
                condition,
                body,
            } => self.compile_while(label.as_deref(), Some(&**condition), body, true),
            ExprKind::Loop { label, body } => {
                self.compile_while(label.as_deref(), None, body, false)
            }
            ExprKind::DoWhile {
                label,
                body,
                condition,
            } => self.compile_do_while(label.as_deref(), body, condition, false),
            ExprKind::DoUntil {
                label,
                body,
                condition,
            } => self.compile_do_while(label.as_deref(), body, condition, true),
            ExprKind::ForIn {
                label,
                parameter,
                iterable,
                body,
            } => self.compile_for_in(label.as_deref(), parameter, iterable, body),
            ExprKind::NumericFor {
                label,
                initialiser,
                condition,
                increment,
                body,
            } => self.compile_numeric_for(
                label.as_deref(),
                initialiser.as_deref(),
                condition.as_deref(),
                increment.as_deref(),
                body,
            ),
            ExprKind::Break { label, value } => {
                self.compile_break(label.as_deref(), value.as_deref())
            }
            ExprKind::Continue { label } => self.compile_continue(label.as_deref()),
            ExprKind::Return { value } => {
                match value {
                    Some(value) => self.compile_expression(value)?,
                    None => self.emit_op(Opcode::Nil)?,
                }
                self.emit_return()
            }
            ExprKind::Throw { value } => self.compile_throw(value.as_deref()),
            ExprKind::Do {
                body,
                catches,
                finally,
            } => self.compile_do(body, catches, finally.as_deref()),
            ExprKind::MethodCall {
                receiver,
                name,
                arguments,
            } => {
                if let Some(receiver) = receiver {
                    self.compile_expression(receiver)?;
                }
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit_call(receiver.is_some(), name, arguments.len())
            }
            ExprKind::Closure { parameters, body } => {
                self.compile_closure(parameters, body, expr.range, false)
            }
            ExprKind::Spawn { body } => self.compile_closure(&[], body, expr.range, true),
            ExprKind::NamespaceDeclaration { .. } => Err(self.error(
                CodegenErrorType::DeclarationNotAllowed("namespace declarations"),
            )),
            ExprKind::MethodDefinition { .. } => Err(self.error(
                CodegenErrorType::DeclarationNotAllowed("method definitions"),
            )),
        }
    }

    fn compile_load_name(&mut self, name: &str) -> CompileResult<()> {
        let local = self
            .current()?
            .scopes
            .resolve_local(name)
            .map(|local| local.slot);
        if let Some(slot) = local {
            return self.emit_indexed(
                Opcode::GetLocal8,
                Opcode::GetLocal16,
                usize::from(slot),
                CodegenErrorType::TooManyLocals,
            );
        }
        let depth = self.functions.len().saturating_sub(1);
        if let Some(index) = self.resolve_upvalue(depth, name)? {
            return self.emit_indexed(
                Opcode::GetUpvalue8,
                Opcode::GetUpvalue16,
                index,
                CodegenErrorType::TooManyUpvalues,
            );
        }
        Err(self.error(CodegenErrorType::UndefinedLocal(name.to_owned())))
    }

    fn compile_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> CompileResult<()> {
        if self.opts.optimize > 0 {
            if let Some(value) = self.resolve(expr)? {
                return self.emit_value(value);
            }
        }
        self.compile_expression(operand)?;
        let dispatch = dispatch::select_unary(self.checker, op, &operand.ty);
        self.emit_dispatch(dispatch)
    }

    fn compile_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<()> {
        if self.opts.optimize > 0 {
            if let Some(value) = self.resolve(expr)? {
                return self.emit_value(value);
            }
        }
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        let dispatch = dispatch::select_binary(self.checker, op, &left.ty, &right.ty);
        self.emit_dispatch(dispatch)
    }

    /// Compiles a short-circuiting operator as an expression, leaving the
    /// deciding operand on the stack.
    fn compile_logical(
        &mut self,
        expr: &Expr,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<()> {
        if self.opts.optimize > 0 {
            if let Some(value) = self.resolve(expr)? {
                return self.emit_value(value);
            }
        }
        self.compile_expression(left)?;
        let end = self.emit_jump(short_circuit_jump(op))?;
        self.compile_expression(right)?;
        self.patch_here(end)
    }

    fn compile_declaration(
        &mut self,
        name: &str,
        value: Option<&Expr>,
        mutable: bool,
    ) -> CompileResult<()> {
        // the initialiser cannot see the local it initialises
        match value {
            Some(value) => self.compile_expression(value)?,
            None => self.emit_op(Opcode::Nil)?,
        }
        let slot = self.declare_local(name, mutable)?;
        self.emit_indexed(
            Opcode::SetLocal8,
            Opcode::SetLocal16,
            usize::from(slot),
            CodegenErrorType::TooManyLocals,
        )
    }

    fn resolve_store<'e>(&mut self, target: &'e Expr) -> CompileResult<Store<'e>> {
        match &target.node {
            ExprKind::Identifier(name) => {
                let local = self
                    .current()?
                    .scopes
                    .resolve_local(name)
                    .map(|local| (local.slot, local.mutable));
                let (store, mutable) = match local {
                    Some((slot, mutable)) => (Store::Local(slot), mutable),
                    None => {
                        let depth = self.functions.len().saturating_sub(1);
                        let Some(index) = self.resolve_upvalue(depth, name)? else {
                            return Err(self.error_ranged(
                                CodegenErrorType::UndefinedLocal(name.clone()),
                                target.range,
                            ));
                        };
                        (Store::Upvalue(index), self.upvalue_is_mutable(index)?)
                    }
                };
                if !mutable {
                    return Err(self.error_ranged(
                        CodegenErrorType::AssignToValue(name.clone()),
                        target.range,
                    ));
                }
                Ok(store)
            }
            ExprKind::InstanceVariable(name) => Ok(Store::Ivar(name)),
            _ => Err(self.error_ranged(CodegenErrorType::Assign("this expression"), target.range)),
        }
    }

    fn emit_load(&mut self, store: &Store<'_>) -> CompileResult<()> {
        match *store {
            Store::Local(slot) => self.emit_indexed(
                Opcode::GetLocal8,
                Opcode::GetLocal16,
                usize::from(slot),
                CodegenErrorType::TooManyLocals,
            ),
            Store::Upvalue(index) => self.emit_indexed(
                Opcode::GetUpvalue8,
                Opcode::GetUpvalue16,
                index,
                CodegenErrorType::TooManyUpvalues,
            ),
            Store::Ivar(name) => self.emit_symbol_op(Opcode::GetIvar8, Opcode::GetIvar16, name),
        }
    }

    fn emit_store(&mut self, store: &Store<'_>) -> CompileResult<()> {
        match *store {
            Store::Local(slot) => self.emit_indexed(
                Opcode::SetLocal8,
                Opcode::SetLocal16,
                usize::from(slot),
                CodegenErrorType::TooManyLocals,
            ),
            Store::Upvalue(index) => self.emit_indexed(
                Opcode::SetUpvalue8,
                Opcode::SetUpvalue16,
                index,
                CodegenErrorType::TooManyUpvalues,
            ),
            Store::Ivar(name) => self.emit_symbol_op(Opcode::SetIvar8, Opcode::SetIvar16, name),
        }
    }

    fn compile_assignment(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> CompileResult<()> {
        let store = self.resolve_store(target)?;
        match op {
            AssignOp::Assign => {
                self.compile_expression(value)?;
                self.emit_store(&store)
            }
            AssignOp::Binary(op) => {
                self.emit_load(&store)?;
                self.compile_expression(value)?;
                let dispatch = dispatch::select_binary(self.checker, op, &target.ty, &value.ty);
                self.emit_dispatch(dispatch)?;
                self.emit_store(&store)
            }
            AssignOp::Logical(op) => {
                // the right side is neither evaluated nor stored when the
                // current value short-circuits
                self.emit_load(&store)?;
                let end = self.emit_jump(short_circuit_jump(op))?;
                self.compile_expression(value)?;
                self.emit_store(&store)?;
                self.patch_here(end)
            }
        }
    }

    // Conditions

    /// Compiles `expression` as a condition, returning the jumps taken when
    /// its truthiness equals `condition`. Logical operators and `!` are
    /// threaded into jumps instead of producing booleans.
    pub(crate) fn compile_jump_if(
        &mut self,
        expression: &Expr,
        condition: bool,
    ) -> CompileResult<Vec<PatchSite>> {
        match &expression.node {
            ExprKind::Logical {
                op: LogicalOp::And,
                left,
                right,
            } => {
                if condition {
                    // If any of the operands is false, we can short-circuit.
                    let end = self.compile_jump_if(left, false)?;
                    let taken = self.compile_jump_if(right, true)?;
                    self.patch_all_here(end)?;
                    Ok(taken)
                } else {
                    let mut taken = self.compile_jump_if(left, false)?;
                    taken.extend(self.compile_jump_if(right, false)?);
                    Ok(taken)
                }
            }
            ExprKind::Logical {
                op: LogicalOp::Or,
                left,
                right,
            } => {
                if condition {
                    let mut taken = self.compile_jump_if(left, true)?;
                    taken.extend(self.compile_jump_if(right, true)?);
                    Ok(taken)
                } else {
                    let end = self.compile_jump_if(left, true)?;
                    let taken = self.compile_jump_if(right, false)?;
                    self.patch_all_here(end)?;
                    Ok(taken)
                }
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.compile_jump_if(operand, !condition),
            ExprKind::Binary {
                op: op @ (BinaryOp::StrictEqual | BinaryOp::StrictNotEqual),
                left,
                right,
            } if matches!(right.node, ExprKind::Nil) => {
                self.compile_expression(left)?;
                let is_nil = (*op == BinaryOp::StrictEqual) == condition;
                let jump = if is_nil {
                    Opcode::PopJumpIfNil
                } else {
                    Opcode::PopJumpIfNotNil
                };
                Ok(vec![self.emit_jump(jump)?])
            }
            _ => {
                // Fall back case which always will work!
                self.compile_expression(expression)?;
                let jump = if condition {
                    Opcode::PopJumpIfTrue
                } else {
                    Opcode::PopJumpIfFalse
                };
                Ok(vec![self.emit_jump(jump)?])
            }
        }
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_body: &[Expr],
        else_body: &[Expr],
        negate: bool,
    ) -> CompileResult<()> {
        if let Some(truthy) = self.static_truthiness(condition)? {
            let warning = if truthy {
                WarningType::AlwaysTruthy
            } else {
                WarningType::AlwaysFalsy
            };
            self.warn(warning, condition.range);
            let (live, dead) = if truthy != negate {
                (then_body, else_body)
            } else {
                (else_body, then_body)
            };
            if let Some(range) = crate::flow::body_range(dead) {
                self.warn(WarningType::UnreachableCode, range);
            }
            return self.compile_block(live, ScopeKind::Block);
        }

        let to_else = self.compile_jump_if(condition, negate)?;
        self.compile_block(then_body, ScopeKind::Block)?;
        let to_end = self.emit_jump(Opcode::Jump)?;
        self.patch_all_here(to_else)?;
        self.compile_block(else_body, ScopeKind::Block)?;
        self.patch_here(to_end)
    }

    fn compile_throw(&mut self, value: Option<&Expr>) -> CompileResult<()> {
        match value {
            Some(value) => {
                self.compile_expression(value)?;
                self.emit_op(Opcode::Throw)
            }
            None => {
                let Some(&slot) = self.current()?.handlers.last() else {
                    return Err(self.error(CodegenErrorType::BareThrow));
                };
                self.emit_indexed(
                    Opcode::GetLocal8,
                    Opcode::GetLocal16,
                    usize::from(slot),
                    CodegenErrorType::TooManyLocals,
                )?;
                self.emit_op(Opcode::Rethrow)
            }
        }
    }
}

const fn short_circuit_jump(op: LogicalOp) -> Opcode {
    match op {
        LogicalOp::And => Opcode::JumpIfFalseOrPop,
        LogicalOp::Or => Opcode::JumpIfTrueOrPop,
        LogicalOp::NilCoalesce => Opcode::JumpIfNotNilOrPop,
    }
}

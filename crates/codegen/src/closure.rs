//! Closures, spawned tasks and methods.
//!
//! A closure names the variables of enclosing functions it uses through
//! upvalue descriptors. `val` locals are captured by value, everything else by
//! reference so that writes on either side are shared.

use crate::{
    compile::{CompileResult, Compiler, FunctionKind},
    error::{CodegenErrorType, InternalError},
    scope::ScopeKind,
};
use alloc::{string::String, sync::Arc, vec::Vec};
use kestrel_ast::{Expr, ExprKind, Parameter};
use kestrel_compiler_core::{
    Symbol, Value,
    bytecode::{
        BytecodeFunction, CLOSED_TERMINATOR, FunctionFlags, Opcode, SPAWN_TERMINATOR,
        UpvalueDescriptor, UpvalueSource,
    },
};
use ruff_text_size::TextRange;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Upvalue {
    pub(crate) name: String,
    pub(crate) descriptor: UpvalueDescriptor,
    pub(crate) mutable: bool,
}

impl Compiler<'_> {
    /// Index of `name` among the upvalues of the function at `depth` on the
    /// function stack, capturing it from the enclosing functions on first use.
    pub(crate) fn resolve_upvalue(
        &mut self,
        depth: usize,
        name: &str,
    ) -> CompileResult<Option<usize>> {
        let Some(function) = self.functions.get(depth) else {
            return Ok(None);
        };
        if !function.kind.captures() || depth == 0 {
            return Ok(None);
        }
        if let Some(index) = function
            .upvalues
            .iter()
            .position(|upvalue| upvalue.name == name)
        {
            return Ok(Some(index));
        }

        let parent = depth - 1;
        let local = self.functions[parent]
            .scopes
            .resolve_local_mut(name)
            .map(|local| {
                local.captured = true;
                (local.slot, local.mutable)
            });
        let (source, mutable, is_by_reference) = match local {
            Some((slot, mutable)) => (UpvalueSource::Local(slot), mutable, mutable),
            None => {
                let Some(index) = self.resolve_upvalue(parent, name)? else {
                    return Ok(None);
                };
                let upvalue = &self.functions[parent].upvalues[index];
                let (mutable, is_by_reference) =
                    (upvalue.mutable, upvalue.descriptor.is_by_reference);
                let index = u16::try_from(index)
                    .map_err(|_| self.error(CodegenErrorType::TooManyUpvalues))?;
                (UpvalueSource::Upvalue(index), mutable, is_by_reference)
            }
        };
        let descriptor = UpvalueDescriptor {
            source,
            is_by_reference,
        };
        self.add_upvalue(depth, name, descriptor, mutable).map(Some)
    }

    fn add_upvalue(
        &mut self,
        depth: usize,
        name: &str,
        descriptor: UpvalueDescriptor,
        mutable: bool,
    ) -> CompileResult<usize> {
        let upvalues = &self.functions[depth].upvalues;
        if let Some(index) = upvalues
            .iter()
            .position(|upvalue| upvalue.descriptor.source == descriptor.source)
        {
            return Ok(index);
        }
        let index = upvalues.len();
        if index > usize::from(u16::MAX) {
            return Err(self.error(CodegenErrorType::TooManyUpvalues));
        }
        trace!("capturing `{name}` as upvalue {index}: {descriptor}");
        self.functions[depth].upvalues.push(Upvalue {
            name: name.into(),
            descriptor,
            mutable,
        });
        Ok(index)
    }

    pub(crate) fn upvalue_is_mutable(&mut self, index: usize) -> CompileResult<bool> {
        let mutable = self
            .current()?
            .upvalues
            .get(index)
            .map(|upvalue| upvalue.mutable);
        mutable.ok_or_else(|| self.error(InternalError::NoFunction.into()))
    }

    /// Declares the parameters and compiles a body that returns the value of
    /// its last statement.
    fn compile_function_body(&mut self, parameters: &[Parameter], body: &[Expr]) -> CompileResult<()> {
        self.open_scope(ScopeKind::Function)?;
        for parameter in parameters {
            self.declare_local(&parameter.name, true)?;
        }
        let param_count = u32::try_from(parameters.len())
            .map_err(|_| self.error(CodegenErrorType::TooManyArguments))?;
        self.current()?.code.param_count = param_count;
        self.compile_statements(body)?;
        if let Some(last) = body.last() {
            self.current_source_range = last.range;
        }
        self.emit_return()
    }

    /// Compiles a closure literal or a `go` body and emits the instruction
    /// that instantiates it.
    pub(crate) fn compile_closure(
        &mut self,
        parameters: &[Parameter],
        body: &[Expr],
        range: TextRange,
        spawn: bool,
    ) -> CompileResult<()> {
        let (name, flags, kind) = if spawn {
            (
                "<spawn>",
                FunctionFlags::CLOSURE | FunctionFlags::SPAWN,
                FunctionKind::Spawn,
            )
        } else {
            ("<closure>", FunctionFlags::CLOSURE, FunctionKind::Closure)
        };
        self.push_function(Symbol::from(name), flags, kind, range);
        let compiled = self.compile_function_body(parameters, body);
        let function = self.pop_function();
        self.current_source_range = range;
        compiled?;
        let function = function?;

        let upvalues = function.upvalues.clone();
        let index = self.add_constant(Value::Function(Arc::new(function)))?;
        let mut bytes = Vec::with_capacity(4 + upvalues.len() * 2);
        match u8::try_from(index) {
            Ok(index) => bytes.extend_from_slice(&[Opcode::Closure8 as u8, index]),
            Err(_) => {
                let [hi, lo] = u16::try_from(index)
                    .map_err(|_| self.error(CodegenErrorType::TooManyConstants))?
                    .to_be_bytes();
                bytes.extend_from_slice(&[Opcode::Closure16 as u8, hi, lo]);
            }
        }
        for descriptor in &*upvalues {
            descriptor.encode(&mut bytes);
        }
        bytes.push(if spawn {
            SPAWN_TERMINATOR
        } else {
            CLOSED_TERMINATOR
        });
        self.emit_bytes(&bytes)
    }

    /// Compiles a method definition as a unit of its own.
    pub(crate) fn compile_method(&mut self, definition: &Expr) -> CompileResult<BytecodeFunction> {
        let ExprKind::MethodDefinition {
            name,
            parameters,
            body,
        } = &definition.node
        else {
            return Err(self.error_ranged(InternalError::NoFunction.into(), definition.range));
        };
        debug!("compiling method {name}");
        self.current_source_range = definition.range;
        self.push_function(
            Symbol::from(name.as_str()),
            FunctionFlags::METHOD,
            FunctionKind::Method,
            definition.range,
        );
        let compiled = self.compile_function_body(parameters, body);
        let function = self.pop_function();
        compiled?;
        function
    }
}

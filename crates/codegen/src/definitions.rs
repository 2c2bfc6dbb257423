//! Splitting a program into units and the synthetic definition functions.
//!
//! Namespace declarations only shape the checker's namespace tree; at runtime
//! the namespaces, method tables and instance variable layouts are installed
//! by three synthetic functions the VM runs before `<main>`.

use crate::{
    compile::{CompileResult, Compiler, FunctionKind},
    error::CodegenErrorType,
    scope::ScopeKind,
};
use alloc::{string::String, sync::Arc, vec::Vec};
use kestrel_ast::{Expr, ExprKind, NamespaceEntry, Program};
use kestrel_compiler_core::{
    Symbol, Value,
    bytecode::{BytecodeFunction, FunctionFlags, Opcode},
};
use ruff_text_size::TextRange;

/// A method definition and the fully qualified namespace that owns it, `None`
/// for top-level methods which belong to the receiver of the definitions.
#[derive(Debug)]
pub(crate) struct MethodUnit<'a> {
    pub(crate) owner: Option<String>,
    pub(crate) definition: &'a Expr,
}

#[derive(Debug, Default)]
pub(crate) struct Units<'a> {
    /// Top-level statements that make up `<main>`.
    pub(crate) main: Vec<&'a Expr>,
    pub(crate) methods: Vec<MethodUnit<'a>>,
    pub(crate) failures: Vec<(CodegenErrorType, TextRange)>,
}

pub(crate) fn collect_units(program: &Program) -> Units<'_> {
    let mut units = Units::default();
    for expr in &program.body {
        match &expr.node {
            ExprKind::NamespaceDeclaration { constant, body, .. } => {
                collect_namespace(constant, body, &mut units);
            }
            ExprKind::MethodDefinition { .. } => units.methods.push(MethodUnit {
                owner: None,
                definition: expr,
            }),
            _ => units.main.push(expr),
        }
    }
    units
}

fn collect_namespace<'a>(path: &str, body: &'a [Expr], units: &mut Units<'a>) {
    for item in body {
        match &item.node {
            ExprKind::NamespaceDeclaration { constant, body, .. } => {
                collect_namespace(&format!("{path}::{constant}"), body, units);
            }
            ExprKind::MethodDefinition { .. } => units.methods.push(MethodUnit {
                owner: Some(path.into()),
                definition: item,
            }),
            _ => units
                .failures
                .push((CodegenErrorType::InvalidNamespaceBody, item.range)),
        }
    }
}

/// The synthetic functions of a program, each absent when it would be empty.
#[derive(Debug, Default)]
pub(crate) struct Definitions {
    pub(crate) namespace_definitions: Option<Arc<BytecodeFunction>>,
    pub(crate) method_definitions: Option<Arc<BytecodeFunction>>,
    pub(crate) ivar_indices: Option<Arc<BytecodeFunction>>,
}

impl Compiler<'_> {
    pub(crate) fn compile_definitions(
        &mut self,
        methods: &[(Option<&str>, Arc<BytecodeFunction>)],
    ) -> CompileResult<Definitions> {
        let checker = self.checker;
        let entries = checker.namespaces().walk();
        let mut definitions = Definitions::default();

        if !entries.is_empty() {
            definitions.namespace_definitions = Some(
                self.compile_synthetic("<namespaceDefinitions>", |compiler| {
                    compiler.emit_namespaces(&entries)
                })?,
            );
        }
        if !methods.is_empty() {
            definitions.method_definitions =
                Some(self.compile_synthetic("<methodDefinitions>", |compiler| {
                    compiler.emit_methods(methods)
                })?);
        }
        if entries.iter().any(|entry| !entry.node.ivars.is_empty()) {
            definitions.ivar_indices = Some(
                self.compile_synthetic("<ivarIndices>", |compiler| compiler.emit_ivars(&entries))?,
            );
        }
        Ok(definitions)
    }

    fn compile_synthetic(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<Arc<BytecodeFunction>> {
        debug!("compiling {name}");
        self.push_function(
            Symbol::from(name),
            FunctionFlags::SYNTHETIC,
            FunctionKind::Synthetic,
            TextRange::default(),
        );
        let compiled = self
            .open_scope(ScopeKind::Function)
            .and_then(|()| body(self))
            .and_then(|()| self.emit_op(Opcode::Nil))
            .and_then(|()| self.emit_op(Opcode::Return));
        let function = self.pop_function();
        compiled?;
        function.map(Arc::new)
    }

    fn emit_const(&mut self, path: &str) -> CompileResult<()> {
        self.emit_symbol_op(Opcode::GetConst8, Opcode::GetConst16, path)
    }

    /// Defines every namespace, parents first, then installs the mixins so
    /// that an inclusion may name a namespace defined after its includer.
    fn emit_namespaces(&mut self, entries: &[NamespaceEntry<'_>]) -> CompileResult<()> {
        for entry in entries {
            match entry.parent {
                Some(parent) => self.emit_const(parent)?,
                None => self.emit_op(Opcode::Root)?,
            }
            self.emit_value(Value::Symbol(entry.node.name.clone()))?;
            match &entry.node.superclass {
                Some(superclass) => self.emit_const(superclass.as_str())?,
                None => self.emit_op(Opcode::Nil)?,
            }
            self.emit_bytes(&[Opcode::DefNamespace as u8, entry.node.kind as u8])?;
        }
        for entry in entries {
            for mixin in &entry.node.includes {
                self.emit_const(entry.path)?;
                self.emit_const(mixin.as_str())?;
                self.emit_op(Opcode::Include)?;
            }
        }
        Ok(())
    }

    fn emit_methods(&mut self, methods: &[(Option<&str>, Arc<BytecodeFunction>)]) -> CompileResult<()> {
        for (owner, function) in methods {
            match owner {
                Some(owner) => self.emit_const(owner)?,
                None => self.emit_op(Opcode::SelfValue)?,
            }
            self.emit_value(Value::Function(Arc::clone(function)))?;
            self.emit_op(Opcode::DefMethod)?;
        }
        Ok(())
    }

    fn emit_ivars(&mut self, entries: &[NamespaceEntry<'_>]) -> CompileResult<()> {
        for entry in entries.iter().filter(|entry| !entry.node.ivars.is_empty()) {
            self.emit_const(entry.path)?;
            let ivars = entry
                .node
                .ivars
                .iter()
                .cloned()
                .map(Value::Symbol)
                .collect();
            self.emit_value(Value::Tuple(ivars))?;
            self.emit_op(Opcode::DefIvars)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ast::NamespaceKind;

    fn node(kind: ExprKind) -> Expr {
        Expr::new(kind, TextRange::default())
    }

    fn method(name: &str) -> Expr {
        node(ExprKind::MethodDefinition {
            name: name.into(),
            parameters: vec![],
            body: vec![],
        })
    }

    fn namespace(constant: &str, body: Vec<Expr>) -> Expr {
        node(ExprKind::NamespaceDeclaration {
            kind: NamespaceKind::Module,
            constant: constant.into(),
            body,
        })
    }

    #[test]
    fn test_collect_units_qualifies_owners() {
        let program = Program {
            body: vec![
                Expr::int("1"),
                namespace(
                    "Outer",
                    vec![method("a"), namespace("Inner", vec![method("b")])],
                ),
                method("c"),
            ],
            range: TextRange::default(),
        };
        let units = collect_units(&program);
        assert_eq!(units.main.len(), 1);
        let owners: Vec<_> = units
            .methods
            .iter()
            .map(|unit| unit.owner.as_deref())
            .collect();
        assert_eq!(owners, [Some("Outer"), Some("Outer::Inner"), None]);
        assert!(units.failures.is_empty());
    }

    #[test]
    fn test_statements_in_namespace_body_fail() {
        let stray = Expr::int("1").with_range(TextRange::new(4.into(), 5.into()));
        let program = Program {
            body: vec![namespace("Outer", vec![stray])],
            range: TextRange::default(),
        };
        let units = collect_units(&program);
        assert_eq!(
            units.failures,
            [(
                CodegenErrorType::InvalidNamespaceBody,
                TextRange::new(4.into(), 5.into())
            )]
        );
    }
}

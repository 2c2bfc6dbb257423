//! Loops, `break` and `continue`.
//!
//! Every loop pushes a [`LoopContext`] that collects the jumps to its exit and,
//! until the address is known, to its continue point. Exits that cross a
//! `finally` region are routed through the region's pending-action funnel
//! instead of jumping directly.

use crate::{
    compile::{CompileResult, Compiler},
    error::{CodegenErrorType, InternalError, WarningType},
    flow::body_range,
    ir::PatchSite,
    scope::ScopeKind,
};
use alloc::{string::String, vec::Vec};
use kestrel_ast::Expr;
use kestrel_compiler_core::bytecode::Opcode;

/// Pending-action tags below this value are reserved by the funnel, see
/// [`crate::exception`].
pub(crate) const FIRST_JUMP_TAG: usize = 3;
const MAX_TAG: usize = i8::MAX as usize;

#[derive(Debug)]
pub(crate) enum ContinueTarget {
    Known(usize),
    /// Forward jumps waiting for the continue point of a loop whose
    /// condition follows its body.
    Pending(Vec<PatchSite>),
}

#[derive(Debug)]
pub(crate) struct LoopContext {
    pub(crate) label: Option<String>,
    continue_target: ContinueTarget,
    break_patches: Vec<PatchSite>,
    /// Scope depth outside the loop.
    scope_depth: usize,
    /// Scope depth at the continue point.
    continue_scope_depth: usize,
    /// Control frames open when the loop was entered.
    control_depth: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Break,
    Continue,
}

/// A `break` or `continue` parked in a `finally` region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PendingJump {
    pub(crate) loop_index: usize,
    pub(crate) exit: LoopExit,
}

/// A `do` with a `finally` clause whose protected part is being compiled.
#[derive(Debug)]
pub(crate) struct FinallyContext {
    pub(crate) scope_depth: usize,
    /// Jumps to the start of the `finally` body, each with a tag pushed.
    pub(crate) entries: Vec<PatchSite>,
    /// Whether a `return` was parked.
    pub(crate) returns: bool,
    /// Parked loop exits, the tag of each is its index plus [`FIRST_JUMP_TAG`].
    pub(crate) jumps: Vec<PendingJump>,
}

impl FinallyContext {
    pub(crate) const fn new(scope_depth: usize) -> Self {
        Self {
            scope_depth,
            entries: Vec::new(),
            returns: false,
            jumps: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ControlFrame {
    Finally(FinallyContext),
    /// A `finally` body runs with a payload and its tag on the stack.
    FinallyBody,
}

impl Compiler<'_> {
    fn enter_loop(
        &mut self,
        label: Option<&str>,
        continue_target: ContinueTarget,
        scope_depth: usize,
        continue_scope_depth: usize,
    ) -> CompileResult<()> {
        let state = self.current()?;
        let control_depth = state.controls.len();
        state.loops.push(LoopContext {
            label: label.map(String::from),
            continue_target,
            break_patches: Vec::new(),
            scope_depth,
            continue_scope_depth,
            control_depth,
        });
        Ok(())
    }

    fn exit_loop(&mut self) -> CompileResult<LoopContext> {
        let context = self.current()?.loops.pop();
        context.ok_or_else(|| self.error(InternalError::ScopeUnderflow.into()))
    }

    /// Resolves every parked continue of the innermost loop to the current
    /// offset.
    fn set_continue_here(&mut self) -> CompileResult<()> {
        let target = self.offset()?;
        let pending = match self.current()?.loops.last_mut() {
            Some(context) => core::mem::replace(
                &mut context.continue_target,
                ContinueTarget::Known(target),
            ),
            None => return Err(self.error(InternalError::ScopeUnderflow.into())),
        };
        if let ContinueTarget::Pending(sites) = pending {
            self.patch_all_here(sites)?;
        }
        Ok(())
    }

    /// Finishes a loop: its value on normal exit is `nil`, `break` jumps past
    /// it with a value of its own.
    fn finish_loop(&mut self) -> CompileResult<()> {
        let context = self.exit_loop()?;
        self.emit_op(Opcode::Nil)?;
        self.patch_all_here(context.break_patches)
    }

    fn find_loop(&mut self, label: Option<&str>, exit: LoopExit) -> CompileResult<usize> {
        let loops = &self.current()?.loops;
        let found = match label {
            None => loops.len().checked_sub(1),
            Some(label) => loops
                .iter()
                .rposition(|context| context.label.as_deref() == Some(label)),
        };
        found.ok_or_else(|| {
            self.error(match (label, exit) {
                (Some(label), _) => CodegenErrorType::LabelNotFound(label.into()),
                (None, LoopExit::Break) => CodegenErrorType::InvalidBreak,
                (None, LoopExit::Continue) => CodegenErrorType::InvalidContinue,
            })
        })
    }

    pub(crate) fn compile_break(&mut self, label: Option<&str>, value: Option<&Expr>) -> CompileResult<()> {
        let loop_index = self.find_loop(label, LoopExit::Break)?;
        match value {
            Some(value) => self.compile_expression(value)?,
            None => self.emit_op(Opcode::Nil)?,
        }
        self.emit_loop_exit(loop_index, LoopExit::Break, true)
    }

    pub(crate) fn compile_continue(&mut self, label: Option<&str>) -> CompileResult<()> {
        let loop_index = self.find_loop(label, LoopExit::Continue)?;
        self.emit_loop_exit(loop_index, LoopExit::Continue, false)
    }

    /// Leaves loop `loop_index`, parking the exit in the innermost `finally`
    /// region it crosses. A break carries its value on the stack.
    pub(crate) fn emit_loop_exit(
        &mut self,
        loop_index: usize,
        exit: LoopExit,
        has_value: bool,
    ) -> CompileResult<()> {
        let Some(control_depth) = self
            .current()?
            .loops
            .get(loop_index)
            .map(|context| context.control_depth)
        else {
            return Err(self.error(InternalError::ScopeUnderflow.into()));
        };

        let mut frame_index = self.current()?.controls.len();
        while frame_index > control_depth {
            frame_index -= 1;
            let finally_depth = match &self.current()?.controls[frame_index] {
                ControlFrame::FinallyBody => None,
                ControlFrame::Finally(finally) => Some(finally.scope_depth),
            };
            let Some(scope_depth) = finally_depth else {
                // drop the payload and tag of the finally body being left
                if has_value {
                    for op in [Opcode::Swap, Opcode::Pop, Opcode::Swap, Opcode::Pop] {
                        self.emit_op(op)?;
                    }
                } else {
                    self.emit_op(Opcode::Pop)?;
                    self.emit_op(Opcode::Pop)?;
                }
                continue;
            };

            if !has_value {
                self.emit_op(Opcode::Nil)?;
            }
            self.leave_scopes_to(scope_depth)?;
            let jump = PendingJump { loop_index, exit };
            let index = match &mut self.current()?.controls[frame_index] {
                ControlFrame::Finally(finally) => Some(
                    match finally.jumps.iter().position(|parked| *parked == jump) {
                        Some(index) => index,
                        None => {
                            finally.jumps.push(jump);
                            finally.jumps.len() - 1
                        }
                    },
                ),
                ControlFrame::FinallyBody => None,
            };
            let Some(index) = index else {
                return Err(self.error(InternalError::ScopeUnderflow.into()));
            };
            let tag = index + FIRST_JUMP_TAG;
            if tag > MAX_TAG {
                return Err(self.error(CodegenErrorType::TooManyExits));
            }
            self.emit_bytes(&[Opcode::LoadInt8 as u8, tag as u8])?;
            let entry = self.emit_jump(Opcode::Jump)?;
            if let ControlFrame::Finally(finally) = &mut self.current()?.controls[frame_index] {
                finally.entries.push(entry);
            }
            trace!("parked {exit:?} of loop {loop_index} with tag {tag}");
            return Ok(());
        }

        let (scope_depth, continue_scope_depth) = {
            let context = &self.current()?.loops[loop_index];
            (context.scope_depth, context.continue_scope_depth)
        };
        match exit {
            LoopExit::Break => {
                self.leave_scopes_to(scope_depth)?;
                let site = self.emit_jump(Opcode::Jump)?;
                self.current()?.loops[loop_index].break_patches.push(site);
            }
            LoopExit::Continue => {
                if has_value {
                    self.emit_op(Opcode::Pop)?;
                }
                self.leave_scopes_to(continue_scope_depth)?;
                let known = match &self.current()?.loops[loop_index].continue_target {
                    ContinueTarget::Known(target) => Some(*target),
                    ContinueTarget::Pending(_) => None,
                };
                match known {
                    Some(target) => self.emit_jump_to(Opcode::Loop, target)?,
                    None => {
                        let site = self.emit_jump(Opcode::Jump)?;
                        if let ContinueTarget::Pending(sites) =
                            &mut self.current()?.loops[loop_index].continue_target
                        {
                            sites.push(site);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// `while`, `until` and, without a condition, `loop`.
    pub(crate) fn compile_while(
        &mut self,
        label: Option<&str>,
        condition: Option<&Expr>,
        body: &[Expr],
        until: bool,
    ) -> CompileResult<()> {
        let truthy = match condition {
            Some(condition) => self.static_truthiness(condition)?,
            None => None,
        };
        let runs = match condition {
            Some(_) => truthy.map(|truthy| truthy != until),
            None => Some(true),
        };
        if let (Some(false), Some(condition)) = (runs, condition) {
            self.warn(WarningType::LoopNeverExecutes, condition.range);
            if let Some(range) = body_range(body) {
                self.warn(WarningType::UnreachableCode, range);
            }
            return self.emit_op(Opcode::Nil);
        }
        if let (Some(truthy), Some(condition)) = (truthy, condition) {
            let warning = if truthy {
                WarningType::AlwaysTruthy
            } else {
                WarningType::AlwaysFalsy
            };
            self.warn(warning, condition.range);
        }

        let scope_depth = self.scope_depth()?;
        let top = self.offset()?;
        let exits = match condition {
            Some(condition) if runs.is_none() => self.compile_jump_if(condition, until)?,
            _ => Vec::new(),
        };
        self.enter_loop(label, ContinueTarget::Known(top), scope_depth, scope_depth)?;
        self.compile_block(body, ScopeKind::Loop)?;
        self.emit_op(Opcode::Pop)?;
        self.emit_jump_to(Opcode::Loop, top)?;
        self.patch_all_here(exits)?;
        self.finish_loop()
    }

    /// `do ... end while cond` and `do ... end until cond`.
    pub(crate) fn compile_do_while(
        &mut self,
        label: Option<&str>,
        body: &[Expr],
        condition: &Expr,
        until: bool,
    ) -> CompileResult<()> {
        let scope_depth = self.scope_depth()?;
        let top = self.offset()?;
        self.enter_loop(
            label,
            ContinueTarget::Pending(Vec::new()),
            scope_depth,
            scope_depth,
        )?;
        self.compile_block(body, ScopeKind::Loop)?;
        self.emit_op(Opcode::Pop)?;
        self.set_continue_here()?;

        let prev_source_range = core::mem::replace(&mut self.current_source_range, condition.range);
        let repeats = self
            .static_truthiness(condition)
            .map(|truthy| truthy.map(|truthy| truthy != until));
        let emitted = match repeats {
            Ok(Some(true)) => self.emit_jump_to(Opcode::Loop, top),
            Ok(Some(false)) => Ok(()),
            Ok(None) => self.compile_jump_if(condition, !until).and_then(|back| {
                back.into_iter().try_for_each(|site| self.patch(site, top))
            }),
            Err(err) => Err(err),
        };
        self.current_source_range = prev_source_range;
        emitted?;
        self.finish_loop()
    }

    /// `for parameter in iterable`. The iterator lives in a hidden local of
    /// the loop header.
    pub(crate) fn compile_for_in(
        &mut self,
        label: Option<&str>,
        parameter: &str,
        iterable: &Expr,
        body: &[Expr],
    ) -> CompileResult<()> {
        let scope_depth = self.scope_depth()?;
        self.open_scope(ScopeKind::Loop)?;
        self.compile_expression(iterable)?;
        self.emit_op(Opcode::GetIterator)?;
        let iterator = usize::from(self.declare_local("#iter", false)?);
        self.emit_indexed(
            Opcode::SetLocal8,
            Opcode::SetLocal16,
            iterator,
            CodegenErrorType::TooManyLocals,
        )?;
        self.emit_op(Opcode::Pop)?;

        let top = self.offset()?;
        self.emit_indexed(
            Opcode::GetLocal8,
            Opcode::GetLocal16,
            iterator,
            CodegenErrorType::TooManyLocals,
        )?;
        let exhausted = self.emit_jump(Opcode::ForIn)?;
        let header_depth = self.scope_depth()?;
        self.enter_loop(label, ContinueTarget::Known(top), scope_depth, header_depth)?;

        self.open_scope(ScopeKind::Loop)?;
        let element = usize::from(self.declare_local(parameter, true)?);
        self.emit_indexed(
            Opcode::SetLocal8,
            Opcode::SetLocal16,
            element,
            CodegenErrorType::TooManyLocals,
        )?;
        self.emit_op(Opcode::Pop)?;
        self.compile_statements(body)?;
        self.emit_op(Opcode::Pop)?;
        self.close_scope()?;
        self.emit_jump_to(Opcode::Loop, top)?;

        self.patch_here(exhausted)?;
        let context = self.exit_loop()?;
        self.close_scope()?;
        self.emit_op(Opcode::Nil)?;
        self.patch_all_here(context.break_patches)
    }

    /// `fornum initialiser; condition; increment`, any part may be missing.
    pub(crate) fn compile_numeric_for(
        &mut self,
        label: Option<&str>,
        initialiser: Option<&Expr>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &[Expr],
    ) -> CompileResult<()> {
        let scope_depth = self.scope_depth()?;
        self.open_scope(ScopeKind::Loop)?;
        if let Some(initialiser) = initialiser {
            self.compile_expression(initialiser)?;
            self.emit_op(Opcode::Pop)?;
        }

        let top = self.offset()?;
        let exits = match condition {
            Some(condition) => self.compile_jump_if(condition, false)?,
            None => Vec::new(),
        };
        let header_depth = self.scope_depth()?;
        self.enter_loop(
            label,
            ContinueTarget::Pending(Vec::new()),
            scope_depth,
            header_depth,
        )?;
        self.compile_block(body, ScopeKind::Loop)?;
        self.emit_op(Opcode::Pop)?;

        self.set_continue_here()?;
        if let Some(increment) = increment {
            self.compile_expression(increment)?;
            self.emit_op(Opcode::Pop)?;
        }
        self.emit_jump_to(Opcode::Loop, top)?;
        self.patch_all_here(exits)?;

        let context = self.exit_loop()?;
        self.close_scope()?;
        self.emit_op(Opcode::Nil)?;
        self.patch_all_here(context.break_patches)
    }
}

#[cfg(test)]
mod tests {
    use crate::{CompileOpts, DiagnosticList, compile_program, error::CodegenErrorType};
    use kestrel_ast::{AssignOp, BinaryOp, Expr, ExprKind, NominalChecker, Program, StdType, Type};
    use kestrel_compiler_core::{
        SourceFileBuilder,
        bytecode::{BytecodeFunction, DecodedInstruction, Opcode, Operand},
    };
    use ruff_text_size::TextRange;

    fn compile(body: Vec<Expr>) -> Result<BytecodeFunction, CodegenErrorType> {
        let source_file = SourceFileBuilder::new("loops.kes", "").finish();
        let program = Program {
            body,
            range: TextRange::default(),
        };
        let diagnostics = DiagnosticList::new();
        compile_program(
            &program,
            &source_file,
            &NominalChecker::default(),
            &CompileOpts::default(),
            &diagnostics,
        )
        .map(|compiled| (*compiled.main).clone())
        .map_err(|err| err.error)
    }

    fn decoded(function: &BytecodeFunction) -> Vec<DecodedInstruction> {
        function.instructions().map(Result::unwrap).collect()
    }

    fn node(kind: ExprKind) -> Expr {
        Expr::new(kind, TextRange::default())
    }

    fn brk(label: Option<&str>, value: Option<Expr>) -> Expr {
        node(ExprKind::Break {
            label: label.map(Into::into),
            value: value.map(Box::new),
        })
    }

    fn cont(label: Option<&str>) -> Expr {
        node(ExprKind::Continue {
            label: label.map(Into::into),
        })
    }

    fn call(name: &str) -> Expr {
        Expr::call(None, name, vec![])
    }

    #[test]
    fn test_while_jumps_back_to_condition() {
        let main = compile(vec![node(ExprKind::While {
            label: None,
            condition: Box::new(call("running")),
            body: vec![call("step")],
        })])
        .unwrap();
        let instructions = decoded(&main);
        let back = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Loop)
            .unwrap();
        assert_eq!(back.jump_target(), Some(0));
        let exit = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::PopJumpIfFalse)
            .unwrap();
        assert_eq!(exit.jump_target(), Some(back.next));
        assert_eq!(
            instructions.last().map(|instruction| instruction.opcode),
            Some(Opcode::Return)
        );
    }

    #[test]
    fn test_break_value_skips_loop_nil() {
        let main = compile(vec![node(ExprKind::Loop {
            label: None,
            body: vec![brk(None, Some(Expr::int("5")))],
        })])
        .unwrap();
        let instructions = decoded(&main);
        let jump = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Jump)
            .unwrap();
        let nil = instructions
            .iter()
            .rfind(|instruction| instruction.opcode == Opcode::Nil)
            .unwrap();
        assert_eq!(jump.jump_target(), Some(nil.next));
    }

    #[test]
    fn test_labeled_break_releases_inner_locals() {
        let inner = node(ExprKind::Loop {
            label: None,
            body: vec![Expr::declare("b", Expr::int("2")), brk(Some("outer"), None)],
        });
        let outer = node(ExprKind::Loop {
            label: Some("outer".into()),
            body: vec![Expr::declare("a", Expr::int("1")), inner],
        });
        let main = compile(vec![outer]).unwrap();
        let leave = decoded(&main)
            .into_iter()
            .find(|instruction| instruction.opcode == Opcode::LeaveScope8)
            .unwrap();
        assert_eq!(leave.operand, Operand::Pair(2, 2));
    }

    #[test]
    fn test_continue_in_do_while_targets_condition() {
        let main = compile(vec![node(ExprKind::DoWhile {
            label: None,
            body: vec![cont(None)],
            condition: Box::new(call("again")),
        })])
        .unwrap();
        let instructions = decoded(&main);
        let cont = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Jump)
            .unwrap();
        let condition = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::CallSelf8)
            .unwrap();
        assert_eq!(cont.jump_target(), Some(condition.offset));
        let back = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::PopJumpIfTrue)
            .unwrap();
        assert_eq!(back.jump_target(), Some(0));
    }

    #[test]
    fn test_for_in_uses_hidden_iterator_local() {
        let main = compile(vec![node(ExprKind::ForIn {
            label: None,
            parameter: "x".into(),
            iterable: Box::new(call("items")),
            body: vec![Expr::ident("x", Type::Untyped)],
        })])
        .unwrap();
        let opcodes: Vec<_> = decoded(&main).iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            [
                Opcode::PrepLocals8,
                Opcode::CallSelf8,
                Opcode::GetIterator,
                Opcode::SetLocal8,
                Opcode::Pop,
                Opcode::GetLocal8,
                Opcode::ForIn,
                Opcode::SetLocal8,
                Opcode::Pop,
                Opcode::GetLocal8,
                Opcode::Pop,
                Opcode::LeaveScope8,
                Opcode::Loop,
                Opcode::LeaveScope8,
                Opcode::Nil,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn test_numeric_for_continue_runs_increment() {
        let i = || Expr::ident("i", Type::std(StdType::Int));
        let main = compile(vec![node(ExprKind::NumericFor {
            label: None,
            initialiser: Some(Box::new(Expr::declare("i", Expr::int("0")))),
            condition: Some(Box::new(Expr::binary(
                BinaryOp::LessThan,
                i(),
                Expr::int("10"),
            ))),
            increment: Some(Box::new(node(ExprKind::Assignment {
                op: AssignOp::Binary(BinaryOp::Add),
                target: Box::new(i()),
                value: Box::new(Expr::int("1")),
            }))),
            body: vec![cont(None)],
        })])
        .unwrap();
        let instructions = decoded(&main);
        let cont = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Jump)
            .unwrap();
        let increment = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::AddInt)
            .unwrap();
        assert_eq!(
            cont.jump_target(),
            Some(increment.offset - 2 * 2),
            "continue lands on the increment's loads"
        );
        assert!(
            instructions
                .iter()
                .any(|instruction| instruction.opcode == Opcode::LessThanInt)
        );
    }

    fn continues_outer(label: &str) -> Expr {
        node(ExprKind::Loop {
            label: None,
            body: vec![cont(Some(label))],
        })
    }

    #[test]
    fn test_labeled_continue_from_inner_loop() {
        let main = compile(vec![node(ExprKind::DoWhile {
            label: Some("outer".into()),
            body: vec![continues_outer("outer")],
            condition: Box::new(call("again")),
        })])
        .unwrap();
        let instructions = decoded(&main);
        let inner_top = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Jump)
            .unwrap();
        assert_eq!(inner_top.offset, 0);
        let condition = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::CallSelf8)
            .unwrap();
        assert_eq!(inner_top.jump_target(), Some(condition.offset));
        let inner_back = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::Loop)
            .unwrap();
        assert_eq!(inner_back.jump_target(), Some(0));
        let outer_back = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::PopJumpIfTrue)
            .unwrap();
        assert_eq!(outer_back.jump_target(), Some(0));
    }

    #[test]
    fn test_labeled_continue_reaches_numeric_for_increment() {
        let i = || Expr::ident("i", Type::std(StdType::Int));
        let main = compile(vec![node(ExprKind::NumericFor {
            label: Some("outer".into()),
            initialiser: Some(Box::new(Expr::declare("i", Expr::int("0")))),
            condition: Some(Box::new(Expr::binary(
                BinaryOp::LessThan,
                i(),
                Expr::int("3"),
            ))),
            increment: Some(Box::new(node(ExprKind::Assignment {
                op: AssignOp::Binary(BinaryOp::Add),
                target: Box::new(i()),
                value: Box::new(Expr::int("1")),
            }))),
            body: vec![continues_outer("outer")],
        })])
        .unwrap();
        let instructions = decoded(&main);
        let jumps: Vec<_> = instructions
            .iter()
            .filter(|instruction| instruction.opcode == Opcode::Jump)
            .collect();
        assert_eq!(jumps.len(), 1);
        let increment = instructions
            .iter()
            .find(|instruction| instruction.opcode == Opcode::AddInt)
            .unwrap();
        assert_eq!(jumps[0].jump_target(), Some(increment.offset - 2 * 2));
        let backs: Vec<_> = instructions
            .iter()
            .filter(|instruction| instruction.opcode == Opcode::Loop)
            .collect();
        assert_eq!(backs.len(), 2);
        assert_eq!(backs[0].jump_target(), Some(jumps[0].offset));
    }

    #[test]
    fn test_invalid_exits() {
        assert_eq!(
            compile(vec![cont(None)]).unwrap_err(),
            CodegenErrorType::InvalidContinue
        );
        assert_eq!(
            compile(vec![brk(Some("nope"), None)]).unwrap_err(),
            CodegenErrorType::LabelNotFound("nope".into())
        );
        let closure = node(ExprKind::Closure {
            parameters: vec![],
            body: vec![brk(None, None)],
        });
        assert_eq!(
            compile(vec![node(ExprKind::Loop {
                label: None,
                body: vec![closure],
            })])
            .unwrap_err(),
            CodegenErrorType::InvalidBreak
        );
    }
}

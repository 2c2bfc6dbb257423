//! `do`/`catch`/`finally` and `return`.
//!
//! The catch clauses of a `do` are a chain of tests entered through a catch
//! entry covering the protected body. A `finally` clause is emitted once:
//! every way out of the protected region (falling through, returning, raising
//! or a loop exit) pushes a payload and a pending-action tag and jumps to the
//! single `finally` body, which dispatches on the tag when it is done.

use crate::{
    compile::{CompileResult, Compiler},
    error::{CodegenErrorType, InternalError, WarningType},
    ir::PatchSite,
    loops::{ControlFrame, FIRST_JUMP_TAG, FinallyContext},
    scope::ScopeKind,
};
use alloc::vec::Vec;
use kestrel_ast::{CatchClause, Expr, PatternKind};
use kestrel_compiler_core::bytecode::{CatchEntry, Opcode};

/// Pending-action tags. Loop exits use [`FIRST_JUMP_TAG`] and up.
const FALLTHROUGH_TAG: u8 = 0;
const RETURN_TAG: u8 = 1;
const RAISE_TAG: u8 = 2;

impl Compiler<'_> {
    pub(crate) fn compile_do(
        &mut self,
        body: &[Expr],
        catches: &[CatchClause],
        finally: Option<&[Expr]>,
    ) -> CompileResult<()> {
        if catches.is_empty() && finally.is_none() {
            return self.compile_block(body, ScopeKind::Block);
        }
        let has_finally = finally.is_some();
        if has_finally {
            let scope_depth = self.scope_depth()?;
            self.current()?
                .controls
                .push(ControlFrame::Finally(FinallyContext::new(scope_depth)));
        }

        let mut end_jumps = Vec::new();
        let body_start = self.offset()?;
        self.compile_block(body, ScopeKind::Block)?;
        let body_end = self.offset()?;
        self.leave_protected(has_finally, &mut end_jumps)?;

        let handler_start = self.offset()?;
        if !catches.is_empty() {
            self.compile_handlers(catches, has_finally, &mut end_jumps)?;
            self.push_catch_entry(body_start, body_end, handler_start, false)?;
        }
        let handlers_end = self.offset()?;

        if let Some(finally) = finally {
            let frame = self.current()?.controls.pop();
            let Some(ControlFrame::Finally(context)) = frame else {
                return Err(self.error(InternalError::ScopeUnderflow.into()));
            };
            self.compile_finally(finally, context, &mut end_jumps)?;
            self.push_catch_entry(body_start, handlers_end, handlers_end, true)?;
        }
        self.patch_all_here(end_jumps)
    }

    fn push_catch_entry(
        &mut self,
        from: usize,
        to: usize,
        handler: usize,
        is_finally: bool,
    ) -> CompileResult<()> {
        let offset = |offset: usize| {
            u32::try_from(offset).map_err(|_| self.error(CodegenErrorType::JumpTooFar))
        };
        let entry = CatchEntry {
            from: offset(from)?,
            to: offset(to)?,
            handler: offset(handler)?,
            is_finally,
        };
        self.current()?.code.push_catch_entry(entry);
        Ok(())
    }

    /// Completes a protected body or a catch clause normally, with its value
    /// on the stack.
    fn leave_protected(&mut self, has_finally: bool, end_jumps: &mut Vec<PatchSite>) -> CompileResult<()> {
        if has_finally {
            self.enter_finally(FALLTHROUGH_TAG)
        } else {
            end_jumps.push(self.emit_jump(Opcode::Jump)?);
            Ok(())
        }
    }

    /// Pushes `tag` and jumps to the body of the innermost `finally` region.
    fn enter_finally(&mut self, tag: u8) -> CompileResult<()> {
        self.emit_bytes(&[Opcode::LoadInt8 as u8, tag])?;
        let entry = self.emit_jump(Opcode::Jump)?;
        match self.current()?.controls.last_mut() {
            Some(ControlFrame::Finally(finally)) => {
                finally.entries.push(entry);
                Ok(())
            }
            _ => Err(self.error(InternalError::ScopeUnderflow.into())),
        }
    }

    /// Emits the clause tests. The VM enters them with the raised value as
    /// the only addition to the stack height of the protected region.
    fn compile_handlers(
        &mut self,
        catches: &[CatchClause],
        has_finally: bool,
        end_jumps: &mut Vec<PatchSite>,
    ) -> CompileResult<()> {
        let mut caught_all = false;
        for clause in catches {
            if caught_all {
                self.warn(WarningType::UnreachableCatch, clause.range);
                continue;
            }
            let prev_source_range =
                core::mem::replace(&mut self.current_source_range, clause.range);
            let compiled = self.compile_handler(clause, has_finally, end_jumps);
            self.current_source_range = prev_source_range;
            caught_all = compiled?;
        }
        if caught_all {
            return Ok(());
        }
        // no clause matched
        if has_finally {
            self.enter_finally(RAISE_TAG)
        } else {
            self.emit_op(Opcode::Rethrow)
        }
    }

    /// Compiles one clause, returning whether it matches every value.
    fn compile_handler(
        &mut self,
        clause: &CatchClause,
        has_finally: bool,
        end_jumps: &mut Vec<PatchSite>,
    ) -> CompileResult<bool> {
        let mismatch = match &clause.pattern.kind {
            PatternKind::Class(class) => {
                self.emit_op(Opcode::Dup)?;
                self.emit_symbol_op(Opcode::GetConst8, Opcode::GetConst16, class)?;
                self.emit_op(Opcode::InstanceOf)?;
                Some(self.emit_jump(Opcode::PopJumpIfFalse)?)
            }
            PatternKind::Value(value) => {
                self.emit_op(Opcode::Dup)?;
                self.compile_expression(value)?;
                self.emit_call(true, "==", 1)?;
                Some(self.emit_jump(Opcode::PopJumpIfFalse)?)
            }
            PatternKind::Any => None,
        };

        self.open_scope(ScopeKind::Catch)?;
        let binding = clause.pattern.binding.as_deref().unwrap_or("#exception");
        let slot = self.declare_local(binding, false)?;
        self.emit_indexed(
            Opcode::SetLocal8,
            Opcode::SetLocal16,
            usize::from(slot),
            CodegenErrorType::TooManyLocals,
        )?;
        self.emit_op(Opcode::Pop)?;
        self.current()?.handlers.push(slot);
        let compiled = self.compile_statements(&clause.body);
        self.current()?.handlers.pop();
        compiled?;
        self.close_scope()?;
        self.leave_protected(has_finally, end_jumps)?;

        match mismatch {
            Some(site) => {
                self.patch_here(site)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Emits the single `finally` body and the dispatch that follows it.
    fn compile_finally(
        &mut self,
        finally: &[Expr],
        context: FinallyContext,
        end_jumps: &mut Vec<PatchSite>,
    ) -> CompileResult<()> {
        // the unwinder lands here with the raised value pushed
        self.emit_bytes(&[Opcode::LoadInt8 as u8, RAISE_TAG])?;
        self.patch_all_here(context.entries)?;

        self.current()?.controls.push(ControlFrame::FinallyBody);
        let compiled = self.compile_block(finally, ScopeKind::Block);
        self.current()?.controls.pop();
        compiled?;
        self.emit_op(Opcode::Pop)?;

        let raise = self.emit_tag_jump(RAISE_TAG)?;
        let ret = if context.returns {
            Some(self.emit_tag_jump(RETURN_TAG)?)
        } else {
            None
        };
        let mut parked = Vec::with_capacity(context.jumps.len());
        for (index, jump) in context.jumps.iter().enumerate() {
            let tag = (index + FIRST_JUMP_TAG) as u8;
            parked.push((self.emit_tag_jump(tag)?, *jump));
        }
        // fallthrough: drop the tag, the payload is the value of the `do`
        self.emit_op(Opcode::Pop)?;
        end_jumps.push(self.emit_jump(Opcode::Jump)?);

        self.patch_here(raise)?;
        self.emit_op(Opcode::Rethrow)?;
        if let Some(ret) = ret {
            self.patch_here(ret)?;
            self.emit_return()?;
        }
        for (site, jump) in parked {
            self.patch_here(site)?;
            self.emit_loop_exit(jump.loop_index, jump.exit, true)?;
        }
        Ok(())
    }

    /// Returns the value on top of the stack, running the `finally` bodies
    /// of the regions being left first.
    pub(crate) fn emit_return(&mut self) -> CompileResult<()> {
        let mut frame_index = self.current()?.controls.len();
        while frame_index > 0 {
            frame_index -= 1;
            let finally_depth = match &self.current()?.controls[frame_index] {
                ControlFrame::FinallyBody => None,
                ControlFrame::Finally(finally) => Some(finally.scope_depth),
            };
            let Some(scope_depth) = finally_depth else {
                for op in [Opcode::Swap, Opcode::Pop, Opcode::Swap, Opcode::Pop] {
                    self.emit_op(op)?;
                }
                continue;
            };
            self.leave_scopes_to(scope_depth)?;
            self.emit_bytes(&[Opcode::LoadInt8 as u8, RETURN_TAG])?;
            let entry = self.emit_jump(Opcode::Jump)?;
            if let ControlFrame::Finally(finally) = &mut self.current()?.controls[frame_index] {
                finally.entries.push(entry);
                finally.returns = true;
            }
            return Ok(());
        }
        self.emit_op(Opcode::Return)
    }
}

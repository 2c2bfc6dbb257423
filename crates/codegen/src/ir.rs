//! The instruction arena of one function under construction.
//!
//! Instructions are appended as raw bytes. Jumps whose target is not known yet
//! are emitted with a zero operand and a [`PatchSite`]; every site must be
//! patched exactly once before [`CodeInfo::finalize_code`] freezes the arena.

use crate::{
    IndexSet,
    error::{CodegenErrorType, InternalError},
};
use alloc::{boxed::Box, vec::Vec};
use kestrel_compiler_core::{
    OneIndexed, Symbol, Value,
    bytecode::{BytecodeFunction, CatchEntry, FunctionFlags, LineInfo, Opcode, UpvalueDescriptor},
};
use ruff_text_size::TextRange;

/// Location of a jump operand that still holds a placeholder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchSite {
    /// Offset of the first operand byte.
    pub offset: usize,
    pub width: usize,
}

impl PatchSite {
    /// First byte after the operand, where displacements are counted from.
    pub const fn end(self) -> usize {
        self.offset + self.width
    }
}

/// Displacement from the end of an operand to `target`, if it fits the operand.
fn displacement(from: usize, target: usize) -> Option<i16> {
    let delta = isize::try_from(target).ok()? - isize::try_from(from).ok()?;
    i16::try_from(delta).ok()
}

pub struct CodeInfo {
    pub name: Symbol,
    pub flags: FunctionFlags,
    pub param_count: u32,
    pub source_range: TextRange,
    pub first_line: OneIndexed,
    instructions: Vec<u8>,
    line_table: Vec<LineInfo>,
    constants: IndexSet<Value>,
    unpatched: IndexSet<usize>,
    catch_entries: Vec<CatchEntry>,
}

impl CodeInfo {
    pub fn new(
        name: Symbol,
        flags: FunctionFlags,
        source_range: TextRange,
        first_line: OneIndexed,
    ) -> Self {
        Self {
            name,
            flags,
            param_count: 0,
            source_range,
            first_line,
            instructions: Vec::new(),
            line_table: Vec::new(),
            constants: IndexSet::default(),
            unpatched: IndexSet::default(),
            catch_entries: Vec::new(),
        }
    }

    /// Offset the next instruction will be written at.
    pub fn offset(&self) -> usize {
        self.instructions.len()
    }

    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    pub fn emit(&mut self, line: OneIndexed, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.instructions.extend_from_slice(bytes);
        push_line_run(&mut self.line_table, line, bytes.len());
    }

    pub fn emit_op(&mut self, line: OneIndexed, op: Opcode) {
        self.emit(line, &[op as u8]);
    }

    /// Emits the narrowest of a pair of opcodes that fits `index`.
    pub fn emit_indexed(
        &mut self,
        line: OneIndexed,
        short: Opcode,
        long: Opcode,
        index: usize,
        overflow: CodegenErrorType,
    ) -> Result<(), CodegenErrorType> {
        if let Ok(index) = u8::try_from(index) {
            self.emit(line, &[short as u8, index]);
        } else if let Ok(index) = u16::try_from(index) {
            let [hi, lo] = index.to_be_bytes();
            self.emit(line, &[long as u8, hi, lo]);
        } else {
            return Err(overflow);
        }
        Ok(())
    }

    /// Index of `value` in the pool, appending it when it is not there yet.
    pub fn add_constant(&mut self, value: Value) -> Result<usize, CodegenErrorType> {
        let (index, _) = self.constants.insert_full(value);
        if index > usize::from(u16::MAX) {
            return Err(CodegenErrorType::TooManyConstants);
        }
        Ok(index)
    }

    /// Emits a forward jump with a placeholder displacement.
    pub fn emit_jump(&mut self, line: OneIndexed, op: Opcode) -> PatchSite {
        debug_assert!(op.is_jump(), "{op} is not a jump");
        self.emit(line, &[op as u8, 0, 0]);
        self.record_site(self.offset() - 2)
    }

    /// Emits `JUMP_IF_PENDING tag` with a placeholder displacement.
    pub fn emit_tag_jump(&mut self, line: OneIndexed, tag: u8) -> PatchSite {
        self.emit(line, &[Opcode::JumpIfPending as u8, tag, 0, 0]);
        self.record_site(self.offset() - 2)
    }

    fn record_site(&mut self, offset: usize) -> PatchSite {
        self.unpatched.insert(offset);
        PatchSite { offset, width: 2 }
    }

    /// Resolves `site` so that it jumps to `target`.
    pub fn patch(&mut self, site: PatchSite, target: usize) -> Result<(), CodegenErrorType> {
        if !self.unpatched.swap_remove(&site.offset) {
            return Err(InternalError::DoublePatch {
                offset: site.offset,
            }
            .into());
        }
        let delta = displacement(site.end(), target).ok_or(CodegenErrorType::JumpTooFar)?;
        self.instructions[site.offset..site.end()].copy_from_slice(&delta.to_be_bytes());
        trace!("patched jump at {} to {target}", site.offset);
        Ok(())
    }

    /// Resolves `site` to the current offset.
    pub fn patch_here(&mut self, site: PatchSite) -> Result<(), CodegenErrorType> {
        self.patch(site, self.offset())
    }

    /// Emits a jump to an already known `target`, which may lie behind or
    /// ahead of the current offset.
    pub fn emit_jump_to(
        &mut self,
        line: OneIndexed,
        op: Opcode,
        target: usize,
    ) -> Result<(), CodegenErrorType> {
        let delta = displacement(self.offset() + 3, target).ok_or(CodegenErrorType::JumpTooFar)?;
        let [hi, lo] = delta.to_be_bytes();
        self.emit(line, &[op as u8, hi, lo]);
        Ok(())
    }

    pub fn push_catch_entry(&mut self, entry: CatchEntry) {
        self.catch_entries.push(entry);
    }

    /// Freezes the arena, prepending the `PREP_LOCALS` prologue when the
    /// function needs locals beyond its parameters.
    pub fn finalize_code(
        self,
        local_slots: usize,
        source_path: &str,
        upvalues: Vec<UpvalueDescriptor>,
    ) -> Result<BytecodeFunction, CodegenErrorType> {
        if let Some(&offset) = self.unpatched.first() {
            return Err(InternalError::UnpatchedJump { offset }.into());
        }

        let extra = local_slots.saturating_sub(self.param_count as usize);
        let mut prologue = Vec::new();
        if let Ok(count) = u8::try_from(extra) {
            if count > 0 {
                prologue.extend_from_slice(&[Opcode::PrepLocals8 as u8, count]);
            }
        } else if let Ok(count) = u16::try_from(extra) {
            let [hi, lo] = count.to_be_bytes();
            prologue.extend_from_slice(&[Opcode::PrepLocals16 as u8, hi, lo]);
        } else {
            return Err(CodegenErrorType::TooManyLocals);
        }

        let shift = prologue.len();
        let mut line_table = Vec::with_capacity(self.line_table.len() + 1);
        push_line_run(&mut line_table, self.first_line, shift);
        for info in self.line_table {
            push_line_run(&mut line_table, info.line, info.length as usize);
        }
        let mut instructions = prologue;
        instructions.extend_from_slice(&self.instructions);

        let shift = shift as u32;
        let catch_entries: Vec<_> = self
            .catch_entries
            .into_iter()
            .map(|entry| CatchEntry {
                from: entry.from + shift,
                to: entry.to + shift,
                handler: entry.handler + shift,
                ..entry
            })
            .collect();

        debug_assert_eq!(
            line_table.iter().map(|info| info.length as usize).sum::<usize>(),
            instructions.len()
        );

        trace!(
            "finalized {}: {} bytes, {} constants",
            self.name,
            instructions.len(),
            self.constants.len()
        );

        Ok(BytecodeFunction {
            name: self.name,
            instructions: instructions.into_boxed_slice(),
            source_path: source_path.into(),
            source_range: self.source_range,
            line_table: line_table.into_boxed_slice(),
            constants: self.constants.into_iter().collect::<Box<[_]>>(),
            param_count: self.param_count,
            upvalues: upvalues.into_boxed_slice(),
            catch_entries: catch_entries.into_boxed_slice(),
            flags: self.flags,
        })
    }
}

fn push_line_run(table: &mut Vec<LineInfo>, line: OneIndexed, length: usize) {
    if length == 0 {
        return;
    }
    let length = length as u32;
    match table.last_mut() {
        Some(last) if last.line == line => last.length += length,
        _ => table.push(LineInfo { line, length }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_compiler_core::bytecode::{Operand, decode_instruction};

    fn line(n: usize) -> OneIndexed {
        OneIndexed::new(n).unwrap()
    }

    fn code() -> CodeInfo {
        CodeInfo::new(
            "<main>".into(),
            FunctionFlags::empty(),
            TextRange::default(),
            OneIndexed::MIN,
        )
    }

    #[test]
    fn test_forward_jump_is_patched_relative_to_operand_end() {
        let mut code = code();
        let site = code.emit_jump(line(1), Opcode::Jump);
        code.emit_op(line(1), Opcode::Nil);
        code.emit_op(line(1), Opcode::Pop);
        code.patch_here(site).unwrap();
        assert_eq!(
            code.instructions(),
            [Opcode::Jump as u8, 0, 2, Opcode::Nil as u8, Opcode::Pop as u8]
        );
    }

    #[test]
    fn test_double_patch_is_an_internal_error() {
        let mut code = code();
        let site = code.emit_jump(line(1), Opcode::Jump);
        code.patch_here(site).unwrap();
        assert_eq!(
            code.patch_here(site),
            Err(CodegenErrorType::Internal(InternalError::DoublePatch {
                offset: 1
            }))
        );
    }

    #[test]
    fn test_unpatched_jump_blocks_finalize() {
        let mut code = code();
        code.emit_jump(line(1), Opcode::PopJumpIfFalse);
        assert!(matches!(
            code.finalize_code(0, "test", Vec::new()),
            Err(CodegenErrorType::Internal(InternalError::UnpatchedJump { offset: 1 }))
        ));
    }

    #[test]
    fn test_backward_jump() {
        let mut code = code();
        code.emit_op(line(1), Opcode::Nil);
        code.emit_op(line(1), Opcode::Pop);
        code.emit_jump_to(line(1), Opcode::Loop, 0).unwrap();
        let decoded = decode_instruction(code.instructions(), 2).unwrap();
        assert_eq!(decoded.operand, Operand::Jump(-5));
        assert_eq!(decoded.jump_target(), Some(0));
    }

    #[test]
    fn test_jump_too_far() {
        let mut code = code();
        let site = code.emit_jump(line(1), Opcode::Jump);
        for _ in 0..40_000 {
            code.emit_op(line(1), Opcode::Nop);
        }
        assert_eq!(code.patch_here(site), Err(CodegenErrorType::JumpTooFar));
    }

    #[test]
    fn test_narrowest_operand_width() {
        let mut code = code();
        code.emit_indexed(
            line(1),
            Opcode::GetLocal8,
            Opcode::GetLocal16,
            255,
            CodegenErrorType::TooManyLocals,
        )
        .unwrap();
        code.emit_indexed(
            line(1),
            Opcode::GetLocal8,
            Opcode::GetLocal16,
            256,
            CodegenErrorType::TooManyLocals,
        )
        .unwrap();
        assert_eq!(
            code.instructions(),
            [Opcode::GetLocal8 as u8, 255, Opcode::GetLocal16 as u8, 1, 0]
        );
    }

    #[test]
    fn test_prologue_shifts_lines_and_catch_entries() {
        let mut code = code();
        code.emit_op(line(2), Opcode::Nil);
        code.emit_op(line(3), Opcode::Return);
        code.push_catch_entry(CatchEntry {
            from: 0,
            to: 1,
            handler: 1,
            is_finally: false,
        });
        let function = code.finalize_code(3, "test", Vec::new()).unwrap();
        assert_eq!(
            &*function.instructions,
            [Opcode::PrepLocals8 as u8, 3, Opcode::Nil as u8, Opcode::Return as u8]
        );
        assert_eq!(
            &*function.line_table,
            [
                LineInfo {
                    line: line(1),
                    length: 2
                },
                LineInfo {
                    line: line(2),
                    length: 1
                },
                LineInfo {
                    line: line(3),
                    length: 1
                },
            ]
        );
        assert_eq!(function.catch_entries[0].from, 2);
        assert_eq!(function.catch_entries[0].handler, 3);
    }

    #[test]
    fn test_no_prologue_when_only_parameters() {
        let mut code = code();
        code.param_count = 2;
        code.emit_op(line(1), Opcode::Return);
        let function = code.finalize_code(2, "test", Vec::new()).unwrap();
        assert_eq!(&*function.instructions, [Opcode::Return as u8]);
        assert_eq!(function.line_table.len(), 1);
    }
}

//! Compiled function objects and the instruction encoding shared with the VM.

mod instruction;

pub use instruction::{InvalidOpcode, Opcode, OperandLayout};

use crate::{OneIndexed, Symbol, Value};
use alloc::{boxed::Box, string::String, vec::Vec};
use bitflags::bitflags;
use core::fmt;
use itertools::Itertools;
use ruff_text_size::TextRange;

/// Terminates the descriptor list of an ordinary closure.
pub const CLOSED_TERMINATOR: u8 = 0xff;
/// Terminates the descriptor list of a closure that is the root of a spawned task.
pub const SPAWN_TERMINATOR: u8 = 0xfe;

/// One run of the line table: `length` consecutive instruction bytes that
/// originate from `line`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineInfo {
    pub line: OneIndexed,
    pub length: u32,
}

/// A protected byte range `[from, to)` of a function and the address the VM
/// resumes at, with the raised value pushed, when an exception unwinds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatchEntry {
    pub from: u32,
    pub to: u32,
    pub handler: u32,
    /// `finally` entries must run on every unwind, `catch` entries only when a
    /// pattern matches.
    pub is_finally: bool,
}

impl CatchEntry {
    pub const fn contains(&self, offset: u32) -> bool {
        self.from <= offset && offset < self.to
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FunctionFlags: u8 {
        const CLOSURE = 0x01;
        const SPAWN = 0x02;
        const METHOD = 0x04;
        const SYNTHETIC = 0x08;
    }
}

bitflags! {
    /// First byte of an encoded upvalue descriptor.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct UpvalueFlags: u8 {
        /// Captures a local of the enclosing frame instead of one of its upvalues.
        const LOCAL = 0x01;
        /// The index that follows is 16 bits wide.
        const LONG = 0x02;
        const BY_REFERENCE = 0x04;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpvalueSource {
    /// A local slot of the immediately enclosing function.
    Local(u16),
    /// An upvalue of the immediately enclosing function.
    Upvalue(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    pub source: UpvalueSource,
    pub is_by_reference: bool,
}

impl UpvalueDescriptor {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let (mut flags, index) = match self.source {
            UpvalueSource::Local(slot) => (UpvalueFlags::LOCAL, slot),
            UpvalueSource::Upvalue(index) => (UpvalueFlags::empty(), index),
        };
        if self.is_by_reference {
            flags |= UpvalueFlags::BY_REFERENCE;
        }
        match u8::try_from(index) {
            Ok(index) => {
                out.push(flags.bits());
                out.push(index);
            }
            Err(_) => {
                out.push((flags | UpvalueFlags::LONG).bits());
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
    }

    /// Decodes one descriptor, returning it with the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Option<(Self, usize)> {
        let flags = UpvalueFlags::from_bits(*bytes.first()?)?;
        let (index, size) = if flags.contains(UpvalueFlags::LONG) {
            (u16::from_be_bytes([*bytes.get(1)?, *bytes.get(2)?]), 3)
        } else {
            (u16::from(*bytes.get(1)?), 2)
        };
        let source = if flags.contains(UpvalueFlags::LOCAL) {
            UpvalueSource::Local(index)
        } else {
            UpvalueSource::Upvalue(index)
        };
        let descriptor = Self {
            source,
            is_by_reference: flags.contains(UpvalueFlags::BY_REFERENCE),
        };
        Some((descriptor, size))
    }
}

impl fmt::Display for UpvalueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            UpvalueSource::Local(slot) => write!(f, "local {slot}")?,
            UpvalueSource::Upvalue(index) => write!(f, "upvalue {index}")?,
        }
        if self.is_by_reference {
            f.write_str(" ref")?;
        }
        Ok(())
    }
}

/// Operand byte of `DEF_NAMESPACE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NamespaceKind {
    Module = 0,
    Class = 1,
    Mixin = 2,
    Interface = 3,
}

impl NamespaceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Mixin => "mixin",
            Self::Interface => "interface",
        }
    }
}

/// A compiled unit: the top-level program, a method, a closure or one of the
/// synthetic definition functions.
#[derive(Clone)]
pub struct BytecodeFunction {
    pub name: Symbol,
    pub instructions: Box<[u8]>,
    pub source_path: String,
    pub source_range: TextRange,
    /// Run-length line information. The lengths sum to `instructions.len()`.
    pub line_table: Box<[LineInfo]>,
    pub constants: Box<[Value]>,
    pub param_count: u32,
    pub upvalues: Box<[UpvalueDescriptor]>,
    /// Innermost constructs first.
    pub catch_entries: Box<[CatchEntry]>,
    pub flags: FunctionFlags,
}

impl fmt::Debug for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<function {} at {}:{:?}>",
            self.name, self.source_path, self.source_range
        )
    }
}

/// Decoded operand of a single instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    U8(u8),
    U16(u16),
    I8(i8),
    Pair(u16, u16),
    Jump(i16),
    TagJump(u8, i16),
    Closure {
        constant: u16,
        upvalues: Vec<UpvalueDescriptor>,
        spawn: bool,
    },
}

impl Operand {
    /// Operand value for the single-index layouts, whatever their width.
    pub const fn index(&self) -> Option<usize> {
        match *self {
            Self::U8(v) => Some(v as usize),
            Self::U16(v) => Some(v as usize),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operand: Operand,
    /// Offset of the following instruction.
    pub next: usize,
}

impl DecodedInstruction {
    /// Absolute target of a jump instruction.
    pub fn jump_target(&self) -> Option<usize> {
        match self.operand {
            Operand::Jump(delta) | Operand::TagJump(_, delta) => {
                self.next.checked_add_signed(isize::from(delta))
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode { offset: usize, byte: u8 },
    Truncated { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode { offset, byte } => {
                write!(f, "invalid opcode {byte:#04x} at offset {offset}")
            }
            Self::Truncated { offset } => write!(f, "truncated instruction at offset {offset}"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Decodes the instruction starting at `offset`.
pub fn decode_instruction(code: &[u8], offset: usize) -> Result<DecodedInstruction, DecodeError> {
    let truncated = DecodeError::Truncated { offset };
    let byte = *code.get(offset).ok_or_else(|| truncated.clone())?;
    let opcode =
        Opcode::try_from(byte).map_err(|_| DecodeError::InvalidOpcode { offset, byte })?;
    let start = offset + 1;
    let read_u8 = |at: usize| code.get(at).copied().ok_or_else(|| truncated.clone());
    let read_u16 = |at: usize| -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes([read_u8(at)?, read_u8(at + 1)?]))
    };

    let (operand, next) = match opcode.layout() {
        OperandLayout::None => (Operand::None, start),
        OperandLayout::U8 => (Operand::U8(read_u8(start)?), start + 1),
        OperandLayout::I8 => (Operand::I8(read_u8(start)? as i8), start + 1),
        OperandLayout::U16 => (Operand::U16(read_u16(start)?), start + 2),
        OperandLayout::U8U8 => (
            Operand::Pair(read_u8(start)?.into(), read_u8(start + 1)?.into()),
            start + 2,
        ),
        OperandLayout::U16U16 => (
            Operand::Pair(read_u16(start)?, read_u16(start + 2)?),
            start + 4,
        ),
        OperandLayout::Jump => (Operand::Jump(read_u16(start)? as i16), start + 2),
        OperandLayout::TagJump => (
            Operand::TagJump(read_u8(start)?, read_u16(start + 1)? as i16),
            start + 3,
        ),
        OperandLayout::Closure8 | OperandLayout::Closure16 => {
            let (constant, mut at) = if opcode.layout() == OperandLayout::Closure8 {
                (u16::from(read_u8(start)?), start + 1)
            } else {
                (read_u16(start)?, start + 2)
            };
            let mut upvalues = Vec::new();
            let spawn = loop {
                match read_u8(at)? {
                    CLOSED_TERMINATOR => break false,
                    SPAWN_TERMINATOR => break true,
                    _ => {
                        let (descriptor, size) =
                            UpvalueDescriptor::decode(&code[at..]).ok_or_else(|| truncated.clone())?;
                        upvalues.push(descriptor);
                        at += size;
                    }
                }
            };
            (
                Operand::Closure {
                    constant,
                    upvalues,
                    spawn,
                },
                at + 1,
            )
        }
    };

    Ok(DecodedInstruction {
        offset,
        opcode,
        operand,
        next,
    })
}

/// Iterator over the instructions of a byte stream.
pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Result<DecodedInstruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.code.len() {
            return None;
        }
        let decoded = decode_instruction(self.code, self.offset);
        match &decoded {
            Ok(instruction) => self.offset = instruction.next,
            Err(_) => self.offset = self.code.len(),
        }
        Some(decoded)
    }
}

pub const fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions { code, offset: 0 }
}

impl BytecodeFunction {
    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }

    pub const fn instructions(&self) -> Instructions<'_> {
        instructions(&self.instructions)
    }

    /// Source line of the instruction byte at `offset`.
    pub fn line_for_offset(&self, offset: usize) -> Option<OneIndexed> {
        let mut end = 0usize;
        for info in &*self.line_table {
            end += info.length as usize;
            if offset < end {
                return Some(info.line);
            }
        }
        None
    }

    /// Nested functions stored in the constant pool.
    pub fn nested_functions(&self) -> impl Iterator<Item = &Self> {
        self.constants.iter().filter_map(|constant| match constant {
            Value::Function(function) => Some(&**function),
            _ => None,
        })
    }

    /// Displays this function followed by every function nested in its
    /// constant pool.
    pub fn display_expand_functions(&self) -> impl fmt::Display + '_ {
        struct Display<'a>(&'a BytecodeFunction);
        impl fmt::Display for Display<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.display_inner(f, true)
            }
        }
        Display(self)
    }

    fn display_inner(&self, f: &mut fmt::Formatter<'_>, expand: bool) -> fmt::Result {
        writeln!(f, "== {} ==", self.name)?;
        let mut last_line = None;
        for decoded in self.instructions() {
            let instruction = decoded.map_err(|_| fmt::Error)?;
            let line = self.line_for_offset(instruction.offset);
            if line != last_line {
                match line {
                    Some(line) => write!(f, "{:>4} ", line.get())?,
                    None => f.write_str("   ? ")?,
                }
                last_line = line;
            } else {
                f.write_str("     ")?;
            }
            write!(f, "{:04} ", instruction.offset)?;
            self.fmt_instruction(f, &instruction)?;
            writeln!(f)?;
        }
        for entry in &*self.catch_entries {
            writeln!(
                f,
                "catch [{:04}, {:04}) -> {:04}{}",
                entry.from,
                entry.to,
                entry.handler,
                if entry.is_finally { " finally" } else { "" }
            )?;
        }
        if expand {
            for function in self.nested_functions() {
                writeln!(f)?;
                function.display_inner(f, expand)?;
            }
        }
        Ok(())
    }

    fn fmt_instruction(
        &self,
        f: &mut fmt::Formatter<'_>,
        instruction: &DecodedInstruction,
    ) -> fmt::Result {
        let name = instruction.opcode.name();
        let constant = |index: usize| {
            self.constants
                .get(index)
                .map_or_else(|| String::from("?"), ToString::to_string)
        };
        match &instruction.operand {
            Operand::None => f.write_str(name),
            operand @ (Operand::U8(_) | Operand::U16(_)) => {
                let index = operand.index().unwrap_or_default();
                if references_constant(instruction.opcode) {
                    write!(f, "{name:<24} {index} ({})", constant(index))
                } else {
                    write!(f, "{name:<24} {index}")
                }
            }
            Operand::I8(value) => write!(f, "{name:<24} {value}"),
            Operand::Pair(a, b) => write!(f, "{name:<24} {a} {b}"),
            Operand::Jump(delta) => write!(
                f,
                "{name:<24} {delta} (to {:04})",
                instruction.jump_target().unwrap_or_default()
            ),
            Operand::TagJump(tag, delta) => write!(
                f,
                "{name:<24} {tag} {delta} (to {:04})",
                instruction.jump_target().unwrap_or_default()
            ),
            Operand::Closure {
                constant: index,
                upvalues,
                spawn,
            } => {
                write!(
                    f,
                    "{name:<24} {index} ({}) [{}]",
                    constant(usize::from(*index)),
                    upvalues.iter().format(", ")
                )?;
                if *spawn {
                    f.write_str(" spawn")?;
                }
                Ok(())
            }
        }
    }
}

const fn references_constant(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        LoadValue8
            | LoadValue16
            | GetIvar8
            | GetIvar16
            | SetIvar8
            | SetIvar16
            | GetConst8
            | GetConst16
            | CallMethod8
            | CallMethod16
            | CallSelf8
            | CallSelf16
    )
}

impl fmt::Display for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display_inner(f, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(instructions: Vec<u8>, constants: Vec<Value>) -> BytecodeFunction {
        let length = instructions.len() as u32;
        BytecodeFunction {
            name: "<main>".into(),
            instructions: instructions.into(),
            source_path: "test.kes".to_owned(),
            source_range: TextRange::default(),
            line_table: vec![LineInfo {
                line: OneIndexed::MIN,
                length,
            }]
            .into(),
            constants: constants.into(),
            param_count: 0,
            upvalues: Box::default(),
            catch_entries: Box::default(),
            flags: FunctionFlags::empty(),
        }
    }

    #[test]
    fn test_upvalue_descriptor_widths() {
        let mut out = Vec::new();
        let short = UpvalueDescriptor {
            source: UpvalueSource::Local(3),
            is_by_reference: true,
        };
        let long = UpvalueDescriptor {
            source: UpvalueSource::Upvalue(300),
            is_by_reference: false,
        };
        short.encode(&mut out);
        long.encode(&mut out);
        assert_eq!(out, [0x05, 3, 0x02, 0x01, 0x2c]);
        assert_eq!(UpvalueDescriptor::decode(&out), Some((short, 2)));
        assert_eq!(UpvalueDescriptor::decode(&out[2..]), Some((long, 3)));
    }

    #[test]
    fn test_decode_closure_operand() {
        let code = [
            Opcode::Closure8 as u8,
            0,
            0x05,
            1,
            SPAWN_TERMINATOR,
            Opcode::Return as u8,
        ];
        let decoded: Vec<_> = instructions(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(
            decoded[0].operand,
            Operand::Closure {
                constant: 0,
                upvalues: vec![UpvalueDescriptor {
                    source: UpvalueSource::Local(1),
                    is_by_reference: true,
                }],
                spawn: true,
            }
        );
        assert_eq!(decoded[1].offset, 5);
    }

    #[test]
    fn test_jump_target_is_relative_to_operand_end() {
        let code = [Opcode::Jump as u8, 0x00, 0x01, Opcode::Nil as u8, Opcode::Return as u8];
        let jump = decode_instruction(&code, 0).unwrap();
        assert_eq!(jump.jump_target(), Some(4));
        let code = [Opcode::Nil as u8, Opcode::Loop as u8, 0xff, 0xfc];
        let back = decode_instruction(&code, 1).unwrap();
        assert_eq!(back.jump_target(), Some(0));
    }

    #[test]
    fn test_truncated_operand() {
        let code = [Opcode::LoadValue16 as u8, 0x00];
        assert_eq!(
            decode_instruction(&code, 0),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn test_disassembly() {
        let main = function(
            vec![Opcode::LoadValue8 as u8, 0, Opcode::Return as u8],
            vec![Value::Int8(6)],
        );
        insta::assert_snapshot!(main.to_string(), @r"
        == <main> ==
           1 0000 LOAD_VALUE8              0 (6i8)
             0002 RETURN
        ");
    }
}

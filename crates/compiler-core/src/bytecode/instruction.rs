use core::fmt;

/// Shape of the operand bytes that follow an opcode. Multi-byte operands are
/// big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandLayout {
    None,
    U8,
    U16,
    I8,
    U8U8,
    U16U16,
    /// Signed 16-bit displacement counted from the end of the operand.
    Jump,
    /// A one-byte tag followed by a jump displacement.
    TagJump,
    /// A constant index, one upvalue descriptor per captured variable and a
    /// terminator byte.
    Closure8,
    Closure16,
}

impl OperandLayout {
    /// Operand size for the fixed-width layouts.
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::None => Some(0),
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::U8U8 | Self::Jump => Some(2),
            Self::TagJump => Some(3),
            Self::U16U16 => Some(4),
            Self::Closure8 | Self::Closure16 => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidOpcode(pub u8);

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode {:#04x}", self.0)
    }
}

impl core::error::Error for InvalidOpcode {}

macro_rules! opcodes {
    ($($(#[$attr:meta])* $variant:ident = $byte:literal => $name:literal $layout:ident,)*) => {
        /// A single-byte operation of the VM.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($(#[$attr])* $variant = $byte,)*
        }

        impl Opcode {
            /// Mnemonic used by the disassembler.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            pub const fn layout(self) -> OperandLayout {
                match self {
                    $(Self::$variant => OperandLayout::$layout,)*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = InvalidOpcode;

            fn try_from(byte: u8) -> Result<Self, InvalidOpcode> {
                match byte {
                    $($byte => Ok(Self::$variant),)*
                    _ => Err(InvalidOpcode(byte)),
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00 => "NOP" None,
    Return = 0x01 => "RETURN" None,
    Nil = 0x02 => "NIL" None,
    True = 0x03 => "TRUE" None,
    False = 0x04 => "FALSE" None,
    SelfValue = 0x05 => "SELF" None,
    Pop = 0x06 => "POP" None,
    Dup = 0x07 => "DUP" None,
    Swap = 0x08 => "SWAP" None,
    /// Pushes a small default integer.
    LoadInt8 = 0x09 => "LOAD_INT8" I8,
    LoadValue8 = 0x0a => "LOAD_VALUE8" U8,
    LoadValue16 = 0x0b => "LOAD_VALUE16" U16,
    GetLocal8 = 0x0c => "GET_LOCAL8" U8,
    GetLocal16 = 0x0d => "GET_LOCAL16" U16,
    /// Stores into a local and leaves the value on the stack.
    SetLocal8 = 0x0e => "SET_LOCAL8" U8,
    SetLocal16 = 0x0f => "SET_LOCAL16" U16,
    GetUpvalue8 = 0x10 => "GET_UPVALUE8" U8,
    GetUpvalue16 = 0x11 => "GET_UPVALUE16" U16,
    SetUpvalue8 = 0x12 => "SET_UPVALUE8" U8,
    SetUpvalue16 = 0x13 => "SET_UPVALUE16" U16,
    GetIvar8 = 0x14 => "GET_IVAR8" U8,
    GetIvar16 = 0x15 => "GET_IVAR16" U16,
    SetIvar8 = 0x16 => "SET_IVAR8" U8,
    SetIvar16 = 0x17 => "SET_IVAR16" U16,
    GetConst8 = 0x18 => "GET_CONST8" U8,
    GetConst16 = 0x19 => "GET_CONST16" U16,
    /// Reserves local slots on top of the parameters.
    PrepLocals8 = 0x1a => "PREP_LOCALS8" U8,
    PrepLocals16 = 0x1b => "PREP_LOCALS16" U16,
    /// Marks `count` slots ending at `last` dead and closes their upvalues.
    LeaveScope8 = 0x1c => "LEAVE_SCOPE8" U8U8,
    LeaveScope16 = 0x1d => "LEAVE_SCOPE16" U16U16,

    Jump = 0x20 => "JUMP" Jump,
    /// Backward unconditional jump.
    Loop = 0x21 => "LOOP" Jump,
    PopJumpIfFalse = 0x22 => "POP_JUMP_IF_FALSE" Jump,
    PopJumpIfTrue = 0x23 => "POP_JUMP_IF_TRUE" Jump,
    PopJumpIfNil = 0x24 => "POP_JUMP_IF_NIL" Jump,
    PopJumpIfNotNil = 0x25 => "POP_JUMP_IF_NOT_NIL" Jump,
    /// Jumps keeping the value when it is falsy, pops it otherwise.
    JumpIfFalseOrPop = 0x26 => "JUMP_IF_FALSE_OR_POP" Jump,
    JumpIfTrueOrPop = 0x27 => "JUMP_IF_TRUE_OR_POP" Jump,
    JumpIfNotNilOrPop = 0x28 => "JUMP_IF_NOT_NIL_OR_POP" Jump,
    /// Pops the top of the stack and jumps when it equals the tag operand,
    /// otherwise leaves it in place.
    JumpIfPending = 0x29 => "JUMP_IF_PENDING" TagJump,
    /// Pops an iterator and pushes its next element, or jumps when it is
    /// exhausted.
    ForIn = 0x2a => "FOR_IN" Jump,

    Add = 0x30 => "ADD" None,
    Subtract = 0x31 => "SUBTRACT" None,
    Multiply = 0x32 => "MULTIPLY" None,
    Divide = 0x33 => "DIVIDE" None,
    Modulo = 0x34 => "MODULO" None,
    Exponentiate = 0x35 => "EXPONENTIATE" None,
    BitwiseAnd = 0x36 => "BITWISE_AND" None,
    BitwiseOr = 0x37 => "BITWISE_OR" None,
    BitwiseXor = 0x38 => "BITWISE_XOR" None,
    LeftBitshift = 0x39 => "LBITSHIFT" None,
    RightBitshift = 0x3a => "RBITSHIFT" None,
    Equal = 0x3b => "EQUAL" None,
    NotEqual = 0x3c => "NOT_EQUAL" None,
    StrictEqual = 0x3d => "STRICT_EQUAL" None,
    StrictNotEqual = 0x3e => "STRICT_NOT_EQUAL" None,
    LessThan = 0x3f => "LESS" None,
    LessThanEqual = 0x40 => "LESS_EQUAL" None,
    GreaterThan = 0x41 => "GREATER" None,
    GreaterThanEqual = 0x42 => "GREATER_EQUAL" None,
    Negate = 0x43 => "NEGATE" None,
    UnaryPlus = 0x44 => "UNARY_PLUS" None,
    BitwiseNot = 0x45 => "BITWISE_NOT" None,
    Not = 0x46 => "NOT" None,

    AddInt = 0x50 => "ADD_INT" None,
    SubtractInt = 0x51 => "SUBTRACT_INT" None,
    MultiplyInt = 0x52 => "MULTIPLY_INT" None,
    DivideInt = 0x53 => "DIVIDE_INT" None,
    EqualInt = 0x54 => "EQUAL_INT" None,
    NotEqualInt = 0x55 => "NOT_EQUAL_INT" None,
    LessThanInt = 0x56 => "LESS_INT" None,
    LessThanEqualInt = 0x57 => "LESS_EQUAL_INT" None,
    GreaterThanInt = 0x58 => "GREATER_INT" None,
    GreaterThanEqualInt = 0x59 => "GREATER_EQUAL_INT" None,
    NegateInt = 0x5a => "NEGATE_INT" None,

    AddFloat = 0x60 => "ADD_FLOAT" None,
    SubtractFloat = 0x61 => "SUBTRACT_FLOAT" None,
    MultiplyFloat = 0x62 => "MULTIPLY_FLOAT" None,
    DivideFloat = 0x63 => "DIVIDE_FLOAT" None,
    EqualFloat = 0x64 => "EQUAL_FLOAT" None,
    NotEqualFloat = 0x65 => "NOT_EQUAL_FLOAT" None,
    LessThanFloat = 0x66 => "LESS_FLOAT" None,
    LessThanEqualFloat = 0x67 => "LESS_EQUAL_FLOAT" None,
    GreaterThanFloat = 0x68 => "GREATER_FLOAT" None,
    GreaterThanEqualFloat = 0x69 => "GREATER_EQUAL_FLOAT" None,
    NegateFloat = 0x6a => "NEGATE_FLOAT" None,

    /// Calls through the inline cache of a `CallSiteInfo` constant.
    CallMethod8 = 0x70 => "CALL_METHOD8" U8,
    CallMethod16 = 0x71 => "CALL_METHOD16" U16,
    /// Like `CallMethod8` with the frame's `self` as the receiver.
    CallSelf8 = 0x72 => "CALL_SELF8" U8,
    CallSelf16 = 0x73 => "CALL_SELF16" U16,
    Closure8 = 0x74 => "CLOSURE8" Closure8,
    Closure16 = 0x75 => "CLOSURE16" Closure16,
    NewArrayList8 = 0x76 => "NEW_ARRAY_LIST8" U8,
    NewArrayList16 = 0x77 => "NEW_ARRAY_LIST16" U16,
    GetIterator = 0x78 => "GET_ITERATOR" None,
    Throw = 0x79 => "THROW" None,
    /// Re-raises a caught value keeping its original stack trace.
    Rethrow = 0x7a => "RETHROW" None,
    /// Pops a class and a value and pushes whether the value is an instance.
    InstanceOf = 0x7b => "INSTANCE_OF" None,

    Root = 0x80 => "ROOT" None,
    /// Pops superclass (or nil), name and parent, defines the namespace.
    DefNamespace = 0x81 => "DEF_NAMESPACE" U8,
    /// Pops a mixin and a target namespace.
    Include = 0x82 => "INCLUDE" None,
    /// Pops a function and its owner namespace.
    DefMethod = 0x83 => "DEF_METHOD" None,
    /// Pops a tuple of ivar names and a class.
    DefIvars = 0x84 => "DEF_IVARS" None,
}

impl Opcode {
    /// Whether the operand of this opcode is a relative jump displacement.
    pub const fn is_jump(self) -> bool {
        matches!(self.layout(), OperandLayout::Jump | OperandLayout::TagJump)
    }

    /// Whether control never continues with the next instruction.
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Return | Self::Jump | Self::Loop | Self::Throw | Self::Rethrow
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = Opcode::try_from(byte) {
                assert_eq!(op as u8, byte, "{op}");
            }
        }
        assert_eq!(Opcode::try_from(0xff), Err(InvalidOpcode(0xff)));
    }

    #[test]
    fn test_paired_widths() {
        assert_eq!(Opcode::LoadValue8.layout(), OperandLayout::U8);
        assert_eq!(Opcode::LoadValue16.layout(), OperandLayout::U16);
        assert_eq!(Opcode::LeaveScope16.layout().fixed_size(), Some(4));
        assert_eq!(Opcode::JumpIfPending.layout().fixed_size(), Some(3));
        assert!(Opcode::ForIn.is_jump());
        assert!(!Opcode::Closure8.is_jump());
    }
}

//! Syntax tree nodes. Every expression carries its source range and the
//! static type the checker inferred for it.

use crate::types::{StdType, Type};
use alloc::{boxed::Box, string::String, vec::Vec};
use kestrel_compiler_core::bytecode::NamespaceKind;
use ruff_text_size::{Ranged, TextRange};

/// A whole compilation unit, a sequence of top-level expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub body: Vec<Expr>,
    pub range: TextRange,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub range: TextRange,
    pub ty: Type,
    pub node: ExprKind,
}

impl Ranged for Expr {
    fn range(&self) -> TextRange {
        self.range
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-a`
    Negate,
    /// `+a`
    Plus,
    /// `~a`
    BitwiseNot,
    /// `!a`
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponentiate,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftBitshift,
    RightBitshift,
    Equal,
    NotEqual,
    /// `===`, identity of value and class.
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Exponentiate => "**",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::LeftBitshift => "<<",
            Self::RightBitshift => ">>",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::StrictEqual => "===",
            Self::StrictNotEqual => "!==",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
        }
    }

    pub const fn is_equality(self) -> bool {
        matches!(
            self,
            Self::Equal | Self::NotEqual | Self::StrictEqual | Self::StrictNotEqual
        )
    }

    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            Self::BitwiseAnd
                | Self::BitwiseOr
                | Self::BitwiseXor
                | Self::LeftBitshift
                | Self::RightBitshift
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    NilCoalesce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`, `-=`, `<<=` and the other operator-assignments.
    Binary(BinaryOp),
    /// `&&=`, `||=` and `??=`.
    Logical(LogicalOp),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub range: TextRange,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatternKind {
    /// Matches instances of a class given by its constant path.
    Class(String),
    /// Matches values equal to the expression.
    Value(Box<Expr>),
    /// Matches everything.
    Any,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub kind: PatternKind,
    /// Local the caught value is bound to when the pattern matches.
    pub binding: Option<String>,
    pub range: TextRange,
}

impl Pattern {
    /// A pattern that matches every value.
    pub const fn is_catch_all(&self) -> bool {
        matches!(self.kind, PatternKind::Any)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub pattern: Pattern,
    pub body: Vec<Expr>,
    pub range: TextRange,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    SelfValue,
    /// Literals keep their source text; it is parsed during compilation.
    Int(String),
    Int8(String),
    Int16(String),
    Int32(String),
    Int64(String),
    UInt8(String),
    UInt16(String),
    UInt32(String),
    UInt64(String),
    Float(String),
    Float32(String),
    String(String),
    Char(char),
    Symbol(String),

    /// A local variable read.
    Identifier(String),
    /// A constant by path, e.g. `Std::Error`.
    Constant(String),
    /// `@name`
    InstanceVariable(String),
    /// `[a, b, c]`
    ArrayList(Vec<Expr>),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `var a = 1`, `val a = 1` or the short form `a := 1`.
    VariableDeclaration {
        name: String,
        value: Option<Box<Expr>>,
        mutable: bool,
    },
    /// The target is an `Identifier` or an `InstanceVariable`.
    Assignment {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// `if`, the ternary operator and the `if` modifier.
    If {
        condition: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },
    Unless {
        condition: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },

    While {
        label: Option<String>,
        condition: Box<Expr>,
        body: Vec<Expr>,
    },
    Until {
        label: Option<String>,
        condition: Box<Expr>,
        body: Vec<Expr>,
    },
    /// `loop ... end`, an infinite loop.
    Loop {
        label: Option<String>,
        body: Vec<Expr>,
    },
    /// `do ... end while cond`, the body runs at least once.
    DoWhile {
        label: Option<String>,
        body: Vec<Expr>,
        condition: Box<Expr>,
    },
    DoUntil {
        label: Option<String>,
        body: Vec<Expr>,
        condition: Box<Expr>,
    },
    /// `for element in iterable ... end`
    ForIn {
        label: Option<String>,
        parameter: String,
        iterable: Box<Expr>,
        body: Vec<Expr>,
    },
    /// `fornum init; cond; increment ... end`
    NumericFor {
        label: Option<String>,
        initialiser: Option<Box<Expr>>,
        condition: Option<Box<Expr>>,
        increment: Option<Box<Expr>>,
        body: Vec<Expr>,
    },

    /// `break`, `break$label` or `break value`.
    Break {
        label: Option<String>,
        value: Option<Box<Expr>>,
    },
    Continue {
        label: Option<String>,
    },
    Return {
        value: Option<Box<Expr>>,
    },
    /// `throw value`, or a bare `throw` re-raising the value caught by the
    /// enclosing handler.
    Throw {
        value: Option<Box<Expr>>,
    },
    /// `do ... catch ... finally ... end`. Without catches and finally it is a
    /// plain block.
    Do {
        body: Vec<Expr>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Expr>>,
    },

    /// `receiver.name(arguments)`, or `name(arguments)` on `self`.
    MethodCall {
        receiver: Option<Box<Expr>>,
        name: String,
        arguments: Vec<Expr>,
    },
    /// `|a, b| -> body`
    Closure {
        parameters: Vec<Parameter>,
        body: Vec<Expr>,
    },
    /// `go body`, runs the body as an independently scheduled task.
    Spawn {
        body: Vec<Expr>,
    },

    NamespaceDeclaration {
        kind: NamespaceKind,
        /// Name relative to the enclosing declaration.
        constant: String,
        body: Vec<Expr>,
    },
    MethodDefinition {
        name: String,
        parameters: Vec<Parameter>,
        body: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(node: ExprKind, range: TextRange) -> Self {
        Self {
            range,
            ty: Type::Untyped,
            node,
        }
    }

    #[must_use]
    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: TextRange) -> Self {
        self.range = range;
        self
    }

    /// A literal of the default integer type.
    pub fn int(text: &str) -> Self {
        Self::literal(ExprKind::Int(text.into()), StdType::Int)
    }

    pub fn float(text: &str) -> Self {
        Self::literal(ExprKind::Float(text.into()), StdType::Float)
    }

    /// A literal of one of the sized numeric types.
    pub fn sized(std: StdType, text: &str) -> Self {
        let text = String::from(text);
        let node = match std {
            StdType::Int8 => ExprKind::Int8(text),
            StdType::Int16 => ExprKind::Int16(text),
            StdType::Int32 => ExprKind::Int32(text),
            StdType::Int64 => ExprKind::Int64(text),
            StdType::UInt8 => ExprKind::UInt8(text),
            StdType::UInt16 => ExprKind::UInt16(text),
            StdType::UInt32 => ExprKind::UInt32(text),
            StdType::UInt64 => ExprKind::UInt64(text),
            StdType::Float32 => ExprKind::Float32(text),
            StdType::Float => ExprKind::Float(text),
            _ => ExprKind::Int(text),
        };
        Self::literal(node, std)
    }

    pub fn string(text: &str) -> Self {
        Self::literal(ExprKind::String(text.into()), StdType::String)
    }

    pub fn boolean(value: bool) -> Self {
        if value {
            Self::literal(ExprKind::True, StdType::True)
        } else {
            Self::literal(ExprKind::False, StdType::False)
        }
    }

    pub fn nil() -> Self {
        Self::literal(ExprKind::Nil, StdType::Nil)
    }

    pub fn ident(name: &str, ty: Type) -> Self {
        Self::new(ExprKind::Identifier(name.into()), TextRange::default()).with_type(ty)
    }

    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        let range = left.range.cover(right.range);
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            range,
        )
    }

    pub fn logical(op: LogicalOp, left: Self, right: Self) -> Self {
        let range = left.range.cover(right.range);
        Self::new(
            ExprKind::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            range,
        )
    }

    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        let range = operand.range;
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            range,
        )
    }

    pub fn declare(name: &str, value: Self) -> Self {
        let range = value.range;
        Self::new(
            ExprKind::VariableDeclaration {
                name: name.into(),
                value: Some(Box::new(value)),
                mutable: true,
            },
            range,
        )
    }

    pub fn call(receiver: Option<Self>, name: &str, arguments: Vec<Self>) -> Self {
        Self::new(
            ExprKind::MethodCall {
                receiver: receiver.map(Box::new),
                name: name.into(),
                arguments,
            },
            TextRange::default(),
        )
    }

    fn literal(node: ExprKind, std: StdType) -> Self {
        Self::new(node, TextRange::default()).with_type(Type::std(std))
    }

    /// Loop label of a loop-producing node.
    pub fn loop_label(&self) -> Option<Option<&str>> {
        match &self.node {
            ExprKind::While { label, .. }
            | ExprKind::Until { label, .. }
            | ExprKind::Loop { label, .. }
            | ExprKind::DoWhile { label, .. }
            | ExprKind::DoUntil { label, .. }
            | ExprKind::ForIn { label, .. }
            | ExprKind::NumericFor { label, .. } => Some(label.as_deref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruff_text_size::TextSize;

    #[test]
    fn test_binary_covers_operands() {
        let left = Expr::int("1").with_range(TextRange::new(TextSize::new(0), TextSize::new(1)));
        let right = Expr::int("2").with_range(TextRange::new(TextSize::new(4), TextSize::new(5)));
        let sum = Expr::binary(BinaryOp::Add, left, right);
        assert_eq!(sum.range, TextRange::new(TextSize::new(0), TextSize::new(5)));
        assert_eq!(sum.ty, Type::Untyped);
    }

    #[test]
    fn test_loop_label() {
        let loop_expr = Expr::new(
            ExprKind::Loop {
                label: Some("outer".into()),
                body: vec![],
            },
            TextRange::default(),
        );
        assert_eq!(loop_expr.loop_label(), Some(Some("outer")));
        assert_eq!(Expr::nil().loop_label(), None);
    }
}

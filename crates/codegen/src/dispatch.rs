//! Operator dispatch tier selection.
//!
//! Folding (the first tier) is tried by the caller through the resolver. What
//! is left is decided from the checker's static operand types alone, so equal
//! type pairings always pick the same tier.

use kestrel_ast::{BinaryOp, Checker, StdType, Type, UnaryOp};
use kestrel_compiler_core::bytecode::Opcode;

/// How a non-folded operator is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// An opcode that assumes its operand types.
    Specialized(Opcode),
    /// An opcode that switches on the runtime tags of builtin values.
    Builtin(Opcode),
    /// A method call through an inline cache. `negate` asks for a `NOT` on
    /// the result, used for `!=` which is sent as `==`.
    Dynamic {
        method: &'static str,
        argument_count: u32,
        negate: bool,
    },
}

impl Dispatch {
    const fn dynamic(method: &'static str, argument_count: u32) -> Self {
        Self::Dynamic {
            method,
            argument_count,
            negate: false,
        }
    }
}

fn specialized_int(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Add => Opcode::AddInt,
        BinaryOp::Subtract => Opcode::SubtractInt,
        BinaryOp::Multiply => Opcode::MultiplyInt,
        BinaryOp::Divide => Opcode::DivideInt,
        BinaryOp::Equal => Opcode::EqualInt,
        BinaryOp::NotEqual => Opcode::NotEqualInt,
        BinaryOp::LessThan => Opcode::LessThanInt,
        BinaryOp::LessThanEqual => Opcode::LessThanEqualInt,
        BinaryOp::GreaterThan => Opcode::GreaterThanInt,
        BinaryOp::GreaterThanEqual => Opcode::GreaterThanEqualInt,
        _ => return None,
    })
}

fn specialized_float(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Add => Opcode::AddFloat,
        BinaryOp::Subtract => Opcode::SubtractFloat,
        BinaryOp::Multiply => Opcode::MultiplyFloat,
        BinaryOp::Divide => Opcode::DivideFloat,
        BinaryOp::Equal => Opcode::EqualFloat,
        BinaryOp::NotEqual => Opcode::NotEqualFloat,
        BinaryOp::LessThan => Opcode::LessThanFloat,
        BinaryOp::LessThanEqual => Opcode::LessThanEqualFloat,
        BinaryOp::GreaterThan => Opcode::GreaterThanFloat,
        BinaryOp::GreaterThanEqual => Opcode::GreaterThanEqualFloat,
        _ => return None,
    })
}

pub const fn generic_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Subtract => Opcode::Subtract,
        BinaryOp::Multiply => Opcode::Multiply,
        BinaryOp::Divide => Opcode::Divide,
        BinaryOp::Modulo => Opcode::Modulo,
        BinaryOp::Exponentiate => Opcode::Exponentiate,
        BinaryOp::BitwiseAnd => Opcode::BitwiseAnd,
        BinaryOp::BitwiseOr => Opcode::BitwiseOr,
        BinaryOp::BitwiseXor => Opcode::BitwiseXor,
        BinaryOp::LeftBitshift => Opcode::LeftBitshift,
        BinaryOp::RightBitshift => Opcode::RightBitshift,
        BinaryOp::Equal => Opcode::Equal,
        BinaryOp::NotEqual => Opcode::NotEqual,
        BinaryOp::StrictEqual => Opcode::StrictEqual,
        BinaryOp::StrictNotEqual => Opcode::StrictNotEqual,
        BinaryOp::LessThan => Opcode::LessThan,
        BinaryOp::LessThanEqual => Opcode::LessThanEqual,
        BinaryOp::GreaterThan => Opcode::GreaterThan,
        BinaryOp::GreaterThanEqual => Opcode::GreaterThanEqual,
    }
}

/// The builtin class `ty` is exactly, when it is one of `allowed`.
fn builtin_of(ty: &Type, allowed: &[StdType]) -> Option<StdType> {
    ty.as_std().filter(|std| allowed.contains(std))
}

fn is_subtype_of_std(checker: &dyn Checker, ty: &Type, std: StdType) -> bool {
    !ty.is_untyped() && !ty.is_never() && checker.is_subtype(ty, &checker.std_type(std))
}

/// Chooses tiers two to four for `left op right`.
pub fn select_binary(checker: &dyn Checker, op: BinaryOp, left: &Type, right: &Type) -> Dispatch {
    if matches!(op, BinaryOp::StrictEqual | BinaryOp::StrictNotEqual) {
        return Dispatch::Builtin(generic_opcode(op));
    }

    if is_subtype_of_std(checker, left, StdType::Int) && is_subtype_of_std(checker, right, StdType::Int)
    {
        if let Some(opcode) = specialized_int(op) {
            return Dispatch::Specialized(opcode);
        }
    }
    if is_subtype_of_std(checker, left, StdType::Float)
        && is_subtype_of_std(checker, right, StdType::Float)
    {
        if let Some(opcode) = specialized_float(op) {
            return Dispatch::Specialized(opcode);
        }
    }

    let builtin = if op.is_bitwise() {
        builtin_of(left, StdType::INTEGERS).is_some() && builtin_of(right, StdType::INTEGERS).is_some()
    } else if op.is_equality() {
        let comparable = |ty: &Type| {
            builtin_numeric(ty) || builtin_of(ty, StdType::VALUE_TYPES).is_some()
        };
        comparable(left) && comparable(right)
    } else {
        builtin_numeric(left) && builtin_numeric(right)
    };
    if builtin {
        return Dispatch::Builtin(generic_opcode(op));
    }

    match op {
        BinaryOp::NotEqual => Dispatch::Dynamic {
            method: BinaryOp::Equal.as_str(),
            argument_count: 1,
            negate: true,
        },
        _ => Dispatch::dynamic(op.as_str(), 1),
    }
}

/// Chooses tiers two to four for a unary operator. `!` is never dispatched
/// dynamically, truthiness is fixed by the VM.
pub fn select_unary(checker: &dyn Checker, op: UnaryOp, operand: &Type) -> Dispatch {
    match op {
        UnaryOp::Not => Dispatch::Builtin(Opcode::Not),
        UnaryOp::Negate if is_subtype_of_std(checker, operand, StdType::Int) => {
            Dispatch::Specialized(Opcode::NegateInt)
        }
        UnaryOp::Negate if is_subtype_of_std(checker, operand, StdType::Float) => {
            Dispatch::Specialized(Opcode::NegateFloat)
        }
        UnaryOp::Negate if builtin_numeric(operand) => Dispatch::Builtin(Opcode::Negate),
        UnaryOp::Plus if builtin_numeric(operand) => Dispatch::Builtin(Opcode::UnaryPlus),
        UnaryOp::BitwiseNot if builtin_of(operand, StdType::INTEGERS).is_some() => {
            Dispatch::Builtin(Opcode::BitwiseNot)
        }
        UnaryOp::Negate => Dispatch::dynamic("-@", 0),
        UnaryOp::Plus => Dispatch::dynamic("+@", 0),
        UnaryOp::BitwiseNot => Dispatch::dynamic("~", 0),
    }
}

fn builtin_numeric(ty: &Type) -> bool {
    ty.as_std().is_some_and(StdType::is_numeric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ast::{NamespaceKind, NamespaceNode, NamespaceTree, NominalChecker};

    fn std(ty: StdType) -> Type {
        Type::std(ty)
    }

    #[test]
    fn test_specialized_for_default_int_and_float() {
        let checker = NominalChecker::default();
        assert_eq!(
            select_binary(&checker, BinaryOp::Add, &std(StdType::Int), &std(StdType::Int)),
            Dispatch::Specialized(Opcode::AddInt)
        );
        assert_eq!(
            select_binary(
                &checker,
                BinaryOp::LessThan,
                &std(StdType::Float),
                &std(StdType::Float)
            ),
            Dispatch::Specialized(Opcode::LessThanFloat)
        );
        assert_eq!(
            select_unary(&checker, UnaryOp::Negate, &std(StdType::Int)),
            Dispatch::Specialized(Opcode::NegateInt)
        );
    }

    #[test]
    fn test_builtin_for_sized_and_mixed_numbers() {
        let checker = NominalChecker::default();
        let int8 = std(StdType::Int8);
        assert_eq!(
            select_binary(&checker, BinaryOp::Add, &int8, &int8),
            Dispatch::Builtin(Opcode::Add)
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::Multiply, &std(StdType::Int), &std(StdType::Float)),
            Dispatch::Builtin(Opcode::Multiply)
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::Modulo, &std(StdType::Int), &std(StdType::Int)),
            Dispatch::Builtin(Opcode::Modulo)
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::BitwiseAnd, &int8, &int8),
            Dispatch::Builtin(Opcode::BitwiseAnd)
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::Equal, &std(StdType::String), &std(StdType::String)),
            Dispatch::Builtin(Opcode::Equal)
        );
        assert_eq!(
            select_unary(&checker, UnaryOp::BitwiseNot, &int8),
            Dispatch::Builtin(Opcode::BitwiseNot)
        );
    }

    #[test]
    fn test_floats_are_not_bitwise_capable() {
        let checker = NominalChecker::default();
        let float = std(StdType::Float);
        assert_eq!(
            select_binary(&checker, BinaryOp::BitwiseOr, &float, &float),
            Dispatch::dynamic("|", 1)
        );
    }

    #[test]
    fn test_dynamic_for_user_types() {
        let tree = NamespaceTree::new(vec![NamespaceNode::new(NamespaceKind::Class, "Vector")]);
        let checker = NominalChecker::new(tree);
        let vector = Type::named("Vector");
        assert_eq!(
            select_binary(&checker, BinaryOp::Add, &vector, &vector),
            Dispatch::dynamic("+", 1)
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::NotEqual, &vector, &vector),
            Dispatch::Dynamic {
                method: "==",
                argument_count: 1,
                negate: true
            }
        );
        assert_eq!(
            select_binary(&checker, BinaryOp::StrictEqual, &vector, &vector),
            Dispatch::Builtin(Opcode::StrictEqual)
        );
        assert_eq!(
            select_unary(&checker, UnaryOp::Negate, &vector),
            Dispatch::dynamic("-@", 0)
        );
        assert_eq!(
            select_unary(&checker, UnaryOp::Not, &vector),
            Dispatch::Builtin(Opcode::Not)
        );
    }

    #[test]
    fn test_untyped_operands_are_dynamic() {
        let checker = NominalChecker::default();
        assert_eq!(
            select_binary(&checker, BinaryOp::Add, &Type::Untyped, &std(StdType::Int)),
            Dispatch::dynamic("+", 1)
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let checker = NominalChecker::default();
        let pairs = [
            (std(StdType::Int), std(StdType::Int)),
            (std(StdType::Int8), std(StdType::Int8)),
            (Type::Untyped, Type::Untyped),
        ];
        for (left, right) in &pairs {
            let first = select_binary(&checker, BinaryOp::Subtract, left, right);
            for _ in 0..3 {
                assert_eq!(select_binary(&checker, BinaryOp::Subtract, left, right), first);
            }
        }
    }
}

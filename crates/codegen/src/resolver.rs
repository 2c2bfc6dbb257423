//! Compile-time evaluation of statically known expressions.
//!
//! An expression is static when it is built from literals with operators
//! only; this is decided bottom-up here rather than by the checker. The
//! operator functions mirror the VM: sized integers wrap, floats follow IEEE
//! semantics and the default integer type is arbitrary precision, demoted to
//! a machine word whenever it fits.

use crate::error::{CodegenErrorType, WarningType};
use alloc::{string::String, vec::Vec};
use kestrel_ast::{BinaryOp, Checker, Expr, ExprKind, LogicalOp, Type, UnaryOp};
use kestrel_compiler_core::{Symbol, Value};
use malachite_bigint::BigInt as BigInteger;
use num_integer::Integer;
use num_traits::{Num, ToPrimitive, Zero};
use ruff_text_size::TextRange;

/// Largest exponent folded for the default integer type.
const MAX_FOLDED_EXPONENT: u32 = 1024;
/// Largest shift folded for the default integer type.
const MAX_FOLDED_SHIFT: u64 = 1 << 16;
/// Largest result, in bits, that a power or left shift may fold to.
const MAX_FOLDED_BITS: u64 = 1 << 17;

/// A literal whose text does not parse as its type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    pub error: CodegenErrorType,
    pub range: TextRange,
}

pub struct StaticResolver<'a> {
    checker: &'a dyn Checker,
    warnings: Vec<(WarningType, TextRange)>,
}

impl<'a> StaticResolver<'a> {
    pub fn new(checker: &'a dyn Checker) -> Self {
        Self {
            checker,
            warnings: Vec::new(),
        }
    }

    /// Warnings raised by successful resolutions since the last call.
    pub fn take_warnings(&mut self) -> Vec<(WarningType, TextRange)> {
        core::mem::take(&mut self.warnings)
    }

    /// Reduces `expr` to a value, or `Ok(None)` when it is not statically
    /// known. Warnings are only kept when the whole expression reduces.
    pub fn resolve(&mut self, expr: &Expr) -> Result<Option<Value>, ResolveError> {
        let mark = self.warnings.len();
        let resolved = self.resolve_inner(expr);
        if !matches!(resolved, Ok(Some(_))) {
            self.warnings.truncate(mark);
        }
        resolved
    }

    fn resolve_inner(&mut self, expr: &Expr) -> Result<Option<Value>, ResolveError> {
        let invalid = |kind: &'static str, text: &str| ResolveError {
            error: CodegenErrorType::InvalidLiteral {
                kind,
                text: text.into(),
            },
            range: expr.range,
        };
        let value = match &expr.node {
            ExprKind::Nil => Value::Nil,
            ExprKind::True => Value::Bool(true),
            ExprKind::False => Value::Bool(false),
            ExprKind::Int(text) => {
                Value::int(parse_int(text).ok_or_else(|| invalid("Int", text))?)
            }
            ExprKind::Int8(text) => Value::Int8(sized(text, 8).ok_or_else(|| invalid("Int8", text))? as i8),
            ExprKind::Int16(text) => {
                Value::Int16(sized(text, 16).ok_or_else(|| invalid("Int16", text))? as i16)
            }
            ExprKind::Int32(text) => {
                Value::Int32(sized(text, 32).ok_or_else(|| invalid("Int32", text))? as i32)
            }
            ExprKind::Int64(text) => {
                Value::Int64(sized(text, 64).ok_or_else(|| invalid("Int64", text))? as i64)
            }
            ExprKind::UInt8(text) => {
                Value::UInt8(sized(text, 8).ok_or_else(|| invalid("UInt8", text))? as u8)
            }
            ExprKind::UInt16(text) => {
                Value::UInt16(sized(text, 16).ok_or_else(|| invalid("UInt16", text))? as u16)
            }
            ExprKind::UInt32(text) => {
                Value::UInt32(sized(text, 32).ok_or_else(|| invalid("UInt32", text))? as u32)
            }
            ExprKind::UInt64(text) => {
                Value::UInt64(sized(text, 64).ok_or_else(|| invalid("UInt64", text))?)
            }
            ExprKind::Float(text) => {
                Value::Float(parse_float(text).ok_or_else(|| invalid("Float", text))?)
            }
            ExprKind::Float32(text) => {
                Value::Float32(parse_float(text).ok_or_else(|| invalid("Float32", text))?)
            }
            ExprKind::String(text) => Value::String(text.clone()),
            ExprKind::Char(c) => Value::Char(*c),
            ExprKind::Symbol(name) => Value::Symbol(Symbol::from(name.as_str())),
            ExprKind::Unary { op, operand } => {
                let Some(operand) = self.resolve_inner(operand)? else {
                    return Ok(None);
                };
                match unary_op(*op, &operand) {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let Some(l) = self.resolve_inner(left)? else {
                    return Ok(None);
                };
                let Some(r) = self.resolve_inner(right)? else {
                    return Ok(None);
                };
                let Some(value) = binary_op(*op, &l, &r) else {
                    return Ok(None);
                };
                if op.is_equality() {
                    self.check_equality_types(*op, &left.ty, &right.ty, expr.range);
                }
                value
            }
            ExprKind::Logical { op, left, right } => {
                let Some(l) = self.resolve_inner(left)? else {
                    return Ok(None);
                };
                let short_circuits = match op {
                    LogicalOp::And => !l.is_truthy(),
                    LogicalOp::Or => l.is_truthy(),
                    LogicalOp::NilCoalesce => !matches!(l, Value::Nil),
                };
                if short_circuits {
                    l
                } else {
                    return self.resolve_inner(right);
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn check_equality_types(&mut self, op: BinaryOp, left: &Type, right: &Type, range: TextRange) {
        if left.is_untyped() || right.is_untyped() {
            return;
        }
        if self.checker.is_subtype(left, right) || self.checker.is_subtype(right, left) {
            return;
        }
        let (left, right) = (left.to_string(), right.to_string());
        let warning = match op {
            BinaryOp::Equal | BinaryOp::StrictEqual => {
                WarningType::ImpossibleEquality { left, right }
            }
            _ => WarningType::TautologicalInequality { left, right },
        };
        self.warnings.push((warning, range));
    }
}

fn strip_underscores(text: &str) -> String {
    text.chars().filter(|&c| c != '_').collect()
}

/// Parses integer literal text: decimal, or `0x`, `0b`, `0o` prefixed, with
/// optional `_` separators.
pub fn parse_int(text: &str) -> Option<BigInteger> {
    let digits = strip_underscores(text);
    let (radix, digits) = match digits.get(..2) {
        Some("0x" | "0X") => (16, &digits[2..]),
        Some("0b" | "0B") => (2, &digits[2..]),
        Some("0o" | "0O") => (8, &digits[2..]),
        _ => (10, digits.as_str()),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    BigInteger::from_str_radix(digits, radix).ok()
}

/// Parses the literal of a sized integer. Any bit pattern of the width is
/// accepted, so `128i8` is the same value as `-128i8`.
fn sized(text: &str, bits: u32) -> Option<u64> {
    let value = parse_int(text)?.to_u64()?;
    if bits < 64 && value >> bits != 0 {
        return None;
    }
    Some(value)
}

/// Parses float literal text. The literal must start with a digit, which
/// rules out the `inf` and `NaN` spellings `str::parse` accepts.
pub fn parse_float<F: core::str::FromStr>(text: &str) -> Option<F> {
    let text = strip_underscores(text);
    if !text.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

pub fn unary_op(op: UnaryOp, operand: &Value) -> Option<Value> {
    use Value::*;

    let value = match (op, operand) {
        (UnaryOp::Not, value) => Bool(!value.is_truthy()),
        (UnaryOp::Plus, value) => match value {
            SmallInt(_) | BigInt(_) | Int8(_) | Int16(_) | Int32(_) | Int64(_) | UInt8(_)
            | UInt16(_) | UInt32(_) | UInt64(_) | Float(_) | Float32(_) => value.clone(),
            _ => return None,
        },
        (UnaryOp::Negate, SmallInt(v)) => match v.checked_neg() {
            Some(v) => SmallInt(v),
            None => Value::int(-BigInteger::from(*v)),
        },
        (UnaryOp::Negate, BigInt(v)) => Value::int(-(**v).clone()),
        (UnaryOp::Negate, Int8(v)) => Int8(v.wrapping_neg()),
        (UnaryOp::Negate, Int16(v)) => Int16(v.wrapping_neg()),
        (UnaryOp::Negate, Int32(v)) => Int32(v.wrapping_neg()),
        (UnaryOp::Negate, Int64(v)) => Int64(v.wrapping_neg()),
        (UnaryOp::Negate, UInt8(v)) => UInt8(v.wrapping_neg()),
        (UnaryOp::Negate, UInt16(v)) => UInt16(v.wrapping_neg()),
        (UnaryOp::Negate, UInt32(v)) => UInt32(v.wrapping_neg()),
        (UnaryOp::Negate, UInt64(v)) => UInt64(v.wrapping_neg()),
        (UnaryOp::Negate, Float(v)) => Float(-v),
        (UnaryOp::Negate, Float32(v)) => Float32(-v),
        (UnaryOp::BitwiseNot, SmallInt(v)) => SmallInt(!v),
        (UnaryOp::BitwiseNot, BigInt(v)) => Value::int(-(**v).clone() - 1),
        (UnaryOp::BitwiseNot, Int8(v)) => Int8(!v),
        (UnaryOp::BitwiseNot, Int16(v)) => Int16(!v),
        (UnaryOp::BitwiseNot, Int32(v)) => Int32(!v),
        (UnaryOp::BitwiseNot, Int64(v)) => Int64(!v),
        (UnaryOp::BitwiseNot, UInt8(v)) => UInt8(!v),
        (UnaryOp::BitwiseNot, UInt16(v)) => UInt16(!v),
        (UnaryOp::BitwiseNot, UInt32(v)) => UInt32(!v),
        (UnaryOp::BitwiseNot, UInt64(v)) => UInt64(!v),
        _ => return None,
    };
    Some(value)
}

pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    use BinaryOp::*;

    match op {
        Equal | StrictEqual => Some(Value::Bool(values_equal(left, right))),
        NotEqual | StrictNotEqual => Some(Value::Bool(!values_equal(left, right))),
        LessThan | LessThanEqual | GreaterThan | GreaterThanEqual => {
            comparison(op, left, right).map(Value::Bool)
        }
        _ => arithmetic(op, left, right),
    }
}

/// Equality of builtin values. Values of different classes are never equal.
fn values_equal(left: &Value, right: &Value) -> bool {
    use Value::*;

    match (left, right) {
        (Float(a), Float(b)) => a == b,
        (Float32(a), Float32(b)) => a == b,
        (SmallInt(_) | BigInt(_), SmallInt(_) | BigInt(_)) => {
            left.as_bigint() == right.as_bigint()
        }
        _ => left == right,
    }
}

fn comparison(op: BinaryOp, left: &Value, right: &Value) -> Option<bool> {
    use Value::*;

    fn ordered<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> Option<bool> {
        Some(match op {
            BinaryOp::LessThan => a < b,
            BinaryOp::LessThanEqual => a <= b,
            BinaryOp::GreaterThan => a > b,
            BinaryOp::GreaterThanEqual => a >= b,
            _ => return None,
        })
    }

    match (left, right) {
        (SmallInt(a), SmallInt(b)) => ordered(op, a, b),
        (SmallInt(_) | BigInt(_), SmallInt(_) | BigInt(_)) => {
            ordered(op, left.as_bigint()?, right.as_bigint()?)
        }
        (Float(a), Float(b)) => ordered(op, *a, *b),
        (Float(a), SmallInt(_) | BigInt(_)) => ordered(op, *a, int_to_f64(right)?),
        (SmallInt(_) | BigInt(_), Float(b)) => ordered(op, int_to_f64(left)?, *b),
        (Float32(a), Float32(b)) => ordered(op, a, b),
        (Int8(a), Int8(b)) => ordered(op, a, b),
        (Int16(a), Int16(b)) => ordered(op, a, b),
        (Int32(a), Int32(b)) => ordered(op, a, b),
        (Int64(a), Int64(b)) => ordered(op, a, b),
        (UInt8(a), UInt8(b)) => ordered(op, a, b),
        (UInt16(a), UInt16(b)) => ordered(op, a, b),
        (UInt32(a), UInt32(b)) => ordered(op, a, b),
        (UInt64(a), UInt64(b)) => ordered(op, a, b),
        (String(a), String(b)) => ordered(op, a, b),
        (Char(a), Char(b)) => ordered(op, a, b),
        _ => None,
    }
}

fn int_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::SmallInt(v) => Some(*v as f64),
        Value::BigInt(v) => v.to_f64(),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    use Value::*;

    let value = match (left, right) {
        (SmallInt(a), SmallInt(b)) => match small_int_arithmetic(op, *a, *b) {
            Some(Ok(v)) => SmallInt(v),
            Some(Err(())) => int_arithmetic(op, &BigInteger::from(*a), &BigInteger::from(*b))?,
            None => return None,
        },
        (SmallInt(_) | BigInt(_), SmallInt(_) | BigInt(_)) => {
            int_arithmetic(op, &left.as_bigint()?, &right.as_bigint()?)?
        }
        (Float(a), Float(b)) => Float(float_arithmetic(op, *a, *b)?),
        (Float(a), SmallInt(_) | BigInt(_)) => Float(float_arithmetic(op, *a, int_to_f64(right)?)?),
        (SmallInt(_) | BigInt(_), Float(b)) => Float(float_arithmetic(op, int_to_f64(left)?, *b)?),
        (Float32(a), Float32(b)) => Float32(float32_arithmetic(op, *a, *b)?),
        (Int8(a), Int8(b)) => Int8(wrapping_i8(op, *a, *b)?),
        (Int16(a), Int16(b)) => Int16(wrapping_i16(op, *a, *b)?),
        (Int32(a), Int32(b)) => Int32(wrapping_i32(op, *a, *b)?),
        (Int64(a), Int64(b)) => Int64(wrapping_i64(op, *a, *b)?),
        (UInt8(a), UInt8(b)) => UInt8(wrapping_u8(op, *a, *b)?),
        (UInt16(a), UInt16(b)) => UInt16(wrapping_u16(op, *a, *b)?),
        (UInt32(a), UInt32(b)) => UInt32(wrapping_u32(op, *a, *b)?),
        (UInt64(a), UInt64(b)) => UInt64(wrapping_u64(op, *a, *b)?),
        (String(a), String(b)) if op == BinaryOp::Add => String(format!("{a}{b}")),
        (String(a), Char(b)) if op == BinaryOp::Add => String(format!("{a}{b}")),
        _ => return None,
    };
    Some(value)
}

/// Machine-word fast path. `Some(Err(()))` means the result needs arbitrary
/// precision, `None` that the operation does not fold.
fn small_int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Option<Result<i64, ()>> {
    use BinaryOp::*;

    let checked = match op {
        Add => a.checked_add(b),
        Subtract => a.checked_sub(b),
        Multiply => a.checked_mul(b),
        Divide if b == 0 => return None,
        Divide => a.checked_div(b),
        Modulo if b == 0 => return None,
        Modulo => a.checked_rem(b),
        BitwiseAnd => Some(a & b),
        BitwiseOr => Some(a | b),
        BitwiseXor => Some(a ^ b),
        _ => return Some(Err(())),
    };
    Some(checked.ok_or(()))
}

fn int_arithmetic(op: BinaryOp, a: &BigInteger, b: &BigInteger) -> Option<Value> {
    use BinaryOp::*;

    let result = match op {
        Add => a + b,
        Subtract => a - b,
        Multiply => a * b,
        Divide | Modulo if b.is_zero() => return None,
        Divide => a.div_rem(b).0,
        Modulo => a.div_rem(b).1,
        Exponentiate => {
            let exponent = b.to_u32().filter(|e| *e <= MAX_FOLDED_EXPONENT)?;
            if a.bits().saturating_mul(u64::from(exponent)) > MAX_FOLDED_BITS {
                return None;
            }
            num_traits::pow(a.clone(), exponent as usize)
        }
        BitwiseAnd => a & b,
        BitwiseOr => a | b,
        BitwiseXor => a ^ b,
        LeftBitshift | RightBitshift => {
            let amount = b.to_i64()?;
            let left = (op == LeftBitshift) == (amount >= 0);
            let amount = amount.unsigned_abs();
            if left {
                if amount > MAX_FOLDED_SHIFT || a.bits() + amount > MAX_FOLDED_BITS {
                    return None;
                }
                a << amount as usize
            } else {
                a >> amount.min(MAX_FOLDED_SHIFT) as usize
            }
        }
        _ => return None,
    };
    Some(Value::int(result))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        BinaryOp::Exponentiate => a.powf(b),
        _ => return None,
    })
}

fn float32_arithmetic(op: BinaryOp, a: f32, b: f32) -> Option<f32> {
    Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        BinaryOp::Exponentiate => a.powf(b),
        _ => return None,
    })
}

macro_rules! fixed_width_arithmetic {
    ($($name:ident: $t:ty,)*) => {$(
        fn $name(op: BinaryOp, a: $t, b: $t) -> Option<$t> {
            use BinaryOp::*;

            Some(match op {
                Add => a.wrapping_add(b),
                Subtract => a.wrapping_sub(b),
                Multiply => a.wrapping_mul(b),
                Divide | Modulo if b == 0 => return None,
                Divide => a.wrapping_div(b),
                Modulo => a.wrapping_rem(b),
                Exponentiate => a.wrapping_pow(u32::try_from(b).ok()?),
                BitwiseAnd => a & b,
                BitwiseOr => a | b,
                BitwiseXor => a ^ b,
                LeftBitshift | RightBitshift => {
                    // shifting a widened copy saturates oversized amounts:
                    // left shifts end up 0, right shifts 0 or -1
                    let amount = i64::try_from(b).ok()?;
                    let left = (op == LeftBitshift) == (amount >= 0);
                    let amount = amount.unsigned_abs().min(127) as u32;
                    let wide = i128::from(a);
                    let shifted = if left { wide << amount } else { wide >> amount };
                    shifted as $t
                }
                _ => return None,
            })
        }
    )*};
}

fixed_width_arithmetic! {
    wrapping_i8: i8,
    wrapping_i16: i16,
    wrapping_i32: i32,
    wrapping_i64: i64,
    wrapping_u8: u8,
    wrapping_u16: u16,
    wrapping_u32: u32,
    wrapping_u64: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ast::{NominalChecker, StdType};
    use malachite_bigint::BigInt;

    fn resolve(expr: &Expr) -> Option<Value> {
        let checker = NominalChecker::default();
        StaticResolver::new(&checker).resolve(expr).unwrap()
    }

    fn int8(text: &str) -> Expr {
        Expr::sized(StdType::Int8, text)
    }

    #[test]
    fn test_fold_sized_integers_wrap() {
        let sum = Expr::binary(BinaryOp::Add, int8("1"), int8("5"));
        assert_eq!(resolve(&sum), Some(Value::Int8(6)));
        let overflow = Expr::binary(BinaryOp::Add, int8("127"), int8("1"));
        assert_eq!(resolve(&overflow), Some(Value::Int8(-128)));
        let negated = Expr::unary(UnaryOp::Negate, int8("128"));
        assert_eq!(resolve(&negated), Some(Value::Int8(-128)));
        let unsigned = Expr::binary(
            BinaryOp::Subtract,
            Expr::sized(StdType::UInt8, "0"),
            Expr::sized(StdType::UInt8, "1"),
        );
        assert_eq!(resolve(&unsigned), Some(Value::UInt8(255)));
    }

    #[test]
    fn test_default_int_promotes_and_demotes() {
        let big = Expr::binary(
            BinaryOp::Add,
            Expr::int("9_223_372_036_854_775_807"),
            Expr::int("1"),
        );
        let expected = BigInt::from(i64::MAX) + BigInt::from(1);
        assert_eq!(resolve(&big), Some(Value::BigInt(Box::new(expected))));

        let back = Expr::binary(BinaryOp::Subtract, big, Expr::int("1"));
        assert_eq!(resolve(&back), Some(Value::SmallInt(i64::MAX)));
    }

    #[test]
    fn test_division_truncates_and_zero_does_not_fold() {
        let div = Expr::binary(BinaryOp::Divide, Expr::int("7"), Expr::int("2"));
        assert_eq!(resolve(&div), Some(Value::SmallInt(3)));
        let negative = Expr::binary(
            BinaryOp::Divide,
            Expr::unary(UnaryOp::Negate, Expr::int("7")),
            Expr::int("2"),
        );
        assert_eq!(resolve(&negative), Some(Value::SmallInt(-3)));
        let by_zero = Expr::binary(BinaryOp::Divide, Expr::int("1"), Expr::int("0"));
        assert_eq!(resolve(&by_zero), None);
        let float_by_zero = Expr::binary(BinaryOp::Divide, Expr::float("1.0"), Expr::float("0.0"));
        assert_eq!(resolve(&float_by_zero), Some(Value::Float(f64::INFINITY)));
    }

    #[test]
    fn test_mixed_int_float() {
        let sum = Expr::binary(BinaryOp::Add, Expr::int("1"), Expr::float("0.5"));
        assert_eq!(resolve(&sum), Some(Value::Float(1.5)));
        let less = Expr::binary(BinaryOp::LessThan, Expr::int("1"), Expr::float("1.5"));
        assert_eq!(resolve(&less), Some(Value::Bool(true)));
    }

    #[test]
    fn test_bitwise_chain_folds_entirely() {
        let chain = Expr::binary(
            BinaryOp::BitwiseAnd,
            Expr::binary(BinaryOp::BitwiseAnd, Expr::int("23"), Expr::int("15")),
            Expr::int("46"),
        );
        assert_eq!(resolve(&chain), Some(Value::SmallInt(23 & 15 & 46)));

        let partial = Expr::binary(
            BinaryOp::BitwiseAnd,
            Expr::binary(
                BinaryOp::BitwiseAnd,
                Expr::int("23"),
                Expr::ident("x", Type::std(StdType::Int)),
            ),
            Expr::int("46"),
        );
        assert_eq!(resolve(&partial), None);
    }

    #[test]
    fn test_shifts() {
        let shl = Expr::binary(BinaryOp::LeftBitshift, Expr::int("1"), Expr::int("70"));
        assert_eq!(resolve(&shl), Some(Value::int(BigInt::from(1) << 70usize)));
        let sized = Expr::binary(
            BinaryOp::RightBitshift,
            Expr::unary(UnaryOp::Negate, int8("128")),
            int8("9"),
        );
        assert_eq!(resolve(&sized), Some(Value::Int8(-1)));
        let sized = Expr::binary(BinaryOp::LeftBitshift, int8("1"), int8("8"));
        assert_eq!(resolve(&sized), Some(Value::Int8(0)));
    }

    #[test]
    fn test_oversized_results_do_not_fold() {
        let power = |base: Expr, exponent: &str| {
            Expr::binary(BinaryOp::Exponentiate, base, Expr::int(exponent))
        };
        let big = resolve(&power(Expr::int("10"), "1024"));
        assert_eq!(big, Some(Value::int(num_traits::pow(BigInt::from(10), 1024))));
        assert_eq!(resolve(&power(power(Expr::int("10"), "1024"), "1024")), None);
        assert_eq!(
            resolve(&power(power(power(Expr::int("10"), "1024"), "1024"), "8")),
            None
        );
        let shl = Expr::binary(
            BinaryOp::LeftBitshift,
            power(Expr::int("2"), "1000"),
            Expr::int("65536"),
        );
        assert_eq!(resolve(&shl), Some(Value::int(BigInt::from(1) << 66536usize)));
        let shl = Expr::binary(BinaryOp::LeftBitshift, shl, Expr::int("65536"));
        assert_eq!(resolve(&shl), None);
    }

    #[test]
    fn test_logical_short_circuit() {
        let dynamic = Expr::ident("x", Type::Untyped);
        let and = Expr::logical(LogicalOp::And, Expr::boolean(false), dynamic.clone());
        assert_eq!(resolve(&and), Some(Value::Bool(false)));
        let or = Expr::logical(LogicalOp::Or, Expr::boolean(false), dynamic.clone());
        assert_eq!(resolve(&or), None);
        let coalesce = Expr::logical(LogicalOp::NilCoalesce, Expr::nil(), Expr::int("3"));
        assert_eq!(resolve(&coalesce), Some(Value::SmallInt(3)));
        let coalesce = Expr::logical(LogicalOp::NilCoalesce, Expr::int("1"), dynamic);
        assert_eq!(resolve(&coalesce), Some(Value::SmallInt(1)));
    }

    #[test]
    fn test_mismatched_equality_folds_with_warning() {
        let checker = NominalChecker::default();
        let mut resolver = StaticResolver::new(&checker);
        let eq = Expr::binary(BinaryOp::Equal, Expr::int("25"), Expr::float("25.0"));
        assert_eq!(resolver.resolve(&eq), Ok(Some(Value::Bool(false))));
        assert_eq!(
            resolver.take_warnings(),
            [(
                WarningType::ImpossibleEquality {
                    left: "Std::Int".into(),
                    right: "Std::Float".into()
                },
                eq.range
            )]
        );

        let ne = Expr::binary(BinaryOp::NotEqual, Expr::int("25"), Expr::float("25.0"));
        assert_eq!(resolver.resolve(&ne), Ok(Some(Value::Bool(true))));
        assert!(matches!(
            resolver.take_warnings()[..],
            [(WarningType::TautologicalInequality { .. }, _)]
        ));

        let same = Expr::binary(BinaryOp::Equal, Expr::int("25"), Expr::int("25"));
        assert_eq!(resolver.resolve(&same), Ok(Some(Value::Bool(true))));
        assert!(resolver.take_warnings().is_empty());
    }

    #[test]
    fn test_warnings_are_dropped_when_resolution_fails() {
        let checker = NominalChecker::default();
        let mut resolver = StaticResolver::new(&checker);
        let eq = Expr::binary(BinaryOp::Equal, Expr::int("25"), Expr::float("25.0"));
        let sum = Expr::binary(BinaryOp::Add, eq, Expr::ident("x", Type::Untyped));
        assert_eq!(resolver.resolve(&sum), Ok(None));
        assert!(resolver.take_warnings().is_empty());
    }

    #[test]
    fn test_malformed_literals() {
        let checker = NominalChecker::default();
        let mut resolver = StaticResolver::new(&checker);
        let bad = Expr::int("0xZZ");
        assert_eq!(
            resolver.resolve(&bad),
            Err(ResolveError {
                error: CodegenErrorType::InvalidLiteral {
                    kind: "Int",
                    text: "0xZZ".into()
                },
                range: bad.range,
            })
        );
        assert!(resolver.resolve(&int8("256")).is_err());
        assert!(resolver.resolve(&Expr::float("1.2.3")).is_err());
        for text in ["nan", "NaN", "inf", "infinity", "-inf", ".5"] {
            let float32 = Expr::sized(StdType::Float32, text);
            assert!(resolver.resolve(&float32).is_err(), "{text} parsed as Float32");
            assert!(resolver.resolve(&Expr::float(text)).is_err(), "{text} parsed as Float");
        }
        assert_eq!(
            resolve(&Expr::sized(StdType::Float32, "1_0.5")),
            Some(Value::Float32(10.5))
        );
        assert_eq!(resolve(&Expr::int("0b1010_1010")), Some(Value::SmallInt(170)));
        assert_eq!(resolve(&Expr::sized(StdType::UInt8, "0xff")), Some(Value::UInt8(255)));
    }
}

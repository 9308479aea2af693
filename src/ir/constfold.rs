//! The constant evaluator (§4.C): pure folding of binary/unary ops and the
//! `Format` string-interpolation formatter over already-folded constants.
//!
//! Grounded on `compiler/ir_gen/const_eval.cpp`: checked integer arithmetic
//! with typed failures rather than silent wraparound, float semantics that
//! defer to IEEE 754 (including `NaN != NaN`), and int/float promotion on
//! mixed operands.

use crate::error::EvalError;
use crate::ir::function::{BinaryOp, Constant, UnaryOp};

pub type EvalResult = Result<Constant, EvalError>;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(c: &Constant) -> Option<Num> {
    match c {
        Constant::Integer(i) => Some(Num::Int(*i)),
        Constant::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn to_constant(n: Num) -> Constant {
    match n {
        Num::Int(i) => Constant::Integer(i),
        Num::Float(f) => Constant::Float(f),
    }
}

/// Applies `int_op` if both operands are integers, otherwise promotes both
/// to float and applies `float_op` (§4.C "mixed int/float: promote to
/// float").
fn numeric_op(
    lhs: Num,
    rhs: Num,
    int_op: impl FnOnce(i64, i64) -> Result<i64, EvalError>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<Num, EvalError> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b).map(Num::Int),
        (a, b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            Ok(Num::Float(float_op(a, b)))
        }
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

pub fn eval_binary(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> EvalResult {
    use BinaryOp as B;

    if matches!(op, B::Equals | B::NotEquals) {
        return eval_equality(op, lhs, rhs);
    }
    if matches!(op, B::Less | B::LessEqual | B::Greater | B::GreaterEqual) {
        return eval_compare(op, lhs, rhs);
    }
    if matches!(op, B::BitAnd | B::BitOr | B::BitXor) {
        return eval_bitwise(op, lhs, rhs);
    }
    if matches!(op, B::LeftShift | B::RightShift) {
        return eval_shift(op, lhs, rhs);
    }

    let (lhs, rhs) = (as_num(lhs).ok_or(EvalError::TypeError)?, as_num(rhs).ok_or(EvalError::TypeError)?);
    let result = match op {
        B::Plus => numeric_op(lhs, rhs, |a, b| a.checked_add(b).ok_or(EvalError::IntegerOverflow), |a, b| a + b)?,
        B::Minus => numeric_op(lhs, rhs, |a, b| a.checked_sub(b).ok_or(EvalError::IntegerOverflow), |a, b| a - b)?,
        B::Multiply => numeric_op(lhs, rhs, |a, b| a.checked_mul(b).ok_or(EvalError::IntegerOverflow), |a, b| a * b)?,
        B::Divide => numeric_op(
            lhs,
            rhs,
            |a, b| {
                if b == 0 {
                    Err(EvalError::DivideByZero)
                } else {
                    a.checked_div(b).ok_or(EvalError::IntegerOverflow)
                }
            },
            |a, b| a / b,
        )?,
        B::Modulo => numeric_op(
            lhs,
            rhs,
            |a, b| {
                if b == 0 {
                    Err(EvalError::DivideByZero)
                } else {
                    a.checked_rem(b).ok_or(EvalError::IntegerOverflow)
                }
            },
            |a, b| a % b,
        )?,
        B::Power => return eval_power(lhs, rhs),
        _ => unreachable!("handled by the dedicated branches above"),
    };
    Ok(to_constant(result))
}

/// `a ** b`: `b < 0` yields `0` unless `|a| == 1` (§4.C); `0 ** negative` is
/// `DivideByZero`; `b >= 0` uses iterated checked multiplication.
fn eval_power(lhs: Num, rhs: Num) -> EvalResult {
    match (lhs, rhs) {
        (Num::Int(base), Num::Int(exp)) => {
            if exp < 0 {
                if base == 0 {
                    return Err(EvalError::DivideByZero);
                }
                return Ok(Constant::Integer(if base.abs() == 1 { base.pow((-exp) as u32 % 2) } else { 0 }));
            }
            let mut result: i64 = 1;
            for _ in 0..exp {
                result = result.checked_mul(base).ok_or(EvalError::IntegerOverflow)?;
            }
            Ok(Constant::Integer(result))
        }
        (a, b) => Ok(Constant::Float(as_f64(a).powf(as_f64(b)))),
    }
}

fn eval_bitwise(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> EvalResult {
    let (Constant::Integer(a), Constant::Integer(b)) = (lhs, rhs) else {
        return Err(EvalError::TypeError);
    };
    Ok(Constant::Integer(match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => unreachable!(),
    }))
}

/// Shift amount must be in `[0, 63]`; negative is `NegativeShift`, `> 63` is
/// `IntegerOverflow` (§4.C, and §8's boundary test "shift by 63 is valid,
/// shift by 64 overflows").
fn eval_shift(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> EvalResult {
    let (Constant::Integer(a), Constant::Integer(b)) = (lhs, rhs) else {
        return Err(EvalError::TypeError);
    };
    if *b < 0 {
        return Err(EvalError::NegativeShift);
    }
    if *b > 63 {
        return Err(EvalError::IntegerOverflow);
    }
    let shift = *b as u32;
    Ok(Constant::Integer(match op {
        BinaryOp::LeftShift => ((*a as u64) << shift) as i64,
        BinaryOp::RightShift => a >> shift,
        _ => unreachable!(),
    }))
}

/// `int -> float -> int` round trip equality, so `1` and `1.0` compare
/// equal but a float with a fractional part never equals an int (§4.C).
fn is_equal(lhs: &Constant, rhs: &Constant) -> bool {
    match (lhs, rhs) {
        (Constant::Null, Constant::Null) => true,
        (Constant::True, Constant::True) | (Constant::False, Constant::False) => true,
        (Constant::String(a), Constant::String(b)) | (Constant::Symbol(a), Constant::Symbol(b)) => a == b,
        (Constant::Integer(a), Constant::Integer(b)) => a == b,
        (Constant::Float(a), Constant::Float(b)) => a == b, // NaN != NaN falls out of IEEE 754 here.
        (Constant::Integer(i), Constant::Float(f)) | (Constant::Float(f), Constant::Integer(i)) => {
            !f.is_nan() && (*f as i64) == *i && (*i as f64) == *f
        }
        _ => false,
    }
}

fn eval_equality(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> EvalResult {
    let equal = is_equal(lhs, rhs);
    Ok(bool_constant(if op == BinaryOp::Equals { equal } else { !equal }))
}

fn eval_compare(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> EvalResult {
    use std::cmp::Ordering::*;
    // Non-numeric operands are a real type error, not a foldable case: the
    // builder needs to see `Err` here so it falls back to the unfolded op
    // rather than baking in a wrong constant (§4.C "inequality comparisons
    // require numeric operands").
    let (lnum, rnum) = (as_num(lhs).ok_or(EvalError::TypeError)?, as_num(rhs).ok_or(EvalError::TypeError)?);
    let ordering = match as_f64(lnum).partial_cmp(&as_f64(rnum)) {
        Some(o) => o,
        None => return Ok(bool_constant(false)), // NaN has no ordering; every inequality compares false.
    };
    let truth = match op {
        BinaryOp::Less => ordering == Less,
        BinaryOp::LessEqual => ordering != Greater,
        BinaryOp::Greater => ordering == Greater,
        BinaryOp::GreaterEqual => ordering != Less,
        _ => unreachable!(),
    };
    Ok(bool_constant(truth))
}

fn bool_constant(b: bool) -> Constant {
    if b {
        Constant::True
    } else {
        Constant::False
    }
}

pub fn eval_unary(op: UnaryOp, value: &Constant) -> EvalResult {
    match op {
        UnaryOp::LogicalNot => Ok(bool_constant(matches!(value, Constant::Null | Constant::False))),
        UnaryOp::Plus => match as_num(value).ok_or(EvalError::TypeError)? {
            Num::Int(i) => Ok(Constant::Integer(i)),
            Num::Float(f) => Ok(Constant::Float(f)),
        },
        UnaryOp::Minus => match as_num(value).ok_or(EvalError::TypeError)? {
            Num::Int(i) => i.checked_neg().map(Constant::Integer).ok_or(EvalError::IntegerOverflow),
            Num::Float(f) => Ok(Constant::Float(-f)),
        },
        UnaryOp::BitNot => match value {
            Constant::Integer(i) => Ok(Constant::Integer(!i)),
            _ => Err(EvalError::TypeError),
        },
    }
}

/// Formats a run of constants into one string constant, in evaluation
/// order (§4.B.8, §4.C "Formatter"). Called by the builder on maximal runs
/// of `Format` arguments that are all constants.
pub fn format_constants(values: &[Constant]) -> String {
    let mut out = String::new();
    for value in values {
        match value {
            Constant::Null => out.push_str("null"),
            Constant::True => out.push_str("true"),
            Constant::False => out.push_str("false"),
            Constant::Integer(i) => out.push_str(&i.to_string()),
            Constant::Float(f) => out.push_str(&format_float(*f)),
            Constant::String(_) => {
                // The builder resolves the interned text before calling in;
                // by the time we get here the caller has already rendered
                // strings to their content (see `ir::builder::emit_format`).
                unreachable!("callers must resolve String constants to text before formatting")
            }
            Constant::Symbol(_) => unreachable!("callers must resolve Symbol constants to text before formatting"),
        }
    }
    out
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Constant {
        Constant::Integer(i)
    }

    #[test]
    fn addition_overflow_is_detected() {
        assert_eq!(eval_binary(BinaryOp::Plus, &int(i64::MAX), &int(1)), Err(EvalError::IntegerOverflow));
    }

    #[test]
    fn division_by_zero_is_detected() {
        assert_eq!(eval_binary(BinaryOp::Divide, &int(10), &int(0)), Err(EvalError::DivideByZero));
    }

    #[test]
    fn shift_boundary_63_ok_64_overflows() {
        assert!(eval_binary(BinaryOp::LeftShift, &int(1), &int(63)).is_ok());
        assert_eq!(eval_binary(BinaryOp::LeftShift, &int(1), &int(64)), Err(EvalError::IntegerOverflow));
        assert_eq!(eval_binary(BinaryOp::LeftShift, &int(1), &int(-1)), Err(EvalError::NegativeShift));
    }

    #[test]
    fn power_zero_to_zero_is_one() {
        assert_eq!(eval_power(Num::Int(0), Num::Int(0)), Ok(Constant::Integer(1)));
    }

    #[test]
    fn power_zero_to_negative_divides_by_zero() {
        assert_eq!(eval_power(Num::Int(0), Num::Int(-3)), Err(EvalError::DivideByZero));
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let nan = Constant::Float(f64::NAN);
        assert_eq!(eval_binary(BinaryOp::Equals, &nan, &nan), Ok(Constant::False));
    }

    #[test]
    fn mixed_int_float_equality_uses_round_trip() {
        assert_eq!(eval_binary(BinaryOp::Equals, &int(1), &Constant::Float(1.0)), Ok(Constant::True));
        assert_eq!(eval_binary(BinaryOp::Equals, &int(1), &Constant::Float(1.5)), Ok(Constant::False));
    }

    #[test]
    fn inequality_on_non_numeric_operands_is_a_type_error_not_false() {
        // A non-numeric operand must not fold at all, so the builder falls
        // back to emitting the unfolded comparison.
        assert_eq!(eval_binary(BinaryOp::Less, &Constant::True, &int(1)), Err(EvalError::TypeError));
        assert_eq!(eval_binary(BinaryOp::LessEqual, &int(1), &Constant::Null), Err(EvalError::TypeError));
    }

    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn commutative_ops_dont_care_about_operand_order(a: i64, b: i64) -> TestResult {
        for op in [BinaryOp::Plus, BinaryOp::Multiply, BinaryOp::BitAnd, BinaryOp::BitOr, BinaryOp::BitXor] {
            let forward = eval_binary(op, &int(a), &int(b));
            let swapped = eval_binary(op, &int(b), &int(a));
            match (forward, swapped) {
                (Ok(x), Ok(y)) if x != y => return TestResult::failed(),
                (Ok(_), Err(_)) | (Err(_), Ok(_)) => return TestResult::failed(),
                _ => {}
            }
        }
        TestResult::passed()
    }

    #[quickcheck]
    fn division_never_succeeds_with_a_zero_divisor(a: i64) -> bool {
        eval_binary(BinaryOp::Divide, &int(a), &int(0)) == Err(EvalError::DivideByZero)
            && eval_binary(BinaryOp::Modulo, &int(a), &int(0)) == Err(EvalError::DivideByZero)
    }
}

//! Runtime arithmetic, comparison, equality, and string formatting over live
//! [`Value`]s (§4.G, §4.I).
//!
//! Mirrors [`crate::ir::constfold`]'s rules exactly (checked integer
//! arithmetic, int/float promotion, NaN never equal to itself) but operates
//! on heap-resident operands instead of folded `Constant`s, and boxes a
//! result that no longer fits `Value`'s embedded-integer range instead of
//! returning a `Constant`. Failures here are §7 "Runtime errors": uncatchable,
//! reported as [`VmError::Arithmetic`] rather than a catchable `Exception`.

use crate::context::Context;
use crate::error::{EvalError, VmError, VmResult};
use crate::intern::InternedString;
use crate::ir::function::{BinaryOp, UnaryOp};
use crate::objects::{HeapBool, HeapFloat, HeapInteger, HeapString, HeapSymbol};
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(ctx: &Context, value: Value) -> Option<Num> {
    if let Some(i) = value.as_embedded_int() {
        return Some(Num::Int(i));
    }
    if let Some(i) = ctx.heap.get::<HeapInteger>(value) {
        return Some(Num::Int(i.0));
    }
    if let Some(f) = ctx.heap.get::<HeapFloat>(value) {
        return Some(Num::Float(f.0));
    }
    None
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn num_to_value(ctx: &mut Context, n: Num) -> VmResult<Value> {
    match n {
        Num::Int(i) => match Value::from_embedded_int(i) {
            Some(v) => Ok(v),
            None => ctx.allocate(HeapInteger(i), false),
        },
        Num::Float(f) => ctx.allocate(HeapFloat(f), false),
    }
}

fn bool_value(ctx: &Context, b: bool) -> Value {
    // `true`/`false` are heap singletons (objects.rs); callers that need one
    // go through `Context::intern_bool`, kept alongside the other well-known
    // singletons rather than reallocated on every comparison.
    ctx.well_known_bool(b)
}

fn numeric_op(
    lhs: Num,
    rhs: Num,
    int_op: impl FnOnce(i64, i64) -> Result<i64, EvalError>,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> Result<Num, EvalError> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b).map(Num::Int),
        (a, b) => Ok(Num::Float(float_op(as_f64(a), as_f64(b)))),
    }
}

fn eval_power(lhs: Num, rhs: Num) -> Result<Num, EvalError> {
    match (lhs, rhs) {
        (Num::Int(base), Num::Int(exp)) => {
            if exp < 0 {
                if base == 0 {
                    return Err(EvalError::DivideByZero);
                }
                return Ok(Num::Int(if base.abs() == 1 { base.pow((-exp) as u32 % 2) } else { 0 }));
            }
            let mut result: i64 = 1;
            for _ in 0..exp {
                result = result.checked_mul(base).ok_or(EvalError::IntegerOverflow)?;
            }
            Ok(Num::Int(result))
        }
        (a, b) => Ok(Num::Float(as_f64(a).powf(as_f64(b)))),
    }
}

fn as_int(value: Value, ctx: &Context) -> Option<i64> {
    match as_num(ctx, value)? {
        Num::Int(i) => Some(i),
        Num::Float(_) => None,
    }
}

fn eval_bitwise(op: BinaryOp, ctx: &Context, lhs: Value, rhs: Value) -> Result<i64, EvalError> {
    let (a, b) = (as_int(lhs, ctx).ok_or(EvalError::TypeError)?, as_int(rhs, ctx).ok_or(EvalError::TypeError)?);
    Ok(match op {
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => unreachable!(),
    })
}

fn eval_shift(op: BinaryOp, ctx: &Context, lhs: Value, rhs: Value) -> Result<i64, EvalError> {
    let (a, b) = (as_int(lhs, ctx).ok_or(EvalError::TypeError)?, as_int(rhs, ctx).ok_or(EvalError::TypeError)?);
    if b < 0 {
        return Err(EvalError::NegativeShift);
    }
    if b > 63 {
        return Err(EvalError::IntegerOverflow);
    }
    let shift = b as u32;
    Ok(match op {
        BinaryOp::LeftShift => ((a as u64) << shift) as i64,
        BinaryOp::RightShift => a >> shift,
        _ => unreachable!(),
    })
}

fn interned_text(ctx: &Context, value: Value) -> Option<InternedString> {
    if let Some(s) = ctx.heap.get::<HeapString>(value) {
        return Some(s.0);
    }
    if let Some(s) = ctx.heap.get::<HeapSymbol>(value) {
        return Some(s.0);
    }
    None
}

fn as_bool(ctx: &Context, value: Value) -> Option<bool> {
    ctx.heap.get::<HeapBool>(value).map(|b| b.0)
}

/// `§4.C`'s `is_equal`, extended to live heap representations: strings and
/// symbols compare by interned identity, booleans and null by value, numbers
/// by the same int/float round-trip rule.
pub fn values_equal(ctx: &Context, lhs: Value, rhs: Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return lhs.is_null() && rhs.is_null();
    }
    if let (Some(a), Some(b)) = (as_bool(ctx, lhs), as_bool(ctx, rhs)) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (interned_text(ctx, lhs), interned_text(ctx, rhs)) {
        return a == b;
    }
    match (as_num(ctx, lhs), as_num(ctx, rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(Num::Float(a)), Some(Num::Float(b))) => a == b,
        (Some(Num::Int(i)), Some(Num::Float(f))) | (Some(Num::Float(f)), Some(Num::Int(i))) => {
            !f.is_nan() && (f as i64) == i && (i as f64) == f
        }
        (Some(_), Some(_)) | (None, None) => lhs == rhs,
        _ => false,
    }
}

pub fn binary(ctx: &mut Context, op: BinaryOp, lhs: Value, rhs: Value) -> VmResult<Value> {
    use BinaryOp as B;

    if matches!(op, B::Equals | B::NotEquals) {
        let equal = values_equal(ctx, lhs, rhs);
        return Ok(bool_value(ctx, if op == B::Equals { equal } else { !equal }));
    }
    if matches!(op, B::BitAnd | B::BitOr | B::BitXor) {
        let i = eval_bitwise(op, ctx, lhs, rhs).map_err(VmError::Arithmetic)?;
        return num_to_value(ctx, Num::Int(i));
    }
    if matches!(op, B::LeftShift | B::RightShift) {
        let i = eval_shift(op, ctx, lhs, rhs).map_err(VmError::Arithmetic)?;
        return num_to_value(ctx, Num::Int(i));
    }

    let (l, r) = (as_num(ctx, lhs).ok_or(VmError::Arithmetic(EvalError::TypeError))?, as_num(ctx, rhs).ok_or(VmError::Arithmetic(EvalError::TypeError))?);

    if matches!(op, B::Less | B::LessEqual | B::Greater | B::GreaterEqual) {
        let ordering = match as_f64(l).partial_cmp(&as_f64(r)) {
            Some(o) => o,
            None => return Ok(bool_value(ctx, false)), // NaN is unordered; compares false.
        };
        use std::cmp::Ordering::*;
        let truth = match op {
            B::Less => ordering == Less,
            B::LessEqual => ordering != Greater,
            B::Greater => ordering == Greater,
            B::GreaterEqual => ordering != Less,
            _ => unreachable!(),
        };
        return Ok(bool_value(ctx, truth));
    }

    let result = match op {
        B::Plus => numeric_op(l, r, |a, b| a.checked_add(b).ok_or(EvalError::IntegerOverflow), |a, b| a + b),
        B::Minus => numeric_op(l, r, |a, b| a.checked_sub(b).ok_or(EvalError::IntegerOverflow), |a, b| a - b),
        B::Multiply => numeric_op(l, r, |a, b| a.checked_mul(b).ok_or(EvalError::IntegerOverflow), |a, b| a * b),
        B::Divide => numeric_op(
            l,
            r,
            |a, b| if b == 0 { Err(EvalError::DivideByZero) } else { a.checked_div(b).ok_or(EvalError::IntegerOverflow) },
            |a, b| a / b,
        ),
        B::Modulo => numeric_op(
            l,
            r,
            |a, b| if b == 0 { Err(EvalError::DivideByZero) } else { a.checked_rem(b).ok_or(EvalError::IntegerOverflow) },
            |a, b| a % b,
        ),
        B::Power => eval_power(l, r),
        _ => unreachable!("handled above"),
    }
    .map_err(VmError::Arithmetic)?;

    num_to_value(ctx, result)
}

pub fn unary(ctx: &mut Context, op: UnaryOp, value: Value) -> VmResult<Value> {
    match op {
        UnaryOp::LogicalNot => {
            let falsy = value.is_null() || as_bool(ctx, value) == Some(false);
            Ok(bool_value(ctx, falsy))
        }
        UnaryOp::Plus => {
            let n = as_num(ctx, value).ok_or(VmError::Arithmetic(EvalError::TypeError))?;
            num_to_value(ctx, n)
        }
        UnaryOp::Minus => match as_num(ctx, value).ok_or(VmError::Arithmetic(EvalError::TypeError))? {
            Num::Int(i) => {
                let negated = i.checked_neg().ok_or(VmError::Arithmetic(EvalError::IntegerOverflow))?;
                num_to_value(ctx, Num::Int(negated))
            }
            Num::Float(f) => num_to_value(ctx, Num::Float(-f)),
        },
        UnaryOp::BitNot => {
            let i = as_int(value, ctx).ok_or(VmError::Arithmetic(EvalError::TypeError))?;
            num_to_value(ctx, Num::Int(!i))
        }
    }
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

/// Renders one value the way `std.catch_panic`'s message and the `Format`
/// opcode both need (§4.C "Formatter", generalized from folded constants to
/// live values).
pub fn describe(ctx: &Context, value: Value) -> String {
    if value.is_null() {
        return "null".to_string();
    }
    if let Some(i) = value.as_embedded_int() {
        return i.to_string();
    }
    if let Some(i) = ctx.heap.get::<HeapInteger>(value) {
        return i.0.to_string();
    }
    if let Some(f) = ctx.heap.get::<HeapFloat>(value) {
        return format_float(f.0);
    }
    if let Some(b) = ctx.heap.get::<HeapBool>(value) {
        return b.0.to_string();
    }
    if let Some(text) = interned_text(ctx, value) {
        return ctx.strings.value(text).to_string();
    }
    format!("{value:?}")
}

/// `Format` opcode: concatenates a run of values into one string, in
/// evaluation order (§4.B.8, §4.C).
pub fn format(ctx: &mut Context, values: &[Value]) -> VmResult<Value> {
    let mut out = String::new();
    for &value in values {
        out.push_str(&describe(ctx, value));
    }
    let interned = ctx.strings.insert(&out)?;
    ctx.allocate(HeapString(interned), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};

    #[test]
    fn addition_overflow_is_a_runtime_error() {
        let mut ctx = Context::new(ContextConfig::default());
        let max = ctx.allocate(HeapInteger(i64::MAX), false).unwrap();
        let one = Value::from_embedded_int(1).unwrap();
        assert!(matches!(binary(&mut ctx, BinaryOp::Plus, max, one), Err(VmError::Arithmetic(EvalError::IntegerOverflow))));
    }

    #[test]
    fn mixed_int_float_equality_uses_round_trip() {
        let mut ctx = Context::new(ContextConfig::default());
        let one = Value::from_embedded_int(1).unwrap();
        let one_float = ctx.allocate(HeapFloat(1.0), false).unwrap();
        let result = binary(&mut ctx, BinaryOp::Equals, one, one_float).unwrap();
        assert_eq!(ctx.heap.get::<HeapBool>(result).unwrap().0, true);
    }

    #[test]
    fn format_concatenates_in_order() {
        let mut ctx = Context::new(ContextConfig::default());
        let n = Value::from_embedded_int(7).unwrap();
        let result = format(&mut ctx, &[n, Value::null()]).unwrap();
        let text = ctx.heap.get::<HeapString>(result).unwrap().0;
        assert_eq!(ctx.strings.value(text), "7null");
    }
}

//! Integer arithmetic and numeric conversion.

use crate::error::{ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{expect_args, expect_convert_int};
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("add", eval_add),
    FunctionDescriptor::eager("sub", eval_sub),
    FunctionDescriptor::eager("mul", eval_mul),
    FunctionDescriptor::eager("div", eval_div),
    FunctionDescriptor::eager("mod", eval_mod),
    FunctionDescriptor::eager("float", eval_float),
    FunctionDescriptor::eager("int", eval_int),
];

fn operands(function: &str, args: &[Value]) -> Result<(i64, i64)> {
    expect_args(function, args, 2, 2)?;
    Ok((
        expect_convert_int(function, args, 0)?,
        expect_convert_int(function, args, 1)?,
    ))
}

fn overflow(function: &str) -> ExpressionError {
    ExpressionError::function(function, FunctionErrorKind::OutOfRange, "integer overflow")
}

fn eval_add(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("add", args)?;
    a.checked_add(b).map(Value::Int).ok_or_else(|| overflow("add"))
}

fn eval_sub(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("sub", args)?;
    a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow("sub"))
}

fn eval_mul(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("mul", args)?;
    a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow("mul"))
}

fn divide_by_zero(function: &str) -> ExpressionError {
    ExpressionError::function(function, FunctionErrorKind::DivideByZero, "the divisor is zero")
}

fn eval_div(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("div", args)?;
    if b == 0 {
        return Err(divide_by_zero("div"));
    }
    a.checked_div(b).map(Value::Int).ok_or_else(|| overflow("div"))
}

fn eval_mod(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let (a, b) = operands("mod", args)?;
    if b == 0 {
        return Err(divide_by_zero("mod"));
    }
    a.checked_rem(b).map(Value::Int).ok_or_else(|| overflow("mod"))
}

fn eval_float(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("float", args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            ExpressionError::argument("float", "argument 1", "a numeric string")
        }),
        other => Err(ExpressionError::argument(
            "float",
            "argument 1",
            format!("a number or numeric string, got {}", other.type_name()),
        )),
    }
}

fn eval_int(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("int", args, 1, 1)?;
    match &args[0] {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        _ => expect_convert_int("int", args, 0).map(Value::Int),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ExpressionError, FunctionErrorKind};
    use crate::eval::builtins::test_support::{eval, eval_json};
    use serde_json::json;

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_json("[add(1, 2)]"), json!(3));
        assert_eq!(eval_json("[sub(7, 9)]"), json!(-2));
        assert_eq!(eval_json("[mul(6, 7)]"), json!(42));
        assert_eq!(eval_json("[div(7, 2)]"), json!(3));
        assert_eq!(eval_json("[mod(7, 3)]"), json!(1));
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(eval_json("[add('1', 2)]"), json!(3));
        assert!(eval("[add('one', 2)]").is_err());
    }

    #[test]
    fn test_divide_by_zero() {
        for expression in ["[div(1, 0)]", "[mod(1, 0)]"] {
            let err = eval(expression).unwrap_err();
            assert!(matches!(
                err,
                ExpressionError::Function {
                    kind: FunctionErrorKind::DivideByZero,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval_json("[int('4')]"), json!(4));
        assert_eq!(eval_json("[float('1.5')]"), json!(1.5));
        assert_eq!(eval_json("[int(float('2.7'))]"), json!(2));
        assert!(eval("[int('one')]").is_err());
        assert!(eval("[float('one')]").is_err());
    }
}

//! Comparison functions.

use std::cmp::Ordering;

use crate::error::{ExpressionError, Result};
use crate::eval::builtins::expect_args;
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("equals", eval_equals),
    FunctionDescriptor::eager("greater", eval_greater),
    FunctionDescriptor::eager("greaterOrEquals", eval_greater_or_equals),
    FunctionDescriptor::eager("less", eval_less),
    FunctionDescriptor::eager("lessOrEquals", eval_less_or_equals),
];

fn eval_equals(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("equals", args, 2, 2)?;
    let left = args[0].clone().materialize(ctx)?;
    let right = args[1].clone().materialize(ctx)?;
    Ok(Value::Bool(left == right))
}

/// Orders two integers, or two strings ordinally.
fn compare(function: &str, args: &[Value]) -> Result<Ordering> {
    expect_args(function, args, 2, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(ExpressionError::argument(
                function,
                "arguments",
                format!(
                    "two integers or two strings, got {} and {}",
                    a.type_name(),
                    b.type_name()
                ),
            )),
        },
    }
}

fn eval_greater(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(compare("greater", args)?.is_gt()))
}

fn eval_greater_or_equals(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(compare("greaterOrEquals", args)?.is_ge()))
}

fn eval_less(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(compare("less", args)?.is_lt()))
}

fn eval_less_or_equals(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(compare("lessOrEquals", args)?.is_le()))
}

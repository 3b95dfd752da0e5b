//! `lambda` and the functions that take one.

use std::rc::Rc;

use crate::error::{ExpressionError, Result};
use crate::eval::builtins::{expect_args, expect_array, expect_bool, expect_object, expect_string};
use crate::eval::context::{Context, LambdaContext};
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{ExprFn, Lambda, Map, MapExt, Value};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("filter", eval_filter),
    FunctionDescriptor::eager("groupBy", eval_group_by),
    FunctionDescriptor::delay_binding("lambda", eval_lambda),
    FunctionDescriptor::eager("lambdaVariables", eval_lambda_variables),
    FunctionDescriptor::eager("map", eval_map),
    FunctionDescriptor::eager("mapValues", eval_map_values),
    FunctionDescriptor::eager("reduce", eval_reduce),
    FunctionDescriptor::eager("sort", eval_sort),
    FunctionDescriptor::eager("toObject", eval_to_object),
];

/// `lambda('a', 'b', body)`: every argument but the last names a parameter.
fn eval_lambda(ctx: &dyn Context, args: &[ExprFn]) -> Result<Value> {
    expect_args("lambda", args, 2, usize::MAX)?;
    let (body, names) = args
        .split_last()
        .ok_or_else(|| ExpressionError::arity("lambda", "at least 2 argument(s)"))?;
    let mut params = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        match name(ctx)? {
            Value::String(s) => params.push(s),
            other => {
                return Err(ExpressionError::argument(
                    "lambda",
                    format!("argument {}", i + 1),
                    format!("a parameter name, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Value::Lambda(Rc::new(Lambda {
        params,
        body: Rc::clone(body),
    })))
}

fn eval_lambda_variables(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("lambdaVariables", args, 1, 1)?;
    let name = expect_string("lambdaVariables", args, 0)?;
    ctx.lambda_variable(&name).ok_or_else(|| {
        ExpressionError::symbol(name, "the lambda variable does not exist")
    })
}

fn expect_lambda(function: &str, args: &[Value], index: usize) -> Result<Rc<Lambda>> {
    match args.get(index) {
        Some(Value::Lambda(lambda)) => Ok(Rc::clone(lambda)),
        _ => Err(ExpressionError::argument(
            function,
            format!("argument {}", index + 1),
            "a lambda expression",
        )),
    }
}

/// Invokes `lambda`, binding its parameters to `values` in order. Values
/// without a declared parameter (such as an unused index) are dropped.
fn invoke(ctx: &dyn Context, function: &str, lambda: &Lambda, values: Vec<Value>) -> Result<Value> {
    if lambda.params.len() > values.len() {
        return Err(ExpressionError::argument(
            function,
            "lambda",
            format!("at most {} parameter(s), got {}", values.len(), lambda.params.len()),
        ));
    }
    let variables = lambda.params.iter().cloned().zip(values).collect();
    let scope = LambdaContext::new(ctx, variables);
    (lambda.body)(&scope)
}

fn eval_filter(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("filter", args, 2, 2)?;
    let items = expect_array(ctx, "filter", args, 0)?;
    let lambda = expect_lambda("filter", args, 1)?;
    let mut result = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let keep = invoke(ctx, "filter", &lambda, vec![item.clone(), Value::Int(i as i64)])?;
        if expect_bool("filter", std::slice::from_ref(&keep), 0)? {
            result.push(item);
        }
    }
    Ok(Value::Array(result))
}

fn eval_map(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("map", args, 2, 2)?;
    let items = expect_array(ctx, "map", args, 0)?;
    let lambda = expect_lambda("map", args, 1)?;
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| invoke(ctx, "map", &lambda, vec![item, Value::Int(i as i64)]))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn eval_reduce(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("reduce", args, 3, 3)?;
    let items = expect_array(ctx, "reduce", args, 0)?;
    let lambda = expect_lambda("reduce", args, 2)?;
    let mut accumulator = args[1].clone();
    for (i, item) in items.into_iter().enumerate() {
        accumulator = invoke(
            ctx,
            "reduce",
            &lambda,
            vec![accumulator, item, Value::Int(i as i64)],
        )?;
    }
    Ok(accumulator)
}

/// Stable merge sort where `after(x, y)` is true when `x` belongs after `y`.
fn merge_sort<F>(items: Vec<Value>, after: &mut F) -> Result<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> Result<bool>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, after)?;
    let right = merge_sort(right, after)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => after(l, r)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn eval_sort(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("sort", args, 2, 2)?;
    let items = expect_array(ctx, "sort", args, 0)?;
    let lambda = expect_lambda("sort", args, 1)?;
    let mut after = |x: &Value, y: &Value| -> Result<bool> {
        let result = invoke(ctx, "sort", &lambda, vec![x.clone(), y.clone()])?;
        expect_bool("sort", std::slice::from_ref(&result), 0)
    };
    merge_sort(items, &mut after).map(Value::Array)
}

fn eval_group_by(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("groupBy", args, 2, 2)?;
    let items = expect_array(ctx, "groupBy", args, 0)?;
    let lambda = expect_lambda("groupBy", args, 1)?;
    let mut groups: Map = Vec::new();
    for item in items {
        let key = invoke(ctx, "groupBy", &lambda, vec![item.clone()])?.to_display_string();
        match groups.get_ci_mut(&key) {
            Some(Value::Array(members)) => members.push(item),
            _ => groups.push((key, Value::Array(vec![item]))),
        }
    }
    Ok(Value::Object(groups))
}

fn eval_map_values(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("mapValues", args, 2, 2)?;
    let entries = expect_object(ctx, "mapValues", args, 0)?;
    let lambda = expect_lambda("mapValues", args, 1)?;
    entries
        .into_iter()
        .map(|(key, value)| Ok((key, invoke(ctx, "mapValues", &lambda, vec![value])?)))
        .collect::<Result<Map>>()
        .map(Value::Object)
}

fn eval_to_object(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("toObject", args, 2, 3)?;
    let items = expect_array(ctx, "toObject", args, 0)?;
    let key_lambda = expect_lambda("toObject", args, 1)?;
    let value_lambda = match args.get(2) {
        Some(_) => Some(expect_lambda("toObject", args, 2)?),
        None => None,
    };
    let mut entries: Map = Vec::with_capacity(items.len());
    for item in items {
        let key = match invoke(ctx, "toObject", &key_lambda, vec![item.clone()])? {
            Value::String(key) => key,
            other => {
                return Err(ExpressionError::argument(
                    "toObject",
                    "keySelector",
                    format!("a string key, got {}", other.type_name()),
                ))
            }
        };
        let value = match &value_lambda {
            Some(lambda) => invoke(ctx, "toObject", lambda, vec![item])?,
            None => item,
        };
        entries.set(key, value);
    }
    Ok(Value::Object(entries))
}

#[cfg(test)]
mod tests {
    use crate::eval::builtins::test_support::{ctx, eval, eval_json};
    use crate::eval::compiler;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DOGS: &str = r#"[{"name":"Evie","age":5,"interests":["Ball","Frisbee"]},{"name":"Casper","age":3,"interests":["Other dogs"]},{"name":"Indy","age":2,"interests":["Butter"]},{"name":"Kira","age":8,"interests":["Rubs"]}]"#;

    fn with_dogs(expression: &str) -> serde_json::Value {
        let ctx = ctx();
        ctx.add_variable("dogs", serde_json::from_str(DOGS).unwrap());
        compiler::evaluate(&ctx, expression).unwrap().to_json()
    }

    #[test]
    fn test_filter() {
        assert_eq!(
            with_dogs("[filter(variables('dogs'), lambda('dog', greaterOrEquals(lambdaVariables('dog').age, 5)))]")
                .as_array()
                .map(Vec::len),
            Some(2)
        );
        assert_eq!(
            eval_json("[filter(createArray('a', 'b', 'c'), lambda('x', 'i', not(equals(lambdaVariables('i'), 1))))]"),
            json!(["a", "c"])
        );
    }

    #[test]
    fn test_map() {
        assert_eq!(
            with_dogs("[map(variables('dogs'), lambda('dog', lambdaVariables('dog').name))]"),
            json!(["Evie", "Casper", "Indy", "Kira"])
        );
        assert_eq!(
            eval_json("[map(range(0, 3), lambda('x', 'i', add(lambdaVariables('x'), lambdaVariables('i'))))]"),
            json!([0, 2, 4])
        );
    }

    #[test]
    fn test_reduce() {
        assert_eq!(
            with_dogs("[reduce(map(variables('dogs'), lambda('dog', lambdaVariables('dog').age)), 0, lambda('cur', 'next', add(lambdaVariables('cur'), lambdaVariables('next'))))]"),
            json!(18)
        );
    }

    #[test]
    fn test_sort_uses_after_predicate() {
        let sorted = with_dogs(
            "[sort(variables('dogs'), lambda('a', 'b', less(lambdaVariables('a').age, lambdaVariables('b').age)))]",
        );
        let names: Vec<&str> = sorted
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Kira", "Evie", "Casper", "Indy"]);
    }

    #[test]
    fn test_sort_is_stable() {
        assert_eq!(
            eval_json("[sort(createArray('b1', 'a1', 'b2', 'a2'), lambda('x', 'y', greater(first(lambdaVariables('x')), first(lambdaVariables('y')))))]"),
            json!(["a1", "a2", "b1", "b2"])
        );
    }

    #[test]
    fn test_group_by() {
        assert_eq!(
            eval_json("[groupBy(createArray('foo', 'bar', 'baz'), lambda('x', first(lambdaVariables('x'))))]"),
            json!({"f": ["foo"], "b": ["bar", "baz"]})
        );
    }

    #[test]
    fn test_map_values() {
        assert_eq!(
            eval_json("[mapValues(createObject('foo', 'foo'), lambda('val', toUpper(lambdaVariables('val'))))]"),
            json!({"foo": "FOO"})
        );
    }

    #[test]
    fn test_to_object() {
        assert_eq!(
            with_dogs("[toObject(variables('dogs'), lambda('d', lambdaVariables('d').name), lambda('d', lambdaVariables('d').age))]"),
            json!({"Evie": 5, "Casper": 3, "Indy": 2, "Kira": 8})
        );
        assert!(eval("[toObject(createArray(1), lambda('x', lambdaVariables('x')))]").is_err());
    }

    #[test]
    fn test_missing_property_in_lambda_is_null() {
        assert_eq!(
            eval_json("[map(createArray(createObject('a', 1)), lambda('x', lambdaVariables('x').missing))]"),
            json!([null])
        );
    }

    #[test]
    fn test_lambda_errors() {
        assert!(eval("[lambdaVariables('x')]").is_err());
        assert!(eval("[map(createArray(1), 'x')]").is_err());
        assert!(eval("[lambda('x')]").is_err());
        assert!(eval("[map(createArray(1), lambda('a', 'b', 'c', 1))]").is_err());
    }
}

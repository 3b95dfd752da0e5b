//! Deployment functions: the current deployment, its inputs and loops.

use std::rc::Rc;

use crate::error::{ExpressionError, Result};
use crate::eval::builtins::{expect_args, expect_int, expect_string};
use crate::eval::context::Context;
use crate::eval::providers;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{object, LazyObject, Value};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("copyIndex", eval_copy_index),
    FunctionDescriptor::eager("deployer", eval_deployer),
    FunctionDescriptor::eager("deployment", eval_deployment),
    FunctionDescriptor::eager("environment", eval_environment),
    FunctionDescriptor::eager("fail", eval_fail),
    FunctionDescriptor::eager("parameters", eval_parameters),
    FunctionDescriptor::eager("variables", eval_variables),
];

const DEFAULT_ENVIRONMENT: &str = "AzureCloud";

/// `copyIndex([loopName], [offset])`.
///
/// An unknown loop name, or no active loop at all, yields the offset.
fn eval_copy_index(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("copyIndex", args, 0, 2)?;
    let (name, offset) = match args {
        [] => (None, 0),
        [Value::String(name)] => (Some(name.clone()), 0),
        [_] => (None, expect_int("copyIndex", args, 0)?),
        _ => (
            Some(expect_string("copyIndex", args, 0)?),
            expect_int("copyIndex", args, 1)?,
        ),
    };

    match ctx.root().copy_state(name.as_deref()) {
        Some(state) => Ok(Value::Int(state.index + offset)),
        None => {
            tracing::warn!(
                copy = name.as_deref().unwrap_or_default(),
                "copyIndex() used outside of a matching copy loop"
            );
            Ok(Value::Int(offset))
        }
    }
}

fn eval_deployer(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("deployer", args, 0, 0)?;
    let deployer = &ctx.root().options().deployer;
    Ok(object([
        ("objectId", Value::string(&deployer.object_id)),
        ("tenantId", Value::string(&deployer.tenant_id)),
        ("userPrincipalName", Value::string(&deployer.user_principal_name)),
    ]))
}

fn eval_deployment(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("deployment", args, 0, 0)?;
    match ctx.root().deployment() {
        Some(deployment) => {
            let lazy: Rc<dyn LazyObject> = deployment;
            Ok(Value::Lazy(lazy))
        }
        None => Err(ExpressionError::symbol(
            "deployment",
            "no deployment is being expanded",
        )),
    }
}

fn eval_environment(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("environment", args, 0, 0)?;
    providers::environment(DEFAULT_ENVIRONMENT)
        .map(|json| Value::from_json(&json))
        .ok_or_else(|| ExpressionError::symbol("environment", "no cloud environment is defined"))
}

fn eval_fail(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("fail", args, 1, 1)?;
    let message = expect_string("fail", args, 0)?;
    Err(ExpressionError::DeploymentFailure { message })
}

fn eval_parameters(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("parameters", args, 1, 1)?;
    let name = expect_string("parameters", args, 0)?;
    ctx.parameter(&name)
}

fn eval_variables(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("variables", args, 1, 1)?;
    let name = expect_string("variables", args, 0)?;
    ctx.variable(&name)
}

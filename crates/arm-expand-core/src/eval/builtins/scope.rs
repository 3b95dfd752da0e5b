//! Scope functions. Values come from the host options of the expansion.

use crate::error::Result;
use crate::eval::builtins::expect_args;
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::resource::{management_group_scope, resource_group_scope, subscription_scope};
use crate::eval::value::{object, Value};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("managementGroup", eval_management_group),
    FunctionDescriptor::eager("resourceGroup", eval_resource_group),
    FunctionDescriptor::eager("subscription", eval_subscription),
    FunctionDescriptor::eager("tenant", eval_tenant),
];

fn eval_management_group(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("managementGroup", args, 0, 0)?;
    let options = ctx.root().options();
    let group = &options.management_group;
    Ok(object([
        ("id", Value::String(management_group_scope(&group.name))),
        ("name", Value::string(&group.name)),
        ("type", Value::string("Microsoft.Management/managementGroups")),
        (
            "properties",
            object([
                ("displayName", Value::string(&group.display_name)),
                ("tenantId", Value::string(&options.tenant.tenant_id)),
            ]),
        ),
    ]))
}

fn eval_resource_group(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("resourceGroup", args, 0, 0)?;
    let options = ctx.root().options();
    let group = &options.resource_group;
    let mut entries = vec![
        (
            "id".to_string(),
            Value::String(resource_group_scope(
                &options.subscription.subscription_id,
                &group.name,
            )),
        ),
        ("name".to_string(), Value::string(&group.name)),
        (
            "type".to_string(),
            Value::string("Microsoft.Resources/resourceGroups"),
        ),
        ("location".to_string(), Value::string(&group.location)),
    ];
    if let Some(managed_by) = &group.managed_by {
        entries.push(("managedBy".to_string(), Value::string(managed_by)));
    }
    entries.push((
        "tags".to_string(),
        Value::from_json(&serde_json::Value::Object(group.tags.clone())),
    ));
    entries.push((
        "properties".to_string(),
        object([("provisioningState", Value::string(&group.provisioning_state))]),
    ));
    Ok(Value::Object(entries))
}

fn eval_subscription(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("subscription", args, 0, 0)?;
    let subscription = &ctx.root().options().subscription;
    Ok(object([
        (
            "id",
            Value::String(subscription_scope(&subscription.subscription_id)),
        ),
        ("subscriptionId", Value::string(&subscription.subscription_id)),
        ("tenantId", Value::string(&subscription.tenant_id)),
        ("displayName", Value::string(&subscription.display_name)),
        ("state", Value::string(&subscription.state)),
    ]))
}

fn eval_tenant(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("tenant", args, 0, 0)?;
    let tenant = &ctx.root().options().tenant;
    Ok(object([
        ("id", Value::String(format!("/tenants/{}", tenant.tenant_id))),
        ("tenantId", Value::string(&tenant.tenant_id)),
        ("countryCode", Value::string(&tenant.country_code)),
        ("displayName", Value::string(&tenant.display_name)),
    ]))
}

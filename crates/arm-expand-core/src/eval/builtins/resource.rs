//! Resource functions: resource ids, references, `list*` and provider metadata.
//!
//! Nothing here contacts Azure. References to resources declared in the
//! template return their expanded values; anything else becomes a mock.

use crate::error::{DeploymentError, ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{expect_args, expect_int, expect_string};
use crate::eval::context::{Context, DeploymentScope};
use crate::eval::mock::{resource_type_from_id, Mock};
use crate::eval::providers;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::resource::{
    management_group_scope, resource_group_scope, scoped_id, subscription_scope, type_and_names,
    ResourceValue, TENANT_SCOPE,
};
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("extensionResourceId", eval_extension_resource_id),
    FunctionDescriptor::eager("list", eval_list),
    FunctionDescriptor::eager("managementGroupResourceId", eval_management_group_resource_id),
    FunctionDescriptor::eager("pickZones", eval_pick_zones),
    FunctionDescriptor::eager("providers", eval_providers),
    FunctionDescriptor::eager("reference", eval_reference),
    FunctionDescriptor::eager("references", eval_references),
    FunctionDescriptor::eager("resourceId", eval_resource_id),
    FunctionDescriptor::eager("subscriptionResourceId", eval_subscription_resource_id),
    FunctionDescriptor::eager("tenantResourceId", eval_tenant_resource_id),
];

/// Splits resource id arguments at the first one containing `/`.
///
/// Returns the scope arguments before it, the resource type and the names
/// after it. At most `max_scope` scope arguments are accepted.
fn split_at_type<'a>(
    function: &str,
    segments: &'a [String],
    max_scope: usize,
) -> Result<(&'a [String], &'a str, &'a [String])> {
    let Some(anchor) = segments.iter().position(|s| s.contains('/')) else {
        return Err(ExpressionError::argument(
            function,
            "resourceType",
            "a resource type such as 'Microsoft.Storage/storageAccounts'",
        ));
    };
    if anchor > max_scope {
        return Err(ExpressionError::arity(
            function,
            format!("at most {} scope argument(s) before the resource type", max_scope),
        ));
    }
    Ok((
        &segments[..anchor],
        segments[anchor].trim_matches('/'),
        &segments[anchor + 1..],
    ))
}

fn string_args(function: &str, args: &[Value]) -> Result<Vec<String>> {
    (0..args.len())
        .map(|i| expect_string(function, args, i))
        .collect()
}

/// `resourceId([subscriptionId], [resourceGroupName], resourceType, name1, [name2], ...)`
fn eval_resource_id(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("resourceId", args, 2, usize::MAX)?;
    let segments = string_args("resourceId", args)?;
    let (scope, resource_type, names) = split_at_type("resourceId", &segments, 2)?;
    let tail = type_and_names("resourceId", resource_type, names)?;

    let root = ctx.root();
    let options = root.options();
    let subscription = &options.subscription.subscription_id;
    let id = match scope {
        [subscription, group] => scoped_id(&resource_group_scope(subscription, group), &tail),
        [group] => scoped_id(&resource_group_scope(subscription, group), &tail),
        _ => match root.scope() {
            DeploymentScope::ResourceGroup => scoped_id(
                &resource_group_scope(subscription, &options.resource_group.name),
                &tail,
            ),
            DeploymentScope::Subscription => scoped_id(&subscription_scope(subscription), &tail),
            DeploymentScope::ManagementGroup => scoped_id(
                &management_group_scope(&options.management_group.name),
                &tail,
            ),
            DeploymentScope::Tenant => scoped_id(TENANT_SCOPE, &tail),
        },
    };
    Ok(Value::String(id))
}

/// `subscriptionResourceId([subscriptionId], resourceType, name1, [name2], ...)`
fn eval_subscription_resource_id(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("subscriptionResourceId", args, 2, usize::MAX)?;
    let segments = string_args("subscriptionResourceId", args)?;
    let (scope, resource_type, names) = split_at_type("subscriptionResourceId", &segments, 1)?;
    let tail = type_and_names("subscriptionResourceId", resource_type, names)?;
    let subscription = match scope {
        [subscription] => subscription.clone(),
        _ => ctx.root().options().subscription.subscription_id.clone(),
    };
    Ok(Value::String(scoped_id(&subscription_scope(&subscription), &tail)))
}

/// `tenantResourceId(resourceType, name1, [name2], ...)`
fn eval_tenant_resource_id(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("tenantResourceId", args, 2, usize::MAX)?;
    let segments = string_args("tenantResourceId", args)?;
    let (_, resource_type, names) = split_at_type("tenantResourceId", &segments, 0)?;
    let tail = type_and_names("tenantResourceId", resource_type, names)?;
    Ok(Value::String(scoped_id(TENANT_SCOPE, &tail)))
}

/// `managementGroupResourceId([managementGroupName], resourceType, name1, [name2], ...)`
fn eval_management_group_resource_id(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("managementGroupResourceId", args, 2, usize::MAX)?;
    let segments = string_args("managementGroupResourceId", args)?;
    let (scope, resource_type, names) =
        split_at_type("managementGroupResourceId", &segments, 1)?;
    let tail = type_and_names("managementGroupResourceId", resource_type, names)?;
    let group = match scope {
        [group] => group.clone(),
        _ => ctx.root().options().management_group.name.clone(),
    };
    Ok(Value::String(scoped_id(&management_group_scope(&group), &tail)))
}

/// `extensionResourceId(resourceId, resourceType, name1, [name2], ...)`
fn eval_extension_resource_id(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("extensionResourceId", args, 3, usize::MAX)?;
    let segments = string_args("extensionResourceId", args)?;
    if !segments[1].contains('/') {
        return Err(ExpressionError::argument(
            "extensionResourceId",
            "resourceType",
            "a resource type such as 'Microsoft.Authorization/locks'",
        ));
    }
    let tail = type_and_names(
        "extensionResourceId",
        segments[1].trim_matches('/'),
        &segments[2..],
    )?;
    Ok(Value::String(scoped_id(&segments[0], &tail)))
}

/// `list*(resourceNameOrId, apiVersion, [functionValues])`. The result is
/// always secret.
fn eval_list(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("list", args, 2, 3)?;
    let resource_id = args[0].as_str().map(str::to_string);
    ctx.root().mark_secret();
    Ok(Value::Mock(Mock::secret_list(resource_id)))
}

/// `pickZones(providerNamespace, resourceType, location, [numberOfZones], [offset])`
fn eval_pick_zones(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("pickZones", args, 3, 5)?;
    let namespace = expect_string("pickZones", args, 0)?;
    let resource_type = expect_string("pickZones", args, 1)?;
    let location = expect_string("pickZones", args, 2)?;
    let count = if args.len() > 3 { expect_int("pickZones", args, 3)? } else { 1 };
    let offset = if args.len() > 4 { expect_int("pickZones", args, 4)? } else { 0 };
    if count < 0 || offset < 0 {
        return Err(ExpressionError::argument(
            "pickZones",
            "numberOfZones",
            "a non-negative integer",
        ));
    }

    let zones = providers::zones(&namespace, &resource_type, &location);
    if zones.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let (count, offset) = (count as usize, offset as usize);
    if count + offset > zones.len() {
        return Err(ExpressionError::function(
            "pickZones",
            FunctionErrorKind::OutOfRange,
            format!(
                "{} zone(s) from offset {} were requested but only {} are available",
                count,
                offset,
                zones.len()
            ),
        ));
    }
    Ok(Value::Array(
        zones[offset..offset + count]
            .iter()
            .map(Value::string)
            .collect(),
    ))
}

/// `providers(providerNamespace, [resourceType])`
fn eval_providers(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("providers", args, 1, 2)?;
    let namespace = expect_string("providers", args, 0)?;
    let to_value = |t: &providers::ResourceProviderType| {
        serde_json::to_value(t)
            .map(|json| Value::from_json(&json))
            .unwrap_or(Value::Null)
    };
    if args.len() == 2 {
        let resource_type = expect_string("providers", args, 1)?;
        return providers::resource_type(&namespace, &resource_type)
            .map(to_value)
            .ok_or_else(|| {
                ExpressionError::argument(
                    "providers",
                    "resourceType",
                    format!("a resource type of '{}'", namespace),
                )
            });
    }
    providers::provider(&namespace)
        .map(|types| Value::Array(types.iter().map(to_value).collect()))
        .ok_or_else(|| {
            ExpressionError::argument("providers", "providerNamespace", "a known resource provider")
        })
}

fn is_full(function: &str, args: &[Value], index: usize) -> Result<bool> {
    if args.len() <= index {
        return Ok(false);
    }
    Ok(expect_string(function, args, index)?.eq_ignore_ascii_case("full"))
}

/// Returns the value `reference()` yields for a resource of this template,
/// resolving it first if needed.
fn reference_declared(ctx: &dyn Context, resource: &ResourceValue, full: bool) -> Result<Value> {
    resource.resolve(ctx).map_err(|err| match err {
        DeploymentError::Expression { source, .. } => source,
        other => ExpressionError::symbol(&resource.name, other.to_string()),
    })?;
    let mock = Mock::backed(Some(resource.id.clone()), resource.value());
    if full {
        Ok(Value::Mock(mock))
    } else {
        Ok(mock.member(ctx.root().mocks(), "properties"))
    }
}

/// `reference(resourceNameOrId, [apiVersion], ['Full'])`
fn eval_reference(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("reference", args, 1, 3)?;
    let key = expect_string("reference", args, 0)?;
    let full = is_full("reference", args, 2)?;

    let root = ctx.root();
    if let Some(resource) = root.find_resource(&key) {
        return reference_declared(ctx, &resource, full);
    }

    let (resource_type, resource_id) = if key.starts_with('/') {
        (resource_type_from_id(&key).unwrap_or_default(), Some(key))
    } else {
        (String::new(), None)
    };
    let mock = Mock::resource(resource_type, resource_id);
    tracing::debug!(resource = %mock.key(), "reference to a resource outside the template");
    if full {
        Ok(Value::Mock(mock))
    } else {
        Ok(mock.member(root.mocks(), "properties"))
    }
}

/// `references(symbolicNameOfCollection, ['Full'])`
fn eval_references(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("references", args, 1, 2)?;
    let name = expect_string("references", args, 0)?;
    let full = is_full("references", args, 1)?;
    let members = ctx.root().copy_members(&name);
    if members.is_empty() {
        return Err(ExpressionError::symbol(
            name,
            "no resource collection with this name is declared",
        ));
    }
    members
        .iter()
        .map(|resource| reference_declared(ctx, resource, full))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

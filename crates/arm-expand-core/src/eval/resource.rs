//! Resources declared by a template, and resource id construction.

use std::cell::{Cell, RefCell};

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{DeploymentError, ExpressionError, FunctionErrorKind, Result};
use crate::eval::compiler::{self, join_path};
use crate::eval::context::{Context, DeploymentScope, TemplateContext};
use crate::eval::copy::CopyIndexState;
use crate::eval::mock::SECRET_PLACEHOLDER;
use crate::eval::projection;

/// The id of the tenant scope.
pub const TENANT_SCOPE: &str = "/";

const RESOURCE_GROUP_TYPE: &str = "Microsoft.Resources/resourceGroups";

/// Properties that describe how a resource is declared rather than what it is.
const DECLARATION_PROPERTIES: &[&str] = &[
    "copy",
    "condition",
    "comments",
    "dependsOn",
    "resources",
    "existing",
    "name",
    "type",
    "id",
];

/// Builds `{namespace}/{type1}/{name1}/{type2}/{name2}...` by interleaving the
/// segments of `resource_type` with `names`. A name containing `/` counts as
/// several names.
pub fn type_and_names(function: &str, resource_type: &str, names: &[String]) -> Result<String> {
    let types: Vec<&str> = resource_type
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let names: Vec<&str> = names
        .iter()
        .flat_map(|n| n.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    if types.len() < 2 || types.len() - 1 != names.len() {
        return Err(ExpressionError::function(
            function,
            FunctionErrorKind::MismatchingResourceSegments,
            format!(
                "the type '{}' requires {} name segment(s) but {} were supplied",
                resource_type,
                types.len().saturating_sub(1),
                names.len()
            ),
        ));
    }
    let mut tail = types[0].to_string();
    for (t, n) in types[1..].iter().zip(names) {
        tail.push('/');
        tail.push_str(t);
        tail.push('/');
        tail.push_str(n);
    }
    Ok(tail)
}

pub fn subscription_scope(subscription_id: &str) -> String {
    format!("/subscriptions/{}", subscription_id)
}

pub fn resource_group_scope(subscription_id: &str, resource_group: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}",
        subscription_id, resource_group
    )
}

pub fn management_group_scope(management_group: &str) -> String {
    format!(
        "/providers/Microsoft.Management/managementGroups/{}",
        management_group
    )
}

/// Appends `/providers/{tail}` to a scope id.
pub fn scoped_id(scope: &str, tail: &str) -> String {
    let scope = scope.trim_end_matches('/');
    format!("{}/providers/{}", scope, tail)
}

/// Returns the id of the scope the current template deploys to.
pub fn deployment_scope_id(ctx: &TemplateContext) -> String {
    let options = ctx.options();
    match ctx.scope() {
        DeploymentScope::ResourceGroup => resource_group_scope(
            &options.subscription.subscription_id,
            &options.resource_group.name,
        ),
        DeploymentScope::Subscription => subscription_scope(&options.subscription.subscription_id),
        DeploymentScope::ManagementGroup => management_group_scope(&options.management_group.name),
        DeploymentScope::Tenant => TENANT_SCOPE.to_string(),
    }
}

/// Computes the id of a resource declared in a template.
///
/// `scope` is the resource's explicit `scope` property, for extension
/// resources, or the deployment scope id.
pub fn declared_resource_id(
    ctx: &TemplateContext,
    scope: &str,
    resource_type: &str,
    name: &str,
) -> Result<String> {
    if resource_type.eq_ignore_ascii_case(RESOURCE_GROUP_TYPE)
        && ctx.scope() == DeploymentScope::Subscription
    {
        return Ok(resource_group_scope(
            &ctx.options().subscription.subscription_id,
            name,
        ));
    }
    let tail = type_and_names("resourceId", resource_type, &[name.to_string()])?;
    Ok(scoped_id(scope, &tail))
}

/// Returns the ids of every ancestor of `id`, nearest first.
pub fn parent_ids(id: &str) -> Vec<String> {
    let Some(at) = id.to_ascii_lowercase().rfind("/providers/") else {
        return Vec::new();
    };
    let (prefix, tail) = id.split_at(at + "/providers/".len());
    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
    let mut parents = Vec::new();
    let mut len = segments.len();
    while len > 3 {
        len -= 2;
        parents.push(format!("{}{}", prefix, segments[..len].join("/")));
    }
    parents
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    Pending,
    Resolving,
    Resolved,
    Failed,
}

/// A resource declared in a template, one per copy iteration.
///
/// The value starts as the declaration and is replaced by the expanded
/// resource once it is resolved.
#[derive(Debug)]
pub struct ResourceValue {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub symbolic_name: Option<String>,
    pub copy_name: Option<String>,
    pub copy_state: Option<CopyIndexState>,
    /// Expanded `dependsOn` entries: ids, names, symbolic names or loop names.
    pub depends_on: Vec<String>,
    /// The explicit `scope` of an extension resource.
    pub scope: Option<String>,
    /// JSON path of the declaration, used in diagnostics.
    pub path: String,
    /// Declared with `existing: true`; referenced but never emitted.
    pub existing: bool,
    value: RefCell<JsonValue>,
    state: Cell<ResolveState>,
    error: RefCell<Option<DeploymentError>>,
    secrets: RefCell<Vec<String>>,
}

impl ResourceValue {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        declaration: JsonValue,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: resource_type.into(),
            symbolic_name: None,
            copy_name: None,
            copy_state: None,
            depends_on: Vec::new(),
            scope: None,
            path: path.into(),
            existing: false,
            value: RefCell::new(declaration),
            state: Cell::new(ResolveState::Pending),
            error: RefCell::new(None),
            secrets: RefCell::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ResolveState {
        self.state.get()
    }

    /// Returns the current value: the declaration before resolution, the
    /// expanded resource after.
    pub fn value(&self) -> JsonValue {
        self.value.borrow().clone()
    }

    /// Returns the `properties` of the current value.
    pub fn properties(&self) -> JsonValue {
        self.value
            .borrow()
            .get("properties")
            .cloned()
            .unwrap_or(JsonValue::Object(JsonMap::new()))
    }

    pub fn set_value(&self, value: JsonValue) {
        *self.value.borrow_mut() = value;
    }

    /// Marks the resource resolved with a value computed elsewhere, such as
    /// a nested deployment and its outputs.
    pub fn complete(&self, value: JsonValue) {
        self.set_value(value);
        self.state.set(ResolveState::Resolved);
    }

    /// Paths, relative to the resource, of values derived from secrets.
    pub fn secret_paths(&self) -> Vec<String> {
        self.secrets.borrow().clone()
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type.eq_ignore_ascii_case(resource_type)
    }

    /// Expands every property of the declaration, with the copy loop that
    /// produced this resource restored.
    ///
    /// Resolution happens at most once; a failed resolution keeps returning
    /// its error. A re-entrant call (a resource whose properties reference
    /// itself) sees the unresolved declaration.
    pub fn resolve(&self, ctx: &dyn Context) -> std::result::Result<(), DeploymentError> {
        match self.state.get() {
            ResolveState::Pending => {}
            ResolveState::Failed => {
                return match self.error.borrow().clone() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            ResolveState::Resolving | ResolveState::Resolved => return Ok(()),
        }
        self.state.set(ResolveState::Resolving);
        let declaration = self.value();
        let result = ctx
            .root()
            .with_copy_state(self.copy_state.clone(), || self.expand(ctx, &declaration));
        match result {
            Ok((mut value, secrets)) => {
                let tenant_id = &ctx.root().options().tenant.tenant_id;
                projection::runtime(&mut value, &self.resource_type, &self.id, tenant_id);
                self.set_value(value);
                *self.secrets.borrow_mut() = secrets;
                self.state.set(ResolveState::Resolved);
                Ok(())
            }
            Err(err) => {
                self.state.set(ResolveState::Failed);
                *self.error.borrow_mut() = Some(err.clone());
                Err(err)
            }
        }
    }

    fn expand(
        &self,
        ctx: &dyn Context,
        declaration: &JsonValue,
    ) -> std::result::Result<(JsonValue, Vec<String>), DeploymentError> {
        let mut secrets = Vec::new();
        let mut resolved = JsonMap::new();
        resolved.insert("name".to_string(), JsonValue::String(self.name.clone()));
        resolved.insert(
            "type".to_string(),
            JsonValue::String(self.resource_type.clone()),
        );
        resolved.insert("id".to_string(), JsonValue::String(self.id.clone()));

        if let Some(map) = declaration.as_object() {
            for (key, value) in map {
                if DECLARATION_PROPERTIES
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(key))
                {
                    continue;
                }
                let path = join_path(&self.path, key);
                let value = compiler::expand_path(ctx, value, &path, &mut secrets)?
                    .materialize(ctx)
                    .map_err(|source| DeploymentError::Expression {
                        path: path.clone(),
                        expression: String::new(),
                        source,
                    })?;
                let mut json = value.to_json();
                trim_nulls(&mut json);
                if !json.is_null() {
                    resolved.insert(key.clone(), json);
                }
            }
        }
        if !self.depends_on.is_empty() {
            resolved.insert(
                "dependsOn".to_string(),
                JsonValue::Array(
                    self.depends_on
                        .iter()
                        .cloned()
                        .map(JsonValue::String)
                        .collect(),
                ),
            );
        }

        let prefix = format!("{}.", self.path);
        let secrets = secrets
            .into_iter()
            .map(|p| p.strip_prefix(&prefix).map(str::to_string).unwrap_or(p))
            .collect();
        Ok((JsonValue::Object(resolved), secrets))
    }

    /// Returns the resolved resource for emission, with secret values replaced
    /// by a placeholder unless `keep_secrets` is set.
    pub fn emit(&self, keep_secrets: bool) -> JsonValue {
        let mut value = self.value();
        if !keep_secrets {
            for path in self.secrets.borrow().iter() {
                redact(&mut value, path);
            }
        }
        value
    }
}

/// Removes null members from objects, recursively.
pub fn trim_nulls(json: &mut JsonValue) {
    match json {
        JsonValue::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for value in map.values_mut() {
                trim_nulls(value);
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(trim_nulls),
        _ => {}
    }
}

#[derive(Debug, PartialEq)]
enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits `a.b[0].c` into its segments.
fn path_segments(path: &str) -> Vec<PathSegment<'_>> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut rest) = match part.find('[') {
            Some(at) => part.split_at(at),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        }
        while let Some(end) = rest.find(']') {
            if let Ok(i) = rest[1..end].parse() {
                segments.push(PathSegment::Index(i));
            }
            rest = &rest[end + 1..];
        }
    }
    segments
}

/// Replaces the string at `path` with the secret placeholder, or every string
/// beneath it when the path names a container.
fn redact(json: &mut JsonValue, path: &str) {
    let mut target = Some(json);
    for segment in path_segments(path) {
        target = match (segment, target) {
            (PathSegment::Key(key), Some(JsonValue::Object(map))) => map.get_mut(key),
            (PathSegment::Index(i), Some(JsonValue::Array(items))) => items.get_mut(i),
            _ => None,
        };
    }
    if let Some(target) = target {
        redact_strings(target);
    }
}

fn redact_strings(json: &mut JsonValue) {
    match json {
        JsonValue::String(s) => *s = SECRET_PLACEHOLDER.to_string(),
        JsonValue::Array(items) => items.iter_mut().for_each(redact_strings),
        JsonValue::Object(map) => map.values_mut().for_each(redact_strings),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ExpansionOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_type_and_names_interleaves() {
        assert_eq!(
            type_and_names(
                "resourceId",
                "Microsoft.Network/virtualNetworks/subnets",
                &["vnet".to_string(), "default".to_string()]
            )
            .unwrap(),
            "Microsoft.Network/virtualNetworks/vnet/subnets/default"
        );
        assert_eq!(
            type_and_names(
                "resourceId",
                "Microsoft.Network/virtualNetworks/subnets",
                &["vnet/default".to_string()]
            )
            .unwrap(),
            "Microsoft.Network/virtualNetworks/vnet/subnets/default"
        );
    }

    #[test]
    fn test_type_and_names_mismatch() {
        let err = type_and_names(
            "resourceId",
            "Microsoft.Network/virtualNetworks/subnets",
            &["vnet".to_string()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::Function {
                kind: FunctionErrorKind::MismatchingResourceSegments,
                ..
            }
        ));
    }

    #[test]
    fn test_declared_resource_id_per_scope() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        let scope = deployment_scope_id(&ctx);
        assert_eq!(
            declared_resource_id(&ctx, &scope, "Microsoft.Storage/storageAccounts", "sa").unwrap(),
            "/subscriptions/ffffffff-ffff-ffff-ffff-ffffffffffff/resourceGroups/ps-rule-test-rg/providers/Microsoft.Storage/storageAccounts/sa"
        );

        ctx.set_scope(DeploymentScope::Subscription);
        assert_eq!(
            declared_resource_id(&ctx, &deployment_scope_id(&ctx), RESOURCE_GROUP_TYPE, "rg1").unwrap(),
            "/subscriptions/ffffffff-ffff-ffff-ffff-ffffffffffff/resourceGroups/rg1"
        );

        ctx.set_scope(DeploymentScope::Tenant);
        assert_eq!(
            declared_resource_id(&ctx, &deployment_scope_id(&ctx), "Microsoft.Management/managementGroups", "mg").unwrap(),
            "/providers/Microsoft.Management/managementGroups/mg"
        );
    }

    #[test]
    fn test_parent_ids() {
        assert_eq!(
            parent_ids("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/a/things/b"),
            vec![
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/a".to_string(),
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet".to_string(),
            ]
        );
        assert!(parent_ids("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa").is_empty());
        assert!(parent_ids("/subscriptions/s").is_empty());
    }

    #[test]
    fn test_resolve_expands_and_trims() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        ctx.add_variable("sku", json!("Standard_LRS"));
        let resource = ResourceValue::new(
            "/x/providers/Microsoft.Storage/storageAccounts/sa",
            "sa",
            "Microsoft.Storage/storageAccounts",
            json!({
                "type": "Microsoft.Storage/storageAccounts",
                "name": "[concat('s', 'a')]",
                "condition": true,
                "comments": "test",
                "sku": {"name": "[variables('sku')]", "tier": null},
                "properties": {"allow": "[null()]", "https": true}
            }),
            "resources[0]",
        );
        resource.resolve(&ctx).unwrap();
        assert_eq!(resource.state(), ResolveState::Resolved);
        assert_eq!(
            resource.value(),
            json!({
                "name": "sa",
                "type": "Microsoft.Storage/storageAccounts",
                "id": "/x/providers/Microsoft.Storage/storageAccounts/sa",
                "sku": {"name": "Standard_LRS"},
                "properties": {"https": true}
            })
        );
    }

    #[test]
    fn test_resolve_restores_copy_state() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        let mut resource = ResourceValue::new(
            "id",
            "vm-1",
            "Microsoft.Compute/virtualMachines",
            json!({"properties": {"index": "[copyIndex()]"}}),
            "resources[0]",
        );
        let mut state = CopyIndexState::named("vmLoop", 3);
        state.next();
        state.next();
        resource.copy_state = Some(state);
        resource.resolve(&ctx).unwrap();
        assert_eq!(resource.value()["properties"]["index"], json!(1));
        assert_eq!(ctx.copy_depth(), 0);
    }

    #[test]
    fn test_resolve_failure_reports_path() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        let resource = ResourceValue::new(
            "id",
            "a",
            "Microsoft.Web/sites",
            json!({"properties": {"x": "[parameters('missing')]"}}),
            "resources[3]",
        );
        match resource.resolve(&ctx).unwrap_err() {
            DeploymentError::Expression { path, .. } => {
                assert_eq!(path, "resources[3].properties.x")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(resource.state(), ResolveState::Failed);
        assert!(resource.resolve(&ctx).is_err());
    }

    #[test]
    fn test_emit_redacts_secret_paths() {
        let ctx = TemplateContext::new(ExpansionOptions::default());
        let resource = ResourceValue::new(
            "id",
            "a",
            "Microsoft.Web/sites",
            json!({"properties": {
                "key": "[listKeys('sa', '2021-01-01').keys[0].value]",
                "plain": "visible"
            }}),
            "resources[0]",
        );
        resource.resolve(&ctx).unwrap();
        assert_eq!(resource.secret_paths(), vec!["properties.key".to_string()]);
        let emitted = resource.emit(false);
        assert_eq!(emitted["properties"]["key"], json!(SECRET_PLACEHOLDER));
        assert_eq!(emitted["properties"]["plain"], json!("visible"));
    }

    #[test]
    fn test_redact_nested_path() {
        let mut json = json!({"properties": {"items": [{"secret": "a"}, {"secret": "b"}]}});
        redact(&mut json, "properties.items[1].secret");
        assert_eq!(
            json,
            json!({"properties": {"items": [{"secret": "a"}, {"secret": SECRET_PLACEHOLDER}]}})
        );
        redact(&mut json, "properties.missing[4]");
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(
            path_segments("a.b[0][2].c"),
            vec![
                PathSegment::Key("a"),
                PathSegment::Key("b"),
                PathSegment::Index(0),
                PathSegment::Index(2),
                PathSegment::Key("c"),
            ]
        );
    }
}

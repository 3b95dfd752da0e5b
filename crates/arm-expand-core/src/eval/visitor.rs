//! The deployment visitor.
//!
//! Walks one template: registers its functions, parameters and variables,
//! declares its resources (applying conditions and copy loops), resolves them
//! in dependency order and finally nests and merges the emitted resources.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::diag::Diagnostics;
use crate::error::{DeploymentError, ExpressionError};
use crate::eval::compiler::{self, join_path};
use crate::eval::context::{DeploymentScope, TemplateContext};
use crate::eval::copy::CopyIndexState;
use crate::eval::deployment::{DeploymentValue, UserFunction, DEPLOYMENT_TYPE};
use crate::eval::graph::ResourceGraph;
use crate::eval::parameters::{self, ParameterSource, ParameterType};
use crate::eval::projection;
use crate::eval::resource::{
    declared_resource_id, deployment_scope_id, parent_ids, resource_group_scope,
    subscription_scope, ResourceValue,
};
use crate::eval::validate;
use crate::eval::value::{json_get, Value};
use crate::options::ExpansionOptions;

const STORAGE_ACCOUNT_TYPE: &str = "Microsoft.Storage/storageAccounts";
const SQL_DATABASE_TYPE: &str = "Microsoft.Sql/servers/databases";

/// The result of expanding a template.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Expansion {
    /// Resolved resources: dependency ordered, merged and nested.
    pub resources: Vec<JsonValue>,
    /// Outputs of the root deployment as `name -> {type, value}`.
    pub outputs: JsonMap<String, JsonValue>,
    pub diagnostics: Diagnostics,
}

/// Expands `template` with the supplied `parameters`.
///
/// `parameters` is either a map of parameter values or a parameters file
/// (`{"parameters": {"name": {"value": ...}}}`).
pub fn expand_template(
    template: &JsonValue,
    parameters: &JsonValue,
    options: ExpansionOptions,
) -> Result<Expansion, DeploymentError> {
    let mut visitor = DeploymentVisitor::new(options.strict);
    let name = options.deployment_name.clone();
    let ctx = TemplateContext::new(options);
    let supplied = parameter_values(parameters);
    let expanded = visitor.visit(&ctx, &name, template, &supplied, "", Nesting::Root)?;
    let resources = merge(nest(expanded.resources))
        .into_iter()
        .map(|mut r| {
            projection::effective(&mut r.value, &r.resource_type, &r.id);
            r.value
        })
        .collect();
    Ok(Expansion {
        resources,
        outputs: expanded.outputs,
        diagnostics: visitor.diags,
    })
}

/// Reads supplied parameter values from a plain map or a parameters file.
pub fn parameter_values(parameters: &JsonValue) -> JsonMap<String, JsonValue> {
    let Some(map) = parameters.as_object() else {
        return JsonMap::new();
    };
    let is_file = json_get(parameters, "parameters").is_some_and(JsonValue::is_object)
        && map.keys().all(|k| {
            ["$schema", "contentVersion", "parameters"]
                .iter()
                .any(|p| p.eq_ignore_ascii_case(k))
        });
    if !is_file {
        return map.clone();
    }
    json_get(parameters, "parameters")
        .and_then(JsonValue::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(name, entry)| {
                    parameters::supplied_value(entry).map(|value| (name.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    Root,
    /// A nested deployment with its own evaluation scope.
    Inner,
    /// A nested deployment evaluated in the scope of its parent.
    Outer,
}

/// A resource ready for the nest and merge post-pass.
#[derive(Debug, Clone)]
struct EmittedResource {
    id: String,
    resource_type: String,
    scope: Option<String>,
    has_dependencies: bool,
    value: JsonValue,
}

impl EmittedResource {
    fn new(resource: &ResourceValue, value: JsonValue) -> Self {
        Self {
            id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            scope: resource.scope.clone(),
            has_dependencies: !resource.depends_on.is_empty(),
            value,
        }
    }

    fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type.eq_ignore_ascii_case(resource_type)
    }
}

struct Declared {
    resource: Rc<ResourceValue>,
    /// The `properties` of a deployment resource with an inline template.
    nested: Option<JsonValue>,
}

struct Parent {
    resource_type: String,
    name: String,
}

struct TemplateExpansion {
    resources: Vec<EmittedResource>,
    outputs: JsonMap<String, JsonValue>,
}

/// Expands templates, collecting report-and-continue diagnostics.
pub struct DeploymentVisitor {
    pub diags: Diagnostics,
    strict: bool,
}

impl DeploymentVisitor {
    /// Creates a visitor. In strict mode the first resource failure aborts
    /// the expansion instead of dropping the resource.
    pub fn new(strict: bool) -> Self {
        Self {
            diags: Diagnostics::new(),
            strict,
        }
    }

    fn visit(
        &mut self,
        ctx: &TemplateContext,
        name: &str,
        template: &JsonValue,
        supplied: &JsonMap<String, JsonValue>,
        base: &str,
        nesting: Nesting,
    ) -> Result<TemplateExpansion, DeploymentError> {
        if !template.is_object() {
            return Err(DeploymentError::template(format!(
                "the template of deployment '{}' is not an object",
                name
            )));
        }
        if nesting != Nesting::Outer {
            let schema = json_get(template, "$schema")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            ctx.set_scope(DeploymentScope::from_schema(schema));
        }

        let scope = deployment_scope_id(ctx);
        let deployment = Rc::new(DeploymentValue::new(
            name,
            &scope,
            &ctx.options().resource_group.location,
            template,
            deployment_parameters(template, supplied),
            nesting != Nesting::Root,
        ));
        ctx.enter_deployment(Rc::clone(&deployment));
        let result = self.visit_sections(ctx, &deployment, template, supplied, base, nesting);
        ctx.exit_deployment();
        result
    }

    fn visit_sections(
        &mut self,
        ctx: &TemplateContext,
        deployment: &DeploymentValue,
        template: &JsonValue,
        supplied: &JsonMap<String, JsonValue>,
        base: &str,
        nesting: Nesting,
    ) -> Result<TemplateExpansion, DeploymentError> {
        functions(ctx, template)?;
        self.parameters(ctx, template, supplied, base)?;
        variables(ctx, template, base)?;
        let declared = self.resources(ctx, template, base)?;
        if let Some(JsonValue::Object(outputs)) = json_get(template, "outputs") {
            for (name, definition) in outputs {
                deployment.add_output(name, definition.clone());
            }
        }
        let resources = self.resolve_all(ctx, &declared, base, nesting)?;
        let outputs = resolve_outputs(ctx, deployment, template, base, &mut self.diags)?;
        tracing::debug!(
            deployment = %deployment.name,
            resources = resources.len(),
            outputs = outputs.len(),
            "expanded template"
        );
        Ok(TemplateExpansion { resources, outputs })
    }

    fn parameters(
        &mut self,
        ctx: &TemplateContext,
        template: &JsonValue,
        supplied: &JsonMap<String, JsonValue>,
        base: &str,
    ) -> Result<(), DeploymentError> {
        let Some(JsonValue::Object(definitions)) = json_get(template, "parameters") else {
            return Ok(());
        };
        for (name, definition) in definitions {
            if let Some(declared) = json_get(definition, "type").and_then(JsonValue::as_str) {
                if ParameterType::parse(declared).is_none() {
                    return Err(DeploymentError::Parameter {
                        name: name.clone(),
                        reason: format!("the type '{}' is not valid", declared),
                    });
                }
            }
            let value = supplied
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone());
            ctx.add_parameter(name, ParameterSource::new(definition.clone(), value));
        }

        let base = join_path(base, "parameters");
        for (name, definition) in definitions {
            let value = ctx
                .parameter(name)
                .map_err(|err| DeploymentError::Parameter {
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
            ctx.take_secret_touched();
            if value.is_mock() || value.is_null() {
                continue;
            }
            let json = value.to_json();
            let path = Some(join_path(&base, name));
            let declared = ParameterSource::new(definition.clone(), None);
            if let Some(parameter_type) = declared.parameter_type() {
                if !parameter_type.accepts(&json) {
                    let type_name = json_get(definition, "type")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("object");
                    self.diags.warning(
                        path.clone(),
                        format!("the parameter '{}' is not a {}", name, type_name),
                        format!("the value {} does not match the declared type", json),
                    );
                }
            }
            if let Some(reason) = parameters::validate(definition, &json) {
                self.diags.warning(
                    path,
                    format!("the parameter '{}' is not valid", name),
                    reason,
                );
            }
            validate::parameter(&mut self.diags, &join_path(&base, name), name, definition, &json);
        }
        Ok(())
    }

    fn resources(
        &mut self,
        ctx: &TemplateContext,
        template: &JsonValue,
        base: &str,
    ) -> Result<Vec<Declared>, DeploymentError> {
        let path = join_path(base, "resources");
        let mut declared = Vec::new();
        match json_get(template, "resources") {
            Some(JsonValue::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    if let Err(err) = self.declare(ctx, item, &item_path, None, None, &mut declared) {
                        self.report(&item_path, None, err)?;
                    }
                }
            }
            Some(JsonValue::Object(items)) => {
                for (symbol, item) in items {
                    if json_get(item, "import").is_some() {
                        continue;
                    }
                    let item_path = join_path(&path, symbol);
                    let symbol = Some(symbol.as_str());
                    if let Err(err) = self.declare(ctx, item, &item_path, symbol, None, &mut declared) {
                        self.report(&item_path, symbol, err)?;
                    }
                }
            }
            _ => {}
        }
        Ok(declared)
    }

    /// Declares one resource entry, once per iteration of its copy loop.
    fn declare(
        &mut self,
        ctx: &TemplateContext,
        declaration: &JsonValue,
        path: &str,
        symbol: Option<&str>,
        parent: Option<&Parent>,
        out: &mut Vec<Declared>,
    ) -> Result<(), DeploymentError> {
        let Some(copy) = json_get(declaration, "copy").filter(|c| c.is_object()) else {
            return self.instance(ctx, declaration, path, symbol, None, parent, out);
        };

        let copy_path = join_path(path, "copy");
        let name = json_get(copy, "name")
            .and_then(JsonValue::as_str)
            .or(symbol)
            .unwrap_or_default()
            .to_string();
        let mut secrets = Vec::new();
        let count = compiler::copy_count(ctx, json_get(copy, "count"), &copy_path, &mut secrets)?;

        let mut failure = None;
        let state = CopyIndexState::named(name.clone(), count);
        let result = ctx.for_each_copy(state, true, || {
            match self.instance(ctx, declaration, path, symbol, Some(&name), parent, out) {
                Ok(()) => Ok(()),
                Err(err) => {
                    failure = Some(err);
                    Err(ExpressionError::symbol(name.clone(), "copy iteration failed"))
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        result.map_err(|source| DeploymentError::Expression {
            path: copy_path,
            expression: String::new(),
            source,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn instance(
        &mut self,
        ctx: &TemplateContext,
        declaration: &JsonValue,
        path: &str,
        symbol: Option<&str>,
        copy_name: Option<&str>,
        parent: Option<&Parent>,
        out: &mut Vec<Declared>,
    ) -> Result<(), DeploymentError> {
        if let Some(condition) = json_get(declaration, "condition") {
            let mut secrets = Vec::new();
            let value =
                compiler::expand_path(ctx, condition, &join_path(path, "condition"), &mut secrets)?;
            if value.as_bool() == Some(false) {
                tracing::debug!(path, "resource skipped by condition");
                return Ok(());
            }
        }

        let mut resource_type = expand_string(ctx, json_get(declaration, "type"), &join_path(path, "type"))?;
        let mut name = expand_string(ctx, json_get(declaration, "name"), &join_path(path, "name"))?;
        if let Some(parent) = parent {
            if !resource_type.contains('/') {
                resource_type = format!("{}/{}", parent.resource_type, resource_type);
                name = format!("{}/{}", parent.name, name);
            }
        }

        let scope = match json_get(declaration, "scope").filter(|s| !s.is_null()) {
            Some(scope) => Some(expand_string(ctx, Some(scope), &join_path(path, "scope"))?),
            None => None,
        };
        let is_deployment = resource_type.eq_ignore_ascii_case(DEPLOYMENT_TYPE);
        let scope_id = match &scope {
            Some(scope) => scope.clone(),
            None if is_deployment => deployment_target(ctx, declaration, path)?,
            None => deployment_scope_id(ctx),
        };
        let id = declared_resource_id(ctx, &scope_id, &resource_type, &name).map_err(|source| {
            DeploymentError::Expression {
                path: join_path(path, "name"),
                expression: name.clone(),
                source,
            }
        })?;

        let mut depends_on = Vec::new();
        if let Some(JsonValue::Array(items)) = json_get(declaration, "dependsOn") {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.dependsOn[{}]", path, i);
                depends_on.push(expand_string(ctx, Some(item), &item_path)?);
            }
        }

        let nested = if is_deployment {
            json_get(declaration, "properties")
                .filter(|p| json_get(p, "template").is_some_and(JsonValue::is_object))
                .cloned()
        } else {
            None
        };
        let mut stored = declaration.clone();
        if nested.is_some() {
            strip_nested_template(&mut stored);
        }

        let mut resource = ResourceValue::new(id, name.clone(), resource_type.clone(), stored, path);
        resource.symbolic_name = symbol.map(str::to_string);
        resource.copy_name = copy_name.map(str::to_string);
        resource.copy_state = ctx.current_copy();
        resource.depends_on = depends_on;
        resource.scope = scope;
        resource.existing = json_get(declaration, "existing")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let resource = Rc::new(resource);
        ctx.add_resource(Rc::clone(&resource));
        out.push(Declared { resource, nested });

        if let Some(JsonValue::Array(children)) = json_get(declaration, "resources") {
            let parent = Parent {
                resource_type,
                name,
            };
            for (i, child) in children.iter().enumerate() {
                let child_path = format!("{}.resources[{}]", path, i);
                if let Err(err) = self.declare(ctx, child, &child_path, None, Some(&parent), out) {
                    self.report(&child_path, None, err)?;
                }
            }
        }
        Ok(())
    }

    /// Resolves the resources declared by one template in dependency order.
    fn resolve_all(
        &mut self,
        ctx: &TemplateContext,
        declared: &[Declared],
        base: &str,
        nesting: Nesting,
    ) -> Result<Vec<EmittedResource>, DeploymentError> {
        let graph = ResourceGraph::new(ctx.resources());
        let mut sort_diags = Diagnostics::new();
        let order = graph.sort(&mut sort_diags);
        if nesting == Nesting::Outer {
            // The parent's resources are visible here too and were already
            // reported.
            sort_diags.under(base).for_each(|d| self.diags.add(d.clone()));
        } else {
            self.diags.extend(sort_diags);
        }

        let keep_secrets = ctx.options().keep_secrets;
        let mut emitted = Vec::new();
        for resource in order {
            let Some(entry) = declared.iter().find(|d| Rc::ptr_eq(&d.resource, &resource)) else {
                continue;
            };
            let result = match &entry.nested {
                Some(properties) => self.nested_deployment(ctx, &resource, properties, &mut emitted),
                None => resource.resolve(ctx).map(|()| {
                    if !resource.existing {
                        emitted.push(EmittedResource::new(&resource, resource.emit(keep_secrets)));
                    }
                }),
            };
            if let Err(err) = result {
                self.report(&resource.path, Some(&resource.name), err)?;
            }
        }
        Ok(emitted)
    }

    /// Expands a deployment resource with an inline template. Its resources
    /// join `emitted` and its outputs become the deployment's properties.
    fn nested_deployment(
        &mut self,
        ctx: &TemplateContext,
        resource: &ResourceValue,
        properties: &JsonValue,
        emitted: &mut Vec<EmittedResource>,
    ) -> Result<(), DeploymentError> {
        let template = json_get(properties, "template")
            .cloned()
            .unwrap_or(JsonValue::Null);
        let template_path = join_path(&join_path(&resource.path, "properties"), "template");
        let inner = json_get(properties, "expressionEvaluationOptions")
            .and_then(|o| json_get(o, "scope"))
            .and_then(JsonValue::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("inner"));

        let expansion = ctx.with_copy_state(resource.copy_state.clone(), || {
            if !inner {
                return self.visit(
                    ctx,
                    &resource.name,
                    &template,
                    &JsonMap::new(),
                    &template_path,
                    Nesting::Outer,
                );
            }
            let supplied = nested_parameters(ctx, properties, &resource.path)?;
            let mut options = ctx.options().clone();
            let (subscription, resource_group) = target_of(&resource.id);
            if let Some(subscription) = subscription {
                options.subscription.subscription_id = subscription;
            }
            if let Some(resource_group) = resource_group {
                options.resource_group.name = resource_group;
            }
            options.deployment_name = resource.name.clone();
            let nested = TemplateContext::new(options);
            self.visit(
                &nested,
                &resource.name,
                &template,
                &supplied,
                &template_path,
                Nesting::Inner,
            )
        })?;

        tracing::debug!(
            deployment = %resource.name,
            inner,
            resources = expansion.resources.len(),
            "expanded nested deployment"
        );
        emitted.extend(expansion.resources);
        resource.complete(serde_json::json!({
            "name": resource.name,
            "type": resource.resource_type,
            "id": resource.id,
            "properties": {
                "provisioningState": "Succeeded",
                "outputs": expansion.outputs,
            },
        }));
        Ok(())
    }

    /// Records a resource failure and drops the resource, or returns the
    /// failure in strict mode.
    fn report(
        &mut self,
        path: &str,
        name: Option<&str>,
        err: DeploymentError,
    ) -> Result<(), DeploymentError> {
        if self.strict {
            return Err(err);
        }
        tracing::warn!(path, error = %err, "dropping resource that failed to expand");
        let summary = match name {
            Some(name) => format!("failed to expand resource '{}'", name),
            None => "failed to expand resource".to_string(),
        };
        self.diags.error(Some(path.to_string()), summary, err.to_string());
        Ok(())
    }
}

fn functions(ctx: &TemplateContext, template: &JsonValue) -> Result<(), DeploymentError> {
    let Some(JsonValue::Array(namespaces)) = json_get(template, "functions") else {
        return Ok(());
    };
    for namespace in namespaces {
        let name = json_get(namespace, "namespace")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| DeploymentError::template("a function namespace has no name"))?;
        if let Some(JsonValue::Object(members)) = json_get(namespace, "members") {
            for (member, definition) in members {
                ctx.add_function(UserFunction::from_template(name, member, definition)?);
            }
        }
    }
    Ok(())
}

/// Registers variables and evaluates each once, so that a failing variable
/// fails the expansion even when nothing reads it.
fn variables(ctx: &TemplateContext, template: &JsonValue, base: &str) -> Result<(), DeploymentError> {
    let Some(JsonValue::Object(variables)) = json_get(template, "variables") else {
        return Ok(());
    };
    let mut names = Vec::new();
    for (name, value) in variables {
        match value {
            JsonValue::Array(copies) if name.eq_ignore_ascii_case("copy") => {
                for copy in copies {
                    ctx.add_variable_copy(copy.clone());
                    if let Some(name) = json_get(copy, "name").and_then(JsonValue::as_str) {
                        names.push(name.to_string());
                    }
                }
                continue;
            }
            _ => {}
        }
        ctx.add_variable(name, value.clone());
        names.push(name.clone());
    }

    let base = join_path(base, "variables");
    for name in names {
        ctx.variable(&name)
            .map_err(|source| DeploymentError::Expression {
                path: join_path(&base, &name),
                expression: expression_text(variables.get(&name)),
                source,
            })?;
        ctx.take_secret_touched();
    }
    Ok(())
}

fn resolve_outputs(
    ctx: &TemplateContext,
    deployment: &DeploymentValue,
    template: &JsonValue,
    base: &str,
    diags: &mut Diagnostics,
) -> Result<JsonMap<String, JsonValue>, DeploymentError> {
    let mut outputs = JsonMap::new();
    let base = join_path(base, "outputs");
    for name in deployment.outputs().names() {
        ctx.take_secret_touched();
        let value = deployment.outputs().get(ctx, &name).map_err(|source| {
            let definition = json_get(template, "outputs").and_then(|o| json_get(o, &name));
            DeploymentError::Expression {
                path: join_path(&base, &name),
                expression: expression_text(definition.and_then(|d| json_get(d, "value"))),
                source,
            }
        })?;
        let secret = ctx.take_secret_touched();
        if let Some(value) = value {
            let json = value.to_json();
            validate::output(diags, &join_path(&base, &name), &name, &json, secret);
            outputs.insert(name, json);
        }
    }
    Ok(outputs)
}

/// The parameters object exposed by `deployment().properties.parameters`.
/// Secure parameters are left out.
fn deployment_parameters(template: &JsonValue, supplied: &JsonMap<String, JsonValue>) -> JsonValue {
    let definitions = json_get(template, "parameters");
    let entries = supplied
        .iter()
        .filter(|(name, _)| {
            !definitions
                .and_then(|d| json_get(d, name))
                .is_some_and(|d| ParameterSource::new(d.clone(), None).is_secure())
        })
        .map(|(name, value)| (name.clone(), serde_json::json!({ "value": value })))
        .collect();
    JsonValue::Object(entries)
}

/// Expands the `properties.parameters` of an inner-scoped deployment in the
/// parent context.
fn nested_parameters(
    ctx: &TemplateContext,
    properties: &JsonValue,
    path: &str,
) -> Result<JsonMap<String, JsonValue>, DeploymentError> {
    let mut supplied = JsonMap::new();
    let Some(JsonValue::Object(entries)) = json_get(properties, "parameters") else {
        return Ok(supplied);
    };
    let base = join_path(&join_path(path, "properties"), "parameters");
    for (name, entry) in entries {
        let entry_path = join_path(&base, name);
        let mut secrets = Vec::new();
        let value = compiler::expand_path(ctx, entry, &entry_path, &mut secrets)?
            .materialize(ctx)
            .map_err(|source| DeploymentError::Expression {
                path: entry_path.clone(),
                expression: String::new(),
                source,
            })?;
        ctx.take_secret_touched();
        if let Some(value) = parameters::supplied_value(&value.to_json()) {
            supplied.insert(name.clone(), value);
        }
    }
    Ok(supplied)
}

/// Returns the scope id a deployment resource deploys into, honouring its
/// `subscriptionId` and `resourceGroup` properties.
fn deployment_target(
    ctx: &TemplateContext,
    declaration: &JsonValue,
    path: &str,
) -> Result<String, DeploymentError> {
    let subscription = optional_string(ctx, declaration, "subscriptionId", path)?;
    let resource_group = optional_string(ctx, declaration, "resourceGroup", path)?;
    let options = ctx.options();
    Ok(match (subscription, resource_group) {
        (subscription, Some(resource_group)) => resource_group_scope(
            subscription
                .as_deref()
                .unwrap_or(&options.subscription.subscription_id),
            &resource_group,
        ),
        (Some(subscription), None) if ctx.scope() == DeploymentScope::ResourceGroup => {
            resource_group_scope(&subscription, &options.resource_group.name)
        }
        (Some(subscription), None) => subscription_scope(&subscription),
        (None, None) => deployment_scope_id(ctx),
    })
}

/// Reads the subscription and resource group segments of a resource id.
fn target_of(id: &str) -> (Option<String>, Option<String>) {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let after = |key: &str| {
        segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case(key))
            .and_then(|i| segments.get(i + 1))
            .map(|s| s.to_string())
    };
    (after("subscriptions"), after("resourceGroups"))
}

fn optional_string(
    ctx: &TemplateContext,
    declaration: &JsonValue,
    key: &str,
    path: &str,
) -> Result<Option<String>, DeploymentError> {
    match json_get(declaration, key).filter(|v| !v.is_null()) {
        Some(value) => {
            let value = expand_string(ctx, Some(value), &join_path(path, key))?;
            Ok(Some(value).filter(|s| !s.is_empty()))
        }
        None => Ok(None),
    }
}

/// Expands a declaration property that must produce a string.
fn expand_string(
    ctx: &TemplateContext,
    json: Option<&JsonValue>,
    path: &str,
) -> Result<String, DeploymentError> {
    let Some(json) = json else {
        return Err(DeploymentError::template(format!("{}: a value is required", path)));
    };
    let mut secrets = Vec::new();
    Ok(match compiler::expand_path(ctx, json, path, &mut secrets)? {
        Value::String(s) => s,
        Value::Mock(mock) => mock.render(),
        other => other.to_display_string(),
    })
}

fn expression_text(json: Option<&JsonValue>) -> String {
    match json {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Removes the inline template and parameters from a deployment declaration;
/// they are expanded in the nested deployment's own pass.
fn strip_nested_template(declaration: &mut JsonValue) {
    let properties = declaration
        .as_object_mut()
        .and_then(|map| {
            map.iter_mut()
                .find(|(k, _)| k.eq_ignore_ascii_case("properties"))
                .map(|(_, v)| v)
        });
    if let Some(JsonValue::Object(properties)) = properties {
        properties.retain(|k, _| {
            !k.eq_ignore_ascii_case("template") && !k.eq_ignore_ascii_case("parameters")
        });
    }
}

// Post-pass

fn type_depth(resource_type: &str) -> usize {
    resource_type.split('/').filter(|s| !s.is_empty()).count()
}

/// Returns the index of the resource that `index` nests under, if any.
fn parent_of(entries: &[EmittedResource], index: usize) -> Option<usize> {
    let entry = &entries[index];
    if entry.is_type(SQL_DATABASE_TYPE)
        || !(entry.has_dependencies || type_depth(&entry.resource_type) > 2)
    {
        return None;
    }
    let candidates = match &entry.scope {
        Some(scope) => {
            let mut ids = vec![scope.clone()];
            ids.extend(parent_ids(scope));
            ids
        }
        None => parent_ids(&entry.id),
    };
    candidates.iter().find_map(|id| {
        entries
            .iter()
            .enumerate()
            .find(|(i, e)| *i != index && e.id.eq_ignore_ascii_case(id))
            .map(|(i, _)| i)
    })
}

/// Moves child resources into the `resources` array of their nearest
/// declared parent. Nested children lose their `dependsOn`.
fn nest(entries: Vec<EmittedResource>) -> Vec<EmittedResource> {
    let count = entries.len();
    let mut parents: Vec<Option<usize>> = (0..count).map(|i| parent_of(&entries, i)).collect();
    for i in 0..count {
        let mut current = parents[i];
        let mut steps = 0;
        while let Some(p) = current {
            if p == i || steps > count {
                parents[i] = None;
                break;
            }
            steps += 1;
            current = parents[p];
        }
    }

    let mut children = vec![Vec::new(); count];
    for (i, parent) in parents.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(i);
        }
    }
    let mut slots: Vec<Option<EmittedResource>> = entries.into_iter().map(Some).collect();
    (0..count)
        .filter(|i| parents[*i].is_none())
        .filter_map(|i| assemble(i, &children, &mut slots))
        .collect()
}

fn assemble(
    index: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<EmittedResource>],
) -> Option<EmittedResource> {
    let mut entry = slots[index].take()?;
    for &child in &children[index] {
        let Some(mut child) = assemble(child, children, slots) else {
            continue;
        };
        tracing::debug!(child = %child.id, parent = %entry.id, "nesting child resource");
        if let JsonValue::Object(map) = &mut child.value {
            map.remove("dependsOn");
        }
        push_child(&mut entry.value, child.value);
    }
    Some(entry)
}

fn push_child(parent: &mut JsonValue, child: JsonValue) {
    if let JsonValue::Object(map) = parent {
        let resources = map
            .entry("resources")
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if let JsonValue::Array(items) = resources {
            items.push(child);
        }
    }
}

/// Folds resources that share an id into one.
///
/// Storage accounts merge left: the first instance stays in place and later
/// duplicates are merged into it. Every other type merges right: the last
/// instance wins and accumulates the children of earlier duplicates.
fn merge(entries: Vec<EmittedResource>) -> Vec<EmittedResource> {
    let mut slots: Vec<Option<EmittedResource>> = entries.into_iter().map(Some).collect();
    for i in 0..slots.len() {
        let Some(id) = slots[i].as_ref().map(|e| e.id.clone()) else {
            continue;
        };
        let duplicates: Vec<usize> = (i + 1..slots.len())
            .filter(|&j| slots[j].as_ref().is_some_and(|e| e.id.eq_ignore_ascii_case(&id)))
            .collect();
        let Some(&last) = duplicates.last() else {
            continue;
        };
        let Some(mut first) = slots[i].take() else {
            continue;
        };
        tracing::debug!(id = %id, count = duplicates.len() + 1, "merging duplicate resources");

        if first.is_type(STORAGE_ACCOUNT_TYPE) {
            for j in duplicates {
                if let Some(duplicate) = slots[j].take() {
                    merge_json(&mut first.value, duplicate.value);
                }
            }
            dedupe_children_left(&mut first.value);
            slots[i] = Some(first);
        } else {
            let mut merged = first;
            for j in duplicates {
                if let Some(mut duplicate) = slots[j].take() {
                    let earlier = take_children(&mut merged.value);
                    prepend_children(&mut duplicate.value, earlier);
                    merged = duplicate;
                }
            }
            dedupe_children_right(&mut merged.value);
            slots[last] = Some(merged);
        }
    }
    slots.into_iter().flatten().collect()
}

/// Merges `source` into `target`: objects recursively with case-insensitive
/// keys, arrays by concatenation. Null values in `source` are ignored.
pub(crate) fn merge_json(target: &mut JsonValue, source: JsonValue) {
    match (target, source) {
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                if value.is_null() {
                    continue;
                }
                let existing = target.keys().find(|k| k.eq_ignore_ascii_case(&key)).cloned();
                match existing.and_then(|k| target.get_mut(&k)) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (JsonValue::Array(target), JsonValue::Array(source)) => target.extend(source),
        (_, JsonValue::Null) => {}
        (target, source) => *target = source,
    }
}

fn child_id(child: &JsonValue) -> Option<String> {
    child.get("id").and_then(JsonValue::as_str).map(str::to_string)
}

fn take_children(value: &mut JsonValue) -> Vec<JsonValue> {
    match value.as_object_mut().and_then(|map| map.remove("resources")) {
        Some(JsonValue::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn prepend_children(value: &mut JsonValue, mut earlier: Vec<JsonValue>) {
    if earlier.is_empty() {
        return;
    }
    earlier.extend(take_children(value));
    if let JsonValue::Object(map) = value {
        map.insert("resources".to_string(), JsonValue::Array(earlier));
    }
}

/// Merges children that share an id into the first of them.
fn dedupe_children_left(value: &mut JsonValue) {
    let children = take_children(value);
    if children.is_empty() {
        return;
    }
    let mut merged: Vec<JsonValue> = Vec::with_capacity(children.len());
    for child in children {
        let existing = child_id(&child).and_then(|id| {
            merged
                .iter()
                .position(|m| child_id(m).is_some_and(|m| m.eq_ignore_ascii_case(&id)))
        });
        match existing {
            Some(at) => merge_json(&mut merged[at], child),
            None => merged.push(child),
        }
    }
    merged.iter_mut().for_each(dedupe_children_left);
    if let JsonValue::Object(map) = value {
        map.insert("resources".to_string(), JsonValue::Array(merged));
    }
}

/// Keeps only the last child for each id.
fn dedupe_children_right(value: &mut JsonValue) {
    let children = take_children(value);
    if children.is_empty() {
        return;
    }
    let mut seen = HashSet::new();
    let mut kept: Vec<JsonValue> = children
        .into_iter()
        .rev()
        .filter(|child| match child_id(child) {
            Some(id) => seen.insert(id.to_ascii_lowercase()),
            None => true,
        })
        .collect();
    kept.reverse();
    if let JsonValue::Object(map) = value {
        map.insert("resources".to_string(), JsonValue::Array(kept));
    }
}

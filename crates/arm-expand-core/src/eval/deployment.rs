//! The deployment pseudo-resource, its lazily evaluated outputs, and
//! user-defined functions.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::diag;
use crate::error::{DeploymentError, ExpressionError, Result};
use crate::eval::compiler;
use crate::eval::context::{Context, FunctionContext};
use crate::eval::copy::CopyIndexState;
use crate::eval::parameters::ParameterType;
use crate::eval::value::{json_get, object, LazyObject, Map, Value};

pub const DEPLOYMENT_TYPE: &str = "Microsoft.Resources/deployments";

/// A function declared in a template's `functions` section, called as
/// `namespace.member(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunction {
    pub name: String,
    pub parameters: Vec<String>,
    pub output: JsonValue,
}

impl UserFunction {
    /// Reads one member of a `functions` namespace.
    pub fn from_template(
        namespace: &str,
        member: &str,
        definition: &JsonValue,
    ) -> std::result::Result<Self, DeploymentError> {
        let name = format!("{}.{}", namespace, member);
        let output = json_get(definition, "output")
            .and_then(|o| json_get(o, "value"))
            .cloned()
            .ok_or_else(|| {
                DeploymentError::template(format!("the function '{}' has no output value", name))
            })?;
        let parameters = match json_get(definition, "parameters") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|p| {
                    json_get(p, "name")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            DeploymentError::template(format!(
                                "a parameter of the function '{}' has no name",
                                name
                            ))
                        })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };
        Ok(Self {
            name,
            parameters,
            output,
        })
    }
}

/// Calls the user-defined function `name` with already evaluated arguments.
pub fn invoke_user_function(ctx: &dyn Context, name: &str, args: Vec<Value>) -> Result<Value> {
    let root = ctx.root();
    let Some(function) = root.function(name) else {
        return Err(ExpressionError::NotImplemented {
            function: name.to_string(),
            suggestion: diag::suggest(&root.function_names(), name),
        });
    };
    if args.len() != function.parameters.len() {
        return Err(ExpressionError::arity(
            name,
            format!(
                "{} argument(s), got {}",
                function.parameters.len(),
                args.len()
            ),
        ));
    }
    let parameters = function.parameters.iter().cloned().zip(args).collect();
    let scope = FunctionContext::new(root, &function.name, parameters);
    compiler::expand(&scope, &function.output)
}

#[derive(Debug, Clone)]
enum OutputSlot {
    Pending(JsonValue),
    Evaluating,
    Resolved { value: Option<Value>, secret: bool },
}

/// Outputs of a deployment, evaluated on first access.
#[derive(Debug, Default)]
pub struct DeploymentOutputs {
    slots: RefCell<Vec<(String, OutputSlot)>>,
}

impl DeploymentOutputs {
    pub fn add(&self, name: &str, definition: JsonValue) {
        self.slots
            .borrow_mut()
            .push((name.to_string(), OutputSlot::Pending(definition)));
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Returns `{type, value}` for the output `name`, or `None` when it does
    /// not exist or its condition is false.
    ///
    /// Reading an output derived from a secret marks the read as secret.
    pub fn get(&self, ctx: &dyn Context, name: &str) -> Result<Option<Value>> {
        let root = ctx.root();
        let definition = {
            let mut slots = self.slots.borrow_mut();
            let Some((_, slot)) = slots.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name))
            else {
                return Ok(None);
            };
            match slot {
                OutputSlot::Resolved { value, secret } => {
                    if *secret {
                        root.mark_secret();
                    }
                    return Ok(value.clone());
                }
                OutputSlot::Evaluating => {
                    return Err(ExpressionError::symbol(name, "circular reference detected"))
                }
                OutputSlot::Pending(definition) => {
                    let definition = definition.clone();
                    *slot = OutputSlot::Evaluating;
                    definition
                }
            }
        };

        let outer = root.take_secret_touched();
        let result = evaluate_output(ctx, name, &definition);
        let secret = root.take_secret_touched();
        if outer || secret {
            root.mark_secret();
        }
        let mut slots = self.slots.borrow_mut();
        if let Some((_, slot)) = slots.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            *slot = match &result {
                Ok(value) => OutputSlot::Resolved {
                    value: value.clone(),
                    secret,
                },
                Err(_) => OutputSlot::Pending(definition),
            };
        }
        result
    }
}

fn evaluate_output(ctx: &dyn Context, name: &str, definition: &JsonValue) -> Result<Option<Value>> {
    if let Some(condition) = json_get(definition, "condition") {
        if compiler::expand(ctx, condition)?.as_bool() == Some(false) {
            return Ok(None);
        }
    }

    let declared = json_get(definition, "type")
        .and_then(JsonValue::as_str)
        .unwrap_or("object");
    if ParameterType::parse(declared).is_none() {
        return Err(ExpressionError::symbol(
            name,
            format!("the output type '{}' is not valid", declared),
        ));
    }

    let value = match json_get(definition, "copy") {
        Some(copy) => {
            let count = match json_get(copy, "count") {
                Some(count) => compiler::expand(ctx, count)?.as_i64().ok_or_else(|| {
                    ExpressionError::argument("copy", "count", "an integer")
                })?,
                None => 1,
            };
            let input = json_get(copy, "input").cloned().unwrap_or(JsonValue::Null);
            let mut items = Vec::new();
            let state = CopyIndexState::named(name, count).with_input(input.clone());
            ctx.root().for_each_copy(state, false, || {
                items.push(compiler::expand(ctx, &input)?);
                Ok(())
            })?;
            Value::Array(items)
        }
        None => match json_get(definition, "value") {
            Some(value) => compiler::expand(ctx, value)?,
            None => Value::Null,
        },
    };
    let value = value.materialize(ctx)?;
    Ok(Some(object([
        ("type", Value::string(declared)),
        ("value", value),
    ])))
}

impl LazyObject for DeploymentOutputs {
    fn member(&self, ctx: &dyn Context, name: &str) -> Result<Option<Value>> {
        self.get(ctx, name)
    }

    fn materialize(&self, ctx: &dyn Context) -> Result<Value> {
        let mut entries: Map = Vec::new();
        for name in self.names() {
            if let Some(value) = self.get(ctx, &name)? {
                entries.push((name, value));
            }
        }
        Ok(Value::Object(entries))
    }
}

/// The `properties` of a deployment: static JSON plus lazy `outputs`.
#[derive(Debug)]
pub struct DeploymentProperties {
    properties: JsonValue,
    outputs: Rc<DeploymentOutputs>,
}

impl LazyObject for DeploymentProperties {
    fn member(&self, _ctx: &dyn Context, name: &str) -> Result<Option<Value>> {
        if name.eq_ignore_ascii_case("outputs") {
            let outputs: Rc<dyn LazyObject> = self.outputs.clone();
            return Ok(Some(Value::Lazy(outputs)));
        }
        Ok(json_get(&self.properties, name).map(Value::from_json))
    }

    fn materialize(&self, ctx: &dyn Context) -> Result<Value> {
        let mut value = Value::from_json(&self.properties);
        if let Value::Object(entries) = &mut value {
            entries.push(("outputs".to_string(), self.outputs.materialize(ctx)?));
        }
        Ok(value)
    }
}

/// The deployment currently being expanded, as returned by `deployment()`.
#[derive(Debug)]
pub struct DeploymentValue {
    pub name: String,
    pub id: String,
    value: JsonValue,
    properties: Rc<DeploymentProperties>,
}

impl DeploymentValue {
    /// Builds the deployment object for `template`.
    ///
    /// `scope` is the id of the deployment scope (`/` for tenant deployments).
    pub fn new(
        name: &str,
        scope: &str,
        location: &str,
        template: &JsonValue,
        parameters: JsonValue,
        is_nested: bool,
    ) -> Self {
        let id = format!(
            "{}/providers/{}/{}",
            if scope == "/" { "" } else { scope },
            DEPLOYMENT_TYPE,
            name
        );
        let template_text = template.to_string();
        let template_hash = crate::eval::builtins::string::unique_id(&[Some(template_text.as_str())]);
        let properties = serde_json::json!({
            "templateLink": {
                "id": id,
                "uri": "https://deployment-uri",
            },
            "template": {
                "contentVersion": json_get(template, "contentVersion").cloned().unwrap_or(JsonValue::Null),
                "metadata": json_get(template, "metadata").cloned().unwrap_or(JsonValue::Null),
            },
            "parameters": parameters,
            "mode": "Incremental",
            "provisioningState": "Accepted",
            "templateHash": template_hash,
        });
        let value = serde_json::json!({
            "name": name,
            "type": DEPLOYMENT_TYPE,
            "location": location,
            "id": id,
            "scope": scope,
            "rootDeployment": !is_nested,
        });
        Self {
            name: name.to_string(),
            id,
            value,
            properties: Rc::new(DeploymentProperties {
                properties,
                outputs: Rc::new(DeploymentOutputs::default()),
            }),
        }
    }

    pub fn outputs(&self) -> &DeploymentOutputs {
        &self.properties.outputs
    }

    pub fn add_output(&self, name: &str, definition: JsonValue) {
        self.properties.outputs.add(name, definition);
    }

    /// Evaluates every output, returning `name -> {type, value}`.
    pub fn resolve_outputs(&self, ctx: &dyn Context) -> Result<Map> {
        match self.properties.outputs.materialize(ctx)? {
            Value::Object(entries) => Ok(entries),
            _ => Ok(Vec::new()),
        }
    }
}

impl LazyObject for DeploymentValue {
    fn member(&self, _ctx: &dyn Context, name: &str) -> Result<Option<Value>> {
        if name.eq_ignore_ascii_case("properties") {
            let properties: Rc<dyn LazyObject> = self.properties.clone();
            return Ok(Some(Value::Lazy(properties)));
        }
        Ok(json_get(&self.value, name).map(Value::from_json))
    }

    fn materialize(&self, ctx: &dyn Context) -> Result<Value> {
        let mut value = Value::from_json(&self.value);
        if let Value::Object(entries) = &mut value {
            entries.push(("properties".to_string(), self.properties.materialize(ctx)?));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::TemplateContext;
    use crate::options::ExpansionOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        TemplateContext::new(ExpansionOptions::default())
    }

    #[test]
    fn test_user_function_from_template() {
        let f = UserFunction::from_template(
            "contoso",
            "uniqueName",
            &json!({
                "parameters": [{"name": "prefix", "type": "string"}],
                "output": {"type": "string", "value": "[concat(parameters('prefix'), '-x')]"}
            }),
        )
        .unwrap();
        assert_eq!(f.name, "contoso.uniqueName");
        assert_eq!(f.parameters, vec!["prefix".to_string()]);
        assert!(UserFunction::from_template("a", "b", &json!({})).is_err());
    }

    #[test]
    fn test_invoke_user_function() {
        let ctx = ctx();
        ctx.add_variable("v", json!("hidden"));
        ctx.add_function(
            UserFunction::from_template(
                "contoso",
                "name",
                &json!({
                    "parameters": [{"name": "prefix", "type": "string"}],
                    "output": {"type": "string", "value": "[concat(parameters('prefix'), '-x')]"}
                }),
            )
            .unwrap(),
        );
        assert_eq!(
            compiler::evaluate(&ctx, "[contoso.name('app')]").unwrap(),
            Value::string("app-x")
        );
        assert!(compiler::evaluate(&ctx, "[contoso.name()]").is_err());
        assert!(matches!(
            compiler::evaluate(&ctx, "[contoso.missing('a')]"),
            Err(ExpressionError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_user_function_cannot_read_variables() {
        let ctx = ctx();
        ctx.add_variable("v", json!("hidden"));
        ctx.add_function(
            UserFunction::from_template(
                "ns",
                "f",
                &json!({"output": {"type": "string", "value": "[variables('v')]"}}),
            )
            .unwrap(),
        );
        assert!(compiler::evaluate(&ctx, "[ns.f()]").is_err());
    }

    #[test]
    fn test_deployment_id_per_scope() {
        let rg = DeploymentValue::new(
            "deploy",
            "/subscriptions/s/resourceGroups/rg",
            "eastus",
            &json!({}),
            json!({}),
            false,
        );
        assert_eq!(
            rg.id,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Resources/deployments/deploy"
        );
        let tenant = DeploymentValue::new("deploy", "/", "eastus", &json!({}), json!({}), false);
        assert_eq!(tenant.id, "/providers/Microsoft.Resources/deployments/deploy");
    }

    #[test]
    fn test_outputs_are_lazy_and_cached() {
        let ctx = ctx();
        ctx.add_variable("name", json!("[concat('a', 'b')]"));
        let deployment = Rc::new(DeploymentValue::new(
            "deploy",
            "/",
            "eastus",
            &json!({}),
            json!({}),
            false,
        ));
        deployment.add_output("result", json!({"type": "string", "value": "[variables('name')]"}));
        deployment.add_output("skipped", json!({"type": "string", "condition": false, "value": "x"}));
        ctx.enter_deployment(Rc::clone(&deployment));

        assert_eq!(
            compiler::evaluate(&ctx, "[deployment().properties.outputs.result.value]").unwrap(),
            Value::string("ab")
        );
        let before = ctx.compiled_count();
        assert_eq!(
            deployment.outputs().get(&ctx, "RESULT").unwrap(),
            Some(object([
                ("type", Value::string("string")),
                ("value", Value::string("ab"))
            ]))
        );
        assert_eq!(ctx.compiled_count(), before);
        assert_eq!(deployment.outputs().get(&ctx, "skipped").unwrap(), None);
        assert_eq!(
            deployment.resolve_outputs(&ctx).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_output_copy() {
        let ctx = ctx();
        let deployment = DeploymentValue::new("d", "/", "eastus", &json!({}), json!({}), false);
        deployment.add_output(
            "names",
            json!({"type": "array", "copy": {"count": 2, "input": "[concat('n', copyIndex())]"}}),
        );
        let outputs = deployment.resolve_outputs(&ctx).unwrap();
        assert_eq!(outputs[0].1.to_json(), json!({"type": "array", "value": ["n0", "n1"]}));
    }

    #[test]
    fn test_deployment_materializes() {
        let ctx = ctx();
        let deployment = Rc::new(DeploymentValue::new(
            "deploy",
            "/",
            "eastus",
            &json!({"contentVersion": "1.0.0.0"}),
            json!({}),
            false,
        ));
        ctx.enter_deployment(deployment);
        let value = compiler::evaluate(&ctx, "[deployment()]")
            .unwrap()
            .materialize(&ctx)
            .unwrap()
            .to_json();
        assert_eq!(value["name"], json!("deploy"));
        assert_eq!(value["properties"]["template"]["contentVersion"], json!("1.0.0.0"));
        assert_eq!(value["properties"]["outputs"], json!({}));
        assert_eq!(
            value["properties"]["templateHash"].as_str().map(str::len),
            Some(14)
        );
    }
}

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::diag;
use crate::error::{DeploymentError, ExpressionError, Result};
use crate::eval::compiler;
use crate::eval::copy::{CopyIndexState, CopyIndexStore};
use crate::eval::deployment::{DeploymentValue, UserFunction};
use crate::eval::mock::MockStore;
use crate::eval::parameters::{self, ParameterSource};
use crate::eval::resource::ResourceValue;
use crate::eval::value::{ExprFn, Value};
use crate::expr;
use crate::options::ExpansionOptions;

/// The scope a template deploys to, taken from its `$schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeploymentScope {
    #[default]
    ResourceGroup,
    Subscription,
    ManagementGroup,
    Tenant,
}

impl DeploymentScope {
    /// Determines the scope from a `$schema` URI. Unknown schemas deploy to a
    /// resource group.
    pub fn from_schema(schema: &str) -> Self {
        let file = schema
            .trim_end_matches('#')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match file.as_str() {
            "subscriptiondeploymenttemplate.json" => DeploymentScope::Subscription,
            "managementgroupdeploymenttemplate.json" => DeploymentScope::ManagementGroup,
            "tenantdeploymenttemplate.json" => DeploymentScope::Tenant,
            _ => DeploymentScope::ResourceGroup,
        }
    }
}

/// The capabilities an expression can observe while it is evaluated.
///
/// All state lives in the root [`TemplateContext`]. Nested scopes wrap an
/// inner context and override only what they change.
pub trait Context {
    fn root(&self) -> &TemplateContext;

    fn parameter(&self, name: &str) -> Result<Value> {
        self.root().parameter(name)
    }

    fn variable(&self, name: &str) -> Result<Value> {
        self.root().variable(name)
    }

    /// Looks up a variable bound by an enclosing `lambda`.
    fn lambda_variable(&self, _name: &str) -> Option<Value> {
        None
    }

    fn in_lambda(&self) -> bool {
        false
    }

    /// Whether reading a missing property is an error rather than null.
    fn should_throw_missing_property(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending(T),
    Evaluating,
    Resolved(Value),
}

type Slots<T> = RefCell<Vec<(String, Slot<T>)>>;

/// The definition of a template variable.
#[derive(Debug, Clone)]
enum VariableSource {
    Value(JsonValue),
    /// A `copy` entry producing an array.
    Copy(JsonValue),
}

/// The root evaluation context for one template expansion.
pub struct TemplateContext {
    options: ExpansionOptions,
    scope: Cell<DeploymentScope>,
    parameters: Slots<ParameterSource>,
    secure_parameters: RefCell<HashSet<String>>,
    variables: Slots<VariableSource>,
    secure_variables: RefCell<HashSet<String>>,
    functions: RefCell<HashMap<String, Rc<UserFunction>>>,
    copy_index: RefCell<CopyIndexStore>,
    resources: RefCell<Vec<Rc<ResourceValue>>>,
    deployments: RefCell<Vec<Rc<DeploymentValue>>>,
    mocks: MockStore,
    expressions: RefCell<HashMap<String, ExprFn>>,
    secret_touched: Cell<bool>,
}

impl Context for TemplateContext {
    fn root(&self) -> &TemplateContext {
        self
    }
}

impl TemplateContext {
    pub fn new(options: ExpansionOptions) -> Self {
        Self {
            options,
            scope: Cell::new(DeploymentScope::ResourceGroup),
            parameters: RefCell::new(Vec::new()),
            secure_parameters: RefCell::new(HashSet::new()),
            variables: RefCell::new(Vec::new()),
            secure_variables: RefCell::new(HashSet::new()),
            functions: RefCell::new(HashMap::new()),
            copy_index: RefCell::new(CopyIndexStore::new()),
            resources: RefCell::new(Vec::new()),
            deployments: RefCell::new(Vec::new()),
            mocks: MockStore::new(),
            expressions: RefCell::new(HashMap::new()),
            secret_touched: Cell::new(false),
        }
    }

    pub fn options(&self) -> &ExpansionOptions {
        &self.options
    }

    pub fn scope(&self) -> DeploymentScope {
        self.scope.get()
    }

    pub fn set_scope(&self, scope: DeploymentScope) {
        self.scope.set(scope);
    }

    pub fn mocks(&self) -> &MockStore {
        &self.mocks
    }

    /// Compiles an expression, reusing earlier compilations of the same text.
    pub fn compile(&self, expression: &str) -> Result<ExprFn> {
        if let Some(f) = self.expressions.borrow().get(expression) {
            return Ok(Rc::clone(f));
        }
        let mut tokens = expr::parse(expression)?;
        let f = compiler::compile(&mut tokens, expression)?;
        self.expressions
            .borrow_mut()
            .insert(expression.to_string(), Rc::clone(&f));
        Ok(f)
    }

    pub fn compiled_count(&self) -> usize {
        self.expressions.borrow().len()
    }

    // Parameters

    pub fn add_parameter(&self, name: &str, source: ParameterSource) {
        if source.is_secure() {
            self.secure_parameters
                .borrow_mut()
                .insert(name.to_ascii_lowercase());
        }
        self.parameters
            .borrow_mut()
            .push((name.to_string(), Slot::Pending(source)));
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn is_secure_parameter(&self, name: &str) -> bool {
        self.secure_parameters
            .borrow()
            .contains(&name.to_ascii_lowercase())
    }

    pub fn parameter(&self, name: &str) -> Result<Value> {
        if self.is_secure_parameter(name) {
            self.secret_touched.set(true);
        }
        let value = resolve_slot(&self.parameters, name, |source| {
            parameters::resolve(self, name, &source)
        })?;
        value.ok_or_else(|| {
            let reason = match diag::suggest(&self.parameter_names(), name) {
                Some(s) => format!("the parameter does not exist; did you mean '{}'?", s),
                None => "the parameter does not exist".to_string(),
            };
            ExpressionError::symbol(name, reason)
        })
    }

    // Variables

    pub fn add_variable(&self, name: &str, value: JsonValue) {
        self.variables
            .borrow_mut()
            .push((name.to_string(), Slot::Pending(VariableSource::Value(value))));
    }

    /// Adds a variable produced by a `copy` loop `{name, count, input}`.
    pub fn add_variable_copy(&self, copy: JsonValue) {
        let name = copy
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        self.variables
            .borrow_mut()
            .push((name, Slot::Pending(VariableSource::Copy(copy))));
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Returns the value of a variable. A variable derived from a secret
    /// marks every read of it as secret.
    pub fn variable(&self, name: &str) -> Result<Value> {
        let outer = self.secret_touched.replace(false);
        let value = self.resolve_variable(name);
        let touched = self.secret_touched.get();
        let key = name.to_ascii_lowercase();
        if touched {
            self.secure_variables.borrow_mut().insert(key.clone());
        }
        let secret = touched || self.secure_variables.borrow().contains(&key);
        self.secret_touched.set(outer || secret);
        value
    }

    fn resolve_variable(&self, name: &str) -> Result<Value> {
        let value = resolve_slot(&self.variables, name, |source| match source {
            VariableSource::Value(json) => compiler::expand(self, &json),
            VariableSource::Copy(copy) => {
                let mut secrets = Vec::new();
                compiler::expand_copy(self, &copy, "variables", &mut secrets)
                    .map(|(_, items)| Value::Array(items))
                    .map_err(|err| match err {
                        DeploymentError::Expression { source, .. } => source,
                        other => ExpressionError::symbol(name, other.to_string()),
                    })
            }
        })?;
        value.ok_or_else(|| {
            let reason = match diag::suggest(&self.variable_names(), name) {
                Some(s) => format!("the variable does not exist; did you mean '{}'?", s),
                None => "the variable does not exist".to_string(),
            };
            ExpressionError::symbol(name, reason)
        })
    }

    // User-defined functions

    pub fn add_function(&self, function: UserFunction) {
        self.functions
            .borrow_mut()
            .insert(function.name.to_ascii_lowercase(), Rc::new(function));
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .borrow()
            .values()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn function(&self, name: &str) -> Option<Rc<UserFunction>> {
        self.functions
            .borrow()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    // Copy loops

    /// Runs `f` once per iteration of `state`, keeping pushes and pops
    /// balanced even when `f` fails.
    pub fn for_each_copy<F>(&self, state: CopyIndexState, resource_type: bool, mut f: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        {
            let mut store = self.copy_index.borrow_mut();
            if resource_type {
                store.push_resource_type(state);
            } else {
                store.push(state);
            }
        }
        let mut result = Ok(());
        while self.copy_index.borrow_mut().next() {
            result = f();
            if result.is_err() {
                break;
            }
        }
        self.copy_index.borrow_mut().pop();
        result
    }

    /// Runs `f` with a previously captured loop state restored.
    pub fn with_copy_state<T, E, F>(&self, state: Option<CopyIndexState>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let Some(state) = state else {
            return f();
        };
        self.copy_index.borrow_mut().push_resource_type(state);
        let result = f();
        self.copy_index.borrow_mut().pop();
        result
    }

    /// Returns the loop `name`, or the innermost resource loop.
    pub fn copy_state(&self, name: Option<&str>) -> Option<CopyIndexState> {
        self.copy_index.borrow().get(name).cloned()
    }

    /// Returns the innermost loop of any kind.
    pub fn current_copy(&self) -> Option<CopyIndexState> {
        self.copy_index.borrow().current().cloned()
    }

    pub fn copy_depth(&self) -> usize {
        self.copy_index.borrow().depth()
    }

    // Resources

    pub fn add_resource(&self, resource: Rc<ResourceValue>) {
        self.resources.borrow_mut().push(resource);
    }

    pub fn resources(&self) -> Vec<Rc<ResourceValue>> {
        self.resources.borrow().clone()
    }

    /// Finds a resource by id, then name, then symbolic name.
    pub fn find_resource(&self, key: &str) -> Option<Rc<ResourceValue>> {
        let resources = self.resources.borrow();
        resources
            .iter()
            .find(|r| r.id.eq_ignore_ascii_case(key))
            .or_else(|| resources.iter().find(|r| r.name.eq_ignore_ascii_case(key)))
            .or_else(|| {
                resources.iter().find(|r| {
                    r.symbolic_name
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case(key))
                })
            })
            .cloned()
    }

    /// Returns every resource created by the copy loop or symbolic collection `name`.
    pub fn copy_members(&self, name: &str) -> Vec<Rc<ResourceValue>> {
        self.resources
            .borrow()
            .iter()
            .filter(|r| {
                r.copy_name
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(name))
            })
            .cloned()
            .collect()
    }

    // Deployments

    pub fn enter_deployment(&self, deployment: Rc<DeploymentValue>) {
        tracing::debug!(name = %deployment.name, id = %deployment.id, "entering deployment");
        self.deployments.borrow_mut().push(deployment);
    }

    pub fn exit_deployment(&self) -> Option<Rc<DeploymentValue>> {
        self.deployments.borrow_mut().pop()
    }

    pub fn deployment(&self) -> Option<Rc<DeploymentValue>> {
        self.deployments.borrow().last().cloned()
    }

    // Secret tracking

    pub fn mark_secret(&self) {
        self.secret_touched.set(true);
    }

    /// Returns whether a secret was read since the last call, and resets.
    pub fn take_secret_touched(&self) -> bool {
        self.secret_touched.replace(false)
    }
}

/// Resolves a lazily evaluated entry, detecting re-entrant evaluation.
fn resolve_slot<T, F>(slots: &Slots<T>, name: &str, evaluate: F) -> Result<Option<Value>>
where
    T: Clone,
    F: FnOnce(T) -> Result<Value>,
{
    let pending = {
        let mut slots = slots.borrow_mut();
        let Some((_, slot)) = slots
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        else {
            return Ok(None);
        };
        match slot {
            Slot::Resolved(value) => return Ok(Some(value.clone())),
            Slot::Evaluating => {
                return Err(ExpressionError::symbol(name, "circular reference detected"));
            }
            Slot::Pending(pending) => {
                let pending = pending.clone();
                *slot = Slot::Evaluating;
                pending
            }
        }
    };

    let result = evaluate(pending.clone());
    let mut slots = slots.borrow_mut();
    if let Some((_, slot)) = slots
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
    {
        *slot = match &result {
            Ok(value) => Slot::Resolved(value.clone()),
            Err(_) => Slot::Pending(pending),
        };
    }
    result.map(Some)
}

/// The scope inside a lambda body, binding the lambda's parameters.
pub struct LambdaContext<'a> {
    inner: &'a dyn Context,
    variables: Vec<(String, Value)>,
}

impl<'a> LambdaContext<'a> {
    pub fn new(inner: &'a dyn Context, variables: Vec<(String, Value)>) -> Self {
        Self { inner, variables }
    }
}

impl Context for LambdaContext<'_> {
    fn root(&self) -> &TemplateContext {
        self.inner.root()
    }

    fn parameter(&self, name: &str) -> Result<Value> {
        self.inner.parameter(name)
    }

    fn variable(&self, name: &str) -> Result<Value> {
        self.inner.variable(name)
    }

    fn lambda_variable(&self, name: &str) -> Option<Value> {
        self.variables
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .or_else(|| self.inner.lambda_variable(name))
    }

    fn in_lambda(&self) -> bool {
        true
    }

    fn should_throw_missing_property(&self) -> bool {
        false
    }
}

/// The scope inside a user-defined function body. Only the function's own
/// parameters are visible.
pub struct FunctionContext<'a> {
    inner: &'a dyn Context,
    function: String,
    parameters: Vec<(String, Value)>,
}

impl<'a> FunctionContext<'a> {
    pub fn new(inner: &'a dyn Context, function: &str, parameters: Vec<(String, Value)>) -> Self {
        Self {
            inner,
            function: function.to_string(),
            parameters,
        }
    }
}

impl Context for FunctionContext<'_> {
    fn root(&self) -> &TemplateContext {
        self.inner.root()
    }

    fn parameter(&self, name: &str) -> Result<Value> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                ExpressionError::symbol(
                    name,
                    format!("'{}' has no parameter with this name", self.function),
                )
            })
    }

    fn variable(&self, name: &str) -> Result<Value> {
        Err(ExpressionError::symbol(
            name,
            format!("variables can not be used in the function '{}'", self.function),
        ))
    }
}

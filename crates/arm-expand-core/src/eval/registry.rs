use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::Result;
use crate::eval::builtins;
use crate::eval::context::Context;
use crate::eval::value::{ExprFn, Value};

/// A function that receives its arguments already evaluated.
pub type EagerFn = fn(&dyn Context, &[Value]) -> Result<Value>;

/// A function that decides itself which arguments to evaluate.
pub type DelayBindingFn = fn(&dyn Context, &[ExprFn]) -> Result<Value>;

#[derive(Clone, Copy)]
pub enum Invoke {
    Eager(EagerFn),
    DelayBinding(DelayBindingFn),
}

/// An immutable, named entry in the function registry.
#[derive(Clone, Copy)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub invoke: Invoke,
}

impl FunctionDescriptor {
    pub const fn eager(name: &'static str, f: EagerFn) -> Self {
        Self {
            name,
            invoke: Invoke::Eager(f),
        }
    }

    pub const fn delay_binding(name: &'static str, f: DelayBindingFn) -> Self {
        Self {
            name,
            invoke: Invoke::DelayBinding(f),
        }
    }

    pub fn is_delay_binding(&self) -> bool {
        matches!(self.invoke, Invoke::DelayBinding(_))
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("delay_binding", &self.is_delay_binding())
            .finish()
    }
}

/// Case-insensitive table of template functions.
#[derive(Debug, Default)]
pub struct Registry {
    functions: HashMap<String, FunctionDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of built-in template functions.
    pub fn standard() -> &'static Registry {
        static STANDARD: OnceLock<Registry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let mut registry = Registry::new();
            for descriptor in builtins::all() {
                registry.register(*descriptor);
            }
            registry
        })
    }

    pub fn register(&mut self, descriptor: FunctionDescriptor) {
        self.functions
            .insert(descriptor.name.to_ascii_lowercase(), descriptor);
    }

    /// Looks up a function by name. Every name beginning with `list`
    /// (`listKeys`, `listSecrets`, ...) resolves to the generic `list`.
    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        let key = name.to_ascii_lowercase();
        if key.starts_with("list") {
            return self.functions.get("list");
        }
        self.functions.get(&key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.values().map(|d| d.name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::standard();
        assert_eq!(registry.get("CONCAT").map(|d| d.name), Some("concat"));
        assert_eq!(registry.get("resourceid").map(|d| d.name), Some("resourceId"));
        assert!(registry.get("notAFunction").is_none());
    }

    #[test]
    fn test_list_prefix_collapses() {
        let registry = Registry::standard();
        assert_eq!(registry.get("listKeys").map(|d| d.name), Some("list"));
        assert_eq!(registry.get("ListAccountSas").map(|d| d.name), Some("list"));
    }

    #[test]
    fn test_delay_binding_functions() {
        let registry = Registry::standard();
        for name in ["and", "or", "if", "coalesce", "lambda"] {
            assert!(
                registry.get(name).is_some_and(FunctionDescriptor::is_delay_binding),
                "{name} should be delay-binding"
            );
        }
        assert!(!registry.get("concat").is_some_and(FunctionDescriptor::is_delay_binding));
    }

    #[test]
    fn test_standard_registry_size() {
        assert!(Registry::standard().len() >= 100);
    }
}

use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// The state of one `copy` loop.
///
/// A state starts before its first iteration; [`next`](Self::next) must be
/// called before each iteration, including the first.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyIndexState {
    pub name: Option<String>,
    pub index: i64,
    pub count: i64,
    pub input: Option<JsonValue>,
}

impl Default for CopyIndexState {
    fn default() -> Self {
        Self {
            name: None,
            index: -1,
            count: 1,
            input: None,
        }
    }
}

impl CopyIndexState {
    /// Creates a named loop of `count` iterations.
    pub fn named(name: impl Into<String>, count: i64) -> Self {
        Self {
            name: Some(name.into()),
            count,
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: JsonValue) -> Self {
        self.input = Some(input);
        self
    }

    /// Returns true for a named loop rather than the implicit single iteration.
    pub fn is_copy(&self) -> bool {
        self.name.is_some()
    }

    /// Advances to the next iteration. Returns false once the loop is done.
    pub fn next(&mut self) -> bool {
        self.index += 1;
        self.index < self.count
    }
}

/// The stack of active copy loops.
///
/// Besides the stack itself, the store tracks which entries belong to
/// resource-level loops, so `copyIndex()` without a name inside a property
/// loop of a resource loop resolves to the resource's loop.
#[derive(Debug, Default)]
pub struct CopyIndexStore {
    current: Vec<CopyIndexState>,
    resource_type: Vec<usize>,
    by_name: HashMap<String, usize>,
}

impl CopyIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.current.len()
    }

    /// The innermost active loop.
    pub fn current(&self) -> Option<&CopyIndexState> {
        self.current.last()
    }

    pub fn push(&mut self, state: CopyIndexState) {
        if let Some(name) = &state.name {
            self.by_name
                .insert(name.to_ascii_lowercase(), self.current.len());
        }
        self.current.push(state);
    }

    /// Pushes a resource-level loop.
    pub fn push_resource_type(&mut self, state: CopyIndexState) {
        self.resource_type.push(self.current.len());
        self.push(state);
    }

    pub fn pop(&mut self) -> Option<CopyIndexState> {
        let state = self.current.pop()?;
        let position = self.current.len();
        if self.resource_type.last() == Some(&position) {
            self.resource_type.pop();
        }
        if let Some(name) = &state.name {
            let key = name.to_ascii_lowercase();
            if self.by_name.get(&key) == Some(&position) {
                self.by_name.remove(&key);
            }
        }
        Some(state)
    }

    /// Advances the innermost loop.
    pub fn next(&mut self) -> bool {
        self.current.last_mut().is_some_and(CopyIndexState::next)
    }

    /// Resolves a loop by name, or the innermost resource loop when `name`
    /// is `None` (falling back to the innermost loop of any kind).
    pub fn get(&self, name: Option<&str>) -> Option<&CopyIndexState> {
        match name {
            Some(name) => self
                .by_name
                .get(&name.to_ascii_lowercase())
                .and_then(|&i| self.current.get(i)),
            None => match self.resource_type.last() {
                Some(&i) => self.current.get(i),
                None => self.current.last(),
            },
        }
    }
}

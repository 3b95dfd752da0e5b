use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::eval::value::{json_get, Value};

/// Placeholder emitted wherever a secret value would appear.
pub const SECRET_PLACEHOLDER: &str = "{{Secret}}";

const RESOURCE_ROOT: &str = "Resource";
const LIST_ROOT: &str = "SecretList";

/// The shape of a mock value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockKind {
    /// An object whose members are unknown.
    Object,
    /// An array whose items are unknown.
    Array,
    /// A member whose shape has not been observed yet.
    Member,
    /// A secret scalar.
    Secret,
    /// The root of a resource returned by `reference()`.
    Resource { resource_type: String },
}

/// A value that cannot be known until deployment.
///
/// Mocks are plain values; their identity is the pair of resource id and
/// navigation path, and shapes observed through coercion are remembered in a
/// [`MockStore`] keyed by that identity. When a mock is backed by known JSON
/// (an in-template resource), navigation prefers the known data and only
/// falls back to unknown members when a key is absent.
#[derive(Debug, Clone)]
pub struct Mock {
    pub kind: MockKind,
    pub secret: bool,
    pub resource_id: Option<String>,
    pub path: Vec<String>,
    pub backing: Option<Rc<JsonValue>>,
}

/// Side table of mock shapes observed during one expansion.
#[derive(Debug, Default)]
pub struct MockStore {
    shapes: RefCell<HashMap<String, MockKind>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(&self, key: &str) -> Option<MockKind> {
        self.shapes.borrow().get(key).cloned()
    }

    /// Records the shape of a mock. The first observed container shape wins.
    pub fn record(&self, key: String, kind: MockKind) {
        self.shapes.borrow_mut().entry(key).or_insert(kind);
    }

    pub fn len(&self) -> usize {
        self.shapes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.borrow().is_empty()
    }
}

impl Mock {
    /// A resource returned by `reference()` for a resource outside the template.
    pub fn resource(resource_type: impl Into<String>, resource_id: Option<String>) -> Self {
        Self {
            kind: MockKind::Resource {
                resource_type: resource_type.into(),
            },
            secret: false,
            resource_id,
            path: vec![RESOURCE_ROOT.to_string()],
            backing: None,
        }
    }

    /// A resource whose known state is `value`.
    pub fn backed(resource_id: Option<String>, value: JsonValue) -> Self {
        Self {
            kind: MockKind::Object,
            secret: false,
            resource_id,
            path: vec![RESOURCE_ROOT.to_string()],
            backing: Some(Rc::new(value)),
        }
    }

    /// The secret object returned by `list*` functions.
    pub fn secret_list(resource_id: Option<String>) -> Self {
        Self {
            kind: MockKind::Object,
            secret: true,
            resource_id,
            path: vec![LIST_ROOT.to_string()],
            backing: None,
        }
    }

    /// The identity used for memoization and equality.
    pub fn key(&self) -> String {
        format!(
            "{}|{}",
            self.resource_id.as_deref().unwrap_or_default(),
            self.path.join(".")
        )
    }

    /// Returns true if the mock is known to be an array or object.
    pub fn is_container(&self) -> bool {
        match &self.backing {
            Some(json) => json.is_object() || json.is_array(),
            None => matches!(
                self.kind,
                MockKind::Object | MockKind::Array | MockKind::Resource { .. }
            ),
        }
    }

    pub fn is_array(&self) -> bool {
        match &self.backing {
            Some(json) => json.is_array(),
            None => self.kind == MockKind::Array,
        }
    }

    /// Renders the mock as a string placeholder such as
    /// `{{Resource.properties.endpoint}}`.
    pub fn render(&self) -> String {
        if self.secret {
            return SECRET_PLACEHOLDER.to_string();
        }
        format!("{{{{{}}}}}", self.path.join("."))
    }

    /// Renders the mock for emission into a resolved resource.
    pub fn to_json(&self) -> JsonValue {
        if self.secret && !self.is_container() {
            return JsonValue::String(SECRET_PLACEHOLDER.to_string());
        }
        if let Some(json) = &self.backing {
            return json.as_ref().clone();
        }
        match self.kind {
            MockKind::Array => JsonValue::Array(Vec::new()),
            MockKind::Object | MockKind::Resource { .. } => JsonValue::Object(Default::default()),
            MockKind::Member | MockKind::Secret => JsonValue::String(self.render()),
        }
    }

    /// Navigates to the member `name`.
    pub fn member(&self, store: &MockStore, name: &str) -> Value {
        store.record(self.key(), self.shape_as(MockKind::Object));

        if let Some(json) = self.backing.as_deref().and_then(|b| json_get(b, name)) {
            return self.known_child(name, json);
        }

        if self.is_root() {
            if let Some(id) = self.resource_id.as_deref() {
                if let Some(known) = well_known_property(id, name) {
                    return Value::String(known);
                }
            }
        }

        let kind = if self.secret || is_secret_name(name) {
            MockKind::Secret
        } else {
            store.shape(&self.child_key(name)).unwrap_or(MockKind::Member)
        };
        Value::Mock(self.unknown_child(name, kind))
    }

    /// Navigates to the item at `index`.
    pub fn index(&self, store: &MockStore, index: &Value) -> Value {
        if let Some(name) = index.as_str() {
            return self.member(store, name);
        }
        store.record(self.key(), self.shape_as(MockKind::Array));

        let segment = index.to_display_string();
        if let (Some(json), Some(i)) = (self.backing.as_deref(), index.as_i64()) {
            if let Some(item) = usize::try_from(i).ok().and_then(|i| json.get(i)) {
                return self.known_child(&segment, item);
            }
        }
        let kind = if self.secret {
            MockKind::Secret
        } else {
            store.shape(&self.child_key(&segment)).unwrap_or(MockKind::Member)
        };
        Value::Mock(self.unknown_child(&segment, kind))
    }

    /// Coerces the mock to an array, remembering the shape. Returns any
    /// items that are known.
    pub fn coerce_array(&self, store: &MockStore) -> Vec<Value> {
        store.record(self.key(), MockKind::Array);
        match self.backing.as_deref() {
            Some(JsonValue::Array(items)) => items.iter().map(Value::from_json).collect(),
            _ => Vec::new(),
        }
    }

    /// Coerces the mock to an object, remembering the shape.
    pub fn coerce_object(&self, store: &MockStore) -> Mock {
        store.record(self.key(), MockKind::Object);
        let mut mock = self.clone();
        if mock.kind == MockKind::Member {
            mock.kind = MockKind::Object;
        }
        mock
    }

    /// Returns this mock with the shape recorded in `store`, if any.
    pub fn with_observed_shape(mut self, store: &MockStore) -> Mock {
        if self.kind == MockKind::Member {
            if let Some(kind) = store.shape(&self.key()) {
                self.kind = kind;
            }
        }
        self
    }

    fn is_root(&self) -> bool {
        self.path.len() == 1
    }

    fn shape_as(&self, kind: MockKind) -> MockKind {
        match &self.kind {
            MockKind::Member => kind,
            other => other.clone(),
        }
    }

    fn child_key(&self, segment: &str) -> String {
        format!("{}.{}", self.key(), segment)
    }

    fn unknown_child(&self, segment: &str, kind: MockKind) -> Mock {
        let mut path = self.path.clone();
        path.push(segment.to_string());
        Mock {
            secret: self.secret || kind == MockKind::Secret,
            kind,
            resource_id: self.resource_id.clone(),
            path,
            backing: None,
        }
    }

    fn known_child(&self, segment: &str, json: &JsonValue) -> Value {
        if self.secret {
            return Value::Mock(self.unknown_child(segment, MockKind::Secret));
        }
        match json {
            JsonValue::Object(_) => {
                let mut child = self.unknown_child(segment, MockKind::Object);
                child.backing = Some(Rc::new(json.clone()));
                Value::Mock(child)
            }
            other => Value::from_json(other),
        }
    }
}

/// Returns true for property names that conventionally hold secrets.
pub fn is_secret_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(lower.as_str(), "primarykey" | "secondarykey")
        || lower.ends_with("connectionstring")
        || lower.contains("password")
}

/// Derives `id`, `name` and `type` from a resource id.
fn well_known_property(id: &str, name: &str) -> Option<String> {
    match name.to_ascii_lowercase().as_str() {
        "id" => Some(id.to_string()),
        "name" => resource_name_from_id(id),
        "type" => resource_type_from_id(id),
        _ => None,
    }
}

/// Returns the resource name of an id, joining nested names with `/`.
pub fn resource_name_from_id(id: &str) -> Option<String> {
    let (_, tail) = split_provider(id)?;
    let names: Vec<&str> = tail.iter().skip(2).step_by(2).copied().collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("/"))
    }
}

/// Returns the resource type of an id, e.g. `Microsoft.Network/virtualNetworks/subnets`.
pub fn resource_type_from_id(id: &str) -> Option<String> {
    let (_, tail) = split_provider(id)?;
    let namespace = tail.first()?;
    let types: Vec<&str> = tail.iter().skip(1).step_by(2).copied().collect();
    if types.is_empty() {
        return None;
    }
    Some(format!("{}/{}", namespace, types.join("/")))
}

/// Splits an id at its last `/providers/` segment.
fn split_provider(id: &str) -> Option<(Vec<&str>, Vec<&str>)> {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let at = segments
        .iter()
        .rposition(|s| s.eq_ignore_ascii_case("providers"))?;
    Some((segments[..at].to_vec(), segments[at + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ID: &str = "/subscriptions/000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa1";

    #[test]
    fn test_render_paths() {
        let store = MockStore::new();
        let mock = Mock::resource("Microsoft.Web/sites", None);
        let Value::Mock(member) = mock.member(&store, "properties") else {
            panic!("expected mock");
        };
        let Value::Mock(leaf) = member.member(&store, "defaultHostName") else {
            panic!("expected mock");
        };
        assert_eq!(leaf.render(), "{{Resource.properties.defaultHostName}}");
    }

    #[test]
    fn test_secret_names_propagate() {
        let store = MockStore::new();
        let mock = Mock::resource("Microsoft.Storage/storageAccounts", None);
        let key = mock.member(&store, "primaryKey");
        assert!(key.is_secret());
        assert_eq!(key.to_display_string(), SECRET_PLACEHOLDER);

        let list = Mock::secret_list(None);
        let Value::Mock(keys) = list.member(&store, "keys") else {
            panic!("expected mock");
        };
        assert!(keys.secret);
        assert!(keys.index(&store, &Value::Int(0)).is_secret());
    }

    #[test]
    fn test_well_known_properties() {
        let store = MockStore::new();
        let mock = Mock::resource("Microsoft.Storage/storageAccounts", Some(ID.to_string()));
        assert_eq!(mock.member(&store, "id"), Value::string(ID));
        assert_eq!(mock.member(&store, "name"), Value::string("sa1"));
        assert_eq!(
            mock.member(&store, "type"),
            Value::string("Microsoft.Storage/storageAccounts")
        );
        assert!(mock.member(&store, "location").is_mock());
    }

    #[test]
    fn test_navigation_is_stable() {
        let store = MockStore::new();
        let mock = Mock::resource("t", None);
        let a = mock.member(&store, "properties");
        let b = mock.member(&store, "properties");
        assert_eq!(a, b);
    }

    #[test]
    fn test_coercion_is_remembered() {
        let store = MockStore::new();
        let mock = Mock::resource("t", None);
        let Value::Mock(member) = mock.member(&store, "items") else {
            panic!("expected mock");
        };
        assert!(!member.is_array());
        member.coerce_array(&store);

        let Value::Mock(again) = mock.member(&store, "items") else {
            panic!("expected mock");
        };
        assert!(again.is_array());
        assert_eq!(again.to_json(), json!([]));
    }

    #[test]
    fn test_backed_navigation() {
        let store = MockStore::new();
        let mock = Mock::backed(
            Some(ID.to_string()),
            json!({"sku": {"name": "Standard_LRS"}, "tags": ["a"]}),
        );
        let Value::Mock(sku) = mock.member(&store, "SKU") else {
            panic!("expected mock");
        };
        assert_eq!(sku.member(&store, "name"), Value::string("Standard_LRS"));
        assert_eq!(
            mock.member(&store, "tags"),
            Value::Array(vec![Value::string("a")])
        );
        assert!(mock.member(&store, "primaryEndpoints").is_mock());
    }

    #[test]
    fn test_resource_id_parts() {
        let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";
        assert_eq!(resource_name_from_id(id).as_deref(), Some("vnet/default"));
        assert_eq!(
            resource_type_from_id(id).as_deref(),
            Some("Microsoft.Network/virtualNetworks/subnets")
        );
        assert_eq!(resource_type_from_id("/subscriptions/s"), None);
    }
}

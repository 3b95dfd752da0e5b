//! Template checks reported as warnings.
//!
//! None of these stop an expansion. They flag parameters and outputs that
//! leak secrets or that do not match their `metadata.strongType`.

use serde_json::Value as JsonValue;

use crate::diag::Diagnostics;
use crate::expr;
use crate::eval::mock::resource_type_from_id;
use crate::eval::parameters::ParameterSource;
use crate::eval::providers;
use crate::eval::value::json_get;

const STRONG_TYPE_LOCATION: &str = "location";

/// Returns true for the placeholders that stand in for secret values.
pub fn is_secret_placeholder(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("{{secretreference")
        || lower.starts_with("{{secretlist")
        || lower == "{{secret}}"
}

/// Checks a resolved parameter against its definition.
pub fn parameter(
    diags: &mut Diagnostics,
    path: &str,
    name: &str,
    definition: &JsonValue,
    value: &JsonValue,
) {
    let secure = ParameterSource::new(definition.clone(), None).is_secure();
    if secure {
        if let Some(default) = json_get(definition, "defaultValue").and_then(JsonValue::as_str) {
            if !default.is_empty() && !expr::is_expression(default) && !is_secret_placeholder(default) {
                diags.warning(
                    Some(format!("{}.defaultValue", path)),
                    format!("the secure parameter '{}' has a default value that is not secret", name),
                    "a literal default of a secure parameter is stored in the template",
                );
            }
        }
    } else if value.as_str().is_some_and(is_secret_placeholder) {
        diags.warning(
            Some(path.to_string()),
            format!("the parameter '{}' is assigned a secret but is not secure", name),
            "declare the parameter as secureString or secureObject",
        );
    }

    let strong_type = json_get(definition, "metadata")
        .and_then(|m| json_get(m, "strongType"))
        .and_then(JsonValue::as_str);
    if let Some(strong_type) = strong_type {
        strong_type_value(diags, path, name, strong_type, value);
    }
}

fn strong_type_value(
    diags: &mut Diagnostics,
    path: &str,
    name: &str,
    strong_type: &str,
    value: &JsonValue,
) {
    let is_location = strong_type.eq_ignore_ascii_case(STRONG_TYPE_LOCATION);
    if !is_location && !strong_type.contains('/') {
        return;
    }
    let Some(text) = value.as_str() else {
        diags.warning(
            Some(path.to_string()),
            format!("the parameter '{}' is not a string", name),
            format!("the value {} can not be checked against the strong type '{}'", value, strong_type),
        );
        return;
    };
    if is_location {
        if !providers::is_known_location(text) {
            diags.warning(
                Some(path.to_string()),
                format!("the parameter '{}' is not a valid location", name),
                format!("'{}' is not a known location", text),
            );
        }
        return;
    }
    let matches = resource_type_from_id(text).is_some_and(|t| t.eq_ignore_ascii_case(strong_type));
    if !matches {
        diags.warning(
            Some(path.to_string()),
            format!("the parameter '{}' is not a resource id of type '{}'", name, strong_type),
            format!("'{}' does not identify a {} resource", text, strong_type),
        );
    }
}

/// Checks a resolved output. `secret` is true when the value was derived
/// from a secure parameter or a secret.
pub fn output(diags: &mut Diagnostics, path: &str, name: &str, value: &JsonValue, secret: bool) {
    let inner = json_get(value, "value").unwrap_or(value);
    if secret || inner.as_str().is_some_and(is_secret_placeholder) {
        diags.warning(
            Some(path.to_string()),
            format!("the output '{}' is assigned a secure value", name),
            "outputs are stored in the deployment history",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn summaries(diags: &Diagnostics) -> Vec<(String, String)> {
        diags
            .iter()
            .map(|d| (d.path.clone().unwrap_or_default(), d.summary.clone()))
            .collect()
    }

    #[test]
    fn test_secret_placeholders() {
        assert!(is_secret_placeholder("{{SecretReference:admin}}"));
        assert!(is_secret_placeholder("{{secretlist}}"));
        assert!(is_secret_placeholder("{{Secret}}"));
        assert!(!is_secret_placeholder("{{Resource.properties}}"));
        assert!(!is_secret_placeholder("secret"));
    }

    #[test]
    fn test_secure_parameter_with_literal_default() {
        let mut diags = Diagnostics::new();
        let definition = json!({"type": "secureString", "defaultValue": "P@ssw0rd"});
        parameter(&mut diags, "parameters.password", "password", &definition, &json!("P@ssw0rd"));
        assert_eq!(
            summaries(&diags),
            vec![(
                "parameters.password.defaultValue".to_string(),
                "the secure parameter 'password' has a default value that is not secret".to_string()
            )]
        );

        let mut diags = Diagnostics::new();
        for default in [json!(""), json!("[newGuid()]"), json!("{{SecretReference:pwd}}")] {
            let definition = json!({"type": "secureString", "defaultValue": default});
            parameter(&mut diags, "parameters.password", "password", &definition, &json!("x"));
        }
        assert!(diags.is_empty());
    }

    #[test]
    fn test_secret_assigned_to_plain_parameter() {
        let mut diags = Diagnostics::new();
        let plain = json!({"type": "string"});
        let value = json!("{{SecretReference:adminPassword}}");
        parameter(&mut diags, "parameters.adminPassword", "adminPassword", &plain, &value);
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().all(|d| !d.is_error()));

        let mut diags = Diagnostics::new();
        let secure = json!({"type": "secureString"});
        parameter(&mut diags, "parameters.adminPassword", "adminPassword", &secure, &value);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_strong_type_location() {
        let definition = json!({"type": "string", "metadata": {"strongType": "location"}});
        let mut diags = Diagnostics::new();
        parameter(&mut diags, "parameters.location", "location", &definition, &json!("West Europe"));
        parameter(&mut diags, "parameters.location", "location", &definition, &json!("global"));
        assert!(diags.is_empty());

        parameter(&mut diags, "parameters.location", "location", &definition, &json!("westeurop"));
        parameter(&mut diags, "parameters.location", "location", &definition, &json!(5));
        assert_eq!(
            diags.iter().map(|d| d.summary.as_str()).collect::<Vec<_>>(),
            vec![
                "the parameter 'location' is not a valid location",
                "the parameter 'location' is not a string"
            ]
        );
    }

    #[test]
    fn test_strong_type_resource_id() {
        let definition = json!({
            "type": "string",
            "metadata": {"strongType": "Microsoft.OperationalInsights/workspaces"}
        });
        let workspace = "/subscriptions/000/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/logs";
        let account = "/subscriptions/000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa";
        let mut diags = Diagnostics::new();
        parameter(&mut diags, "parameters.workspaceId", "workspaceId", &definition, &json!(workspace));
        assert!(diags.is_empty());

        parameter(&mut diags, "parameters.workspaceId", "workspaceId", &definition, &json!(account));
        parameter(&mut diags, "parameters.workspaceId", "workspaceId", &definition, &json!("logs"));
        assert_eq!(diags.len(), 2);
        assert!(diags.under("parameters.workspaceId").count() == 2);
    }

    #[test]
    fn test_output_secret() {
        let mut diags = Diagnostics::new();
        output(&mut diags, "outputs.plain", "plain", &json!({"type": "string", "value": "x"}), false);
        assert!(diags.is_empty());

        output(&mut diags, "outputs.key", "key", &json!({"type": "string", "value": "x"}), true);
        output(
            &mut diags,
            "outputs.list",
            "list",
            &json!({"type": "string", "value": "{{SecretList}}"}),
            false,
        );
        assert_eq!(
            summaries(&diags),
            vec![
                ("outputs.key".to_string(), "the output 'key' is assigned a secure value".to_string()),
                ("outputs.list".to_string(), "the output 'list' is assigned a secure value".to_string()),
            ]
        );
    }
}

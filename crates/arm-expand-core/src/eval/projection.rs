//! Properties the platform assigns during a deployment that can be computed
//! offline.
//!
//! Runtime properties (endpoints, identities, provisioning state) are added
//! when a resource is resolved, so `reference()` sees them. Effective
//! properties fold configuration child resources into their parent once the
//! emitted resources are nested and merged.

use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::eval::builtins::string::{deterministic_guid, unique_string};
use crate::eval::mock::resource_name_from_id;
use crate::eval::visitor::merge_json;

const PLACEHOLDER_GUID: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";
const SECRET_VERSION: &str = "ffffffffffffffffffffffffffffffff";
const SUCCEEDED: &str = "Succeeded";
const SITE_CONFIG_API_VERSION: &str = "2022-09-01";

const NETWORK_INTERFACE_TYPE: &str = "Microsoft.Network/networkInterfaces";
const WEB_CONFIG_TYPE: &str = "Microsoft.Web/sites/config";
const WEB_SLOT_CONFIG_TYPE: &str = "Microsoft.Web/sites/slots/config";
const SQL_ADMINISTRATOR_TYPE: &str = "Microsoft.Sql/servers/administrators";

const OPENAI_APIS: &[&str] = &[
    "OpenAI Language Model Instance API",
    "OpenAI Dall-E API",
    "OpenAI Sora API",
    "OpenAI Moderations API",
    "OpenAI Whisper API",
    "OpenAI Model Scaleset API",
    "OpenAI Realtime API",
    "Token Service API",
];

/// Adds the runtime properties of `resource_type` to a resolved resource.
/// Values already present are kept.
pub fn runtime(resource: &mut JsonValue, resource_type: &str, id: &str, tenant_id: &str) {
    let Some(resource) = resource.as_object_mut() else {
        return;
    };
    let name = string_member(resource, "name").unwrap_or_default();
    let project_identity = match resource_type.to_ascii_lowercase().as_str() {
        "microsoft.managedidentity/userassignedidentities" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "clientId", PLACEHOLDER_GUID);
                add_missing(properties, "principalId", PLACEHOLDER_GUID);
                add_missing(properties, "tenantId", tenant_id);
            });
            false
        }
        "microsoft.network/virtualnetworks" => {
            if let Some(JsonValue::Array(subnets)) = get_mut_ignore_case(resource, "properties")
                .and_then(|p| p.as_object_mut())
                .and_then(|p| get_mut_ignore_case(p, "subnets"))
            {
                for subnet in subnets.iter_mut().filter_map(JsonValue::as_object_mut) {
                    if let Some(subnet_name) = string_member(subnet, "name") {
                        let subnet_id = format!("{}/subnets/{}", id, subnet_name);
                        subnet.insert("id".to_string(), JsonValue::String(subnet_id));
                    }
                }
            }
            false
        }
        "microsoft.containerregistry/registries" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "loginServer", format!("{}.azurecr.io", name));
            });
            true
        }
        "microsoft.network/privateendpoints" => {
            if let Some(group) = resource_group_id(id) {
                with_object(resource, "properties", |properties| {
                    if has_key(properties, "networkInterfaces") {
                        return;
                    }
                    let nic = string_member(properties, "customNetworkInterfaceName")
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| format!("pe.nic.{}", unique_string(&[id])));
                    let nic_id = format!("{}/providers/{}/{}", group, NETWORK_INTERFACE_TYPE, nic);
                    properties.insert("networkInterfaces".to_string(), json!([{ "id": nic_id }]));
                });
            }
            false
        }
        "microsoft.subscription/aliases" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "subscriptionId", deterministic_guid(&[id]));
                add_missing(properties, "acceptOwnershipState", "Completed");
                add_missing(properties, "acceptOwnershipUrl", "");
            });
            false
        }
        "microsoft.storage/storageaccounts/objectreplicationpolicies" => {
            if let Some(JsonValue::Array(rules)) = get_mut_ignore_case(resource, "properties")
                .and_then(|p| p.as_object_mut())
                .and_then(|p| get_mut_ignore_case(p, "rules"))
            {
                for (i, rule) in rules.iter_mut().enumerate() {
                    if let Some(rule) = rule.as_object_mut() {
                        add_missing(rule, "ruleId", deterministic_guid(&[id, &i.to_string()]));
                    }
                }
            }
            false
        }
        "microsoft.keyvault/vaults" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "accessPolicies", json!([]));
                add_missing(properties, "tenantId", tenant_id);
                add_missing(
                    properties,
                    "vaultUri",
                    format!("https://{}.vault.azure.net/", name.to_ascii_lowercase()),
                );
            });
            false
        }
        "microsoft.keyvault/vaults/secrets" => {
            let names = resource_name_from_id(id).unwrap_or_default().to_ascii_lowercase();
            if let Some((vault, secret)) = names.split_once('/').filter(|(_, s)| !s.contains('/')) {
                let uri = format!("https://{}.vault.azure.net/secrets/{}", vault, secret);
                with_object(resource, "properties", |properties| {
                    add_missing(properties, "secretUri", uri.clone());
                    add_missing(properties, "secretUriWithVersion", format!("{}/{}", uri, SECRET_VERSION));
                });
            }
            false
        }
        "microsoft.authorization/roleassignments" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "principalType", "User");
            });
            false
        }
        "microsoft.management/managementgroups" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "tenantId", tenant_id);
            });
            false
        }
        "microsoft.servicebus/namespaces" | "microsoft.relay/namespaces" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "provisioningState", SUCCEEDED);
                add_missing(
                    properties,
                    "serviceBusEndpoint",
                    format!("https://{}.servicebus.windows.net:443/", name),
                );
            });
            false
        }
        "microsoft.storage/storageaccounts" => {
            let location = string_member(resource, "location").map(|l| l.to_ascii_lowercase());
            with_object(resource, "properties", |properties| {
                add_missing(properties, "provisioningState", SUCCEEDED);
                if let Some(location) = location {
                    add_missing(properties, "primaryLocation", location);
                }
                with_object(properties, "primaryEndpoints", |endpoints| {
                    for service in ["web", "dfs", "blob", "file", "queue", "table"] {
                        add_missing(
                            endpoints,
                            service,
                            format!("https://{}.{}.core.windows.net/", name, service),
                        );
                    }
                });
            });
            false
        }
        "microsoft.cognitiveservices/accounts" => {
            let kind = string_member(resource, "kind").unwrap_or_default();
            let (endpoint, apis): (String, &[&str]) = if kind.eq_ignore_ascii_case("OpenAI") {
                (format!("https://{}.openai.azure.com/", name), OPENAI_APIS)
            } else if kind.eq_ignore_ascii_case("Face") {
                (format!("https://{}.cognitiveservices.azure.com/", name), &["Face"])
            } else {
                (format!("https://{}.cognitiveservices.azure.com/", name), &[])
            };
            with_object(resource, "properties", |properties| {
                add_missing(properties, "provisioningState", SUCCEEDED);
                add_missing(properties, "customSubDomainName", name.as_str());
                add_missing(properties, "endpoint", endpoint.as_str());
                with_object(properties, "endpoints", |endpoints| {
                    for api in apis {
                        add_missing(endpoints, api, endpoint.as_str());
                    }
                });
            });
            true
        }
        "microsoft.documentdb/databaseaccounts" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "provisioningState", SUCCEEDED);
                add_missing(
                    properties,
                    "documentEndpoint",
                    format!("https://{}.documents.azure.com:443/", name),
                );
            });
            true
        }
        "microsoft.operationalinsights/workspaces" => {
            with_object(resource, "properties", |properties| {
                add_missing(properties, "provisioningState", SUCCEEDED);
                add_missing(properties, "customerId", PLACEHOLDER_GUID);
            });
            true
        }
        _ => true,
    };
    if project_identity {
        system_identity(resource, tenant_id);
    }
}

/// Fills in the principal of a system assigned managed identity.
fn system_identity(resource: &mut JsonMap<String, JsonValue>, tenant_id: &str) {
    let Some(JsonValue::Object(identity)) = get_mut_ignore_case(resource, "identity") else {
        return;
    };
    let system_assigned = string_member(identity, "type")
        .is_some_and(|t| t.to_ascii_lowercase().contains("systemassigned"));
    if system_assigned {
        add_missing(identity, "principalId", PLACEHOLDER_GUID);
        add_missing(identity, "tenantId", tenant_id);
    }
}

/// Folds configuration child resources into a nested, merged resource.
///
/// A web app or slot gets its effective `siteConfig`, with the `web` config
/// child merged in and then reflected back as a single config child. A SQL
/// server gets the `ActiveDirectory` administrator child merged into
/// `properties.administrators`.
pub fn effective(resource: &mut JsonValue, resource_type: &str, id: &str) {
    let Some(map) = resource.as_object_mut() else {
        return;
    };
    if resource_type.eq_ignore_ascii_case("Microsoft.Web/sites") {
        web_app(map, WEB_CONFIG_TYPE, id);
    } else if resource_type.eq_ignore_ascii_case("Microsoft.Web/sites/slots") {
        web_app(map, WEB_SLOT_CONFIG_TYPE, id);
    } else if resource_type.eq_ignore_ascii_case("Microsoft.Sql/servers") {
        sql_server(map);
    }
}

fn web_app(resource: &mut JsonMap<String, JsonValue>, config_type: &str, id: &str) {
    let mut overrides = Vec::new();
    if let Some(JsonValue::Array(children)) = get_mut_ignore_case(resource, "resources") {
        children.retain(|child| {
            if !is_child(child, config_type, "web") {
                return true;
            }
            if let Some(properties) = child.get("properties").filter(|p| p.is_object()) {
                overrides.push(properties.clone());
            }
            false
        });
    }

    let site_config = with_object(resource, "properties", |properties| {
        with_object(properties, "siteConfig", |site_config| {
            let mut merged = JsonValue::Object(std::mem::take(site_config));
            for properties in overrides {
                merge_json(&mut merged, properties);
            }
            if let JsonValue::Object(merged) = merged {
                *site_config = merged;
            }
            site_config.clone()
        })
    });

    let config = json!({
        "type": config_type,
        "name": "web",
        "apiVersion": SITE_CONFIG_API_VERSION,
        "id": format!("{}/config/web", id),
        "properties": site_config,
    });
    match get_mut_ignore_case(resource, "resources") {
        Some(JsonValue::Array(children)) => children.push(config),
        _ => {
            resource.insert("resources".to_string(), JsonValue::Array(vec![config]));
        }
    }
}

fn sql_server(resource: &mut JsonMap<String, JsonValue>) {
    let overrides: Vec<JsonValue> = match get_mut_ignore_case(resource, "resources") {
        Some(JsonValue::Array(children)) => children
            .iter()
            .filter(|child| is_child(child, SQL_ADMINISTRATOR_TYPE, "ActiveDirectory"))
            .filter_map(|child| child.get("properties").filter(|p| p.is_object()).cloned())
            .collect(),
        _ => return,
    };
    if overrides.is_empty() {
        return;
    }
    with_object(resource, "properties", |properties| {
        with_object(properties, "administrators", |administrators| {
            let mut merged = JsonValue::Object(std::mem::take(administrators));
            for properties in overrides {
                merge_json(&mut merged, properties);
            }
            if let JsonValue::Object(merged) = merged {
                *administrators = merged;
            }
        });
    });
}

/// Matches a child by type and by the last segment of its name.
fn is_child(child: &JsonValue, resource_type: &str, name: &str) -> bool {
    let type_matches = child
        .get("type")
        .and_then(JsonValue::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case(resource_type));
    let name_matches = child
        .get("name")
        .and_then(JsonValue::as_str)
        .and_then(|n| n.rsplit('/').next())
        .is_some_and(|n| n.eq_ignore_ascii_case(name));
    type_matches && name_matches
}

/// `/subscriptions/<id>/resourceGroups/<name>` when `id` is inside a
/// resource group.
fn resource_group_id(id: &str) -> Option<String> {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [subscriptions, subscription, groups, group, ..]
            if subscriptions.eq_ignore_ascii_case("subscriptions")
                && groups.eq_ignore_ascii_case("resourceGroups") =>
        {
            Some(format!("/subscriptions/{}/resourceGroups/{}", subscription, group))
        }
        _ => None,
    }
}

fn has_key(map: &JsonMap<String, JsonValue>, key: &str) -> bool {
    map.keys().any(|k| k.eq_ignore_ascii_case(key))
}

fn get_mut_ignore_case<'a>(
    map: &'a mut JsonMap<String, JsonValue>,
    key: &str,
) -> Option<&'a mut JsonValue> {
    let found = map.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()?;
    map.get_mut(&found)
}

fn string_member(map: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, v)| v.as_str())
        .map(str::to_string)
}

/// Runs `f` on the object member `key`, which is created (or replaces a
/// non-object value) when needed. The member keeps its position.
fn with_object<R>(
    map: &mut JsonMap<String, JsonValue>,
    key: &str,
    f: impl FnOnce(&mut JsonMap<String, JsonValue>) -> R,
) -> R {
    let key = map
        .keys()
        .find(|k| k.eq_ignore_ascii_case(key))
        .cloned()
        .unwrap_or_else(|| key.to_string());
    let mut inner = match map.get_mut(&key) {
        Some(JsonValue::Object(inner)) => std::mem::take(inner),
        _ => JsonMap::new(),
    };
    let result = f(&mut inner);
    map.insert(key, JsonValue::Object(inner));
    result
}

fn add_missing(map: &mut JsonMap<String, JsonValue>, key: &str, value: impl Into<JsonValue>) {
    if !has_key(map, key) {
        map.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RG: &str = "/subscriptions/000/resourceGroups/rg";
    const TENANT: &str = "11111111-1111-1111-1111-111111111111";

    fn project(resource_type: &str, name: &str, value: JsonValue) -> JsonValue {
        let id = format!("{}/providers/{}/{}", RG, resource_type, name);
        let mut value = value;
        if let Some(map) = value.as_object_mut() {
            map.insert("name".to_string(), json!(name));
        }
        runtime(&mut value, resource_type, &id, TENANT);
        value
    }

    #[test]
    fn test_storage_account_endpoints() {
        let value = project(
            "Microsoft.Storage/storageAccounts",
            "stdata",
            json!({"location": "West Europe", "properties": {"primaryEndpoints": {"blob": "custom"}}}),
        );
        assert_eq!(value["properties"]["provisioningState"], json!("Succeeded"));
        assert_eq!(value["properties"]["primaryLocation"], json!("west europe"));
        assert_eq!(value["properties"]["primaryEndpoints"]["blob"], json!("custom"));
        assert_eq!(
            value["properties"]["primaryEndpoints"]["dfs"],
            json!("https://stdata.dfs.core.windows.net/")
        );
    }

    #[test]
    fn test_key_vault_and_secret() {
        let vault = project("Microsoft.KeyVault/vaults", "KV-App", json!({}));
        assert_eq!(
            vault["properties"],
            json!({"accessPolicies": [], "tenantId": TENANT, "vaultUri": "https://kv-app.vault.azure.net/"})
        );

        let id = format!("{}/providers/Microsoft.KeyVault/vaults/KV-App/secrets/Password", RG);
        let mut secret = json!({"name": "KV-App/Password"});
        runtime(&mut secret, "Microsoft.KeyVault/vaults/secrets", &id, TENANT);
        assert_eq!(
            secret["properties"]["secretUri"],
            json!("https://kv-app.vault.azure.net/secrets/password")
        );
        assert_eq!(
            secret["properties"]["secretUriWithVersion"],
            json!("https://kv-app.vault.azure.net/secrets/password/ffffffffffffffffffffffffffffffff")
        );
    }

    #[test]
    fn test_identities() {
        let identity = project("Microsoft.ManagedIdentity/userAssignedIdentities", "id-app", json!({}));
        assert_eq!(
            identity["properties"],
            json!({"clientId": PLACEHOLDER_GUID, "principalId": PLACEHOLDER_GUID, "tenantId": TENANT})
        );

        let site = project(
            "Microsoft.Web/sites",
            "app",
            json!({"identity": {"type": "SystemAssigned, UserAssigned"}}),
        );
        assert_eq!(site["identity"]["principalId"], json!(PLACEHOLDER_GUID));
        assert_eq!(site["identity"]["tenantId"], json!(TENANT));
        assert!(site.get("properties").is_none());

        let user_only = project("Microsoft.Web/sites", "app", json!({"identity": {"type": "UserAssigned"}}));
        assert!(user_only["identity"].get("principalId").is_none());
    }

    #[test]
    fn test_endpoints_by_type() {
        let registry = project("Microsoft.ContainerRegistry/registries", "acr", json!({}));
        assert_eq!(registry["properties"]["loginServer"], json!("acr.azurecr.io"));

        let bus = project("Microsoft.ServiceBus/namespaces", "sb", json!({}));
        assert_eq!(
            bus["properties"]["serviceBusEndpoint"],
            json!("https://sb.servicebus.windows.net:443/")
        );

        let openai = project("Microsoft.CognitiveServices/accounts", "ai", json!({"kind": "OpenAI"}));
        assert_eq!(openai["properties"]["endpoint"], json!("https://ai.openai.azure.com/"));
        assert_eq!(
            openai["properties"]["endpoints"]["OpenAI Whisper API"],
            json!("https://ai.openai.azure.com/")
        );

        let cosmos = project("Microsoft.DocumentDB/databaseAccounts", "db", json!({}));
        assert_eq!(
            cosmos["properties"]["documentEndpoint"],
            json!("https://db.documents.azure.com:443/")
        );
    }

    #[test]
    fn test_network_projections() {
        let vnet = project(
            "Microsoft.Network/virtualNetworks",
            "vnet",
            json!({"properties": {"subnets": [{"name": "default"}]}}),
        );
        assert_eq!(
            vnet["properties"]["subnets"][0]["id"],
            json!(format!("{}/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default", RG))
        );

        let endpoint = project(
            "Microsoft.Network/privateEndpoints",
            "pe",
            json!({"properties": {"customNetworkInterfaceName": "nic-pe"}}),
        );
        assert_eq!(
            endpoint["properties"]["networkInterfaces"],
            json!([{"id": format!("{}/providers/Microsoft.Network/networkInterfaces/nic-pe", RG)}])
        );

        let generated = project("Microsoft.Network/privateEndpoints", "pe", json!({}));
        let nic = generated["properties"]["networkInterfaces"][0]["id"].as_str().unwrap_or_default();
        assert!(nic.contains("/networkInterfaces/pe.nic."), "{nic}");
    }

    #[test]
    fn test_values_already_present_are_kept() {
        let assignment = project(
            "Microsoft.Authorization/roleAssignments",
            "ra",
            json!({"properties": {"PrincipalType": "ServicePrincipal"}}),
        );
        assert_eq!(assignment["properties"], json!({"PrincipalType": "ServicePrincipal"}));

        let alias = project("Microsoft.Subscription/aliases", "sub", json!({}));
        let again = project("Microsoft.Subscription/aliases", "sub", json!({}));
        assert_eq!(alias["properties"]["subscriptionId"], again["properties"]["subscriptionId"]);
        assert_eq!(alias["properties"]["acceptOwnershipState"], json!("Completed"));
    }

    #[test]
    fn test_web_app_site_config() {
        let id = format!("{}/providers/Microsoft.Web/sites/app", RG);
        let mut site = json!({
            "properties": {"siteConfig": {"alwaysOn": true, "appSettings": [{"name": "A"}]}},
            "resources": [
                {"type": "Microsoft.Web/sites/config", "name": "app/web",
                 "properties": {"minTlsVersion": "1.2", "appSettings": [{"name": "B"}]}},
                {"type": "Microsoft.Web/sites/config", "name": "app/appsettings", "properties": {}}
            ]
        });
        effective(&mut site, "Microsoft.Web/sites", &id);
        let expected = json!({"alwaysOn": true, "appSettings": [{"name": "A"}, {"name": "B"}], "minTlsVersion": "1.2"});
        assert_eq!(site["properties"]["siteConfig"], expected);
        assert_eq!(site["resources"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            site["resources"][1],
            json!({
                "type": "Microsoft.Web/sites/config",
                "name": "web",
                "apiVersion": "2022-09-01",
                "id": format!("{id}/config/web"),
                "properties": expected
            })
        );
    }

    #[test]
    fn test_sql_server_administrators() {
        let mut server = json!({
            "properties": {"administrators": {"login": "old", "azureADOnlyAuthentication": false}},
            "resources": [{
                "type": "Microsoft.Sql/servers/administrators",
                "name": "sql/ActiveDirectory",
                "properties": {"login": "dba-group"}
            }]
        });
        effective(&mut server, "Microsoft.Sql/servers", "/sql");
        assert_eq!(
            server["properties"]["administrators"],
            json!({"login": "dba-group", "azureADOnlyAuthentication": false})
        );

        let mut plain = json!({"properties": {}});
        effective(&mut plain, "Microsoft.Sql/servers", "/sql");
        assert_eq!(plain, json!({"properties": {}}));
    }
}

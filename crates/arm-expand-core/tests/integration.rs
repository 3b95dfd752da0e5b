//! Integration tests for the full expansion pipeline.
//!
//! These tests exercise: parameters → variables → resource declaration →
//! dependency ordering → nested deployments → nest and merge.

use arm_expand_core::diag::Severity;
use arm_expand_core::{expand_template, DeploymentError, Expansion, ExpansionOptions};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};

const SUB: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

fn rg_id() -> String {
    format!("/subscriptions/{SUB}/resourceGroups/ps-rule-test-rg")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn expand(template: JsonValue, parameters: JsonValue) -> Expansion {
    init_tracing();
    let expansion = expand_template(&template, &parameters, ExpansionOptions::default())
        .unwrap_or_else(|err| panic!("expansion failed: {err}"));
    assert!(
        !expansion.diagnostics.has_errors(),
        "errors: {}",
        expansion.diagnostics
    );
    expansion
}

fn names(expansion: &Expansion) -> Vec<&str> {
    expansion
        .resources
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect()
}

#[test]
fn test_copy_loop_produces_one_resource_per_iteration() {
    let template = json!({
        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
        "contentVersion": "1.0.0.0",
        "parameters": {
            "count": {"type": "int", "defaultValue": 3},
            "prefix": {"type": "string", "defaultValue": "vm"}
        },
        "resources": [
            {
                "type": "Microsoft.Compute/availabilitySets",
                "apiVersion": "2023-03-01",
                "name": "avset",
                "dependsOn": ["[resourceId('Microsoft.Compute/virtualMachines', format('{0}-{1}', parameters('prefix'), 2))]"]
            },
            {
                "type": "Microsoft.Compute/virtualMachines",
                "apiVersion": "2023-03-01",
                "name": "[format('{0}-{1}', parameters('prefix'), copyIndex())]",
                "location": "[resourceGroup().location]",
                "copy": {"name": "vmLoop", "count": "[parameters('count')]"},
                "properties": {
                    "hardwareProfile": {"vmSize": "Standard_D2s_v3"},
                    "osProfile": {"computerName": "[toUpper(format('{0}{1}', parameters('prefix'), padLeft(copyIndex(1), 2, '0')))]"}
                }
            }
        ]
    });
    let expansion = expand(template, json!({}));
    assert_eq!(names(&expansion), vec!["vm-0", "vm-1", "vm-2", "avset"]);
    assert_eq!(
        expansion.resources[1]["properties"]["osProfile"]["computerName"],
        json!("VM02")
    );
    assert_eq!(
        expansion.resources[2]["id"],
        json!(format!("{}/providers/Microsoft.Compute/virtualMachines/vm-2", rg_id()))
    );
}

#[test]
fn test_loop_name_dependency_orders_after_every_member() {
    let template = json!({
        "resources": [
            {
                "type": "Microsoft.Network/loadBalancers",
                "name": "lb",
                "dependsOn": ["nicLoop"]
            },
            {
                "type": "Microsoft.Network/networkInterfaces",
                "name": "[concat('nic-', copyIndex())]",
                "copy": {"name": "nicLoop", "count": 2}
            },
            {
                "type": "Microsoft.Network/publicIPAddresses",
                "name": "pip"
            }
        ]
    });
    let expansion = expand(template, json!({}));
    let order = names(&expansion);
    let lb = order.iter().position(|n| *n == "lb").unwrap();
    assert!(order.iter().position(|n| *n == "nic-0").unwrap() < lb);
    assert!(order.iter().position(|n| *n == "nic-1").unwrap() < lb);
    assert_eq!(order.len(), 4);
}

#[test]
fn test_property_copy_and_variable_copy() {
    let template = json!({
        "variables": {
            "copy": [{
                "name": "subnets",
                "count": 2,
                "input": {
                    "name": "[concat('snet-', copyIndex('subnets'))]",
                    "prefix": "[cidrSubnet('10.0.0.0/16', 24, copyIndex('subnets'))]"
                }
            }]
        },
        "resources": [{
            "type": "Microsoft.Network/virtualNetworks",
            "name": "vnet",
            "properties": {
                "addressSpace": {"addressPrefixes": ["10.0.0.0/16"]},
                "copy": [{
                    "name": "subnets",
                    "count": "[length(variables('subnets'))]",
                    "input": {
                        "name": "[variables('subnets')[copyIndex('subnets')].name]",
                        "properties": {"addressPrefix": "[variables('subnets')[copyIndex('subnets')].prefix]"}
                    }
                }]
            }
        }]
    });
    let expansion = expand(template, json!({}));
    assert_eq!(
        expansion.resources[0]["properties"]["subnets"],
        json!([
            {"name": "snet-0", "properties": {"addressPrefix": "10.0.0.0/24"}},
            {"name": "snet-1", "properties": {"addressPrefix": "10.0.1.0/24"}}
        ])
    );
}

#[test]
fn test_parameters_file_and_secrets() {
    let template = json!({
        "parameters": {
            "adminPassword": {"type": "secureString"},
            "adminUser": {"type": "string"},
            "tags": {"type": "object", "defaultValue": {}}
        },
        "variables": {
            "connection": "[concat('Server=sql;Password=', parameters('adminPassword'))]"
        },
        "resources": [{
            "type": "Microsoft.Web/sites",
            "name": "web",
            "tags": "[parameters('tags')]",
            "properties": {
                "siteConfig": {
                    "appSettings": [
                        {"name": "USER", "value": "[parameters('adminUser')]"},
                        {"name": "DB", "value": "[variables('connection')]"}
                    ]
                }
            }
        }],
        "outputs": {
            "user": {"type": "string", "value": "[parameters('adminUser')]"}
        }
    });
    let parameters = json!({
        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
        "contentVersion": "1.0.0.0",
        "parameters": {
            "adminPassword": {"value": "hunter2"},
            "adminUser": {"value": "admin"},
            "tags": {"value": {"env": "test"}}
        }
    });
    let expansion = expand(template, parameters);
    let web = &expansion.resources[0];
    assert_eq!(web["tags"], json!({"env": "test"}));
    assert_eq!(
        web["properties"]["siteConfig"]["appSettings"],
        json!([
            {"name": "USER", "value": "admin"},
            {"name": "DB", "value": "{{Secret}}"}
        ])
    );
    assert_eq!(
        expansion.outputs["user"],
        json!({"type": "string", "value": "admin"})
    );
}

#[test]
fn test_keep_secrets_emits_values() {
    let template = json!({
        "parameters": {"key": {"type": "secureString", "defaultValue": "s3cret"}},
        "resources": [{
            "type": "Microsoft.Storage/storageAccounts",
            "name": "st",
            "properties": {"key": "[parameters('key')]"}
        }]
    });
    let options = ExpansionOptions {
        keep_secrets: true,
        ..ExpansionOptions::default()
    };
    let expansion = expand_template(&template, &json!({}), options).unwrap();
    assert_eq!(expansion.resources[0]["properties"]["key"], json!("s3cret"));
}

#[test]
fn test_nested_deployment_with_child_resources() {
    let template = json!({
        "parameters": {"vnetName": {"type": "string", "defaultValue": "vnet-hub"}},
        "resources": [
            {
                "type": "Microsoft.Network/virtualNetworks",
                "name": "[parameters('vnetName')]",
                "properties": {"addressSpace": {"addressPrefixes": ["10.1.0.0/16"]}}
            },
            {
                "type": "Microsoft.Resources/deployments",
                "apiVersion": "2022-09-01",
                "name": "subnets",
                "dependsOn": ["[resourceId('Microsoft.Network/virtualNetworks', parameters('vnetName'))]"],
                "properties": {
                    "mode": "Incremental",
                    "expressionEvaluationOptions": {"scope": "inner"},
                    "parameters": {"vnet": {"value": "[parameters('vnetName')]"}},
                    "template": {
                        "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
                        "parameters": {"vnet": {"type": "string"}},
                        "resources": [{
                            "type": "Microsoft.Network/virtualNetworks/subnets",
                            "name": "[concat(parameters('vnet'), '/GatewaySubnet')]",
                            "properties": {"addressPrefix": "10.1.0.0/27"}
                        }],
                        "outputs": {
                            "deploymentName": {"type": "string", "value": "[deployment().name]"}
                        }
                    }
                }
            }
        ],
        "outputs": {
            "nested": {"type": "string", "value": "[reference('subnets').outputs.deploymentName.value]"}
        }
    });
    let expansion = expand(template, json!({}));
    assert_eq!(names(&expansion), vec!["vnet-hub"]);
    let subnet = &expansion.resources[0]["resources"][0];
    assert_eq!(subnet["name"], json!("vnet-hub/GatewaySubnet"));
    assert_eq!(
        subnet["id"],
        json!(format!(
            "{}/providers/Microsoft.Network/virtualNetworks/vnet-hub/subnets/GatewaySubnet",
            rg_id()
        ))
    );
    assert_eq!(
        expansion.outputs["nested"],
        json!({"type": "string", "value": "subnets"})
    );
}

#[test]
fn test_duplicate_resources_are_merged() {
    let template = json!({
        "resources": [
            {
                "type": "Microsoft.Storage/storageAccounts",
                "name": "stdata",
                "properties": {"supportsHttpsTrafficOnly": true}
            },
            {
                "type": "Microsoft.Storage/storageAccounts",
                "name": "stdata",
                "properties": {"minimumTlsVersion": "TLS1_2"}
            },
            {
                "type": "Microsoft.Web/sites",
                "name": "app",
                "properties": {"httpsOnly": false}
            },
            {
                "type": "Microsoft.Web/sites",
                "name": "app",
                "properties": {"clientAffinityEnabled": false}
            }
        ]
    });
    let expansion = expand(template, json!({}));
    assert_eq!(names(&expansion), vec!["stdata", "app"]);
    assert_eq!(
        expansion.resources[0]["properties"],
        json!({
            "supportsHttpsTrafficOnly": true,
            "provisioningState": "Succeeded",
            "primaryEndpoints": {
                "web": "https://stdata.web.core.windows.net/",
                "dfs": "https://stdata.dfs.core.windows.net/",
                "blob": "https://stdata.blob.core.windows.net/",
                "file": "https://stdata.file.core.windows.net/",
                "queue": "https://stdata.queue.core.windows.net/",
                "table": "https://stdata.table.core.windows.net/"
            },
            "minimumTlsVersion": "TLS1_2"
        })
    );
    assert_eq!(
        expansion.resources[1]["properties"],
        json!({"clientAffinityEnabled": false, "siteConfig": {}})
    );
}

#[test]
fn test_references_see_runtime_properties() {
    let template = json!({
        "resources": [
            {
                "type": "Microsoft.Storage/storageAccounts",
                "name": "stlogs",
                "location": "westeurope"
            },
            {
                "type": "Microsoft.KeyVault/vaults",
                "name": "kv-app",
                "properties": {"tenantId": "[subscription().tenantId]"}
            },
            {
                "type": "Microsoft.Web/sites",
                "name": "app",
                "dependsOn": ["stlogs", "kv-app"],
                "properties": {
                    "siteConfig": {"alwaysOn": true},
                    "blobEndpoint": "[reference('stlogs').primaryEndpoints.blob]",
                    "vaultUri": "[reference('kv-app').vaultUri]"
                },
                "resources": [{
                    "type": "config",
                    "name": "web",
                    "dependsOn": ["app"],
                    "properties": {"minTlsVersion": "1.2"}
                }]
            }
        ]
    });
    let expansion = expand(template, json!({}));
    assert_eq!(names(&expansion), vec!["stlogs", "kv-app", "app"]);
    assert_eq!(
        expansion.resources[0]["properties"]["primaryLocation"],
        json!("westeurope")
    );

    let app = &expansion.resources[2];
    assert_eq!(
        app["properties"]["blobEndpoint"],
        json!("https://stlogs.blob.core.windows.net/")
    );
    assert_eq!(
        app["properties"]["vaultUri"],
        json!("https://kv-app.vault.azure.net/")
    );
    assert_eq!(
        app["properties"]["siteConfig"],
        json!({"alwaysOn": true, "minTlsVersion": "1.2"})
    );
    let children = app["resources"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["name"], json!("web"));
    assert_eq!(
        children[0]["id"],
        json!(format!("{}/providers/Microsoft.Web/sites/app/config/web", rg_id()))
    );
    assert_eq!(children[0]["properties"], app["properties"]["siteConfig"]);
}

#[test]
fn test_references_to_external_resources_are_mocked() {
    let template = json!({
        "parameters": {"workspaceId": {"type": "string"}},
        "resources": [{
            "type": "Microsoft.Insights/components",
            "name": "ai",
            "properties": {
                "WorkspaceResourceId": "[parameters('workspaceId')]",
                "customerId": "[reference(parameters('workspaceId'), '2022-10-01').customerId]"
            }
        }]
    });
    let workspace = format!(
        "{}/providers/Microsoft.OperationalInsights/workspaces/law",
        rg_id()
    );
    let expansion = expand(template, json!({"workspaceId": workspace}));
    let customer = expansion.resources[0]["properties"]["customerId"]
        .as_str()
        .unwrap();
    assert!(customer.starts_with("{{"), "{customer}");
}

#[test]
fn test_failing_resource_is_reported_and_others_kept() {
    let template = json!({
        "resources": [
            {
                "type": "Microsoft.KeyVault/vaults",
                "name": "kv",
                "properties": {"sku": "[fail('unsupported sku')]"}
            },
            {
                "type": "Microsoft.KeyVault/vaults",
                "name": "kv2",
                "properties": {"tenantId": "[subscription().tenantId]"}
            }
        ]
    });
    let expansion = expand_template(&template, &json!({}), ExpansionOptions::default()).unwrap();
    assert_eq!(names(&expansion), vec!["kv2"]);
    let errors: Vec<_> = expansion.diagnostics.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, Severity::Error);
    assert!(errors[0].detail.contains("unsupported sku"));

    let strict = ExpansionOptions {
        strict: true,
        ..ExpansionOptions::default()
    };
    let err = expand_template(&template, &json!({}), strict).unwrap_err();
    assert!(matches!(err, DeploymentError::Expression { .. }));
}

#[test]
fn test_cyclic_dependencies_warn() {
    let template = json!({
        "resources": [
            {"type": "Microsoft.Web/sites", "name": "a", "dependsOn": ["b"]},
            {"type": "Microsoft.Web/sites", "name": "b", "dependsOn": ["a"]}
        ]
    });
    let expansion = expand(template, json!({}));
    assert_eq!(expansion.resources.len(), 2);
    assert!(expansion.diagnostics.has_warnings());
}

#[test]
fn test_options_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("options.yaml");
    std::fs::write(
        &path,
        "subscription:\n  subscriptionId: 00000000-0000-0000-0000-000000000001\nresourceGroup:\n  name: rg-prod\n  location: westeurope\n",
    )
    .unwrap();
    let options = ExpansionOptions::from_file(&path).unwrap();

    let template = json!({
        "resources": [{
            "type": "Microsoft.Web/serverfarms",
            "name": "plan",
            "location": "[resourceGroup().location]"
        }]
    });
    let expansion = expand_template(&template, &json!({}), options).unwrap();
    assert_eq!(
        expansion.resources[0],
        json!({
            "name": "plan",
            "type": "Microsoft.Web/serverfarms",
            "id": "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/rg-prod/providers/Microsoft.Web/serverfarms/plan",
            "location": "westeurope"
        })
    );
}

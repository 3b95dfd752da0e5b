//! Host options for template expansion.
//!
//! Options describe the deployment environment that expressions such as
//! `subscription()` and `resourceGroup()` observe. Every field has a default,
//! so a YAML file only needs to list what differs:
//!
//! ```yaml
//! resourceGroup:
//!   name: rg-prod
//!   location: australiaeast
//! strict: true
//! ```

use std::path::Path;

use serde_json::Value as JsonValue;

const DEFAULT_ID: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

/// Errors raised while loading options.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read options file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Options controlling one template expansion.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpansionOptions {
    pub subscription: SubscriptionOption,
    pub resource_group: ResourceGroupOption,
    pub tenant: TenantOption,
    pub management_group: ManagementGroupOption,
    pub deployer: DeployerOption,
    /// Name of the root deployment returned by `deployment()`.
    pub deployment_name: String,
    /// Values used for parameters that have neither a supplied value nor a
    /// template default.
    pub parameter_defaults: serde_json::Map<String, JsonValue>,
    /// Fail the expansion on the first resource error instead of reporting
    /// it and dropping the resource.
    pub strict: bool,
    /// Emit secret values instead of `{{Secret}}`.
    pub keep_secrets: bool,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            subscription: SubscriptionOption::default(),
            resource_group: ResourceGroupOption::default(),
            tenant: TenantOption::default(),
            management_group: ManagementGroupOption::default(),
            deployer: DeployerOption::default(),
            deployment_name: "ps-rule-test-deployment".to_string(),
            parameter_defaults: serde_json::Map::new(),
            strict: false,
            keep_secrets: false,
        }
    }
}

impl ExpansionOptions {
    /// Parses options from a YAML document.
    pub fn from_yaml_str(source: &str) -> Result<Self, OptionsError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(source)?)
    }

    /// Loads options from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, OptionsError> {
        let source = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&source)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionOption {
    pub subscription_id: String,
    pub display_name: String,
    pub tenant_id: String,
    pub state: String,
}

impl Default for SubscriptionOption {
    fn default() -> Self {
        Self {
            subscription_id: DEFAULT_ID.to_string(),
            display_name: "PSRule Test Subscription".to_string(),
            tenant_id: DEFAULT_ID.to_string(),
            state: "NotDefined".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceGroupOption {
    pub name: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
    pub tags: serde_json::Map<String, JsonValue>,
    pub provisioning_state: String,
}

impl Default for ResourceGroupOption {
    fn default() -> Self {
        Self {
            name: "ps-rule-test-rg".to_string(),
            location: "eastus".to_string(),
            managed_by: None,
            tags: serde_json::Map::new(),
            provisioning_state: "Succeeded".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantOption {
    pub tenant_id: String,
    pub display_name: String,
    pub country_code: String,
}

impl Default for TenantOption {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_ID.to_string(),
            display_name: "PSRule".to_string(),
            country_code: "US".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagementGroupOption {
    pub name: String,
    pub display_name: String,
}

impl Default for ManagementGroupOption {
    fn default() -> Self {
        Self {
            name: "psrule-test".to_string(),
            display_name: "PSRule Test Management Group".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployerOption {
    pub object_id: String,
    pub tenant_id: String,
    pub user_principal_name: String,
}

impl Default for DeployerOption {
    fn default() -> Self {
        Self {
            object_id: DEFAULT_ID.to_string(),
            tenant_id: DEFAULT_ID.to_string(),
            user_principal_name: "psrule-test@contoso.com".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = ExpansionOptions::default();
        assert_eq!(options.resource_group.name, "ps-rule-test-rg");
        assert_eq!(options.resource_group.location, "eastus");
        assert_eq!(options.subscription.subscription_id, DEFAULT_ID);
        assert_eq!(options.deployment_name, "ps-rule-test-deployment");
        assert!(!options.strict);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let options = ExpansionOptions::from_yaml_str(
            "resourceGroup:\n  name: rg-prod\n  location: australiaeast\nstrict: true\n",
        )
        .unwrap();
        assert_eq!(options.resource_group.name, "rg-prod");
        assert_eq!(options.resource_group.location, "australiaeast");
        assert_eq!(options.resource_group.provisioning_state, "Succeeded");
        assert_eq!(options.tenant, TenantOption::default());
        assert!(options.strict);
    }

    #[test]
    fn test_empty_yaml() {
        assert_eq!(
            ExpansionOptions::from_yaml_str("  \n").unwrap(),
            ExpansionOptions::default()
        );
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ExpansionOptions::from_yaml_str("strict: [1, 2").unwrap_err();
        assert!(matches!(err, OptionsError::Yaml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deploymentName: nightly").unwrap();
        writeln!(file, "parameterDefaults:").unwrap();
        writeln!(file, "  location: westus2").unwrap();
        let options = ExpansionOptions::from_file(file.path()).unwrap();
        assert_eq!(options.deployment_name, "nightly");
        assert_eq!(
            options.parameter_defaults.get("location"),
            Some(&JsonValue::String("westus2".to_string()))
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExpansionOptions::from_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, OptionsError::Io { .. }));
    }
}

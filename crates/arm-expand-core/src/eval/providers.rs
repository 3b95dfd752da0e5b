//! Embedded metadata: resource providers, locations and cloud environments.
//!
//! The data is compiled into the crate and parsed once on first use.

use std::sync::OnceLock;

use serde::Deserialize;
use serde_json::Value as JsonValue;

const PROVIDERS: &str = include_str!("data/providers.json");
const LOCATIONS: &str = include_str!("data/locations.json");
const ENVIRONMENTS: &str = include_str!("data/environments.json");

/// One resource type of a resource provider.
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProviderType {
    pub resource_type: String,
    pub locations: Vec<String>,
    pub api_versions: Vec<String>,
    #[serde(default, skip_serializing)]
    pub zone_mappings: Vec<ZoneMapping>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneMapping {
    pub location: String,
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Location {
    zones: u32,
}

type Providers = Vec<(String, Vec<ResourceProviderType>)>;

fn providers() -> &'static Providers {
    static DATA: OnceLock<Providers> = OnceLock::new();
    DATA.get_or_init(|| {
        match serde_json::from_str::<serde_json::Map<String, JsonValue>>(PROVIDERS) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(namespace, types)| {
                    serde_json::from_value(types).ok().map(|t| (namespace, t))
                })
                .collect(),
            Err(err) => {
                tracing::error!(error = %err, "embedded provider metadata is invalid");
                Vec::new()
            }
        }
    })
}

fn locations() -> &'static Vec<(String, Location)> {
    static DATA: OnceLock<Vec<(String, Location)>> = OnceLock::new();
    DATA.get_or_init(|| {
        serde_json::from_str::<serde_json::Map<String, JsonValue>>(LOCATIONS)
            .map(|map| {
                map.into_iter()
                    .filter_map(|(name, l)| serde_json::from_value(l).ok().map(|l| (name, l)))
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Normalizes a location name: `West US 2` becomes `westus2`.
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Returns every resource type of a provider namespace.
pub fn provider(namespace: &str) -> Option<&'static [ResourceProviderType]> {
    providers()
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(namespace))
        .map(|(_, types)| types.as_slice())
}

/// Returns one resource type of a provider namespace.
pub fn resource_type(namespace: &str, resource_type: &str) -> Option<&'static ResourceProviderType> {
    provider(namespace)?
        .iter()
        .find(|t| t.resource_type.eq_ignore_ascii_case(resource_type))
}

/// Returns the zones a resource type supports in `location`, or an empty list.
pub fn zones(namespace: &str, resource_type_name: &str, location: &str) -> Vec<String> {
    let location = normalize_location(location);
    resource_type(namespace, resource_type_name)
        .and_then(|t| {
            t.zone_mappings
                .iter()
                .find(|m| normalize_location(&m.location) == location)
        })
        .map(|m| m.zones.clone())
        .unwrap_or_default()
}

/// Returns the number of physical availability zones in `location`.
pub fn location_zone_count(location: &str) -> u32 {
    let location = normalize_location(location);
    locations()
        .iter()
        .find(|(name, _)| *name == location)
        .map_or(0, |(_, l)| l.zones)
}

/// Returns true if `location` names a known region or is `global`.
pub fn is_known_location(location: &str) -> bool {
    let location = normalize_location(location);
    location == "global" || locations().iter().any(|(name, _)| *name == location)
}

/// Returns the named cloud environment.
pub fn environment(name: &str) -> Option<JsonValue> {
    static DATA: OnceLock<JsonValue> = OnceLock::new();
    let environments =
        DATA.get_or_init(|| serde_json::from_str(ENVIRONMENTS).unwrap_or(JsonValue::Null));
    environments
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

//! Availability zone functions.
//!
//! Offline there is no per-subscription zone mapping, so logical zone `n`
//! maps to physical zone `<location>-az<n>`. Zones a location does not have
//! map to an empty string.

use crate::error::{ExpressionError, Result};
use crate::eval::builtins::{expect_args, expect_array, expect_string, string_like};
use crate::eval::context::Context;
use crate::eval::providers::{location_zone_count, normalize_location};
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("toLogicalZone", eval_to_logical_zone),
    FunctionDescriptor::eager("toLogicalZones", eval_to_logical_zones),
    FunctionDescriptor::eager("toPhysicalZone", eval_to_physical_zone),
    FunctionDescriptor::eager("toPhysicalZones", eval_to_physical_zones),
];

fn valid_zone(location: &str, zone: &str) -> Option<u32> {
    zone.trim()
        .parse::<u32>()
        .ok()
        .filter(|n| *n >= 1 && *n <= location_zone_count(location))
}

fn to_logical(location: &str, physical: &str) -> Option<String> {
    let prefix = format!("{}-az", normalize_location(location));
    let zone = physical.to_ascii_lowercase().strip_prefix(&prefix)?.to_string();
    valid_zone(location, &zone).map(|n| n.to_string())
}

fn to_physical(location: &str, logical: &str) -> Option<String> {
    valid_zone(location, logical).map(|n| format!("{}-az{}", normalize_location(location), n))
}

/// Reads `(subscriptionId, location)` and returns the location.
fn location(function: &str, args: &[Value]) -> Result<String> {
    expect_args(function, args, 3, 3)?;
    expect_string(function, args, 0)?;
    expect_string(function, args, 1)
}

fn zone_list(ctx: &dyn Context, function: &str, args: &[Value]) -> Result<Vec<String>> {
    expect_array(ctx, function, args, 2)?
        .iter()
        .map(|zone| {
            string_like(zone).ok_or_else(|| {
                ExpressionError::argument(function, "argument 3", "an array of zone strings")
            })
        })
        .collect()
}

/// `toLogicalZone(subscriptionId, location, physicalZone)`
fn eval_to_logical_zone(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let location = location("toLogicalZone", args)?;
    let zone = expect_string("toLogicalZone", args, 2)?;
    Ok(Value::String(to_logical(&location, &zone).unwrap_or_default()))
}

/// `toLogicalZones(subscriptionId, location, physicalZones)`
fn eval_to_logical_zones(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let location = location("toLogicalZones", args)?;
    let zones = zone_list(ctx, "toLogicalZones", args)?;
    Ok(Value::Array(
        zones
            .iter()
            .filter_map(|zone| to_logical(&location, zone))
            .map(Value::String)
            .collect(),
    ))
}

/// `toPhysicalZone(subscriptionId, location, logicalZone)`
fn eval_to_physical_zone(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let location = location("toPhysicalZone", args)?;
    let zone = expect_string("toPhysicalZone", args, 2)?;
    Ok(Value::String(to_physical(&location, &zone).unwrap_or_default()))
}

/// `toPhysicalZones(subscriptionId, location, logicalZones)`
fn eval_to_physical_zones(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    let location = location("toPhysicalZones", args)?;
    let zones = zone_list(ctx, "toPhysicalZones", args)?;
    Ok(Value::Array(
        zones
            .iter()
            .filter_map(|zone| to_physical(&location, zone))
            .map(Value::String)
            .collect(),
    ))
}

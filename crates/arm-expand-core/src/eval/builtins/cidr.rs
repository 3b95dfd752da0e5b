//! CIDR functions.

use crate::error::{ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{expect_args, expect_int, expect_string};
use crate::eval::cidr::{Cidr, CidrError};
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("cidrHost", eval_cidr_host),
    FunctionDescriptor::eager("cidrSubnet", eval_cidr_subnet),
    FunctionDescriptor::eager("parseCidr", eval_parse_cidr),
];

fn cidr_error(function: &str, err: CidrError) -> ExpressionError {
    match err {
        CidrError::InvalidFormat(_) => {
            ExpressionError::argument(function, "network", "a CIDR range such as '10.0.0.0/16'")
        }
        CidrError::InvalidLength { min, max, .. } => ExpressionError::argument(
            function,
            "cidr",
            format!("a prefix length between {} and {}", min, max),
        ),
        CidrError::OutOfRange { .. } => {
            ExpressionError::function(function, FunctionErrorKind::OutOfRange, err.to_string())
        }
    }
}

fn parse(function: &str, args: &[Value]) -> Result<Cidr> {
    let network = expect_string(function, args, 0)?;
    Cidr::parse(&network).map_err(|err| cidr_error(function, err))
}

/// `parseCidr(network)`
fn eval_parse_cidr(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("parseCidr", args, 1, 1)?;
    let cidr = parse("parseCidr", args)?;
    let address = |a: u128| Value::String(cidr.format_address(a));

    let mut entries = vec![
        ("network".to_string(), address(cidr.network())),
        ("netmask".to_string(), address(cidr.netmask())),
    ];
    if let Some(broadcast) = cidr.broadcast() {
        entries.push(("broadcast".to_string(), address(broadcast)));
    }
    entries.push(("firstUsable".to_string(), address(cidr.first_usable())));
    entries.push(("lastUsable".to_string(), address(cidr.last_usable())));
    entries.push(("cidr".to_string(), Value::Int(cidr.prefix as i64)));
    Ok(Value::Object(entries))
}

/// `cidrSubnet(network, newCidr, subnetIndex)`
fn eval_cidr_subnet(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("cidrSubnet", args, 3, 3)?;
    let cidr = parse("cidrSubnet", args)?;
    let new_prefix = expect_int("cidrSubnet", args, 1)?;
    let index = expect_int("cidrSubnet", args, 2)?;
    cidr.subnet(new_prefix, index)
        .map(|subnet| Value::String(subnet.to_string()))
        .map_err(|err| cidr_error("cidrSubnet", err))
}

/// `cidrHost(network, hostIndex)`
fn eval_cidr_host(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("cidrHost", args, 2, 2)?;
    let cidr = parse("cidrHost", args)?;
    let index = expect_int("cidrHost", args, 1)?;
    cidr.host(index)
        .map(|host| Value::String(cidr.format_address(host)))
        .map_err(|err| cidr_error("cidrHost", err))
}

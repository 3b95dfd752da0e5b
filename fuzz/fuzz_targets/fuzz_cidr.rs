//! Fuzz target: CIDR arithmetic
//!
//! Targets:
//! - Shift overflow on extreme prefix lengths
//! - Index overflow in subnet and host selection
//! - Formatting of every address the arithmetic produces

#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use arm_expand_core::eval::cidr::Cidr;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    network: String,
    new_prefix: i64,
    index: i64,
}

fuzz_target!(|input: FuzzInput| {
    if input.network.len() > 256 {
        return;
    }
    let Ok(cidr) = Cidr::parse(&input.network) else {
        return;
    };

    let _ = cidr.format_address(cidr.network());
    let _ = cidr.broadcast().map(|b| cidr.format_address(b));
    let _ = cidr.format_address(cidr.first_usable());
    let _ = cidr.format_address(cidr.last_usable());

    if let Ok(subnet) = cidr.subnet(input.new_prefix, input.index) {
        let _ = subnet.format_address(subnet.network());
    }
    if let Ok(host) = cidr.host(input.index) {
        let _ = cidr.format_address(host);
    }
});

//! IPv4 and IPv6 CIDR arithmetic.
//!
//! Addresses of both families are held as `u128`. IPv4 addresses use the low
//! 32 bits.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Errors raised while parsing or subdividing a CIDR range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidrError {
    #[error("'{0}' is not a valid CIDR range")]
    InvalidFormat(String),
    #[error("the prefix length {length} is invalid; expected a value between {min} and {max}")]
    InvalidLength { length: i64, min: u8, max: u8 },
    #[error("the index {index} is out of range for {range}")]
    OutOfRange { index: i64, range: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn bits(self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }

    fn max(self) -> u128 {
        match self {
            IpFamily::V4 => u32::MAX as u128,
            IpFamily::V6 => u128::MAX,
        }
    }
}

/// A parsed CIDR range such as `10.144.0.0/20`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    pub family: IpFamily,
    pub address: u128,
    pub prefix: u8,
}

impl Cidr {
    /// Parses `address/prefix`. The address may have host bits set.
    pub fn parse(source: &str) -> Result<Self, CidrError> {
        let invalid = || CidrError::InvalidFormat(source.to_string());
        let (address, prefix) = source.trim().split_once('/').ok_or_else(invalid)?;
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;

        let (family, address) = if address.contains(':') {
            let ip: Ipv6Addr = address.parse().map_err(|_| invalid())?;
            (IpFamily::V6, u128::from(ip))
        } else {
            let ip: Ipv4Addr = address.parse().map_err(|_| invalid())?;
            (IpFamily::V4, u32::from(ip) as u128)
        };
        if prefix > family.bits() {
            return Err(CidrError::InvalidLength {
                length: prefix as i64,
                min: 0,
                max: family.bits(),
            });
        }
        Ok(Self {
            family,
            address,
            prefix,
        })
    }

    fn host_bits(&self) -> u32 {
        (self.family.bits() - self.prefix) as u32
    }

    pub fn netmask(&self) -> u128 {
        let host = self.host_bits();
        if host >= self.family.bits() as u32 {
            return 0;
        }
        self.family.max() & !((1u128 << host) - 1)
    }

    pub fn network(&self) -> u128 {
        self.address & self.netmask()
    }

    /// The last address of the range.
    fn last(&self) -> u128 {
        self.network() | (self.family.max() & !self.netmask())
    }

    /// The broadcast address. IPv6 has none.
    pub fn broadcast(&self) -> Option<u128> {
        match self.family {
            IpFamily::V4 => Some(self.last()),
            IpFamily::V6 => None,
        }
    }

    /// IPv4 ranges larger than two addresses reserve the network and
    /// broadcast addresses.
    fn reserves_ends(&self) -> bool {
        self.family == IpFamily::V4 && self.prefix < 31
    }

    pub fn first_usable(&self) -> u128 {
        if self.reserves_ends() {
            self.network() + 1
        } else {
            self.network()
        }
    }

    pub fn last_usable(&self) -> u128 {
        if self.reserves_ends() {
            self.last() - 1
        } else {
            self.last()
        }
    }

    /// Returns subnet `index` of length `new_prefix`, counting from the
    /// network address of this range. The index may step past the end of the
    /// range, but not past the end of the address space.
    pub fn subnet(&self, new_prefix: i64, index: i64) -> Result<Cidr, CidrError> {
        let bits = self.family.bits();
        if new_prefix < self.prefix as i64 || new_prefix > bits as i64 {
            return Err(CidrError::InvalidLength {
                length: new_prefix,
                min: self.prefix,
                max: bits,
            });
        }
        let new_prefix = new_prefix as u8;
        let out_of_range = || CidrError::OutOfRange {
            index,
            range: self.to_string(),
        };
        let index = u128::try_from(index).map_err(|_| out_of_range())?;
        let shift = (bits - new_prefix) as u32;
        let offset = if shift >= 128 {
            Some(0)
        } else {
            index.checked_mul(1u128 << shift)
        };
        let address = offset
            .and_then(|offset| self.network().checked_add(offset))
            .filter(|address| *address <= self.family.max())
            .ok_or_else(out_of_range)?;
        Ok(Cidr {
            family: self.family,
            address,
            prefix: new_prefix,
        })
    }

    /// Returns host `index` of this range, counting from the first address
    /// after the network address.
    pub fn host(&self, index: i64) -> Result<u128, CidrError> {
        let out_of_range = || CidrError::OutOfRange {
            index,
            range: self.to_string(),
        };
        let index = u128::try_from(index).map_err(|_| out_of_range())?;
        let first = if self.family == IpFamily::V6 || self.reserves_ends() {
            self.network() + 1
        } else {
            self.network()
        };
        let host = first.checked_add(index).ok_or_else(out_of_range)?;
        if host > self.last_usable() {
            return Err(out_of_range());
        }
        Ok(host)
    }

    /// Formats an address of this range's family.
    pub fn format_address(&self, address: u128) -> String {
        match self.family {
            IpFamily::V4 => Ipv4Addr::from(address as u32).to_string(),
            IpFamily::V6 => format_ipv6(address),
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.format_address(self.network()), self.prefix)
    }
}

/// Formats an IPv6 address, compressing the longest run of two or more zero
/// groups (the first, on a tie) to `::`.
pub fn format_ipv6(address: u128) -> String {
    let groups: Vec<u16> = (0..8)
        .map(|i| (address >> (112 - i * 16)) as u16)
        .collect();

    let mut best = (0usize, 0usize);
    let mut run = (0usize, 0usize);
    for (i, group) in groups.iter().enumerate() {
        if *group == 0 {
            if run.1 == 0 {
                run.0 = i;
            }
            run.1 += 1;
            if run.1 > best.1 {
                best = run;
            }
        } else {
            run.1 = 0;
        }
    }

    let hex = |groups: &[u16]| {
        groups
            .iter()
            .map(|g| format!("{:x}", g))
            .collect::<Vec<_>>()
            .join(":")
    };
    if best.1 < 2 {
        return hex(&groups);
    }
    format!(
        "{}::{}",
        hex(&groups[..best.0]),
        hex(&groups[best.0 + best.1..])
    )
}

//! Pure IPv6 subnet and address-range arithmetic. No I/O, no floating
//! point: every computation is exact 128-bit integer math over
//! [`Ipv6Addr`], using `u128::from`/`Ipv6Addr::from` round-trips so byte
//! order is always network order by construction.

use std::net::Ipv6Addr;

use crate::error::ArithmeticError;
use crate::prefix::types::{host_mask, mask_network, Prefix};

/// Overlays the host bits of `suffix` onto the network bits of `prefix`.
/// Fails never for well-formed inputs — callers validate suffix
/// parseability (e.g. via [`str::parse`]) separately.
pub fn combine_suffix(prefix: &Prefix, suffix: Ipv6Addr) -> Ipv6Addr {
    let host_bits = 128u32 - prefix.length as u32;
    let mask = host_mask(host_bits);
    let network_bits = u128::from(prefix.network) & !mask;
    let host_bits_val = u128::from(suffix) & mask;
    Ipv6Addr::from(network_bits | host_bits_val)
}

/// A CIDR carved from a parent prefix: `offset` sibling subnets of size
/// `2^(128-prefixLength)`, measured from `base`'s network address.
#[derive(Debug, Clone, Copy)]
pub struct SubnetSpec {
    pub offset: u64,
    pub prefix_length: u8,
}

pub fn calculate_subnet(base: &Prefix, spec: SubnetSpec) -> Result<Prefix, ArithmeticError> {
    if spec.prefix_length > 128 {
        return Err(ArithmeticError::SubnetLengthInvalid(spec.prefix_length));
    }
    if spec.prefix_length < base.length {
        return Err(ArithmeticError::SubnetTooShort {
            requested: spec.prefix_length,
            parent: base.length,
        });
    }

    let subnet_host_bits = 128u32 - spec.prefix_length as u32;
    let subnet_size = if subnet_host_bits >= 128 {
        u128::MAX
    } else {
        1u128 << subnet_host_bits
    };

    let base_start = u128::from(base.network);
    let delta = (spec.offset as u128).checked_mul(subnet_size).ok_or_else(|| {
        ArithmeticError::SubnetOutsideParent {
            offset: spec.offset,
            parent: base.to_cidr_string(),
        }
    })?;
    let network = base_start.checked_add(delta).ok_or_else(|| {
        ArithmeticError::SubnetOutsideParent {
            offset: spec.offset,
            parent: base.to_cidr_string(),
        }
    })?;

    let base_host_bits = 128u32 - base.length as u32;
    let base_end = base_start | host_mask(base_host_bits);
    let subnet_end = network.checked_add(subnet_size.saturating_sub(1)).ok_or_else(|| {
        ArithmeticError::SubnetOutsideParent {
            offset: spec.offset,
            parent: base.to_cidr_string(),
        }
    })?;

    if network < base_start || subnet_end > base_end {
        return Err(ArithmeticError::SubnetOutsideParent {
            offset: spec.offset,
            parent: base.to_cidr_string(),
        });
    }

    Ok(Prefix {
        network: mask_network(Ipv6Addr::from(network), spec.prefix_length),
        length: spec.prefix_length,
        valid_lifetime: base.valid_lifetime,
        preferred_lifetime: base.preferred_lifetime,
        source: base.source,
        received_at: base.received_at,
    })
}

/// A closed, endpoint-inclusive address range carved from a parent prefix
/// by overlaying two suffix literals onto its host bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: Ipv6Addr,
    pub end: Ipv6Addr,
}

impl AddressRange {
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        let v = u128::from(addr);
        u128::from(self.start) <= v && v <= u128::from(self.end)
    }
}

pub fn calculate_address_range(
    base: &Prefix,
    start_suffix: &str,
    end_suffix: &str,
) -> Result<AddressRange, ArithmeticError> {
    let start_addr: Ipv6Addr = start_suffix
        .parse()
        .map_err(|_| ArithmeticError::SuffixParse(start_suffix.to_string()))?;
    let end_addr: Ipv6Addr = end_suffix
        .parse()
        .map_err(|_| ArithmeticError::SuffixParse(end_suffix.to_string()))?;

    let start = combine_suffix(base, start_addr);
    let end = combine_suffix(base, end_addr);

    if u128::from(start) > u128::from(end) {
        return Err(ArithmeticError::RangeInverted {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    if !base.contains(start) {
        return Err(ArithmeticError::RangeOutsideParent {
            address: start.to_string(),
            parent: base.to_cidr_string(),
        });
    }
    if !base.contains(end) {
        return Err(ArithmeticError::RangeOutsideParent {
            address: end.to_string(),
            parent: base.to_cidr_string(),
        });
    }

    Ok(AddressRange { start, end })
}

/// The smallest CIDR whose network/length pair contains the closed
/// interval `[start, end]`. Used only for the approximate
/// `status.addressRanges[].cidr` display field — precision lives in the
/// `start`/`end` pair, never in this approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub network: Ipv6Addr,
    pub length: u8,
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

impl Cidr {
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        let host_bits = 128u32 - self.length as u32;
        let mask = host_mask(host_bits);
        let start = u128::from(self.network);
        let end = start | mask;
        let v = u128::from(addr);
        start <= v && v <= end
    }
}

pub fn range_to_cidr(start: Ipv6Addr, end: Ipv6Addr) -> Cidr {
    let s = u128::from(start);
    let e = u128::from(end);
    let diff = s ^ e;
    let common_bits = diff.leading_zeros();
    let host_bits = 128 - common_bits;
    let mask = host_mask(host_bits);
    let network = Ipv6Addr::from(s & !mask);
    Cidr {
        network,
        length: common_bits as u8,
    }
}

/// Endpoint-inclusive address count. Returns `0` to signal "too large to
/// represent in 64 bits" rather than panicking or truncating silently.
pub fn address_count(start: Ipv6Addr, end: Ipv6Addr) -> u64 {
    let s = u128::from(start);
    let e = u128::from(end);
    if e < s {
        return 0;
    }
    let count = match (e - s).checked_add(1) {
        Some(count) => count,
        None => return 0,
    };
    u64::try_from(count).unwrap_or(0)
}

use std::fmt;
use std::net::Ipv6Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a [`Prefix`] was learned from. Stable for a receiver's lifetime,
/// but callers that log or persist a source should record it per-event —
/// a composite receiver's active source can change as fallback engages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    Dhcpv6Pd,
    RouterAdvertisement,
    Static,
    Unknown,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceTag::Dhcpv6Pd => "dhcpv6-pd",
            SourceTag::RouterAdvertisement => "router-advertisement",
            SourceTag::Static => "static",
            SourceTag::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An IPv6 network: an address and bit length, a lease-style lifetime pair,
/// a source tag, and the wall-clock time it was received. Immutable once
/// constructed — a changed prefix is a new value, never a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub network: Ipv6Addr,
    pub length: u8,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub source: SourceTag,
    pub received_at: DateTime<Utc>,
}

impl Prefix {
    /// Constructs a prefix, masking `address` down to its network bits so
    /// `network` is always canonical for `length`.
    pub fn new(
        address: Ipv6Addr,
        length: u8,
        valid_lifetime: u32,
        preferred_lifetime: u32,
        source: SourceTag,
        received_at: DateTime<Utc>,
    ) -> Self {
        let network = mask_network(address, length);
        Self {
            network,
            length,
            valid_lifetime,
            preferred_lifetime,
            source,
            received_at,
        }
    }

    /// The first address fully contained in this prefix (the network
    /// address itself).
    pub fn start(&self) -> Ipv6Addr {
        self.network
    }

    /// The last address fully contained in this prefix.
    pub fn end(&self) -> Ipv6Addr {
        let host_bits = 128u32 - self.length as u32;
        let mask = host_mask(host_bits);
        Ipv6Addr::from(u128::from(self.network) | mask)
    }

    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        let v = u128::from(addr);
        u128::from(self.start()) <= v && v <= u128::from(self.end())
    }

    pub fn to_cidr_string(&self) -> String {
        format!("{}/{}", self.network, self.length)
    }

    pub fn network_mask_matches(&self, network: Ipv6Addr, length: u8) -> bool {
        self.network == network && self.length == length
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_cidr_string())
    }
}

pub(crate) fn host_mask(host_bits: u32) -> u128 {
    if host_bits == 0 {
        0
    } else if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

pub(crate) fn mask_network(address: Ipv6Addr, length: u8) -> Ipv6Addr {
    let host_bits = 128u32 - length.min(128) as u32;
    let mask = host_mask(host_bits);
    Ipv6Addr::from(u128::from(address) & !mask)
}

/// One emission from a [`crate::receiver::Receiver`]'s event stream.
///
/// Sequencing: for a single receiver, `Acquired` precedes any
/// `Renewed`/`Changed`/`Expired` for that prefix; `Changed` implies the
/// previous prefix is no longer current; `Renewed` means same network, new
/// lifetime.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    Acquired(Prefix),
    Renewed(Prefix),
    Changed(Prefix),
    Expired,
    Failed(String),
}

impl ReceiverEvent {
    pub fn prefix(&self) -> Option<&Prefix> {
        match self {
            ReceiverEvent::Acquired(p) | ReceiverEvent::Renewed(p) | ReceiverEvent::Changed(p) => {
                Some(p)
            }
            ReceiverEvent::Expired | ReceiverEvent::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReceiverEvent::Acquired(_) | ReceiverEvent::Renewed(_) | ReceiverEvent::Changed(_)
        )
    }
}

/// Diffs a newly observed prefix against the previously current one and
/// classifies the transition, per spec §3's event sequencing rules. Shared
/// by every receiver variant so `acquired`/`renewed`/`changed` discrimination
/// is identical regardless of source.
pub fn classify_update(previous: Option<&Prefix>, new: Prefix) -> ReceiverEvent {
    match previous {
        None => ReceiverEvent::Acquired(new),
        Some(prev) if prev.network_mask_matches(new.network, new.length) => {
            ReceiverEvent::Renewed(new)
        }
        Some(_) => ReceiverEvent::Changed(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn masks_network_to_canonical_form() {
        let p = Prefix::new(
            "2001:db8:1::ffff".parse().unwrap(),
            48,
            3600,
            1800,
            SourceTag::Static,
            now(),
        );
        assert_eq!(p.network, "2001:db8:1::".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn start_and_end_bracket_the_prefix() {
        let p = Prefix::new(
            "2001:db8::".parse().unwrap(),
            64,
            0,
            0,
            SourceTag::Unknown,
            now(),
        );
        assert_eq!(p.start(), "2001:db8::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(
            p.end(),
            "2001:db8::ffff:ffff:ffff:ffff".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn classify_update_discriminates_acquired_renewed_changed() {
        let a = Prefix::new("2001:db8:1::".parse().unwrap(), 48, 3600, 1800, SourceTag::Unknown, now());
        let a_renewed = Prefix::new("2001:db8:1::".parse().unwrap(), 48, 7200, 3600, SourceTag::Unknown, now());
        let b = Prefix::new("2001:db8:2::".parse().unwrap(), 48, 3600, 1800, SourceTag::Unknown, now());

        assert!(matches!(classify_update(None, a.clone()), ReceiverEvent::Acquired(_)));
        assert!(matches!(classify_update(Some(&a), a_renewed), ReceiverEvent::Renewed(_)));
        assert!(matches!(classify_update(Some(&a), b), ReceiverEvent::Changed(_)));
    }
}

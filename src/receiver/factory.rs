//! Deterministic receiver construction from a declarative acquisition spec
//! (spec §4.B4).

use serde::{Deserialize, Serialize};

use crate::error::ReceiverError;
use crate::receiver::composite::CompositeReceiver;
use crate::receiver::dhcpv6::Dhcpv6PdReceiver;
use crate::receiver::ra::RaReceiver;
use crate::receiver::Receiver;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dhcpv6PdSpec {
    pub interface: String,
    #[serde(default)]
    pub requested_prefix_length: Option<u8>,
}

fn default_ra_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterAdvertisementSpec {
    pub interface: String,
    #[serde(default = "default_ra_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionSpec {
    #[serde(default)]
    pub dhcpv6pd: Option<Dhcpv6PdSpec>,
    #[serde(default)]
    pub router_advertisement: Option<RouterAdvertisementSpec>,
}

/// Builds the receiver tree per the table in spec §4.B4.
///
/// `mac` is the interface MAC used for the DHCPv6-PD client's DUID-LL;
/// irrelevant when no DHCPv6-PD block is present.
pub fn build_receiver(spec: &AcquisitionSpec, mac: [u8; 6]) -> Result<Receiver, ReceiverError> {
    let ra_enabled = spec
        .router_advertisement
        .as_ref()
        .map(|r| r.enabled)
        .unwrap_or(false);

    match (&spec.dhcpv6pd, &spec.router_advertisement) {
        (Some(pd), Some(ra)) if ra_enabled => {
            let primary = build_dhcpv6pd(pd, mac)?;
            let fallback = build_ra(ra)?;
            Ok(Receiver::Composite(Box::new(CompositeReceiver::new(primary, fallback))))
        }
        (Some(pd), _) => build_dhcpv6pd(pd, mac),
        (None, Some(ra)) if ra_enabled => build_ra(ra),
        _ => Err(ReceiverError::NoAcquisitionConfigured),
    }
}

fn build_dhcpv6pd(spec: &Dhcpv6PdSpec, mac: [u8; 6]) -> Result<Receiver, ReceiverError> {
    if spec.interface.is_empty() {
        return Err(ReceiverError::MissingInterface("dhcpv6-pd"));
    }
    Ok(Receiver::Dhcpv6Pd(Dhcpv6PdReceiver::new(
        spec.interface.clone(),
        spec.requested_prefix_length,
        mac,
    )))
}

fn build_ra(spec: &RouterAdvertisementSpec) -> Result<Receiver, ReceiverError> {
    if spec.interface.is_empty() {
        return Err(ReceiverError::MissingInterface("router advertisement"));
    }
    Ok(Receiver::Ra(RaReceiver::new(spec.interface.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0, 1, 2, 3, 4, 5];

    #[test]
    fn neither_configured_fails() {
        let spec = AcquisitionSpec::default();
        assert!(matches!(
            build_receiver(&spec, MAC),
            Err(ReceiverError::NoAcquisitionConfigured)
        ));
    }

    #[test]
    fn only_dhcpv6pd_builds_dhcpv6pd_receiver() {
        let spec = AcquisitionSpec {
            dhcpv6pd: Some(Dhcpv6PdSpec { interface: "eth0".to_string(), requested_prefix_length: None }),
            router_advertisement: None,
        };
        assert!(matches!(build_receiver(&spec, MAC), Ok(Receiver::Dhcpv6Pd(_))));
    }

    #[test]
    fn only_dhcpv6pd_with_empty_interface_fails() {
        let spec = AcquisitionSpec {
            dhcpv6pd: Some(Dhcpv6PdSpec { interface: String::new(), requested_prefix_length: None }),
            router_advertisement: None,
        };
        assert!(matches!(build_receiver(&spec, MAC), Err(ReceiverError::MissingInterface(_))));
    }

    #[test]
    fn only_ra_enabled_builds_ra_receiver() {
        let spec = AcquisitionSpec {
            dhcpv6pd: None,
            router_advertisement: Some(RouterAdvertisementSpec { interface: "eth0".to_string(), enabled: true }),
        };
        assert!(matches!(build_receiver(&spec, MAC), Ok(Receiver::Ra(_))));
    }

    #[test]
    fn ra_present_but_disabled_with_no_pd_fails() {
        let spec = AcquisitionSpec {
            dhcpv6pd: None,
            router_advertisement: Some(RouterAdvertisementSpec { interface: "eth0".to_string(), enabled: false }),
        };
        assert!(matches!(
            build_receiver(&spec, MAC),
            Err(ReceiverError::NoAcquisitionConfigured)
        ));
    }

    #[test]
    fn both_present_and_ra_enabled_builds_composite() {
        let spec = AcquisitionSpec {
            dhcpv6pd: Some(Dhcpv6PdSpec { interface: "eth0".to_string(), requested_prefix_length: None }),
            router_advertisement: Some(RouterAdvertisementSpec { interface: "eth1".to_string(), enabled: true }),
        };
        assert!(matches!(build_receiver(&spec, MAC), Ok(Receiver::Composite(_))));
    }

    #[test]
    fn dhcpv6pd_present_ra_disabled_builds_dhcpv6pd_alone() {
        let spec = AcquisitionSpec {
            dhcpv6pd: Some(Dhcpv6PdSpec { interface: "eth0".to_string(), requested_prefix_length: None }),
            router_advertisement: Some(RouterAdvertisementSpec { interface: "eth1".to_string(), enabled: false }),
        };
        assert!(matches!(build_receiver(&spec, MAC), Ok(Receiver::Dhcpv6Pd(_))));
    }
}

//! HA service controller (spec §4.E): rewrites LoadBalancer service
//! annotations so both the current and historical prefix IPs stay
//! reachable while DNS cuts over.

use std::net::Ipv6Addr;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::config::RequeueConfig;
use crate::prefix::{self, Prefix};
use crate::store::{
    AddressRangeSpec, LbService, Store, SubnetSpecDecl, TransitionMode,
    ADDRESS_RANGE_ANNOTATION, CILIUM_IPS_ANNOTATION, EXTERNAL_DNS_TARGET_ANNOTATION,
    LAST_SYNC_ANNOTATION, NAME_ANNOTATION, SERVICE_ADDRESS_RANGE_ANNOTATION,
    SERVICE_SUBNET_ANNOTATION, SUBNET_ANNOTATION,
};

enum Mode<'a> {
    AddressRange(&'a str),
    Subnet(&'a str),
    Verbatim,
}

fn select_mode(annotations: &std::collections::HashMap<String, String>) -> Mode<'_> {
    for annotation in [SERVICE_ADDRESS_RANGE_ANNOTATION, ADDRESS_RANGE_ANNOTATION] {
        match annotations.get(annotation) {
            Some(v) if !v.is_empty() => return Mode::AddressRange(v.as_str()),
            _ => {}
        }
    }
    for annotation in [SERVICE_SUBNET_ANNOTATION, SUBNET_ANNOTATION] {
        match annotations.get(annotation) {
            Some(v) if !v.is_empty() => return Mode::Subnet(v.as_str()),
            _ => {}
        }
    }
    Mode::Verbatim
}

fn pick_ipv6_ingress(ips: &[String]) -> Option<Ipv6Addr> {
    ips.iter()
        .filter_map(|s| s.parse::<Ipv6Addr>().ok())
        .next()
        .or_else(|| ips.first().and_then(|s| s.parse().ok()))
}

fn range_start(base: &Prefix, spec: &AddressRangeSpec) -> Option<Ipv6Addr> {
    prefix::calculate_address_range(base, &spec.start_suffix, &spec.end_suffix)
        .ok()
        .map(|r| r.start)
}

fn subnet_network(base: &Prefix, spec: &SubnetSpecDecl) -> Option<Ipv6Addr> {
    prefix::calculate_subnet(base, prefix::SubnetSpec { offset: spec.offset, prefix_length: spec.prefix_length })
        .ok()
        .map(|s| s.network)
}

/// 128-bit unsigned difference `minuend - subtrahend`, failing on borrow.
fn offset_between(minuend: Ipv6Addr, subtrahend: Ipv6Addr) -> Option<u128> {
    u128::from(minuend).checked_sub(u128::from(subtrahend))
}

/// Reconciles the HA annotations of the service named `service_name` once,
/// per spec §4.E. Returns the requeue delay; `None` means no further
/// action is needed this round.
pub fn reconcile_once(
    service_name: &str,
    store: &dyn Store,
    requeue: &RequeueConfig,
) -> Option<Duration> {
    let Some(mut service) = store.get_service(service_name) else {
        return None;
    };

    if !service.is_load_balancer {
        return None;
    }

    let Some(prefix_name) = service.annotations.get(NAME_ANNOTATION).cloned() else {
        return None;
    };

    let Some(prefix_res) = store.get_prefix(&prefix_name) else {
        return Some(Duration::from_secs(requeue.ha_sync_failure_secs));
    };

    if prefix_res.spec.transition.mode != TransitionMode::Ha {
        return None; // non-HA mode: never mutate.
    }

    let Some(current_prefix) = prefix_res.status.current_prefix.clone() else {
        return Some(Duration::from_secs(requeue.ha_sync_failure_secs));
    };

    // Step 1.
    let Some(current_ip) = pick_ipv6_ingress(&service.ingress_ips) else {
        return Some(Duration::from_secs(requeue.ha_sync_failure_secs));
    };

    // Step 2 & 3.
    let mode = select_mode(&service.annotations);
    let offset = match &mode {
        Mode::AddressRange(name) => {
            let spec = prefix_res.spec.address_ranges.iter().find(|r| r.name == *name)?;
            let start = range_start(&current_prefix, spec)?;
            offset_between(current_ip, start)?
        }
        Mode::Subnet(name) => {
            let spec = prefix_res.spec.subnets.iter().find(|s| s.name == *name)?;
            let network = subnet_network(&current_prefix, spec)?;
            offset_between(current_ip, network)?
        }
        Mode::Verbatim => 0,
    };

    // Step 4: historical IPs, newest first, capped at maxPrefixHistory.
    let max_history = prefix_res.spec.transition.max_prefix_history as usize;
    let mut historical_ips = Vec::new();
    if !matches!(mode, Mode::Verbatim) {
        for entry in prefix_res.status.history.iter().rev().take(max_history) {
            let base = match &mode {
                Mode::AddressRange(name) => prefix_res
                    .spec
                    .address_ranges
                    .iter()
                    .find(|r| r.name == *name)
                    .and_then(|spec| range_start(&entry.prefix, spec)),
                Mode::Subnet(name) => prefix_res
                    .spec
                    .subnets
                    .iter()
                    .find(|s| s.name == *name)
                    .and_then(|spec| subnet_network(&entry.prefix, spec)),
                Mode::Verbatim => None,
            };

            let Some(base) = base else {
                debug!("skipping historical HA entry for {}: base address unavailable", service_name);
                continue;
            };

            // Open question (spec §9): a historical range smaller than the
            // current one may place this IP outside its own bounds. We
            // emit it as computed rather than clamp or drop — see DESIGN.md.
            match u128::from(base).checked_add(offset) {
                Some(candidate) => historical_ips.push(Ipv6Addr::from(candidate)),
                None => debug!("skipping historical HA entry for {}: offset overflowed 128 bits", service_name),
            }
        }
    }

    // Step 5.
    let mut ip_list = vec![current_ip.to_string()];
    ip_list.extend(historical_ips.iter().map(Ipv6Addr::to_string));

    let new_cilium_ips = ip_list.join(",");
    let new_target = current_ip.to_string();

    // Step 6: only write when something actually changes.
    let unchanged = service.annotations.get(CILIUM_IPS_ANNOTATION) == Some(&new_cilium_ips)
        && service.annotations.get(EXTERNAL_DNS_TARGET_ANNOTATION) == Some(&new_target);
    if unchanged {
        return None;
    }

    service.annotations.insert(CILIUM_IPS_ANNOTATION.to_string(), new_cilium_ips);
    service.annotations.insert(EXTERNAL_DNS_TARGET_ANNOTATION.to_string(), new_target);
    service.annotations.insert(LAST_SYNC_ANNOTATION.to_string(), Utc::now().to_rfc3339());

    match store.put_service(service) {
        Ok(_) => None,
        Err(_) => Some(Duration::from_secs(requeue.ha_sync_failure_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::SourceTag;
    use crate::store::memory::InMemoryStore;
    use crate::store::{
        DynamicPrefix, DynamicPrefixSpec, DynamicPrefixStatus, HistoryEntry, HistoryState,
        TransitionConfig,
    };
    use std::collections::HashMap;

    fn ha_prefix() -> DynamicPrefix {
        let mut res = DynamicPrefix::new("home", DynamicPrefixSpec::default());
        res.spec.transition = TransitionConfig { mode: TransitionMode::Ha, max_prefix_history: 2 };
        res.spec.address_ranges.push(AddressRangeSpec {
            name: "lb".to_string(),
            start_suffix: "::f000:0:0:0".to_string(),
            end_suffix: "::ffff:ffff:ffff:ffff".to_string(),
        });

        let current = Prefix::new("2001:db8:1::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now());
        let historical = Prefix::new("2001:db8:2::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now());
        res.status = DynamicPrefixStatus {
            current_prefix: Some(current),
            prefix_source: Some(SourceTag::Dhcpv6Pd),
            lease_expires_at: None,
            address_ranges: Vec::new(),
            subnets: Vec::new(),
            history: vec![HistoryEntry {
                prefix: historical,
                acquired_at: Utc::now(),
                deprecated_at: Some(Utc::now()),
                state: HistoryState::Draining,
            }],
            conditions: Vec::new(),
        };
        res
    }

    fn ha_service() -> LbService {
        let mut annotations = HashMap::new();
        annotations.insert(NAME_ANNOTATION.to_string(), "home".to_string());
        annotations.insert(ADDRESS_RANGE_ANNOTATION.to_string(), "lb".to_string());
        LbService {
            name: "frontend".to_string(),
            is_load_balancer: true,
            annotations,
            ingress_ips: vec!["2001:db8:1:0:f000::10".to_string()],
            resource_version: 0,
        }
    }

    #[test]
    fn s3_ha_transition_scenario() {
        let store = InMemoryStore::new();
        store.put_prefix(ha_prefix()).unwrap();
        store.put_service(ha_service()).unwrap();

        let requeue = RequeueConfig::default();
        reconcile_once("frontend", &store, &requeue);

        let service = store.get_service("frontend").unwrap();
        assert_eq!(
            service.annotations.get(CILIUM_IPS_ANNOTATION).unwrap(),
            "2001:db8:1:0:f000::10,2001:db8:2:0:f000::10"
        );
        assert_eq!(
            service.annotations.get(EXTERNAL_DNS_TARGET_ANNOTATION).unwrap(),
            "2001:db8:1:0:f000::10"
        );
    }

    #[test]
    fn non_ha_mode_never_mutates_the_service() {
        let store = InMemoryStore::new();
        let mut res = ha_prefix();
        res.spec.transition.mode = TransitionMode::Simple;
        store.put_prefix(res).unwrap();
        store.put_service(ha_service()).unwrap();

        let requeue = RequeueConfig::default();
        assert_eq!(reconcile_once("frontend", &store, &requeue), None);
        assert!(!store.get_service("frontend").unwrap().annotations.contains_key(CILIUM_IPS_ANNOTATION));
    }

    #[test]
    fn second_run_with_no_change_does_not_write() {
        let store = InMemoryStore::new();
        store.put_prefix(ha_prefix()).unwrap();
        store.put_service(ha_service()).unwrap();

        let requeue = RequeueConfig::default();
        reconcile_once("frontend", &store, &requeue);
        let after_first = store.get_service("frontend").unwrap().resource_version;

        reconcile_once("frontend", &store, &requeue);
        let after_second = store.get_service("frontend").unwrap().resource_version;
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn no_ipv6_ingress_requeues() {
        let store = InMemoryStore::new();
        store.put_prefix(ha_prefix()).unwrap();
        let mut service = ha_service();
        service.ingress_ips = vec!["10.0.0.1".to_string()];
        store.put_service(service).unwrap();

        let requeue = RequeueConfig::default();
        let result = reconcile_once("frontend", &store, &requeue);
        assert_eq!(result, Some(Duration::from_secs(requeue.ha_sync_failure_secs)));
    }

    #[test]
    fn verbatim_mode_without_annotations_uses_single_ip() {
        let store = InMemoryStore::new();
        store.put_prefix(ha_prefix()).unwrap();
        let mut service = ha_service();
        service.annotations.remove(ADDRESS_RANGE_ANNOTATION);
        store.put_service(service).unwrap();

        let requeue = RequeueConfig::default();
        reconcile_once("frontend", &store, &requeue);
        let service = store.get_service("frontend").unwrap();
        assert_eq!(service.annotations.get(CILIUM_IPS_ANNOTATION).unwrap(), "2001:db8:1:0:f000::10");
    }
}

//! Prefix resource controller (spec §4.C): reconciles one `DynamicPrefix`
//! against its receiver's live truth.

use std::time::Duration;

use chrono::Utc;

use crate::config::RequeueConfig;
use crate::error::StoreError;
use crate::prefix;
use crate::receiver::factory::build_receiver;
use crate::receiver::registry::ReceiverRegistry;
use crate::store::{
    set_condition, AddressRangeStatus, Condition, ConditionStatus, ConditionType, DynamicPrefix,
    HistoryEntry, HistoryState, Store, SubnetStatus, DYNAMIC_PREFIX_FINALIZER,
};

/// Reconciles the `DynamicPrefix` named `name` once, per spec §4.C's
/// ten-step contract. Returns the duration after which the caller should
/// requeue this name, or `None` if no further reconcile is needed (the
/// resource was absent or fully deleted).
pub async fn reconcile_once(
    name: &str,
    store: &dyn Store,
    registry: &ReceiverRegistry,
    requeue: &RequeueConfig,
    mac: [u8; 6],
) -> Result<Option<Duration>, StoreError> {
    // Step 1.
    let Some(mut res) = store.get_prefix(name) else {
        registry.teardown(name).await.ok();
        return Ok(None);
    };

    // Step 2.
    if res.deletion_requested {
        registry.teardown(name).await.ok();
        res.finalizers.retain(|f| f != DYNAMIC_PREFIX_FINALIZER);
        let finalizers_empty = res.finalizers.is_empty();
        let saved = store.put_prefix(res)?;
        if finalizers_empty {
            store.remove_prefix(&saved.name)?;
        }
        return Ok(None);
    }

    // Step 3.
    if !res.has_finalizer() {
        res.finalizers.push(DYNAMIC_PREFIX_FINALIZER.to_string());
        store.put_prefix(res)?;
        return Ok(Some(Duration::ZERO));
    }

    let now = Utc::now();
    let generation = res.generation;

    // Step 4.
    let receiver = match registry
        .ensure_started(name, || build_receiver(&res.spec.acquisition, mac))
        .await
    {
        Ok(r) => r,
        Err(e) => {
            set_condition(
                &mut res.status.conditions,
                ConditionType::PrefixAcquired,
                ConditionStatus::False,
                "ReceiverCreationFailed",
                e.to_string(),
                generation,
                now,
            );
            store.put_prefix(res)?;
            return Ok(Some(Duration::from_secs(requeue.receiver_failure_secs)));
        }
    };

    // Step 5.
    let Some(current) = receiver.current_prefix() else {
        set_condition(
            &mut res.status.conditions,
            ConditionType::PrefixAcquired,
            ConditionStatus::False,
            "WaitingForPrefix",
            "no prefix acquired yet",
            generation,
            now,
        );
        res.status.current_prefix = None;
        store.put_prefix(res)?;
        return Ok(Some(Duration::from_secs(requeue.waiting_for_prefix_secs)));
    };

    // Step 6.
    let max_history = res.spec.transition.max_prefix_history.clamp(1, 10) as usize;
    let network_changed = match &res.status.current_prefix {
        Some(prev) => !prev.network_mask_matches(current.network, current.length),
        None => false,
    };
    if network_changed {
        if let Some(old) = res.status.current_prefix.take() {
            res.status.history.push(HistoryEntry {
                acquired_at: old.received_at,
                prefix: old,
                deprecated_at: Some(now),
                state: HistoryState::Draining,
            });
        }
        while res.status.history.len() > max_history {
            res.status.history.remove(0);
        }
    }

    // Step 7.
    let (address_ranges, ranges_degraded) =
        project_address_ranges(&current, &res.spec.address_ranges);
    let (subnets, subnets_degraded) = project_subnets(&current, &res.spec.subnets);
    let degraded = ranges_degraded || subnets_degraded;

    // Step 8.
    res.status.current_prefix = Some(current.clone());
    res.status.prefix_source = Some(receiver.source());
    res.status.lease_expires_at = if current.valid_lifetime > 0 {
        Some(current.received_at + chrono::Duration::seconds(current.valid_lifetime as i64))
    } else {
        None
    };
    res.status.address_ranges = address_ranges;
    res.status.subnets = subnets;

    // Step 9.
    set_condition(
        &mut res.status.conditions,
        ConditionType::PrefixAcquired,
        ConditionStatus::True,
        "PrefixAcquired",
        format!("acquired {} from {}", current, receiver.source()),
        generation,
        now,
    );
    if degraded {
        set_condition(
            &mut res.status.conditions,
            ConditionType::Degraded,
            ConditionStatus::True,
            "SubnetCalculationFailed",
            "one or more address ranges or subnets failed to compute",
            generation,
            now,
        );
    } else {
        set_condition(
            &mut res.status.conditions,
            ConditionType::Degraded,
            ConditionStatus::False,
            "Healthy",
            "projection succeeded",
            generation,
            now,
        );
    }

    // Step 10.
    store.put_prefix(res.clone())?;
    let requeue_after = match res.status.lease_expires_at {
        Some(expires_at) => {
            let remaining = (expires_at - now).num_seconds().max(0) as u64;
            let eighty_percent = remaining * 4 / 5;
            eighty_percent.clamp(requeue.min_requeue_secs, requeue.max_requeue_secs)
        }
        None => requeue.max_requeue_secs,
    };

    Ok(Some(Duration::from_secs(requeue_after)))
}

fn project_address_ranges(
    base: &prefix::Prefix,
    specs: &[crate::store::AddressRangeSpec],
) -> (Vec<AddressRangeStatus>, bool) {
    let mut out = Vec::with_capacity(specs.len());
    let mut degraded = false;
    for spec in specs {
        match prefix::calculate_address_range(base, &spec.start_suffix, &spec.end_suffix) {
            Ok(range) => {
                let cidr = prefix::range_to_cidr(range.start, range.end);
                out.push(AddressRangeStatus {
                    name: spec.name.clone(),
                    start: range.start,
                    end: range.end,
                    cidr: cidr.to_string(),
                });
            }
            Err(_) => degraded = true,
        }
    }
    (out, degraded)
}

fn project_subnets(
    base: &prefix::Prefix,
    specs: &[crate::store::SubnetSpecDecl],
) -> (Vec<SubnetStatus>, bool) {
    let mut out = Vec::with_capacity(specs.len());
    let mut degraded = false;
    for spec in specs {
        let subnet_spec = prefix::SubnetSpec {
            offset: spec.offset,
            prefix_length: spec.prefix_length,
        };
        match prefix::calculate_subnet(base, subnet_spec) {
            Ok(subnet) => out.push(SubnetStatus {
                name: spec.name.clone(),
                cidr: subnet.to_cidr_string(),
            }),
            Err(_) => degraded = true,
        }
    }
    (out, degraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::SourceTag;
    use crate::receiver::{MockReceiver, Receiver};
    use crate::store::memory::InMemoryStore;
    use crate::store::{AddressRangeSpec, DynamicPrefixSpec, SubnetSpecDecl, TransitionConfig, TransitionMode};
    use std::sync::Arc;

    const MAC: [u8; 6] = [2, 0, 0, 0, 0, 1];

    fn spec_with_ranges() -> DynamicPrefixSpec {
        DynamicPrefixSpec {
            acquisition: Default::default(),
            address_ranges: vec![AddressRangeSpec {
                name: "lb".to_string(),
                start_suffix: "::f000:0:0:0".to_string(),
                end_suffix: "::ffff:ffff:ffff:ffff".to_string(),
            }],
            subnets: Vec::new(),
            transition: TransitionConfig { mode: TransitionMode::Simple, max_prefix_history: 2 },
        }
    }

    async fn seed_and_start_mock(store: &InMemoryStore, registry: &ReceiverRegistry, name: &str, spec: DynamicPrefixSpec) -> Arc<MockReceiver> {
        let mut res = DynamicPrefix::new(name, spec);
        res.finalizers.push(DYNAMIC_PREFIX_FINALIZER.to_string());
        store.put_prefix(res).unwrap();

        let mock = MockReceiver::new(SourceTag::Dhcpv6Pd);
        registry
            .ensure_started(name, || Ok(Receiver::Mock(mock.clone())))
            .await
            .unwrap();
        mock
    }

    #[tokio::test]
    async fn adds_finalizer_before_doing_anything_else() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        store.put_prefix(DynamicPrefix::new("home", spec_with_ranges())).unwrap();

        let requeue = RequeueConfig::default();
        let result = reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();
        assert_eq!(result, Some(Duration::ZERO));
        assert!(store.get_prefix("home").unwrap().has_finalizer());
    }

    #[tokio::test]
    async fn waits_for_prefix_when_receiver_has_none() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        seed_and_start_mock(&store, &registry, "home", spec_with_ranges()).await;

        let requeue = RequeueConfig::default();
        let result = reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();
        assert_eq!(result, Some(Duration::from_secs(requeue.waiting_for_prefix_secs)));

        let res = store.get_prefix("home").unwrap();
        let cond = res.status.conditions.iter().find(|c| c.type_ == ConditionType::PrefixAcquired).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, "WaitingForPrefix");
    }

    #[tokio::test]
    async fn s1_acquire_then_change_moves_old_prefix_to_history() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        let mock = seed_and_start_mock(&store, &registry, "home", spec_with_ranges()).await;
        let requeue = RequeueConfig::default();

        mock.push(prefix::Prefix::new("2001:db8:1::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now()));
        reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();

        let res = store.get_prefix("home").unwrap();
        let range = &res.status.address_ranges[0];
        assert_eq!(range.start, "2001:db8:1:0:f000::".parse::<std::net::Ipv6Addr>().unwrap());
        assert_eq!(range.end, "2001:db8:1:0:ffff:ffff:ffff:ffff".parse::<std::net::Ipv6Addr>().unwrap());
        assert!(res.status.history.is_empty());

        mock.push(prefix::Prefix::new("2001:db8:2::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now()));
        reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();

        let res = store.get_prefix("home").unwrap();
        assert_eq!(res.status.history.len(), 1);
        assert_eq!(res.status.history[0].state, HistoryState::Draining);
        assert_eq!(res.status.current_prefix.as_ref().unwrap().network, "2001:db8:2::".parse::<std::net::Ipv6Addr>().unwrap());
    }

    #[tokio::test]
    async fn s5_renewal_does_not_add_history_and_moves_expiry_forward() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        let mock = seed_and_start_mock(&store, &registry, "home", spec_with_ranges()).await;
        let requeue = RequeueConfig::default();

        mock.push(prefix::Prefix::new("2001:db8:1::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now()));
        reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();
        let first_expiry = store.get_prefix("home").unwrap().status.lease_expires_at.unwrap();

        mock.push(prefix::Prefix::new("2001:db8:1::".parse().unwrap(), 48, 7200, 3600, SourceTag::Dhcpv6Pd, Utc::now()));
        reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();

        let res = store.get_prefix("home").unwrap();
        assert!(res.status.history.is_empty());
        assert!(res.status.lease_expires_at.unwrap() > first_expiry);
    }

    #[tokio::test]
    async fn s4_subnet_carving_scenario() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        let spec = DynamicPrefixSpec {
            acquisition: Default::default(),
            address_ranges: Vec::new(),
            subnets: vec![
                SubnetSpecDecl { name: "services".to_string(), offset: 0, prefix_length: 64 },
                SubnetSpecDecl { name: "pods".to_string(), offset: 1, prefix_length: 64 },
                SubnetSpecDecl { name: "loadbalancers".to_string(), offset: 256, prefix_length: 64 },
            ],
            transition: TransitionConfig { mode: TransitionMode::Simple, max_prefix_history: 2 },
        };
        let mock = seed_and_start_mock(&store, &registry, "home", spec).await;
        let requeue = RequeueConfig::default();

        mock.push(prefix::Prefix::new("2001:db8:cafe::".parse().unwrap(), 48, 3600, 1800, SourceTag::Dhcpv6Pd, Utc::now()));
        reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();

        let res = store.get_prefix("home").unwrap();
        let cidrs: Vec<&str> = res.status.subnets.iter().map(|s| s.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["2001:db8:cafe::/64", "2001:db8:cafe:1::/64", "2001:db8:cafe:100::/64"]);
    }

    #[tokio::test]
    async fn absent_resource_tears_down_receiver_and_returns_no_requeue() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        let requeue = RequeueConfig::default();
        let result = reconcile_once("ghost", &store, &registry, &requeue, MAC).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn deletion_in_progress_tears_down_and_removes_resource() {
        let store = InMemoryStore::new();
        let registry = ReceiverRegistry::new();
        seed_and_start_mock(&store, &registry, "home", spec_with_ranges()).await;

        let mut res = store.get_prefix("home").unwrap();
        res.deletion_requested = true;
        store.put_prefix(res).unwrap();

        let requeue = RequeueConfig::default();
        let result = reconcile_once("home", &store, &registry, &requeue, MAC).await.unwrap();
        assert_eq!(result, None);
        assert!(store.get_prefix("home").is_none());
        assert!(registry.get("home").await.is_none());
    }
}

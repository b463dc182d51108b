//! Pool projection controller (spec §4.D): syncs one annotated downstream
//! pool resource to the current and historical blocks of the prefix it
//! references.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::RequeueConfig;
use crate::prefix::{self, Prefix};
use crate::store::{
    set_condition, AddressRangeSpec, ConditionStatus, ConditionType, DynamicPrefix, PoolBlock,
    PoolKind, PoolResource, Store, SubnetSpecDecl, ADDRESS_RANGE_ANNOTATION,
    LAST_SYNC_ANNOTATION, NAME_ANNOTATION, SUBNET_ANNOTATION,
};

enum Mode<'a> {
    AddressRange(&'a str),
    Subnet(&'a str),
    RawPrefix,
}

fn select_mode<'a>(annotations: &'a std::collections::HashMap<String, String>) -> Mode<'a> {
    match annotations.get(ADDRESS_RANGE_ANNOTATION) {
        Some(v) if !v.is_empty() => return Mode::AddressRange(v.as_str()),
        _ => {}
    }
    match annotations.get(SUBNET_ANNOTATION) {
        Some(v) if !v.is_empty() => return Mode::Subnet(v.as_str()),
        _ => {}
    }
    Mode::RawPrefix
}

/// One resolved block: a precise range, or a CIDR-only approximation.
enum Block {
    Range { start: std::net::Ipv6Addr, end: std::net::Ipv6Addr },
    Cidr(String),
}

fn blocks_for_address_range(prefix_res: &DynamicPrefix, range_name: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let spec = prefix_res.spec.address_ranges.iter().find(|r| r.name == range_name);

    if let Some(status) = prefix_res.status.address_ranges.iter().find(|r| r.name == range_name) {
        out.push(Block::Range { start: status.start, end: status.end });
    }

    if let Some(spec) = spec {
        for entry in prefix_res.status.history.iter().rev() {
            match recompute_address_range(&entry.prefix, spec) {
                Ok((start, end)) => out.push(Block::Range { start, end }),
                Err(e) => debug!("skipping historical address range {}: {}", range_name, e),
            }
        }
    }

    out
}

fn recompute_address_range(
    base: &Prefix,
    spec: &AddressRangeSpec,
) -> Result<(std::net::Ipv6Addr, std::net::Ipv6Addr), crate::error::ArithmeticError> {
    let range = prefix::calculate_address_range(base, &spec.start_suffix, &spec.end_suffix)?;
    Ok((range.start, range.end))
}

fn blocks_for_subnet(prefix_res: &DynamicPrefix, subnet_name: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let spec = prefix_res.spec.subnets.iter().find(|s| s.name == subnet_name);

    if let Some(status) = prefix_res.status.subnets.iter().find(|s| s.name == subnet_name) {
        out.push(Block::Cidr(status.cidr.clone()));
    }

    if let Some(spec) = spec {
        for entry in prefix_res.status.history.iter().rev() {
            match recompute_subnet(&entry.prefix, spec) {
                Ok(cidr) => out.push(Block::Cidr(cidr)),
                Err(e) => debug!("skipping historical subnet {}: {}", subnet_name, e),
            }
        }
    }

    out
}

fn recompute_subnet(base: &Prefix, spec: &SubnetSpecDecl) -> Result<String, crate::error::ArithmeticError> {
    let subnet = prefix::calculate_subnet(
        base,
        prefix::SubnetSpec { offset: spec.offset, prefix_length: spec.prefix_length },
    )?;
    Ok(subnet.to_cidr_string())
}

fn blocks_for_raw_prefix(prefix_res: &DynamicPrefix) -> Vec<Block> {
    let mut out = Vec::new();
    if let Some(current) = &prefix_res.status.current_prefix {
        out.push(Block::Cidr(current.to_cidr_string()));
    }
    for entry in prefix_res.status.history.iter().rev() {
        out.push(Block::Cidr(entry.prefix.to_cidr_string()));
    }
    out
}

fn apply_to_lb_ip_pool(blocks: &[Block]) -> Vec<PoolBlock> {
    blocks
        .iter()
        .map(|b| match b {
            Block::Range { start, end } => PoolBlock::Range { start: start.to_string(), stop: end.to_string() },
            Block::Cidr(cidr) => PoolBlock::Cidr { cidr: cidr.clone() },
        })
        .collect()
}

fn apply_to_cidr_group(blocks: &[Block]) -> Vec<String> {
    blocks
        .iter()
        .map(|b| match b {
            Block::Cidr(cidr) => cidr.clone(),
            Block::Range { start, end } => prefix::range_to_cidr(*start, *end).to_string(),
        })
        .collect()
}

/// Writes `PoolsSynced` on the referenced `DynamicPrefix` if its status
/// actually changed, mirroring the pool-write idempotence below so a clean
/// reconcile never bumps the prefix resource's `resource_version`.
fn record_pools_synced(
    store: &dyn Store,
    mut prefix_res: DynamicPrefix,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) {
    let generation = prefix_res.generation;
    let before = prefix_res.status.conditions.clone();
    set_condition(
        &mut prefix_res.status.conditions,
        ConditionType::PoolsSynced,
        status,
        reason,
        message,
        generation,
        Utc::now(),
    );
    if prefix_res.status.conditions != before {
        store.put_prefix(prefix_res).ok();
    }
}

/// Reconciles the downstream pool resource named `pool_name` once, per
/// spec §4.D.
pub fn reconcile_once(
    pool_name: &str,
    store: &dyn Store,
    requeue: &RequeueConfig,
) -> Option<Duration> {
    let Some(mut pool) = store.get_pool(pool_name) else {
        return None;
    };

    let Some(prefix_name) = pool.annotations.get(NAME_ANNOTATION).cloned() else {
        return None;
    };

    let Some(prefix_res) = store.get_prefix(&prefix_name) else {
        return Some(Duration::from_secs(requeue.pool_sync_failure_secs));
    };

    if prefix_res.status.current_prefix.is_none() {
        record_pools_synced(
            store,
            prefix_res,
            ConditionStatus::False,
            "WaitingForPrefix",
            "no prefix acquired yet",
        );
        return Some(Duration::from_secs(requeue.waiting_for_prefix_secs));
    }

    let blocks = match select_mode(&pool.annotations) {
        Mode::AddressRange(name) => blocks_for_address_range(&prefix_res, name),
        Mode::Subnet(name) => blocks_for_subnet(&prefix_res, name),
        Mode::RawPrefix => blocks_for_raw_prefix(&prefix_res),
    };

    match &pool.kind {
        PoolKind::LbIpPool => {
            let new_blocks = apply_to_lb_ip_pool(&blocks);
            if new_blocks == pool.blocks {
                record_pools_synced(
                    store,
                    prefix_res,
                    ConditionStatus::True,
                    "PoolsSynced",
                    format!("pool {} already reflects the current prefix", pool_name),
                );
                return None;
            }
            pool.blocks = new_blocks;
        }
        PoolKind::CidrGroup => {
            let new_cidrs = apply_to_cidr_group(&blocks);
            if new_cidrs == pool.external_cidrs {
                record_pools_synced(
                    store,
                    prefix_res,
                    ConditionStatus::True,
                    "PoolsSynced",
                    format!("pool {} already reflects the current prefix", pool_name),
                );
                return None;
            }
            pool.external_cidrs = new_cidrs;
        }
        PoolKind::Unknown(kind) => {
            warn!("pool {} has unknown kind {}, skipping", pool_name, kind);
            record_pools_synced(
                store,
                prefix_res,
                ConditionStatus::False,
                "UnknownPoolKind",
                format!("pool {} has unknown kind {}", pool_name, kind),
            );
            return None;
        }
    }

    pool.annotations.insert(LAST_SYNC_ANNOTATION.to_string(), Utc::now().to_rfc3339());
    match store.put_pool(pool) {
        Ok(_) => {
            record_pools_synced(
                store,
                prefix_res,
                ConditionStatus::True,
                "PoolsSynced",
                format!("pool {} updated from current prefix", pool_name),
            );
            None
        }
        Err(_) => {
            record_pools_synced(
                store,
                prefix_res,
                ConditionStatus::False,
                "StoreConflict",
                format!("failed to write pool {}", pool_name),
            );
            Some(Duration::from_secs(requeue.pool_sync_failure_secs))
        }
    }
}

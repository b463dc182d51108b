//! The declarative resource store (spec's ambient Component I). Stands in
//! for the external container-orchestration platform's API server: a
//! `Store` trait plus an in-memory implementation used by every controller
//! and by the test suite.

pub mod memory;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::prefix::{Prefix, SourceTag};
use crate::receiver::factory::AcquisitionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionMode {
    Simple,
    Ha,
}

impl Default for TransitionMode {
    fn default() -> Self {
        TransitionMode::Simple
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRangeSpec {
    pub name: String,
    pub start_suffix: String,
    pub end_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpecDecl {
    pub name: String,
    pub offset: u64,
    pub prefix_length: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionConfig {
    #[serde(default)]
    pub mode: TransitionMode,
    #[serde(default = "default_max_prefix_history")]
    pub max_prefix_history: u8,
}

fn default_max_prefix_history() -> u8 {
    2
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            mode: TransitionMode::default(),
            max_prefix_history: default_max_prefix_history(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPrefixSpec {
    #[serde(default)]
    pub acquisition: AcquisitionSpec,
    #[serde(default)]
    pub address_ranges: Vec<AddressRangeSpec>,
    #[serde(default)]
    pub subnets: Vec<SubnetSpecDecl>,
    #[serde(default)]
    pub transition: TransitionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HistoryState {
    Active,
    Draining,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub prefix: Prefix,
    pub acquired_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub state: HistoryState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRangeStatus {
    pub name: String,
    pub start: std::net::Ipv6Addr,
    pub end: std::net::Ipv6Addr,
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    pub name: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    PrefixAcquired,
    PoolsSynced,
    Degraded,
    BgpAdvertisementReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub observed_generation: u64,
    pub last_transition_time: DateTime<Utc>,
}

/// Sets `conditions[type]` to the given status/reason/message, bumping
/// `last_transition_time` only when the status actually changes (spec §3:
/// "`lastTransitionTime` updates only on status change").
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
    observed_generation: u64,
    now: DateTime<Utc>,
) {
    let reason = reason.into();
    let message = message.into();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let changed = existing.status != status;
        existing.status = status;
        existing.reason = reason;
        existing.message = message;
        existing.observed_generation = observed_generation;
        if changed {
            existing.last_transition_time = now;
        }
        return;
    }

    conditions.push(Condition {
        type_,
        status,
        reason,
        message,
        observed_generation,
        last_transition_time: now,
    });
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPrefixStatus {
    pub current_prefix: Option<Prefix>,
    pub prefix_source: Option<SourceTag>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub address_ranges: Vec<AddressRangeStatus>,
    pub subnets: Vec<SubnetStatus>,
    pub history: Vec<HistoryEntry>,
    pub conditions: Vec<Condition>,
}

pub const DYNAMIC_PREFIX_FINALIZER: &str = "dynamic-prefix.io/finalizer";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPrefix {
    pub name: String,
    pub generation: u64,
    pub resource_version: u64,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub finalizers: Vec<String>,
    pub spec: DynamicPrefixSpec,
    #[serde(default)]
    pub status: DynamicPrefixStatus,
}

impl DynamicPrefix {
    pub fn new(name: impl Into<String>, spec: DynamicPrefixSpec) -> Self {
        Self {
            name: name.into(),
            generation: 1,
            resource_version: 0,
            deletion_requested: false,
            finalizers: Vec::new(),
            spec,
            status: DynamicPrefixStatus::default(),
        }
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == DYNAMIC_PREFIX_FINALIZER)
    }
}

/// A downstream pool resource, inspected and mutated only at the field
/// paths documented in spec §3 — consumed as an opaque document otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolResource {
    pub name: String,
    pub kind: PoolKind,
    pub annotations: HashMap<String, String>,
    pub blocks: Vec<PoolBlock>,
    pub external_cidrs: Vec<String>,
    pub resource_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    LbIpPool,
    CidrGroup,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoolBlock {
    Cidr { cidr: String },
    Range { start: String, stop: String },
}

/// A LoadBalancer service, opaque beyond the documented fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbService {
    pub name: String,
    pub is_load_balancer: bool,
    pub annotations: HashMap<String, String>,
    pub ingress_ips: Vec<String>,
    pub resource_version: u64,
}

/// The declarative store's contract. All mutations use optimistic
/// concurrency keyed on `resource_version`; a write against a stale version
/// fails with [`StoreError::Conflict`] and the caller replays the reconcile
/// with fresh state (spec §5).
pub trait Store: Send + Sync {
    fn get_prefix(&self, name: &str) -> Option<DynamicPrefix>;
    fn list_prefixes(&self) -> Vec<DynamicPrefix>;
    fn put_prefix(&self, prefix: DynamicPrefix) -> Result<DynamicPrefix, StoreError>;
    fn request_prefix_deletion(&self, name: &str) -> Result<(), StoreError>;
    fn remove_prefix(&self, name: &str) -> Result<(), StoreError>;

    fn get_pool(&self, name: &str) -> Option<PoolResource>;
    fn list_pools(&self) -> Vec<PoolResource>;
    fn put_pool(&self, pool: PoolResource) -> Result<PoolResource, StoreError>;

    fn get_service(&self, name: &str) -> Option<LbService>;
    fn list_services(&self) -> Vec<LbService>;
    fn put_service(&self, service: LbService) -> Result<LbService, StoreError>;
}

pub const NAME_ANNOTATION: &str = "dynamic-prefix.io/name";
pub const SUBNET_ANNOTATION: &str = "dynamic-prefix.io/subnet";
pub const ADDRESS_RANGE_ANNOTATION: &str = "dynamic-prefix.io/address-range";
pub const SERVICE_SUBNET_ANNOTATION: &str = "dynamic-prefix.io/service-subnet";
pub const SERVICE_ADDRESS_RANGE_ANNOTATION: &str = "dynamic-prefix.io/service-address-range";
pub const LAST_SYNC_ANNOTATION: &str = "dynamic-prefix.io/last-sync";
pub const CILIUM_IPS_ANNOTATION: &str = "lbipam.cilium.io/ips";
pub const EXTERNAL_DNS_TARGET_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/target";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_updates_transition_time_only_on_status_change() {
        let mut conditions = Vec::new();
        let t0 = Utc::now();
        set_condition(&mut conditions, ConditionType::Degraded, ConditionStatus::False, "Healthy", "ok", 1, t0);
        let first_time = conditions[0].last_transition_time;

        let t1 = t0 + chrono::Duration::seconds(30);
        set_condition(&mut conditions, ConditionType::Degraded, ConditionStatus::False, "Healthy", "still ok", 2, t1);
        assert_eq!(conditions[0].last_transition_time, first_time);
        assert_eq!(conditions[0].message, "still ok");

        let t2 = t1 + chrono::Duration::seconds(30);
        set_condition(&mut conditions, ConditionType::Degraded, ConditionStatus::True, "SubnetCalculationFailed", "bad", 3, t2);
        assert_eq!(conditions[0].last_transition_time, t2);
    }
}

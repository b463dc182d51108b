//! Composite primary/fallback receiver with failover (spec §4.B3).

use std::sync::atomic::{AtomicU8, AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::error::ReceiverError;
use crate::prefix::{Prefix, ReceiverEvent, SourceTag};
use crate::receiver::Receiver;

/// Consecutive `failed` events from the primary before failover engages.
const MAX_FAILURES: u8 = 3;

pub struct CompositeReceiver {
    primary: Receiver,
    fallback: Receiver,
    consecutive_failures: AtomicU8,
    in_fallback: AtomicBool,
}

impl CompositeReceiver {
    pub fn new(primary: Receiver, fallback: Receiver) -> Self {
        Self {
            primary,
            fallback,
            consecutive_failures: AtomicU8::new(0),
            in_fallback: AtomicBool::new(false),
        }
    }

    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ReceiverError> {
        Box::pin(self.primary.start(cancel.clone())).await?;
        Box::pin(self.fallback.start(cancel)).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ReceiverError> {
        let primary_result = Box::pin(self.primary.stop()).await;
        let fallback_result = Box::pin(self.fallback.stop()).await;
        primary_result.and(fallback_result)
    }

    fn switch_to_fallback(&self) -> Option<ReceiverEvent> {
        if self.in_fallback.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.fallback
            .current_prefix()
            .map(ReceiverEvent::Acquired)
    }

    /// Drains both children's event streams and applies the failover
    /// policy, returning the events the composite itself should emit.
    pub fn events(&self) -> Vec<ReceiverEvent> {
        let mut out = Vec::new();

        for event in self.primary.events() {
            match &event {
                ReceiverEvent::Failed(_) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    out.push(event);
                    if failures >= MAX_FAILURES {
                        if let Some(synthesized) = self.switch_to_fallback() {
                            out.push(synthesized);
                        }
                    }
                }
                ReceiverEvent::Expired => {
                    if let Some(synthesized) = self.switch_to_fallback() {
                        out.push(synthesized);
                    } else {
                        out.push(event);
                    }
                }
                ReceiverEvent::Acquired(_) | ReceiverEvent::Renewed(_) | ReceiverEvent::Changed(_) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.in_fallback.store(false, Ordering::SeqCst);
                    out.push(event);
                }
            }
        }

        let fallback_events = self.fallback.events();
        if self.in_fallback.load(Ordering::SeqCst) {
            out.extend(fallback_events);
        }

        out
    }

    pub fn current_prefix(&self) -> Option<Prefix> {
        self.primary.current_prefix().or_else(|| self.fallback.current_prefix())
    }

    pub fn source(&self) -> SourceTag {
        if self.in_fallback.load(Ordering::SeqCst) {
            self.fallback.source()
        } else {
            self.primary.source()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::MockReceiver;
    use chrono::Utc;

    fn prefix(net: &str) -> Prefix {
        Prefix::new(net.parse().unwrap(), 48, 3600, 1800, SourceTag::Unknown, Utc::now())
    }

    fn composite() -> (CompositeReceiver, std::sync::Arc<MockReceiver>, std::sync::Arc<MockReceiver>) {
        let primary = MockReceiver::new(SourceTag::Dhcpv6Pd);
        let fallback = MockReceiver::new(SourceTag::RouterAdvertisement);
        let composite = CompositeReceiver::new(Receiver::Mock(primary.clone()), Receiver::Mock(fallback.clone()));
        (composite, primary, fallback)
    }

    #[test]
    fn forwards_primary_success_events_and_resets_failure_counter() {
        let (composite, primary, _fallback) = composite();
        primary.push(prefix("2001:db8:1::"));
        let events = composite.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReceiverEvent::Acquired(_)));
        assert_eq!(composite.consecutive_failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn three_consecutive_failures_trigger_synthesized_acquired_from_fallback() {
        let (composite, primary, fallback) = composite();
        fallback.push(prefix("2001:db8:9::"));
        let _ = composite.events(); // drain fallback's own acquired (not forwarded yet)

        primary.push_failed("e1");
        primary.push_failed("e2");
        primary.push_failed("e3");
        let events = composite.events();

        assert_eq!(events.len(), 4); // three failed + one synthesized acquired
        assert!(matches!(events.last().unwrap(), ReceiverEvent::Acquired(p) if p.network == "2001:db8:9::".parse::<std::net::Ipv6Addr>().unwrap()));
        assert!(composite.in_fallback.load(Ordering::SeqCst));
    }

    #[test]
    fn fewer_than_three_failures_do_not_fail_over() {
        let (composite, primary, _fallback) = composite();
        primary.push_failed("e1");
        primary.push_failed("e2");
        let events = composite.events();
        assert_eq!(events.len(), 2);
        assert!(!composite.in_fallback.load(Ordering::SeqCst));
    }

    #[test]
    fn primary_expiry_switches_to_fallback_when_fallback_has_a_prefix() {
        let (composite, primary, fallback) = composite();
        fallback.push(prefix("2001:db8:9::"));
        let _ = composite.events();

        primary.push_expired();
        let events = composite.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReceiverEvent::Acquired(_)));
    }

    #[test]
    fn primary_expiry_forwards_expired_when_fallback_is_empty() {
        let (composite, primary, _fallback) = composite();
        primary.push_expired();
        let events = composite.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReceiverEvent::Expired));
    }

    #[test]
    fn fallback_events_only_forwarded_once_in_fallback_state() {
        let (composite, _primary, fallback) = composite();
        fallback.push(prefix("2001:db8:9::"));
        let events = composite.events();
        assert!(events.is_empty(), "fallback events suppressed while primary is active");
    }

    #[test]
    fn current_prefix_prefers_primary_over_fallback() {
        let (composite, primary, fallback) = composite();
        fallback.push(prefix("2001:db8:9::"));
        assert_eq!(composite.current_prefix().unwrap().network, "2001:db8:9::".parse::<std::net::Ipv6Addr>().unwrap());

        primary.push(prefix("2001:db8:1::"));
        assert_eq!(composite.current_prefix().unwrap().network, "2001:db8:1::".parse::<std::net::Ipv6Addr>().unwrap());
    }
}

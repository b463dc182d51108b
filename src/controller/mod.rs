//! Controllers C/D/E, plus the single-flight-per-key machinery shared by
//! all three (spec §5).

pub mod ha_controller;
pub mod pool_controller;
pub mod prefix_controller;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Ensures a given resource name is reconciled by at most one worker at a
/// time, while distinct names proceed in parallel. Held behind an `Arc` so
/// a claimed ticket can be moved into a spawned task.
#[derive(Default)]
pub struct InFlightGuard {
    names: Mutex<HashSet<String>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `name` for the duration of the returned ticket, or returns
    /// `None` if another worker already holds it.
    pub fn try_claim(self: &Arc<Self>, name: &str) -> Option<InFlightTicket> {
        let mut names = self.names.lock().expect("in-flight guard poisoned");
        if names.contains(name) {
            None
        } else {
            names.insert(name.to_string());
            Some(InFlightTicket {
                guard: self.clone(),
                name: name.to_string(),
            })
        }
    }
}

pub struct InFlightTicket {
    guard: Arc<InFlightGuard>,
    name: String,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.guard
            .names
            .lock()
            .expect("in-flight guard poisoned")
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_of_the_same_name_is_rejected_while_first_is_held() {
        let guard = Arc::new(InFlightGuard::new());
        let first = guard.try_claim("home").expect("first claim succeeds");
        assert!(guard.try_claim("home").is_none());
        drop(first);
        assert!(guard.try_claim("home").is_some());
    }

    #[test]
    fn distinct_names_claim_independently() {
        let guard = Arc::new(InFlightGuard::new());
        let _a = guard.try_claim("home").unwrap();
        let _b = guard.try_claim("office").unwrap();
    }
}

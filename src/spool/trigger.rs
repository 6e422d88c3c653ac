//! Trigger coalescer (C10): merges redundant delivery-scan requests so a
//! burst of `RCPT`-driven triggers collapses into one scan per cooldown
//! window.

use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    Full,
    Domain(String),
}

#[derive(Default)]
struct CoalescerState {
    pending_full: bool,
    pending_domains: BTreeSet<String>,
}

/// `submit(Full)` absorbs all queued domains; `submit(Domain(d))` is a
/// no-op once `Full` is already pending. `poll()` drains one trigger,
/// preferring `Full`.
#[derive(Default)]
pub struct TriggerCoalescer {
    state: Mutex<CoalescerState>,
}

impl TriggerCoalescer {
    #[must_use]
    pub fn new() -> Self {
        TriggerCoalescer::default()
    }

    pub fn submit(&self, trigger: Option<Trigger>) {
        let mut state = self.state.lock().unwrap();
        match trigger {
            None | Some(Trigger::Full) => {
                state.pending_full = true;
                state.pending_domains.clear();
            }
            Some(Trigger::Domain(d)) => {
                if !state.pending_full {
                    state.pending_domains.insert(d);
                }
            }
        }
    }

    #[must_use]
    pub fn poll(&self) -> Option<Trigger> {
        let mut state = self.state.lock().unwrap();
        if state.pending_full {
            state.pending_full = false;
            return Some(Trigger::Full);
        }
        let d = state.pending_domains.iter().next().cloned();
        if let Some(d) = &d {
            state.pending_domains.remove(d);
        }
        d.map(Trigger::Domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_absorbs_pending_domains() {
        let c = TriggerCoalescer::new();
        c.submit(Some(Trigger::Domain("a.com".into())));
        c.submit(Some(Trigger::Full));
        assert_eq!(c.poll(), Some(Trigger::Full));
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn domain_triggers_ignored_once_full_pending() {
        let c = TriggerCoalescer::new();
        c.submit(Some(Trigger::Full));
        c.submit(Some(Trigger::Domain("a.com".into())));
        assert_eq!(c.poll(), Some(Trigger::Full));
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn distinct_domains_both_delivered() {
        let c = TriggerCoalescer::new();
        c.submit(Some(Trigger::Domain("a.com".into())));
        c.submit(Some(Trigger::Domain("b.com".into())));
        let mut seen = vec![c.poll(), c.poll()];
        seen.sort();
        assert_eq!(
            seen,
            vec![Some(Trigger::Domain("a.com".into())), Some(Trigger::Domain("b.com".into()))]
        );
        assert_eq!(c.poll(), None);
    }

    #[test]
    fn none_means_full() {
        let c = TriggerCoalescer::new();
        c.submit(None);
        assert_eq!(c.poll(), Some(Trigger::Full));
    }
}

//! Scheduler: one priority queue per event kind, keyed on (due_time, id),
//! drained at block start in a fixed kind order, per §4.8.

use std::collections::BTreeSet;

/// The fixed order events are drained in when due times tie. This ordering
/// is part of the consensus rules and must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    Expiration,
    AuctionClearing,
    ForceSettlementMaturity,
    RecurringTransfer,
    InterestCompounding,
    FeedFreshnessDecay,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledEvent {
    pub due_time: i64,
    pub id: String,
    pub kind: EventKind,
}

/// Per-kind priority queues ordered on `(due_time, id)`. Draining walks
/// kinds in the fixed `EventKind` order and, within a kind, ascending
/// `(due_time, id)`.
#[derive(Default, Clone)]
pub struct Scheduler {
    queues: std::collections::BTreeMap<EventKind, BTreeSet<(i64, String)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: EventKind, due_time: i64, id: impl Into<String>) {
        self.queues.entry(kind).or_default().insert((due_time, id.into()));
    }

    pub fn cancel(&mut self, kind: EventKind, due_time: i64, id: &str) {
        if let Some(queue) = self.queues.get_mut(&kind) {
            queue.remove(&(due_time, id.to_string()));
        }
    }

    /// Pops every event of every kind whose `due_time <= block_time`, in
    /// the fixed kind order, ascending `(due_time, id)` within a kind.
    pub fn drain_due(&mut self, block_time: i64) -> Vec<ScheduledEvent> {
        let mut drained = Vec::new();
        for kind in [
            EventKind::Expiration,
            EventKind::AuctionClearing,
            EventKind::ForceSettlementMaturity,
            EventKind::RecurringTransfer,
            EventKind::InterestCompounding,
            EventKind::FeedFreshnessDecay,
        ] {
            let Some(queue) = self.queues.get_mut(&kind) else { continue };
            let due: Vec<(i64, String)> = queue.iter().filter(|(t, _)| *t <= block_time).cloned().collect();
            for item in due {
                queue.remove(&item);
                drained.push(ScheduledEvent {
                    due_time: item.0,
                    id: item.1,
                    kind,
                });
            }
        }
        drained
    }

    pub fn pending_count(&self, kind: EventKind) -> usize {
        self.queues.get(&kind).map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fixed_kind_order_then_by_due_time() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::InterestCompounding, 10, "loan-1");
        scheduler.schedule(EventKind::Expiration, 10, "order-2");
        scheduler.schedule(EventKind::Expiration, 5, "order-1");

        let drained = scheduler.drain_due(20);
        assert_eq!(drained[0].id, "order-1");
        assert_eq!(drained[1].id, "order-2");
        assert_eq!(drained[2].id, "loan-1");
    }

    #[test]
    fn does_not_drain_events_not_yet_due() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(EventKind::Expiration, 100, "order-1");
        assert!(scheduler.drain_due(50).is_empty());
        assert_eq!(scheduler.pending_count(EventKind::Expiration), 1);
    }
}

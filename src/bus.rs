//! Bounded, ordered buffer of inbound decision events with fan-out.
//!
//! Single writer (the session event loop) pushes in arrival order; every
//! subscriber sees every event exactly once, in that order. Once capacity is
//! exceeded the oldest entry is evicted, ring-buffer style.
//!
//! Callbacks run with no bus lock held, so a subscriber may call back into
//! the bus (`recent`, `subscribe`, session accessors) during delivery.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::types::DecisionEvent;

type Subscriber = Arc<dyn Fn(&DecisionEvent) + Send + Sync>;

/// Handle returned by [`DecisionEventBus::subscribe`]; pass it back to
/// [`DecisionEventBus::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Registry {
    entries: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

pub struct DecisionEventBus {
    capacity: usize,
    window: Mutex<VecDeque<DecisionEvent>>,
    registry: Mutex<Registry>,
}

impl DecisionEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            registry: Mutex::new(Registry {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Ingest one event: store it (evicting the oldest beyond capacity) and
    /// deliver it to every subscriber before returning. The session loop is
    /// the only pusher, so delivery order equals arrival order even though
    /// callbacks run outside the locks.
    pub fn push(&self, event: DecisionEvent) {
        trace!(kind = ?event.kind, subject = %event.subject_id, "decision event");
        {
            let mut window = self.window.lock().expect("bus window lock poisoned");
            if window.len() == self.capacity {
                window.pop_front();
            }
            window.push_back(event.clone());
        }

        let subscribers: Vec<Subscriber> = {
            let registry = self.registry.lock().expect("bus registry lock poisoned");
            registry.entries.iter().map(|(_, s)| Arc::clone(s)).collect()
        };
        for subscriber in &subscribers {
            subscriber(&event);
        }
    }

    /// Register a callback for every subsequent event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DecisionEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().expect("bus registry lock poisoned");
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock().expect("bus registry lock poisoned");
        registry.entries.retain(|(sub_id, _)| *sub_id != id);
    }

    /// The most recent events, newest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<DecisionEvent> {
        let window = self.window.lock().expect("bus window lock poisoned");
        window.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.window.lock().expect("bus window lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionEventKind;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn trust_event(subject: &str, trust: f64) -> DecisionEvent {
        DecisionEvent {
            kind: DecisionEventKind::TrustUpdate,
            subject_id: subject.to_string(),
            resource: None,
            action: None,
            decision: None,
            risk_score: None,
            trust: Some(trust),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let bus = DecisionEventBus::new(3);
        for i in 0..5 {
            bus.push(trust_event(&format!("agent-{i}"), 0.5));
        }
        assert_eq!(bus.len(), 3);
        let recent = bus.recent(10);
        assert_eq!(recent[0].subject_id, "agent-4");
        assert_eq!(recent[2].subject_id, "agent-2");
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let bus = DecisionEventBus::new(10);
        for i in 0..4 {
            bus.push(trust_event(&format!("agent-{i}"), 0.5));
        }
        let recent = bus.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].subject_id, "agent-3");
        assert_eq!(recent[1].subject_id, "agent-2");
    }

    #[test]
    fn subscribers_see_every_event_in_arrival_order() {
        let bus = DecisionEventBus::new(10);
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen_a);
        bus.subscribe(move |e| a.lock().unwrap().push(e.subject_id.clone()));
        let b = Arc::clone(&seen_b);
        bus.subscribe(move |e| b.lock().unwrap().push(e.subject_id.clone()));

        for i in 0..3 {
            bus.push(trust_event(&format!("agent-{i}"), 0.5));
        }

        let expected = vec!["agent-0", "agent-1", "agent-2"];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }

    #[test]
    fn subscribers_may_call_back_into_the_bus() {
        let bus = Arc::new(DecisionEventBus::new(10));
        let seen = Arc::new(Mutex::new(None));

        let reader = Arc::clone(&bus);
        let slot = Arc::clone(&seen);
        bus.subscribe(move |event| {
            // Re-entrant reads during delivery must not block.
            let newest = reader.recent(1);
            *slot.lock().unwrap() = Some((newest.len(), reader.len(), event.subject_id.clone()));
        });

        let pusher = Arc::clone(&bus);
        let push = std::thread::spawn(move || pusher.push(trust_event("agent-0", 0.5)));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while seen.lock().unwrap().is_none() {
            assert!(
                std::time::Instant::now() < deadline,
                "push stalled with a subscriber reading the bus"
            );
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(
            seen.lock().unwrap().take().unwrap(),
            (1, 1, "agent-0".to_string())
        );
        push.join().unwrap();
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = DecisionEventBus::new(10);
        let seen = Arc::new(Mutex::new(0usize));

        let count = Arc::clone(&seen);
        let id = bus.subscribe(move |_| *count.lock().unwrap() += 1);

        bus.push(trust_event("agent-0", 0.5));
        bus.unsubscribe(id);
        bus.push(trust_event("agent-1", 0.5));

        assert_eq!(*seen.lock().unwrap(), 1);
    }
}

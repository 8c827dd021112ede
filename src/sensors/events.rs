//! Sensor event observers

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// State change published by a sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Reading crossed above the threshold
    Activated,
    /// Reading crossed below the threshold
    Deactivated,
    /// New filtered value
    ValueChanged(f64),
}

/// Handle returned by [`EventHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&SensorEvent) + Send + Sync>;

/// Fan-out of sensor events to registered callbacks
///
/// Callbacks run on the publishing thread, outside the subscriber lock, so
/// a callback may subscribe or unsubscribe.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SensorEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber; false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, event: SensorEvent) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..2 {
            let seen = Arc::clone(&seen);
            hub.subscribe(move |e| seen.lock().push((tag, *e)));
        }
        hub.publish(SensorEvent::Activated);
        assert_eq!(
            *seen.lock(),
            vec![(0, SensorEvent::Activated), (1, SensorEvent::Activated)]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = hub.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        hub.publish(SensorEvent::ValueChanged(1.0));
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert!(hub.is_empty());
        hub.publish(SensorEvent::ValueChanged(2.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

//! Change notifications for views
//!
//! Every successful mutation publishes one or more [`ChangeEvent`]s to all
//! subscribers. Receivers that have been dropped are pruned on the next
//! publish.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

/// What changed in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Page order, count, or page content changed.
    PagesChanged { page_count: usize },
    /// Annotations were created, updated or deleted on these pages.
    AnnotationsChanged { pages: Vec<usize> },
    /// Info fields or the table of contents changed.
    MetadataChanged,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    pub fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(ChangeEvent::MetadataChanged);
        bus.publish(ChangeEvent::PagesChanged { page_count: 3 });

        for receiver in [first, second] {
            let events: Vec<_> = receiver.try_iter().collect();
            assert_eq!(
                events,
                vec![ChangeEvent::MetadataChanged, ChangeEvent::PagesChanged { page_count: 3 }]
            );
        }
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ChangeEvent::AnnotationsChanged { pages: vec![1] });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.len(), 1);
    }
}

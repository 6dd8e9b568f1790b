//! Fan-out of run/iteration events to SSE subscribers (§4.8). Each
//! subscriber gets its own bounded ring buffer rather than one shared
//! broadcast stream, since subscribers differ in which work orders and event
//! types they want — a single `tokio::sync::broadcast` can't express a
//! per-reader filter without every reader re-filtering every event.

use crate::constants::EVENT_BUFFER_SIZE;
use crate::models::{EventFilter, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub work_order_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, work_order_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            work_order_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Bounded ring buffer shared between a [`Subscriber`] (the publish side)
/// and the [`EventReceiver`] handed back to the caller of `subscribe` (the
/// drain side). On overflow the oldest buffered event is evicted so the
/// newest event is always retained (§4.8) — the opposite of a bounded
/// `mpsc` channel, which rejects the incoming send instead.
struct EventBuffer {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    receiver_dropped: AtomicBool,
}

impl EventBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            receiver_dropped: AtomicBool::new(false),
        }
    }

    /// Pushes `event`, evicting the oldest buffered event if already at
    /// capacity. Returns `true` if an eviction happened.
    fn push(&self, event: Event) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        evicted
    }

    fn is_closed(&self) -> bool {
        self.receiver_dropped.load(Ordering::Acquire)
    }
}

/// The drain side of an [`EventBuffer`], returned by `subscribe`. Dropping
/// it marks the buffer closed so the next `publish` removes the subscriber,
/// mirroring how a dropped `mpsc::Receiver` used to disconnect its sender.
pub struct EventReceiver {
    buffer: Arc<EventBuffer>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.buffer.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            self.buffer.notify.notified().await;
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.buffer.receiver_dropped.store(true, Ordering::Release);
    }
}

struct Subscriber {
    work_order_ids: HashSet<Uuid>,
    filter: Option<EventFilter>,
    buffer: Arc<EventBuffer>,
}

impl Subscriber {
    /// Empty `work_order_ids` means "interested in every work order" (an
    /// operator-wide dashboard subscription); non-empty means scoped.
    fn wants(&self, event: &Event) -> bool {
        let work_order_match = self.work_order_ids.is_empty()
            || event
                .work_order_id
                .map(|id| self.work_order_ids.contains(&id))
                .unwrap_or(false);

        let type_match = self
            .filter
            .as_ref()
            .map(|f| f.accepts(event.event_type))
            .unwrap_or(true);

        work_order_match && type_match
    }
}

/// Publishing is serialized under a single lock so two events published
/// concurrently are always delivered to every subscriber in the same
/// relative order (§8, ordering property).
pub struct EventBroadcaster {
    subscribers: Mutex<HashMap<String, Subscriber>>,
    dropped: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Total events evicted so far because a subscriber's buffer was full.
    /// Surfaced on `/api/v1/queue/health` as a backpressure signal — a
    /// consistently nonzero rate means some client isn't draining its
    /// stream fast enough (§4.8, §9).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Registers `client_id`, replacing any previous subscription under the
    /// same id. Immediately delivers a `SubscriptionConfirmed` event on the
    /// new buffer.
    pub fn subscribe(
        &self,
        client_id: impl Into<String>,
        work_order_ids: HashSet<Uuid>,
        filter: Option<EventFilter>,
    ) -> EventReceiver {
        let client_id = client_id.into();
        let buffer = Arc::new(EventBuffer::new(EVENT_BUFFER_SIZE));

        let confirmation = Event::new(
            EventType::SubscriptionConfirmed,
            None,
            serde_json::json!({"client_id": client_id}),
        );
        buffer.push(confirmation);

        self.subscribers.lock().unwrap().insert(
            client_id,
            Subscriber {
                work_order_ids,
                filter,
                buffer: Arc::clone(&buffer),
            },
        );

        EventReceiver { buffer }
    }

    pub fn unsubscribe(&self, client_id: &str) {
        let removed = self.subscribers.lock().unwrap().remove(client_id);
        if let Some(subscriber) = removed {
            let confirmation = Event::new(
                EventType::UnsubscriptionConfirmed,
                None,
                serde_json::json!({"client_id": client_id}),
            );
            subscriber.buffer.push(confirmation);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Delivers `event` to every matching, still-open subscriber. A
    /// subscriber whose receiver was dropped is removed from the registry;
    /// a subscriber whose buffer is full has its oldest buffered event
    /// evicted to make room rather than the incoming event being discarded
    /// — a lagging reader loses history, never the publisher's newest
    /// signal (§4.8, §9).
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|client_id, subscriber| {
            if subscriber.buffer.is_closed() {
                return false;
            }
            if !subscriber.wants(&event) {
                return true;
            }
            if subscriber.buffer.push(event.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(client_id, "evicting oldest buffered event: subscriber buffer full");
            }
            true
        });
    }

    pub fn publish_work_order(
        &self,
        work_order_id: Uuid,
        event_type: EventType,
        payload: serde_json::Value,
    ) {
        self.publish(Event::new(event_type, Some(work_order_id), payload));
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_confirmation_immediately() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe("client-1", HashSet::new(), None);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::SubscriptionConfirmed);
    }

    #[tokio::test]
    async fn scoped_subscriber_only_sees_its_work_order() {
        let broadcaster = EventBroadcaster::new();
        let id = Uuid::new_v4();
        let other_id = Uuid::new_v4();
        let mut scoped = HashSet::new();
        scoped.insert(id);
        let mut rx = broadcaster.subscribe("client-1", scoped, None);
        let _ = rx.recv().await; // confirmation

        broadcaster.publish_work_order(other_id, EventType::RunStarted, serde_json::json!({}));
        broadcaster.publish_work_order(id, EventType::RunStarted, serde_json::json!({}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.work_order_id, Some(id));
    }

    #[tokio::test]
    async fn unscoped_subscriber_sees_every_work_order() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe("client-1", HashSet::new(), None);
        let _ = rx.recv().await; // confirmation

        broadcaster.publish_work_order(Uuid::new_v4(), EventType::RunStarted, serde_json::json!({}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::RunStarted);
    }

    #[tokio::test]
    async fn type_filter_excludes_unwanted_events() {
        let broadcaster = EventBroadcaster::new();
        let mut types = HashSet::new();
        types.insert(EventType::RunFailed);
        let filter = EventFilter {
            types: Some(types),
            verbosity: None,
        };
        let mut rx = broadcaster.subscribe("client-1", HashSet::new(), Some(filter));
        let _ = rx.recv().await; // confirmation

        broadcaster.publish_work_order(Uuid::new_v4(), EventType::RunStarted, serde_json::json!({}));
        broadcaster.publish_work_order(Uuid::new_v4(), EventType::RunFailed, serde_json::json!({}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::RunFailed);
    }

    #[tokio::test]
    async fn dropping_receiver_removes_subscriber_on_next_publish() {
        let broadcaster = EventBroadcaster::new();
        {
            let _rx = broadcaster.subscribe("client-1", HashSet::new(), None);
        }
        assert_eq!(broadcaster.subscriber_count(), 1);
        broadcaster.publish_work_order(Uuid::new_v4(), EventType::RunStarted, serde_json::json!({}));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn full_buffer_evicts_oldest_and_keeps_the_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe("client-1", HashSet::new(), None);
        let _ = rx.recv().await; // confirmation

        // Fill the buffer past capacity without draining it. The last
        // published work order id is what we expect to still be readable;
        // everything evicted came from the front of the queue.
        let mut last_id = Uuid::new_v4();
        for _ in 0..(EVENT_BUFFER_SIZE + 5) {
            last_id = Uuid::new_v4();
            broadcaster.publish_work_order(last_id, EventType::RunStarted, serde_json::json!({}));
        }

        assert!(broadcaster.dropped_count() > 0);
        assert_eq!(broadcaster.subscriber_count(), 1);

        let mut seen_last = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await
        {
            if event.work_order_id == Some(last_id) {
                seen_last = true;
            }
        }
        assert!(seen_last, "newest event must survive eviction");
    }

    #[test]
    fn unsubscribe_removes_and_is_idempotent() {
        let broadcaster = EventBroadcaster::new();
        let _rx = broadcaster.subscribe("client-1", HashSet::new(), None);
        broadcaster.unsubscribe("client-1");
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.unsubscribe("client-1");
    }
}

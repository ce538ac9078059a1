//! In-process broker.
//!
//! Mirrors the parts of AMQP semantics the pipeline depends on: direct and
//! default exchange routing, declaration conflicts, dead-lettering on reject,
//! prefetch limits, and redelivery of anything a subscription leaves
//! unacknowledged. Used by tests and the `--broker memory` dev mode.

use crate::broker::{Broker, DeliveryStream, Envelope, ExchangeSpec, OutgoingMessage, QueueSpec};
use crate::error::{QueueError, QueueResult};
use crate::headers;
use async_trait::async_trait;
use lapin::types::FieldTable;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// In-memory [`Broker`]. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    /// Woken on every change a waiting subscription might care about.
    changed: Notify,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    next_delivery_tag: u64,
    next_subscription: u64,
    failing_publishes: usize,
    closed: bool,
}

struct MemoryQueue {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

#[derive(Clone)]
struct StoredMessage {
    body: Vec<u8>,
    headers: FieldTable,
    routing_key: String,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    subscription: u64,
    message: StoredMessage,
}

/// A message sitting in a queue, as seen by [`MemoryBroker::peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub body: Vec<u8>,
    pub retry_count: u32,
    pub redelivered: bool,
}

/// Declared exchanges, queues and bindings, sorted for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    /// `(exchange, queue, routing_key)`
    pub bindings: Vec<(String, String, String)>,
}

impl State {
    /// Deliver to every matching queue. Returns how many queues received it.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: StoredMessage,
    ) -> QueueResult<usize> {
        if exchange.is_empty() {
            return Ok(match self.queues.get_mut(routing_key) {
                Some(queue) => {
                    queue.ready.push_back(message);
                    1
                }
                None => 0,
            });
        }

        if !self.exchanges.contains_key(exchange) {
            return Err(QueueError::Publish(format!(
                "NOT_FOUND - no exchange '{}'",
                exchange
            )));
        }

        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        let mut delivered = 0;
        for target in targets {
            if let Some(queue) = self.queues.get_mut(&target) {
                queue.ready.push_back(message.clone());
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Route a rejected message through its queue's dead-letter target.
    fn dead_letter(&mut self, queue: &str, mut message: StoredMessage) {
        let Some(spec) = self.queues.get(queue).map(|q| q.spec.clone()) else {
            return;
        };
        let Some(exchange) = spec.dead_letter_exchange else {
            debug!(queue, "Rejected message dropped, queue has no dead-letter exchange");
            return;
        };
        let routing_key = spec
            .dead_letter_routing_key
            .unwrap_or_else(|| message.routing_key.clone());

        message.redelivered = false;
        message.routing_key = routing_key.clone();
        match self.route(&exchange, &routing_key, message) {
            Ok(0) => warn!(queue, routing_key = %routing_key, "Dead-lettered message was unroutable"),
            Ok(_) => debug!(queue, routing_key = %routing_key, "Message dead-lettered"),
            Err(e) => warn!(queue, error = %e, "Dead-letter routing failed"),
        }
    }

    /// Return a subscription's unacknowledged deliveries to the front of
    /// their queues, oldest first.
    fn release(&mut self, subscription: Option<u64>) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| subscription.map_or(true, |s| u.subscription == s))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some(unacked) = self.unacked.remove(tag) {
                self.requeue_front(unacked);
            }
        }
        tags.len()
    }

    fn requeue_front(&mut self, unacked: Unacked) {
        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            let mut message = unacked.message;
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }

    fn take_unacked(&mut self, subscription: u64, delivery_tag: u64) -> QueueResult<Unacked> {
        let owned = self
            .unacked
            .get(&delivery_tag)
            .is_some_and(|u| u.subscription == subscription);
        if !owned {
            return Err(unknown_tag(delivery_tag));
        }
        self.unacked
            .remove(&delivery_tag)
            .ok_or_else(|| unknown_tag(delivery_tag))
    }
}

fn unknown_tag(delivery_tag: u64) -> QueueError {
    QueueError::Broker(format!(
        "PRECONDITION_FAILED - unknown delivery tag {}",
        delivery_tag
    ))
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish with an arbitrary header table, bypassing the retry codec.
    pub fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        headers: FieldTable,
    ) -> QueueResult<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(QueueError::Connection("broker closed".to_string()));
        }
        state.route(
            exchange,
            routing_key,
            StoredMessage {
                body,
                headers,
                routing_key: routing_key.to_string(),
                redelivered: false,
            },
        )?;
        drop(state);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// Make the next `count` publishes fail.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_publishes(&self, count: usize) {
        self.shared.state.lock().failing_publishes = count;
    }

    /// Messages ready for delivery.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Deliveries handed out from `queue` and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unacked
            .values()
            .filter(|u| u.queue == queue)
            .count()
    }

    /// Ready messages in delivery order.
    pub fn peek(&self, queue: &str) -> Vec<QueuedMessage> {
        let state = self.shared.state.lock();
        state
            .queues
            .get(queue)
            .map(|q| {
                q.ready
                    .iter()
                    .map(|m| QueuedMessage {
                        body: m.body.clone(),
                        retry_count: headers::retry_count(Some(&m.headers)),
                        redelivered: m.redelivered,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Everything declared so far.
    pub fn topology(&self) -> TopologySnapshot {
        let state = self.shared.state.lock();

        let mut exchanges: Vec<ExchangeSpec> = state.exchanges.values().cloned().collect();
        exchanges.sort_by(|a, b| a.name.cmp(&b.name));

        let mut queues: Vec<QueueSpec> = state.queues.values().map(|q| q.spec.clone()).collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));

        let mut bindings: Vec<(String, String, String)> = state
            .bindings
            .iter()
            .map(|b| (b.exchange.clone(), b.queue.clone(), b.routing_key.clone()))
            .collect();
        bindings.sort();

        TopologySnapshot {
            exchanges,
            queues,
            bindings,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> QueueResult<()> {
        if spec.name.is_empty() {
            return Err(QueueError::Broker(
                "ACCESS_REFUSED - the default exchange cannot be declared".to_string(),
            ));
        }
        let mut state = self.shared.state.lock();
        match state.exchanges.get(&spec.name) {
            Some(existing) if existing != spec => Err(QueueError::TopologyConflict(format!(
                "exchange '{}': PRECONDITION_FAILED - inequivalent arg 'durable' \
                 (existing {}, requested {})",
                spec.name, existing.durable, spec.durable
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> QueueResult<()> {
        let mut state = self.shared.state.lock();
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec != *spec => {
                Err(QueueError::TopologyConflict(format!(
                    "queue '{}': PRECONDITION_FAILED - inequivalent arguments \
                     (existing {:?}, requested {:?})",
                    spec.name, existing.spec, spec
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    MemoryQueue {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> QueueResult<()> {
        let mut state = self.shared.state.lock();
        if !state.exchanges.contains_key(exchange) {
            return Err(QueueError::Broker(format!(
                "NOT_FOUND - no exchange '{}'",
                exchange
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(QueueError::Broker(format!("NOT_FOUND - no queue '{}'", queue)));
        }

        let binding = Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> QueueResult<()> {
        {
            let mut state = self.shared.state.lock();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(QueueError::Publish("simulated broker refusal".to_string()));
            }
        }

        let headers = message
            .retry_count
            .map(headers::retry_headers)
            .unwrap_or_default();
        self.publish_raw(exchange, routing_key, message.body, headers)
            .map_err(|e| match e {
                QueueError::Publish(_) => e,
                other => QueueError::Publish(other.to_string()),
            })
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<Box<dyn DeliveryStream>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(QueueError::Connection("broker closed".to_string()));
        }
        if !state.queues.contains_key(queue) {
            return Err(QueueError::Broker(format!("NOT_FOUND - no queue '{}'", queue)));
        }
        state.next_subscription += 1;
        let subscription = state.next_subscription;

        debug!(queue, consumer_tag, prefetch, "Subscribed to memory queue");
        Ok(Box::new(MemoryDeliveryStream {
            shared: self.shared.clone(),
            queue: queue.to_string(),
            subscription,
            prefetch,
            cancelled: false,
        }))
    }

    async fn close(&self) -> QueueResult<()> {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            let released = state.release(None);
            if released > 0 {
                debug!(released, "Returned unacknowledged deliveries on close");
            }
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

/// One subscription on a [`MemoryBroker`] queue.
struct MemoryDeliveryStream {
    shared: Arc<Shared>,
    queue: String,
    subscription: u64,
    /// 0 means unlimited, as in AMQP.
    prefetch: u16,
    cancelled: bool,
}

impl MemoryDeliveryStream {
    /// Take the next ready message if prefetch allows. Never awaits, so a
    /// dropped `next_delivery` future cannot lose a message.
    fn try_deliver(&self, state: &mut State) -> Option<Envelope> {
        if self.prefetch > 0 {
            let in_flight = state
                .unacked
                .values()
                .filter(|u| u.subscription == self.subscription)
                .count();
            if in_flight >= usize::from(self.prefetch) {
                return None;
            }
        }

        let message = state.queues.get_mut(&self.queue)?.ready.pop_front()?;
        state.next_delivery_tag += 1;
        let delivery_tag = state.next_delivery_tag;

        let envelope = Envelope {
            delivery_tag,
            body: message.body.clone(),
            retry_count: headers::retry_count(Some(&message.headers)),
            redelivered: message.redelivered,
        };
        state.unacked.insert(
            delivery_tag,
            Unacked {
                queue: self.queue.clone(),
                subscription: self.subscription,
                message,
            },
        );
        Some(envelope)
    }

    fn settle<F>(&self, delivery_tag: u64, f: F) -> QueueResult<()>
    where
        F: FnOnce(&mut State, Unacked),
    {
        {
            let mut state = self.shared.state.lock();
            let unacked = state.take_unacked(self.subscription, delivery_tag)?;
            f(&mut *state, unacked);
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    fn release(&self) {
        let released = self.shared.state.lock().release(Some(self.subscription));
        if released > 0 {
            debug!(queue = %self.queue, released, "Returned unacknowledged deliveries");
            self.shared.changed.notify_waiters();
        }
    }
}

#[async_trait]
impl DeliveryStream for MemoryDeliveryStream {
    async fn next_delivery(&mut self) -> Option<QueueResult<Envelope>> {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            // Register before checking so a change between check and await is not missed.
            changed.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if self.cancelled || state.closed || !state.queues.contains_key(&self.queue) {
                    return None;
                }
                if let Some(envelope) = self.try_deliver(&mut *state) {
                    return Some(Ok(envelope));
                }
            }

            changed.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> QueueResult<()> {
        self.settle(delivery_tag, |_, _| {})
    }

    async fn reject(&mut self, delivery_tag: u64) -> QueueResult<()> {
        self.settle(delivery_tag, |state, unacked| {
            state.dead_letter(&unacked.queue, unacked.message)
        })
    }

    async fn requeue(&mut self, delivery_tag: u64) -> QueueResult<()> {
        self.settle(delivery_tag, |state, unacked| state.requeue_front(unacked))
    }

    async fn cancel(&mut self) -> QueueResult<()> {
        self.cancelled = true;
        self.release();
        Ok(())
    }
}

impl Drop for MemoryDeliveryStream {
    fn drop(&mut self) {
        self.release();
    }
}

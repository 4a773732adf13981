// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! `MemoryBroker` implements the broker capabilities entirely inside the process.
//! It follows the AMQP 0-9-1 model closely enough to exercise the router without
//! a RabbitMQ server:
//!
//! - exchanges and queues are declared idempotently; a declaration that differs
//!   from the existing entity is refused with `PRECONDITION_FAILED`
//! - direct, topic and fanout routing, headers exchanges route like fanout
//! - the default exchange (`""`) routes to the queue named by the routing key
//! - consumers of a queue are served round-robin
//! - unacknowledged messages go back to their queue, flagged as redelivered,
//!   when their channel or connection closes
//! - exclusive queues die with their connection, auto-delete queues with their
//!   last consumer
//!
//! Persistence, flow control and message expiry are not simulated.

use crate::{
    broker::{
        Acker, Channel, ConsumeOptions, Connection, Connector, Delivery, DeliveryStream,
    },
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind, AMQP_HEADERS_DELAYED_EXCHANGE_TYPE},
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{
    types::{AMQPValue, ShortString},
    BasicProperties,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
};
use tokio::sync::mpsc;
use tracing::debug;

/// A terminal decision recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack {
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
    Reject {
        delivery_tag: u64,
        requeue: bool,
    },
}

/// In-process broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

type SharedState = Arc<Mutex<BrokerState>>;

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<Binding>,
    connections: HashMap<u64, bool>,
    channels: HashMap<u64, ChannelState>,
    unacked: HashMap<u64, Unacked>,
    settlements: Vec<Settlement>,
    next_id: u64,
    next_tag: u64,
    fail_dials: u32,
    dials: u32,
}

struct ChannelState {
    connection: u64,
    open: bool,
}

struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct MemoryQueue {
    def: QueueDefinition,
    owner: Option<u64>,
    ready: VecDeque<Message>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    consumed: bool,
}

#[derive(Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    data: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    tag: String,
    channel: u64,
    no_ack: bool,
    exclusive: bool,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct Unacked {
    queue: String,
    channel: u64,
    message: Message,
}

fn precondition_failed(what: &str) -> String {
    format!("PRECONDITION_FAILED - inequivalent arg '{}'", what)
}

fn not_found(kind: &str, name: &str) -> String {
    format!("NOT_FOUND - no {} '{}'", kind, name)
}

fn exchange_mismatch(current: &ExchangeDefinition, def: &ExchangeDefinition) -> Option<&'static str> {
    if current.kind != def.kind {
        Some("type")
    } else if current.durable != def.durable {
        Some("durable")
    } else if current.delete != def.delete {
        Some("auto_delete")
    } else if current.internal != def.internal {
        Some("internal")
    } else if current.params != def.params {
        Some("arguments")
    } else {
        None
    }
}

fn queue_mismatch(current: &QueueDefinition, def: &QueueDefinition) -> Option<&'static str> {
    if current.durable != def.durable {
        Some("durable")
    } else if current.delete != def.delete {
        Some("auto_delete")
    } else if current.exclusive != def.exclusive {
        Some("exclusive")
    } else if current.arguments() != def.arguments() {
        Some("arguments")
    } else {
        None
    }
}

/// Kind a delayed exchange routes with once the delay is over.
fn delayed_kind(def: &ExchangeDefinition) -> ExchangeKind {
    match def
        .params
        .get(&ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE))
    {
        Some(AMQPValue::LongString(inner)) => {
            ExchangeKind::try_from(String::from_utf8_lossy(inner.as_bytes()).as_ref())
                .unwrap_or_default()
        }
        _ => ExchangeKind::Direct,
    }
}

fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, key) || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => topic_matches(rest, key_rest),
        (Some((word, rest)), Some((part, key_rest))) => {
            word == part && topic_matches(rest, key_rest)
        }
        _ => false,
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn channel_open(&self, id: u64) -> Result<(), AmqpError> {
        match self.channels.get(&id) {
            Some(channel)
                if channel.open
                    && self
                        .connections
                        .get(&channel.connection)
                        .copied()
                        .unwrap_or(false) =>
            {
                Ok(())
            }
            _ => Err(AmqpError::ChannelError("channel closed".to_owned())),
        }
    }

    fn declare_exchange(&mut self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let fail = |reason: String| AmqpError::DeclareExchangeError(def.name.clone(), reason);

        if def.name.is_empty() || def.name.starts_with("amq.") {
            return Err(fail(format!(
                "ACCESS_REFUSED - exchange name '{}' is reserved",
                def.name
            )));
        }

        match self.exchanges.get(&def.name) {
            Some(_) if def.passive => Ok(()),
            Some(current) => match exchange_mismatch(current, def) {
                Some(arg) => Err(fail(precondition_failed(arg))),
                None => Ok(()),
            },
            None if def.passive => Err(fail(not_found("exchange", &def.name))),
            None => {
                self.exchanges.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    fn delete_exchange(&mut self, name: &str, if_unused: bool) -> Result<(), AmqpError> {
        let fail = |reason: String| AmqpError::DeleteExchangeError(name.to_owned(), reason);

        if !self.exchanges.contains_key(name) {
            return Err(fail(not_found("exchange", name)));
        }

        if if_unused && self.bindings.iter().any(|b| b.exchange == name) {
            return Err(fail(format!(
                "PRECONDITION_FAILED - exchange '{}' in use",
                name
            )));
        }

        self.exchanges.remove(name);
        self.bindings.retain(|b| b.exchange != name);
        Ok(())
    }

    fn declare_queue(&mut self, connection: u64, def: &QueueDefinition) -> Result<String, AmqpError> {
        let name = if def.name.is_empty() {
            format!("amq.gen-{}", self.next_id())
        } else {
            def.name.clone()
        };
        let fail = |reason: String| AmqpError::DeclareQueueError(name.clone(), reason);

        match self.queues.get(&name) {
            Some(current) if current.owner.is_some_and(|owner| owner != connection) => Err(fail(
                format!("RESOURCE_LOCKED - queue '{}' is exclusive", name),
            )),
            Some(_) if def.passive => Ok(name),
            Some(current) => match queue_mismatch(&current.def, def) {
                Some(arg) => Err(fail(precondition_failed(arg))),
                None => Ok(name),
            },
            None if def.passive => Err(fail(not_found("queue", &name))),
            None => {
                let mut stored = def.clone();
                stored.name = name.clone();
                self.queues.insert(
                    name.clone(),
                    MemoryQueue {
                        def: stored,
                        owner: def.exclusive.then_some(connection),
                        ready: VecDeque::new(),
                        consumers: Vec::new(),
                        next_consumer: 0,
                        consumed: false,
                    },
                );
                Ok(name)
            }
        }
    }

    fn bind_queue(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), AmqpError> {
        if !self.queues.contains_key(queue) || !self.exchanges.contains_key(exchange) {
            return Err(AmqpError::BindingExchangeToQueueError(
                exchange.to_owned(),
                queue.to_owned(),
            ));
        }

        let bound = self
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key);

        if !bound {
            self.bindings.push(Binding {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                routing_key: routing_key.to_owned(),
            });
        }

        Ok(())
    }

    fn delete_queue(&mut self, name: &str) {
        debug!(queue = name, "memory queue deleted");
        self.queues.remove(name);
        self.bindings.retain(|b| b.queue != name);
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, AmqpError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect());
        }

        let def = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| AmqpError::PublishingError(not_found("exchange", exchange)))?;

        let kind = match def.kind {
            ExchangeKind::XMessageDelayed => delayed_kind(def),
            _ => def.kind.clone(),
        };
        let key: Vec<&str> = routing_key.split('.').collect();

        let mut queues: Vec<String> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let matched = match kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Topic => {
                    let pattern: Vec<&str> = binding.routing_key.split('.').collect();
                    topic_matches(&pattern, &key)
                }
                _ => true,
            };

            if matched && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }

        Ok(queues)
    }

    /// Hands ready messages of `queue` to its consumers.
    fn dispatch(&mut self, queue_name: &str, broker: &Weak<Mutex<BrokerState>>) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.consumers.is_empty() {
                return;
            }
            let Some(message) = queue.ready.pop_front() else {
                return;
            };

            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;
            self.next_tag += 1;
            let tag = self.next_tag;

            let consumer = &queue.consumers[index];
            let (channel, no_ack) = (consumer.channel, consumer.no_ack);
            let delivery = Delivery {
                delivery_tag: tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                consumer_tag: consumer.tag.clone(),
                message_count: 0,
                properties: message.properties.clone(),
                data: message.data.clone(),
                acker: Arc::new(MemoryAcker {
                    broker: broker.clone(),
                    tag,
                }),
            };

            if consumer.sender.send(delivery).is_err() {
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }

            if !no_ack {
                self.unacked.insert(
                    tag,
                    Unacked {
                        queue: queue_name.to_owned(),
                        channel,
                        message,
                    },
                );
            }
        }
    }

    /// Puts unacknowledged messages back at the head of their queues, oldest first.
    fn requeue(&mut self, mut tags: Vec<u64>, touched: &mut Vec<String>) {
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            let Some(unacked) = self.unacked.remove(&tag) else {
                continue;
            };

            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);

                if !touched.contains(&unacked.queue) {
                    touched.push(unacked.queue);
                }
            }
        }
    }

    fn settle(
        &mut self,
        tag: u64,
        multiple: bool,
        requeue: bool,
        broker: &Weak<Mutex<BrokerState>>,
    ) -> bool {
        let Some(channel) = self.unacked.get(&tag).map(|unacked| unacked.channel) else {
            return false;
        };

        let tags: Vec<u64> = if multiple {
            self.unacked
                .iter()
                .filter(|(t, unacked)| **t <= tag && unacked.channel == channel)
                .map(|(t, _)| *t)
                .collect()
        } else {
            vec![tag]
        };

        if requeue {
            let mut touched = Vec::new();
            self.requeue(tags, &mut touched);
            for queue in touched {
                self.dispatch(&queue, broker);
            }
        } else {
            for tag in tags {
                self.unacked.remove(&tag);
            }
        }

        true
    }

    fn close_channel(&mut self, id: u64, broker: &Weak<Mutex<BrokerState>>) {
        match self.channels.get_mut(&id) {
            Some(channel) if channel.open => channel.open = false,
            _ => return,
        }

        let mut touched = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|consumer| consumer.channel != id);
            if queue.consumers.len() != before {
                touched.push(name.clone());
            }
        }

        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, unacked)| unacked.channel == id)
            .map(|(tag, _)| *tag)
            .collect();
        self.requeue(tags, &mut touched);

        let abandoned: Vec<String> = touched
            .iter()
            .filter(|name| {
                self.queues.get(*name).is_some_and(|queue| {
                    queue.def.delete && queue.consumed && queue.consumers.is_empty()
                })
            })
            .cloned()
            .collect();
        for name in &abandoned {
            self.delete_queue(name);
        }

        for name in touched {
            self.dispatch(&name, broker);
        }
    }

    fn close_connection(&mut self, id: u64, broker: &Weak<Mutex<BrokerState>>) {
        match self.connections.get_mut(&id) {
            Some(open) if *open => *open = false,
            _ => return,
        }

        let channels: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.connection == id)
            .map(|(channel, _)| *channel)
            .collect();
        for channel in channels {
            self.close_channel(channel, broker);
            self.channels.remove(&channel);
        }

        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == Some(id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }

        debug!(connection = id, "memory connection closed");
    }
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker::default()
    }

    /// Makes the next `count` dial attempts fail.
    pub fn fail_next_dials(&self, count: u32) {
        self.state.lock().fail_dials = count;
    }

    /// Number of dial attempts so far, failed ones included.
    pub fn dial_count(&self) -> u32 {
        self.state.lock().dials
    }

    /// Drops every open connection, as a broker restart would.
    pub fn close_connections(&self) {
        let broker = Arc::downgrade(&self.state);
        let mut state = self.state.lock();

        let open: Vec<u64> = state
            .connections
            .iter()
            .filter(|(_, open)| **open)
            .map(|(id, _)| *id)
            .collect();
        for id in open {
            state.close_connection(id, &broker);
        }
    }

    pub fn open_connections(&self) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .filter(|open| **open)
            .count()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().settlements.clone()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    /// `(exchange, routing key)` pairs bound to `queue`.
    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.queue == queue)
            .map(|b| (b.exchange.clone(), b.routing_key.clone()))
            .collect()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or_default()
    }

    /// Messages delivered and not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, _url: &str, name: &str) -> Result<Arc<dyn Connection>, AmqpError> {
        let mut state = self.state.lock();
        state.dials += 1;

        if state.fail_dials > 0 {
            state.fail_dials -= 1;
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }

        let id = state.next_id();
        state.connections.insert(id, true);
        debug!(connection = id, name, "memory connection opened");

        Ok(Arc::new(MemoryConnection {
            state: self.state.clone(),
            id,
        }))
    }
}

struct MemoryConnection {
    state: SharedState,
    id: u64,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_closed(&self) -> bool {
        !self
            .state
            .lock()
            .connections
            .get(&self.id)
            .copied()
            .unwrap_or(false)
    }

    async fn create_channel(&self) -> Result<Arc<dyn Channel>, AmqpError> {
        let mut state = self.state.lock();

        if !state.connections.get(&self.id).copied().unwrap_or(false) {
            return Err(AmqpError::ChannelError("connection closed".to_owned()));
        }

        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                open: true,
            },
        );

        Ok(Arc::new(MemoryChannel {
            state: self.state.clone(),
            id,
            connection: self.id,
        }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let broker = Arc::downgrade(&self.state);
        self.state.lock().close_connection(self.id, &broker);
        Ok(())
    }
}

struct MemoryChannel {
    state: SharedState,
    id: u64,
    connection: u64,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock();
        state.channel_open(self.id)?;
        state.declare_exchange(def)
    }

    async fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), AmqpError> {
        let mut state = self.state.lock();
        state.channel_open(self.id)?;
        state.delete_exchange(name, if_unused)
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let mut state = self.state.lock();
        state.channel_open(self.id)?;
        state.declare_queue(self.connection, def)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _no_wait: bool,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock();
        state.channel_open(self.id)?;
        state.bind_queue(queue, exchange, routing_key)
    }

    async fn purge_queue(&self, name: &str, _no_wait: bool) -> Result<u32, AmqpError> {
        let mut state = self.state.lock();
        state.channel_open(self.id)?;

        match state.queues.get_mut(name) {
            Some(queue) => {
                let purged = queue.ready.len();
                queue.ready.clear();
                Ok(u32::try_from(purged).unwrap_or(u32::MAX))
            }
            None => Err(AmqpError::PurgeQueueError(
                name.to_owned(),
                not_found("queue", name),
            )),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let broker = Arc::downgrade(&self.state);
        let mut state = self.state.lock();
        state
            .channel_open(self.id)
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        let queues = state.route(exchange, routing_key)?;
        if queues.is_empty() {
            debug!(exchange, routing_key, "message unroutable, dropped");
        }

        let message = Message {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            properties,
            data: payload.to_vec(),
            redelivered: false,
        };

        for name in queues {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.ready.push_back(message.clone());
            }
            state.dispatch(&name, &broker);
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let broker = Arc::downgrade(&self.state);
        let mut state = self.state.lock();
        state.channel_open(self.id)?;

        let tag = if consumer_tag.is_empty() {
            format!("amq.ctag-{}", state.next_id())
        } else {
            consumer_tag.to_owned()
        };

        let connection = self.connection;
        let Some(target) = state.queues.get_mut(queue) else {
            debug!(queue, "consume on a missing queue");
            return Err(AmqpError::BindingConsumerError(queue.to_owned()));
        };

        let locked = target.owner.is_some_and(|owner| owner != connection)
            || target.consumers.iter().any(|c| c.exclusive)
            || (options.exclusive && !target.consumers.is_empty());
        if locked {
            return Err(AmqpError::BindingConsumerError(queue.to_owned()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        target.consumers.push(Consumer {
            tag,
            channel: self.id,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            sender,
        });
        target.consumed = true;
        state.dispatch(queue, &broker);

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|delivery| (Ok::<_, AmqpError>(delivery), receiver))
        })
        .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let broker = Arc::downgrade(&self.state);
        self.state.lock().close_channel(self.id, &broker);
        Ok(())
    }
}

struct MemoryAcker {
    broker: Weak<Mutex<BrokerState>>,
    tag: u64,
}

impl MemoryAcker {
    fn settle(
        &self,
        multiple: bool,
        requeue: bool,
        settlement: Settlement,
        failure: AmqpError,
    ) -> Result<(), AmqpError> {
        let Some(state) = self.broker.upgrade() else {
            return Err(failure);
        };
        let mut state = state.lock();

        if !state.settle(self.tag, multiple, requeue, &self.broker) {
            return Err(failure);
        }

        state.settlements.push(settlement);
        Ok(())
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, multiple: bool) -> Result<(), AmqpError> {
        self.settle(
            multiple,
            false,
            Settlement::Ack {
                delivery_tag: self.tag,
                multiple,
            },
            AmqpError::AckMessageError,
        )
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.settle(
            multiple,
            requeue,
            Settlement::Nack {
                delivery_tag: self.tag,
                multiple,
                requeue,
            },
            AmqpError::NackMessageError,
        )
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.settle(
            false,
            requeue,
            Settlement::Reject {
                delivery_tag: self.tag,
                requeue,
            },
            AmqpError::RejectMessageError,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn open(broker: &MemoryBroker) -> (Arc<dyn Connection>, Arc<dyn Channel>) {
        let conn = broker.connect("memory://", "test").await.unwrap();
        let channel = conn.create_channel().await.unwrap();
        (conn, channel)
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn topic_patterns() {
        let matches = |pattern: &str, key: &str| {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = key.split('.').collect();
            topic_matches(&pattern, &key)
        };

        assert!(matches("orders.*", "orders.created"));
        assert!(!matches("orders.*", "orders.created.eu"));
        assert!(matches("orders.#", "orders.created.eu"));
        assert!(matches("orders.#", "orders"));
        assert!(matches("#.eu", "orders.created.eu"));
        assert!(!matches("orders.created", "orders.deleted"));
    }

    #[tokio::test]
    async fn redeclaring_with_other_arguments_is_refused() {
        // Arrange
        let broker = MemoryBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .declare_exchange(&ExchangeDefinition::new("orders").topic())
            .await
            .unwrap();

        // Act
        let same = channel
            .declare_exchange(&ExchangeDefinition::new("orders").topic())
            .await;
        let other = channel
            .declare_exchange(&ExchangeDefinition::new("orders").fanout())
            .await;

        // Assert
        assert!(same.is_ok());
        assert_eq!(
            other,
            Err(AmqpError::DeclareExchangeError(
                "orders".to_owned(),
                "PRECONDITION_FAILED - inequivalent arg 'type'".to_owned()
            ))
        );
    }

    #[tokio::test]
    async fn topic_exchange_routes_by_pattern() {
        let broker = MemoryBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .declare_exchange(&ExchangeDefinition::new("events").topic())
            .await
            .unwrap();
        for (queue, key) in [("eu", "orders.*.eu"), ("all", "orders.#")] {
            channel
                .declare_queue(&QueueDefinition::new(queue))
                .await
                .unwrap();
            channel.bind_queue(queue, "events", key, false).await.unwrap();
        }

        channel
            .publish("events", "orders.created.eu", b"1", BasicProperties::default())
            .await
            .unwrap();
        channel
            .publish("events", "orders.created.us", b"2", BasicProperties::default())
            .await
            .unwrap();

        assert_eq!(broker.ready_count("eu"), 1);
        assert_eq!(broker.ready_count("all"), 2);
    }

    #[tokio::test]
    async fn unacked_messages_come_back_when_the_channel_closes() {
        // Arrange
        let broker = MemoryBroker::new();
        let (conn, channel) = open(&broker).await;
        channel
            .declare_queue(&QueueDefinition::new("jobs"))
            .await
            .unwrap();
        channel
            .publish("", "jobs", b"work", BasicProperties::default())
            .await
            .unwrap();

        let consumer = conn.create_channel().await.unwrap();
        let mut stream = consumer
            .consume("jobs", "worker", ConsumeOptions::default())
            .await
            .unwrap();
        let first = next(&mut stream).await;
        assert!(!first.redelivered);

        // Act
        consumer.close().await.unwrap();

        // Assert
        assert_eq!(broker.ready_count("jobs"), 1);
        assert_eq!(first.acker.ack(false).await, Err(AmqpError::AckMessageError));

        let mut stream = channel
            .consume("jobs", "worker-2", ConsumeOptions::default())
            .await
            .unwrap();
        let again = next(&mut stream).await;
        assert!(again.redelivered);
        assert_eq!(again.data, b"work".to_vec());
    }

    #[tokio::test]
    async fn exclusive_queues_die_with_their_connection() {
        let broker = MemoryBroker::new();
        let (conn, channel) = open(&broker).await;
        let name = channel
            .declare_queue(&QueueDefinition::anonymous())
            .await
            .unwrap();
        assert!(name.starts_with("amq.gen-"));

        let (_other, intruder) = open(&broker).await;
        assert!(intruder
            .consume(&name, "", ConsumeOptions::default())
            .await
            .is_err());

        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(!broker.has_queue(&name));
        assert!(channel
            .declare_queue(&QueueDefinition::new("jobs"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn settlements_are_recorded() {
        let broker = MemoryBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .declare_queue(&QueueDefinition::new("jobs"))
            .await
            .unwrap();
        let mut stream = channel
            .consume("jobs", "worker", ConsumeOptions::default())
            .await
            .unwrap();
        channel
            .publish("", "jobs", b"a", BasicProperties::default())
            .await
            .unwrap();
        channel
            .publish("", "jobs", b"b", BasicProperties::default())
            .await
            .unwrap();

        let a = next(&mut stream).await;
        let b = next(&mut stream).await;
        a.acker.ack(false).await.unwrap();
        b.acker.reject(false).await.unwrap();

        assert_eq!(
            broker.settlements(),
            vec![
                Settlement::Ack {
                    delivery_tag: a.delivery_tag,
                    multiple: false
                },
                Settlement::Reject {
                    delivery_tag: b.delivery_tag,
                    requeue: false
                },
            ]
        );
        assert_eq!(broker.unacked_count(), 0);
    }
}

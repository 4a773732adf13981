// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Capabilities
//!
//! The router never talks to the AMQP protocol directly. Everything it needs from
//! the broker is expressed by the traits in this module:
//!
//! - `Connector`: dials a connection from a URL
//! - `Connection`: liveness check, channel creation and close
//! - `Channel`: topology declaration, publishing and consuming
//! - `Acker`: terminal acknowledgement of a single delivery
//!
//! `channel::LapinConnector` implements them on top of `lapin`; `memory::MemoryBroker`
//! implements them in-process.

use crate::{errors::AmqpError, exchange::ExchangeDefinition, queue::QueueDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::BasicProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Stream of deliveries produced by a consumer.
///
/// The stream ends when the underlying channel or connection is closed.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Dials broker connections.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection. `name` is reported to the broker as the connection name.
    async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Connection>, AmqpError>;
}

/// A live broker connection shared by the whole process.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_closed(&self) -> bool;

    async fn create_channel(&self) -> Result<Arc<dyn Channel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Options used when subscribing to a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// The broker considers messages acknowledged as soon as they are delivered.
    pub no_ack: bool,
    /// No other consumer may subscribe to the queue.
    pub exclusive: bool,
}

/// A channel opened on a connection.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Deletes an exchange; with `if_unused` the broker refuses while queues are bound.
    async fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), AmqpError>;

    /// Declares a queue and returns its name, which the broker generates when
    /// the definition name is empty.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        no_wait: bool,
    ) -> Result<(), AmqpError>;

    /// Removes every ready message from a queue and returns how many were dropped.
    async fn purge_queue(&self, name: &str, no_wait: bool) -> Result<u32, AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Settles one delivery on the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, multiple: bool) -> Result<(), AmqpError>;

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AmqpError>;

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// A message delivered to a consumer.
#[derive(Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub consumer_tag: String,
    /// Messages remaining in the queue; brokers only report it for polled messages.
    pub message_count: u32,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    pub acker: Arc<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("consumer_tag", &self.consumer_tag)
            .field("properties", &self.properties)
            .field("data", &self.data.len())
            .finish()
    }
}

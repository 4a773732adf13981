// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! A queue definition carries its own binding: the exchange it belongs to and
//! the routing-key pattern used to bind it. A queue without an exchange is valid
//! but inert and is skipped at declare time.

use lapin::types::{AMQPValue, LongInt, ShortString};
use std::collections::BTreeMap;

/// Per-queue message TTL, in milliseconds.
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// A queue to declare and bind at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) routing_key: String,
    pub(crate) exchange: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
}

impl QueueDefinition {
    /// Transient queue named `name`, bound with its own name once an exchange is set.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            routing_key: name.to_owned(),
            ..Default::default()
        }
    }

    /// Definition of a server-named, transient queue used for replies.
    pub(crate) fn anonymous() -> QueueDefinition {
        QueueDefinition::default().delete().exclusive()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange
    }

    pub fn binding_key(&self) -> &str {
        &self.routing_key
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.to_owned();
        self
    }

    /// Binding pattern; `*` and `#` work on topic exchanges.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Auto-delete after the last consumer leaves.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Owned by the declaring connection and deleted with it.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Applies to both the declaration and the binding.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Message TTL in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Arguments sent along with the queue declaration.
    pub fn arguments(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut args = BTreeMap::new();

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        if let Some(max_bytes) = self.max_length_bytes {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                AMQPValue::LongInt(LongInt::from(max_bytes)),
            );
        }

        args
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # rabbitmq-router
//!
//! A routing layer on top of RabbitMQ. Applications register exchanges, queues,
//! global middlewares and per-routing-key handlers on an `App`, then `listen`.
//! The app dials the broker, declares the topology, starts one consumer per
//! routing key and keeps the whole setup alive across connection losses.
//!
//! ```ignore
//! let app = App::new(Config::from_env());
//! app.add_exchanges([ExchangeDefinition::new("orders").topic()])
//!     .add_queues([QueueDefinition::new("billing").exchange("orders").routing_key("orders.created")])
//!     .use_middlewares([Arc::new(Logger::new()) as Arc<dyn Handler>])
//!     .add_consumer("orders.created", [handler_fn(|ctx| Box::pin(async move { ctx.ack().await }))]);
//! app.listen().await?;
//! ```

mod macros;

mod consumer;
mod dispatcher;
mod lifecycle;
mod otel;
mod publisher;
mod rpc;

pub mod app;
pub mod broker;
pub mod channel;
pub mod codec;
pub mod configs;
pub mod context;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod memory;
pub mod middlewares;
pub mod queue;
pub mod topology;

pub use app::{App, MessageHook};
pub use broker::{Acker, Channel, ConsumeOptions, Connection, Connector, Delivery, DeliveryStream};
pub use channel::LapinConnector;
pub use codec::{Codec, JsonCodec};
pub use configs::Config;
pub use context::MessageContext;
pub use errors::AmqpError;
pub use exchange::{ExchangeDefinition, ExchangeKind};
pub use handler::{bind_json, bind_xml, handler_fn, Handler, HandlerChain, HandlerResult};
pub use memory::{MemoryBroker, Settlement};
pub use queue::QueueDefinition;
pub use topology::{InstallReport, Topology};

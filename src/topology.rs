// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Registry
//!
//! This module holds the declarative description of the exchanges and queues an
//! application needs and installs it on the broker. Definitions are keyed by name,
//! so registering the same name twice keeps the last definition.
//!
//! Installation runs in a fixed order:
//! 1. every exchange is declared
//! 2. every queue attached to an exchange is declared and bound with its routing key
//!
//! Queues without an exchange are skipped and reported, never declared. Any
//! declaration failure aborts the installation and names the offending resource.

use crate::{
    broker::Channel,
    configs::Config,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    macros::{lifecycle_info, lifecycle_warn},
    queue::QueueDefinition,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Registry of the exchanges and queues to declare on the broker.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub(crate) exchanges: BTreeMap<String, ExchangeDefinition>,
    pub(crate) queues: BTreeMap<String, QueueDefinition>,
}

/// Outcome of a successful installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub exchanges: Vec<String>,
    pub queues: Vec<String>,
    /// Queues left out because they have no exchange.
    pub skipped: Vec<String>,
}

impl Topology {
    pub fn new() -> Self {
        Topology::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.add_exchange(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.add_queue(def);
        self
    }

    pub(crate) fn add_exchange(&mut self, def: ExchangeDefinition) {
        self.exchanges.insert(def.name.clone(), def);
    }

    pub(crate) fn add_queue(&mut self, def: QueueDefinition) {
        self.queues.insert(def.name.clone(), def);
    }

    pub fn get_exchange(&self, name: &str) -> Option<&ExchangeDefinition> {
        self.exchanges.get(name)
    }

    pub fn get_queue(&self, name: &str) -> Option<&QueueDefinition> {
        self.queues.get(name)
    }

    /// Name of the queue a consumer registered for `routing_key` subscribes to.
    ///
    /// This is the first queue bound with exactly that routing key, or the
    /// routing key itself when no registered queue declares it.
    pub fn queue_for_route<'a>(&'a self, routing_key: &'a str) -> &'a str {
        self.queues
            .values()
            .find(|queue| !queue.exchange.is_empty() && queue.routing_key == routing_key)
            .map(|queue| queue.name.as_str())
            .unwrap_or(routing_key)
    }

    /// Installs the topology to the RabbitMQ server.
    pub async fn install(
        &self,
        channel: &dyn Channel,
        cfg: &Config,
    ) -> Result<InstallReport, AmqpError> {
        let mut report = InstallReport::default();
        self.install_exchanges(channel, cfg, &mut report).await?;
        self.install_queues(channel, cfg, &mut report).await?;
        Ok(report)
    }

    async fn install_exchanges(
        &self,
        channel: &dyn Channel,
        cfg: &Config,
        report: &mut InstallReport,
    ) -> Result<(), AmqpError> {
        lifecycle_info!(cfg, "registering exchanges...");

        for exch in self.exchanges.values() {
            debug!("creating exchange: {}", exch.name);

            if let Err(err) = channel.declare_exchange(exch).await {
                error!(
                    error = err.to_string(),
                    name = exch.name,
                    "error to declare the exchange"
                );
                return Err(match err {
                    AmqpError::DeclareExchangeError(..) => err,
                    other => AmqpError::DeclareExchangeError(exch.name.clone(), other.to_string()),
                });
            }

            lifecycle_info!(cfg, exchange = exch.name, "exchange registered");
            report.exchanges.push(exch.name.clone());
        }

        Ok(())
    }

    async fn install_queues(
        &self,
        channel: &dyn Channel,
        cfg: &Config,
        report: &mut InstallReport,
    ) -> Result<(), AmqpError> {
        lifecycle_info!(cfg, "registering queues...");

        for def in self.queues.values() {
            if def.exchange.is_empty() {
                lifecycle_warn!(cfg, queue = def.name, "queue skipped (no exchange)");
                report.skipped.push(def.name.clone());
                continue;
            }

            debug!("creating queue: {}", def.name);

            let name = match channel.declare_queue(def).await {
                Err(err) => {
                    error!(error = err.to_string(), name = def.name, "error to declare the queue");
                    return Err(match err {
                        AmqpError::DeclareQueueError(..) => err,
                        other => AmqpError::DeclareQueueError(def.name.clone(), other.to_string()),
                    });
                }
                Ok(name) => name,
            };

            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                name, def.exchange, def.routing_key
            );

            if let Err(err) = channel
                .bind_queue(&name, &def.exchange, &def.routing_key, def.no_wait)
                .await
            {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(AmqpError::BindingExchangeToQueueError(
                    def.exchange.clone(),
                    name,
                ));
            }

            lifecycle_info!(cfg, queue = name, "queue registered");
            report.queues.push(name);
        }

        Ok(())
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module starts one consumer per registered routing key. Each consumer owns
//! a consume channel and a reply channel, and processes every delivery in its own
//! task, so messages of one route run concurrently while the handlers of a single
//! message run in order.
//!
//! `Config::max_in_flight` bounds the number of tasks alive at once per consumer;
//! the consumer stops pulling deliveries until a running task completes.

use crate::{
    app::{App, Registry},
    broker::{ConsumeOptions, Connection},
    consumer::consume,
    errors::AmqpError,
    handler::{compose, HandlerChain},
    macros::lifecycle_info,
};
use futures_util::StreamExt;
use opentelemetry::global;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};
use uuid::Uuid;

/// Fails with `EmptyHandlerChain` for the first route registered without handlers.
pub(crate) fn check_routes(registry: &Registry) -> Result<(), AmqpError> {
    match registry
        .routes
        .iter()
        .find(|(_, handlers)| handlers.is_empty())
    {
        Some((routing_key, _)) => {
            error!(routing_key, "no handler registered for the route");
            Err(AmqpError::EmptyHandlerChain(routing_key.clone()))
        }
        None => Ok(()),
    }
}

pub(crate) async fn start_consumers(
    app: &App,
    conn: &dyn Connection,
    registry: &Registry,
) -> Result<(), AmqpError> {
    check_routes(registry)?;

    for (routing_key, handlers) in &registry.routes {
        let chain = compose(&registry.middlewares, handlers);
        let queue = registry.topology.queue_for_route(routing_key);
        start_consumer(app, conn, routing_key, queue, chain).await?;
    }

    Ok(())
}

async fn start_consumer(
    app: &App,
    conn: &dyn Connection,
    routing_key: &str,
    queue: &str,
    chain: HandlerChain,
) -> Result<(), AmqpError> {
    let cfg = app.config();
    let channel = conn.create_channel().await?;
    let replies = conn.create_channel().await?;
    let consumer_tag = format!("{}.{}", cfg.app_name, Uuid::new_v4().simple());

    let mut deliveries = match channel
        .consume(queue, &consumer_tag, ConsumeOptions::default())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                routing_key, queue, "failure to create the consumer"
            );
            Err(AmqpError::BindingConsumerError(routing_key.to_owned()))
        }
        Ok(c) => Ok(c),
    }?;

    lifecycle_info!(cfg, routing_key, queue, consumer_tag, "consumer registered");

    let app = app.clone();
    let routing_key = routing_key.to_owned();
    let in_flight = cfg.max_in_flight.map(|max| Arc::new(Semaphore::new(max)));

    tokio::spawn(async move {
        let _channel = channel;

        while let Some(result) = deliveries.next().await {
            match result {
                Ok(delivery) => {
                    let permit = match &in_flight {
                        Some(semaphore) => match semaphore.clone().acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => break,
                        },
                        None => None,
                    };

                    let app = app.clone();
                    let chain = chain.clone();
                    let replies = replies.clone();

                    tokio::spawn(async move {
                        consume(
                            &global::tracer("amqp consumer"),
                            app,
                            delivery,
                            chain,
                            replies,
                        )
                        .await;
                        drop(permit);
                    });
                }

                Err(err) => error!(error = err.to_string(), routing_key, "errors consume msg"),
            }
        }

        debug!(routing_key, "consumer stopped");
    });

    Ok(())
}

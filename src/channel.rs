// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connections and Channels
//!
//! This module implements the broker capabilities on top of `lapin`. It handles the
//! creation of AMQP connections and channels and translates every protocol call and
//! failure into the crate's own types.

use crate::{
    broker::{Acker, Channel, ConsumeOptions, Connection, Connector, Delivery, DeliveryStream},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicRejectOptions, ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions,
        QueueDeclareOptions, QueuePurgeOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ with `lapin`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinConnector;

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Connection>, AmqpError> {
        debug!("creating amqp connection...");
        let options =
            ConnectionProperties::default().with_connection_name(LongString::from(name.to_owned()));

        match lapin::Connection::connect(url, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(LapinConnection { inner: conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

pub struct LapinConnection {
    inner: lapin::Connection,
}

#[async_trait]
impl Connection for LapinConnection {
    fn is_closed(&self) -> bool {
        !self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<Arc<dyn Channel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel { inner: c }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

pub struct LapinChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for LapinChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.inner
            .exchange_declare(
                &def.name,
                def.kind.clone().into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(def.name.clone(), err.to_string()))
    }

    async fn delete_exchange(&self, name: &str, if_unused: bool) -> Result<(), AmqpError> {
        self.inner
            .exchange_delete(
                name,
                ExchangeDeleteOptions {
                    if_unused,
                    nowait: false,
                },
            )
            .await
            .map_err(|err| AmqpError::DeleteExchangeError(name.to_owned(), err.to_string()))
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let queue = self
            .inner
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.arguments()),
            )
            .await
            .map_err(|err| AmqpError::DeclareQueueError(def.name.clone(), err.to_string()))?;

        Ok(queue.name().as_str().to_owned())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        no_wait: bool,
    ) -> Result<(), AmqpError> {
        match self
            .inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: no_wait },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn purge_queue(&self, name: &str, no_wait: bool) -> Result<u32, AmqpError> {
        self.inner
            .queue_purge(name, QueuePurgeOptions { nowait: no_wait })
            .await
            .map_err(|err| AmqpError::PurgeQueueError(name.to_owned(), err.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer_tag.to_owned();

        Ok(consumer
            .map(move |result| match result {
                Ok(delivery) => Ok(Delivery {
                    delivery_tag: delivery.delivery_tag,
                    exchange: delivery.exchange.to_string(),
                    routing_key: delivery.routing_key.to_string(),
                    redelivered: delivery.redelivered,
                    consumer_tag: tag.clone(),
                    message_count: 0,
                    properties: delivery.properties,
                    data: delivery.data,
                    acker: Arc::new(LapinAcker {
                        inner: delivery.acker,
                    }),
                }),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}

struct LapinAcker {
    inner: lapin::acker::Acker,
}

#[async_trait]
impl Acker for LapinAcker {
    async fn ack(&self, multiple: bool) -> Result<(), AmqpError> {
        self.inner
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides the publishing side of `App`. Every message gets a fresh
//! message id, a timestamp and the current OpenTelemetry context in its headers.
//! The publish step is bounded by `Config::timeout`.

use crate::{
    app::App,
    broker::Channel,
    codec::{self, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE, XML_CONTENT_TYPE},
    errors::AmqpError,
    otel,
};
use lapin::{types::ShortString, BasicProperties};
use opentelemetry::Context;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::timeout;
use tracing::{debug, error};
use uuid::Uuid;

/// Properties shared by every outgoing message.
pub(crate) fn message_properties(content_type: &str, ctx: &Context) -> BasicProperties {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    let props = BasicProperties::default()
        .with_content_type(ShortString::from(content_type))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_timestamp(now);

    otel::inject(ctx, props)
}

pub(crate) async fn publish_with_deadline(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
    props: BasicProperties,
    deadline: Duration,
) -> Result<(), AmqpError> {
    match timeout(deadline, channel.publish(exchange, routing_key, payload, props)).await {
        Ok(result) => result,
        Err(_) => {
            error!(exchange, routing_key, "publish timed out");
            Err(AmqpError::PublishTimeout)
        }
    }
}

impl App {
    /// Publishes a raw body to `exchange` with `routing_key`.
    pub async fn publish(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &[u8],
    ) -> Result<(), AmqpError> {
        self.publish_with(routing_key, exchange, body, TEXT_CONTENT_TYPE)
            .await
    }

    /// Publishes `body` encoded with the configured codec.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &T,
    ) -> Result<(), AmqpError> {
        let payload = codec::encode_json(self.config().codec.as_ref(), body)?;
        self.publish_with(routing_key, exchange, &payload, JSON_CONTENT_TYPE)
            .await
    }

    pub async fn publish_xml<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &T,
    ) -> Result<(), AmqpError> {
        let payload = codec::encode_xml(body)?;
        self.publish_with(routing_key, exchange, &payload, XML_CONTENT_TYPE)
            .await
    }

    async fn publish_with(
        &self,
        routing_key: &str,
        exchange: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<(), AmqpError> {
        let session = self.session().await?;

        debug!(exchange, routing_key, "publishing message");
        let result = publish_with_deadline(
            session.channel.as_ref(),
            exchange,
            routing_key,
            payload,
            message_properties(content_type, &Context::current()),
            self.config().timeout,
        )
        .await;

        session.end().await;
        result
    }
}

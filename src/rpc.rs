// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Request/Reply
//!
//! A request declares a server-named, exclusive reply queue, publishes the body
//! with a fresh correlation id and `reply_to` pointing at that queue, then waits
//! for the first reply carrying the same correlation id. Replies with any other
//! correlation id are dropped.
//!
//! The wait is unbounded unless `Config::reply_timeout` is set.

use crate::{
    app::App,
    broker::{Channel, ConsumeOptions, DeliveryStream},
    codec::{self, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE, XML_CONTENT_TYPE},
    configs::Config,
    errors::AmqpError,
    publisher::{message_properties, publish_with_deadline},
    queue::QueueDefinition,
};
use futures_util::StreamExt;
use lapin::types::ShortString;
use opentelemetry::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::timeout;
use tracing::{debug, error};
use uuid::Uuid;

/// 32 lowercase alphanumeric characters.
pub(crate) fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl App {
    /// Publishes `body` and waits for the correlated reply.
    pub async fn request(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, AmqpError> {
        self.request_with(routing_key, exchange, body, TEXT_CONTENT_TYPE)
            .await
    }

    /// JSON request, decoding the reply with the configured codec.
    pub async fn request_json<Req, Res>(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &Req,
    ) -> Result<Res, AmqpError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let codec = self.config().codec.clone();
        let payload = codec::encode_json(codec.as_ref(), body)?;
        let reply = self
            .request_with(routing_key, exchange, &payload, JSON_CONTENT_TYPE)
            .await?;
        codec::decode_json(codec.as_ref(), &reply)
    }

    pub async fn request_xml<Req, Res>(
        &self,
        routing_key: &str,
        exchange: &str,
        body: &Req,
    ) -> Result<Res, AmqpError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = codec::encode_xml(body)?;
        let reply = self
            .request_with(routing_key, exchange, &payload, XML_CONTENT_TYPE)
            .await?;
        codec::decode_xml(&reply)
    }

    async fn request_with(
        &self,
        routing_key: &str,
        exchange: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<Vec<u8>, AmqpError> {
        let session = self.session().await?;

        let result = call(
            session.channel.as_ref(),
            self.config(),
            routing_key,
            exchange,
            payload,
            content_type,
        )
        .await;

        session.end().await;
        result
    }
}

async fn call(
    channel: &dyn Channel,
    cfg: &Config,
    routing_key: &str,
    exchange: &str,
    payload: &[u8],
    content_type: &str,
) -> Result<Vec<u8>, AmqpError> {
    let reply_queue = channel.declare_queue(&QueueDefinition::anonymous()).await?;
    let correlation_id = new_correlation_id();

    let mut replies = channel
        .consume(
            &reply_queue,
            &format!("{}.reply.{}", cfg.app_name, correlation_id),
            ConsumeOptions {
                no_ack: true,
                exclusive: true,
            },
        )
        .await?;

    let props = message_properties(content_type, &Context::current())
        .with_correlation_id(ShortString::from(correlation_id.clone()))
        .with_reply_to(ShortString::from(reply_queue.clone()));

    debug!(
        exchange,
        routing_key,
        correlation_id,
        reply_queue,
        "sending request"
    );
    publish_with_deadline(channel, exchange, routing_key, payload, props, cfg.timeout).await?;

    match cfg.reply_timeout {
        None => await_reply(&mut replies, &correlation_id).await,
        Some(limit) => match timeout(limit, await_reply(&mut replies, &correlation_id)).await {
            Ok(reply) => reply,
            Err(_) => {
                error!(correlation_id, "no reply before the deadline");
                Err(AmqpError::ReplyTimeout)
            }
        },
    }
}

async fn await_reply(
    replies: &mut DeliveryStream,
    correlation_id: &str,
) -> Result<Vec<u8>, AmqpError> {
    while let Some(result) = replies.next().await {
        let delivery = result?;

        let matches = delivery
            .properties
            .correlation_id()
            .as_ref()
            .is_some_and(|id| id.as_str() == correlation_id);

        if matches {
            return Ok(delivery.data);
        }

        debug!(correlation_id, "discarding reply for another request");
    }

    Err(AmqpError::ReplyChannelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_32_lowercase_alphanumerics() {
        let id = new_correlation_id();

        assert_eq!(id.len(), 32);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(id, new_correlation_id());
    }
}

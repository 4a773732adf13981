// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Context
//!
//! A `MessageContext` is created for every delivered message and owned by the
//! task processing it. It exposes the delivery, drives the handler chain through
//! `next`, settles the message on the broker and publishes replies.

use crate::{
    app::App,
    broker::{Channel, Delivery},
    codec::{self, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE, XML_CONTENT_TYPE},
    errors::AmqpError,
    handler::{HandlerChain, HandlerResult},
    publisher,
};
use futures_util::future::BoxFuture;
use lapin::types::FieldTable;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    any::Any,
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

type Locals = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct MessageContext {
    app: App,
    delivery: Delivery,
    replies: Arc<dyn Channel>,
    chain: HandlerChain,
    cursor: usize,
    settled: bool,
    locals: Option<Locals>,
    otel: opentelemetry::Context,
}

impl MessageContext {
    pub(crate) fn new(
        app: App,
        delivery: Delivery,
        replies: Arc<dyn Channel>,
        chain: HandlerChain,
        otel: opentelemetry::Context,
    ) -> Self {
        MessageContext {
            app,
            delivery,
            replies,
            chain,
            cursor: 0,
            settled: false,
            locals: None,
            otel,
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Trace context extracted from the message headers.
    pub fn otel_context(&self) -> &opentelemetry::Context {
        &self.otel
    }

    pub fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.delivery
            .properties
            .content_type()
            .as_ref()
            .map(|v| v.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|v| v.as_str())
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.delivery
            .properties
            .reply_to()
            .as_ref()
            .map(|v| v.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .message_id()
            .as_ref()
            .map(|v| v.as_str())
    }

    /// Publication time, carried in seconds since the epoch.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.delivery
            .properties
            .timestamp()
            .as_ref()
            .map(|secs| UNIX_EPOCH + Duration::from_secs(*secs))
    }

    /// The message type property.
    pub fn kind(&self) -> Option<&str> {
        self.delivery.properties.kind().as_ref().map(|v| v.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .user_id()
            .as_ref()
            .map(|v| v.as_str())
    }

    pub fn app_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .app_id()
            .as_ref()
            .map(|v| v.as_str())
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.delivery.properties.headers().as_ref()
    }

    pub fn consumer_tag(&self) -> &str {
        &self.delivery.consumer_tag
    }

    pub fn message_count(&self) -> u32 {
        self.delivery.message_count
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.delivery.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.delivery.routing_key
    }

    /// Decodes the body as JSON with the configured codec.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        codec::decode_json(self.app.config().codec.as_ref(), &self.delivery.data)
    }

    pub fn bind_xml<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        codec::decode_xml(&self.delivery.data)
    }

    /// Answers the sender of the message, then acknowledges it.
    ///
    /// The reply goes to the default exchange under the `reply_to` address and
    /// carries the correlation id of the request. The message is acknowledged
    /// whether or not the reply could be sent; a missing `reply_to` or a failed
    /// publish is returned once the message is settled.
    pub async fn reply(&mut self, body: &[u8]) -> HandlerResult {
        self.send_reply(body, TEXT_CONTENT_TYPE).await
    }

    pub async fn reply_json<T: Serialize + ?Sized>(&mut self, body: &T) -> HandlerResult {
        let payload = codec::encode_json(self.app.config().codec.as_ref(), body)?;
        self.send_reply(&payload, JSON_CONTENT_TYPE).await
    }

    pub async fn reply_xml<T: Serialize + ?Sized>(&mut self, body: &T) -> HandlerResult {
        let payload = codec::encode_xml(body)?;
        self.send_reply(&payload, XML_CONTENT_TYPE).await
    }

    async fn send_reply(&mut self, payload: &[u8], content_type: &str) -> HandlerResult {
        let published = self.publish_reply(payload, content_type).await;
        if let Err(err) = &published {
            warn!(
                error = err.to_string(),
                routing_key = self.routing_key(),
                "reply not sent"
            );
        }

        self.ack().await?;
        published
    }

    async fn publish_reply(&self, payload: &[u8], content_type: &str) -> HandlerResult {
        let reply_to = match self.reply_to() {
            Some(reply_to) if !reply_to.is_empty() => reply_to.to_owned(),
            _ => return Err(AmqpError::MissingReplyTo),
        };

        let mut props = publisher::message_properties(content_type, &self.otel);
        if let Some(id) = self.delivery.properties.correlation_id() {
            props = props.with_correlation_id(id.clone());
        }

        debug!(reply_to, "sending reply");
        publisher::publish_with_deadline(
            self.replies.as_ref(),
            "",
            &reply_to,
            payload,
            props,
            self.app.config().timeout,
        )
        .await
    }

    /// Acknowledges this delivery alone; earlier deliveries of the channel are
    /// never settled in bulk.
    pub async fn ack(&mut self) -> HandlerResult {
        self.delivery.acker.ack(false).await?;
        self.settled = true;
        Ok(())
    }

    /// Negative acknowledgement of this delivery alone.
    pub async fn nack(&mut self, requeue: bool) -> HandlerResult {
        self.delivery.acker.nack(false, requeue).await?;
        self.settled = true;
        Ok(())
    }

    pub async fn reject(&mut self, requeue: bool) -> HandlerResult {
        self.delivery.acker.reject(requeue).await?;
        self.settled = true;
        Ok(())
    }

    pub(crate) fn settled(&self) -> bool {
        self.settled
    }

    /// Runs the next handler of the chain. Past the last handler this does nothing.
    pub fn next(&mut self) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async move {
            self.cursor = self.cursor.saturating_add(1);

            match self.chain.get(self.cursor).cloned() {
                Some(handler) => handler.call(self).await,
                None => Ok(()),
            }
        })
    }

    pub(crate) async fn run(&mut self) -> HandlerResult {
        self.cursor = 0;

        match self.chain.first().cloned() {
            Some(handler) => handler.call(self).await,
            None => Ok(()),
        }
    }

    /// Value stored under `key` for this message, if it has type `T`.
    pub fn local<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals
            .as_ref()?
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn set_local<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.locals
            .get_or_insert_with(HashMap::new)
            .insert(key.to_owned(), Box::new(value));
    }
}

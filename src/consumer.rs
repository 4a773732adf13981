// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module processes a single delivery: it opens a consumer span parented on
//! the trace context found in the message headers, runs the on-message hooks,
//! then drives the handler chain. Failures are recorded on the span and logged;
//! they never reach the consumer loop.

use crate::{
    app::App,
    broker::{Channel, Delivery},
    context::MessageContext,
    handler::HandlerChain,
    otel,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

pub(crate) async fn consume(
    tracer: &BoxedTracer,
    app: App,
    delivery: Delivery,
    chain: HandlerChain,
    replies: Arc<dyn Channel>,
) {
    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, &delivery.routing_key);

    debug!(
        "received: {} - exchange: {}",
        delivery.routing_key, delivery.exchange,
    );

    for hook in app.message_hooks() {
        hook(&delivery);
    }

    let mut msg = MessageContext::new(app, delivery, replies, chain, ctx);

    match msg.run().await {
        Ok(()) => {
            debug!("message successfully processed");
            span.set_status(Status::Ok);
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                routing_key = msg.routing_key(),
                delivery_tag = msg.delivery_tag(),
                "error handling msg"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
        }
    }

    if !msg.settled() {
        warn!(
            routing_key = msg.routing_key(),
            delivery_tag = msg.delivery_tag(),
            "message left unacknowledged"
        );
    }
}

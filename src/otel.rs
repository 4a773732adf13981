// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Propagation
//!
//! Outgoing messages carry the current trace context in their AMQP headers;
//! every consumed message opens a consumer span parented on the context found
//! in its headers.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::warn;

type Headers = BTreeMap<ShortString, AMQPValue>;

/// Writes propagation fields as lowercase long-string headers.
struct HeaderInjector<'a>(&'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(
            ShortString::from(key.to_lowercase()),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads propagation fields; headers that are not strings are invisible.
struct HeaderExtractor<'a>(&'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            AMQPValue::LongString(value) => match std::str::from_utf8(value.as_bytes()) {
                Ok(text) => Some(text),
                Err(err) => {
                    warn!(header = key, error = err.to_string(), "undecodable trace header");
                    None
                }
            },
            AMQPValue::ShortString(value) => Some(value.as_str()),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(ShortString::as_str).collect()
    }
}

/// Writes the trace context `ctx` into the headers of outgoing message properties.
///
/// Headers already present on `props` are kept.
pub(crate) fn inject(ctx: &Context, props: AMQPProperties) -> AMQPProperties {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector(&mut headers))
    });

    if headers.is_empty() {
        return props;
    }

    props.with_headers(FieldTable::from(headers))
}

/// Starts a consumer span whose parent is the context carried by `props`.
pub(crate) fn new_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let empty = Headers::new();
    let headers = props.headers().as_ref().map_or(&empty, FieldTable::inner);

    let ctx =
        global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)));

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

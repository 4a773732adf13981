// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A handler chain is the ordered list of global middlewares followed by the
//! handlers registered for one routing key. Every handler receives the message
//! context and decides whether the rest of the chain runs by calling
//! `ctx.next()`.

use crate::{context::MessageContext, errors::AmqpError};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::{marker::PhantomData, sync::Arc};

/// Outcome of a handler, propagated back up through `next`.
pub type HandlerResult = Result<(), AmqpError>;

/// Immutable chain shared by every message of one consumer.
pub type HandlerChain = Arc<[Arc<dyn Handler>]>;

/// Called when a bind helper fails to decode the message body.
pub type BindErrorHook = Arc<
    dyn for<'a> Fn(&'a mut MessageContext, AmqpError) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
>;

/// A step of the message pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult;
}

pub(crate) fn compose(
    middlewares: &[Arc<dyn Handler>],
    handlers: &[Arc<dyn Handler>],
) -> HandlerChain {
    middlewares.iter().chain(handlers).cloned().collect()
}

/// Handler built from a closure, see `handler_fn`.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut MessageContext) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult {
        (self.f)(ctx).await
    }
}

/// Turns a closure into a handler.
///
/// ```ignore
/// let handler = handler_fn(|ctx| Box::pin(async move { ctx.ack().await }));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a mut MessageContext) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler { f })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Xml,
}

struct Binder<T, F> {
    format: Format,
    callback: F,
    _payload: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F> Handler for Binder<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: for<'a> Fn(&'a mut MessageContext, T) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult {
        let decoded = match self.format {
            Format::Json => ctx.bind_json::<T>(),
            Format::Xml => ctx.bind_xml::<T>(),
        };

        match decoded {
            Ok(payload) => (self.callback)(ctx, payload).await,
            Err(err) => {
                let hook = ctx.app().bind_error_hook();
                match hook {
                    Some(hook) => hook(ctx, err).await,
                    None => Err(err),
                }
            }
        }
    }
}

/// Handler decoding the body as JSON with the configured codec before calling `callback`.
///
/// A body that fails to decode goes to the application's bind error hook when one is
/// registered; otherwise the decode error becomes the result of the chain.
pub fn bind_json<T, F>(callback: F) -> Arc<dyn Handler>
where
    T: DeserializeOwned + Send + 'static,
    F: for<'a> Fn(&'a mut MessageContext, T) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(Binder {
        format: Format::Json,
        callback,
        _payload: PhantomData,
    })
}

/// XML counterpart of `bind_json`.
pub fn bind_xml<T, F>(callback: F) -> Arc<dyn Handler>
where
    T: DeserializeOwned + Send + 'static,
    F: for<'a> Fn(&'a mut MessageContext, T) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(Binder {
        format: Format::Xml,
        callback,
        _payload: PhantomData,
    })
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::Skip;
use crate::{
    context::MessageContext,
    errors::AmqpError,
    handler::{Handler, HandlerResult},
};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tracing::error;

/// Called with the context and the panic message.
pub type PanicHook = Arc<dyn Fn(&MessageContext, &str) + Send + Sync>;

/// Turns a panic in the rest of the chain into a `HandlerPanicked` error.
///
/// The consumer keeps running either way, since every message has its own task;
/// this middleware makes the panic visible as a regular chain failure.
#[derive(Clone, Default)]
pub struct Recover {
    skip: Option<Skip>,
    on_panic: Option<PanicHook>,
}

impl Recover {
    pub fn new() -> Self {
        Recover::default()
    }

    pub fn skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&MessageContext) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    pub fn on_panic<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MessageContext, &str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(hook));
        self
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[async_trait]
impl Handler for Recover {
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult {
        if let Some(skip) = &self.skip {
            if skip(ctx) {
                return ctx.next().await;
            }
        }

        let reason = match AssertUnwindSafe(ctx.next()).catch_unwind().await {
            Ok(result) => return result,
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!(
            reason,
            routing_key = ctx.routing_key(),
            "handler panicked"
        );

        if let Some(hook) = &self.on_panic {
            hook(ctx, &reason);
        }

        Err(AmqpError::HandlerPanicked(reason))
    }
}

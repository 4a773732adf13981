// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::{
    context::MessageContext,
    handler::{Handler, HandlerResult},
};
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Logs every message once the rest of the chain has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Logger
    }
}

#[async_trait]
impl Handler for Logger {
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult {
        let started = Instant::now();
        let result = ctx.next().await;

        info!(
            correlation_id = ctx.correlation_id().unwrap_or_default(),
            exchange = ctx.exchange(),
            routing_key = ctx.routing_key(),
            elapsed = ?started.elapsed(),
            ok = result.is_ok(),
            "message handled"
        );

        result
    }
}

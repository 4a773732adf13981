// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use super::Skip;
use crate::{
    context::MessageContext,
    handler::{Handler, HandlerResult},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::warn;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    count: u32,
}

/// Caps the number of messages handled per routing key within a fixed window.
///
/// Messages over the limit go to `on_limit_reached` when set. Otherwise the
/// sender gets the JSON reply `{"message":"Limit reached"}` and the message is
/// acknowledged, even when it carries no `reply_to`.
pub struct Limiter {
    limit: u32,
    window: Duration,
    skip: Option<Skip>,
    on_limit_reached: Option<Arc<dyn Handler>>,
    windows: Mutex<HashMap<String, Window>>,
}

impl Limiter {
    /// Allows `limit` messages per routing key every minute.
    pub fn new(limit: u32) -> Self {
        Limiter {
            limit,
            window: DEFAULT_WINDOW,
            skip: None,
            on_limit_reached: None,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&MessageContext) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    pub fn on_limit_reached(mut self, handler: Arc<dyn Handler>) -> Self {
        self.on_limit_reached = Some(handler);
        self
    }

    fn admit(&self, routing_key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(routing_key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.limit {
            return false;
        }

        window.count += 1;
        true
    }
}

#[async_trait]
impl Handler for Limiter {
    async fn call(&self, ctx: &mut MessageContext) -> HandlerResult {
        if let Some(skip) = &self.skip {
            if skip(ctx) {
                return ctx.next().await;
            }
        }

        if self.admit(ctx.routing_key()) {
            return ctx.next().await;
        }

        warn!(
            routing_key = ctx.routing_key(),
            limit = self.limit,
            "limit reached"
        );

        match &self.on_limit_reached {
            Some(handler) => handler.call(ctx).await,
            None => ctx.reply_json(&json!({ "message": "Limit reached" })).await,
        }
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

#![allow(dead_code)]

use parking_lot::Mutex;
use rabbitmq_router::{
    handler_fn, App, Config, ExchangeDefinition, Handler, MemoryBroker, QueueDefinition,
    Settlement,
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn config() -> Config {
    Config::new()
        .app_name("router-tests")
        .connect_retries(0)
        .connect_retry_interval(Duration::ZERO)
        .watch_interval(Duration::from_millis(20))
        .timeout(Duration::from_secs(1))
        .disable_logging(true)
}

pub fn app(broker: &MemoryBroker) -> App {
    App::with_connector(config(), broker.clone())
}

/// Registers the `orders` topic exchange and the `billing` queue bound with `orders.created`.
pub fn orders_topology(app: &App) {
    app.add_exchanges([ExchangeDefinition::new("orders").topic()])
        .add_queues([QueueDefinition::new("billing")
            .exchange("orders")
            .routing_key("orders.created")]);
}

/// Records `label` and runs the rest of the chain.
pub fn step(log: &Log, label: &'static str) -> Arc<dyn Handler> {
    let log = log.clone();
    handler_fn(move |ctx| {
        let log = log.clone();
        Box::pin(async move {
            log.lock().push(label.to_owned());
            ctx.next().await
        })
    })
}

pub fn ack() -> Arc<dyn Handler> {
    handler_fn(|ctx| Box::pin(async move { ctx.ack().await }))
}

pub fn acks(broker: &MemoryBroker) -> usize {
    broker
        .settlements()
        .iter()
        .filter(|s| matches!(s, Settlement::Ack { .. }))
        .count()
}

/// Polls `check` until it holds or two seconds have passed.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);

    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }

    check()
}

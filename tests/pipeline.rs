// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod common;

use common::{ack, acks, app, eventually, log, orders_topology, step};
use rabbitmq_router::{handler_fn, AmqpError, MemoryBroker};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn middlewares_run_before_route_handlers_in_order() {
    // Arrange
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    orders_topology(&app);
    app.use_middlewares([step(&log, "m1"), step(&log, "m2")])
        .add_consumer(
            "orders.created",
            [step(&log, "h1"), step(&log, "h2"), step(&log, "h3"), ack()],
        );
    app.start().await.unwrap();

    // Act
    app.publish("orders.created", "orders", b"{}").await.unwrap();

    // Assert
    assert!(eventually(|| acks(&broker) == 1).await);
    assert_eq!(*log.lock(), vec!["m1", "m2", "h1", "h2", "h3"]);
}

#[tokio::test]
async fn a_handler_that_skips_next_stops_the_chain() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    orders_topology(&app);
    app.use_middlewares([step(&log, "auth"), ack()])
        .add_consumer("orders.created", [step(&log, "handler")]);
    app.start().await.unwrap();

    app.publish("orders.created", "orders", b"{}").await.unwrap();

    assert!(eventually(|| acks(&broker) == 1).await);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(*log.lock(), vec!["auth"]);
}

#[tokio::test]
async fn next_past_the_last_handler_is_a_no_op() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    orders_topology(&app);

    let recorded = log.clone();
    app.add_consumer(
        "orders.created",
        [handler_fn(move |ctx| {
            let log = recorded.clone();
            Box::pin(async move {
                let first = ctx.next().await;
                let second = ctx.next().await;
                log.lock().push(format!("{:?} {:?}", first, second));
                ctx.ack().await
            })
        })],
    );
    app.start().await.unwrap();

    app.publish("orders.created", "orders", b"{}").await.unwrap();

    assert!(eventually(|| log.lock().len() == 1).await);
    assert_eq!(*log.lock(), vec!["Ok(()) Ok(())"]);
}

#[tokio::test]
async fn downstream_errors_come_back_through_next() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    orders_topology(&app);

    let recorded = log.clone();
    app.use_middlewares([handler_fn(move |ctx| {
        let log = recorded.clone();
        Box::pin(async move {
            let result = ctx.next().await;
            log.lock().push(format!("{:?}", result));
            ctx.nack(false).await
        })
    })])
    .add_consumer(
        "orders.created",
        [handler_fn(|_ctx| {
            Box::pin(async move { Err::<(), _>(AmqpError::handler("out of stock")) })
        })],
    );
    app.start().await.unwrap();

    app.publish("orders.created", "orders", b"{}").await.unwrap();

    assert!(eventually(|| log.lock().len() == 1).await);
    assert_eq!(
        *log.lock(),
        vec![format!(
            "{:?}",
            Err::<(), _>(AmqpError::HandlerError("out of stock".to_owned()))
        )]
    );
    assert!(eventually(|| broker.settlements().len() == 1).await);
}

#[tokio::test]
async fn locals_belong_to_a_single_message() {
    // Arrange
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    orders_topology(&app);

    let recorded = log.clone();
    app.add_consumer(
        "orders.created",
        [handler_fn(move |ctx| {
            let log = recorded.clone();
            Box::pin(async move {
                let before = ctx.local::<String>("tenant").cloned();
                let body = String::from_utf8_lossy(ctx.body()).into_owned();
                ctx.set_local("tenant", body);

                let after = ctx.local::<String>("tenant").cloned();
                let wrong_type = ctx.local::<u32>("tenant").is_some();
                log.lock()
                    .push(format!("{:?} {:?} {}", before, after, wrong_type));
                ctx.ack().await
            })
        })],
    );
    app.start().await.unwrap();

    // Act
    app.publish("orders.created", "orders", b"acme").await.unwrap();
    app.publish("orders.created", "orders", b"globex").await.unwrap();

    // Assert
    assert!(eventually(|| acks(&broker) == 2).await);
    let mut entries = log.lock().clone();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            "None Some(\"acme\") false".to_owned(),
            "None Some(\"globex\") false".to_owned(),
        ]
    );
}

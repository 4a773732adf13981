// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod common;

use common::{ack, acks, app, config, eventually, log};
use futures_util::future::join_all;
use rabbitmq_router::{
    bind_json, bind_xml, handler_fn, AmqpError, App, ExchangeDefinition, MemoryBroker,
    QueueDefinition, Settlement,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SumRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SumResponse {
    sum: i64,
}

/// Server answering `math.sum` requests, with a decoy reply sent before the real one.
async fn math_server(broker: &MemoryBroker) -> App {
    let app = app(broker);
    app.add_exchanges([ExchangeDefinition::new("math")])
        .add_queues([QueueDefinition::new("sum")
            .exchange("math")
            .routing_key("math.sum")])
        .add_consumer(
            "math.sum",
            [bind_json::<SumRequest, _>(|ctx, req| {
                Box::pin(async move {
                    if let Some(reply_to) = ctx.reply_to().map(str::to_owned) {
                        ctx.app().publish(&reply_to, "", b"decoy").await?;
                    }
                    ctx.reply_json(&SumResponse { sum: req.a + req.b }).await
                })
            })],
        );
    app.start().await.unwrap();
    app
}

#[tokio::test]
async fn request_json_returns_the_correlated_reply() {
    // Arrange
    let broker = MemoryBroker::new();
    let _server = math_server(&broker).await;
    let client = app(&broker);

    // Act
    let reply = timeout(
        Duration::from_secs(2),
        client.request_json::<_, SumResponse>("math.sum", "math", &SumRequest { a: 2, b: 3 }),
    )
    .await
    .unwrap();

    // Assert
    assert_eq!(reply, Ok(SumResponse { sum: 5 }));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn interleaved_requests_each_get_their_own_reply() {
    let broker = MemoryBroker::new();
    let server = math_server(&broker).await;

    let requests = (0..10).map(|n| {
        let server = server.clone();
        async move {
            server
                .request_json::<_, SumResponse>("math.sum", "math", &SumRequest { a: n, b: n })
                .await
        }
    });
    let replies = timeout(Duration::from_secs(2), join_all(requests))
        .await
        .unwrap();

    let expected: Vec<Result<SumResponse, AmqpError>> =
        (0..10).map(|n| Ok(SumResponse { sum: 2 * n })).collect();
    assert_eq!(replies, expected);
    assert!(eventually(|| acks(&broker) == 10).await);
}

#[tokio::test]
async fn request_xml_round_trip() {
    let broker = MemoryBroker::new();
    let server = app(&broker);
    server
        .add_queues([QueueDefinition::new("sum.xml")
            .exchange("math")
            .routing_key("math.sum.xml")])
        .add_exchanges([ExchangeDefinition::new("math")])
        .add_consumer(
            "math.sum.xml",
            [bind_xml::<SumRequest, _>(|ctx, req| {
                Box::pin(async move { ctx.reply_xml(&SumResponse { sum: req.a + req.b }).await })
            })],
        );
    server.start().await.unwrap();

    let reply = timeout(
        Duration::from_secs(2),
        server.request_xml::<_, SumResponse>("math.sum.xml", "math", &SumRequest { a: 4, b: 5 }),
    )
    .await
    .unwrap();

    assert_eq!(reply, Ok(SumResponse { sum: 9 }));
}

#[tokio::test]
async fn reply_wait_is_bounded_by_the_reply_timeout() {
    let broker = MemoryBroker::new();
    let client = App::with_connector(
        config().reply_timeout(Duration::from_millis(50)),
        broker.clone(),
    );

    let reply = client.request("nobody.listens", "", b"ping").await;

    assert_eq!(reply, Err(AmqpError::ReplyTimeout));
}

#[tokio::test]
async fn publish_json_reaches_bind_json() {
    // Arrange
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    app.add_exchanges([ExchangeDefinition::new("math")])
        .add_queues([QueueDefinition::new("audit")
            .exchange("math")
            .routing_key("math.audit")]);

    let recorded = log.clone();
    app.add_consumer(
        "math.audit",
        [bind_json::<SumRequest, _>(move |ctx, req| {
            let log = recorded.clone();
            Box::pin(async move {
                log.lock().push(format!(
                    "{:?} {}",
                    req,
                    ctx.content_type().unwrap_or_default()
                ));
                ctx.ack().await
            })
        })],
    );
    app.start().await.unwrap();

    // Act
    app.publish_json("math.audit", "math", &SumRequest { a: 1, b: 2 })
        .await
        .unwrap();

    // Assert
    assert!(eventually(|| acks(&broker) == 1).await);
    assert_eq!(
        *log.lock(),
        vec!["SumRequest { a: 1, b: 2 } application/json"]
    );
}

#[tokio::test]
async fn undecodable_bodies_go_to_the_bind_error_hook() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    app.add_exchanges([ExchangeDefinition::new("math")])
        .add_queues([QueueDefinition::new("audit")
            .exchange("math")
            .routing_key("math.audit")])
        .add_consumer(
            "math.audit",
            [bind_json::<SumRequest, _>(|ctx, _req| {
                Box::pin(async move { ctx.ack().await })
            })],
        );

    let recorded = log.clone();
    app.on_bind_error(move |ctx, err| {
        let log = recorded.clone();
        Box::pin(async move {
            log.lock().push(format!("{}", matches!(err, AmqpError::DeserializeError(_))));
            ctx.reject(false).await
        })
    });
    app.start().await.unwrap();

    app.publish("math.audit", "math", b"not json").await.unwrap();

    assert!(eventually(|| broker.settlements().len() == 1).await);
    assert!(matches!(
        broker.settlements()[0],
        Settlement::Reject { requeue: false, .. }
    ));
    assert_eq!(*log.lock(), vec!["true"]);
}

#[tokio::test]
async fn without_a_hook_the_decode_error_ends_the_chain() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    app.add_exchanges([ExchangeDefinition::new("math")])
        .add_queues([QueueDefinition::new("audit")
            .exchange("math")
            .routing_key("math.audit")]);

    let recorded = log.clone();
    app.use_middlewares([handler_fn(move |ctx| {
        let log = recorded.clone();
        Box::pin(async move {
            let result = ctx.next().await;
            log.lock().push(format!(
                "{}",
                matches!(result, Err(AmqpError::DeserializeError(_)))
            ));
            ctx.ack().await
        })
    })])
    .add_consumer(
        "math.audit",
        [
            bind_json::<SumRequest, _>(|ctx, _req| Box::pin(async move { ctx.next().await })),
            ack(),
        ],
    );
    app.start().await.unwrap();

    app.publish("math.audit", "math", b"{\"a\":1}").await.unwrap();

    assert!(eventually(|| acks(&broker) == 1).await);
    assert_eq!(*log.lock(), vec!["true"]);
}

#[tokio::test]
async fn a_reply_without_reply_to_still_settles_the_message() {
    // Arrange
    let broker = MemoryBroker::new();
    let app = app(&broker);
    let log = log();
    app.add_exchanges([ExchangeDefinition::new("math")])
        .add_queues([QueueDefinition::new("audit")
            .exchange("math")
            .routing_key("math.audit")]);

    let recorded = log.clone();
    app.use_middlewares([handler_fn(move |ctx| {
        let log = recorded.clone();
        Box::pin(async move {
            let result = ctx.next().await;
            log.lock().push(format!("{:?}", result));
            Ok::<(), AmqpError>(())
        })
    })])
    .add_consumer(
        "math.audit",
        [handler_fn(|ctx| Box::pin(async move { ctx.reply(b"pong").await }))],
    );
    app.start().await.unwrap();

    // Act
    app.publish("math.audit", "math", b"ping").await.unwrap();

    // Assert
    assert!(eventually(|| acks(&broker) == 1).await);
    assert!(eventually(|| log.lock().len() == 1).await);
    assert_eq!(*log.lock(), vec!["Err(MissingReplyTo)"]);
    assert_eq!(broker.unacked_count(), 0);
    assert!(matches!(
        broker.settlements()[0],
        Settlement::Ack {
            multiple: false,
            ..
        }
    ));
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod common;

use common::{app, config, orders_topology};
use rabbitmq_router::{
    AmqpError, Connector, ExchangeDefinition, Handler, InstallReport, MemoryBroker,
    QueueDefinition, Topology,
};
use std::sync::Arc;

fn topology() -> Topology {
    Topology::new()
        .exchange(ExchangeDefinition::new("orders").topic().durable())
        .queue(
            QueueDefinition::new("billing")
                .exchange("orders")
                .routing_key("orders.created")
                .ttl(60_000),
        )
        .queue(QueueDefinition::new("orphan"))
}

#[tokio::test]
async fn installing_twice_is_idempotent() {
    // Arrange
    let broker = MemoryBroker::new();
    let conn = broker.connect("memory://", "test").await.unwrap();
    let channel = conn.create_channel().await.unwrap();
    let topology = topology();

    // Act
    let first = topology.install(channel.as_ref(), &config()).await;
    let second = topology.install(channel.as_ref(), &config()).await;

    // Assert
    let expected = InstallReport {
        exchanges: vec!["orders".to_owned()],
        queues: vec!["billing".to_owned()],
        skipped: vec!["orphan".to_owned()],
    };
    assert_eq!(first, Ok(expected.clone()));
    assert_eq!(second, Ok(expected));
    assert_eq!(
        broker.bindings("billing"),
        vec![("orders".to_owned(), "orders.created".to_owned())]
    );
}

#[tokio::test]
async fn queues_without_exchange_are_skipped_not_declared() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    app.add_queues([QueueDefinition::new("orphan")]);

    app.start().await.unwrap();

    assert!(app.is_connected());
    assert!(!broker.has_queue("orphan"));
}

#[tokio::test]
async fn conflicting_declaration_aborts_startup_and_names_the_exchange() {
    // Arrange
    let broker = MemoryBroker::new();
    let conn = broker.connect("memory://", "ops").await.unwrap();
    let channel = conn.create_channel().await.unwrap();
    channel
        .declare_exchange(&ExchangeDefinition::new("orders").fanout())
        .await
        .unwrap();

    let app = app(&broker);
    orders_topology(&app);

    // Act
    let result = app.start().await;

    // Assert
    assert!(matches!(
        result,
        Err(AmqpError::DeclareExchangeError(ref name, _)) if name == "orders"
    ));
    assert!(!app.is_connected());
    assert!(!broker.has_queue("billing"));
}

#[tokio::test]
async fn a_route_without_handlers_aborts_before_dialing() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    orders_topology(&app);
    app.add_consumer("orders.created", Vec::<Arc<dyn Handler>>::new());

    let result = app.start().await;

    assert_eq!(
        result,
        Err(AmqpError::EmptyHandlerChain("orders.created".to_owned()))
    );
    assert_eq!(broker.dial_count(), 0);
}

#[tokio::test]
async fn purge_queue_reports_the_dropped_messages() {
    // Arrange
    let broker = MemoryBroker::new();
    let app = app(&broker);
    orders_topology(&app);
    app.start().await.unwrap();
    for _ in 0..3 {
        app.publish("orders.created", "orders", b"{}").await.unwrap();
    }
    assert_eq!(broker.ready_count("billing"), 3);

    // Act
    let purged = app.purge_queue("billing", false).await;

    // Assert
    assert_eq!(purged, Ok(3));
    assert_eq!(broker.ready_count("billing"), 0);
    assert!(matches!(
        app.purge_queue("missing", false).await,
        Err(AmqpError::PurgeQueueError(ref name, _)) if name == "missing"
    ));
}

#[tokio::test]
async fn purge_exchange_refuses_an_exchange_in_use_unless_forced() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    orders_topology(&app);
    app.start().await.unwrap();

    let refused = app.purge_exchange("orders", false).await;
    assert!(matches!(
        refused,
        Err(AmqpError::DeleteExchangeError(ref name, _)) if name == "orders"
    ));
    assert!(broker.has_exchange("orders"));

    app.purge_exchange("orders", true).await.unwrap();
    assert!(!broker.has_exchange("orders"));
    assert!(broker.bindings("billing").is_empty());
}

#[test]
fn registered_topology_is_visible_from_the_app() {
    let broker = MemoryBroker::new();
    let app = app(&broker);
    orders_topology(&app);
    app.add_exchanges([ExchangeDefinition::new("orders").fanout()]);

    let topology = app.topology();

    assert_eq!(
        topology.get_exchange("orders").map(|e| e.exchange_kind().as_str()),
        Some("fanout")
    );
    assert_eq!(topology.queue_for_route("orders.created"), "billing");
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Application
//!
//! `App` ties the pieces together: it holds the configuration, the registry of
//! exchanges, queues, middlewares and routes, and the single broker connection.
//!
//! Startup runs in a fixed order:
//! 1. dial the broker within the retry budget
//! 2. declare every exchange, then every queue and its binding
//! 3. start one consumer per routing key
//!
//! A background watcher checks the connection every `watch_interval` and replays
//! the whole sequence when it finds the connection closed. Registration is meant
//! to happen before `listen`; later changes only reach consumers started by the
//! next reconnect.

use crate::{
    broker::{Connection, Connector, Delivery},
    channel::LapinConnector,
    configs::Config,
    context::MessageContext,
    dispatcher,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handler::{BindErrorHook, Handler, HandlerResult},
    lifecycle::{dial, Session},
    macros::{lifecycle_info, lifecycle_warn},
    queue::QueueDefinition,
    topology::Topology,
};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    time::sleep,
};
use tracing::{debug, error};

/// Callback run for every delivery before its handler chain.
pub type MessageHook = Arc<dyn Fn(&Delivery) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Registry {
    pub(crate) topology: Topology,
    pub(crate) middlewares: Vec<Arc<dyn Handler>>,
    pub(crate) routes: BTreeMap<String, Vec<Arc<dyn Handler>>>,
    pub(crate) on_bind_error: Option<BindErrorHook>,
    pub(crate) on_message: Vec<MessageHook>,
}

pub(crate) struct AppInner {
    config: Config,
    connector: Arc<dyn Connector>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    registry: Mutex<Registry>,
    watching: AtomicBool,
    shutdown: watch::Sender<bool>,
    startup: AsyncMutex<()>,
}

/// Handle to the application. Clones share the same state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    /// Creates an application talking to RabbitMQ through `lapin`.
    pub fn new(config: Config) -> App {
        App::with_connector(config, LapinConnector)
    }

    /// Creates an application dialing the broker with `connector`.
    pub fn with_connector(config: Config, connector: impl Connector + 'static) -> App {
        let (shutdown, _) = watch::channel(false);

        App {
            inner: Arc::new(AppInner {
                config,
                connector: Arc::new(connector),
                connection: RwLock::new(None),
                registry: Mutex::new(Registry::default()),
                watching: AtomicBool::new(false),
                shutdown,
                startup: AsyncMutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Snapshot of the registered topology.
    pub fn topology(&self) -> Topology {
        self.inner.registry.lock().topology.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|conn| !conn.is_closed())
    }

    pub fn add_exchanges(&self, defs: impl IntoIterator<Item = ExchangeDefinition>) -> &Self {
        let mut registry = self.inner.registry.lock();
        for def in defs {
            registry.topology.add_exchange(def);
        }
        self
    }

    pub fn add_queues(&self, defs: impl IntoIterator<Item = QueueDefinition>) -> &Self {
        let mut registry = self.inner.registry.lock();
        for def in defs {
            registry.topology.add_queue(def);
        }
        self
    }

    /// Registers the handlers run for messages consumed under `routing_key`.
    ///
    /// The consumer reads the queue bound with that routing key, or the queue
    /// named after the routing key when none is registered.
    pub fn add_consumer(
        &self,
        routing_key: &str,
        handlers: impl IntoIterator<Item = Arc<dyn Handler>>,
    ) -> &Self {
        self.inner
            .registry
            .lock()
            .routes
            .insert(routing_key.to_owned(), handlers.into_iter().collect());
        self
    }

    /// Appends middlewares run before the handlers of every route.
    pub fn use_middlewares(&self, handlers: impl IntoIterator<Item = Arc<dyn Handler>>) -> &Self {
        self.inner.registry.lock().middlewares.extend(handlers);
        self
    }

    /// Sets the hook receiving decode failures of `bind_json` and `bind_xml` handlers.
    pub fn on_bind_error<F>(&self, hook: F) -> &Self
    where
        F: for<'a> Fn(&'a mut MessageContext, AmqpError) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.inner.registry.lock().on_bind_error = Some(Arc::new(hook));
        self
    }

    pub fn on_message<F>(&self, hook: F) -> &Self
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.inner.registry.lock().on_message.push(Arc::new(hook));
        self
    }

    pub(crate) fn bind_error_hook(&self) -> Option<BindErrorHook> {
        self.inner.registry.lock().on_bind_error.clone()
    }

    pub(crate) fn message_hooks(&self) -> Vec<MessageHook> {
        self.inner.registry.lock().on_message.clone()
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.inner.connection.read().clone()
    }

    pub(crate) async fn session(&self) -> Result<Session, AmqpError> {
        Session::open(
            self.connection(),
            self.inner.connector.as_ref(),
            &self.inner.config,
        )
        .await
    }

    /// Connects, installs the topology and starts the consumers, then returns.
    ///
    /// The connection watcher keeps running in the background until `shutdown`.
    pub async fn start(&self) -> Result<(), AmqpError> {
        self.inner.shutdown.send_replace(false);
        self.bootstrap().await?;

        if !self.inner.watching.swap(true, Ordering::SeqCst) {
            tokio::spawn(watch(
                Arc::downgrade(&self.inner),
                self.inner.config.watch_interval,
                self.inner.shutdown.subscribe(),
            ));
        }

        Ok(())
    }

    /// Starts the application and waits until `shutdown` is called.
    pub async fn listen(&self) -> Result<(), AmqpError> {
        let mut stop = self.inner.shutdown.subscribe();
        self.start().await?;

        let stopped = stop.wait_for(|stop| *stop).await.is_ok();
        debug!(stopped, "listener finished");

        Ok(())
    }

    /// Closes the current connection.
    ///
    /// The watcher sees a closed connection and reconnects; use `shutdown` to stop.
    pub async fn close(&self) -> Result<(), AmqpError> {
        match self.connection() {
            Some(conn) if !conn.is_closed() => {
                lifecycle_info!(self.inner.config, "closing connection");
                conn.close().await
            }
            _ => Err(AmqpError::NotConnected),
        }
    }

    /// Stops the watcher, closes the connection and releases `listen`.
    pub async fn shutdown(&self) -> Result<(), AmqpError> {
        self.inner.shutdown.send_replace(true);

        let _startup = self.inner.startup.lock().await;
        let conn = self.inner.connection.write().take();

        match conn {
            Some(conn) if !conn.is_closed() => {
                lifecycle_info!(self.inner.config, "shutting down");
                conn.close().await
            }
            _ => Ok(()),
        }
    }

    /// Removes every ready message from `name`, returning how many were dropped.
    pub async fn purge_queue(&self, name: &str, no_wait: bool) -> Result<u32, AmqpError> {
        let session = self.session().await?;
        let result = session.channel.purge_queue(name, no_wait).await;
        session.end().await;
        result
    }

    /// Deletes the exchange `name`. Without `force` the broker refuses while
    /// queues are still bound to it.
    pub async fn purge_exchange(&self, name: &str, force: bool) -> Result<(), AmqpError> {
        let session = self.session().await?;
        let result = session.channel.delete_exchange(name, !force).await;
        session.end().await;
        result
    }

    async fn bootstrap(&self) -> Result<(), AmqpError> {
        let _startup = self.inner.startup.lock().await;

        if self.is_connected() {
            return Ok(());
        }

        let cfg = &self.inner.config;
        let registry = self.inner.registry.lock().clone();
        dispatcher::check_routes(&registry)?;

        let conn = dial(self.inner.connector.as_ref(), cfg).await?;
        *self.inner.connection.write() = Some(conn.clone());

        if let Err(err) = self.install(conn.as_ref(), &registry).await {
            self.inner.connection.write().take();
            if let Err(close_err) = conn.close().await {
                debug!(error = close_err.to_string(), "failure to close the connection");
            }
            return Err(err);
        }

        lifecycle_info!(cfg, "application started");
        Ok(())
    }

    async fn install(&self, conn: &dyn Connection, registry: &Registry) -> Result<(), AmqpError> {
        let channel = conn.create_channel().await?;
        let installed = registry
            .topology
            .install(channel.as_ref(), &self.inner.config)
            .await;

        if let Err(err) = channel.close().await {
            debug!(error = err.to_string(), "failure to close the channel");
        }

        let report = installed?;
        if !report.skipped.is_empty() {
            lifecycle_warn!(
                self.inner.config,
                skipped = report.skipped.join(","),
                "some queues were not declared"
            );
        }

        dispatcher::start_consumers(self, conn, registry).await
    }
}

async fn watch(app: Weak<AppInner>, interval: Duration, mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            break;
        }

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = sleep(interval) => {}
        }

        let Some(inner) = app.upgrade() else {
            break;
        };
        let app = App { inner };

        if app.is_connected() {
            continue;
        }

        lifecycle_warn!(app.inner.config, "connection lost, reconnecting...");
        if let Err(err) = app.bootstrap().await {
            error!(error = err.to_string(), "failure to restore the connection");
        }
    }

    if let Some(inner) = app.upgrade() {
        inner.watching.store(false, Ordering::SeqCst);
    }
    debug!("connection watcher stopped");
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Lifecycle
//!
//! Dialing with a bounded retry budget, and the short-lived sessions used by
//! publishers and requests.

use crate::{
    broker::{Channel, Connection, Connector},
    configs::Config,
    errors::AmqpError,
    macros::lifecycle_info,
};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error};

/// Dials the broker, retrying up to `connect_retries` times after the first failure.
///
/// Every call starts with a fresh budget, so a reconnect after a long healthy
/// session gets the same number of attempts as the initial startup.
pub(crate) async fn dial(
    connector: &dyn Connector,
    cfg: &Config,
) -> Result<Arc<dyn Connection>, AmqpError> {
    let mut attempts: u32 = 0;

    loop {
        lifecycle_info!(cfg, attempt = attempts + 1, "connecting to RabbitMQ...");

        match connector.connect(&cfg.url, &cfg.app_name).await {
            Ok(conn) => {
                lifecycle_info!(cfg, "connected to RabbitMQ");
                return Ok(conn);
            }
            Err(err) => {
                attempts += 1;
                error!(
                    error = err.to_string(),
                    attempts, "problem with connecting to RabbitMQ"
                );

                if attempts > cfg.connect_retries {
                    return Err(AmqpError::ConnectRetriesExhausted(attempts));
                }

                sleep(cfg.connect_retry_interval).await;
            }
        }
    }
}

/// A channel borrowed for one publish or request.
///
/// The channel lives on the application connection when one is up. Otherwise
/// the session owns a dedicated connection, closed together with the channel.
pub(crate) struct Session {
    pub(crate) channel: Arc<dyn Channel>,
    dedicated: Option<Arc<dyn Connection>>,
}

impl Session {
    pub(crate) async fn open(
        shared: Option<Arc<dyn Connection>>,
        connector: &dyn Connector,
        cfg: &Config,
    ) -> Result<Session, AmqpError> {
        if let Some(conn) = shared.filter(|conn| !conn.is_closed()) {
            return Ok(Session {
                channel: conn.create_channel().await?,
                dedicated: None,
            });
        }

        debug!("no live connection, dialing a dedicated one");
        let conn = connector.connect(&cfg.url, &cfg.app_name).await?;

        match conn.create_channel().await {
            Ok(channel) => Ok(Session {
                channel,
                dedicated: Some(conn),
            }),
            Err(err) => {
                if let Err(close_err) = conn.close().await {
                    debug!(error = close_err.to_string(), "failure to close the connection");
                }
                Err(err)
            }
        }
    }

    pub(crate) async fn end(self) {
        if let Err(err) = self.channel.close().await {
            debug!(error = err.to_string(), "failure to close the channel");
        }

        if let Some(conn) = self.dedicated {
            if let Err(err) = conn.close().await {
                debug!(error = err.to_string(), "failure to close the connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockConnection, MockConnector};
    use mockall::Sequence;
    use std::time::Duration;

    fn config(retries: u32) -> Config {
        Config::new()
            .connect_retries(retries)
            .connect_retry_interval(Duration::ZERO)
            .disable_logging(true)
    }

    #[tokio::test]
    async fn dial_gives_up_once_the_budget_is_spent() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|_, _| Err(AmqpError::ConnectionError("refused".to_owned())));

        let result = dial(&connector, &config(2)).await;

        assert_eq!(result.err(), Some(AmqpError::ConnectRetriesExhausted(3)));
    }

    #[tokio::test]
    async fn dial_recovers_inside_the_budget() {
        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AmqpError::ConnectionError("refused".to_owned())));
        connector
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Arc::new(MockConnection::new()) as Arc<dyn Connection>));

        assert!(dial(&connector, &config(2)).await.is_ok());
    }

    #[tokio::test]
    async fn zero_retries_means_a_single_attempt() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_, _| Err(AmqpError::ConnectionError("refused".to_owned())));

        assert_eq!(
            dial(&connector, &config(0)).await.err(),
            Some(AmqpError::ConnectRetriesExhausted(1))
        );
    }

    #[tokio::test]
    async fn session_dials_when_the_shared_connection_is_down() {
        let mut shared = MockConnection::new();
        shared.expect_is_closed().return_const(true);

        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_, _| {
                let mut conn = MockConnection::new();
                conn.expect_create_channel()
                    .returning(|| Err(AmqpError::ChannelError("no channel".to_owned())));
                conn.expect_close().times(1).returning(|| Ok(()));
                Ok(Arc::new(conn) as Arc<dyn Connection>)
            });

        let result = Session::open(Some(Arc::new(shared)), &connector, &config(0)).await;

        assert_eq!(
            result.err().map(|err| err.to_string()),
            Some("failure to create a channel: no channel".to_owned())
        );
    }
}

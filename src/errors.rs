// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Router
//!
//! This module provides the error type shared by every layer of the crate.
//! The `AmqpError` enum covers connectivity, topology declaration, payload
//! encoding, publishing, request/reply and acknowledgement failures, as well as
//! errors raised by application handlers while a message is being processed.

use thiserror::Error;

/// Represents errors that can occur while routing AMQP messages.
///
/// Variants carry the name of the offending resource or the underlying reason
/// as plain strings, which keeps the type `Clone + PartialEq` and lets handler
/// chains and tests compare failures directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Every dial attempt allowed by the retry budget failed
    #[error("failure to connect after {0} attempts")]
    ConnectRetriesExhausted(u32),

    /// An operation needed a live connection and there was none
    #[error("not connected")]
    NotConnected,

    /// Error closing the connection
    #[error("failure to close the connection: {0}")]
    CloseError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error deleting an exchange with the given name
    #[error("failure to delete an exchange `{0}`: {1}")]
    DeleteExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error purging a queue with the given name
    #[error("failure to purge a queue `{0}`: {1}")]
    PurgeQueueError(String, String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// A route was registered without any handler
    #[error("no handler registered for routing key `{0}`")]
    EmptyHandlerChain(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The publish step did not complete before the configured timeout
    #[error("publish timed out")]
    PublishTimeout,

    /// No correlated reply arrived before the configured reply timeout
    #[error("reply timed out")]
    ReplyTimeout,

    /// The reply queue stopped delivering before a correlated reply arrived
    #[error("reply channel closed before a reply arrived")]
    ReplyChannelClosed,

    /// A reply was requested for a message without a reply-to address
    #[error("message has no reply-to address")]
    MissingReplyTo,

    /// Error encoding a payload
    #[error("failure to serialize payload: {0}")]
    SerializeError(String),

    /// Error decoding a payload
    #[error("failure to parse payload: {0}")]
    DeserializeError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error raised by an application handler
    #[error("handler error: {0}")]
    HandlerError(String),

    /// A handler panicked while processing a message
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl AmqpError {
    /// Builds a `HandlerError` from anything printable.
    pub fn handler(err: impl ToString) -> Self {
        AmqpError::HandlerError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_resource() {
        let err = AmqpError::DeclareExchangeError("orders".to_owned(), "406".to_owned());
        assert_eq!(err.to_string(), "failure to declare an exchange `orders`: 406");

        let err = AmqpError::BindingExchangeToQueueError("orders".to_owned(), "billing".to_owned());
        assert_eq!(
            err.to_string(),
            "failure to binding exchange `orders` to queue `billing`"
        );
    }

    #[test]
    fn handler_wraps_any_displayable_error() {
        let err = AmqpError::handler("missing tenant");
        assert_eq!(err, AmqpError::HandlerError("missing tenant".to_owned()));
    }
}

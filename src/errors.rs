// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Message App
//!
//! This module provides the error types raised while wiring a service to the broker
//! and while processing its messages. `AmqpError` covers configuration and transport
//! failures, which are fatal for the consumption loop. `RequestError` is only ever
//! produced by [`Request`](crate::request::Request) accessors, so a malformed payload
//! never reaches the loop itself. Handlers fail with any error, see [`HandlerError`].

use thiserror::Error;

/// Error returned by a message handler.
///
/// Any error type is accepted; the loop only needs to know that the handler failed.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers connection and channel setup, topology declarations,
/// consumption, message settlement, and startup configuration. Each variant
/// provides specific context about what operation failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error declaring a consumer on the given queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error receiving a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The delivery stream ended, which only happens when the channel goes away
    #[error("consumer stream closed")]
    ConsumerClosed,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// The configured topology mode is not one of the built-in ones
    #[error("unknown mode `{0}`")]
    UnknownMode(String),

    /// Error loading the startup configuration
    #[error("invalid configuration `{0}`")]
    ConfigError(String),
}

/// Errors raised while reading a request body as structured data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The body is not valid JSON
    #[error("failure to decode request body `{0}`")]
    DecodeError(String),

    /// The body is valid JSON but does not fit the requested type
    #[error("failure to deserialize request body `{0}`")]
    DeserializeError(String),
}

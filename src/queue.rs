// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the types used to describe the queues a service topology
//! declares and the bindings that attach them to exchanges. It includes support for
//! dead-lettering, per-queue message TTL and lazy queue mode, which together make up
//! the delayed retry cycle of the tenacious topology.

use std::collections::BTreeMap;

/// Queue argument naming the exchange rejected or expired messages are forwarded to
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument holding the per-message TTL in milliseconds
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument selecting the queue storage policy
pub const AMQP_HEADERS_QUEUE_MODE: &str = "x-queue-mode";
/// Value of [`AMQP_HEADERS_QUEUE_MODE`] for disk-preferring queues
pub const AMQP_QUEUE_MODE_LAZY: &str = "lazy";

/// Value of a queue declaration argument.
///
/// The variants match the AMQP field types the broker expects for each argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArgument {
    LongString(String),
    LongInt(i32),
}

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue definitions.
/// An empty name asks the broker to generate one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) lazy: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// A queue the broker names on declaration.
    pub fn server_named() -> QueueDefinition {
        QueueDefinition::default()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Stores queued messages on disk as early as possible.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    ///
    /// Expired messages are dead-lettered when a dead letter exchange is configured.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Forwards rejected and expired messages to the given exchange.
    pub fn dead_letter(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    /// Renders the declaration arguments exactly as they are sent to the broker.
    pub fn arguments(&self) -> BTreeMap<String, QueueArgument> {
        let mut args = BTreeMap::new();

        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_EXCHANGE.to_owned(),
                QueueArgument::LongString(exchange.clone()),
            );
        }

        if self.lazy {
            args.insert(
                AMQP_HEADERS_QUEUE_MODE.to_owned(),
                QueueArgument::LongString(AMQP_QUEUE_MODE_LAZY.to_owned()),
            );
        }

        if let Some(ttl) = self.ttl {
            args.insert(
                AMQP_HEADERS_MESSAGE_TTL.to_owned(),
                QueueArgument::LongInt(ttl),
            );
        }

        args
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Every exchange a service topology declares is a fanout exchange, so bindings carry
/// no routing key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueBinding {
    queue_name: String,
    exchange_name: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name is an empty string.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_queue_has_no_arguments() {
        let def = QueueDefinition::new("orders_q").durable();

        assert!(def.arguments().is_empty());
        assert!(def.is_durable());
    }

    #[test]
    fn test_retry_queue_arguments() {
        let def = QueueDefinition::new("orders_retry_q")
            .durable()
            .lazy()
            .dead_letter("orders")
            .ttl(120_000);

        let args = def.arguments();

        assert_eq!(args.len(), 3);
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&QueueArgument::LongString("orders".to_owned()))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_QUEUE_MODE),
            Some(&QueueArgument::LongString("lazy".to_owned()))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_MESSAGE_TTL),
            Some(&QueueArgument::LongInt(120_000))
        );
    }

    #[test]
    fn test_server_named_queue() {
        let def = QueueDefinition::server_named().exclusive();

        assert_eq!(def.name(), "");
        assert!(def.is_exclusive());
        assert!(!def.is_durable());
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Service Topology Strategies
//!
//! This module maps a topology mode to the exchanges, queues and bindings a service
//! consumes from. Every name is derived from the service name:
//!
//! | entity          | name              |
//! |-----------------|-------------------|
//! | main exchange   | `{name}`          |
//! | retry exchange  | `{name}.retry`    |
//! | main queue      | `{name}_q`        |
//! | retry queue     | `{name}_retry_q`  |
//!
//! The built-in strategies are:
//! - `relaxed`: a durable fanout exchange and an exclusive broker-named queue. Messages
//!   published while no consumer is attached are lost.
//! - `tenacious`: durable main and retry exchanges and lazy queues wired in a dead-letter
//!   cycle. A rejected message waits two minutes in the retry queue, then goes back to the
//!   main exchange. There is no retry limit.
//! - `existing`: nothing is declared, the service name is the queue name.
//!
//! A [`Mode::Custom`] strategy covers any other layout. It is built either from a type
//! implementing [`TopologyInitializer`] with [`Mode::custom`], or from a plain function
//! with [`Mode::custom_fn`].

use crate::{
    channel::BrokerChannel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::debug;

/// How long a rejected message waits in the retry queue, in milliseconds.
pub const RETRY_DELAY_MS: i32 = 2 * 60 * 1000;

/// Names derived from a service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
}

impl ServiceIdentity {
    /// Creates the identity of the service called `name`.
    pub fn new(name: &str) -> Self {
        ServiceIdentity {
            name: name.to_owned(),
        }
    }

    /// Name of the main exchange, which is the service name itself.
    ///
    /// Publishers address a service through this exchange.
    pub fn exchange(&self) -> String {
        self.name.clone()
    }

    /// Name of the exchange rejected messages are dead-lettered to: `{name}.retry`.
    pub fn retry_exchange(&self) -> String {
        format!("{}.retry", self.name)
    }

    /// Name of the durable queue the service consumes: `{name}_q`.
    pub fn queue(&self) -> String {
        format!("{}_q", self.name)
    }

    /// Name of the queue where rejected messages wait before being redelivered:
    /// `{name}_retry_q`.
    pub fn retry_queue(&self) -> String {
        format!("{}_retry_q", self.name)
    }
}

/// Declares the topology of a service and returns the queue to consume from.
///
/// Implementations must be idempotent: running them again against a broker where the
/// topology already exists must succeed.
#[async_trait]
pub trait TopologyInitializer: Send + Sync {
    /// Declares the topology of a service.
    ///
    /// # Parameters
    /// * `channel` - Channel the declarations are made on
    /// * `name` - Service name
    ///
    /// # Returns
    /// The name of the queue the service consumes from
    async fn initialize(&self, channel: &dyn BrokerChannel, name: &str)
        -> Result<String, AmqpError>;
}

/// Fan-out consumer on a throwaway queue.
pub struct RelaxedTopology;

#[async_trait]
impl TopologyInitializer for RelaxedTopology {
    async fn initialize(
        &self,
        channel: &dyn BrokerChannel,
        name: &str,
    ) -> Result<String, AmqpError> {
        let identity = ServiceIdentity::new(name);
        let exchange = identity.exchange();

        debug!("creating exchange: {}", exchange);
        channel
            .declare_exchange(&ExchangeDefinition::new(&exchange).fanout().durable())
            .await?;

        debug!("creating consumer queue");
        let queue = channel
            .declare_queue(&QueueDefinition::server_named().exclusive())
            .await?;
        debug!("queue: {} was created", queue);

        channel
            .bind(&QueueBinding::new(&queue).exchange(&exchange))
            .await?;
        debug!("queue: {} bound to the exchange: {}", queue, exchange);

        Ok(queue)
    }
}

/// Durable queues with a fixed-delay dead-letter retry cycle.
pub struct TenaciousTopology;

#[async_trait]
impl TopologyInitializer for TenaciousTopology {
    async fn initialize(
        &self,
        channel: &dyn BrokerChannel,
        name: &str,
    ) -> Result<String, AmqpError> {
        let identity = ServiceIdentity::new(name);
        let exchange = identity.exchange();
        let retry_exchange = identity.retry_exchange();
        let queue = identity.queue();
        let retry_queue = identity.retry_queue();

        for exch in [&exchange, &retry_exchange] {
            debug!("creating exchange: {}", exch);
            channel
                .declare_exchange(&ExchangeDefinition::new(exch).fanout().durable())
                .await?;
        }

        debug!("creating queue: {}", queue);
        channel
            .declare_queue(
                &QueueDefinition::new(&queue)
                    .durable()
                    .lazy()
                    .dead_letter(&retry_exchange),
            )
            .await?;

        debug!("creating retry queue: {}", retry_queue);
        channel
            .declare_queue(
                &QueueDefinition::new(&retry_queue)
                    .durable()
                    .lazy()
                    .dead_letter(&exchange)
                    .ttl(RETRY_DELAY_MS),
            )
            .await?;

        channel
            .bind(&QueueBinding::new(&queue).exchange(&exchange))
            .await?;
        channel
            .bind(&QueueBinding::new(&retry_queue).exchange(&retry_exchange))
            .await?;
        debug!("queues were bound");

        Ok(queue)
    }
}

/// Topology provisioned out-of-band; the service name is the queue name.
pub struct ExistingTopology;

#[async_trait]
impl TopologyInitializer for ExistingTopology {
    async fn initialize(
        &self,
        _channel: &dyn BrokerChannel,
        name: &str,
    ) -> Result<String, AmqpError> {
        Ok(name.to_owned())
    }
}

/// Topology declared by a plain function.
struct FnTopology<F> {
    func: F,
}

#[async_trait]
impl<F> TopologyInitializer for FnTopology<F>
where
    F: for<'a> Fn(&'a dyn BrokerChannel, &'a str) -> BoxFuture<'a, Result<String, AmqpError>>
        + Send
        + Sync,
{
    async fn initialize(
        &self,
        channel: &dyn BrokerChannel,
        name: &str,
    ) -> Result<String, AmqpError> {
        (self.func)(channel, name).await
    }
}

/// The topology strategy of a service, resolved once at startup.
#[derive(Clone, Default)]
pub enum Mode {
    /// See [`RelaxedTopology`]
    Relaxed,
    /// See [`TenaciousTopology`]
    #[default]
    Tenacious,
    /// See [`ExistingTopology`]
    Existing,
    /// A caller supplied strategy
    Custom(Arc<dyn TopologyInitializer>),
}

impl Mode {
    /// Wraps a custom [`TopologyInitializer`].
    pub fn custom<T>(initializer: T) -> Self
    where
        T: TopologyInitializer + 'static,
    {
        Mode::Custom(Arc::new(initializer))
    }

    /// Builds a custom mode from a function.
    ///
    /// The function receives the channel and the service name and returns the queue to
    /// consume from. Being called on every startup, it must be idempotent.
    ///
    /// # Parameters
    /// * `func` - Function declaring the topology, returning a boxed future
    ///
    /// # Example
    /// ```
    /// use futures_util::FutureExt;
    /// use rabbitmq_app::{queue::QueueDefinition, topology::Mode};
    ///
    /// let mode = Mode::custom_fn(|channel, name| {
    ///     let queue = QueueDefinition::new(&format!("{}-events", name)).durable();
    ///     async move { channel.declare_queue(&queue).await }.boxed()
    /// });
    /// assert_eq!(mode.to_string(), "custom");
    /// ```
    pub fn custom_fn<F>(func: F) -> Self
    where
        F: for<'a> Fn(&'a dyn BrokerChannel, &'a str) -> BoxFuture<'a, Result<String, AmqpError>>
            + Send
            + Sync
            + 'static,
    {
        Mode::custom(FnTopology { func })
    }

    /// Declares the topology for `name`.
    ///
    /// # Parameters
    /// * `channel` - Channel the declarations are made on
    /// * `name` - Service name
    ///
    /// # Returns
    /// The name of the queue to consume from
    pub async fn initialize(
        &self,
        channel: &dyn BrokerChannel,
        name: &str,
    ) -> Result<String, AmqpError> {
        debug!(mode = %self, "initializing exchanges, queues, and bindings");
        match self {
            Mode::Relaxed => RelaxedTopology.initialize(channel, name).await,
            Mode::Tenacious => TenaciousTopology.initialize(channel, name).await,
            Mode::Existing => ExistingTopology.initialize(channel, name).await,
            Mode::Custom(initializer) => initializer.initialize(channel, name).await,
        }
    }
}

impl FromStr for Mode {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relaxed" => Ok(Mode::Relaxed),
            "tenacious" => Ok(Mode::Tenacious),
            "existing" => Ok(Mode::Existing),
            other => Err(AmqpError::UnknownMode(other.to_owned())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Relaxed => write!(f, "relaxed"),
            Mode::Tenacious => write!(f, "tenacious"),
            Mode::Existing => write!(f, "existing"),
            Mode::Custom(_) => write!(f, "custom"),
        }
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mode({})", self)
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message App
//!
//! [`MessageApp`] ties a service name, a topology mode and a router together. Serving
//! connects to the broker, limits the channel to one in-flight delivery, declares the
//! topology and then processes messages until the connection goes away.

use crate::{
    channel::{AmqpChannel, BrokerChannel},
    configs::AppConfig,
    consumer::process_messages,
    errors::AmqpError,
    router::Router,
    topology::Mode,
};
use std::sync::Arc;
use tracing::debug;

/// Deliveries a channel may hold before settling them.
pub const PREFETCH_COUNT: u16 = 1;

/// A service consuming its queue and dispatching messages to handlers by path.
pub struct MessageApp {
    url: String,
    name: String,
    mode: Mode,
    router: Arc<dyn Router>,
}

impl MessageApp {
    /// Creates the app. Nothing is declared or connected until it is served.
    ///
    /// # Parameters
    /// * `url` - Broker connection URL
    /// * `router` - Resolves the handler of each message from its `PATH` header
    /// * `name` - Service name, from which exchange and queue names are derived
    /// * `mode` - Topology declared on startup
    pub fn new<R>(url: &str, router: R, name: &str, mode: Mode) -> Self
    where
        R: Router + 'static,
    {
        MessageApp {
            url: url.to_owned(),
            name: name.to_owned(),
            mode,
            router: Arc::new(router),
        }
    }

    /// Builds the app from its configuration, rejecting unknown modes.
    pub fn from_config<R>(cfg: &AppConfig, router: R) -> Result<Self, AmqpError>
    where
        R: Router + 'static,
    {
        let mode = cfg.mode()?;
        Ok(MessageApp::new(&cfg.url, router, &cfg.name, mode))
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The topology mode declared on startup.
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Connects to the broker and serves until the connection fails.
    ///
    /// The connection is named after the service.
    ///
    /// # Returns
    /// The error that stopped the app. A running app never returns `Ok`.
    pub async fn serve(&self) -> Result<(), AmqpError> {
        debug!(name = self.name(), "connecting to broker");
        let channel = AmqpChannel::connect(&self.url, self.name()).await?;
        self.serve_on(&channel).await
    }

    /// Serves on an already open channel.
    ///
    /// Limits the channel to [`PREFETCH_COUNT`] unsettled deliveries, declares the
    /// topology of [`MessageApp::mode`] and processes the resulting queue.
    ///
    /// # Parameters
    /// * `channel` - Open channel to declare on and consume from
    ///
    /// # Returns
    /// The error that stopped the processing loop
    pub async fn serve_on(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        debug!("setting qos");
        channel.set_prefetch(PREFETCH_COUNT).await?;

        debug!(name = self.name(), mode = %self.mode(), "declaring topology");
        let queue = self.mode().initialize(channel, self.name()).await?;
        process_messages(channel, &queue, self.router.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::DEFAULT_URL,
        errors::HandlerError,
        handler::handler_fn,
        publisher::{Publisher, RabbitMQPublisher},
        queue::QueueDefinition,
        request::Request,
        router::PathRouter,
        testing::InMemoryChannel,
    };
    use opentelemetry::Context;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn always_fails(calls: Arc<AtomicUsize>) -> impl Router {
        PathRouter::new().route(
            "/orders",
            handler_fn(move |_: &Request| -> Result<(), HandlerError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("rejected".into())
            }),
        )
    }

    #[test]
    fn test_unknown_mode_fails_at_startup() {
        let cfg = AppConfig::new("orders", DEFAULT_URL).with_mode("stubborn");

        let result = MessageApp::from_config(&cfg, PathRouter::new());

        assert!(matches!(result, Err(AmqpError::UnknownMode(m)) if m == "stubborn"));
    }

    #[tokio::test]
    async fn test_serve_sets_prefetch_and_declares_topology() {
        let channel = InMemoryChannel::new();
        let cfg = AppConfig::new("orders", DEFAULT_URL);
        let app = MessageApp::from_config(&cfg, PathRouter::new()).unwrap();
        assert_eq!(app.name(), "orders");
        assert!(matches!(app.mode(), Mode::Tenacious));

        let result = app.serve_on(&channel).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(channel.prefetch(), Some(PREFETCH_COUNT));
        assert!(channel.queue("orders_q").is_some());
        assert!(channel.queue("orders_retry_q").is_some());
    }

    #[tokio::test]
    async fn test_tenacious_failure_is_retried_through_dead_letter_cycle() {
        let channel = InMemoryChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = MessageApp::new(
            DEFAULT_URL,
            always_fails(calls.clone()),
            "orders",
            Mode::Tenacious,
        );
        let _ = app.serve_on(&channel).await;

        let publisher = RabbitMQPublisher::new(Arc::new(channel.clone()));
        publisher
            .publish(&Context::new(), "orders", "/orders", br#"{"id": 7}"#)
            .await
            .unwrap();

        let _ = app.serve_on(&channel).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.nacks(), vec![(1, false)]);
        assert!(channel.acks().is_empty());
        assert_eq!(channel.ready("orders_q"), 0);
        assert_eq!(
            channel.bodies("orders_retry_q"),
            vec![br#"{"id": 7}"#.to_vec()]
        );

        channel.expire("orders_retry_q");
        assert_eq!(channel.bodies("orders_q"), vec![br#"{"id": 7}"#.to_vec()]);

        let _ = app.serve_on(&channel).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(channel.nacks(), vec![(1, false), (2, false)]);
        assert!(channel.acks().is_empty());
        assert_eq!(channel.ready("orders_retry_q"), 1);
    }

    #[tokio::test]
    async fn test_relaxed_failure_is_dropped() {
        let channel = InMemoryChannel::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = MessageApp::new(
            DEFAULT_URL,
            always_fails(calls.clone()),
            "orders",
            Mode::Relaxed,
        );

        let queue = Mode::Relaxed.initialize(&channel, "orders").await.unwrap();
        channel.push(&queue, Default::default(), b"{}");
        let publisher = RabbitMQPublisher::new(Arc::new(channel.clone()));
        publisher
            .publish(&Context::new(), "orders", "/orders", b"{}")
            .await
            .unwrap();

        let result = process_messages(&channel, &queue, app.router.as_ref()).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.acks().len(), 1);
        assert_eq!(channel.nacks().len(), 1);
        assert_eq!(channel.ready(&queue), 0);
    }

    #[tokio::test]
    async fn test_existing_topology_consumes_service_queue() {
        let channel = InMemoryChannel::new();
        channel
            .declare_queue(&QueueDefinition::new("orders").durable())
            .await
            .unwrap();

        let mut headers = std::collections::BTreeMap::new();
        headers.insert("PATH".to_owned(), "/orders/42".to_owned());
        channel.push("orders", headers, b"{}");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let router = PathRouter::new().route(
            "/orders/{id}",
            handler_fn(move |req: &Request| -> Result<(), HandlerError> {
                if let Some(id) = req.path_param("id") {
                    sink.lock().unwrap().push(id.to_owned());
                }
                Ok(())
            }),
        );
        let app = MessageApp::new(DEFAULT_URL, router, "orders", Mode::Existing);

        let result = app.serve_on(&channel).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(*seen.lock().unwrap(), vec!["42".to_owned()]);
        assert_eq!(channel.acks().len(), 1);
        assert_eq!(channel.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_topology_without_queue_fails() {
        let channel = InMemoryChannel::new();
        let app = MessageApp::new(DEFAULT_URL, PathRouter::new(), "orders", Mode::Existing);

        let result = app.serve_on(&channel).await;

        assert_eq!(
            result,
            Err(AmqpError::ConsumerDeclarationError("orders".to_owned()))
        );
    }
}

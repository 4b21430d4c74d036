// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message App
//!
//! A small framework for services that consume RabbitMQ messages. A service is bound to
//! an exchange/queue topology derived from its name, pulls messages one at a time,
//! routes each to a handler using the path carried in the `PATH` header, and settles
//! the message according to the handler outcome.
//!
//! ```rust,no_run
//! use rabbitmq_app::{app::MessageApp, configs::AppConfig, handler::handler_fn, router::PathRouter};
//!
//! # async fn run() -> Result<(), rabbitmq_app::errors::AmqpError> {
//! let cfg = AppConfig::from_env()?;
//! let router = PathRouter::new().route(
//!     "/users/{id}",
//!     handler_fn(|req| {
//!         let user = req.decoded_body()?;
//!         tracing::info!(id = ?req.path_param("id"), %user, "user updated");
//!         Ok(())
//!     }),
//! );
//!
//! MessageApp::from_config(&cfg, router)?.serve().await
//! # }
//! ```

mod otel;

pub mod app;
pub mod channel;
pub mod configs;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod request;
pub mod router;
pub mod topology;

#[cfg(any(test, feature = "mocks"))]
pub mod testing;

#[cfg(test)]
pub use handler::MockHandler;

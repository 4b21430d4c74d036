// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Processing Loop
//!
//! This module consumes a queue one message at a time. For each delivery it:
//! 1. Reads the routing path from the `PATH` header
//! 2. Creates a trace span for distributed tracing
//! 3. Resolves the handler for the path through the [`Router`]
//! 4. Acknowledges and drops the message when no handler matches
//! 5. Otherwise runs the handler, then acknowledges on success or rejects without
//!    requeue on failure
//!
//! A delivery is always settled before the next one is taken from the stream. Handler
//! failures never leave the loop, and a handler that panics counts as a failed one.
//! Failures to receive or settle a message do leave the loop, and end it.

use crate::{
    channel::BrokerChannel,
    errors::{AmqpError, HandlerError},
    message::InboundMessage,
    otel::{self, CONSUMER_TRACER},
    request::Request,
    router::Router,
};
use futures_util::{FutureExt, StreamExt};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{any::Any, borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error};

/// Span name for messages without a path.
const UNROUTED_SPAN: &str = "unrouted";

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No handler matched; the message was acknowledged and dropped.
    Discarded,
    /// The handler succeeded; the message was acknowledged.
    Acknowledged,
    /// The handler failed; the message was rejected without requeue.
    Rejected,
}

/// Consumes `queue` until the delivery stream fails or ends.
///
/// This never returns `Ok`: the stream of a live channel is endless, so the loop only
/// stops on a transport failure or with [`AmqpError::ConsumerClosed`].
///
/// # Parameters
/// * `channel` - Channel the queue is consumed from and deliveries are settled on
/// * `queue` - Name of the queue to consume
/// * `router` - Resolves the handler of each delivery from its `PATH` header
///
/// # Returns
/// The error that stopped the loop
pub async fn process_messages(
    channel: &dyn BrokerChannel,
    queue: &str,
    router: &dyn Router,
) -> Result<(), AmqpError> {
    debug!("processing messages from queue: {}", queue);
    let mut deliveries = channel.consume(queue).await?;
    let tracer = global::tracer(CONSUMER_TRACER);

    while let Some(delivery) = deliveries.next().await {
        let msg = match delivery {
            Ok(msg) => msg,
            Err(err) => {
                error!(error = err.to_string(), "errors consume msg");
                return Err(err);
            }
        };

        let outcome = consume(&tracer, channel, router, msg).await?;
        debug!(?outcome, "finished message");
    }

    error!(queue, "consumer stream closed");
    Err(AmqpError::ConsumerClosed)
}

/// Routes, handles and settles a single delivery.
///
/// # Returns
/// How the delivery was settled, or the error raised while settling it
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    channel: &dyn BrokerChannel,
    router: &dyn Router,
    msg: InboundMessage,
) -> Result<Outcome, AmqpError> {
    let path = msg.path().map(str::to_owned);
    let InboundMessage {
        delivery_tag,
        headers,
        body,
    } = msg;

    debug!("processing message: {} bytes", body.len());

    let (ctx, mut span) = otel::new_span(
        &headers,
        tracer,
        path.as_deref().unwrap_or(UNROUTED_SPAN),
    );

    let Some(route) = router.find_handler(path.as_deref()) else {
        debug!(path = ?path, "no route found for request, ignoring");

        if let Err(err) = channel.ack(delivery_tag).await {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            return Err(err);
        }

        return Ok(Outcome::Discarded);
    };

    let req = Request::new(path, body, route.path_params);

    let handled = AssertUnwindSafe(route.handler.exec(&ctx, &req))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_failure(payload)));

    match handled {
        Ok(()) => {
            debug!("acknowledging success");
            if let Err(err) = channel.ack(delivery_tag).await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(err);
            }

            span.set_status(Status::Ok);
            Ok(Outcome::Acknowledged)
        }
        Err(failure) => {
            error!(
                error = failure.to_string(),
                path = ?req.path(),
                size = req.body().len(),
                "failed to handle request"
            );
            span.record_error(&*failure);
            span.set_status(Status::Error {
                description: Cow::from(failure.to_string()),
            });

            debug!("sending failure");
            if let Err(err) = channel.nack(delivery_tag, false).await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to nack msg"),
                });
                return Err(err);
            }

            Ok(Outcome::Rejected)
        }
    }
}

/// Turns the payload of a handler panic into a handler failure.
fn panic_failure(payload: Box<dyn Any + Send>) -> HandlerError {
    let reason = match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_owned(),
            Err(_) => "unknown panic".to_owned(),
        },
    };

    format!("handler panicked: {}", reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{handler_fn, MockHandler},
        message::PATH_HEADER,
        queue::QueueDefinition,
        router::PathRouter,
        testing::InMemoryChannel,
    };
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    async fn channel_with_queue(queue: &str) -> InMemoryChannel {
        let channel = InMemoryChannel::new();
        channel
            .declare_queue(&QueueDefinition::new(queue).durable())
            .await
            .unwrap();
        channel
    }

    fn path(path: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(PATH_HEADER.to_owned(), path.to_owned());
        headers
    }

    #[tokio::test]
    async fn test_success_is_acked_once() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/orders"), b"{}");

        let mut handler = MockHandler::new();
        handler.expect_exec().times(1).returning(|_, _| Ok(()));
        let router = PathRouter::new().route("/orders", handler);

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(channel.acks().len(), 1);
        assert!(channel.nacks().is_empty());
        assert_eq!(channel.unacked(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_nacked_without_requeue_once() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/orders"), b"{}");

        let mut handler = MockHandler::new();
        handler
            .expect_exec()
            .times(1)
            .returning(|_, _| Err("database unavailable".into()));
        let router = PathRouter::new().route("/orders", handler);

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert!(channel.acks().is_empty());
        assert_eq!(channel.nacks().len(), 1);
        assert!(!channel.nacks()[0].1);
        assert_eq!(channel.ready("orders_q"), 0);
    }

    #[tokio::test]
    async fn test_unroutable_message_is_acked_and_dropped() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/unknown"), b"{}");

        let mut handler = MockHandler::new();
        handler.expect_exec().times(0);
        let router = PathRouter::new().route("/orders", handler);

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(channel.acks().len(), 1);
        assert!(channel.nacks().is_empty());
    }

    #[tokio::test]
    async fn test_message_without_path_is_acked_and_dropped() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", BTreeMap::new(), b"{}");

        let mut handler = MockHandler::new();
        handler.expect_exec().times(0);
        let router = PathRouter::new().route("/", handler);

        let tracer = global::tracer(CONSUMER_TRACER);
        let mut deliveries = channel.consume("orders_q").await.unwrap();
        let msg = deliveries.next().await.unwrap().unwrap();

        let outcome = consume(&tracer, &channel, &router, msg).await.unwrap();

        assert_eq!(outcome, Outcome::Discarded);
        assert_eq!(channel.acks().len(), 1);
    }

    #[tokio::test]
    async fn test_request_carries_path_params_and_body() {
        let channel = channel_with_queue("users_q").await;
        channel.push("users_q", path("/users/42"), br#"{"name": "ada"}"#);

        let mut handler = MockHandler::new();
        handler
            .expect_exec()
            .withf(|_, req| {
                req.path() == Some("/users/42")
                    && req.path_param("id") == Some("42")
                    && req.body() == br#"{"name": "ada"}"#
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let router = PathRouter::new().route("/users/{id}", handler);

        let _ = process_messages(&channel, "users_q", &router).await;

        assert_eq!(channel.acks().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_does_not_affect_handlers_ignoring_it() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/raw"), b"\x00not json");
        channel.push("orders_q", path("/json"), b"\x00not json");

        let router = PathRouter::new()
            .route("/raw", handler_fn(|_| Ok(())))
            .route(
                "/json",
                handler_fn(|req| {
                    req.decoded_body()?;
                    Ok(())
                }),
            );

        let _ = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(channel.acks().len(), 1);
        assert_eq!(channel.nacks().len(), 1);
    }

    #[tokio::test]
    async fn test_each_delivery_is_settled_before_the_next_is_handled() {
        let channel = channel_with_queue("orders_q").await;
        for _ in 0..3 {
            channel.push("orders_q", path("/orders"), b"{}");
        }
        channel.push("orders_q", path("/missing"), b"{}");
        channel.push("orders_q", path("/orders"), b"{}");

        let seen = Arc::new(AtomicUsize::new(0));
        let observer = channel.clone();
        let counter = seen.clone();
        let router = PathRouter::new().route(
            "/orders",
            handler_fn(move |_| {
                let settled = observer.acks().len() + observer.nacks().len();
                let handled = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(observer.unacked(), 1);
                if handled < 3 {
                    assert_eq!(settled, handled);
                } else {
                    assert_eq!(settled, handled + 1);
                }
                if handled % 2 == 0 {
                    Ok(())
                } else {
                    Err("odd".into())
                }
            }),
        );

        let _ = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(channel.acks().len(), 3);
        assert_eq!(channel.nacks().len(), 2);
    }

    #[tokio::test]
    async fn test_ack_failure_stops_the_loop() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/orders"), b"{}");
        channel.push("orders_q", path("/orders"), b"{}");
        channel.fail_settlements();

        let mut handler = MockHandler::new();
        handler.expect_exec().times(1).returning(|_, _| Ok(()));
        let router = PathRouter::new().route("/orders", handler);

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::AckMessageError));
        assert_eq!(channel.ready("orders_q"), 1);
    }

    #[tokio::test]
    async fn test_nack_failure_stops_the_loop() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/orders"), b"{}");
        channel.fail_settlements();

        let router = PathRouter::new().route("/orders", handler_fn(|_| Err("boom".into())));

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::NackMessageError));
    }

    #[tokio::test]
    async fn test_nack_failure_is_returned_from_consume() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/orders"), b"{}");

        let router = PathRouter::new().route("/orders", handler_fn(|_| Err("boom".into())));
        let tracer = global::tracer(CONSUMER_TRACER);
        let mut deliveries = channel.consume("orders_q").await.unwrap();
        let msg = deliveries.next().await.unwrap().unwrap();
        channel.fail_settlements();

        let result = consume(&tracer, &channel, &router, msg).await;

        assert_eq!(result, Err(AmqpError::NackMessageError));
        assert!(channel.nacks().is_empty());
        assert_eq!(channel.unacked(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_nacked_and_loop_continues() {
        let channel = channel_with_queue("orders_q").await;
        channel.push("orders_q", path("/boom"), b"{}");
        channel.push("orders_q", path("/boom"), b"{}");
        channel.push("orders_q", path("/orders"), b"{}");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = PathRouter::new()
            .route("/boom", handler_fn(|_| panic!("handler bug")))
            .route(
                "/orders",
                handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );

        let result = process_messages(&channel, "orders_q", &router).await;

        assert_eq!(result, Err(AmqpError::ConsumerClosed));
        assert_eq!(channel.nacks(), vec![(1, false), (2, false)]);
        assert_eq!(channel.acks(), vec![3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.unacked(), 0);
        assert_eq!(channel.ready("orders_q"), 0);
    }

    #[test]
    fn test_panic_payload_becomes_handler_failure() {
        let owned = panic_failure(Box::new(String::from("index out of bounds")));
        let borrowed = panic_failure(Box::new("handler bug"));
        let opaque = panic_failure(Box::new(7_u8));

        assert_eq!(owned.to_string(), "handler panicked: index out of bounds");
        assert_eq!(borrowed.to_string(), "handler panicked: handler bug");
        assert_eq!(opaque.to_string(), "handler panicked: unknown panic");
    }

    #[tokio::test]
    async fn test_missing_queue_fails_before_consuming() {
        let channel = InMemoryChannel::new();
        let router = PathRouter::new();

        let result = process_messages(&channel, "nowhere", &router).await;

        assert_eq!(
            result,
            Err(AmqpError::ConsumerDeclarationError("nowhere".to_owned()))
        );
    }
}

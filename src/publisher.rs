// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module publishes messages to a service. A message goes to the exchange named
//! after the service and carries its routing path in the `PATH` header, which is what
//! the consuming side routes on. The current trace context travels in the headers too.

use crate::{
    channel::BrokerChannel,
    errors::AmqpError,
    message::{OutboundMessage, PATH_HEADER},
    otel,
    topology::ServiceIdentity,
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Sends messages to services.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `body` to `service`, routed to `path`.
    ///
    /// # Parameters
    /// * `ctx` - Trace context propagated to the consumer
    /// * `service` - Name of the receiving service; its exchange must exist
    /// * `path` - Routing path, sent in the `PATH` header
    /// * `body` - Message payload
    async fn publish(
        &self,
        ctx: &Context,
        service: &str,
        path: &str,
        body: &[u8],
    ) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
pub struct RabbitMQPublisher {
    channel: Arc<dyn BrokerChannel>,
}

impl RabbitMQPublisher {
    /// Creates a new publisher, wrapped in an Arc for sharing.
    pub fn new(channel: Arc<dyn BrokerChannel>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { channel })
    }

    /// Serializes `payload` as JSON and publishes it.
    ///
    /// # Returns
    /// `PublishingError` when the payload cannot be serialized or sent
    pub async fn publish_json<T>(
        &self,
        ctx: &Context,
        service: &str,
        path: &str,
        payload: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                error!(error = err.to_string(), "error serializing message");
                return Err(AmqpError::PublishingError);
            }
        };

        self.publish(ctx, service, path, &body).await
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(
        &self,
        ctx: &Context,
        service: &str,
        path: &str,
        body: &[u8],
    ) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::new();
        otel::inject(ctx, &mut headers);
        headers.insert(PATH_HEADER.to_owned(), path.to_owned());

        let exchange = ServiceIdentity::new(service).exchange();
        debug!("publishing to: {} path: {}", exchange, path);

        self.channel
            .publish(
                &exchange,
                OutboundMessage {
                    message_id: Uuid::new_v4().to_string(),
                    content_type: JSON_CONTENT_TYPE.to_owned(),
                    headers,
                    body: body.to_vec(),
                },
            )
            .await
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A handler processes one routed [`Request`]. Returning an error rejects the message;
//! what happens next depends on the topology the service was started with.

use crate::{errors::HandlerError, request::Request};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use opentelemetry::Context;

/// Processes the requests routed to it.
///
/// `ctx` is the trace context propagated in the message headers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one request.
    ///
    /// # Returns
    /// `Ok` to acknowledge the message, an error to reject it. A handler that panics is
    /// treated as if it had returned an error.
    async fn exec(&self, ctx: &Context, req: &Request) -> Result<(), HandlerError>;
}

/// Handler backed by a synchronous closure.
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, req: &Request) -> Result<(), HandlerError> {
        (self.func)(req)
    }
}

/// Wraps a closure into a [`Handler`].
pub fn handler_fn<F>(func: F) -> FnHandler<F>
where
    F: Fn(&Request) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler { func }
}

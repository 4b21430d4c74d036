// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Handler Requests
//!
//! A [`Request`] is what a handler receives for each routed message. The body is kept
//! as raw bytes; it is only parsed as JSON when a handler asks for it, and the outcome
//! of that parse, value or failure, is kept for later calls.

use crate::errors::RequestError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, sync::OnceLock};

/// A routed message as seen by its handler.
#[derive(Debug)]
pub struct Request {
    path: Option<String>,
    body: Vec<u8>,
    path_params: HashMap<String, String>,
    decoded: OnceLock<Result<Value, RequestError>>,
}

impl Request {
    /// Creates a request. The body is not parsed until [`Request::decoded_body`] is called.
    ///
    /// # Parameters
    /// * `path` - Value of the `PATH` header
    /// * `body` - Raw message body
    /// * `path_params` - Parameters captured by the matched route
    pub fn new(path: Option<String>, body: Vec<u8>, path_params: HashMap<String, String>) -> Self {
        Request {
            path,
            body,
            path_params,
            decoded: OnceLock::new(),
        }
    }

    /// The routing path the message was published with.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The raw body, exactly as received.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Every parameter captured from the path, keyed by its name in the route pattern.
    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// A single path parameter.
    ///
    /// # Parameters
    /// * `name` - Parameter name, as written between braces in the route pattern
    ///
    /// # Returns
    /// The captured segment, or `None` when the route has no such parameter
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// The body parsed as JSON.
    ///
    /// The body is parsed on the first call only. A body that is not valid JSON yields
    /// the same [`RequestError::DecodeError`] on every call.
    pub fn decoded_body(&self) -> Result<&Value, RequestError> {
        self.decoded_body_with(|body| {
            serde_json::from_slice::<Value>(body)
                .map_err(|e| RequestError::DecodeError(e.to_string()))
        })
    }

    /// Like [`Request::decoded_body`], with a caller supplied decoder.
    ///
    /// The decoder only runs if no earlier call has decoded the body yet.
    pub fn decoded_body_with<F>(&self, decoder: F) -> Result<&Value, RequestError>
    where
        F: FnOnce(&[u8]) -> Result<Value, RequestError>,
    {
        self.decoded
            .get_or_init(|| decoder(&self.body))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Deserializes the decoded body into `T`.
    ///
    /// # Returns
    /// `DecodeError` when the body is not JSON, `DeserializeError` when it does not have
    /// the shape of `T`
    pub fn json<T>(&self) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let value = self.decoded_body()?;
        T::deserialize(value).map_err(|e| RequestError::DeserializeError(e.to_string()))
    }
}

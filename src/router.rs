// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Path Routing
//!
//! Messages are routed by the path carried in their `PATH` header. A [`Router`] resolves
//! that path to a handler and the parameters captured from it. [`PathRouter`] is the
//! default implementation: patterns are `/` separated and a `{name}` segment captures
//! exactly one path segment.
//!
//! ```text
//! /users/{id}          matches /users/42         with id = 42
//! /users/{id}/orders   does not match /users/42
//! ```

use crate::handler::Handler;
use std::{collections::HashMap, fmt, sync::Arc};

/// A resolved route.
#[derive(Clone)]
pub struct Route {
    pub handler: Arc<dyn Handler>,
    pub path_params: HashMap<String, String>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path_params", &self.path_params)
            .finish_non_exhaustive()
    }
}

/// Resolves message paths to handlers.
///
/// Routers are shared read-only across every message the service processes.
pub trait Router: Send + Sync {
    /// Returns `None` when no handler matches, including when the message has no path.
    fn find_handler(&self, path: Option<&str>) -> Option<Route>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct PathRoute {
    pattern: Vec<Segment>,
    handler: Arc<dyn Handler>,
}

impl PathRoute {
    fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if self.pattern.len() != path.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.pattern.iter().zip(path) {
            match segment {
                Segment::Literal(lit) if lit == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*value).to_owned());
                }
            }
        }

        Some(params)
    }
}

/// Router matching paths against registered patterns, in registration order.
#[derive(Default)]
pub struct PathRouter {
    routes: Vec<PathRoute>,
}

impl PathRouter {
    /// Creates a router without routes. Every path is unroutable until one is added.
    pub fn new() -> Self {
        PathRouter::default()
    }

    /// Registers `handler` for `pattern`.
    ///
    /// Routes are matched in registration order and the first match wins, so more
    /// specific patterns must be registered before the generic ones they overlap.
    ///
    /// # Parameters
    /// * `pattern` - Slash separated segments, where `{name}` captures a path parameter
    /// * `handler` - Handler run for every message whose path matches
    ///
    /// # Returns
    /// The router, for chaining further routes
    ///
    /// # Example
    /// ```
    /// use rabbitmq_app::{handler::handler_fn, router::{PathRouter, Router}};
    ///
    /// let router = PathRouter::new().route("/users/{id}", handler_fn(|_| Ok(())));
    ///
    /// let route = router.find_handler(Some("/users/42")).unwrap();
    /// assert_eq!(route.path_params.get("id").map(String::as_str), Some("42"));
    /// ```
    pub fn route<H>(self, pattern: &str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.route_arc(pattern, Arc::new(handler))
    }

    /// Registers an already shared handler, so one handler can serve several patterns.
    pub fn route_arc(mut self, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        self.routes.push(PathRoute {
            pattern: parse_pattern(pattern),
            handler,
        });
        self
    }
}

impl Router for PathRouter {
    fn find_handler(&self, path: Option<&str>) -> Option<Route> {
        let segments = split(path?);

        self.routes.iter().find_map(|route| {
            route.matches(&segments).map(|path_params| Route {
                handler: route.handler.clone(),
                path_params,
            })
        })
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    split(pattern)
        .into_iter()
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Some(name) => Segment::Param(name.to_owned()),
                None => Segment::Literal(segment.to_owned()),
            }
        })
        .collect()
}

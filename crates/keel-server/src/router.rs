//! Request routing and path matching.
//!
//! Routes are `(method, pattern, handler)` triples matched in registration
//! order; the first match wins. Patterns are made of `/`-separated segments:
//!
//! - `users` matches that literal segment
//! - `{id}` matches any single segment and captures it as `id`
//! - `{*rest}` (last segment only) matches everything that remains,
//!   including nothing
//!
//! Empty segments are ignored on both sides, so `/users/` and `/users`
//! match the same routes.
//!
//! # Example
//!
//! ```rust
//! use keel_server::router::{Lookup, Router};
//! use keel_middleware::{text_response, Request};
//! use http::{Method, StatusCode};
//!
//! async fn get_user(_request: Request) -> keel_middleware::Response {
//!     text_response(StatusCode::OK, "user")
//! }
//!
//! let router = Router::new().get("/users/{id}", get_user);
//!
//! match router.lookup(&Method::GET, "/users/42") {
//!     Lookup::Found(found) => {
//!         assert_eq!(found.pattern.as_str(), "/users/{id}");
//!         assert_eq!(found.params.get("id"), Some("42"));
//!     }
//!     _ => unreachable!(),
//! }
//!
//! assert!(matches!(router.lookup(&Method::POST, "/users/42"), Lookup::MethodNotAllowed));
//! assert!(matches!(router.lookup(&Method::GET, "/teams"), Lookup::NotFound));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use keel_core::RoutePattern;
use keel_middleware::{Handler, Pipeline};

/// Path parameters captured by the matched route.
///
/// Inserted into the request's extensions before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Returns a captured parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

#[derive(Clone)]
struct Route {
    method: Method,
    pattern: RoutePattern,
    segments: Vec<PathSegment>,
    handler: Arc<dyn Handler>,
}

impl Route {
    fn new(method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            pattern: RoutePattern::new(pattern),
            segments: parse_segments(pattern),
            handler,
        }
    }

    fn match_path(&self, path: &[&str]) -> Option<PathParams> {
        let mut params = HashMap::new();
        let mut remaining = path.iter();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Wildcard(name) => {
                    params.insert(name.clone(), path[index..].join("/"));
                    return Some(PathParams(params));
                }
                PathSegment::Literal(expected) => {
                    if remaining.next() != Some(&expected.as_str()) {
                        return None;
                    }
                }
                PathSegment::Param(name) => {
                    let actual = remaining.next()?;
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }

        remaining.next().is_none().then_some(PathParams(params))
    }
}

fn parse_segments(pattern: &str) -> Vec<PathSegment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => match name.strip_prefix('*') {
                Some(rest) => PathSegment::Wildcard(rest.to_string()),
                None => PathSegment::Param(name.to_string()),
            },
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins a mount prefix and a route pattern.
fn join(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match pattern.trim_start_matches('/') {
        "" if prefix.is_empty() => "/".to_string(),
        "" => prefix.to_string(),
        rest => format!("{prefix}/{rest}"),
    }
}

/// A successful route match.
pub struct Found {
    /// The matched route template.
    pub pattern: RoutePattern,
    /// Captured path parameters.
    pub params: PathParams,
    /// The handler registered for the route.
    pub handler: Arc<dyn Handler>,
}

/// Result of [`Router::lookup`].
pub enum Lookup {
    /// A route matched method and path.
    Found(Found),
    /// The path matched at least one route, but none for this method.
    MethodNotAllowed,
    /// No route matched the path.
    NotFound,
}

/// HTTP request router.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route.
    #[must_use]
    pub fn route(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.add_route(method, pattern, Arc::new(handler));
        self
    }

    /// Adds a `GET` route.
    #[must_use]
    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    /// Adds a `POST` route.
    #[must_use]
    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    /// Adds a `PUT` route.
    #[must_use]
    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::PUT, pattern, handler)
    }

    /// Adds a `DELETE` route.
    #[must_use]
    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Adds a route with an already shared handler.
    pub fn add_route(&mut self, method: Method, pattern: &str, handler: Arc<dyn Handler>) {
        self.routes.push(Route::new(method, pattern, handler));
    }

    /// Moves every route of `other` under `prefix`, wrapping each handler in
    /// `pipeline`.
    pub fn nest(&mut self, prefix: &str, other: Router, pipeline: Arc<Pipeline>) {
        for route in other.routes {
            let pattern = join(prefix, route.pattern.as_str());
            let handler = Arc::clone(&pipeline).wrap(route.handler);
            self.add_route(route.method, &pattern, handler);
        }
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns every registered `(method, pattern)` pair in order.
    #[must_use]
    pub fn routes(&self) -> Vec<(Method, &str)> {
        self.routes
            .iter()
            .map(|route| (route.method.clone(), route.pattern.as_str()))
            .collect()
    }

    /// Matches a request method and path.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let segments = split_path(path);
        let mut path_matched = false;

        for route in &self.routes {
            let Some(params) = route.match_path(&segments) else {
                continue;
            };
            if route.method == *method {
                return Lookup::Found(Found {
                    pattern: route.pattern.clone(),
                    params,
                    handler: Arc::clone(&route.handler),
                });
            }
            path_matched = true;
        }

        if path_matched {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .finish()
    }
}

//! The route table and matcher (§4.2).
//!
//! Grounded in `starapi/routing.py`'s `Router.match`/`Router.handle` — an
//! ordered list walked once per dispatch, literal-then-converter segment
//! matching, and the full-match/partial-match/no-match trichotomy that
//! drives the 404/405 fallback.

use std::collections::HashMap;
use std::sync::Arc;

use crate::converters::{Converter, ConverterRegistry};
use crate::gateway::ParamValue;
use crate::route::{HttpRoute, Method, WsRoute};

/// The outcome of matching one HTTP scope against the route table (§4.2).
pub enum HttpMatch {
    Full { route: Arc<HttpRoute>, params: HashMap<String, ParamValue> },
    MethodNotAllowed,
    NotFound,
}

/// The outcome of matching one WebSocket scope against the route table.
pub enum WsMatch {
    Full { route: Arc<WsRoute>, params: HashMap<String, ParamValue> },
    NotFound,
}

/// Normalize a path for matching only: append a trailing `/` if absent,
/// leaving the scope's own path untouched (§4.2 step 1).
fn normalize(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Ordered list of routes; matches an incoming scope and falls back to a
/// not-found/method-not-allowed outcome (§4.2). Read-only after
/// registration, so the hot path needs no lock (§5).
#[derive(Default)]
pub struct Router {
    http_routes: Vec<Arc<HttpRoute>>,
    ws_routes: Vec<Arc<WsRoute>>,
    converters: ConverterRegistry,
}

impl Router {
    pub fn new() -> Self {
        Router {
            http_routes: Vec::new(),
            ws_routes: Vec::new(),
            converters: ConverterRegistry::new(),
        }
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn register_converter(&mut self, converter: Converter) {
        self.converters.register(converter);
    }

    /// Append an HTTP route in registration order (§8 "Registration order
    /// determinism").
    pub fn add_http(&mut self, route: HttpRoute) {
        log::debug!(
            "registering http route {} {:?}",
            route
                .methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
            route.path().pattern()
        );
        self.http_routes.push(Arc::new(route));
    }

    pub fn add_ws(&mut self, route: WsRoute) {
        log::debug!("registering websocket route {:?}", route.path().pattern());
        self.ws_routes.push(Arc::new(route));
    }

    pub fn http_routes(&self) -> &[Arc<HttpRoute>] {
        &self.http_routes
    }

    pub fn ws_routes(&self) -> &[Arc<WsRoute>] {
        &self.ws_routes
    }

    /// Match an HTTP `(method, path)` pair against the route table,
    /// earliest-registered wins on full match; first partial match is used
    /// for 405 (§4.2, §8).
    pub fn match_http(&self, method: &str, path: &str) -> HttpMatch {
        let normalized = normalize(path);
        let mut partial: Option<Arc<HttpRoute>> = None;

        for route in &self.http_routes {
            let Some(params) = route.path().match_path(&normalized) else {
                continue;
            };
            let wanted = Method::parse(method);
            if route.methods.contains(&wanted) {
                return HttpMatch::Full { route: route.clone(), params };
            }
            if partial.is_none() {
                partial = Some(route.clone());
            }
        }

        match partial {
            Some(_) => HttpMatch::MethodNotAllowed,
            None => HttpMatch::NotFound,
        }
    }

    /// Match a WebSocket path against the route table (§4.2 step 4: no
    /// match closes with 1000 Normal Closure, handled by the caller).
    pub fn match_ws(&self, path: &str) -> WsMatch {
        let normalized = normalize(path);
        for route in &self.ws_routes {
            if let Some(params) = route.path().match_path(&normalized) {
                return WsMatch::Full { route: route.clone(), params };
            }
        }
        WsMatch::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use crate::route::{HttpHandler, WsEncoding, WebSocketEndpoint};
    use std::sync::Arc;

    fn noop_handler() -> HttpHandler {
        Arc::new(|_req, _params| Box::pin(async { Ok(Response::ok("ok")) }))
    }

    struct EchoEndpoint;
    #[async_trait::async_trait]
    impl WebSocketEndpoint for EchoEndpoint {}

    #[test]
    fn integer_path_param_scenario() {
        let mut router = Router::new();
        let route = HttpRoute::new("/users/{id:int}", vec![Method::Get], router.converters(), noop_handler()).unwrap();
        router.add_http(route);

        match router.match_http("GET", "/users/42") {
            HttpMatch::Full { params, .. } => {
                assert_eq!(params.get("id").unwrap().as_int(), Some(42));
            }
            _ => panic!("expected full match"),
        }

        assert!(matches!(router.match_http("GET", "/users/abc"), HttpMatch::NotFound));
    }

    #[test]
    fn method_fallback_scenario() {
        let mut router = Router::new();
        let route = HttpRoute::new("/items/", vec![Method::Post], router.converters(), noop_handler()).unwrap();
        router.add_http(route);

        assert!(matches!(router.match_http("GET", "/items/"), HttpMatch::MethodNotAllowed));
        assert!(matches!(router.match_http("POST", "/items/"), HttpMatch::Full { .. }));
    }

    #[test]
    fn trailing_slash_normalization_scenario() {
        let mut router = Router::new();
        let route = HttpRoute::new("/a/b", vec![Method::Get], router.converters(), noop_handler()).unwrap();
        router.add_http(route);

        assert!(matches!(router.match_http("GET", "/a/b"), HttpMatch::Full { .. }));
        assert!(matches!(router.match_http("GET", "/a/b/"), HttpMatch::Full { .. }));
    }

    #[test]
    fn earliest_registered_route_wins_on_ambiguous_full_match() {
        let mut router = Router::new();
        let first = HttpRoute::new("/x/{v}", vec![Method::Get], router.converters(), noop_handler()).unwrap();
        let second = HttpRoute::new("/x/{v:int}", vec![Method::Get], router.converters(), noop_handler()).unwrap();
        router.add_http(first);
        router.add_http(second);

        match router.match_http("GET", "/x/42") {
            HttpMatch::Full { route, .. } => assert_eq!(route.path().pattern(), "/x/{v}"),
            _ => panic!("expected full match"),
        }
    }

    #[test]
    fn ws_route_matches_by_path_only() {
        let mut router = Router::new();
        let route = WsRoute::new("/ws", WsEncoding::Text, router.converters(), Arc::new(EchoEndpoint)).unwrap();
        router.add_ws(route);

        assert!(matches!(router.match_ws("/ws"), WsMatch::Full { .. }));
        assert!(matches!(router.match_ws("/nope"), WsMatch::NotFound));
    }
}

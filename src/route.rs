//! Routes and groups: the data that the [`crate::router::Router`] matches
//! against and the [`crate::app::Application`] dispatcher invokes.
//!
//! Grounded in `starapi/routing.py`'s `Route`/`WebSocketRoute`/`Group`
//! classes, with the cyclic Route → Group reference resolved per §9's
//! design note as a `Weak` pointer rather than a reflected attribute.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;

use crate::converters::ConverterRegistry;
use crate::error::Error;
use crate::gateway::ParamValue;
use crate::path::CompiledPath;
use crate::request::Request;
use crate::response::Response;
use crate::ws::WebSocket;

/// HTTP verb a [`Route`] accepts. `Other` covers verbs the core does not
/// special-case (e.g. `TRACE`, `CONNECT`), kept uppercase per §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Method {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a declared [`Parameter`] is read from. The core never validates
/// query/header/cookie values itself (§3) — these exist purely for
/// documentation/OpenAPI collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub required: bool,
    pub location: ParamLocation,
    pub declared_type: String,
    pub deprecated: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParamLocation, declared_type: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            required: true,
            location,
            declared_type: declared_type.into(),
            deprecated: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

/// An HTTP endpoint callback: given the in-flight request and its decoded
/// path parameters, produce a [`Response`] or an [`Error`] for the error
/// pipeline (§7) to funnel.
pub type HttpHandler = Arc<
    dyn for<'a> Fn(
            &'a mut Request,
            &'a HashMap<String, ParamValue>,
        ) -> BoxFuture<'a, Result<Response, Error>>
        + Send
        + Sync,
>;

/// A compiled HTTP route, immutable after registration except for its path
/// (rewritten exactly once when folded into a [`Group`]'s prefix, per §3).
#[derive(Clone)]
pub struct HttpRoute {
    pub(crate) path: CompiledPath,
    pub methods: std::collections::HashSet<Method>,
    pub handler: HttpHandler,
    pub parameters: Vec<Parameter>,
    pub request_payload: Option<String>,
    pub response_schemas: HashMap<u16, String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    pub hidden: bool,
    pub(crate) group: Option<Weak<Group>>,
}

impl HttpRoute {
    pub fn new(
        pattern: &str,
        methods: impl IntoIterator<Item = Method>,
        registry: &ConverterRegistry,
        handler: HttpHandler,
    ) -> Result<Self, Error> {
        let methods: std::collections::HashSet<Method> = methods.into_iter().collect();
        if methods.is_empty() {
            return Err(Error::Configuration(format!(
                "route {pattern:?} must declare at least one HTTP method"
            )));
        }
        Ok(HttpRoute {
            path: CompiledPath::compile(pattern, registry)?,
            methods,
            handler,
            parameters: Vec::new(),
            request_payload: None,
            response_schemas: HashMap::new(),
            tags: Vec::new(),
            deprecated: false,
            hidden: false,
            group: None,
        })
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn path(&self) -> &CompiledPath {
        &self.path
    }

    pub fn group(&self) -> Option<Arc<Group>> {
        self.group.as_ref().and_then(Weak::upgrade)
    }

    /// Single-method convenience constructors matching §6's
    /// `route.get|post|put|patch|delete|head|options(path, ...)` surface.
    pub fn get(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Get], registry, handler)
    }

    pub fn post(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Post], registry, handler)
    }

    pub fn put(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Put], registry, handler)
    }

    pub fn patch(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Patch], registry, handler)
    }

    pub fn delete(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Delete], registry, handler)
    }

    pub fn head(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Head], registry, handler)
    }

    pub fn options(pattern: &str, registry: &ConverterRegistry, handler: HttpHandler) -> Result<Self, Error> {
        Self::new(pattern, [Method::Options], registry, handler)
    }

    /// Fold this route's declared path into a group's prefix, recompiling
    /// the path once (§3: "may be rewritten once when added to a group").
    pub(crate) fn rewrite_for_group(&mut self, group: &Arc<Group>, registry: &ConverterRegistry) -> Result<(), Error> {
        let joined = join_prefix(&group.prefix, self.path.pattern());
        self.path = CompiledPath::compile(&joined, registry)?;
        self.group = Some(Arc::downgrade(group));
        Ok(())
    }
}

/// What form [`WebSocket::receive_text`]/etc a [`WsRoute`]'s `on_receive`
/// dispatches through (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEncoding {
    Text,
    Bytes,
    Json,
}

/// The capability set a WebSocket endpoint implements (§9's "dynamic
/// dispatch of receive helpers" design note): `on_receive` is optional —
/// its absence makes the endpoint connect-only, entering no receive loop.
#[async_trait::async_trait]
pub trait WebSocketEndpoint: Send + Sync {
    async fn on_connect(&self, ws: &mut WebSocket) -> Result<(), Error> {
        ws.accept(None, Vec::new()).await
    }

    /// `None` signals a connect-only endpoint, per §4.5's endpoint loop
    /// step 2. Override and return `Some` to receive a text/bytes/JSON
    /// payload per [`WsRoute::encoding`].
    async fn on_receive(&self, _ws: &mut WebSocket, _data: WsData) -> Result<(), Error> {
        Ok(())
    }

    fn has_receive(&self) -> bool {
        false
    }

    async fn on_disconnect(&self, _ws: &mut WebSocket, _code: u16) {}
}

/// A decoded inbound WebSocket payload, shaped by the route's
/// [`WsEncoding`].
#[derive(Debug, Clone)]
pub enum WsData {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

#[derive(Clone)]
pub struct WsRoute {
    pub(crate) path: CompiledPath,
    pub encoding: WsEncoding,
    pub endpoint: Arc<dyn WebSocketEndpoint>,
    pub(crate) group: Option<Weak<Group>>,
}

impl WsRoute {
    pub fn new(
        pattern: &str,
        encoding: WsEncoding,
        registry: &ConverterRegistry,
        endpoint: Arc<dyn WebSocketEndpoint>,
    ) -> Result<Self, Error> {
        Ok(WsRoute {
            path: CompiledPath::compile(pattern, registry)?,
            encoding,
            endpoint,
            group: None,
        })
    }

    pub fn path(&self) -> &CompiledPath {
        &self.path
    }

    pub fn group(&self) -> Option<Arc<Group>> {
        self.group.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn rewrite_for_group(&mut self, group: &Arc<Group>, registry: &ConverterRegistry) -> Result<(), Error> {
        let joined = join_prefix(&group.prefix, self.path.pattern());
        self.path = CompiledPath::compile(&joined, registry)?;
        self.group = Some(Arc::downgrade(group));
        Ok(())
    }
}

/// A route before it has been folded into the router's flat list: either an
/// HTTP route or a WebSocket route, carrying only its prefix-relative
/// pattern until [`crate::app::Application::add_group`] rewrites it.
pub enum RouteTemplate {
    Http(HttpRoute),
    Ws(WsRoute),
}

type GroupCheckHook = Arc<
    dyn for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Option<Response>, Error>> + Send + Sync,
>;
type GroupErrorHook = Arc<dyn Fn(&Request, &Error) -> Option<Response> + Send + Sync>;
type GroupWsErrorHook = Arc<dyn Fn(&WebSocket, &Error) + Send + Sync>;

/// A named bundle of routes sharing a path prefix plus optional pre-check
/// and error hooks (§3, §4.7).
///
/// The group's identity for the "already added" check (§4.7) is its
/// `name`; the original reads `__class__.__name__.lower()` via reflection,
/// which Rust has no equivalent of, so the name is supplied explicitly at
/// construction instead.
pub struct Group {
    pub name: String,
    pub prefix: String,
    pub deprecated: bool,
    pub(crate) routes: Vec<RouteTemplate>,
    pub(crate) group_check: Option<GroupCheckHook>,
    pub(crate) on_error: Option<GroupErrorHook>,
    pub(crate) on_ws_error: Option<GroupWsErrorHook>,
}

impl Group {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Result<Self, Error> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(Error::Configuration(format!(
                "group prefix {prefix:?} must be non-empty and start with '/'"
            )));
        }
        Ok(Group {
            name: name.into(),
            prefix,
            deprecated: false,
            routes: Vec::new(),
            group_check: None,
            on_error: None,
            on_ws_error: None,
        })
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn with_group_check(
        mut self,
        hook: impl for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Option<Response>, Error>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.group_check = Some(Arc::new(hook));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&Request, &Error) -> Option<Response> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn with_on_ws_error(
        mut self,
        hook: impl Fn(&WebSocket, &Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_ws_error = Some(Arc::new(hook));
        self
    }

    /// Declare an HTTP route at a path relative to this group's prefix.
    /// The final path is computed when the group is registered with the
    /// router (§4.7: `route.path = "/" + groupPrefix + route.declaredPath`,
    /// collapsing adjacent slashes).
    pub fn route(mut self, route: HttpRoute) -> Self {
        self.routes.push(RouteTemplate::Http(route));
        self
    }

    pub fn ws(mut self, route: WsRoute) -> Self {
        self.routes.push(RouteTemplate::Ws(route));
        self
    }

    pub(crate) fn drain_routes(&mut self) -> Vec<RouteTemplate> {
        std::mem::take(&mut self.routes)
    }

    /// Run the group-check hook, if any. Returning `Some(Response)`
    /// short-circuits the route callback (§4.7).
    pub async fn group_check(&self, request: &mut Request) -> Result<Option<Response>, Error> {
        match &self.group_check {
            Some(hook) => hook(request).await,
            None => Ok(None),
        }
    }
}

/// Join a group prefix and a declared path with exactly one `/` between
/// them, collapsing any adjacent slashes at the seam (§4.7).
pub fn join_prefix(prefix: &str, declared: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let declared = declared.trim_start_matches('/');
    format!("{prefix}/{declared}")
}

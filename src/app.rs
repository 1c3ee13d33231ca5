//! The Dispatcher: the top-level entry point per connection scope (§4.6).
//!
//! Grounded in `starapi/app.py:95`'s `Application.__call__` — branch on
//! scope type, build the request/websocket handle, run middleware, hand off
//! to the router, funnel errors — generalized per the teacher's own
//! per-connection `tokio::spawn` task model in `router.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{self, Error};
use crate::gateway::{
    HttpReceiver, HttpSender, LifespanReceiver, LifespanSender, ScopeType, WsReceiver, WsSender,
};
use crate::gateway::Scope;
use crate::lifespan::{self, DefaultLifespan, Lifespan};
use crate::request::Request;
use crate::response::{Response, ResponseFormatter};
use crate::route::{Group, HttpRoute, RouteTemplate, WsData, WsEncoding, WsRoute};
use crate::router::{HttpMatch, Router, WsMatch};
use crate::ws::{InboundMessage, WebSocket};

/// A single middleware step run, in registration order, before the router
/// sees an HTTP request (§4.6, §9).
#[async_trait]
pub trait HttpMiddleware: Send + Sync {
    async fn call(&self, request: &mut Request) -> Result<(), Error>;
}

/// The WebSocket analogue of [`HttpMiddleware`], run before the route's
/// `on_connect` (§4.6).
#[async_trait]
pub trait WsMiddleware: Send + Sync {
    async fn call(&self, ws: &mut WebSocket) -> Result<(), Error>;
}

type RouteErrorHook = Arc<dyn Fn(&Request, &Error) -> Option<Response> + Send + Sync>;
type WsErrorHook = Arc<dyn Fn(&WebSocket, &Error) + Send + Sync>;

const OPENAPI_PATH: &str = "/openapi.json";

/// The top-level application: owns the [`Router`] and all registered
/// [`Group`]s exclusively (§3 Ownership), plus the cross-cutting hooks the
/// dispatcher consults.
pub struct Application {
    config: Config,
    router: Router,
    group_names: HashSet<String>,
    /// Strong references to every registered group, keeping each route's
    /// `Weak<Group>` back-reference (`HttpRoute::group`/`WsRoute::group`)
    /// alive for the Application's lifetime. Grounded in `starapi/app.py:80`
    /// (`self._state.groups.append(group)`), which keeps the same list for
    /// the same reason.
    groups: Vec<Arc<Group>>,
    http_middlewares: Vec<Arc<dyn HttpMiddleware>>,
    ws_middlewares: Vec<Arc<dyn WsMiddleware>>,
    formatter: ResponseFormatter,
    on_route_error: Option<RouteErrorHook>,
    on_route_ws_error: Option<WsErrorHook>,
    lifespan: Arc<dyn Lifespan>,
    openapi_document: Option<Arc<dyn Fn() -> serde_json::Value + Send + Sync>>,
}

impl Application {
    pub fn new(config: Config) -> Self {
        Application {
            config,
            router: Router::new(),
            group_names: HashSet::new(),
            groups: Vec::new(),
            http_middlewares: Vec::new(),
            ws_middlewares: Vec::new(),
            formatter: ResponseFormatter::new(),
            on_route_error: None,
            on_route_ws_error: None,
            lifespan: Arc::new(DefaultLifespan),
            openapi_document: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn converters(&self) -> &crate::converters::ConverterRegistry {
        self.router.converters()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn with_lifespan(mut self, lifespan: impl Lifespan + 'static) -> Self {
        self.lifespan = Arc::new(lifespan);
        self
    }

    pub fn with_formatter(mut self, formatter: ResponseFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_on_route_error(
        mut self,
        hook: impl Fn(&Request, &Error) -> Option<Response> + Send + Sync + 'static,
    ) -> Self {
        self.on_route_error = Some(Arc::new(hook));
        self
    }

    pub fn with_on_route_ws_error(mut self, hook: impl Fn(&WebSocket, &Error) + Send + Sync + 'static) -> Self {
        self.on_route_ws_error = Some(Arc::new(hook));
        self
    }

    /// Configure the OpenAPI document collaborator (§6's reserved
    /// `/openapi.json/` path). Absent configuration, the reserved path
    /// falls through to the router unchanged and yields the ordinary 404.
    pub fn with_openapi_document(mut self, provider: impl Fn() -> serde_json::Value + Send + Sync + 'static) -> Self {
        self.openapi_document = Some(Arc::new(provider));
        self
    }

    pub fn add_http_middleware(&mut self, middleware: impl HttpMiddleware + 'static) {
        self.http_middlewares.push(Arc::new(middleware));
    }

    pub fn add_ws_middleware(&mut self, middleware: impl WsMiddleware + 'static) {
        self.ws_middlewares.push(Arc::new(middleware));
    }

    pub fn add_route(&mut self, route: HttpRoute) {
        self.router.add_http(route);
    }

    pub fn add_ws_route(&mut self, route: WsRoute) {
        self.router.add_ws(route);
    }

    /// Bind `host:port` and serve forever. A thin wrapper delegating to the
    /// process-level server-binding collaborator (§6) — the core declares
    /// the signature and raises [`Error::Dependency`] rather than opening a
    /// socket itself; wire a real listener the way `demos/axum_gateway.rs`
    /// does instead.
    pub fn run(&self, host: &str, port: u16) -> Result<(), Error> {
        Err(Error::Dependency(format!(
            "no server-binding collaborator configured to run on {host}:{port}; see demos/axum_gateway.rs"
        )))
    }

    pub async fn start(&self, host: &str, port: u16) -> Result<(), Error> {
        Err(Error::Dependency(format!(
            "no server-binding collaborator configured to start on {host}:{port}; see demos/axum_gateway.rs"
        )))
    }

    /// Register a group's routes, rewriting each route's path to fold in
    /// the group's prefix (§4.7). A group may be registered at most once;
    /// re-adding the same name is a [`Error::Configuration`] ("group
    /// already added").
    pub fn add_group(&mut self, mut group: Group, prefix: Option<&str>) -> Result<(), Error> {
        if let Some(prefix) = prefix {
            group.prefix = prefix.to_string();
        }
        if !self.group_names.insert(group.name.clone()) {
            return Err(Error::Configuration(format!(
                "group {:?} has already been added",
                group.name
            )));
        }

        let registry = self.router.converters().clone();
        let mut group = Arc::new(group);
        // `group` was just wrapped with a strong count of 1, so `get_mut`
        // always succeeds here.
        let routes = Arc::get_mut(&mut group)
            .expect("group Arc has a single owner immediately after construction")
            .drain_routes();

        for template in routes {
            match template {
                RouteTemplate::Http(mut route) => {
                    route.rewrite_for_group(&group, &registry)?;
                    log::debug!("registering grouped http route under {:?}", group.prefix);
                    self.router.add_http(route);
                }
                RouteTemplate::Ws(mut route) => {
                    route.rewrite_for_group(&group, &registry)?;
                    self.router.add_ws(route);
                }
            }
        }
        self.groups.push(group);
        Ok(())
    }

    /// All groups registered with this application (§3 Ownership).
    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    fn default_error_response(&self, error: &Error) -> Response {
        match error {
            Error::Http { status, detail, headers } => {
                let mut response = Response::new(*status, detail.clone());
                for (name, value) in headers {
                    response = response.with_header(name.clone(), value.clone());
                }
                response
            }
            other => {
                log::error!("unhandled route error: {other}");
                if self.config.debug {
                    Response::new(500, serde_json::json!({ "detail": other.to_string() }))
                } else {
                    Response::internal()
                }
            }
        }
    }

    /// The error pipeline of §7: group hook, then application hook, then
    /// the default 500 (skipped entirely for `Error::Http`, which an
    /// endpoint raises to explicitly request a specific response).
    async fn run_error_pipeline(&self, group: Option<&Group>, request: &mut Request, error: Error) -> Response {
        if matches!(error, Error::Http { .. }) {
            return self.default_error_response(&error);
        }
        if let Some(group) = group {
            if let Some(hook) = &group.on_error {
                if let Some(response) = hook(request, &error) {
                    return response;
                }
            }
        }
        if let Some(hook) = &self.on_route_error {
            if let Some(response) = hook(request, &error) {
                return response;
            }
        }
        self.default_error_response(&error)
    }

    fn report_ws_error(&self, group: Option<&Group>, ws: &WebSocket, error: &Error) {
        if let Some(group) = group {
            if let Some(hook) = &group.on_ws_error {
                hook(ws, error);
            }
        }
        if let Some(hook) = &self.on_route_ws_error {
            hook(ws, error);
        }
        log::error!("websocket endpoint error: {error}");
    }

    /// Entry point per scope (§4.6): branch on scope type.
    pub async fn handle(
        &self,
        scope: Scope,
        http: Option<(Box<dyn HttpReceiver>, Box<dyn HttpSender>)>,
        ws: Option<(Box<dyn WsReceiver>, Box<dyn WsSender>)>,
        lifespan_io: Option<(Box<dyn LifespanReceiver>, Box<dyn LifespanSender>)>,
    ) -> Result<(), Error> {
        match scope.scope_type {
            ScopeType::Http => {
                let (receiver, sender) = http.ok_or_else(|| Error::Protocol("http scope missing channel pair".to_string()))?;
                self.dispatch_http(scope, receiver, sender).await
            }
            ScopeType::WebSocket => {
                let (receiver, sender) = ws.ok_or_else(|| Error::Protocol("websocket scope missing channel pair".to_string()))?;
                self.dispatch_ws(scope, receiver, sender).await
            }
            ScopeType::Lifespan => {
                let (receiver, sender) =
                    lifespan_io.ok_or_else(|| Error::Protocol("lifespan scope missing channel pair".to_string()))?;
                self.dispatch_lifespan(scope, receiver, sender).await
            }
        }
    }

    async fn dispatch_lifespan(
        &self,
        mut scope: Scope,
        mut receiver: Box<dyn LifespanReceiver>,
        mut sender: Box<dyn LifespanSender>,
    ) -> Result<(), Error> {
        lifespan::run(self.lifespan.as_ref(), &mut scope.state, receiver.as_mut(), sender.as_mut()).await
    }

    async fn dispatch_http(
        &self,
        scope: Scope,
        receiver: Box<dyn HttpReceiver>,
        mut sender: Box<dyn HttpSender>,
    ) -> Result<(), Error> {
        log::debug!("dispatching http {:?} {:?}", scope.method, scope.path);
        let mut request = Request::new(scope, receiver);

        for middleware in &self.http_middlewares {
            if let Err(e) = middleware.call(&mut request).await {
                return self.emit_error(None, &mut request, e, sender.as_mut()).await;
            }
        }

        if self.is_openapi_path(request.scope().path.as_str()) {
            if let Some(provider) = &self.openapi_document {
                let response = Response::ok(provider());
                return self.emit(&mut request, response, sender.as_mut()).await;
            }
        }

        let method = request.scope().method.clone().unwrap_or_default();
        let path = request.scope().path.clone();
        match self.router.match_http(&method, &path) {
            HttpMatch::Full { route, params } => {
                request.scope_mut().path_params = params.clone();
                request.scope_mut().endpoint_name = Some(route.path().pattern().to_string());
                let group = route.group();

                if let Some(group) = &group {
                    match group.group_check(&mut request).await {
                        Ok(Some(response)) => {
                            return self.emit(&mut request, response, sender.as_mut()).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            return self.emit_error(Some(group), &mut request, e, sender.as_mut()).await;
                        }
                    }
                }

                let outcome = (route.handler)(&mut request, &params).await;
                match outcome {
                    Ok(response) => self.emit(&mut request, response, sender.as_mut()).await,
                    Err(e) => self.emit_error(group.as_deref(), &mut request, e, sender.as_mut()).await,
                }
            }
            HttpMatch::MethodNotAllowed => {
                self.emit(&mut request, Response::method_not_allowed(), sender.as_mut()).await
            }
            HttpMatch::NotFound => self.emit(&mut request, Response::not_found(), sender.as_mut()).await,
        }
    }

    fn is_openapi_path(&self, path: &str) -> bool {
        path == OPENAPI_PATH || path == format!("{OPENAPI_PATH}/")
    }

    async fn emit(&self, request: &mut Request, response: Response, sender: &mut dyn HttpSender) -> Result<(), Error> {
        let accept = request.headers().get("accept").cloned();
        let response = self.formatter.apply(request, response);
        response.emit(accept.as_deref(), self.config.default_encoder.as_ref(), sender).await
    }

    /// Run the error pipeline, emit the resulting response, and — only in
    /// debug mode, and only for errors that are not an explicit
    /// [`Error::Http`] control-flow response — re-raise the original error
    /// once the response is on the wire (§7.1).
    async fn emit_error(
        &self,
        group: Option<&Group>,
        request: &mut Request,
        error: Error,
        sender: &mut dyn HttpSender,
    ) -> Result<(), Error> {
        let reraise = self.config.debug && !matches!(error, Error::Http { .. });
        let cause = error.to_string();
        let response = self.run_error_pipeline(group, request, error).await;
        self.emit(request, response, sender).await?;
        if reraise {
            return Err(Error::Internal(cause));
        }
        Ok(())
    }

    async fn dispatch_ws(
        &self,
        scope: Scope,
        receiver: Box<dyn WsReceiver>,
        sender: Box<dyn WsSender>,
    ) -> Result<(), Error> {
        log::debug!("dispatching websocket {:?}", scope.path);
        let mut ws = WebSocket::new(scope, receiver, sender);

        for middleware in &self.ws_middlewares {
            if let Err(e) = middleware.call(&mut ws).await {
                self.report_ws_error(None, &ws, &e);
                let _ = ws.close(Some(error::CLOSE_INTERNAL_ERROR), None).await;
                return Err(e);
            }
        }

        let path = ws.scope().path.clone();
        match self.router.match_ws(&path) {
            WsMatch::Full { route, params } => {
                ws.scope_mut().path_params = params;
                ws.scope_mut().endpoint_name = Some(route.path().pattern().to_string());
                self.run_ws_endpoint(route, ws).await;
                Ok(())
            }
            WsMatch::NotFound => {
                let _ = ws.close(Some(error::CLOSE_NORMAL), None).await;
                Ok(())
            }
        }
    }

    /// The subclassed-WebSocket-endpoint loop of §4.5.
    async fn run_ws_endpoint(&self, route: Arc<WsRoute>, mut ws: WebSocket) {
        let group = route.group();

        if let Err(e) = route.endpoint.on_connect(&mut ws).await {
            self.report_ws_error(group.as_deref(), &ws, &e);
            let _ = ws.close(Some(error::CLOSE_INTERNAL_ERROR), None).await;
            route.endpoint.on_disconnect(&mut ws, error::CLOSE_INTERNAL_ERROR).await;
            return;
        }

        if !route.endpoint.has_receive() {
            return;
        }

        let mut final_code = error::CLOSE_NORMAL;
        loop {
            match ws.receive().await {
                Ok(InboundMessage::Receive { text, bytes }) => {
                    let data = match route.encoding {
                        WsEncoding::Text => WsData::Text(text.unwrap_or_default()),
                        WsEncoding::Bytes => WsData::Bytes(bytes.unwrap_or_default()),
                        WsEncoding::Json => {
                            let raw = text.unwrap_or_else(|| {
                                bytes.map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default()
                            });
                            match serde_json::from_str(&raw) {
                                Ok(value) => WsData::Json(value),
                                Err(e) => {
                                    self.report_ws_error(
                                        group.as_deref(),
                                        &ws,
                                        &Error::Payload(format!("malformed websocket json: {e}")),
                                    );
                                    let _ = ws.close(Some(error::CLOSE_UNSUPPORTED_DATA), None).await;
                                    final_code = error::CLOSE_UNSUPPORTED_DATA;
                                    break;
                                }
                            }
                        }
                    };

                    if let Err(e) = route.endpoint.on_receive(&mut ws, data).await {
                        self.report_ws_error(group.as_deref(), &ws, &e);
                        final_code = error::CLOSE_INTERNAL_ERROR;
                        break;
                    }
                }
                Ok(InboundMessage::Disconnect { code }) => {
                    final_code = code.unwrap_or(error::CLOSE_NORMAL);
                    break;
                }
                Ok(InboundMessage::Connect) => continue,
                Err(e) => {
                    self.report_ws_error(group.as_deref(), &ws, &e);
                    final_code = error::CLOSE_INTERNAL_ERROR;
                    break;
                }
            }
        }

        route.endpoint.on_disconnect(&mut ws, final_code).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{HttpReceiveMessage, HttpSendMessage, ScopeType};
    use crate::route::{HttpHandler, Method, WebSocketEndpoint};
    use std::sync::Mutex;

    struct NoMoreBody;
    #[async_trait]
    impl HttpReceiver for NoMoreBody {
        async fn receive(&mut self) -> Result<HttpReceiveMessage, Error> {
            Ok(HttpReceiveMessage::Request { body: Vec::new(), more_body: false })
        }
    }

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<HttpSendMessage>>>);

    struct RecordingHttpSender(Recorder);
    #[async_trait]
    impl HttpSender for RecordingHttpSender {
        async fn send(&mut self, message: HttpSendMessage) -> Result<(), Error> {
            self.0 .0.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn recording_sender() -> (Recorder, Box<dyn HttpSender>) {
        let recorder = Recorder::default();
        (recorder.clone(), Box::new(RecordingHttpSender(recorder)))
    }

    fn http_scope(method: &str, path: &str) -> Scope {
        let mut scope = Scope::new(ScopeType::Http, path);
        scope.method = Some(method.to_string());
        scope
    }

    fn echo_id_handler() -> HttpHandler {
        Arc::new(|_req, params| {
            Box::pin(async move {
                let id = params.get("id").and_then(|v| v.as_int()).unwrap_or(-1);
                Ok(Response::ok(id.to_string()))
            })
        })
    }

    #[tokio::test]
    async fn integer_path_param_end_to_end() {
        let mut app = Application::new(Config::default());
        let route = HttpRoute::new("/users/{id:int}", vec![Method::Get], app.converters(), echo_id_handler()).unwrap();
        app.add_route(route);

        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/users/42"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        let sent = recorder.0.lock().unwrap();
        match &sent[0] {
            HttpSendMessage::ResponseStart { status, .. } => assert_eq!(*status, 200),
            _ => panic!("expected response start first"),
        }
        match &sent[1] {
            HttpSendMessage::ResponseBody { body } => assert_eq!(body, b"42"),
            _ => panic!("expected response body second"),
        }
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let app = Application::new(Config::default());
        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/users/abc"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        let sent = recorder.0.lock().unwrap();
        match &sent[0] {
            HttpSendMessage::ResponseStart { status, .. } => assert_eq!(*status, 404),
            _ => panic!("expected response start"),
        }
    }

    #[tokio::test]
    async fn method_fallback_end_to_end() {
        let mut app = Application::new(Config::default());
        let route = HttpRoute::new("/items/", vec![Method::Post], app.converters(), Arc::new(|_req, _params| {
            Box::pin(async { Ok(Response::ok("created")) })
        }))
        .unwrap();
        app.add_route(route);

        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/items/"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        let sent = recorder.0.lock().unwrap();
        match &sent[0] {
            HttpSendMessage::ResponseStart { status, .. } => assert_eq!(*status, 405),
            _ => panic!("expected 405"),
        }
    }

    #[tokio::test]
    async fn group_prefix_scopes_routes() {
        let mut app = Application::new(Config::default());
        let group = Group::new("pings", "/v1")
            .unwrap()
            .route(HttpRoute::new("/ping", vec![Method::Get], app.converters(), Arc::new(|_req, _p| {
                Box::pin(async { Ok(Response::ok("pong")) })
            })).unwrap());
        app.add_group(group, None).unwrap();

        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/v1/ping/"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        assert!(matches!(recorder.0.lock().unwrap()[0], HttpSendMessage::ResponseStart { status: 200, .. }));

        let (recorder2, sender2) = recording_sender();
        app.dispatch_http(http_scope("GET", "/ping/"), Box::new(NoMoreBody), sender2)
            .await
            .unwrap();
        assert!(matches!(recorder2.0.lock().unwrap()[0], HttpSendMessage::ResponseStart { status: 404, .. }));
    }

    #[tokio::test]
    async fn duplicate_group_registration_fails() {
        let mut app = Application::new(Config::default());
        let group_a = Group::new("pings", "/v1").unwrap();
        let group_b = Group::new("pings", "/v2").unwrap();
        app.add_group(group_a, None).unwrap();
        let err = app.add_group(group_b, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn route_error_is_funneled_to_500_in_production_mode() {
        let mut app = Application::new(Config::default());
        let route = HttpRoute::new("/boom", vec![Method::Get], app.converters(), Arc::new(|_req, _p| {
            Box::pin(async { Err(Error::Internal("kaboom".to_string())) })
        }))
        .unwrap();
        app.add_route(route);

        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/boom/"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        let sent = recorder.0.lock().unwrap();
        assert!(matches!(sent[0], HttpSendMessage::ResponseStart { status: 500, .. }));
        match &sent[1] {
            HttpSendMessage::ResponseBody { body } => assert_eq!(body, b"Internal Server Error"),
            _ => panic!("expected body"),
        }
    }

    #[tokio::test]
    async fn http_exception_bypasses_hooks_and_carries_its_status() {
        let mut app = Application::new(Config::default());
        let route = HttpRoute::new("/teapot", vec![Method::Get], app.converters(), Arc::new(|_req, _p| {
            Box::pin(async { Err(Error::http(418, "i'm a teapot")) })
        }))
        .unwrap();
        app.add_route(route);

        let (recorder, sender) = recording_sender();
        app.dispatch_http(http_scope("GET", "/teapot/"), Box::new(NoMoreBody), sender)
            .await
            .unwrap();
        assert!(matches!(recorder.0.lock().unwrap()[0], HttpSendMessage::ResponseStart { status: 418, .. }));
    }

    struct EchoTextEndpoint;
    #[async_trait]
    impl WebSocketEndpoint for EchoTextEndpoint {
        fn has_receive(&self) -> bool {
            true
        }

        async fn on_receive(&self, ws: &mut WebSocket, data: WsData) -> Result<(), Error> {
            if let WsData::Text(text) = data {
                ws.send_text(text).await?;
            }
            Ok(())
        }
    }

    struct ScriptedWsReceiver(Mutex<std::collections::VecDeque<crate::gateway::WsReceiveMessage>>);
    #[async_trait]
    impl WsReceiver for ScriptedWsReceiver {
        async fn receive(&mut self) -> Result<crate::gateway::WsReceiveMessage, Error> {
            self.0.lock().unwrap().pop_front().ok_or_else(|| Error::Internal("exhausted".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingWsSender(Mutex<Vec<crate::gateway::WsSendMessage>>);
    #[async_trait]
    impl WsSender for RecordingWsSender {
        async fn send(&mut self, message: crate::gateway::WsSendMessage) -> Result<(), Error> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn websocket_echo_handshake_end_to_end() {
        use crate::gateway::WsReceiveMessage;

        let mut app = Application::new(Config::default());
        let route = WsRoute::new("/ws", WsEncoding::Text, app.converters(), Arc::new(EchoTextEndpoint)).unwrap();
        app.add_ws_route(route);

        let receiver = Box::new(ScriptedWsReceiver(Mutex::new(
            vec![
                WsReceiveMessage::Connect,
                WsReceiveMessage::Receive { text: Some("hi".to_string()), bytes: None },
                WsReceiveMessage::Disconnect { code: Some(1000) },
            ]
            .into(),
        )));
        let sender = Arc::new(RecordingWsSender::default());

        app.dispatch_ws(
            {
                let mut scope = Scope::new(ScopeType::WebSocket, "/ws");
                scope.path = "/ws".to_string();
                scope
            },
            receiver,
            Box::new(ForwardingWsSender(sender.clone())),
        )
        .await
        .unwrap();

        let sent = sender.0.lock().unwrap();
        assert!(matches!(sent[0], crate::gateway::WsSendMessage::Accept { .. }));
        match &sent[1] {
            crate::gateway::WsSendMessage::Send { text: Some(t), .. } => assert_eq!(t, "hi"),
            _ => panic!("expected echoed send"),
        }
    }

    struct ForwardingWsSender(Arc<RecordingWsSender>);
    #[async_trait]
    impl WsSender for ForwardingWsSender {
        async fn send(&mut self, message: crate::gateway::WsSendMessage) -> Result<(), Error> {
            self.0.0.lock().unwrap().push(message);
            Ok(())
        }
    }
}

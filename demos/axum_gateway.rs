//! A worked example wiring a real socket to `gatewright`'s trait-based
//! `HttpReceiver`/`HttpSender`/`WsReceiver`/`WsSender` interfaces.
//!
//! This is an external collaborator, not part of the core — binding a real
//! socket is explicitly the host runtime's job. Grounded in the teacher's
//! own split between `run_http` (raw `TcpListener`) and `run_ws` (axum)
//! against the same `Router`, here unified behind a single axum server
//! since axum can serve both plain HTTP and WebSocket upgrades on one
//! listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Request as AxumRequest, State};
use axum::response::Response as AxumResponse;
use axum::routing::any;
use axum::Router as AxumRouter;
use futures::{SinkExt, StreamExt};

use gatewright::app::Application;
use gatewright::config::Config;
use gatewright::error::Error;
use gatewright::gateway::{
    HttpReceiveMessage, HttpReceiver, HttpSendMessage, HttpSender, ParamValue, Scope, ScopeType,
    WsReceiveMessage, WsReceiver, WsSendMessage, WsSender,
};
use gatewright::request::Request;
use gatewright::response::Response;
use gatewright::route::{HttpRoute, Method, ParamLocation, Parameter, WebSocketEndpoint, WsData, WsEncoding, WsRoute};
use gatewright::ws::WebSocket;

/// Delivers the whole buffered body as a single chunk. A production
/// gateway would stream `more_body` chunks and watch for a peer close.
struct OneShotHttpReceiver {
    body: Option<Vec<u8>>,
}

#[async_trait]
impl HttpReceiver for OneShotHttpReceiver {
    async fn receive(&mut self) -> Result<HttpReceiveMessage, Error> {
        let body = self.body.take().unwrap_or_default();
        Ok(HttpReceiveMessage::Request { body, more_body: false })
    }
}

/// Forwards `http.response.*` messages into a shared buffer so the axum
/// handler can read the result back out once dispatch returns.
#[derive(Default, Clone)]
struct ResponseBuffer(Arc<Mutex<(u16, Vec<(Vec<u8>, Vec<u8>)>, Vec<u8>)>>);

struct BufferingHttpSender(ResponseBuffer);

#[async_trait]
impl HttpSender for BufferingHttpSender {
    async fn send(&mut self, message: HttpSendMessage) -> Result<(), Error> {
        let mut buf = self.0 .0.lock().unwrap();
        match message {
            HttpSendMessage::ResponseStart { status, headers } => {
                buf.0 = status;
                buf.1 = headers;
            }
            HttpSendMessage::ResponseBody { body } => buf.2 = body,
        }
        Ok(())
    }
}

async fn http_handler(State(app): State<Arc<Application>>, request: AxumRequest) -> AxumResponse {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").as_bytes().to_vec();
    let headers: Vec<(Vec<u8>, Vec<u8>)> = request
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    let body = to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default().to_vec();

    let mut scope = Scope::new(ScopeType::Http, path);
    scope.method = Some(method);
    scope.query_string = query;
    scope.headers = headers;
    scope.scheme = Some("http".to_string());

    let receiver = Box::new(OneShotHttpReceiver { body: Some(body) });
    let buffer = ResponseBuffer::default();
    let sender = Box::new(BufferingHttpSender(buffer.clone()));

    if let Err(e) = app.handle(scope, Some((receiver, sender)), None, None).await {
        log::error!("http dispatch failed: {e}");
        return AxumResponse::builder().status(500).body(Body::from("Internal Server Error")).unwrap();
    }

    let (status, headers, body) = buffer.0.lock().unwrap().clone();
    let mut builder = AxumResponse::builder().status(status);
    for (name, value) in &headers {
        builder = builder.header(name.as_slice(), value.as_slice());
    }
    builder.body(Body::from(body)).unwrap()
}

/// Forwards decoded axum WebSocket frames as gateway receive messages,
/// synthesizing the leading `websocket.connect` the way the teacher's
/// `run_ws` hands a freshly-upgraded socket straight to its handler (axum
/// has no separate connect frame of its own).
struct AxumWsReceiver {
    connect_sent: bool,
    stream: futures::stream::SplitStream<axum::extract::ws::WebSocket>,
}

#[async_trait]
impl WsReceiver for AxumWsReceiver {
    async fn receive(&mut self) -> Result<WsReceiveMessage, Error> {
        if !self.connect_sent {
            self.connect_sent = true;
            return Ok(WsReceiveMessage::Connect);
        }
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                Ok(WsReceiveMessage::Receive { text: Some(text.to_string()), bytes: None })
            }
            Some(Ok(Message::Binary(bytes))) => {
                Ok(WsReceiveMessage::Receive { text: None, bytes: Some(bytes.to_vec()) })
            }
            Some(Ok(Message::Close(frame))) => {
                Ok(WsReceiveMessage::Disconnect { code: frame.map(|f| f.code) })
            }
            Some(Ok(_)) => Ok(WsReceiveMessage::Receive { text: None, bytes: None }),
            Some(Err(e)) => Err(Error::Protocol(e.to_string())),
            None => Ok(WsReceiveMessage::Disconnect { code: None }),
        }
    }
}

struct AxumWsSender(futures::stream::SplitSink<axum::extract::ws::WebSocket, Message>);

#[async_trait]
impl WsSender for AxumWsSender {
    async fn send(&mut self, message: WsSendMessage) -> Result<(), Error> {
        match message {
            WsSendMessage::Accept { .. } => Ok(()),
            WsSendMessage::Send { text: Some(text), .. } => {
                self.0.send(Message::Text(text.into())).await.map_err(|e| Error::Protocol(e.to_string()))
            }
            WsSendMessage::Send { bytes: Some(bytes), .. } => {
                self.0.send(Message::Binary(bytes.into())).await.map_err(|e| Error::Protocol(e.to_string()))
            }
            WsSendMessage::Send { .. } => Ok(()),
            WsSendMessage::Close { code, reason } => self
                .0
                .send(Message::Close(Some(axum::extract::ws::CloseFrame { code, reason: reason.into() })))
                .await
                .map_err(|e| Error::Protocol(e.to_string())),
        }
    }
}

async fn ws_handler(State(app): State<Arc<Application>>, ws: WebSocketUpgrade) -> AxumResponse {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let mut scope = Scope::new(ScopeType::WebSocket, "/ws");
        scope.scheme = Some("ws".to_string());
        let receiver = Box::new(AxumWsReceiver { connect_sent: false, stream });
        let sender = Box::new(AxumWsSender(sink));

        if let Err(e) = app.handle(scope, None, Some((receiver, sender)), None).await {
            log::error!("websocket dispatch failed: {e}");
        }
    })
}

struct EchoEndpoint;

#[async_trait]
impl WebSocketEndpoint for EchoEndpoint {
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

async fn greet(_request: &mut Request, params: &HashMap<String, ParamValue>) -> Result<Response, Error> {
    let name = params.get("name").and_then(ParamValue::as_str).unwrap_or("world");
    Ok(Response::ok(format!("hello, {name}")))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::new("127.0.0.1", 8080).with_debug(true);
    let mut app = Application::new(config);

    let greet_route = HttpRoute::new(
        "/greet/{name}",
        vec![Method::Get],
        app.converters(),
        Arc::new(|req, params| Box::pin(greet(req, params))),
    )
    .unwrap()
    .with_parameters(vec![Parameter::new("name", ParamLocation::Path, "str")]);
    app.add_route(greet_route);

    let ws_route = WsRoute::new("/ws", WsEncoding::Text, app.converters(), Arc::new(EchoEndpoint)).unwrap();
    app.add_ws_route(ws_route);

    let app = Arc::new(app);
    let axum_app = AxumRouter::new()
        .route("/ws", any(ws_handler))
        .fallback(any(http_handler))
        .with_state(app);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
    println!("listening on http://127.0.0.1:8080 (try /greet/ferris, ws at /ws)");
    axum::serve(listener, axum_app).await.unwrap();
}

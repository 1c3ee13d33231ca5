//! The abstract gateway protocol.
//!
//! The host runtime ("the gateway") hands the dispatcher a [`Scope`] plus a
//! `(receive, send)` message pair per connection. This module defines that
//! boundary as a set of traits so the core never depends on a concrete
//! transport — binding a real socket is an external collaborator's job (see
//! `demos/axum_gateway.rs` for one way to provide it).

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Error;

/// What kind of connection a [`Scope`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    Http,
    WebSocket,
    Lifespan,
}

/// A decoded path-parameter value, produced by a [`crate::converters::Converter`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// A value the lifespan startup procedure may hand back for the gateway to
/// merge into `scope.state`.
#[derive(Debug, Clone)]
pub enum StateValue {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Json(serde_json::Value),
}

/// Per-connection metadata delivered by the gateway.
///
/// This generalizes the ASGI scope mapping into a concrete struct. Fields
/// that the protocol marks optional stay `Option`; `path_params` and
/// `endpoint_name` start empty and are written by the router/dispatcher
/// during matching, mirroring the original writing `path_params` and
/// `endpoint` onto the scope dict.
#[derive(Debug, Clone)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub path: String,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub query_string: Vec<u8>,
    pub method: Option<String>,
    pub client: Option<(String, u16)>,
    pub server: Option<(String, u16)>,
    pub scheme: Option<String>,
    pub http_version: Option<String>,
    pub root_path: Option<String>,
    /// Present only if the gateway advertises lifespan state support.
    pub state: Option<HashMap<String, StateValue>>,
    pub path_params: HashMap<String, ParamValue>,
    pub endpoint_name: Option<String>,
}

impl Scope {
    pub fn new(scope_type: ScopeType, path: impl Into<String>) -> Self {
        Scope {
            scope_type,
            path: path.into(),
            headers: Vec::new(),
            query_string: Vec::new(),
            method: None,
            client: None,
            server: None,
            scheme: None,
            http_version: None,
            root_path: None,
            state: None,
            path_params: HashMap::new(),
            endpoint_name: None,
        }
    }
}

// ---------------------------------------------------------------------
// HTTP messages
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum HttpReceiveMessage {
    Request { body: Vec<u8>, more_body: bool },
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum HttpSendMessage {
    ResponseStart {
        status: u16,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    ResponseBody {
        body: Vec<u8>,
    },
}

#[async_trait]
pub trait HttpReceiver: Send {
    async fn receive(&mut self) -> Result<HttpReceiveMessage, Error>;
}

#[async_trait]
pub trait HttpSender: Send {
    async fn send(&mut self, message: HttpSendMessage) -> Result<(), Error>;
}

// ---------------------------------------------------------------------
// WebSocket messages
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum WsReceiveMessage {
    Connect,
    Receive {
        text: Option<String>,
        bytes: Option<Vec<u8>>,
    },
    Disconnect {
        code: Option<u16>,
    },
}

impl WsReceiveMessage {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            WsReceiveMessage::Connect => "websocket.connect",
            WsReceiveMessage::Receive { .. } => "websocket.receive",
            WsReceiveMessage::Disconnect { .. } => "websocket.disconnect",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WsSendMessage {
    Accept {
        subprotocol: Option<String>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Send {
        text: Option<String>,
        bytes: Option<Vec<u8>>,
    },
    Close {
        code: u16,
        reason: String,
    },
}

impl WsSendMessage {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            WsSendMessage::Accept { .. } => "websocket.accept",
            WsSendMessage::Send { .. } => "websocket.send",
            WsSendMessage::Close { .. } => "websocket.close",
        }
    }
}

#[async_trait]
pub trait WsReceiver: Send {
    async fn receive(&mut self) -> Result<WsReceiveMessage, Error>;
}

#[async_trait]
pub trait WsSender: Send {
    async fn send(&mut self, message: WsSendMessage) -> Result<(), Error>;
}

// ---------------------------------------------------------------------
// Lifespan messages
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum LifespanReceiveMessage {
    Startup,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum LifespanSendMessage {
    StartupComplete,
    StartupFailed { message: String },
    ShutdownComplete,
    ShutdownFailed { message: String },
}

#[async_trait]
pub trait LifespanReceiver: Send {
    async fn receive(&mut self) -> Result<LifespanReceiveMessage, Error>;
}

#[async_trait]
pub trait LifespanSender: Send {
    async fn send(&mut self, message: LifespanSendMessage) -> Result<(), Error>;
}

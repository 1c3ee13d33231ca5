//! The typed failure taxonomy used throughout the crate.
//!
//! Every fallible operation in the dispatcher, router, and WebSocket state
//! machine returns this enum rather than a boxed `dyn Error`, so the
//! dispatcher's error pipeline (see `app.rs`) can match on the taxonomy from
//! §7 of the spec instead of string-sniffing a generic failure.

use std::fmt;

/// A WebSocket close code, carried by [`Error::WebSocketDisconnect`].
pub type CloseCode = u16;

pub const CLOSE_NORMAL: CloseCode = 1000;
pub const CLOSE_GOING_AWAY: CloseCode = 1001;
pub const CLOSE_PROTOCOL_ERROR: CloseCode = 1002;
pub const CLOSE_UNSUPPORTED_DATA: CloseCode = 1003;
pub const CLOSE_POLICY_VIOLATION: CloseCode = 1008;
pub const CLOSE_INTERNAL_ERROR: CloseCode = 1011;

/// Human-readable name for a standard close code, if recognized.
///
/// Unrecognized codes pass through; callers should fall back to the raw
/// numeric value.
pub fn close_code_name(code: CloseCode) -> Option<&'static str> {
    match code {
        CLOSE_NORMAL => Some("Normal Closure"),
        CLOSE_GOING_AWAY => Some("Going Away"),
        CLOSE_PROTOCOL_ERROR => Some("Protocol Error"),
        CLOSE_UNSUPPORTED_DATA => Some("Unsupported Data"),
        CLOSE_POLICY_VIOLATION => Some("Policy Violation"),
        CLOSE_INTERNAL_ERROR => Some("Internal Error"),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Misuse at registration time: duplicate group, unknown converter,
    /// malformed parameter name, invalid WebSocket route.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The gateway delivered a message illegal in the current state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer disconnected while we were still talking to it.
    #[error("client disconnected")]
    ClientDisconnect,

    /// A WebSocket operation was attempted after the connection already
    /// closed from our side.
    #[error("websocket is already disconnected")]
    WebSocketDisconnected,

    /// The remote end closed the WebSocket mid-operation, carrying the
    /// close code it sent (or that we synthesize, e.g. 1003).
    #[error("websocket has disconnected with code {0}")]
    WebSocketDisconnect(CloseCode),

    /// A malformed body or a failed payload decode. Maps to 400.
    #[error("payload error: {0}")]
    Payload(String),

    /// An endpoint (or the form parser) explicitly signals an HTTP-level
    /// failure.
    #[error("{status}: {detail}")]
    Http {
        status: u16,
        detail: String,
        headers: Vec<(String, String)>,
    },

    /// A feature requires an optional collaborator not configured, e.g. the
    /// OpenAPI generator or the process-level server launcher.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// An endpoint callback or middleware raised something that does not
    /// fit any of the above — the catch-all case the 500 pipeline handles.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Error::Http {
            status,
            detail: detail.into(),
            headers: Vec::new(),
        }
    }

    pub fn http_with_headers(
        status: u16,
        detail: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Error::Http {
            status,
            detail: detail.into(),
            headers,
        }
    }

    /// The HTTP status this error maps to when funneled into a response.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Configuration(_) => 500,
            Error::Protocol(_) => 500,
            Error::ClientDisconnect => 499,
            Error::WebSocketDisconnected => 500,
            Error::WebSocketDisconnect(_) => 500,
            Error::Payload(_) => 400,
            Error::Http { status, .. } => *status,
            Error::Dependency(_) => 500,
            Error::Internal(_) => 500,
        }
    }
}

impl fmt::Debug for CloseCodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match close_code_name(self.0) {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Wrapper that renders a close code with its standard name, for logging.
pub struct CloseCodeDisplay(pub CloseCode);

impl fmt::Display for CloseCodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

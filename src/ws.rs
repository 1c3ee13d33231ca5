//! The WebSocket protocol state machine (§4.5).
//!
//! Grounded in `starapi/requests.py:116`'s `WebSocket` class: the
//! `client_state`/`application_state` pair, the legal-transition tables for
//! `receive`/`send`, and the `iter_text`/`iter_bytes`/`iter_json` helpers
//! modeled here as one `futures::Stream`-returning `iter`.

use futures::stream::{self, Stream};

use crate::error::{self, Error};
use crate::gateway::{Scope, WsReceiveMessage, WsReceiver, WsSendMessage, WsSender};
use crate::route::WsEncoding;

/// What the peer has told us (`client_state`) or what we have told the peer
/// (`application_state`). Each traverses `Connecting -> Connected ->
/// Disconnected` without reverse transitions (§8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// A decoded payload returned from [`WebSocket::receive`].
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Connect,
    Receive { text: Option<String>, bytes: Option<Vec<u8>> },
    Disconnect { code: Option<u16> },
}

/// The WebSocket handle. Borrows the scope and the gateway's inbound/
/// outbound channels for the duration of one dispatch (§3 Ownership).
pub struct WebSocket {
    scope: Scope,
    receiver: Box<dyn WsReceiver>,
    sender: Box<dyn WsSender>,
    client_state: ConnectionState,
    application_state: ConnectionState,
    pending_connect_drained: bool,
}

impl WebSocket {
    pub fn new(scope: Scope, receiver: Box<dyn WsReceiver>, sender: Box<dyn WsSender>) -> Self {
        WebSocket {
            scope,
            receiver,
            sender,
            client_state: ConnectionState::Connecting,
            application_state: ConnectionState::Connecting,
            pending_connect_drained: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn client_state(&self) -> ConnectionState {
        self.client_state
    }

    pub fn application_state(&self) -> ConnectionState {
        self.application_state
    }

    /// Receive the next inbound message, enforcing the legal-transition
    /// table on `client_state` (§4.5).
    pub async fn receive(&mut self) -> Result<InboundMessage, Error> {
        if self.client_state == ConnectionState::Disconnected {
            return Err(Error::Protocol("disconnect already received".to_string()));
        }

        let message = self.receiver.receive().await?;
        match (self.client_state, &message) {
            (ConnectionState::Connecting, WsReceiveMessage::Connect) => {
                self.client_state = ConnectionState::Connected;
                log::debug!("websocket client_state connecting -> connected");
                Ok(InboundMessage::Connect)
            }
            (ConnectionState::Connecting, other) => Err(Error::Protocol(format!(
                "unexpected message {:?} while connecting",
                other.type_name()
            ))),
            (ConnectionState::Connected, WsReceiveMessage::Receive { text, bytes }) => {
                Ok(InboundMessage::Receive { text: text.clone(), bytes: bytes.clone() })
            }
            (ConnectionState::Connected, WsReceiveMessage::Disconnect { code }) => {
                self.client_state = ConnectionState::Disconnected;
                log::debug!("websocket client_state connected -> disconnected");
                Ok(InboundMessage::Disconnect { code: *code })
            }
            (ConnectionState::Connected, other) => Err(Error::Protocol(format!(
                "unexpected message {:?} while connected",
                other.type_name()
            ))),
            (ConnectionState::Disconnected, _) => unreachable!("checked above"),
        }
    }

    /// Send an outbound message, enforcing the legal-transition table on
    /// `application_state` (§4.5).
    async fn send_raw(&mut self, message: WsSendMessage) -> Result<(), Error> {
        if self.application_state == ConnectionState::Disconnected {
            return Err(Error::Protocol("websocket already closed".to_string()));
        }

        let next = match (self.application_state, &message) {
            (ConnectionState::Connecting, WsSendMessage::Accept { .. }) => ConnectionState::Connected,
            (ConnectionState::Connecting, WsSendMessage::Close { .. }) => ConnectionState::Disconnected,
            (ConnectionState::Connecting, other) => {
                return Err(Error::Protocol(format!(
                    "unexpected send {:?} while connecting",
                    other.type_name()
                )))
            }
            (ConnectionState::Connected, WsSendMessage::Send { .. }) => ConnectionState::Connected,
            (ConnectionState::Connected, WsSendMessage::Close { .. }) => ConnectionState::Disconnected,
            (ConnectionState::Connected, other) => {
                return Err(Error::Protocol(format!(
                    "unexpected send {:?} while connected",
                    other.type_name()
                )))
            }
            (ConnectionState::Disconnected, _) => unreachable!("checked above"),
        };

        self.sender.send(message).await?;
        log::debug!("websocket application_state -> {next:?}");
        self.application_state = next;
        Ok(())
    }

    /// Accept the connection, draining the pending `connect` message first
    /// if it has not already been received (§4.5).
    pub async fn accept(&mut self, subprotocol: Option<String>, headers: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), Error> {
        if !self.pending_connect_drained && self.client_state == ConnectionState::Connecting {
            self.receive().await?;
            self.pending_connect_drained = true;
        }
        self.send_raw(WsSendMessage::Accept { subprotocol, headers }).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Error> {
        self.send_raw(WsSendMessage::Send { text: Some(text.into()), bytes: None }).await
    }

    pub async fn send_bytes(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        self.send_raw(WsSendMessage::Send { text: None, bytes: Some(bytes) }).await
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), Error> {
        let text = serde_json::to_string(value)
            .map_err(|e| Error::Internal(format!("failed to encode websocket json: {e}")))?;
        self.send_text(text).await
    }

    /// `close(code, reason)`: defaults `code = 1000`, `reason = ""` (§4.5).
    pub async fn close(&mut self, code: Option<u16>, reason: Option<String>) -> Result<(), Error> {
        let code = code.unwrap_or(error::CLOSE_NORMAL);
        let reason = reason.unwrap_or_default();
        self.send_raw(WsSendMessage::Close { code, reason }).await
    }

    /// Receive exactly one inbound `receive` message as text, requiring
    /// `application_state == Connected`. A `disconnect` raises
    /// [`Error::WebSocketDisconnect`] carrying its close code (§4.5).
    pub async fn receive_text(&mut self) -> Result<String, Error> {
        self.require_connected()?;
        match self.receive().await? {
            InboundMessage::Receive { text: Some(text), .. } => Ok(text),
            InboundMessage::Receive { bytes: Some(bytes), .. } => {
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            InboundMessage::Receive { .. } => {
                Err(Error::Protocol("received message carried neither text nor bytes".to_string()))
            }
            InboundMessage::Disconnect { code } => {
                Err(Error::WebSocketDisconnect(code.unwrap_or(error::CLOSE_NORMAL)))
            }
            InboundMessage::Connect => Err(Error::Protocol("unexpected connect".to_string())),
        }
    }

    pub async fn receive_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.require_connected()?;
        match self.receive().await? {
            InboundMessage::Receive { bytes: Some(bytes), .. } => Ok(bytes),
            InboundMessage::Receive { text: Some(text), .. } => Ok(text.into_bytes()),
            InboundMessage::Receive { .. } => {
                Err(Error::Protocol("received message carried neither text nor bytes".to_string()))
            }
            InboundMessage::Disconnect { code } => {
                Err(Error::WebSocketDisconnect(code.unwrap_or(error::CLOSE_NORMAL)))
            }
            InboundMessage::Connect => Err(Error::Protocol("unexpected connect".to_string())),
        }
    }

    /// Read JSON from whichever of `text`/`bytes` is present. Malformed
    /// JSON closes the connection with 1003 Unsupported Data and then
    /// raises a fatal error (§4.5).
    pub async fn receive_json(&mut self) -> Result<serde_json::Value, Error> {
        self.require_connected()?;
        let raw = match self.receive().await? {
            InboundMessage::Receive { text: Some(text), .. } => text,
            InboundMessage::Receive { bytes: Some(bytes), .. } => {
                String::from_utf8_lossy(&bytes).into_owned()
            }
            InboundMessage::Receive { .. } => {
                return Err(Error::Protocol("received message carried neither text nor bytes".to_string()))
            }
            InboundMessage::Disconnect { code } => {
                return Err(Error::WebSocketDisconnect(code.unwrap_or(error::CLOSE_NORMAL)))
            }
            InboundMessage::Connect => return Err(Error::Protocol("unexpected connect".to_string())),
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                let _ = self.close(Some(error::CLOSE_UNSUPPORTED_DATA), Some(String::new())).await;
                Err(Error::Payload(format!("malformed websocket json: {e}")))
            }
        }
    }

    fn require_connected(&self) -> Result<(), Error> {
        if self.application_state != ConnectionState::Connected {
            return Err(Error::Protocol(
                "receive helper requires application_state == connected".to_string(),
            ));
        }
        Ok(())
    }

    /// A stream over decoded inbound payloads, matching `encoding`. Ends
    /// cleanly (no error propagated) the moment a
    /// [`Error::WebSocketDisconnect`] is raised, mirroring the original's
    /// `try/except WebSocketDisconnect: pass` around the iteration loop.
    pub fn iter(mut self, encoding: WsEncoding) -> impl Stream<Item = crate::route::WsData> {
        stream::unfold(Some(self), move |state| {
            let encoding = encoding;
            async move {
                let mut ws = state?;
                let outcome = match encoding {
                    WsEncoding::Text => ws.receive_text().await.map(crate::route::WsData::Text),
                    WsEncoding::Bytes => ws.receive_bytes().await.map(crate::route::WsData::Bytes),
                    WsEncoding::Json => ws.receive_json().await.map(crate::route::WsData::Json),
                };
                match outcome {
                    Ok(data) => Some((data, Some(ws))),
                    Err(Error::WebSocketDisconnect(_)) => None,
                    Err(_) => None,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScopeType;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedReceiver(Mutex<VecDeque<WsReceiveMessage>>);

    #[async_trait]
    impl WsReceiver for ScriptedReceiver {
        async fn receive(&mut self) -> Result<WsReceiveMessage, Error> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Internal("no more scripted messages".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSender(Mutex<Vec<WsSendMessage>>);

    #[async_trait]
    impl WsSender for RecordingSender {
        async fn send(&mut self, message: WsSendMessage) -> Result<(), Error> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn ws(messages: Vec<WsReceiveMessage>) -> WebSocket {
        WebSocket::new(
            Scope::new(ScopeType::WebSocket, "/ws"),
            Box::new(ScriptedReceiver(Mutex::new(messages.into()))),
            Box::new(RecordingSender::default()),
        )
    }

    #[tokio::test]
    async fn accept_drains_pending_connect_then_sends_accept() {
        let mut socket = ws(vec![WsReceiveMessage::Connect]);
        socket.accept(None, Vec::new()).await.unwrap();
        assert_eq!(socket.client_state(), ConnectionState::Connected);
        assert_eq!(socket.application_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn echo_handshake_sequence() {
        let mut socket = ws(vec![
            WsReceiveMessage::Connect,
            WsReceiveMessage::Receive { text: Some("hi".to_string()), bytes: None },
            WsReceiveMessage::Disconnect { code: Some(1000) },
        ]);
        socket.accept(None, Vec::new()).await.unwrap();
        let text = socket.receive_text().await.unwrap();
        assert_eq!(text, "hi");
        socket.send_text(text).await.unwrap();

        let err = socket.receive_text().await.unwrap_err();
        assert!(matches!(err, Error::WebSocketDisconnect(1000)));
        assert_eq!(socket.client_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn receive_before_connect_is_protocol_error() {
        let mut socket = ws(vec![WsReceiveMessage::Receive { text: Some("early".to_string()), bytes: None }]);
        let err = socket.receive().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn send_after_close_is_protocol_error() {
        let mut socket = ws(vec![WsReceiveMessage::Connect]);
        socket.accept(None, Vec::new()).await.unwrap();
        socket.close(None, None).await.unwrap();
        assert_eq!(socket.application_state(), ConnectionState::Disconnected);
        let err = socket.send_text("too late").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn close_defaults_to_normal_closure_empty_reason() {
        let mut socket = ws(vec![WsReceiveMessage::Connect]);
        socket.accept(None, Vec::new()).await.unwrap();
        socket.close(None, None).await.unwrap();
        // second close would err; state already disconnected confirms default path ran
        assert_eq!(socket.application_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn malformed_json_closes_with_1003_then_errors() {
        let mut socket = ws(vec![
            WsReceiveMessage::Connect,
            WsReceiveMessage::Receive { text: Some("not json".to_string()), bytes: None },
        ]);
        socket.accept(None, Vec::new()).await.unwrap();
        let err = socket.receive_json().await.unwrap_err();
        assert!(matches!(err, Error::Payload(_)));
        assert_eq!(socket.application_state(), ConnectionState::Disconnected);
    }
}

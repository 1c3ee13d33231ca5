//! The lifespan coordinator: the gateway's startup/shutdown handshake and
//! the scoped startup/shutdown procedure an application supplies (§4.3).
//!
//! Grounded in `starapi/routing.py`'s `_DefaultLifespan` no-op context
//! manager (line 40) and `Router.lifespan`'s startup/shutdown handshake
//! (line 204), modeled here as a trait object with a default no-op
//! implementation (§4.3's "default lifespan" note).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Error;
use crate::gateway::{LifespanReceiveMessage, LifespanReceiver, LifespanSendMessage, LifespanSender, StateValue};

/// The two-phase scoped resource an application supplies around its own
/// process lifetime: `acquire` runs once at startup and may yield state to
/// merge into the scope; `release` runs once at shutdown.
#[async_trait]
pub trait Lifespan: Send + Sync {
    async fn acquire(&self) -> Result<Option<HashMap<String, StateValue>>, Error> {
        Ok(None)
    }

    async fn release(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// The no-op lifespan used when the application supplies none (§4.3).
pub struct DefaultLifespan;

#[async_trait]
impl Lifespan for DefaultLifespan {}

/// Run the gateway lifespan handshake exactly once: await `startup`, run
/// `acquire`, report completion/failure, await `shutdown`, run `release`,
/// report completion/failure (§4.3).
///
/// `scope_state` is the scope's `state` mapping if the gateway advertises
/// support for it (`state` key present); `None` means the gateway does not
/// support state propagation.
pub async fn run(
    lifespan: &dyn Lifespan,
    scope_state: &mut Option<HashMap<String, StateValue>>,
    receiver: &mut dyn LifespanReceiver,
    sender: &mut dyn LifespanSender,
) -> Result<(), Error> {
    match receiver.receive().await? {
        LifespanReceiveMessage::Startup => {}
        LifespanReceiveMessage::Shutdown => {
            return Err(Error::Protocol("expected lifespan.startup first".to_string()));
        }
    }

    log::debug!("lifespan startup: running acquire");
    match lifespan.acquire().await {
        Ok(Some(state)) => {
            match scope_state {
                Some(existing) => {
                    existing.extend(state);
                }
                None => {
                    sender
                        .send(LifespanSendMessage::StartupFailed {
                            message: "lifespan acquire yielded state but the gateway does not support state"
                                .to_string(),
                        })
                        .await?;
                    return Err(Error::Configuration(
                        "lifespan acquire yielded state but the gateway does not support state".to_string(),
                    ));
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            sender
                .send(LifespanSendMessage::StartupFailed { message: e.to_string() })
                .await?;
            return Err(e);
        }
    }

    sender.send(LifespanSendMessage::StartupComplete).await?;
    log::info!("lifespan startup complete");

    match receiver.receive().await? {
        LifespanReceiveMessage::Shutdown => {}
        LifespanReceiveMessage::Startup => {
            return Err(Error::Protocol("lifespan.startup received twice".to_string()));
        }
    }

    log::debug!("lifespan shutdown: running release");
    match lifespan.release().await {
        Ok(()) => {
            sender.send(LifespanSendMessage::ShutdownComplete).await?;
            log::info!("lifespan shutdown complete");
            Ok(())
        }
        Err(e) => {
            sender
                .send(LifespanSendMessage::ShutdownFailed { message: e.to_string() })
                .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedReceiver(Mutex<VecDeque<LifespanReceiveMessage>>);

    #[async_trait]
    impl LifespanReceiver for ScriptedReceiver {
        async fn receive(&mut self) -> Result<LifespanReceiveMessage, Error> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Internal("no more scripted messages".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSender(Mutex<Vec<LifespanSendMessage>>);

    #[async_trait]
    impl LifespanSender for RecordingSender {
        async fn send(&mut self, message: LifespanSendMessage) -> Result<(), Error> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct StatefulLifespan;

    #[async_trait]
    impl Lifespan for StatefulLifespan {
        async fn acquire(&self) -> Result<Option<HashMap<String, StateValue>>, Error> {
            let mut state = HashMap::new();
            state.insert("db".to_string(), StateValue::Str("connected".to_string()));
            Ok(Some(state))
        }
    }

    #[tokio::test]
    async fn state_propagates_when_gateway_supports_it() {
        let mut receiver = ScriptedReceiver(Mutex::new(
            vec![LifespanReceiveMessage::Startup, LifespanReceiveMessage::Shutdown].into(),
        ));
        let mut sender = RecordingSender::default();
        let mut state = Some(HashMap::new());

        run(&StatefulLifespan, &mut state, &mut receiver, &mut sender).await.unwrap();

        let state = state.unwrap();
        assert!(matches!(state.get("db"), Some(StateValue::Str(s)) if s == "connected"));
        let sent = sender.0.into_inner().unwrap();
        assert!(matches!(sent[0], LifespanSendMessage::StartupComplete));
        assert!(matches!(sent[1], LifespanSendMessage::ShutdownComplete));
    }

    #[tokio::test]
    async fn state_without_gateway_support_fails_startup() {
        let mut receiver = ScriptedReceiver(Mutex::new(vec![LifespanReceiveMessage::Startup].into()));
        let mut sender = RecordingSender::default();
        let mut state = None;

        let err = run(&StatefulLifespan, &mut state, &mut receiver, &mut sender).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let sent = sender.0.into_inner().unwrap();
        assert!(matches!(sent[0], LifespanSendMessage::StartupFailed { .. }));
    }

    #[tokio::test]
    async fn default_lifespan_is_a_no_op() {
        let mut receiver = ScriptedReceiver(Mutex::new(
            vec![LifespanReceiveMessage::Startup, LifespanReceiveMessage::Shutdown].into(),
        ));
        let mut sender = RecordingSender::default();
        let mut state: Option<HashMap<String, StateValue>> = None;

        run(&DefaultLifespan, &mut state, &mut receiver, &mut sender).await.unwrap();
        let sent = sender.0.into_inner().unwrap();
        assert!(matches!(sent[0], LifespanSendMessage::StartupComplete));
        assert!(matches!(sent[1], LifespanSendMessage::ShutdownComplete));
    }

    struct FailingAcquire;

    #[async_trait]
    impl Lifespan for FailingAcquire {
        async fn acquire(&self) -> Result<Option<HashMap<String, StateValue>>, Error> {
            Err(Error::Internal("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn acquire_failure_sends_startup_failed_and_reraises() {
        let mut receiver = ScriptedReceiver(Mutex::new(vec![LifespanReceiveMessage::Startup].into()));
        let mut sender = RecordingSender::default();
        let mut state: Option<HashMap<String, StateValue>> = None;

        let err = run(&FailingAcquire, &mut state, &mut receiver, &mut sender).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        let sent = sender.0.into_inner().unwrap();
        assert!(matches!(sent[0], LifespanSendMessage::StartupFailed { .. }));
    }
}

//! Boundary to the real-time media engine.
//!
//! The engine is consumed as an opaque collaborator. Each viewing session
//! owns exactly one engine instance, obtained from a factory and consumed by
//! [`RtcEngine::destroy`], so release happens once by construction.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use vigil_common::{Error, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Remote participant identifier assigned by the engine.
pub type PeerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Broadcaster,
    /// Receive-only participant.
    Audience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    pub role: ClientRole,
    pub audio: bool,
    pub video: bool,
}

impl JoinOptions {
    /// Receive-only with both audio and video enabled.
    pub fn viewer() -> Self {
        Self {
            role: ClientRole::Audience,
            audio: true,
            video: true,
        }
    }
}

/// Notifications raised by the engine on its own scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    RemoteJoined { peer: PeerId },
    RemoteLeft { peer: PeerId },
    ConnectionLost { reason: String },
}

/// Pre-shared engine credential injected at startup.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AppCredential(String);

impl AppCredential {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(Error::config("engine credential is empty"));
        }
        Ok(Self(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AppCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppCredential(<redacted>)")
    }
}

pub trait RtcEngine: Send {
    fn join<'a>(&'a mut self, channel: &'a str, options: JoinOptions) -> BoxFuture<'a, Result<()>>;

    /// Attach the display surface to a remote participant's video.
    fn bind_remote_video(&mut self, peer: PeerId) -> Result<()>;

    fn leave(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Release the engine instance.
    fn destroy(self: Box<Self>) -> Result<()>;
}

/// A freshly created engine together with its event stream.
pub struct EngineHandle {
    pub engine: Box<dyn RtcEngine>,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

pub trait RtcEngineFactory: Send + Sync {
    fn create(&self, credential: &AppCredential) -> Result<EngineHandle>;
}

#[derive(Debug, Default)]
struct ProbeState {
    joined: Option<(String, JoinOptions)>,
    bound_peers: Vec<PeerId>,
    leave_calls: usize,
    destroy_calls: usize,
    fail_join: Option<String>,
    fail_leave: Option<String>,
    fail_destroy: Option<String>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

/// Observation and control point for a [`LoopbackEngine`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl LoopbackProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: EngineEvent) -> bool {
        match &self.lock().events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate a remote participant attaching. False once the engine is gone.
    pub fn remote_joined(&self, peer: PeerId) -> bool {
        self.emit(EngineEvent::RemoteJoined { peer })
    }

    pub fn remote_left(&self, peer: PeerId) -> bool {
        self.emit(EngineEvent::RemoteLeft { peer })
    }

    pub fn connection_lost(&self, reason: &str) -> bool {
        self.emit(EngineEvent::ConnectionLost {
            reason: reason.to_string(),
        })
    }

    pub fn fail_join(&self, reason: &str) {
        self.lock().fail_join = Some(reason.to_string());
    }

    pub fn fail_leave(&self, reason: &str) {
        self.lock().fail_leave = Some(reason.to_string());
    }

    pub fn fail_destroy(&self, reason: &str) {
        self.lock().fail_destroy = Some(reason.to_string());
    }

    pub fn joined(&self) -> Option<(String, JoinOptions)> {
        self.lock().joined.clone()
    }

    pub fn bound_peers(&self) -> Vec<PeerId> {
        self.lock().bound_peers.clone()
    }

    pub fn leave_calls(&self) -> usize {
        self.lock().leave_calls
    }

    pub fn destroy_calls(&self) -> usize {
        self.lock().destroy_calls
    }
}

/// In-process engine that carries no media; every call is recorded on its
/// probe and remote events are injected through it.
pub struct LoopbackEngine {
    probe: LoopbackProbe,
}

impl LoopbackEngine {
    pub fn create(probe: &LoopbackProbe) -> EngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        probe.lock().events = Some(tx);
        EngineHandle {
            engine: Box::new(LoopbackEngine {
                probe: probe.clone(),
            }),
            events: rx,
        }
    }
}

impl RtcEngine for LoopbackEngine {
    fn join<'a>(&'a mut self, channel: &'a str, options: JoinOptions) -> BoxFuture<'a, Result<()>> {
        let mut state = self.probe.lock();
        let result = match state.fail_join.clone() {
            Some(reason) => Err(Error::connection(reason)),
            None => {
                state.joined = Some((channel.to_string(), options));
                debug!(channel, ?options, "loopback joined");
                Ok(())
            }
        };
        future::ready(result).boxed()
    }

    fn bind_remote_video(&mut self, peer: PeerId) -> Result<()> {
        self.probe.lock().bound_peers.push(peer);
        Ok(())
    }

    fn leave(&mut self) -> BoxFuture<'_, Result<()>> {
        let mut state = self.probe.lock();
        state.leave_calls += 1;
        let result = match state.fail_leave.clone() {
            Some(reason) => Err(Error::connection(reason)),
            None => {
                state.joined = None;
                Ok(())
            }
        };
        future::ready(result).boxed()
    }

    fn destroy(self: Box<Self>) -> Result<()> {
        let mut state = self.probe.lock();
        state.destroy_calls += 1;
        state.events = None;
        match state.fail_destroy.clone() {
            Some(reason) => Err(Error::connection(reason)),
            None => {
                info!("loopback engine released");
                Ok(())
            }
        }
    }
}

/// Factory handing out [`LoopbackEngine`]s that all report to one probe.
#[derive(Debug, Clone, Default)]
pub struct LoopbackFactory {
    probe: LoopbackProbe,
}

impl LoopbackFactory {
    pub fn new(probe: LoopbackProbe) -> Self {
        Self { probe }
    }
}

impl RtcEngineFactory for LoopbackFactory {
    fn create(&self, credential: &AppCredential) -> Result<EngineHandle> {
        debug!(?credential, "creating loopback engine");
        Ok(LoopbackEngine::create(&self.probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_is_redacted() {
        let credential = AppCredential::new("40b0b12b").unwrap();
        assert_eq!(credential.expose(), "40b0b12b");
        assert!(!format!("{credential:?}").contains("40b0b12b"));
        assert!(AppCredential::new("  ").is_err());
    }

    #[tokio::test]
    async fn test_loopback_records_lifecycle() {
        let probe = LoopbackProbe::new();
        let factory = LoopbackFactory::new(probe.clone());
        let EngineHandle { mut engine, mut events } = factory
            .create(&AppCredential::new("app").unwrap())
            .unwrap();

        engine.join("ch1", JoinOptions::viewer()).await.unwrap();
        assert_eq!(probe.joined(), Some(("ch1".to_string(), JoinOptions::viewer())));

        assert!(probe.remote_joined(7));
        assert_eq!(events.recv().await, Some(EngineEvent::RemoteJoined { peer: 7 }));

        engine.leave().await.unwrap();
        engine.destroy().unwrap();
        assert_eq!(probe.leave_calls(), 1);
        assert_eq!(probe.destroy_calls(), 1);
        assert!(!probe.remote_joined(8));
        assert_eq!(events.recv().await, None);
    }
}

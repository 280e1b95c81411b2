//! Viewing session state machine.
//!
//! Lifecycle, strictly forward and never retried:
//! - IDLE: constructed with a target channel
//! - JOINING: metadata subscription open, engine joined as audience
//! - LIVE: first remote peer attached and bound to the display surface
//! - LEAVING: releasing the channel, the engine and the subscription
//! - CLOSED: everything released; reconnecting means a new controller
//!
//! Engine events, metadata snapshots and operator requests are all handled
//! by one task per controller, which is the only place state changes.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_common::{
    CommandAction, DeviceSession, Document, Error, FileEndpoint, Result, ACTIVE_CAMERAS,
};

use crate::command::CommandChannel;
use crate::engine::{EngineEvent, EngineHandle, JoinOptions, PeerId, RtcEngine};
use crate::store::{SignalingStore, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Live { peer: PeerId },
    Leaving,
    Closed,
}

impl SessionState {
    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Joining => 1,
            Self::Live { .. } => 2,
            Self::Leaving => 3,
            Self::Closed => 4,
        }
    }

    /// Commands may only be issued while the session is being set up or live.
    pub fn accepts_commands(&self) -> bool {
        matches!(self, Self::Joining | Self::Live { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Joining => write!(f, "Joining"),
            Self::Live { peer } => write!(f, "Live(peer {peer})"),
            Self::Leaving => write!(f, "Leaving"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Callbacks from the session task. All calls for one controller are
/// serialized on that controller's task.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _state: SessionState) {}

    /// Latest `file_url` published by the device. `None` means the device
    /// published nothing, which is distinct from [`FileEndpoint::NoAccess`].
    fn on_file_endpoint(&self, _endpoint: Option<&FileEndpoint>) {}

    fn on_peer_left(&self, _peer: PeerId) {}

    fn on_error(&self, _error: &Error) {}
}

pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

enum Request {
    Command {
        action: CommandAction,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Drives one viewing attempt end to end.
///
/// Dropping the controller without calling [`leave`](Self::leave) still
/// drives the session to `Closed`; the release then completes on the task.
/// If the task itself is dropped first (runtime shutdown), the engine is
/// destroyed synchronously without leaving the channel.
pub struct SessionController {
    channel_id: String,
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Start a session for `channel_id`. Fails with `InvalidState` outside a
    /// tokio runtime.
    pub fn open(
        channel_id: impl Into<String>,
        store: Arc<dyn SignalingStore>,
        engine: EngineHandle,
        commands: CommandChannel,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        if channel_id.trim().is_empty() {
            return Err(Error::invalid_input("session channel is empty"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::invalid_state("open session", "outside a tokio runtime"))?;

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let EngineHandle { engine, events } = engine;

        let task = SessionTask {
            channel_id: channel_id.clone(),
            store,
            commands,
            observer,
            state_tx,
            engine: Some(engine),
            engine_events: Some(events),
            metadata: None,
            last_endpoint: None,
        };
        let handle = runtime.spawn(task.run(requests_rx));

        Ok(Self {
            channel_id,
            requests: requests_tx,
            state: state_rx,
            task: Some(handle),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the state satisfies `pred`, or return the final state if
    /// the session ends first.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&SessionState) -> bool) -> SessionState {
        let reached = self.state.wait_for(|s| pred(s)).await.map(|s| *s);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Ask the device to switch cameras. Rejected with `InvalidState` unless
    /// the session is joining or live.
    pub async fn switch_camera(&self) -> Result<()> {
        self.command(CommandAction::SwitchCamera).await
    }

    pub async fn command(&self, action: CommandAction) -> Result<()> {
        let (reply, response) = oneshot::channel();
        if self.requests.send(Request::Command { action, reply }).is_err() {
            return Err(Error::invalid_state("send command", self.state()));
        }
        response
            .await
            .unwrap_or_else(|_| Err(Error::invalid_state("send command", self.state())))
    }

    /// Tear the session down and wait until it is `Closed`.
    ///
    /// Every release step runs even if an earlier one fails; the first
    /// failure is returned. Calling this again is a no-op.
    pub async fn leave(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let (reply, response) = oneshot::channel();
        let outcome = if self.requests.send(Request::Leave { reply }).is_ok() {
            response.await.unwrap_or(Ok(()))
        } else {
            Ok(())
        };
        if let Err(e) = task.await {
            warn!(channel = %self.channel_id, error = %e, "session task ended abnormally");
        }
        outcome
    }
}

struct SessionTask {
    channel_id: String,
    store: Arc<dyn SignalingStore>,
    commands: CommandChannel,
    observer: Arc<dyn SessionObserver>,
    state_tx: watch::Sender<SessionState>,
    engine: Option<Box<dyn RtcEngine>>,
    engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    metadata: Option<Subscription<Option<Document>>>,
    /// Last value handed to the observer; `None` until the first snapshot.
    last_endpoint: Option<Option<FileEndpoint>>,
}

enum Flow {
    Continue,
    Close,
}

enum JoinOutcome {
    Joined,
    Failed(Error),
    /// Leave requested (or controller dropped) before the join resolved.
    Abandoned(Option<oneshot::Sender<Result<()>>>),
}

impl SessionTask {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        self.transition(SessionState::Joining);

        match self.store.watch(ACTIVE_CAMERAS, &self.channel_id) {
            Ok(subscription) => self.metadata = Some(subscription),
            Err(e) => self.report(Error::subscription(format!(
                "metadata for {} unavailable: {e}",
                self.channel_id
            ))),
        }

        match self.join_channel(&mut requests).await {
            JoinOutcome::Joined => {
                info!(channel = %self.channel_id, "joined channel as audience");
            }
            JoinOutcome::Failed(e) => {
                self.report(as_connection_failure(e));
                let _ = self.teardown().await;
                return;
            }
            JoinOutcome::Abandoned(reply) => {
                debug!(channel = %self.channel_id, "join abandoned");
                let result = self.teardown().await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                return;
            }
        }

        loop {
            // Engine and store notifications already queued are applied
            // before any operator request, so requests see settled state.
            tokio::select! {
                biased;
                event = next_engine_event(&mut self.engine_events) => match event {
                    Some(event) => {
                        if let Flow::Close = self.on_engine_event(event) {
                            let _ = self.teardown().await;
                            return;
                        }
                    }
                    None => self.engine_events = None,
                },
                snapshot = next_snapshot(&mut self.metadata) => self.on_metadata(snapshot),
                request = requests.recv() => match request {
                    Some(Request::Command { action, reply }) => {
                        let result = self.dispatch(action).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Leave { reply }) => {
                        let result = self.teardown().await;
                        let _ = reply.send(result);
                        return;
                    }
                    None => {
                        debug!(channel = %self.channel_id, "controller dropped, closing session");
                        let _ = self.teardown().await;
                        return;
                    }
                },
            }
        }
    }

    /// Join the channel while still serving operator requests. Engine
    /// events stay queued until the join settles.
    async fn join_channel(
        &mut self,
        requests: &mut mpsc::UnboundedReceiver<Request>,
    ) -> JoinOutcome {
        let Some(engine) = self.engine.as_mut() else {
            return JoinOutcome::Failed(Error::connection("engine already released"));
        };
        let mut join = engine.join(&self.channel_id, JoinOptions::viewer());
        loop {
            tokio::select! {
                biased;
                joined = &mut join => {
                    return match joined {
                        Ok(()) => JoinOutcome::Joined,
                        Err(e) => JoinOutcome::Failed(e),
                    };
                }
                request = requests.recv() => match request {
                    Some(Request::Command { action, reply }) => {
                        // Joining always accepts commands
                        let result = self.commands.send(&self.channel_id, action).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Leave { reply }) => return JoinOutcome::Abandoned(Some(reply)),
                    None => return JoinOutcome::Abandoned(None),
                },
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        let current = *self.state_tx.borrow();
        if next.rank() < current.rank() {
            warn!(channel = %self.channel_id, %current, %next, "refusing backward transition");
            return;
        }
        info!(channel = %self.channel_id, state = %next, "session state changed");
        self.observer.on_state_changed(next);
        self.state_tx.send_replace(next);
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn report(&self, error: Error) {
        warn!(channel = %self.channel_id, error = %error, "session error");
        self.observer.on_error(&error);
    }

    /// Blocks the task for at most the command channel's write timeout.
    async fn dispatch(&mut self, action: CommandAction) -> Result<()> {
        let state = self.state();
        if !state.accepts_commands() {
            return Err(Error::invalid_state("send command", state));
        }
        self.commands.send(&self.channel_id, action).await
    }

    fn on_engine_event(&mut self, event: EngineEvent) -> Flow {
        match (event, self.state()) {
            (EngineEvent::RemoteJoined { peer }, SessionState::Joining) => {
                let bound = match self.engine.as_mut() {
                    Some(engine) => engine.bind_remote_video(peer),
                    None => Err(Error::connection("engine already released")),
                };
                match bound {
                    Ok(()) => self.transition(SessionState::Live { peer }),
                    Err(e) => self.report(as_connection_failure(e)),
                }
                Flow::Continue
            }
            (EngineEvent::RemoteJoined { peer }, SessionState::Live { peer: bound }) => {
                debug!(channel = %self.channel_id, peer, bound, "keeping first peer bound");
                Flow::Continue
            }
            (EngineEvent::RemoteLeft { peer }, SessionState::Live { peer: bound })
                if peer == bound =>
            {
                info!(channel = %self.channel_id, peer, "bound peer left");
                self.observer.on_peer_left(peer);
                Flow::Continue
            }
            (EngineEvent::ConnectionLost { reason }, _) => {
                self.report(Error::connection(reason));
                Flow::Close
            }
            (event, state) => {
                debug!(channel = %self.channel_id, ?event, %state, "ignoring engine event");
                Flow::Continue
            }
        }
    }

    fn on_metadata(&mut self, snapshot: Option<Result<Option<Document>>>) {
        match snapshot {
            Some(Ok(doc)) => {
                let endpoint = doc
                    .as_ref()
                    .map(DeviceSession::from_document)
                    .and_then(|session| session.file_endpoint);
                if doc.is_none() {
                    info!(channel = %self.channel_id, "device is no longer broadcasting");
                }
                if self.last_endpoint.as_ref() != Some(&endpoint) {
                    self.observer.on_file_endpoint(endpoint.as_ref());
                    self.last_endpoint = Some(endpoint);
                }
            }
            Some(Err(e)) => {
                self.metadata = None;
                self.report(e);
            }
            None => {
                self.metadata = None;
                self.report(Error::subscription(format!(
                    "metadata stream for {} ended",
                    self.channel_id
                )));
            }
        }
    }

    /// Leave, release and unsubscribe. Each step runs regardless of the
    /// others; only the first failure is returned.
    async fn teardown(&mut self) -> Result<()> {
        if self.state().is_closed() {
            return Ok(());
        }
        self.transition(SessionState::Leaving);

        let mut failures = Vec::new();
        // The engine stays owned by the task across the await so a dropped
        // task still releases it.
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.leave().await {
                failures.push(as_connection_failure(e));
            }
        }
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.destroy() {
                failures.push(as_connection_failure(e));
            }
        }
        self.engine_events = None;
        if let Some(mut metadata) = self.metadata.take() {
            metadata.cancel();
        }

        for failure in &failures {
            self.report(failure.clone());
        }
        self.transition(SessionState::Closed);
        failures.into_iter().next().map_or(Ok(()), Err)
    }
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        warn!(channel = %self.channel_id, "session task dropped before teardown, releasing engine");
        if let Err(e) = engine.destroy() {
            self.report(as_connection_failure(e));
        }
        if let Some(mut metadata) = self.metadata.take() {
            metadata.cancel();
        }
        self.transition(SessionState::Closed);
    }
}

fn as_connection_failure(error: Error) -> Error {
    match error {
        Error::ConnectionFailure(_) => error,
        other => Error::connection(other),
    }
}

async fn next_engine_event(
    events: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>,
) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_snapshot(
    metadata: &mut Option<Subscription<Option<Document>>>,
) -> Option<Result<Option<Document>>> {
    match metadata {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

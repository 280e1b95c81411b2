//! Session signaling over a shared document store.
//!
//! The viewer never talks to a device directly: broadcasting devices publish
//! themselves in `active_cameras`, the viewer joins the real-time channel named
//! after the document id and leaves instructions in `commands`.

#![forbid(unsafe_code)]

pub mod command;
pub mod controller;
pub mod directory;
pub mod engine;
pub mod feed;
pub mod incident;
pub mod screen;
pub mod store;

pub use command::CommandChannel;
pub use controller::{NoopObserver, SessionController, SessionObserver, SessionState};
pub use directory::{DeviceEntry, DirectoryDiff, SessionDirectory};
pub use engine::{
    AppCredential, ClientRole, EngineEvent, EngineHandle, JoinOptions, LoopbackEngine,
    LoopbackFactory, LoopbackProbe, PeerId, RtcEngine, RtcEngineFactory,
};
pub use feed::LiveFeed;
pub use incident::IncidentLog;
pub use screen::{Navigator, Screen};
pub use store::{MemoryStore, SignalingStore, Subscription, SubscriptionGuard};

//! End-to-end viewing flow over the in-memory store and loopback engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use vigil_common::{
    fields, FileEndpoint, ACTIVE_CAMERAS, COMMANDS, FIELD_EMAIL, FIELD_FILE_URL, FIELD_USER,
    MULE_LOGS,
};
use vigil_signal::{
    AppCredential, CommandChannel, DeviceEntry, EngineHandle, IncidentLog, JoinOptions,
    LoopbackFactory, LoopbackProbe, MemoryStore, Navigator, RtcEngineFactory, Screen,
    SessionController, SessionDirectory, SessionObserver, SessionState, SignalingStore,
};

const WAIT: Duration = Duration::from_secs(5);

/// Forwards endpoint updates to the test and records every state seen.
struct Forwarder {
    endpoints: mpsc::UnboundedSender<Option<FileEndpoint>>,
    states: Mutex<Vec<SessionState>>,
}

impl SessionObserver for Forwarder {
    fn on_state_changed(&self, state: SessionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_file_endpoint(&self, endpoint: Option<&FileEndpoint>) {
        let _ = self.endpoints.send(endpoint.cloned());
    }
}

#[tokio::test]
async fn test_operator_views_device_end_to_end() {
    let store = MemoryStore::new();
    let shared: Arc<dyn SignalingStore> = Arc::new(store.clone());
    let probe = LoopbackProbe::new();
    let factory = LoopbackFactory::new(probe.clone());
    let mut nav = Navigator::new();

    // Device announces itself
    store
        .put_now(ACTIVE_CAMERAS, "ch1", fields! { FIELD_EMAIL => "a@x.com" })
        .unwrap();

    let directory = SessionDirectory::new(shared.clone());
    let mut feed = directory.subscribe(|e| panic!("directory failed: {e}")).unwrap();
    let listing = timeout(WAIT, feed.wait_for(|items| !items.is_empty()))
        .await
        .expect("directory snapshot")
        .unwrap();
    assert_eq!(
        listing,
        vec![DeviceEntry {
            channel_id: "ch1".into(),
            owner_label: "a@x.com".into(),
        }]
    );

    // Operator selects the device
    nav.select_device(&listing[0].channel_id).unwrap();
    let Screen::Viewer { channel_id } = nav.current().clone() else {
        panic!("expected viewer screen");
    };

    let (endpoints_tx, mut endpoints) = mpsc::unbounded_channel();
    let observer = Arc::new(Forwarder {
        endpoints: endpoints_tx,
        states: Mutex::new(Vec::new()),
    });
    let handle: EngineHandle = factory
        .create(&AppCredential::new("app-id").unwrap())
        .unwrap();
    let mut controller = SessionController::open(
        channel_id,
        shared.clone(),
        handle,
        CommandChannel::new(shared.clone()),
        observer.clone(),
    )
    .unwrap();

    timeout(WAIT, controller.wait_for(|s| *s == SessionState::Joining))
        .await
        .unwrap();
    // No file_url published yet
    assert_eq!(timeout(WAIT, endpoints.recv()).await.unwrap(), Some(None));
    assert_eq!(probe.joined(), Some(("ch1".to_string(), JoinOptions::viewer())));

    // Remote broadcaster attaches
    assert!(probe.remote_joined(42));
    let live = timeout(WAIT, controller.wait_for(|s| matches!(s, SessionState::Live { .. })))
        .await
        .unwrap();
    assert_eq!(live, SessionState::Live { peer: 42 });
    assert_eq!(probe.bound_peers(), vec![42]);

    // Device later publishes its file endpoint
    store
        .put_now(
            ACTIVE_CAMERAS,
            "ch1",
            fields! { FIELD_EMAIL => "a@x.com", FIELD_FILE_URL => "10.0.0.5:8080" },
        )
        .unwrap();
    assert_eq!(
        timeout(WAIT, endpoints.recv()).await.unwrap(),
        Some(Some(FileEndpoint::Reachable("10.0.0.5:8080".into())))
    );

    controller.switch_camera().await.unwrap();
    controller.switch_camera().await.unwrap();
    assert_eq!(store.documents(COMMANDS).len(), 1);

    // Operator backs out
    assert!(matches!(nav.back(), Some(Screen::Viewer { .. })));
    controller.leave().await.unwrap();

    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(probe.leave_calls(), 1);
    assert_eq!(probe.destroy_calls(), 1);
    assert_eq!(
        *observer.states.lock().unwrap(),
        vec![
            SessionState::Joining,
            SessionState::Live { peer: 42 },
            SessionState::Leaving,
            SessionState::Closed,
        ]
    );

    // Only the directory listener is left
    assert_eq!(store.listener_count(), 1);
    feed.unsubscribe();
    assert_eq!(store.listener_count(), 0);
    assert_eq!(nav.current(), &Screen::Directory);
}

#[tokio::test]
async fn test_incident_delete_is_eventually_absent() {
    let store = MemoryStore::new();
    let shared: Arc<dyn SignalingStore> = Arc::new(store.clone());
    let doomed = shared
        .add(MULE_LOGS, fields! { FIELD_USER => "eve" })
        .await
        .unwrap();
    shared
        .put(MULE_LOGS, "keep", fields! { FIELD_USER => "mallory" })
        .await
        .unwrap();

    let log = IncidentLog::new(shared.clone());
    log.delete(&doomed).await.unwrap();

    let mut feed = log.subscribe(|_| {}).unwrap();
    let records = timeout(WAIT, feed.wait_for(|r| r.iter().any(|rec| rec.id == "keep")))
        .await
        .unwrap()
        .unwrap();
    assert!(records.iter().all(|r| r.id != doomed));
    assert_eq!(records.len(), 1);
}

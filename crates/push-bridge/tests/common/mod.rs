//! Shared helpers for push bridge integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use voip_push_bridge::{
    BridgeConfig, BridgeCoordinator, BridgeEvent, CallId, CallPresenter, CallState, SurfaceOutcome,
    TeardownAck,
};

/// How the test presenter answers `surface`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    Surface,
    Unavailable,
    Panic,
}

/// Presenter that records every call made to it
#[derive(Debug)]
pub struct RecordingPresenter {
    surface_mode: Mutex<SurfaceMode>,
    teardown_ack: Mutex<TeardownAck>,
    surfaced: Mutex<Vec<(CallId, String, bool)>>,
    torn_down: Mutex<Vec<CallId>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            surface_mode: Mutex::new(SurfaceMode::Surface),
            teardown_ack: Mutex::new(TeardownAck::Completed),
            surfaced: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
        })
    }

    pub fn set_surface_mode(&self, mode: SurfaceMode) {
        *self.surface_mode.lock() = mode;
    }

    pub fn set_teardown_ack(&self, ack: TeardownAck) {
        *self.teardown_ack.lock() = ack;
    }

    pub fn surfaced(&self) -> Vec<(CallId, String, bool)> {
        self.surfaced.lock().clone()
    }

    pub fn surface_count(&self, call_id: &CallId) -> usize {
        self.surfaced.lock().iter().filter(|(id, _, _)| id == call_id).count()
    }

    pub fn torn_down(&self) -> Vec<CallId> {
        self.torn_down.lock().clone()
    }
}

impl CallPresenter for RecordingPresenter {
    fn surface(&self, call_id: &CallId, caller_name: &str, has_video: bool) -> SurfaceOutcome {
        let mode = *self.surface_mode.lock();
        match mode {
            SurfaceMode::Surface => {
                self.surfaced
                    .lock()
                    .push((call_id.clone(), caller_name.to_string(), has_video));
                SurfaceOutcome::Surfaced
            }
            SurfaceMode::Unavailable => SurfaceOutcome::Unavailable,
            SurfaceMode::Panic => panic!("presenter crashed while surfacing {}", call_id),
        }
    }

    fn teardown(&self, call_id: &CallId) -> TeardownAck {
        self.torn_down.lock().push(call_id.clone());
        *self.teardown_ack.lock()
    }
}

pub fn id(raw: &str) -> CallId {
    CallId::parse(raw).unwrap()
}

/// Incoming-call push in the flat camelCase shape
pub fn incoming_call_payload(call_id: &str, caller: &str, has_video: bool) -> Vec<u8> {
    serde_json::json!({
        "type": "incomingCall",
        "callId": call_id,
        "callerDisplayName": caller,
        "hasVideo": has_video,
    })
    .to_string()
    .into_bytes()
}

/// Incoming-call push in the nested `items` shape
pub fn nested_payload(call_id: &str, caller: &str) -> Vec<u8> {
    serde_json::json!({
        "notification_type": "incoming_call",
        "items": {
            "call_id": call_id,
            "peer_caller_id_name": caller,
            "video": false,
        },
    })
    .to_string()
    .into_bytes()
}

pub fn bridge(presenter: Arc<RecordingPresenter>) -> BridgeCoordinator {
    bridge_with(BridgeConfig::default(), presenter)
}

pub fn bridge_with(config: BridgeConfig, presenter: Arc<RecordingPresenter>) -> BridgeCoordinator {
    BridgeCoordinator::new(config, presenter).unwrap()
}

/// Everything published so far, without waiting
pub fn drain(rx: &mut broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// States a call entered, in order
pub fn states_of(events: &[BridgeEvent], call_id: &CallId) -> Vec<CallState> {
    events
        .iter()
        .filter_map(|event| match event {
            BridgeEvent::CallStateChanged { call_id: id, to, .. } if id == call_id => Some(*to),
            _ => None,
        })
        .collect()
}

/// Let spawned timer tasks run
pub async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

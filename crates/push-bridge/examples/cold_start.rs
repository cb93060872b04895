//! Cold-start walkthrough
//!
//! Simulates an app woken by a VoIP push where the user taps "answer" on the
//! native call screen before the push payload has been processed.
//!
//! ```bash
//! cargo run -p voip-push-bridge --example cold_start
//! BRIDGE_LOG=debug cargo run -p voip-push-bridge --example cold_start
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, Level};

use voip_push_bridge::logging::{parse_log_level, setup_logging, LoggingConfig};
use voip_push_bridge::{
    BridgeConfig, BridgeCoordinator, BridgeEvent, CallId, CallPresenter, PushToken, SurfaceOutcome,
    TeardownAck, TokenRegistry, TokenTransport,
};

/// Stands in for the platform call screen
struct ConsolePresenter;

impl CallPresenter for ConsolePresenter {
    fn surface(&self, call_id: &CallId, caller_name: &str, has_video: bool) -> SurfaceOutcome {
        info!(%call_id, caller_name, has_video, "📞 Showing incoming call screen");
        SurfaceOutcome::Surfaced
    }

    fn teardown(&self, call_id: &CallId) -> TeardownAck {
        info!(%call_id, "📴 Dismissing call screen");
        TeardownAck::Completed
    }
}

/// Stands in for the backend that needs the device token
struct ConsoleTransport;

#[async_trait]
impl TokenTransport for ConsoleTransport {
    async fn publish(&self, token: PushToken) {
        info!(token = %token.to_hex(), "Uploading push token");
    }

    async fn revoke(&self, token: PushToken) {
        info!(token = %token.to_hex(), "Revoking push token");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let level = match std::env::var("BRIDGE_LOG") {
        Ok(level) => parse_log_level(&level)?,
        Err(_) => Level::INFO,
    };
    setup_logging(LoggingConfig::new(level))?;

    let tokens = TokenRegistry::with_transport(Arc::new(ConsoleTransport));
    tokens.register(PushToken::new(vec![0x5a, 0x17, 0xc0, 0xde]))?;

    let config = BridgeConfig::new().with_ring_timeout(Duration::from_secs(30));
    let bridge = BridgeCoordinator::new(config, Arc::new(ConsolePresenter))?;
    let sweeper = bridge.spawn_sweeper();

    let mut events = bridge.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let BridgeEvent::CallStateChanged { call_id, from, to, .. } = &event {
                println!("  {}: {} -> {}", call_id, from, to);
            }
        }
    });

    // The call UI reports the answer first, with the uppercase UUID it uses
    let call_id = CallId::parse("7F1C4C9E-2F0E-4BB4-9A57-1C3D6F0E8A11")?;
    let outcome = bridge.user_answered(&call_id)?;
    info!(?outcome, "Answer delivered before the push");

    // Then the push is processed
    let payload = br#"{
        "notification_type": "incomingCall",
        "items": {
            "call_id": "7f1c4c9e-2f0e-4bb4-9a57-1c3d6f0e8a11",
            "peer_caller_id_name": "Alice",
            "video": false
        }
    }"#;
    let outcome = bridge.handle_push(payload)?;
    info!(?outcome, "Push processed");

    bridge.media_connected(&call_id)?;
    bridge.user_set_muted(&call_id, true)?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    bridge.user_ended(&call_id)?;

    // Redelivery of the same push is not presented again
    let outcome = bridge.handle_push(payload)?;
    info!(?outcome, "Push redelivered");

    tokens.invalidate();
    tokens.flush().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(stats = ?bridge.stats(), "Done");

    sweeper.abort();
    drop(bridge);
    printer.abort();
    Ok(())
}

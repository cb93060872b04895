//! Push token registry
//!
//! Holds the device's current VoIP push credential. Every change is relayed
//! to a [`TokenTransport`] (usually the application's backend client) from a
//! dedicated worker task, in the order the changes happened.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};

/// Longest accepted token value, in bytes
pub const MAX_TOKEN_LEN: usize = 4096;

/// Device push credential
#[derive(Clone, PartialEq, Eq)]
pub struct PushToken {
    value: Bytes,
    registered_at: DateTime<Utc>,
    is_stale: bool,
}

impl PushToken {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            registered_at: Utc::now(),
            is_stale: false,
        }
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    /// Lowercase hex rendering, as APNs-style backends expect it
    pub fn to_hex(&self) -> String {
        self.value.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.value.is_empty() {
            return Err(BridgeError::invalid_token("token value is empty"));
        }
        if self.value.iter().all(|b| *b == 0) {
            return Err(BridgeError::invalid_token("token value is all zero bytes"));
        }
        if self.value.len() > MAX_TOKEN_LEN {
            return Err(BridgeError::invalid_token(format!(
                "token value is {} bytes, limit is {}",
                self.value.len(),
                MAX_TOKEN_LEN
            )));
        }
        Ok(())
    }

    fn into_stale(mut self) -> Self {
        self.is_stale = true;
        self
    }
}

// Tokens are credentials; keep them out of logs
impl fmt::Debug for PushToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushToken")
            .field("len", &self.value.len())
            .field("registered_at", &self.registered_at)
            .field("is_stale", &self.is_stale)
            .finish()
    }
}

/// Receives token changes, typically to forward them to a backend
///
/// Called from the registry's worker task; failures are the transport's own
/// business to log or retry.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// A new token replaced the previous one
    async fn publish(&self, token: PushToken);

    /// The token must no longer be used (logout)
    async fn revoke(&self, token: PushToken);
}

enum Notification {
    Publish(PushToken),
    Revoke(PushToken),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct TokenSlots {
    current: Option<PushToken>,
    previous: Option<PushToken>,
}

/// Current push credential and its registration history
#[derive(Default)]
pub struct TokenRegistry {
    slots: RwLock<TokenSlots>,
    notifier: Option<mpsc::UnboundedSender<Notification>>,
}

impl TokenRegistry {
    /// Registry without a transport; changes are only kept locally
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry relaying changes to `transport`
    ///
    /// The worker task is spawned on the ambient Tokio runtime. Without a
    /// runtime the registry still works but nothing is relayed.
    pub fn with_transport(transport: Arc<dyn TokenTransport>) -> Self {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime available, token changes will not be relayed");
                return Self::new();
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notification {
                    Notification::Publish(token) => transport.publish(token).await,
                    Notification::Revoke(token) => transport.revoke(token).await,
                    Notification::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Token transport worker stopped");
        });

        Self {
            slots: RwLock::new(TokenSlots::default()),
            notifier: Some(tx),
        }
    }

    /// Store a new token
    ///
    /// Re-registering the current value is a no-op. Invalid values are
    /// rejected without touching the stored tokens.
    pub fn register(&self, token: PushToken) -> BridgeResult<()> {
        token.validate()?;

        {
            let mut slots = self.slots.write();
            if slots
                .current
                .as_ref()
                .is_some_and(|current| current.value == token.value)
            {
                debug!("Push token unchanged, skipping registration");
                return Ok(());
            }

            if let Some(replaced) = slots.current.replace(token.clone()) {
                slots.previous = Some(replaced.into_stale());
            }
            // Queued under the lock so the transport sees changes in store order
            self.notify(Notification::Publish(token.clone()));
        }

        info!(len = token.value.len(), "Push token registered");
        Ok(())
    }

    pub fn current(&self) -> Option<PushToken> {
        self.slots.read().current.clone()
    }

    /// Token replaced by the latest registration, marked stale
    pub fn previous(&self) -> Option<PushToken> {
        self.slots.read().previous.clone()
    }

    /// Drop the current token and ask the transport to revoke it
    pub fn invalidate(&self) -> Option<PushToken> {
        let invalidated = {
            let mut slots = self.slots.write();
            let stale = slots.current.take()?.into_stale();
            slots.previous = Some(stale.clone());
            self.notify(Notification::Revoke(stale.clone()));
            stale
        };

        info!("Push token invalidated");
        Some(invalidated)
    }

    /// Wait until every change queued so far has reached the transport
    pub async fn flush(&self) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if notifier.send(Notification::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            if notifier.send(notification).is_err() {
                warn!("Token transport worker gone, change not relayed");
            }
        }
    }
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("slots", &*self.slots.read())
            .field("relaying", &self.notifier.is_some())
            .finish()
    }
}

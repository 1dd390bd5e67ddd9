//! Process-wide map from source key to [`Relay`].
//!
//! Every mutation of the map happens under one lock, so concurrent first
//! attaches for a key observe the same relay and only one transcoder is
//! spawned. Relay lifecycle work (starting and stopping processes) runs
//! outside the map lock on the relay's own lock.
//!
//! An evicted relay stays registered as retiring until its transcoder has
//! stopped. Attaches for that key wait for the retirement to finish, so a
//! source never has two live processes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::{ConnectionId, SinkKind, Subscriber};
use super::stream_relay::{Relay, RelaySettings};
use crate::models::RelaySummary;
use crate::services::ffmpeg_wrapper::TranscoderFactory;
use crate::utils::UrlUtils;

#[derive(Default)]
struct RelayMap {
    active: HashMap<String, Arc<Relay>>,
    /// Evicted relays whose shutdown is still running, keyed like `active`.
    /// The token is cancelled once the transcoder has stopped.
    retiring: HashMap<String, CancellationToken>,
}

impl RelayMap {
    /// Move `key` from active to retiring and hand back the relay with the
    /// token to cancel after shutdown
    fn retire(&mut self, key: &str) -> Option<(Arc<Relay>, CancellationToken)> {
        let relay = self.active.remove(key)?;
        let done = CancellationToken::new();
        self.retiring.insert(key.to_string(), done.clone());
        Some((relay, done))
    }
}

/// Registry of live relays; the entry point for subscribing connections.
///
/// Connections join through [`RelayRegistry::attach`] and leave through the
/// returned [`RelaySession`]. Subscriber bookkeeping on [`Relay`] is only
/// reachable through here.
pub struct RelayRegistry {
    relays: Mutex<RelayMap>,
    factory: Arc<dyn TranscoderFactory>,
    settings: RelaySettings,
}

impl RelayRegistry {
    pub fn new(factory: Arc<dyn TranscoderFactory>, settings: RelaySettings) -> Self {
        Self {
            relays: Mutex::new(RelayMap::default()),
            factory,
            settings,
        }
    }

    fn get_or_insert(&self, relays: &mut RelayMap, key: &str, url: &str) -> Arc<Relay> {
        if let Some(relay) = relays.active.get(key) {
            return relay.clone();
        }

        let relay = Arc::new(Relay::new(
            key,
            url,
            self.settings.clone(),
            self.factory.clone(),
        ));
        relays.active.insert(key.to_string(), relay.clone());
        info!(
            relay_key = %relay.display_key(),
            event = "created",
            source = %UrlUtils::obfuscate_credentials(url),
            relays = relays.active.len(),
            "Relay created"
        );
        relay
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Relay>> {
        self.relays.lock().await.active.get(key).cloned()
    }

    /// Relays that are active or still stopping
    pub async fn len(&self) -> usize {
        let relays = self.relays.lock().await;
        relays.active.len() + relays.retiring.len()
    }

    /// True once no relay is active and none is still stopping
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Subscribe a connection to the relay for `key`, creating and starting
    /// the relay as needed. The returned session detaches on close or drop.
    ///
    /// If a previous relay for `key` is still stopping, this waits for it
    /// before creating the replacement.
    pub async fn attach(
        self: &Arc<Self>,
        key: &str,
        url: &str,
        subscriber: Subscriber,
    ) -> RelaySession {
        let connection_id = subscriber.id();
        let kind = subscriber.kind();

        let relay = loop {
            let mut relays = self.relays.lock().await;
            if let Some(done) = relays.retiring.get(key).cloned() {
                drop(relays);
                debug!(
                    relay_key = %UrlUtils::obfuscate_credentials(key),
                    event = "await_retirement",
                    "Waiting for previous relay to stop"
                );
                done.cancelled().await;
                continue;
            }
            let relay = self.get_or_insert(&mut relays, key, url);
            relay.add_subscriber(subscriber).await;
            break relay;
        };

        relay.ensure_running().await;

        RelaySession {
            registry: self.clone(),
            display_key: relay.display_key().to_string(),
            relay: Arc::downgrade(&relay),
            key: key.to_string(),
            connection_id,
            kind,
            detached: false,
        }
    }

    /// Remove a connection from `relay`. If it was the last one, the relay is
    /// evicted and fully stopped before this returns.
    pub async fn detach(&self, key: &str, relay: &Arc<Relay>, connection_id: ConnectionId) {
        let retired = {
            let mut relays = self.relays.lock().await;
            let remaining = relay.remove_subscriber(connection_id).await;
            let current = relays
                .active
                .get(key)
                .is_some_and(|existing| Arc::ptr_eq(existing, relay));
            if remaining == 0 && current {
                relays.retire(key)
            } else {
                None
            }
        };

        if let Some((relay, done)) = retired {
            info!(
                relay_key = %relay.display_key(),
                event = "evicted",
                "Last connection left, evicting relay"
            );
            self.finish_retirement(key, &relay, done, false).await;
        }
    }

    /// Evict and finalize the relay for `key`. Absent keys are a no-op.
    pub async fn remove(&self, key: &str) {
        let retired = self.relays.lock().await.retire(key);
        match retired {
            Some((relay, done)) => {
                info!(relay_key = %relay.display_key(), event = "removed", "Relay removed");
                self.finish_retirement(key, &relay, done, true).await;
            }
            None => debug!(
                relay_key = %UrlUtils::obfuscate_credentials(key),
                event = "remove_missing",
                "No relay to remove"
            ),
        }
    }

    /// Stop every relay; used on server shutdown
    pub async fn shutdown_all(&self) {
        let retired: Vec<(String, Arc<Relay>, CancellationToken)> = {
            let mut relays = self.relays.lock().await;
            let keys: Vec<String> = relays.active.keys().cloned().collect();
            keys.into_iter()
                .filter_map(|key| {
                    let (relay, done) = relays.retire(&key)?;
                    Some((key, relay, done))
                })
                .collect()
        };

        if retired.is_empty() {
            return;
        }

        info!(event = "shutdown_all", relays = retired.len(), "Stopping all relays");
        join_all(retired.into_iter().map(|(key, relay, done)| async move {
            self.finish_retirement(&key, &relay, done, true).await;
        }))
        .await;
    }

    /// Stop a relay already moved to retiring, then release waiting attaches
    async fn finish_retirement(
        &self,
        key: &str,
        relay: &Arc<Relay>,
        done: CancellationToken,
        close_subscribers: bool,
    ) {
        if close_subscribers {
            relay.close_subscribers().await;
        }
        relay.shutdown().await;

        // Attaches for `key` wait while it is retiring, so this entry is ours
        self.relays.lock().await.retiring.remove(key);
        done.cancel();
        debug!(relay_key = %relay.display_key(), event = "retired", "Relay stopped");
    }

    pub async fn summaries(&self) -> Vec<RelaySummary> {
        let relays: Vec<Arc<Relay>> = self.relays.lock().await.active.values().cloned().collect();
        let mut summaries = join_all(relays.iter().map(|relay| relay.summary())).await;
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }
}

/// A connection's membership in a relay.
///
/// Call [`RelaySession::close`] when the socket ends. If the session is
/// dropped without closing, the detach is spawned onto the runtime.
pub struct RelaySession {
    registry: Arc<RelayRegistry>,
    relay: Weak<Relay>,
    key: String,
    display_key: String,
    connection_id: ConnectionId,
    kind: SinkKind,
    detached: bool,
}

impl RelaySession {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key with credentials masked
    pub fn display_key(&self) -> &str {
        &self.display_key
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// The relay, unless it has already been torn down
    pub fn relay(&self) -> Option<Arc<Relay>> {
        self.relay.upgrade()
    }

    pub async fn close(mut self) {
        self.detached = true;
        if let Some(relay) = self.relay.upgrade() {
            self.registry
                .detach(&self.key, &relay, self.connection_id)
                .await;
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if self.detached {
            return;
        }

        let registry = self.registry.clone();
        let relay = self.relay.clone();
        let key = std::mem::take(&mut self.key);
        let connection_id = self.connection_id;

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(relay) = relay.upgrade() {
                    registry.detach(&key, &relay, connection_id).await;
                }
            });
        }
    }
}

//! Server-sent-events notifier for recipe generation results.
//!
//! A process-wide registry from [`ClientId`] to the sending half of a channel
//! feeding one open HTTP event stream. Delivery is best-effort: a message for
//! a client that is not connected is dropped, never queued.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::Stream;
use tracing::{debug, error};

use pantry_core::ClientId;

use crate::external::GeneratedRecipe;

/// Event name used for every frame pushed by the notifier.
pub const MESSAGE_EVENT: &str = "message";

/// Outcome of a recipe generation job, as seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationMessage {
    Success { recipes: Vec<GeneratedRecipe> },
    Error { message: String },
}

/// One event frame, before wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

/// Handle returned by [`SseNotifier::add_client`].
///
/// Identifies one registration so that closing an old connection cannot
/// evict a newer one for the same client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    client_id: ClientId,
    seq: u64,
}

#[derive(Debug)]
struct ClientEntry {
    seq: u64,
    sender: UnboundedSender<SseFrame>,
}

#[derive(Debug, Default)]
pub struct SseNotifier {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    next_seq: AtomicU64,
}

impl SseNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register `sender` for `client_id`, replacing any previous handle.
    pub fn add_client(&self, client_id: ClientId, sender: UnboundedSender<SseFrame>) -> Registration {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id.clone(), ClientEntry { seq, sender })
            .is_some();
        debug!(client_id = %client_id, replaced, "sse client registered");
        Registration { client_id, seq }
    }

    /// Deregister `client_id`. Returns whether a handle was removed.
    pub fn remove_client(&self, client_id: &ClientId) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id)
            .is_some();
        if removed {
            debug!(client_id = %client_id, "sse client removed");
        }
        removed
    }

    /// Deregister only if `registration` is still the current one for its id.
    pub fn remove_registration(&self, registration: &Registration) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let current = clients
            .get(&registration.client_id)
            .is_some_and(|entry| entry.seq == registration.seq);
        if !current {
            return false;
        }
        clients.remove(&registration.client_id);
        debug!(client_id = %registration.client_id, "sse client removed on close");
        true
    }

    /// Push `message` to `client_id` as a single frame.
    ///
    /// Returns whether a frame was written. Unknown clients and closed streams
    /// are silently skipped; a closed stream's entry is dropped.
    pub fn send_to_client(&self, client_id: &ClientId, message: &GenerationMessage) -> bool {
        let data = match serde_json::to_string(message) {
            Ok(data) => data,
            Err(e) => {
                error!(client_id = %client_id, error = %e, "failed to serialize sse message");
                return false;
            }
        };
        let frame = SseFrame {
            event: MESSAGE_EVENT,
            data,
        };

        let stale = {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = clients.get(client_id) else {
                debug!(client_id = %client_id, "sse client not connected; message dropped");
                return false;
            };
            match entry.sender.send(frame) {
                Ok(()) => return true,
                Err(_) => Registration {
                    client_id: client_id.clone(),
                    seq: entry.seq,
                },
            }
        };

        debug!(client_id = %client_id, "sse stream closed; message dropped");
        self.remove_registration(&stale);
        false
    }

    pub fn is_connected(&self, client_id: &ClientId) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Open a connection for `client_id`: registers a fresh channel and
    /// returns its receiving end as a stream that deregisters on drop.
    pub fn connect(self: &Arc<Self>, client_id: ClientId) -> ClientConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = self.add_client(client_id, tx);
        ClientConnection {
            receiver: rx,
            registration,
            notifier: Arc::clone(self),
        }
    }
}

/// Receiving side of one SSE connection.
///
/// Dropping it (the HTTP response closed) removes its registration.
#[derive(Debug)]
pub struct ClientConnection {
    receiver: UnboundedReceiver<SseFrame>,
    registration: Registration,
    notifier: Arc<SseNotifier>,
}

impl ClientConnection {
    pub async fn recv(&mut self) -> Option<SseFrame> {
        self.receiver.recv().await
    }

    /// Next frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<SseFrame> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for ClientConnection {
    type Item = SseFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.notifier.remove_registration(&self.registration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> ClientId {
        ClientId::parse(id).unwrap()
    }

    fn recipe(title: &str) -> GeneratedRecipe {
        GeneratedRecipe {
            title: title.to_string(),
            description: "Quick weeknight dinner".to_string(),
            ingredients: vec!["2 eggs".to_string(), "1 tomato".to_string()],
            instructions: vec!["Whisk".to_string(), "Cook".to_string()],
            prep_time_minutes: Some(5),
            cook_time_minutes: Some(10),
            servings: None,
        }
    }

    #[test]
    fn send_to_unregistered_client_is_a_silent_noop() {
        let notifier = SseNotifier::new();
        let sent = notifier.send_to_client(
            &client("nobody"),
            &GenerationMessage::Error {
                message: "x".into(),
            },
        );
        assert!(!sent);
        assert_eq!(notifier.client_count(), 0);
    }

    #[test]
    fn registered_client_receives_exactly_one_parseable_frame() {
        let notifier = SseNotifier::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        notifier.add_client(client("tab-1"), tx);

        let message = GenerationMessage::Success {
            recipes: vec![recipe("Shakshuka")],
        };
        assert!(notifier.send_to_client(&client("tab-1"), &message));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, MESSAGE_EVENT);
        let parsed: GenerationMessage = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(parsed, message);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removed_client_no_longer_receives() {
        let notifier = SseNotifier::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        notifier.add_client(client("tab-1"), tx);

        assert!(notifier.remove_client(&client("tab-1")));
        let sent = notifier.send_to_client(
            &client("tab-1"),
            &GenerationMessage::Error {
                message: "late".into(),
            },
        );
        assert!(!sent);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn last_registration_wins() {
        let notifier = SseNotifier::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let old = notifier.add_client(client("tab-1"), old_tx);
        notifier.add_client(client("tab-1"), new_tx);
        assert_eq!(notifier.client_count(), 1);

        let message = GenerationMessage::Error {
            message: "boom".into(),
        };
        assert!(notifier.send_to_client(&client("tab-1"), &message));
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());

        // Closing the superseded connection leaves the new one in place.
        assert!(!notifier.remove_registration(&old));
        assert!(notifier.is_connected(&client("tab-1")));
    }

    #[test]
    fn closed_stream_is_pruned_on_send() {
        let notifier = SseNotifier::new();
        let (tx, rx) = mpsc::unbounded_channel();
        notifier.add_client(client("tab-1"), tx);
        drop(rx);

        let sent = notifier.send_to_client(
            &client("tab-1"),
            &GenerationMessage::Error {
                message: "gone".into(),
            },
        );
        assert!(!sent);
        assert!(!notifier.is_connected(&client("tab-1")));
    }

    #[tokio::test]
    async fn dropping_a_connection_deregisters_it() {
        let notifier = SseNotifier::arc();
        let mut conn = notifier.connect(client("tab-1"));
        assert!(notifier.is_connected(&client("tab-1")));

        let message = GenerationMessage::Error {
            message: "nope".into(),
        };
        notifier.send_to_client(&client("tab-1"), &message);
        let frame = conn.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<GenerationMessage>(&frame.data).unwrap(),
            message
        );

        drop(conn);
        assert!(!notifier.is_connected(&client("tab-1")));
    }

    #[test]
    fn message_wire_shape_is_tagged() {
        let json = serde_json::to_value(GenerationMessage::Error {
            message: "failed".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "message": "failed"}));

        let json = serde_json::to_value(GenerationMessage::Success {
            recipes: vec![recipe("Toast")],
        })
        .unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["recipes"][0]["cookTimeMinutes"], 10);
    }
}

//! Optimistic message lifecycle: pending → confirmed | error.
//!
//! Every sent chat gets a client-generated `message_id` and a pending
//! record appended to its room's sequence. The server echo reconciles
//! the record in place; a per-message timer marks it failed when no
//! echo arrives. Timer and echo may race, so both transitions go
//! through a single check-and-set under the engine lock: a terminal
//! status is never overwritten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatline_shared::{ChatBody, ChatUser, DeliveryStatus, MessageRecord, Request};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::ws::ConnHandle;

/// Default deadline for the server echo of a sent chat message.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_millis(3000);

struct EngineInner {
    /// Message sequences per room; they persist across room switches
    /// until the session ends.
    records: HashMap<String, Vec<MessageRecord>>,
    /// Outstanding confirmation timers, keyed by `message_id`.
    timers: HashMap<String, JoinHandle<()>>,
    /// Target room for echoes that match no pending record; the wire
    /// `room_event` carries no room id.
    active_room: Option<String>,
}

#[derive(Clone)]
pub struct MessageEngine {
    handle: ConnHandle,
    confirm_timeout: Duration,
    inner: Arc<Mutex<EngineInner>>,
}

impl MessageEngine {
    pub fn new(handle: ConnHandle, confirm_timeout: Duration) -> Self {
        Self {
            handle,
            confirm_timeout,
            inner: Arc::new(Mutex::new(EngineInner {
                records: HashMap::new(),
                timers: HashMap::new(),
                active_room: None,
            })),
        }
    }

    /// Send a chat message. Returns the generated `message_id`; the
    /// pending record is already visible in the room's sequence when
    /// this returns.
    pub async fn send(&self, room_id: &str, content: &str, sender_name: &str) -> String {
        let message_id = uuid::Uuid::new_v4().to_string();
        let chat = ChatBody {
            content: content.to_string(),
            user: ChatUser {
                name: Some(sender_name.to_string()),
            },
            message_id: message_id.clone(),
            timestamp: Utc::now(),
        };

        {
            let mut inner = self.inner.lock().await;
            inner
                .records
                .entry(room_id.to_string())
                .or_default()
                .push(MessageRecord {
                    chat,
                    status: DeliveryStatus::Pending,
                });
        }

        self.handle.send(Request::Chat {
            message: content.to_string(),
            room_id: room_id.to_string(),
            message_id: message_id.clone(),
        });

        let timer = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let message_id = message_id.clone();
            let deadline = self.confirm_timeout;
            async move {
                tokio::time::sleep(deadline).await;
                let mut guard = inner.lock().await;
                let inner = &mut *guard;
                inner.timers.remove(&message_id);
                if let Some(record) = find_record_mut(&mut inner.records, &message_id) {
                    if record.status == DeliveryStatus::Pending {
                        tracing::debug!(%message_id, "no echo within deadline; marking error");
                        record.status = DeliveryStatus::Error;
                    }
                }
            }
        });
        self.inner.lock().await.timers.insert(message_id.clone(), timer);

        message_id
    }

    /// Reconcile a server echo against local records.
    ///
    /// A pending record with the same `message_id` is confirmed and its
    /// chat replaced by the authoritative echo. An unknown id is another
    /// participant's message: appended as confirmed to the active room,
    /// never reordering what exists. Echoes for already-terminal records
    /// are dropped.
    pub async fn apply_room_event(&self, chat: ChatBody) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(record) = find_record_mut(&mut inner.records, &chat.message_id) {
            match record.status {
                DeliveryStatus::Pending => {
                    if let Some(timer) = inner.timers.remove(&chat.message_id) {
                        timer.abort();
                    }
                    record.chat = chat;
                    record.status = DeliveryStatus::Confirmed;
                }
                DeliveryStatus::Confirmed | DeliveryStatus::Error => {
                    tracing::debug!(message_id = %chat.message_id, "echo for terminal record dropped");
                }
            }
            return;
        }

        let Some(room_id) = inner.active_room.clone() else {
            tracing::debug!(message_id = %chat.message_id, "room event with no active room dropped");
            return;
        };
        inner.records.entry(room_id).or_default().push(MessageRecord {
            chat,
            status: DeliveryStatus::Confirmed,
        });
    }

    /// Switching rooms only changes where unknown echoes land; it does
    /// not cancel other rooms' pending timers.
    pub async fn set_active_room(&self, room_id: Option<&str>) {
        self.inner.lock().await.active_room = room_id.map(str::to_string);
    }

    pub async fn active_room(&self) -> Option<String> {
        self.inner.lock().await.active_room.clone()
    }

    /// Snapshot of a room's message sequence in local send order.
    pub async fn records(&self, room_id: &str) -> Vec<MessageRecord> {
        self.inner
            .lock()
            .await
            .records
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Abort all outstanding confirmation timers. Part of session
    /// teardown; a stale timer firing after its room is gone would be
    /// both a leak and a correctness bug.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for (_, timer) in inner.timers.drain() {
            timer.abort();
        }
    }
}

fn find_record_mut<'a>(
    records: &'a mut HashMap<String, Vec<MessageRecord>>,
    message_id: &str,
) -> Option<&'a mut MessageRecord> {
    records
        .values_mut()
        .flat_map(|sequence| sequence.iter_mut())
        .find(|record| record.chat.message_id == message_id)
}

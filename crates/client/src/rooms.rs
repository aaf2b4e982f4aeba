//! Room directory: server snapshot, optimistic join overlay, and
//! visibility-gated refresh polling.
//!
//! The directory never trusts its own optimism for long: `refresh`
//! replaces the snapshot with the server's list and clears the overlay,
//! making the refreshed list the single source of truth.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chatline_shared::{
    validate_room_name, validate_room_size, ReplyStatus, Request, Response, RoomSummary,
    SessionError,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::ws::Correlator;

/// Fixed polling cadence while the page is visible.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Embedder-reported page visibility; polling pauses while hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

struct DirectoryInner {
    snapshot: Vec<RoomSummary>,
    /// Rooms joined locally but not yet reflected in the snapshot.
    optimistic_joins: HashSet<String>,
}

pub struct RoomDirectory {
    correlator: Arc<Correlator>,
    request_timeout: Duration,
    inner: Mutex<DirectoryInner>,
}

impl RoomDirectory {
    pub fn new(correlator: Arc<Correlator>, request_timeout: Duration) -> Self {
        Self {
            correlator,
            request_timeout,
            inner: Mutex::new(DirectoryInner {
                snapshot: Vec::new(),
                optimistic_joins: HashSet::new(),
            }),
        }
    }

    /// Replace the local snapshot with the server's room list and
    /// reconcile the optimistic overlay away.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.correlator.request(Request::ListRooms);
        let response = self
            .correlator
            .await_response(
                |r| matches!(r, Response::ListRooms { .. }),
                self.request_timeout,
            )
            .await?;
        let Response::ListRooms { mut rooms } = response else {
            return Err(SessionError::MalformedPayload(
                "expected list_rooms reply".into(),
            ));
        };

        for room in &mut rooms {
            if !room.sizes_consistent() {
                tracing::warn!(room = %room.id, "current_size above max_size; clamping");
                room.current_size = room.max_size;
            }
        }

        let mut inner = self.inner.lock().await;
        inner.snapshot = rooms;
        inner.optimistic_joins.clear();
        Ok(())
    }

    /// Join a room, optimistically marking it joined before the server
    /// confirms. The overlay is a set, so joining twice increments the
    /// derived `current_size` once, never twice.
    pub async fn join(&self, room_id: &str) -> Result<(), SessionError> {
        self.inner
            .lock()
            .await
            .optimistic_joins
            .insert(room_id.to_string());
        self.correlator.request(Request::JoinRoom {
            room_id: room_id.to_string(),
        });

        let response = self
            .correlator
            .await_response(
                |r| matches!(r, Response::JoinRoom { .. }),
                self.request_timeout,
            )
            .await?;
        match response {
            Response::JoinRoom {
                status: ReplyStatus::Ok,
                ..
            } => Ok(()),
            Response::JoinRoom {
                status: ReplyStatus::Error,
                reason,
            } => {
                // The optimistic assertion is known false; no need to
                // wait for the next refresh to drop it.
                self.inner.lock().await.optimistic_joins.remove(room_id);
                Err(reject_reason(reason.unwrap_or_else(|| "join rejected".into())))
            }
            other => Err(SessionError::MalformedPayload(format!(
                "unexpected join reply: {other:?}"
            ))),
        }
    }

    /// Create a room. On success the directory refreshes before the new
    /// room is exposed, then joins it exactly once if `auto_join` is
    /// set, returning the joined room's id. Server-reported reasons are
    /// surfaced verbatim, no retry.
    pub async fn create_room(
        &self,
        name: &str,
        max_size: u32,
        auto_join: bool,
    ) -> Result<Option<String>, SessionError> {
        let name = name.trim();
        validate_room_name(name).map_err(SessionError::Validation)?;
        validate_room_size(max_size).map_err(SessionError::Validation)?;

        self.correlator.request(Request::CreateRoom {
            name: name.to_string(),
            max_size,
        });
        let response = self
            .correlator
            .await_response(
                |r| matches!(r, Response::CreateRoom { .. }),
                self.request_timeout,
            )
            .await?;
        match response {
            Response::CreateRoom {
                status: ReplyStatus::Ok,
                ..
            } => {}
            Response::CreateRoom {
                status: ReplyStatus::Error,
                reason,
            } => {
                return Err(reject_reason(
                    reason.unwrap_or_else(|| "create rejected".into()),
                ));
            }
            other => {
                return Err(SessionError::MalformedPayload(format!(
                    "unexpected create reply: {other:?}"
                )))
            }
        }

        self.refresh().await?;

        if !auto_join {
            return Ok(None);
        }
        let target = {
            let inner = self.inner.lock().await;
            inner
                .snapshot
                .iter()
                .find(|room| room.id == name || room.name == name)
                .map(|room| room.id.clone())
        };
        match target {
            Some(room_id) => {
                self.join(&room_id).await?;
                Ok(Some(room_id))
            }
            None => Err(SessionError::Validation(
                "created room missing from refreshed list".into(),
            )),
        }
    }

    /// The room list with the optimistic overlay merged in: a locally
    /// joined room reads as joined with its size bumped by one, clamped
    /// to `max_size`.
    pub async fn rooms(&self) -> Vec<RoomSummary> {
        let inner = self.inner.lock().await;
        inner
            .snapshot
            .iter()
            .cloned()
            .map(|mut room| {
                if !room.joined && inner.optimistic_joins.contains(&room.id) {
                    room.joined = true;
                    if let Some(current) = room.current_size {
                        let bumped = current.saturating_add(1);
                        room.current_size = Some(match room.max_size {
                            Some(max) => bumped.min(max),
                            None => bumped,
                        });
                    }
                }
                room
            })
            .collect()
    }

    pub async fn is_joined(&self, room_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.optimistic_joins.contains(room_id)
            || inner
                .snapshot
                .iter()
                .any(|room| room.id == room_id && room.joined)
    }
}

fn reject_reason(reason: String) -> SessionError {
    if reason == "unauthenticated" {
        SessionError::Unauthenticated(reason)
    } else {
        SessionError::Validation(reason)
    }
}

/// Spawn the visibility-gated poll loop: a fixed-interval refresh while
/// visible, paused while hidden, with an immediate refresh on the
/// hidden→visible edge. The task ends when the visibility channel is
/// dropped (or the handle is aborted at teardown).
pub fn spawn_poll_task(
    directory: Arc<RoomDirectory>,
    interval: Duration,
    mut visibility: watch::Receiver<Visibility>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *visibility.borrow() == Visibility::Hidden {
                if visibility.changed().await.is_err() {
                    break;
                }
                if *visibility.borrow() == Visibility::Hidden {
                    continue;
                }
                if let Err(e) = directory.refresh().await {
                    tracing::warn!("room refresh failed: {e}");
                }
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = directory.refresh().await {
                        tracing::warn!("room refresh failed: {e}");
                    }
                }
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

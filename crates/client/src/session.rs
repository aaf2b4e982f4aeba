//! The session: one identity, one connection, and the components
//! layered on top, with an explicit create/teardown lifecycle.
//!
//! Nothing here is global: the session object is created on app start,
//! passed by reference, and destroyed on logout/unmount. `close`
//! removes the inbound listeners exactly once, aborts every
//! outstanding message timer, and stops the visibility-gated poll.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatline_shared::{ChatBody, Identity, MessageRecord, Request, Response, RoomSummary, SessionError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::identity::IdentityStore;
use crate::messages::{MessageEngine, CONFIRM_TIMEOUT};
use crate::rooms::{self, RoomDirectory, Visibility, REFRESH_INTERVAL};
use crate::ws::{ConnHandle, Connection, ConnectionState, Correlator};

/// Default deadline for correlated request/reply exchanges.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the push pump parks between re-registrations; a timeout
/// here is routine, not an error.
const PUSH_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub request_timeout: Duration,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    /// Override the identity storage location (tests).
    pub storage_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: REQUEST_TIMEOUT,
            confirm_timeout: CONFIRM_TIMEOUT,
            poll_interval: REFRESH_INTERVAL,
            storage_dir: None,
        }
    }
}

/// Push-style happenings delivered to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A room event arrived (own echo or another participant's message),
    /// already reconciled into the message records.
    Message(ChatBody),
    /// A server-reported error outside any correlated exchange.
    ServerError(String),
}

pub struct Session {
    identity: Mutex<Identity>,
    store: IdentityStore,
    connection: Connection,
    handle: ConnHandle,
    correlator: Arc<Correlator>,
    directory: Arc<RoomDirectory>,
    engine: MessageEngine,
    visibility_tx: watch::Sender<Visibility>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Open the connection, run the identity handshake, take the first
    /// room snapshot, and start the background pumps.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        let store = match &config.storage_dir {
            Some(dir) => IdentityStore::at(dir.clone()),
            None => IdentityStore::new(),
        };
        let identity = store.load_or_create();

        let (connection, mut responses) = Connection::open(config.url.clone());
        let handle = connection.handle();
        let correlator = Arc::new(Correlator::new(handle.clone()));

        // Pump the raw inbound stream into the correlator, in strict
        // arrival order. Ends exactly once, when the connection closes.
        let inbound_pump = tokio::spawn({
            let correlator = Arc::clone(&correlator);
            async move {
                while let Some(response) = responses.recv().await {
                    correlator.accept(response).await;
                }
                correlator.shutdown().await;
            }
        });

        // Announce identity. Queued while connecting, flushed on open.
        handle.send(Request::Connect {
            token: identity.token.clone(),
            name: identity.name.clone(),
        });
        let ack = correlator
            .await_response(
                |r| {
                    matches!(
                        r,
                        Response::Success | Response::Error { .. } | Response::Unauthorized { .. }
                    )
                },
                config.request_timeout,
            )
            .await;
        let handshake = match ack {
            Ok(Response::Success) => Ok(()),
            Ok(Response::Unauthorized { message }) => Err(SessionError::Unauthenticated(message)),
            Ok(Response::Error { message }) => Err(SessionError::Transport(message)),
            Ok(other) => Err(SessionError::MalformedPayload(format!(
                "unexpected handshake reply: {other:?}"
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = handshake {
            inbound_pump.abort();
            connection.close();
            return Err(e);
        }

        let engine = MessageEngine::new(handle.clone(), config.confirm_timeout);
        let directory = Arc::new(RoomDirectory::new(
            Arc::clone(&correlator),
            config.request_timeout,
        ));

        // First snapshot right after the handshake.
        if let Err(e) = directory.refresh().await {
            inbound_pump.abort();
            connection.close();
            return Err(e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Standing waiter for push-style messages. Room events are
        // reconciled into the engine before the embedder hears of them.
        let push_pump = tokio::spawn({
            let correlator = Arc::clone(&correlator);
            let engine = engine.clone();
            async move {
                loop {
                    let result = correlator
                        .await_response(
                            |r| {
                                matches!(
                                    r,
                                    Response::RoomEvent { .. }
                                        | Response::Error { .. }
                                        | Response::Unauthorized { .. }
                                )
                            },
                            PUSH_WAIT,
                        )
                        .await;
                    match result {
                        Ok(Response::RoomEvent { chat }) => {
                            engine.apply_room_event(chat.clone()).await;
                            let _ = events_tx.send(SessionEvent::Message(chat));
                        }
                        Ok(Response::Error { message })
                        | Ok(Response::Unauthorized { message }) => {
                            tracing::warn!("server error: {message}");
                            let _ = events_tx.send(SessionEvent::ServerError(message));
                        }
                        Ok(_) => {}
                        Err(SessionError::Timeout) => continue,
                        Err(_) => break,
                    }
                }
            }
        });

        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
        let poll = rooms::spawn_poll_task(
            Arc::clone(&directory),
            config.poll_interval,
            visibility_rx,
        );

        Ok(Self {
            identity: Mutex::new(identity),
            store,
            connection,
            handle,
            correlator,
            directory,
            engine,
            visibility_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            tasks: std::sync::Mutex::new(vec![inbound_pump, push_pump, poll]),
        })
    }

    pub async fn identity(&self) -> Identity {
        self.identity.lock().await.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Take the push event stream. Yields `None` after the first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        match self.events_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }
    }

    /// Change the display name. A trimmed-empty or unchanged name is a
    /// no-op; otherwise the identity is updated and persisted
    /// immediately and re-announced on the live connection — no
    /// reconnect. Returns whether anything changed.
    pub async fn rename(&self, new_name: &str) -> bool {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return false;
        }
        let mut identity = self.identity.lock().await;
        if identity.name == new_name {
            return false;
        }
        identity.name = new_name.to_string();
        if !self.store.save(&identity) {
            tracing::warn!("failed to persist renamed identity");
        }
        self.handle.send(Request::Connect {
            token: identity.token.clone(),
            name: identity.name.clone(),
        });
        true
    }

    /// Room list with the optimistic overlay merged in.
    pub async fn rooms(&self) -> Vec<RoomSummary> {
        self.directory.rooms().await
    }

    pub async fn refresh_rooms(&self) -> Result<(), SessionError> {
        self.directory.refresh().await
    }

    /// Join a room and make it the active one for incoming messages.
    pub async fn join_room(&self, room_id: &str) -> Result<(), SessionError> {
        self.engine.set_active_room(Some(room_id)).await;
        self.directory.join(room_id).await
    }

    /// Switch the active room without joining; in-flight timers in
    /// other rooms keep running.
    pub async fn select_room(&self, room_id: Option<&str>) {
        self.engine.set_active_room(room_id).await;
    }

    pub async fn create_room(
        &self,
        name: &str,
        max_size: u32,
        auto_join: bool,
    ) -> Result<Option<String>, SessionError> {
        let joined = self.directory.create_room(name, max_size, auto_join).await?;
        if let Some(room_id) = &joined {
            self.engine.set_active_room(Some(room_id)).await;
        }
        Ok(joined)
    }

    /// Send a chat message with optimistic local feedback. Returns the
    /// client-generated `message_id`.
    pub async fn send_chat(&self, room_id: &str, content: &str) -> Result<String, SessionError> {
        if room_id.is_empty() {
            return Err(SessionError::Validation("no room selected".into()));
        }
        let sender_name = self.identity.lock().await.name.clone();
        Ok(self.engine.send(room_id, content, &sender_name).await)
    }

    /// A room's message records in local send order.
    pub async fn records(&self, room_id: &str) -> Vec<MessageRecord> {
        self.engine.records(room_id).await
    }

    /// Report page visibility; polling pauses while hidden and resumes
    /// with an immediate refresh when visible again.
    pub fn set_visibility(&self, visibility: Visibility) {
        let _ = self.visibility_tx.send(visibility);
    }

    /// Tear the session down. Idempotent.
    pub async fn close(&self) {
        self.engine.shutdown().await;
        self.correlator.shutdown().await;
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.connection.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        // Connection teardown happens in its own Drop.
    }
}

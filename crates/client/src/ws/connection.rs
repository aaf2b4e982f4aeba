//! WebSocket connection with state management using tokio-tungstenite.

use chatline_shared::{decode_frame, Request, Response, SessionError};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};

/// Lifecycle of a single connection instance. `Closed` is terminal;
/// recovery means opening a new connection and re-announcing identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Handle for sending requests through a connection.
///
/// Requests sent while the socket is still connecting are buffered and
/// flushed, in order, exactly once when the `Open` transition occurs.
/// Sending after `Closed` is a silent no-op: the request is dropped and
/// logged, never an error. This mirrors the documented lossy-send
/// contract of the wire layer.
#[derive(Clone)]
pub struct ConnHandle {
    out_tx: UnboundedSender<Request>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnHandle {
    pub(crate) fn new(out_tx: UnboundedSender<Request>, state_rx: watch::Receiver<ConnectionState>) -> Self {
        Self { out_tx, state_rx }
    }

    /// Fire-and-forget send. See the type docs for the buffering and
    /// silent-drop semantics.
    pub fn send(&self, request: Request) {
        if self.out_tx.unbounded_send(request).is_err() {
            tracing::debug!("connection closed; request dropped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait for the connection to leave `Connecting`. Errors with
    /// `NotConnected` if it went straight to `Closed`.
    pub async fn wait_open(&self) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        let state = state_rx
            .wait_for(|state| !matches!(state, ConnectionState::Connecting))
            .await
            .map_err(|_| SessionError::Transport("connection task ended".into()))?;
        match *state {
            ConnectionState::Open => Ok(()),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Build a handle wired to nothing but a capture channel, for
    /// exercising components above the socket.
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, UnboundedReceiver<Request>) {
        let (out_tx, out_rx) = unbounded();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Open);
        (Self::new(out_tx, state_rx), out_rx)
    }
}

/// A managed connection to the chat server.
///
/// `open` returns immediately in the `Connecting` state together with
/// the raw inbound response stream; the socket task runs in the
/// background. `close` is idempotent and tears the task down.
pub struct Connection {
    handle: ConnHandle,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    /// Open a connection to `url`. The returned receiver yields every
    /// decoded inbound response in strict arrival order and ends when
    /// the connection closes.
    pub fn open(url: String) -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (close_tx, close_rx) = watch::channel(false);

        tokio::spawn(run_connection(url, out_rx, in_tx, state_tx, close_rx));

        let connection = Self {
            handle: ConnHandle::new(out_tx, state_rx),
            close_tx,
        };
        (connection, in_rx)
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Request teardown. Idempotent; all listeners are removed exactly
    /// once when the socket task exits.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close_tx.send(true);
    }
}

async fn run_connection(
    url: String,
    out_rx: UnboundedReceiver<Request>,
    in_tx: mpsc::UnboundedSender<Response>,
    state_tx: watch::Sender<ConnectionState>,
    mut close_rx: watch::Receiver<bool>,
) {
    let ws = tokio::select! {
        result = connect_async(&url) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::error!("websocket connect to {url} failed: {e}");
                let _ = state_tx.send(ConnectionState::Closed);
                return;
            }
        },
        _ = close_requested(&mut close_rx) => {
            let _ = state_tx.send(ConnectionState::Closed);
            return;
        }
    };

    tracing::info!("websocket connected to {url}");
    let _ = state_tx.send(ConnectionState::Open);

    run_io(ws, out_rx, in_tx, &mut close_rx).await;

    tracing::info!("websocket to {url} closed");
    let _ = state_tx.send(ConnectionState::Closed);
}

/// Resolves when `close` was called, or when every `Connection` owner
/// is gone.
async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    if *close_rx.borrow() {
        return;
    }
    while close_rx.changed().await.is_ok() {
        if *close_rx.borrow() {
            return;
        }
    }
}

async fn run_io<S>(
    ws: WebSocketStream<S>,
    mut out_rx: UnboundedReceiver<Request>,
    in_tx: mpsc::UnboundedSender<Response>,
    close_rx: &mut watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = close_requested(close_rx) => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            request = out_rx.next() => match request {
                Some(request) => {
                    let json = match serde_json::to_string(&request) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("failed to serialize request: {e}");
                            continue;
                        }
                    };
                    tracing::debug!("-> {json}");
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        tracing::warn!("websocket send failed: {e}");
                        break;
                    }
                }
                // All handles dropped.
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("<- {}", text.as_str());
                    match decode_frame(&text) {
                        Ok(responses) => {
                            for response in responses {
                                if in_tx.send(response).is_err() {
                                    // Subscriber gone; nothing left to deliver to.
                                    return;
                                }
                            }
                        }
                        // Malformed frames are dropped, never fatal to the session.
                        Err(e) => tracing::warn!("dropping malformed frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are handled by tungstenite; binary is ignored.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("websocket read error: {e}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn send_before_open_is_buffered_and_flushed() {
        let (listener, url) = local_listener().await;
        let (connection, _responses) = Connection::open(url);
        let handle = connection.handle();

        // The socket task has not even been polled yet.
        assert_eq!(handle.state(), ConnectionState::Connecting);
        handle.send(Request::ListRooms);

        let (stream, _) = listener.accept().await.unwrap();
        let mut server = accept_async(stream).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let request: Request = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(request, Request::ListRooms);
        assert_eq!(handle.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (listener, url) = local_listener().await;
        let (connection, mut responses) = Connection::open(url);

        let (stream, _) = listener.accept().await.unwrap();
        let mut server = accept_async(stream).await.unwrap();
        connection.handle().wait_open().await.ok();
        server.send(Message::Text("not json".into())).await.unwrap();
        server
            .send(Message::Text(r#"{"type":"success"}"#.into()))
            .await
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(2), responses.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response, Response::Success);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_later_sends_are_dropped() {
        let (listener, url) = local_listener().await;
        let (connection, mut responses) = Connection::open(url);

        let (stream, _) = listener.accept().await.unwrap();
        let _server = accept_async(stream).await.unwrap();
        connection.handle().wait_open().await.unwrap();

        connection.close();
        connection.close();

        // Stream ends once the socket task tears down.
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(2), responses.recv())
                .await
                .unwrap(),
            None
        );
        // No panic, no error: documented silent drop.
        connection.handle().send(Request::ListRooms);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn failed_connect_transitions_to_closed() {
        // Nothing is listening on this port.
        let (listener, url) = local_listener().await;
        drop(listener);

        let (connection, mut responses) = Connection::open(url);
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(5), responses.recv())
                .await
                .unwrap(),
            None
        );
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(
            connection.handle().wait_open().await,
            Err(SessionError::NotConnected)
        );
    }
}

//! Request/response correlation over the raw inbound stream.
//!
//! Requests carry no correlation ids on this wire, so responses are
//! matched by caller-supplied predicates: every inbound response is
//! offered to pending waiters in registration order, and anything
//! unclaimed lands in a bounded overflow queue for the next waiter
//! whose predicate matches (push-style events, send-then-wait races).

use std::collections::VecDeque;
use std::time::Duration;

use chatline_shared::{Request, Response, SessionError};
use tokio::sync::{oneshot, Mutex};

use super::ConnHandle;

/// Responses buffered with nobody waiting. Past this, the oldest entry
/// is discarded with a warning.
const OVERFLOW_LIMIT: usize = 64;

type Predicate = Box<dyn Fn(&Response) -> bool + Send>;

struct Waiter {
    id: u64,
    predicate: Predicate,
    tx: oneshot::Sender<Response>,
}

struct Inner {
    waiters: VecDeque<Waiter>,
    overflow: VecDeque<Response>,
    next_waiter_id: u64,
    closed: bool,
}

pub struct Correlator {
    handle: ConnHandle,
    inner: Mutex<Inner>,
}

impl Correlator {
    pub fn new(handle: ConnHandle) -> Self {
        Self {
            handle,
            inner: Mutex::new(Inner {
                waiters: VecDeque::new(),
                overflow: VecDeque::new(),
                next_waiter_id: 0,
                closed: false,
            }),
        }
    }

    /// Fire-and-forget send through the connection.
    pub fn request(&self, request: Request) {
        self.handle.send(request);
    }

    /// Wait for the first inbound response satisfying `predicate`.
    ///
    /// The overflow queue is scanned oldest-first before a new waiter is
    /// registered, so a push that raced ahead of the caller is still
    /// observed. On timeout the waiter is deregistered and exactly one
    /// `Timeout` is returned; a response matching it afterwards is
    /// treated like any other unmatched push.
    pub async fn await_response(
        &self,
        predicate: impl Fn(&Response) -> bool + Send + 'static,
        timeout: Duration,
    ) -> Result<Response, SessionError> {
        let (waiter_id, rx) = {
            let mut inner = self.inner.lock().await;
            if let Some(pos) = inner.overflow.iter().position(&predicate) {
                // remove() is Some for any in-bounds index.
                if let Some(response) = inner.overflow.remove(pos) {
                    return Ok(response);
                }
            }
            if inner.closed {
                return Err(SessionError::Transport("connection closed".into()));
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push_back(Waiter {
                id,
                predicate: Box::new(predicate),
                tx,
            });
            (id, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SessionError::Transport("connection closed".into())),
            Err(_) => {
                let mut inner = self.inner.lock().await;
                inner.waiters.retain(|waiter| waiter.id != waiter_id);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Offer one inbound response to the waiter queue; called by the
    /// session's inbound pump, in strict arrival order.
    pub async fn accept(&self, response: Response) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }

        let mut response = response;
        let mut index = 0;
        while index < inner.waiters.len() {
            if !(inner.waiters[index].predicate)(&response) {
                index += 1;
                continue;
            }
            let Some(waiter) = inner.waiters.remove(index) else {
                break;
            };
            match waiter.tx.send(response) {
                Ok(()) => return,
                // The waiter timed out between deregistration and now;
                // keep offering to the ones behind it.
                Err(returned) => response = returned,
            }
        }

        if inner.overflow.len() >= OVERFLOW_LIMIT {
            tracing::warn!("response overflow full; discarding oldest entry");
            inner.overflow.pop_front();
        }
        inner.overflow.push_back(response);
    }

    /// Mark the stream ended: pending waiters fail with a transport
    /// error and later responses are dropped.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.waiters.clear();
        inner.overflow.clear();
    }

    #[cfg(test)]
    pub(crate) async fn overflow_snapshot(&self) -> Vec<Response> {
        self.inner.lock().await.overflow.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_shared::{ReplyStatus, RoomSummary};

    fn correlator() -> Correlator {
        let (handle, out_rx) = ConnHandle::test_pair();
        // The capture side is irrelevant to these tests.
        std::mem::drop(out_rx);
        Correlator::new(handle)
    }

    fn list_response(id: &str) -> Response {
        Response::ListRooms {
            rooms: vec![RoomSummary {
                id: id.into(),
                name: id.into(),
                joined: false,
                current_size: None,
                max_size: None,
            }],
        }
    }

    #[tokio::test]
    async fn overlapping_waiters_resolve_in_registration_order() {
        let correlator = std::sync::Arc::new(correlator());

        let first = tokio::spawn({
            let c = correlator.clone();
            async move {
                c.await_response(
                    |r| matches!(r, Response::ListRooms { .. }),
                    Duration::from_secs(5),
                )
                .await
            }
        });
        // Make sure the first waiter registers before the second.
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let c = correlator.clone();
            async move {
                c.await_response(
                    |r| matches!(r, Response::ListRooms { .. }),
                    Duration::from_secs(5),
                )
                .await
            }
        });
        tokio::task::yield_now().await;

        correlator.accept(list_response("a")).await;
        correlator.accept(list_response("b")).await;

        assert_eq!(first.await.unwrap().unwrap(), list_response("a"));
        assert_eq!(second.await.unwrap().unwrap(), list_response("b"));
    }

    #[tokio::test]
    async fn buffered_push_is_found_before_registering() {
        let correlator = correlator();
        correlator
            .accept(Response::JoinRoom {
                status: ReplyStatus::Ok,
                reason: None,
            })
            .await;

        // No waiter existed when the response arrived; the scan of the
        // overflow queue still finds it immediately.
        let response = correlator
            .await_response(
                |r| matches!(r, Response::JoinRoom { .. }),
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert_eq!(
            response,
            Response::JoinRoom {
                status: ReplyStatus::Ok,
                reason: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_late_match_goes_to_overflow() {
        let correlator = correlator();

        let result = correlator
            .await_response(
                |r| matches!(r, Response::Success),
                Duration::from_millis(100),
            )
            .await;
        assert_eq!(result, Err(SessionError::Timeout));

        // The late arrival is just an unmatched push now.
        correlator.accept(Response::Success).await;
        assert_eq!(correlator.overflow_snapshot().await, vec![Response::Success]);

        let response = correlator
            .await_response(
                |r| matches!(r, Response::Success),
                Duration::from_millis(100),
            )
            .await;
        assert_eq!(response, Ok(Response::Success));
    }

    #[tokio::test]
    async fn mismatched_responses_skip_to_later_waiters() {
        let correlator = std::sync::Arc::new(correlator());

        let join_waiter = tokio::spawn({
            let c = correlator.clone();
            async move {
                c.await_response(
                    |r| matches!(r, Response::JoinRoom { .. }),
                    Duration::from_secs(5),
                )
                .await
            }
        });
        tokio::task::yield_now().await;
        let list_waiter = tokio::spawn({
            let c = correlator.clone();
            async move {
                c.await_response(
                    |r| matches!(r, Response::ListRooms { .. }),
                    Duration::from_secs(5),
                )
                .await
            }
        });
        tokio::task::yield_now().await;

        // The list response skips the older join waiter.
        correlator.accept(list_response("a")).await;
        assert_eq!(list_waiter.await.unwrap().unwrap(), list_response("a"));

        correlator
            .accept(Response::JoinRoom {
                status: ReplyStatus::Ok,
                reason: None,
            })
            .await;
        assert!(join_waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn overflow_is_bounded_oldest_first() {
        let correlator = correlator();
        for i in 0..=OVERFLOW_LIMIT {
            correlator.accept(list_response(&format!("r{i}"))).await;
        }
        let overflow = correlator.overflow_snapshot().await;
        assert_eq!(overflow.len(), OVERFLOW_LIMIT);
        // r0 was discarded.
        assert_eq!(overflow[0], list_response("r1"));
    }

    #[tokio::test]
    async fn shutdown_drops_waiters_with_transport_error() {
        let correlator = std::sync::Arc::new(correlator());
        let waiter = tokio::spawn({
            let c = correlator.clone();
            async move {
                c.await_response(|r| matches!(r, Response::Success), Duration::from_secs(5))
                    .await
            }
        });
        tokio::task::yield_now().await;

        correlator.shutdown().await;
        assert!(matches!(
            waiter.await.unwrap(),
            Err(SessionError::Transport(_))
        ));
        assert!(matches!(
            correlator
                .await_response(|_| true, Duration::from_secs(1))
                .await,
            Err(SessionError::Transport(_))
        ));
    }
}

//! HTTP POST fallback transport.
//!
//! Carries the same payload shapes as the duplex channel, one
//! request/response at a time, for environments where the socket
//! cannot be established. Identity travels in `token`/`name` headers.

use chatline_shared::{Identity, Request, Response, SessionError};
use reqwest::Client;

#[derive(Debug, Clone)]
pub struct HttpFallback {
    client: Client,
    url: String,
}

impl HttpFallback {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    /// Send one request. `Ok(None)` means the server had nothing to say
    /// (HTTP 204, e.g. for a fire-and-forget chat).
    pub async fn send(
        &self,
        request: &Request,
        identity: Option<&Identity>,
    ) -> Result<Option<Response>, SessionError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(identity) = identity {
            builder = builder
                .header("token", &identity.token)
                .header("name", &identity.name);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        if response.status().as_u16() == 204 {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Transport(format!("failed to read body: {e}")))?;
        serde_json::from_str::<Response>(&body)
            .map(Some)
            .map_err(|e| SessionError::MalformedPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_shared::ReplyStatus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    // Serves exactly one request with a canned reply and hands the raw
    // request text back for assertions.
    async fn one_shot(
        status_line: &'static str,
        body: &'static str,
    ) -> (HttpFallback, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client hung up mid-request");
                raw.extend_from_slice(&chunk[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let reply = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (HttpFallback::new(url), server)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + body_len
    }

    #[tokio::test]
    async fn identity_travels_in_headers_and_204_means_no_reply() {
        let (fallback, server) = one_shot("HTTP/1.1 204 No Content", "").await;
        let identity = Identity {
            token: "tok-1".into(),
            name: "alice".into(),
        };

        let reply = fallback
            .send(
                &Request::Chat {
                    message: "hi".into(),
                    room_id: "r1".into(),
                    message_id: "m1".into(),
                },
                Some(&identity),
            )
            .await
            .unwrap();
        assert_eq!(reply, None);

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.contains("token: tok-1"));
        assert!(raw.contains("name: alice"));
        assert!(raw.contains(r#""type":"chat""#));
    }

    #[tokio::test]
    async fn reply_body_is_decoded() {
        let (fallback, server) = one_shot(
            "HTTP/1.1 200 OK",
            r#"{"type":"join_room","status":"ok","reason":null}"#,
        )
        .await;

        let reply = fallback.send(&Request::ListRooms, None).await.unwrap();
        assert_eq!(
            reply,
            Some(Response::JoinRoom {
                status: ReplyStatus::Ok,
                reason: None,
            })
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_reply_body_is_an_error() {
        let (fallback, _server) = one_shot("HTTP/1.1 200 OK", "not json").await;
        let err = fallback.send(&Request::ListRooms, None).await.unwrap_err();
        assert!(matches!(err, SessionError::MalformedPayload(_)));
    }
}

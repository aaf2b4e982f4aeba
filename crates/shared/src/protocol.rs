//! Wire protocol: tagged request/response unions exchanged over the
//! duplex channel (and, one at a time, over the HTTP fallback).

use serde::{Deserialize, Serialize};

use crate::models::{ChatBody, RoomSummary};

/// Outbound client request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Connect {
        token: String,
        name: String,
    },
    ListRooms,
    JoinRoom {
        room_id: String,
    },
    CreateRoom {
        name: String,
        max_size: u32,
    },
    Chat {
        message: String,
        room_id: String,
        message_id: String,
    },
}

/// Status carried by per-request replies (`join_room`, `create_room`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Inbound server response. Consumers match exhaustively; there is no
/// shape-sniffing fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Connect acknowledged.
    Success,
    ListRooms {
        rooms: Vec<RoomSummary>,
    },
    JoinRoom {
        status: ReplyStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    CreateRoom {
        status: ReplyStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    RoomEvent {
        chat: ChatBody,
    },
    Error {
        message: String,
    },
    Unauthorized {
        message: String,
    },
}

impl Response {
    /// Reason string for an error-status reply, if this is one.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            Response::JoinRoom {
                status: ReplyStatus::Error,
                reason,
            }
            | Response::CreateRoom {
                status: ReplyStatus::Error,
                reason,
            } => Some(reason.as_deref().unwrap_or("unknown")),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    One(Response),
    Many(Vec<Response>),
}

/// Decode one inbound text frame. The server may batch: a frame is
/// either a single response object or a JSON array of them.
pub fn decode_frame(payload: &str) -> Result<Vec<Response>, serde_json::Error> {
    Ok(match serde_json::from_str::<Frame>(payload)? {
        Frame::One(response) => vec![response],
        Frame::Many(responses) => responses,
    })
}

//! Shared types for the chatline protocol and session engine.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::SessionError;
pub use models::{
    validate_room_name, validate_room_size, ChatBody, ChatUser, DeliveryStatus, Identity,
    MessageRecord, RoomSummary, ROOM_NAME_MAX, ROOM_NAME_MIN, ROOM_SIZE_MAX, ROOM_SIZE_MIN,
};
pub use protocol::{decode_frame, ReplyStatus, Request, Response};

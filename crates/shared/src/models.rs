//! Shared data models for the chatline session engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identity ---

/// A durable (token, display name) pair.
///
/// The token is generated once per installation and never changes; the
/// display name is mutable and re-announced to the server on rename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub token: String,
    pub name: String,
}

impl Identity {
    /// Create a fresh identity with a random opaque token.
    pub fn generate() -> Self {
        let token = uuid::Uuid::new_v4().to_string();
        let name = format!("guest-{}", &token[..8]);
        Self { token, name }
    }
}

// --- Rooms ---

/// A room as reported by the server in a `list_rooms` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    /// The server's view of membership. A client-local optimistic
    /// overlay may diverge until the next refresh.
    pub joined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
}

impl RoomSummary {
    /// Whether the reported sizes satisfy `current_size <= max_size`.
    /// Vacuously true when either side is absent.
    pub fn sizes_consistent(&self) -> bool {
        match (self.current_size, self.max_size) {
            (Some(current), Some(max)) => current <= max,
            _ => true,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(
            (self.current_size, self.max_size),
            (Some(current), Some(max)) if current >= max
        )
    }
}

// --- Messages ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatUser {
    pub name: Option<String>,
}

/// A chat message on the wire and in local records. `message_id` is the
/// reconciliation key between an optimistic send and the server echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatBody {
    pub content: String,
    pub user: ChatUser,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Delivery state of a locally tracked message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Sent, awaiting the server echo.
    Pending,
    /// Reconciled against the authoritative echo. Terminal.
    Confirmed,
    /// No echo within the deadline. Terminal; a retry is a new message.
    Error,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// One record per `message_id`, appended in local send order and
/// rewritten in place when reconciled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub chat: ChatBody,
    pub status: DeliveryStatus,
}

// --- Validation ---

pub const ROOM_NAME_MIN: usize = 3;
pub const ROOM_NAME_MAX: usize = 50;
pub const ROOM_SIZE_MIN: u32 = 3;
pub const ROOM_SIZE_MAX: u32 = 50;

/// Client-side pre-check for room names. The server stays authoritative;
/// the reason strings match what it would report.
pub fn validate_room_name(name: &str) -> Result<(), String> {
    let len = name.trim().chars().count();
    if len < ROOM_NAME_MIN || len > ROOM_NAME_MAX {
        return Err(format!(
            "name must be between {} and {} characters",
            ROOM_NAME_MIN, ROOM_NAME_MAX
        ));
    }
    Ok(())
}

/// Client-side pre-check for a room's maximum size.
pub fn validate_room_size(max_size: u32) -> Result<(), String> {
    if max_size < ROOM_SIZE_MIN || max_size > ROOM_SIZE_MAX {
        return Err(format!(
            "max size must be between {} and {}",
            ROOM_SIZE_MIN, ROOM_SIZE_MAX
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identities_have_distinct_tokens() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.token, b.token);
        assert!(a.name.starts_with("guest-"));
    }

    #[test]
    fn sizes_consistent_requires_current_at_most_max() {
        let mut room = RoomSummary {
            id: "r1".into(),
            name: "general".into(),
            joined: false,
            current_size: Some(4),
            max_size: Some(8),
        };
        assert!(room.sizes_consistent());
        assert!(!room.is_full());

        room.current_size = Some(9);
        assert!(!room.sizes_consistent());

        room.max_size = None;
        assert!(room.sizes_consistent());
    }

    #[test]
    fn room_name_bounds() {
        assert!(validate_room_name("abc").is_ok());
        assert!(validate_room_name(&"x".repeat(50)).is_ok());
        assert!(validate_room_name("ab").is_err());
        assert!(validate_room_name(&"x".repeat(51)).is_err());
        // Trimmed length is what counts.
        assert!(validate_room_name("  ab  ").is_err());
    }

    #[test]
    fn room_size_bounds_match_server_reason() {
        assert!(validate_room_size(3).is_ok());
        assert!(validate_room_size(50).is_ok());
        assert_eq!(
            validate_room_size(2).unwrap_err(),
            "max size must be between 3 and 50"
        );
        assert!(validate_room_size(51).is_err());
    }
}

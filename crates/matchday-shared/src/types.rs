use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ROOM_SEPARATOR;
use crate::error::ProtocolError;

// Participant identity = team account UUID
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ParticipantId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ProtocolError::InvalidParticipantId(s.to_string()))
    }
}

/// Canonical identifier of the conversation between two participants.
///
/// Always built through [`resolve`] or [`RoomId::parse`], so the two halves
/// are valid, distinct and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId {
    first: ParticipantId,
    second: ParticipantId,
}

/// Map an unordered pair of participants to their room.
///
/// Order-independent: `resolve(a, b) == resolve(b, a)`. Callers must reject
/// `a == b` before getting here.
pub fn resolve(a: ParticipantId, b: ParticipantId) -> RoomId {
    debug_assert_ne!(a, b, "a room needs two distinct participants");
    let (a_str, b_str) = (a.to_string(), b.to_string());
    if a_str <= b_str {
        RoomId { first: a, second: b }
    } else {
        RoomId { first: b, second: a }
    }
}

impl RoomId {
    /// Parse a room id received from a client.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidRoomId(s.to_string());

        let (left, right) = s.split_once(ROOM_SEPARATOR).ok_or_else(invalid)?;
        let a: ParticipantId = left.parse().map_err(|_| invalid())?;
        let b: ParticipantId = right.parse().map_err(|_| invalid())?;
        if a == b {
            return Err(invalid());
        }

        let room = resolve(a, b);
        // Reject non-canonical spellings (reversed order, uppercase hex).
        if room.to_string() != s {
            return Err(invalid());
        }
        Ok(room)
    }

    pub fn participants(&self) -> (ParticipantId, ParticipantId) {
        (self.first, self.second)
    }

    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.first == participant || self.second == participant
    }

    /// The other participant of the room, or `None` if `participant` is not a member.
    pub fn peer_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if self.first == participant {
            Some(self.second)
        } else if self.second == participant {
            Some(self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.first, ROOM_SEPARATOR, self.second)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

/// Identifier of one live duplex connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_order_independent() {
        for _ in 0..32 {
            let a = ParticipantId::new();
            let b = ParticipantId::new();
            assert_eq!(resolve(a, b), resolve(b, a));
            assert_eq!(resolve(a, b).to_string(), resolve(b, a).to_string());
        }
    }

    #[test]
    fn test_resolve_distinguishes_peers() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let c = ParticipantId::new();
        assert_ne!(resolve(a, b), resolve(a, c));
        assert_ne!(resolve(a, b).to_string(), resolve(a, c).to_string());
    }

    #[test]
    fn test_room_id_parse_roundtrip() {
        let room = resolve(ParticipantId::new(), ParticipantId::new());
        let parsed = RoomId::parse(&room.to_string()).unwrap();
        assert_eq!(parsed, room);
    }

    #[test]
    fn test_room_id_rejects_garbage() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let room = resolve(a, b);
        let (first, second) = room.participants();

        assert!(RoomId::parse("not-a-room").is_err());
        assert!(RoomId::parse(&format!("{a}_{a}")).is_err());
        assert!(RoomId::parse(&format!("{second}_{first}")).is_err());
        assert!(RoomId::parse(&format!("{first}_{second}_x")).is_err());
    }

    #[test]
    fn test_peer_of() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let outsider = ParticipantId::new();
        let room = resolve(a, b);

        assert!(room.involves(a));
        assert!(room.involves(b));
        assert!(!room.involves(outsider));
        assert_eq!(room.peer_of(a), Some(b));
        assert_eq!(room.peer_of(b), Some(a));
        assert_eq!(room.peer_of(outsider), None);
    }

    #[test]
    fn test_room_id_serde_as_string() {
        let room = resolve(ParticipantId::new(), ParticipantId::new());
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, format!("\"{room}\""));
        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, room);
    }
}

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid participant id: {0}")]
    InvalidParticipantId(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedFrame(err.to_string())
    }
}

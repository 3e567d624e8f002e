//! Protocol failures. All of them are fatal for the batch in flight.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed `{command}` response ({reason}): {response:?}")]
    Malformed {
        command: &'static str,
        response: String,
        reason: String,
    },
    #[error("optimizer closed the session during `{command}`")]
    UnexpectedEof { command: &'static str },
    #[error("`{command}` failed: {detail}")]
    Failed {
        command: &'static str,
        detail: String,
    },
}

impl ProtocolError {
    pub fn malformed(
        command: &'static str,
        response: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Malformed {
            command,
            response: response.into(),
            reason: reason.to_string(),
        }
    }
}

//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::GameSnapshot;
use crate::voting::VoteDirection;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Cast one vote for the current round
    Vote { direction: VoteDirection },

    /// Pause or resume the simulation (driver only)
    TogglePause,

    /// Full game reset (driver only)
    Reset,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        session_id: Uuid,
        instance_id: Uuid,
        server_time: u64,
    },

    /// Everything the viewer renders, sent on every mirrored change
    Snapshot(GameSnapshot),

    /// A vote was counted
    VoteAccepted {
        direction: VoteDirection,
        count: u64,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl ToString) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_parse() {
        let vote: ClientMsg = serde_json::from_str(r#"{"type":"vote","direction":"stay"}"#).unwrap();
        assert!(matches!(vote, ClientMsg::Vote { direction: VoteDirection::Stay }));

        let pause: ClientMsg = serde_json::from_str(r#"{"type":"toggle_pause"}"#).unwrap();
        assert!(matches!(pause, ClientMsg::TogglePause));

        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"vote","direction":"up"}"#).is_err());
    }

    #[test]
    fn pong_echoes_the_timestamp() {
        let value = serde_json::to_value(ServerMsg::Pong { t: 99 }).unwrap();
        assert_eq!(value, json!({"type": "pong", "t": 99}));
    }
}

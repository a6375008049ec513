//! Control-channel datagrams
//!
//! Three text messages drive a session: `GETREADY <json>`, `START` and
//! `STOP [<json>]`. Payloads are carried as raw text and only parsed by the
//! session state machine, so a malformed payload is a session-level error
//! rather than an unrecognized datagram.

use serde::Serialize;

use crate::types::{SessionParameters, StopMetadata};

const GETREADY: &str = "GETREADY";
const START: &str = "START";
const STOP: &str = "STOP";

/// One decoded control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Prepare a session; payload is the session parameter JSON
    GetReady { payload: String },
    /// Begin acquisition
    Start,
    /// End acquisition; payload is optional stop metadata JSON
    Stop { payload: String },
    /// Anything else, kept for logging
    Unrecognized(String),
}

impl ControlMessage {
    /// Classify a datagram.
    ///
    /// `START` must match exactly after trimming; `GETREADY` and `STOP`
    /// match by prefix and carry everything after the first whitespace run.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with(GETREADY) {
            ControlMessage::GetReady {
                payload: payload_after_keyword(text, GETREADY),
            }
        } else if text == START {
            ControlMessage::Start
        } else if text.starts_with(STOP) {
            ControlMessage::Stop {
                payload: payload_after_keyword(text, STOP),
            }
        } else {
            ControlMessage::Unrecognized(text.to_string())
        }
    }

    /// Decode raw datagram bytes (invalid UTF-8 is replaced, not rejected).
    pub fn from_datagram(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Render as datagram text.
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::GetReady { payload } => join(GETREADY, payload),
            ControlMessage::Start => START.to_string(),
            ControlMessage::Stop { payload } => join(STOP, payload),
            ControlMessage::Unrecognized(text) => text.clone(),
        }
    }

    /// GETREADY carrying `params` as JSON.
    pub fn get_ready(params: &SessionParameters) -> Self {
        ControlMessage::GetReady {
            payload: to_json(params),
        }
    }

    /// STOP carrying `metadata` as JSON.
    pub fn stop(metadata: &StopMetadata) -> Self {
        ControlMessage::Stop {
            payload: to_json(metadata),
        }
    }

    /// Keyword for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::GetReady { .. } => GETREADY,
            ControlMessage::Start => START,
            ControlMessage::Stop { .. } => STOP,
            ControlMessage::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

fn payload_after_keyword(text: &str, keyword: &str) -> String {
    text.split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_else(|| text[keyword.len()..].trim().to_string())
}

fn join(keyword: &str, payload: &str) -> String {
    if payload.is_empty() {
        keyword.to_string()
    } else {
        format!("{keyword} {payload}")
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

//! Wire envelope shared by every gateway hop

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message on a gateway channel
///
/// Responses and errors carry the `reqId` of the request they answer;
/// notifications carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    Request {
        #[serde(rename = "reqId")]
        req_id: String,
        payload: Value,
    },
    Response {
        #[serde(rename = "reqId")]
        req_id: String,
        payload: Value,
    },
    Error {
        #[serde(rename = "reqId")]
        req_id: String,
        payload: ErrorPayload,
    },
    Notification {
        payload: Value,
    },
}

impl Envelope {
    pub fn req_id(&self) -> Option<&str> {
        match self {
            Envelope::Request { req_id, .. }
            | Envelope::Response { req_id, .. }
            | Envelope::Error { req_id, .. } => Some(req_id),
            Envelope::Notification { .. } => None,
        }
    }
}

/// Who sits on the other end of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Wallet UI surfaces; full error detail
    Trusted,
    /// Page contexts; sensitive detail is stripped
    Untrusted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorPayload {
    pub const GENERIC_MESSAGE: &'static str = "Request failed";

    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn from_error(err: &Error, exposure: Exposure) -> Self {
        if exposure == Exposure::Untrusted && err.is_sensitive() {
            return Self::new(Self::GENERIC_MESSAGE, Some("REQUEST_FAILED"));
        }
        match err {
            // Keep the remote side's own code when relaying
            Error::Protocol(crate::error::ProtocolError::Remote { message, code }) => Self {
                message: message.clone(),
                code: code.clone(),
            },
            _ => Self::new(err.to_string(), Some(err.code())),
        }
    }
}

//! The CDP wire envelopes (spec §3, §6).
//!
//! Mirrors the shape of `chromiumoxide_types`'s `MethodCall`/`Response`/
//! `Message` split, minus the generic `Command`/`Event` trait machinery that
//! crate used to drive code generation across the full protocol surface —
//! this core only ever needs to move `serde_json::Value` params/results for
//! the handful of domains it speaks.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monotonic per-session command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl CallId {
    pub fn new(id: u64) -> Self {
        CallId(id)
    }
}

/// An outbound `{id, method, params, sessionId?}` command envelope.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    pub id: CallId,
    pub method: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolErrorBody {
    pub code: i64,
    pub message: String,
}

/// An inbound frame is either a reply to a command (tagged by `id`) or an
/// unsolicited event. `serde` can't discriminate a tagged union on "has an
/// `id` field vs. doesn't" directly, so we deserialize into this superset
/// and classify afterwards in [`InboundFrame::classify`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    pub error: Option<ProtocolErrorBody>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// A frame read off the wire, classified into the two shapes spec §3/§6
/// describes.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Reply {
        id: u64,
        result: Option<Value>,
        error: Option<ProtocolErrorBody>,
    },
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

impl RawFrame {
    pub fn classify(self) -> Option<InboundFrame> {
        if let Some(id) = self.id {
            Some(InboundFrame::Reply {
                id,
                result: self.result,
                error: self.error,
            })
        } else {
            let method = self.method?;
            Some(InboundFrame::Event {
                method,
                params: self.params.unwrap_or(Value::Null),
                session_id: self.session_id,
            })
        }
    }
}

pub fn parse_frame(text: &str) -> Result<InboundFrame, crate::error::CdpError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    raw.classify()
        .ok_or_else(|| crate::error::CdpError::InvalidEnvelope(text.to_string()))
}

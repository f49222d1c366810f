use async_tungstenite::tungstenite;
use thiserror::Error;

/// Errors surfaced by the CDP session core.
///
/// Propagation policy (spec §7): `NotConnected`/`Closed` abort the calling
/// operation and are logged at `warn` by the call site, never retried.
/// `Timeout` during startup domain-enabling is fatal to the session; a
/// `Timeout` on a body fetch or window-property call is recovered locally.
/// `ContextLost` is expected during navigation and is never logged above
/// `debug`. `ProtocolError` on non-critical events is logged at `warn` and
/// the event dropped. `CallbackFailed` is logged and capture continues.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("not connected to the browser")]
    NotConnected,
    #[error("command timed out")]
    Timeout,
    #[error("the session was closed")]
    Closed,
    #[error("chrome returned an error ({code}): {message}")]
    ProtocolError { code: i64, message: String },
    #[error("response body unavailable: {0}")]
    BodyUnavailable(String),
    #[error("execution context lost (navigation in progress)")]
    ContextLost,
    #[error("invalid CDP envelope: {0}")]
    InvalidEnvelope(String),
    #[error("host event callback failed: {0}")]
    CallbackFailed(String),
    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid websocket url: {0}")]
    Url(#[from] url::ParseError),
}

impl CdpError {
    /// `true` for the specific "object id became invalid" shape the window
    /// property walker must swallow silently (spec §4.5, §7).
    pub fn is_context_lost(&self) -> bool {
        match self {
            CdpError::ContextLost => true,
            CdpError::ProtocolError { code, message } => {
                *code == -32000 || message.contains("Cannot find context")
            }
            _ => false,
        }
    }
}

/// Classifies a raw CDP `{code, message}` error object, folding the
/// "object id from a cleared execution context" case into `ContextLost`
/// rather than a generic `ProtocolError` so call sites can match on it.
pub fn classify_protocol_error(code: i64, message: String) -> CdpError {
    if code == -32000 || message.contains("Cannot find context") {
        CdpError::ContextLost
    } else {
        CdpError::ProtocolError { code, message }
    }
}

pub type Result<T, E = CdpError> = std::result::Result<T, E>;

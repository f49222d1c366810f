//! Assigns sequence ids, correlates replies to waiters, enforces timeouts
//! (spec §4.2). Grounded on `src/handler/mod.rs`'s `pending_commands` table
//! and `src/handler/cmd.rs`'s `CommandChain`, reworked around
//! `tokio::sync::oneshot` waiters instead of a hand-polled state machine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHashMap;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{classify_protocol_error, CdpError};
use crate::protocol::{CallId, CommandEnvelope, ProtocolErrorBody};
use crate::transport::TransportWriter;

type Waiter = oneshot::Sender<Result<Value, CdpError>>;

struct Inner {
    writer: TransportWriter,
    next_id: AtomicU64,
    /// Keyed on the `CallId` newtype (spec §4.2, "a `CallId` newtype like
    /// `chromiumoxide_types::CallId`"), not a raw `u64`, so a stray `u64`
    /// from unrelated bookkeeping can never be mistaken for a pending reply
    /// slot key.
    pending: Mutex<FnvHashMap<CallId, Waiter>>,
    enabled_domains: Mutex<HashSet<String>>,
    /// Set when `Target.attachedToTarget` fires for a `page` target; cleared
    /// on `Target.detachedFromTarget` (spec §4.2).
    session_id: Mutex<Option<String>>,
}

/// Command Dispatcher. Cheaply `Clone`-able (an `Arc` inside) so every
/// monitor task can hold its own handle.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(writer: TransportWriter) -> Self {
        Self {
            inner: Arc::new(Inner {
                writer,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(FnvHashMap::default()),
                enabled_domains: Mutex::new(HashSet::new()),
                session_id: Mutex::new(None),
            }),
        }
    }

    pub async fn set_session_id(&self, id: Option<String>) {
        *self.inner.session_id.lock().await = id;
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().await.clone()
    }

    fn next_call_id(&self) -> CallId {
        CallId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn write_command(&self, id: CallId, method: &str, params: Option<Value>) -> Result<(), CdpError> {
        let session_id = self.session_id().await;
        let envelope = CommandEnvelope {
            id,
            method: method.to_string().into(),
            params,
            session_id,
        };
        let text = serde_json::to_string(&envelope)?;
        debug!(%method, id = id.0, "submit command");
        self.inner.writer.send_text(text).await
    }

    /// Assigns the next sequence id, writes the envelope, and returns the id
    /// without waiting for a reply.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<CallId, CdpError> {
        let id = self.next_call_id();
        self.write_command(id, method, params).await?;
        Ok(id)
    }

    /// As [`Dispatcher::send`], but registers a one-shot completion slot and
    /// waits up to `timeout` for the matching reply.
    pub async fn send_and_wait(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = self.next_call_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        if let Err(err) = self.write_command(id, method, params).await {
            self.inner.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(CdpError::Closed),
            Err(_elapsed) => {
                self.inner.pending.lock().await.remove(&id);
                debug!(%method, id = id.0, "command timed out, waiter removed");
                Err(CdpError::Timeout)
            }
        }
    }

    /// Idempotent: returns immediately if `name` is already enabled.
    pub async fn enable_domain(&self, name: &str, timeout: Duration) -> Result<(), CdpError> {
        if self.inner.enabled_domains.lock().await.contains(name) {
            return Ok(());
        }
        let method = format!("{name}.enable");
        self.send_and_wait(&method, None, timeout).await?;
        self.inner.enabled_domains.lock().await.insert(name.to_string());
        Ok(())
    }

    /// Resolves a pending waiter with the reply the Coordinator just read
    /// off the wire. A reply with no matching waiter (already timed out, or
    /// never registered because it was a fire-and-forget `send`) is dropped
    /// with a debug log, not an error.
    pub async fn resolve(&self, id: u64, result: Option<Value>, error: Option<ProtocolErrorBody>) {
        let id = CallId::new(id);
        let waiter = self.inner.pending.lock().await.remove(&id);
        let Some(waiter) = waiter else {
            debug!(id = id.0, "reply for unknown or already-resolved command id");
            return;
        };
        let resolved = if let Some(err) = error {
            Err(classify_protocol_error(err.code, err.message))
        } else {
            Ok(result.unwrap_or(Value::Null))
        };
        let _ = waiter.send(resolved);
    }

    /// Resolves every still-pending waiter with `Closed`, cascading a
    /// transport shutdown through the pending-reply table (spec §5).
    pub async fn close_all_pending(&self) {
        let mut pending = self.inner.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(Err(CdpError::Closed));
        }
    }

    pub async fn close(&self) {
        self.close_all_pending().await;
        self.inner.writer.close().await;
    }
}

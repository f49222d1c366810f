//! The four independent monitors (spec §4.3-§4.6) plus the shared context
//! they're driven through.
//!
//! Design note (spec §9, "Polymorphic monitor dispatch"): the monitors form
//! a small closed set, so the Coordinator dispatches to them directly
//! rather than through an open-ended registry — but each monitor still
//! implements a uniform `handles`/`handle` pair so the routing rule in
//! `Session::route_event` reads the same for all four.

pub mod interaction;
pub mod network;
pub mod storage;
pub mod window_properties;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::events::CaptureEvent;
use crate::stats::SessionStats;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The host-supplied event callback (spec §6). Boxed and `Arc`-shared so
/// every monitor, and every task a monitor spawns, can invoke it.
pub type EventCallback = Arc<dyn Fn(CaptureEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Resources shared by every monitor: a `Dispatcher` handle to issue CDP
/// commands, the event callback, a shared capture-sequence counter, and the
/// session configuration.
#[derive(Clone)]
pub struct MonitorContext {
    pub dispatcher: Dispatcher,
    pub emit: EventCallback,
    pub sequence: Arc<AtomicU64>,
    pub config: Arc<SessionConfig>,
    /// Cheap read-only counters backing [`crate::session::Session::summary`].
    /// Updated directly by monitors; never read by them.
    pub stats: Arc<SessionStats>,
}

impl MonitorContext {
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands `event` to the host callback on a detached task so a slow (or
    /// wedged) host callback never stalls frame routing (spec §6, §7
    /// `CallbackFailed` is about the callback's own panics/errors, not about
    /// blocking the caller).
    pub fn emit(&self, event: CaptureEvent) {
        let emit = self.emit.clone();
        tokio::spawn(async move {
            (emit)(event).await;
        });
    }
}

/// A raw inbound CDP event, already split into method/params by the
/// Coordinator.
pub struct RawEvent<'a> {
    pub method: &'a str,
    pub params: Value,
    pub session_id: Option<&'a str>,
}

/// Uniform interface each monitor exposes to the Coordinator's routing
/// rule (spec §4.7 rule 3: "ask each monitor in turn whether it handles the
/// method — the first to claim it wins").
pub trait Monitor {
    /// `true` if this monitor owns `method`. Must be side-effect-free.
    fn handles(&self, method: &str) -> bool;

    /// Handle an event already claimed via [`Monitor::handles`]. Must never
    /// block on a CDP round-trip; monitors that need one spawn a detached
    /// task via `ctx.dispatcher.clone()`.
    fn handle(&mut self, ctx: &MonitorContext, event: RawEvent<'_>);

    /// Flush in-flight aggregates when the session is shutting down (spec
    /// §4.7). Idempotent.
    fn finalize(&mut self, ctx: &MonitorContext);
}

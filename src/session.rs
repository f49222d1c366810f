//! The Session Coordinator (spec §4.7): owns the transport, routes inbound
//! frames, drives the four monitors, and finalizes the session cleanly.
//! Grounded on `src/handler/mod.rs`'s single-reader-loop shape, reworked
//! around `tokio::spawn` + `tokio::sync::Mutex` instead of the teacher's
//! hand-polled `Handler: Stream` state machine (spec §9).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::error::CdpError;
use crate::monitors::interaction::InteractionMonitor;
use crate::monitors::network::NetworkMonitor;
use crate::monitors::storage::StorageMonitor;
use crate::monitors::window_properties::WindowPropertyMonitor;
use crate::monitors::{EventCallback, Monitor, MonitorContext, RawEvent};
use crate::protocol::InboundFrame;
use crate::stats::{SessionStats, SessionSummary};
use crate::transport::{self, TransportReader};

/// The CDP domains enabled during startup (spec §4.7).
const STARTUP_DOMAINS: &[&str] = &["Page", "Runtime", "Network", "DOMStorage", "DOM", "Target"];

#[derive(Default)]
struct Monitors {
    network: NetworkMonitor,
    storage: StorageMonitor,
    window_properties: WindowPropertyMonitor,
    interaction: InteractionMonitor,
}

impl Monitors {
    /// Asks each monitor in turn whether it claims `event.method`; the
    /// first to claim it wins (spec §4.7 rule 3).
    fn route(&mut self, ctx: &MonitorContext, event: RawEvent<'_>) -> bool {
        if self.network.handles(event.method) {
            self.network.handle(ctx, event);
            return true;
        }
        if self.storage.handles(event.method) {
            self.storage.handle(ctx, event);
            return true;
        }
        if self.window_properties.handles(event.method) {
            self.window_properties.handle(ctx, event);
            return true;
        }
        if self.interaction.handles(event.method) {
            self.interaction.handle(ctx, event);
            return true;
        }
        false
    }

    fn finalize(&mut self, ctx: &MonitorContext) {
        self.network.finalize(ctx);
        self.storage.finalize(ctx);
        self.window_properties.finalize(ctx);
        self.interaction.finalize(ctx);
    }
}

/// Shared pieces the reader loop and `Session::finalize` both need; cloning
/// it clones only `Arc`s.
#[derive(Clone)]
struct Coordinator {
    dispatcher: Dispatcher,
    ctx: MonitorContext,
    monitors: Arc<Mutex<Monitors>>,
    finalized: Arc<AtomicBool>,
    finalize_grace: Duration,
}

impl Coordinator {
    async fn route_event(&self, method: &str, params: Value, session_id: Option<String>) {
        match method {
            "Target.attachedToTarget" => {
                let is_page = params
                    .get("targetInfo")
                    .and_then(|t| t.get("type"))
                    .and_then(Value::as_str)
                    == Some("page");
                if is_page {
                    let sid = params.get("sessionId").and_then(Value::as_str).map(str::to_string);
                    self.dispatcher.set_session_id(sid).await;
                    return;
                }
            }
            "Target.detachedFromTarget" => {
                self.dispatcher.set_session_id(None).await;
                return;
            }
            // Both the Storage Monitor (re-poll cookies, spec §4.4) and the
            // Window-Property Monitor (re-arm readiness, spec §4.5) need this
            // event, so it's the one deliberate exception to the "first
            // monitor to claim a method wins" rule (spec §4.7 rule 3) — it's
            // broadcast to both instead of routed to a single owner.
            "Page.frameNavigated" => {
                let sid = session_id.as_deref();
                let mut guard = self.monitors.lock().await;
                guard.storage.handle(
                    &self.ctx,
                    RawEvent {
                        method,
                        params: params.clone(),
                        session_id: sid,
                    },
                );
                guard.window_properties.handle(
                    &self.ctx,
                    RawEvent {
                        method,
                        params,
                        session_id: sid,
                    },
                );
                return;
            }
            _ => {}
        }

        let raw = RawEvent {
            method,
            params,
            session_id: session_id.as_deref(),
        };
        let handled = {
            let mut guard = self.monitors.lock().await;
            guard.route(&self.ctx, raw)
        };
        if !handled {
            debug!(%method, "dropping unrouted CDP event");
        }
    }

    /// Idempotent: a second call returns the same summary without
    /// re-running monitor teardown (spec §8, "finalize is idempotent").
    async fn finalize(&self) -> SessionSummary {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return self.ctx.stats.snapshot();
        }
        {
            let mut guard = self.monitors.lock().await;
            guard.finalize(&self.ctx);
        }
        tokio::time::sleep(self.finalize_grace).await;
        self.dispatcher.close().await;
        self.ctx.stats.snapshot()
    }
}

async fn run_reader_loop(mut reader: TransportReader, coordinator: Coordinator) {
    loop {
        match reader.next_frame().await {
            Ok(Some(InboundFrame::Reply { id, result, error })) => {
                coordinator.dispatcher.resolve(id, result, error).await;
            }
            Ok(Some(InboundFrame::Event {
                method,
                params,
                session_id,
            })) => {
                coordinator.route_event(&method, params, session_id).await;
            }
            Ok(None) => {
                debug!("CDP transport closed, finalizing session");
                break;
            }
            Err(err) => {
                warn!(error = %err, "CDP transport read error, finalizing session");
                break;
            }
        }
    }
    coordinator.finalize().await;
}

/// One captured browser session: a single long-lived CDP WebSocket plus the
/// four monitors driven off it (spec §3 `Session`).
pub struct Session {
    coordinator: Coordinator,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    config: Arc<SessionConfig>,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    /// Opens the transport, enables the startup domain set, installs the
    /// interaction script, and starts routing inbound frames (spec §4.7
    /// startup sequence).
    pub async fn connect(
        page_ws_url: &str,
        on_event: EventCallback,
        config: SessionConfig,
    ) -> Result<Self, CdpError> {
        let (reader, writer) = transport::connect(page_ws_url).await?;
        let dispatcher = Dispatcher::new(writer);
        let config = Arc::new(config);
        let stats = Arc::new(SessionStats::default());
        let sequence = Arc::new(AtomicU64::new(0));

        let ctx = MonitorContext {
            dispatcher: dispatcher.clone(),
            emit: on_event,
            sequence,
            config: config.clone(),
            stats,
        };

        let setup_timeout = Duration::from_millis(config.command_default_timeout_ms);
        for domain in STARTUP_DOMAINS {
            dispatcher.enable_domain(domain, setup_timeout).await?;
        }

        let mut monitors = Monitors::default();
        monitors.interaction.start(&ctx);
        monitors.storage.start(&ctx);
        monitors.window_properties.start(&ctx);
        let monitors = Arc::new(Mutex::new(monitors));

        let coordinator = Coordinator {
            dispatcher: dispatcher.clone(),
            ctx,
            monitors,
            finalized: Arc::new(AtomicBool::new(false)),
            finalize_grace: Duration::from_millis(config.finalize_grace_ms),
        };

        let reader_task = tokio::spawn(run_reader_loop(reader, coordinator.clone()));

        Ok(Self {
            coordinator,
            reader_task: Mutex::new(Some(reader_task)),
            config,
            started_at: chrono::Utc::now(),
        })
    }

    /// Cheap read accessor; never traverses emitted-event history (spec
    /// §4.7 `summary()`).
    pub fn summary(&self) -> SessionSummary {
        self.coordinator.ctx.stats.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    /// Cancels the inbound reader, flushes every monitor's in-flight
    /// aggregates, and closes the transport. Idempotent and safe after a
    /// transport failure (spec §4.7, §8).
    pub async fn finalize(&self) -> SessionSummary {
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        self.coordinator.finalize().await
    }
}

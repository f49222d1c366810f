//! Recursive `window` object walker with navigation-safe abort handling
//! (spec §4.5). Ported from `original_source/web_hacker/cdp/window_property_monitor.py`
//! (the spec itself is silent on the native/application classification
//! heuristic and the exact recursion shape, so the original's behavior is
//! authoritative here) into the teacher's "spawn a background task, touch
//! only what that task owns" idiom used throughout `src/handler/*`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::CdpError;
use crate::events::{CaptureEvent, PropertyChange, PropertyScalar, WindowPropertyEvent};
use crate::monitors::{Monitor, MonitorContext, RawEvent};

const NATIVE_PREFIXES: &[&str] = &[
    "HTML", "SVG", "MathML", "RTC", "IDB", "Media", "Audio", "Video", "WebGL", "Canvas",
    "Crypto", "File", "Blob", "Form", "Input", "Mutation", "Intersection", "Resize",
    "Performance", "Navigation", "Storage", "Location", "History", "Navigator", "Screen",
    "Window", "Document", "Element", "Node", "Event", "Promise", "Array", "String", "Number",
    "Boolean", "Date", "RegExp", "Error", "Function", "Map", "Set", "WeakMap", "WeakSet",
    "Proxy", "Reflect", "Symbol", "Intl", "JSON", "Math", "Console", "TextEncoder",
    "TextDecoder", "ReadableStream", "WritableStream", "TransformStream", "AbortController",
    "URL", "URLSearchParams", "Headers", "Request", "Response", "Fetch", "Worker",
    "SharedWorker", "ServiceWorker", "BroadcastChannel", "MessageChannel", "MessagePort",
    "ImageData", "ImageBitmap", "OffscreenCanvas", "Path2D", "CanvasGradient", "CanvasPattern",
    "Geolocation", "Notification", "PushManager", "Cache", "IndexedDB",
];

const NATIVE_GLOBALS: &[&str] = &[
    "window", "self", "top", "parent", "frames", "document", "navigator", "location",
    "history", "screen", "console", "localStorage", "sessionStorage", "indexedDB", "caches",
    "performance", "fetch", "XMLHttpRequest", "WebSocket", "Blob", "File", "FileReader",
    "FormData", "URL", "URLSearchParams", "Headers", "Request", "Response", "AbortController",
    "Event", "CustomEvent", "Promise", "Map", "Set", "WeakMap", "WeakSet", "Proxy", "Reflect",
    "Symbol", "Intl", "JSON", "Math", "Date", "RegExp", "Error", "Array", "String", "Number",
    "Boolean", "Object", "Function", "ArrayBuffer", "DataView", "Int8Array", "Uint8Array",
    "Int16Array", "Uint16Array", "Int32Array", "Uint32Array", "Float32Array", "Float64Array",
];

fn is_application_object(class_name: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if !class_name.is_empty() && NATIVE_PREFIXES.iter().any(|p| class_name.starts_with(p)) {
        return false;
    }
    const NAME_NATIVE_PREFIXES: &[&str] =
        &["HTML", "SVG", "RTC", "IDB", "WebGL", "Media", "Audio", "Video"];
    if NAME_NATIVE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    if NATIVE_GLOBALS.contains(&name) {
        return false;
    }
    true
}

struct WalkState {
    last_values: HashMap<String, PropertyScalar>,
    last_seen_keys: HashSet<String>,
}

pub struct WindowPropertyMonitor {
    state: Arc<Mutex<WalkState>>,
    page_ready: Arc<AtomicBool>,
    collecting: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    pending_navigation: Arc<AtomicBool>,
    scheduler_started: bool,
}

impl Default for WindowPropertyMonitor {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(WalkState {
                last_values: HashMap::new(),
                last_seen_keys: HashSet::new(),
            })),
            page_ready: Arc::new(AtomicBool::new(false)),
            collecting: Arc::new(AtomicBool::new(false)),
            abort: Arc::new(AtomicBool::new(false)),
            pending_navigation: Arc::new(AtomicBool::new(false)),
            scheduler_started: false,
        }
    }
}

impl WindowPropertyMonitor {
    /// Starts the fixed-interval scheduler. Navigation events trigger an
    /// out-of-band collection independent of this ticker (spec §4.5).
    pub fn start(&mut self, ctx: &MonitorContext) {
        if self.scheduler_started {
            return;
        }
        self.scheduler_started = true;
        let ctx = ctx.clone();
        let page_ready = self.page_ready.clone();
        let collecting = self.collecting.clone();
        let abort = self.abort.clone();
        let pending_navigation = self.pending_navigation.clone();
        let state = self.state.clone();
        let interval = Duration::from_millis(ctx.config.window_property_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if page_ready.load(Ordering::SeqCst) && !collecting.load(Ordering::SeqCst) {
                    spawn_collection(
                        ctx.clone(),
                        state.clone(),
                        collecting.clone(),
                        abort.clone(),
                        pending_navigation.clone(),
                    );
                }
            }
        });
    }

    fn on_execution_contexts_cleared(&mut self) {
        self.page_ready.store(false, Ordering::SeqCst);
        if self.collecting.load(Ordering::SeqCst) {
            self.abort.store(true, Ordering::SeqCst);
            self.pending_navigation.store(true, Ordering::SeqCst);
        }
    }

    fn on_page_ready_signal(&mut self, ctx: &MonitorContext) {
        self.page_ready.store(true, Ordering::SeqCst);
        if self.collecting.load(Ordering::SeqCst) {
            self.pending_navigation.store(true, Ordering::SeqCst);
        } else {
            spawn_collection(
                ctx.clone(),
                self.state.clone(),
                self.collecting.clone(),
                self.abort.clone(),
                self.pending_navigation.clone(),
            );
        }
    }
}

fn spawn_collection(
    ctx: MonitorContext,
    state: Arc<Mutex<WalkState>>,
    collecting: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    pending_navigation: Arc<AtomicBool>,
) {
    if collecting.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        abort.store(false, Ordering::SeqCst);
        if let Err(err) = collect_once(&ctx, &state, &abort).await {
            // A call timeout here is an expected abort signal during
            // navigation churn (spec §4.5/§7), recovered locally on the next
            // tick or navigation signal — not worth error-level noise.
            if !err.is_context_lost() && !matches!(err, CdpError::Timeout) {
                error!(error = %err, "window property collection failed");
            } else {
                debug!(error = %err, "window property collection aborted");
            }
        }
        abort.store(false, Ordering::SeqCst);
        collecting.store(false, Ordering::SeqCst);

        if pending_navigation.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(500)).await;
            spawn_collection(ctx, state, collecting, abort, pending_navigation);
        }
    });
}

async fn collect_once(
    ctx: &MonitorContext,
    state: &Arc<Mutex<WalkState>>,
    abort: &AtomicBool,
) -> Result<(), CdpError> {
    let call_timeout = Duration::from_millis(ctx.config.window_property_call_timeout_ms);
    let root_timeout = call_timeout * 2;

    let ready = ctx
        .dispatcher
        .send_and_wait(
            "Runtime.evaluate",
            Some(serde_json::json!({ "expression": "1+1", "returnByValue": true })),
            call_timeout,
        )
        .await;
    if ready.is_err() {
        return Ok(());
    }
    if abort.load(Ordering::SeqCst) {
        return Ok(());
    }

    let current_url = get_current_url(ctx, call_timeout).await;
    if abort.load(Ordering::SeqCst) {
        return Ok(());
    }

    let window_result = ctx
        .dispatcher
        .send_and_wait(
            "Runtime.evaluate",
            Some(serde_json::json!({ "expression": "window", "returnByValue": false })),
            root_timeout,
        )
        .await?;
    let Some(window_object_id) = window_result
        .get("result")
        .and_then(|r| r.get("objectId"))
        .and_then(Value::as_str)
    else {
        return Ok(());
    };
    if abort.load(Ordering::SeqCst) {
        return Ok(());
    }

    let props_result = ctx
        .dispatcher
        .send_and_wait(
            "Runtime.getProperties",
            Some(serde_json::json!({ "objectId": window_object_id, "ownProperties": true })),
            root_timeout,
        )
        .await?;
    if abort.load(Ordering::SeqCst) {
        return Ok(());
    }

    let mut flat = HashMap::new();
    let empty = Vec::new();
    let props = props_result
        .get("result")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    for prop in props {
        if abort.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(name) = prop.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = prop.get("value").cloned().unwrap_or(Value::Null);
        let value_type = value.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let class_name = value.get("className").and_then(Value::as_str).unwrap_or("");

        if !is_application_object(class_name, name) {
            continue;
        }

        match value_type {
            "string" | "number" | "boolean" => {
                if let Some(scalar) = scalar_from(&value) {
                    flat.insert(name.to_string(), scalar);
                }
            }
            "object" => {
                if value.get("subtype").and_then(Value::as_str) == Some("null") {
                    flat.insert(name.to_string(), PropertyScalar::Null);
                } else if let Some(object_id) = value.get("objectId").and_then(Value::as_str) {
                    resolve_object_flat(
                        ctx,
                        object_id,
                        name,
                        &mut flat,
                        &mut HashSet::new(),
                        0,
                        ctx.config.window_property_max_depth,
                        call_timeout,
                        abort,
                    )
                    .await;
                }
            }
            "function" => {}
            _ => {
                if let Some(scalar) = scalar_from(&value) {
                    flat.insert(name.to_string(), scalar);
                }
            }
        }
    }

    let changes = diff_and_update(ctx, state, &flat).await;
    if !changes.is_empty() {
        ctx.emit(CaptureEvent::WindowProperties(WindowPropertyEvent {
            timestamp: chrono::Utc::now(),
            url: current_url,
            changes,
        }));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn resolve_object_flat(
    ctx: &MonitorContext,
    object_id: &str,
    base_path: &str,
    flat: &mut HashMap<String, PropertyScalar>,
    visited: &mut HashSet<String>,
    depth: u32,
    max_depth: u32,
    call_timeout: Duration,
    abort: &AtomicBool,
) {
    if abort.load(Ordering::SeqCst) {
        return;
    }
    if depth > max_depth || visited.contains(object_id) {
        return;
    }
    visited.insert(object_id.to_string());

    let props_result = ctx
        .dispatcher
        .send_and_wait(
            "Runtime.getProperties",
            Some(serde_json::json!({ "objectId": object_id, "ownProperties": true })),
            call_timeout,
        )
        .await;
    if abort.load(Ordering::SeqCst) {
        return;
    }
    let props_result = match props_result {
        Ok(v) => v,
        Err(err) => {
            if !err.is_context_lost() {
                warn!(path = %base_path, error = %err, "error resolving window property object");
            }
            return;
        }
    };

    let empty = Vec::new();
    let props = props_result
        .get("result")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    for prop in props {
        if abort.load(Ordering::SeqCst) {
            return;
        }
        let Some(name) = prop.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = prop.get("value").cloned().unwrap_or(Value::Null);
        let value_type = value.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let class_name = value.get("className").and_then(Value::as_str).unwrap_or("");

        let is_app_obj = is_application_object(class_name, name);
        if depth > 0 && !is_app_obj {
            continue;
        }

        let prop_path = if base_path.is_empty() {
            name.to_string()
        } else {
            format!("{base_path}.{name}")
        };

        match value_type {
            "string" | "number" | "boolean" => {
                if let Some(scalar) = scalar_from(&value) {
                    flat.insert(prop_path, scalar);
                }
            }
            "object" => {
                if value.get("subtype").and_then(Value::as_str) == Some("null") {
                    flat.insert(prop_path, PropertyScalar::Null);
                } else if let Some(nested_id) = value.get("objectId").and_then(Value::as_str) {
                    if is_app_obj {
                        let mut nested_visited = visited.clone();
                        Box::pin(resolve_object_flat(
                            ctx,
                            nested_id,
                            &prop_path,
                            flat,
                            &mut nested_visited,
                            depth + 1,
                            max_depth,
                            call_timeout,
                            abort,
                        ))
                        .await;
                    }
                }
            }
            "function" => {}
            _ => {
                if let Some(scalar) = scalar_from(&value) {
                    flat.insert(prop_path, scalar);
                }
            }
        }
    }
}

fn scalar_from(value: &Value) -> Option<PropertyScalar> {
    let inner = value.get("value")?;
    match inner {
        Value::String(s) => Some(PropertyScalar::String(s.clone())),
        Value::Number(n) => n.as_f64().map(PropertyScalar::Number),
        Value::Bool(b) => Some(PropertyScalar::Bool(*b)),
        Value::Null => Some(PropertyScalar::Null),
        _ => None,
    }
}

async fn get_current_url(ctx: &MonitorContext, timeout: Duration) -> String {
    if let Ok(frame_tree) = ctx
        .dispatcher
        .send_and_wait("Page.getFrameTree", None, timeout)
        .await
    {
        if let Some(url) = frame_tree
            .get("frameTree")
            .and_then(|f| f.get("frame"))
            .and_then(|f| f.get("url"))
            .and_then(Value::as_str)
        {
            return url.to_string();
        }
    }

    for expression in ["window.location.href", "document.location.href"] {
        if let Ok(result) = ctx
            .dispatcher
            .send_and_wait(
                "Runtime.evaluate",
                Some(serde_json::json!({ "expression": expression, "returnByValue": true })),
                timeout,
            )
            .await
        {
            if let Some(url) = result.get("result").and_then(|r| r.get("value")).and_then(Value::as_str) {
                return url.to_string();
            }
        }
    }

    "unknown".to_string()
}

async fn diff_and_update(
    ctx: &MonitorContext,
    state: &Arc<Mutex<WalkState>>,
    flat: &HashMap<String, PropertyScalar>,
) -> Vec<PropertyChange> {
    let mut state = state.lock().await;
    let mut changes = Vec::new();
    let mut current_keys = HashSet::with_capacity(flat.len());

    for (key, value) in flat {
        current_keys.insert(key.clone());
        match state.last_values.get(key) {
            None => {
                changes.push(PropertyChange {
                    path: key.clone(),
                    value: Some(value.clone()),
                });
            }
            Some(previous) if previous != value => {
                changes.push(PropertyChange {
                    path: key.clone(),
                    value: Some(value.clone()),
                });
            }
            _ => {}
        }
        state.last_values.insert(key.clone(), value.clone());
    }

    for key in state.last_seen_keys.clone() {
        if !current_keys.contains(&key) {
            let removed = state.last_values.remove(&key);
            // Only tombstone a path whose history tail is non-null (spec §3,
            // §8 invariant 4): a path last recorded as an actual JS `null`
            // scalar already ends on a null-equivalent entry, so disappearing
            // afterward must not push a second, redundant null.
            if matches!(removed, Some(v) if v != PropertyScalar::Null) {
                changes.push(PropertyChange {
                    path: key,
                    value: None,
                });
            }
        }
    }

    ctx.stats
        .window_paths
        .store(current_keys.len() as i64, Ordering::Relaxed);
    ctx.stats
        .window_history_entries
        .fetch_add(changes.len() as u64, Ordering::Relaxed);
    state.last_seen_keys = current_keys;
    changes
}

impl Monitor for WindowPropertyMonitor {
    fn handles(&self, method: &str) -> bool {
        matches!(
            method,
            "Runtime.executionContextsCleared"
                | "Page.frameNavigated"
                | "Page.domContentEventFired"
                | "Page.loadEventFired"
        )
    }

    fn handle(&mut self, ctx: &MonitorContext, event: RawEvent<'_>) {
        match event.method {
            "Runtime.executionContextsCleared" => self.on_execution_contexts_cleared(),
            "Page.frameNavigated" | "Page.domContentEventFired" | "Page.loadEventFired" => {
                self.on_page_ready_signal(ctx)
            }
            _ => {}
        }
    }

    /// Cuts short any walk already in flight, then — if the page has ever
    /// reached readiness — spawns one last snapshot so the final window-
    /// property state is still captured before teardown (spec §4.7, "run one
    /// last window-property snapshot if readiness permits"). The spawned
    /// walk runs during the Coordinator's finalize grace period.
    fn finalize(&mut self, ctx: &MonitorContext) {
        self.abort.store(true, Ordering::SeqCst);
        if self.page_ready.load(Ordering::SeqCst) && !self.collecting.swap(true, Ordering::SeqCst) {
            let ctx = ctx.clone();
            let state = self.state.clone();
            let abort = self.abort.clone();
            let collecting = self.collecting.clone();
            tokio::spawn(async move {
                abort.store(false, Ordering::SeqCst);
                if let Err(err) = collect_once(&ctx, &state, &abort).await {
                    if !err.is_context_lost() && !matches!(err, CdpError::Timeout) {
                        error!(error = %err, "final window property collection failed");
                    } else {
                        debug!(error = %err, "final window property collection aborted");
                    }
                }
                collecting.store(false, Ordering::SeqCst);
            });
        }
    }
}

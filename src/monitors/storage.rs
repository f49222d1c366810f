//! Cookie polling plus `DOMStorage.*` event handling (spec §4.4). Grounded
//! on `src/handler/network.rs`'s periodic-poll shape (it re-requests cookies
//! on every navigation) and the teacher's general "spawn a background task,
//! diff against the last snapshot" pattern used for frame bookkeeping in
//! `src/handler/frame.rs`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::events::{CaptureEvent, ChangeKind, StorageEvent, StorageScope, TimelineEntry};
use crate::monitors::{Monitor, MonitorContext, RawEvent};

/// `(domain, path, name)` identifies one cookie across polls.
type CookieKey = (String, String, String);

/// `(origin, is_local_storage)` identifies one `DOMStorage` storage area.
type StorageAreaKey = (String, bool);

/// `(scope, key)` identifies one key timeline (spec §3). Cookies compose
/// `domain|path|name` as `key`; DOM storage composes `origin|key`.
type TimelineKey = (StorageScope, String);

/// Everything the diff is exact on (spec §4.4: "value, expiry, httpOnly,
/// secure, and sameSite").
#[derive(Debug, Clone, PartialEq)]
struct CookieSnapshot {
    value: String,
    expires: Option<i64>,
    http_only: bool,
    secure: bool,
    same_site: Option<String>,
}

impl CookieSnapshot {
    fn from_cdp(cookie: &Value) -> Self {
        Self {
            value: cookie.get("value").and_then(Value::as_str).unwrap_or_default().to_string(),
            expires: cookie.get("expires").and_then(Value::as_f64).map(|e| e as i64),
            http_only: cookie.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
            secure: cookie.get("secure").and_then(Value::as_bool).unwrap_or(false),
            same_site: cookie.get("sameSite").and_then(Value::as_str).map(str::to_string),
        }
    }
}

pub struct StorageMonitor {
    last_cookies: std::sync::Arc<Mutex<HashMap<CookieKey, CookieSnapshot>>>,
    known_keys: std::sync::Arc<SyncMutex<HashMap<StorageAreaKey, HashSet<String>>>>,
    timelines: std::sync::Arc<SyncMutex<HashMap<TimelineKey, Vec<TimelineEntry>>>>,
    current_url: std::sync::Arc<SyncMutex<String>>,
    poller_started: bool,
}

impl Default for StorageMonitor {
    fn default() -> Self {
        Self {
            last_cookies: std::sync::Arc::new(Mutex::new(HashMap::new())),
            known_keys: std::sync::Arc::new(SyncMutex::new(HashMap::new())),
            timelines: std::sync::Arc::new(SyncMutex::new(HashMap::new())),
            current_url: std::sync::Arc::new(SyncMutex::new(String::new())),
            poller_started: false,
        }
    }
}

impl StorageMonitor {
    /// Starts the cookie-polling loop. Called once by the Coordinator during
    /// startup; safe to call only once (spec §4.4: cookies have no native
    /// change event, so the core polls at a configurable interval).
    pub fn start(&mut self, ctx: &MonitorContext) {
        if self.poller_started {
            return;
        }
        self.poller_started = true;
        let ctx = ctx.clone();
        let last_cookies = self.last_cookies.clone();
        let timelines = self.timelines.clone();
        let current_url = self.current_url.clone();
        let interval = Duration::from_millis(ctx.config.cookie_poll_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await {
                    warn!(error = %err, "cookie poll failed");
                }
            }
        });
    }

    fn on_dom_storage_item_added(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some((origin, is_local)) = storage_id(params) else { return };
        let Some(key) = params.get("key").and_then(Value::as_str) else { return };
        let new_value = params.get("newValue").and_then(Value::as_str).map(str::to_string);

        let inserted = self
            .known_keys
            .lock()
            .unwrap()
            .entry((origin.clone(), is_local))
            .or_default()
            .insert(key.to_string());
        if inserted {
            bump_key_count(ctx, is_local, 1);
        }
        self.append_timeline(is_local, &origin, key, new_value.clone());
        let sequence = ctx.next_sequence();
        ctx.emit(CaptureEvent::Storage(StorageEvent::StorageKeyAdded {
            sequence,
            timestamp: chrono::Utc::now(),
            origin,
            is_local_storage: is_local,
            key: key.to_string(),
            new_value,
        }));
    }

    fn on_dom_storage_item_removed(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some((origin, is_local)) = storage_id(params) else { return };
        let Some(key) = params.get("key").and_then(Value::as_str) else { return };

        let removed = self
            .known_keys
            .lock()
            .unwrap()
            .get_mut(&(origin.clone(), is_local))
            .map(|set| set.remove(key))
            .unwrap_or(false);
        if removed {
            bump_key_count(ctx, is_local, -1);
        }
        self.append_timeline(is_local, &origin, key, None);
        let sequence = ctx.next_sequence();
        ctx.emit(CaptureEvent::Storage(StorageEvent::StorageKeyRemoved {
            sequence,
            timestamp: chrono::Utc::now(),
            origin,
            is_local_storage: is_local,
            key: key.to_string(),
            old_value: None,
        }));
    }

    fn on_dom_storage_item_updated(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some((origin, is_local)) = storage_id(params) else { return };
        let Some(key) = params.get("key").and_then(Value::as_str) else { return };
        let old_value = params.get("oldValue").and_then(Value::as_str).map(str::to_string);
        let new_value = params.get("newValue").and_then(Value::as_str).map(str::to_string);

        self.append_timeline(is_local, &origin, key, new_value.clone());
        let sequence = ctx.next_sequence();
        ctx.emit(CaptureEvent::Storage(StorageEvent::StorageKeyUpdated {
            sequence,
            timestamp: chrono::Utc::now(),
            origin,
            is_local_storage: is_local,
            key: key.to_string(),
            old_value,
            new_value,
        }));
    }

    fn on_dom_storage_items_cleared(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some((origin, is_local)) = storage_id(params) else { return };
        let cleared = self
            .known_keys
            .lock()
            .unwrap()
            .remove(&(origin.clone(), is_local))
            .unwrap_or_default();
        bump_key_count(ctx, is_local, -(cleared.len() as i64));
        for key in cleared {
            self.append_timeline(is_local, &origin, &key, None);
            let sequence = ctx.next_sequence();
            ctx.emit(CaptureEvent::Storage(StorageEvent::StorageKeyRemoved {
                sequence,
                timestamp: chrono::Utc::now(),
                origin: origin.clone(),
                is_local_storage: is_local,
                key,
                old_value: None,
            }));
        }
    }

    /// `Page.frameNavigated` for the main frame updates the URL attached to
    /// subsequent timeline entries and, per spec §4.4, triggers an
    /// out-of-band cookie poll (HTTP-only cookies can change across a
    /// navigation with no DOM-visible trace).
    fn on_frame_navigated(&mut self, ctx: &MonitorContext, params: &Value) {
        let frame = params.get("frame").unwrap_or(&Value::Null);
        let is_main_frame = frame.get("parentId").is_none();
        let Some(url) = frame.get("url").and_then(Value::as_str) else { return };
        if is_main_frame {
            *self.current_url.lock().unwrap() = url.to_string();
        }

        let ctx = ctx.clone();
        let last_cookies = self.last_cookies.clone();
        let timelines = self.timelines.clone();
        let current_url = self.current_url.clone();
        tokio::spawn(async move {
            if let Err(err) = poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await {
                warn!(error = %err, "post-navigation cookie poll failed");
            }
        });
    }

    /// Appends `(timestamp, value, source_url)` to the `(scope, key)`
    /// timeline for a DOM storage mutation (spec §3, §4.4).
    fn append_timeline(&self, is_local: bool, origin: &str, key: &str, value: Option<String>) {
        let scope = if is_local {
            StorageScope::LocalStorage
        } else {
            StorageScope::SessionStorage
        };
        let timeline_key = format!("{origin}|{key}");
        let source_url = self.current_url.lock().unwrap().clone();
        self.timelines
            .lock()
            .unwrap()
            .entry((scope, timeline_key))
            .or_default()
            .push(TimelineEntry {
                timestamp: chrono::Utc::now(),
                value,
                source_url,
            });
    }

    /// The recorded `(timestamp, value, source_url)` history for one
    /// `(scope, key)` pair (spec §3). `key` is `origin|key` for DOM storage
    /// scopes and `domain|path|name` for cookies.
    pub fn timeline(&self, scope: StorageScope, key: &str) -> Vec<TimelineEntry> {
        self.timelines
            .lock()
            .unwrap()
            .get(&(scope, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// `Storage.indexedDBContentUpdated` is emitted only while the frontend
    /// holds a debugger attached to IndexedDB, so this is best-effort (spec
    /// §4.4 Non-goals).
    fn on_indexed_db_content_updated(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(origin) = params.get("origin").and_then(Value::as_str) else { return };
        let database_name = params
            .get("databaseName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object_store_name = params
            .get("objectStoreName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let sequence = ctx.next_sequence();
        ctx.emit(CaptureEvent::Storage(StorageEvent::IndexedDbChanged {
            sequence,
            timestamp: chrono::Utc::now(),
            origin: origin.to_string(),
            database_name,
            object_store_name,
        }));
    }
}

fn bump_key_count(ctx: &MonitorContext, is_local: bool, delta: i64) {
    let counter = if is_local {
        &ctx.stats.local_storage_keys
    } else {
        &ctx.stats.session_storage_keys
    };
    if delta >= 0 {
        counter.fetch_add(delta, std::sync::atomic::Ordering::Relaxed);
    } else {
        counter.fetch_sub(-delta, std::sync::atomic::Ordering::Relaxed);
    }
}

fn storage_id(params: &Value) -> Option<(String, bool)> {
    let storage_id = params.get("storageId")?;
    let origin = storage_id
        .get("securityOrigin")
        .and_then(Value::as_str)?
        .to_string();
    let is_local = storage_id
        .get("isLocalStorage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some((origin, is_local))
}

async fn poll_cookies(
    ctx: &MonitorContext,
    last_cookies: &std::sync::Arc<Mutex<HashMap<CookieKey, CookieSnapshot>>>,
    timelines: &std::sync::Arc<SyncMutex<HashMap<TimelineKey, Vec<TimelineEntry>>>>,
    current_url: &std::sync::Arc<SyncMutex<String>>,
) -> Result<(), crate::error::CdpError> {
    let result = ctx
        .dispatcher
        .send_and_wait(
            "Network.getAllCookies",
            None,
            Duration::from_millis(ctx.config.command_default_timeout_ms),
        )
        .await?;

    let mut current: HashMap<CookieKey, CookieSnapshot> = HashMap::new();
    if let Some(cookies) = result.get("cookies").and_then(Value::as_array) {
        for cookie in cookies {
            let domain = cookie.get("domain").and_then(Value::as_str).unwrap_or_default();
            let path = cookie.get("path").and_then(Value::as_str).unwrap_or_default();
            let name = cookie.get("name").and_then(Value::as_str).unwrap_or_default();
            current.insert(
                (domain.to_string(), path.to_string(), name.to_string()),
                CookieSnapshot::from_cdp(cookie),
            );
        }
    }

    let mut previous = last_cookies.lock().await;
    let url = current_url.lock().unwrap().clone();

    for (key, new_snapshot) in current.iter() {
        match previous.get(key) {
            None => {
                append_cookie_timeline(timelines, key, Some(new_snapshot.value.clone()), url.clone());
                emit_cookie_change(ctx, key, ChangeKind::Added, None, Some(new_snapshot.value.clone()));
            }
            // Exact on value, expiry, httpOnly, secure, and sameSite (spec
            // §4.4) — a cookie re-issued with the same value but a changed
            // flag (e.g. Secure+HttpOnly added after login) still counts as
            // a modification.
            Some(old_snapshot) if old_snapshot != new_snapshot => {
                append_cookie_timeline(timelines, key, Some(new_snapshot.value.clone()), url.clone());
                emit_cookie_change(
                    ctx,
                    key,
                    ChangeKind::Modified,
                    Some(old_snapshot.value.clone()),
                    Some(new_snapshot.value.clone()),
                );
            }
            _ => {}
        }
    }
    for (key, old_snapshot) in previous.iter() {
        if !current.contains_key(key) {
            append_cookie_timeline(timelines, key, None, url.clone());
            emit_cookie_change(ctx, key, ChangeKind::Removed, Some(old_snapshot.value.clone()), None);
        }
    }

    ctx.stats
        .cookies
        .store(current.len() as i64, std::sync::atomic::Ordering::Relaxed);
    *previous = current;
    Ok(())
}

/// Appends `(timestamp, value, source_url)` to the cookie timeline keyed by
/// `domain|path|name` (spec §3's `scope = cookie` key timeline).
fn append_cookie_timeline(
    timelines: &std::sync::Arc<SyncMutex<HashMap<TimelineKey, Vec<TimelineEntry>>>>,
    key: &CookieKey,
    value: Option<String>,
    source_url: String,
) {
    let (domain, path, name) = key.clone();
    let timeline_key = format!("{domain}|{path}|{name}");
    timelines
        .lock()
        .unwrap()
        .entry((StorageScope::Cookie, timeline_key))
        .or_default()
        .push(TimelineEntry {
            timestamp: chrono::Utc::now(),
            value,
            source_url,
        });
}

fn emit_cookie_change(
    ctx: &MonitorContext,
    key: &CookieKey,
    change: ChangeKind,
    old_value: Option<String>,
    new_value: Option<String>,
) {
    let (domain, path, name) = key.clone();
    let sequence = ctx.next_sequence();
    ctx.emit(CaptureEvent::Storage(StorageEvent::CookieChanged {
        sequence,
        timestamp: chrono::Utc::now(),
        domain,
        path,
        name,
        change,
        old_value,
        new_value,
    }));
}

impl Monitor for StorageMonitor {
    fn handles(&self, method: &str) -> bool {
        matches!(
            method,
            "DOMStorage.domStorageItemAdded"
                | "DOMStorage.domStorageItemRemoved"
                | "DOMStorage.domStorageItemUpdated"
                | "DOMStorage.domStorageItemsCleared"
                | "Storage.indexedDBContentUpdated"
                | "Page.frameNavigated"
        )
    }

    fn handle(&mut self, ctx: &MonitorContext, event: RawEvent<'_>) {
        match event.method {
            "DOMStorage.domStorageItemAdded" => self.on_dom_storage_item_added(ctx, &event.params),
            "DOMStorage.domStorageItemRemoved" => {
                self.on_dom_storage_item_removed(ctx, &event.params)
            }
            "DOMStorage.domStorageItemUpdated" => {
                self.on_dom_storage_item_updated(ctx, &event.params)
            }
            "DOMStorage.domStorageItemsCleared" => {
                self.on_dom_storage_items_cleared(ctx, &event.params)
            }
            "Storage.indexedDBContentUpdated" => {
                self.on_indexed_db_content_updated(ctx, &event.params)
            }
            "Page.frameNavigated" => self.on_frame_navigated(ctx, &event.params),
            _ => {}
        }
    }

    /// Spawns one last cookie poll so a diff that only the browser's final
    /// state would reveal is still flushed before teardown (spec §4.7,
    /// "flush cookie diffs"). The cookie poller's own background loop is tied
    /// to the process, not this monitor's lifetime; the Coordinator stops
    /// routing events to it once the session closes, which is enough for it
    /// to go quiet on its own.
    fn finalize(&mut self, ctx: &MonitorContext) {
        let ctx = ctx.clone();
        let last_cookies = self.last_cookies.clone();
        let timelines = self.timelines.clone();
        let current_url = self.current_url.clone();
        tokio::spawn(async move {
            if let Err(err) = poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await {
                warn!(error = %err, "final cookie poll failed during finalize");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::dispatcher::Dispatcher;
    use crate::monitors::EventCallback;
    use crate::stats::SessionStats;
    use crate::transport::TransportWriter;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_ctx() -> (MonitorContext, mpsc::UnboundedReceiver<String>, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (writer, cmd_rx) = TransportWriter::fake();
        let dispatcher = Dispatcher::new(writer);
        let (tx, event_rx) = mpsc::unbounded_channel();
        let emit: EventCallback = Arc::new(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(event);
            })
        });
        let ctx = MonitorContext {
            dispatcher,
            emit,
            sequence: Arc::new(AtomicU64::new(0)),
            config: Arc::new(SessionConfig::default()),
            stats: Arc::new(SessionStats::default()),
        };
        (ctx, cmd_rx, event_rx)
    }

    #[tokio::test]
    async fn cookie_lifecycle_emits_added_modified_removed() {
        let (ctx, mut cmd_rx, mut event_rx) = test_ctx();
        let last_cookies = std::sync::Arc::new(Mutex::new(HashMap::new()));
        let timelines = std::sync::Arc::new(SyncMutex::new(HashMap::new()));
        let current_url = std::sync::Arc::new(SyncMutex::new("https://example.com/".to_string()));

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            let text = cmd_rx.recv().await.unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(envelope["method"], "Network.getAllCookies");
            let id = envelope["id"].as_u64().unwrap();
            responder_dispatcher
                .resolve(
                    id,
                    Some(serde_json::json!({"cookies": [
                        {"domain": "example.com", "path": "/", "name": "session", "value": "abc"}
                    ]})),
                    None,
                )
                .await;
            cmd_rx
        });
        poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await.unwrap();
        let mut cmd_rx = responder.await.unwrap();
        let added = event_rx.recv().await.unwrap();
        match added {
            CaptureEvent::Storage(StorageEvent::CookieChanged { change, new_value, .. }) => {
                assert_eq!(change, ChangeKind::Added);
                assert_eq!(new_value.as_deref(), Some("abc"));
            }
            other => panic!("expected a cookie-added event, got {other:?}"),
        }
        assert_eq!(ctx.stats.cookies.load(Ordering::Relaxed), 1);

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            let text = cmd_rx.recv().await.unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            let id = envelope["id"].as_u64().unwrap();
            responder_dispatcher
                .resolve(
                    id,
                    Some(serde_json::json!({"cookies": [
                        {"domain": "example.com", "path": "/", "name": "session", "value": "xyz"}
                    ]})),
                    None,
                )
                .await;
            cmd_rx
        });
        poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await.unwrap();
        let mut cmd_rx = responder.await.unwrap();
        let modified = event_rx.recv().await.unwrap();
        match modified {
            CaptureEvent::Storage(StorageEvent::CookieChanged { change, old_value, new_value, .. }) => {
                assert_eq!(change, ChangeKind::Modified);
                assert_eq!(old_value.as_deref(), Some("abc"));
                assert_eq!(new_value.as_deref(), Some("xyz"));
            }
            other => panic!("expected a cookie-modified event, got {other:?}"),
        }

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            let text = cmd_rx.recv().await.unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            let id = envelope["id"].as_u64().unwrap();
            responder_dispatcher
                .resolve(id, Some(serde_json::json!({"cookies": []})), None)
                .await;
        });
        poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await.unwrap();
        responder.await.unwrap();
        let removed = event_rx.recv().await.unwrap();
        match removed {
            CaptureEvent::Storage(StorageEvent::CookieChanged { change, old_value, new_value, .. }) => {
                assert_eq!(change, ChangeKind::Removed);
                assert_eq!(old_value.as_deref(), Some("xyz"));
                assert_eq!(new_value, None);
            }
            other => panic!("expected a cookie-removed event, got {other:?}"),
        }
        assert_eq!(ctx.stats.cookies.load(Ordering::Relaxed), 0);
    }

    /// Spec §4.4: "the diff is exact on value, expiry, httpOnly, secure, and
    /// sameSite" — a cookie re-issued with the same value but a newly-added
    /// `Secure`/`HttpOnly` flag (e.g. after login) must still surface as a
    /// modification, not be silently skipped.
    #[tokio::test]
    async fn cookie_flag_change_with_unchanged_value_emits_modified() {
        let (ctx, mut cmd_rx, mut event_rx) = test_ctx();
        let last_cookies = std::sync::Arc::new(Mutex::new(HashMap::new()));
        let timelines = std::sync::Arc::new(SyncMutex::new(HashMap::new()));
        let current_url = std::sync::Arc::new(SyncMutex::new("https://example.com/".to_string()));

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            let text = cmd_rx.recv().await.unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            let id = envelope["id"].as_u64().unwrap();
            responder_dispatcher
                .resolve(
                    id,
                    Some(serde_json::json!({"cookies": [
                        {"domain": "example.com", "path": "/", "name": "session", "value": "abc",
                         "httpOnly": false, "secure": false}
                    ]})),
                    None,
                )
                .await;
            cmd_rx
        });
        poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await.unwrap();
        let mut cmd_rx = responder.await.unwrap();
        let _added = event_rx.recv().await.unwrap();

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            let text = cmd_rx.recv().await.unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            let id = envelope["id"].as_u64().unwrap();
            responder_dispatcher
                .resolve(
                    id,
                    Some(serde_json::json!({"cookies": [
                        {"domain": "example.com", "path": "/", "name": "session", "value": "abc",
                         "httpOnly": true, "secure": true}
                    ]})),
                    None,
                )
                .await;
        });
        poll_cookies(&ctx, &last_cookies, &timelines, &current_url).await.unwrap();
        responder.await.unwrap();

        let modified = event_rx.recv().await.unwrap();
        match modified {
            CaptureEvent::Storage(StorageEvent::CookieChanged { change, old_value, new_value, .. }) => {
                assert_eq!(change, ChangeKind::Modified);
                assert_eq!(old_value.as_deref(), Some("abc"));
                assert_eq!(new_value.as_deref(), Some("abc"));
            }
            other => panic!("expected a cookie-modified event for a flag-only change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dom_storage_add_then_remove_tracks_key_count() {
        let (ctx, _cmd_rx, mut event_rx) = test_ctx();
        let mut monitor = StorageMonitor::default();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "DOMStorage.domStorageItemAdded",
                params: serde_json::json!({
                    "storageId": {"securityOrigin": "https://example.com", "isLocalStorage": true},
                    "key": "theme",
                    "newValue": "dark",
                }),
                session_id: None,
            },
        );
        assert_eq!(ctx.stats.local_storage_keys.load(Ordering::Relaxed), 1);
        let added = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(added, CaptureEvent::Storage(StorageEvent::StorageKeyAdded { .. })));

        monitor.handle(
            &ctx,
            RawEvent {
                method: "DOMStorage.domStorageItemRemoved",
                params: serde_json::json!({
                    "storageId": {"securityOrigin": "https://example.com", "isLocalStorage": true},
                    "key": "theme",
                }),
                session_id: None,
            },
        );
        assert_eq!(ctx.stats.local_storage_keys.load(Ordering::Relaxed), 0);
        let removed = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(removed, CaptureEvent::Storage(StorageEvent::StorageKeyRemoved { .. })));
    }

    /// Spec §8: for every `(scope, key)` storage timeline, timestamps are
    /// strictly non-decreasing, and a removed key's last entry is a
    /// `None`-valued tombstone.
    #[tokio::test]
    async fn dom_storage_timeline_is_ordered_and_tombstones_on_removal() {
        let (ctx, _cmd_rx, mut event_rx) = test_ctx();
        let mut monitor = StorageMonitor::default();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "DOMStorage.domStorageItemAdded",
                params: serde_json::json!({
                    "storageId": {"securityOrigin": "https://example.com", "isLocalStorage": true},
                    "key": "theme",
                    "newValue": "dark",
                }),
                session_id: None,
            },
        );
        let _ = event_rx.recv().await.unwrap();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "DOMStorage.domStorageItemUpdated",
                params: serde_json::json!({
                    "storageId": {"securityOrigin": "https://example.com", "isLocalStorage": true},
                    "key": "theme",
                    "oldValue": "dark",
                    "newValue": "light",
                }),
                session_id: None,
            },
        );
        let _ = event_rx.recv().await.unwrap();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "DOMStorage.domStorageItemRemoved",
                params: serde_json::json!({
                    "storageId": {"securityOrigin": "https://example.com", "isLocalStorage": true},
                    "key": "theme",
                }),
                session_id: None,
            },
        );
        let _ = event_rx.recv().await.unwrap();

        let history = monitor.timeline(StorageScope::LocalStorage, "https://example.com|theme");
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(history[0].value.as_deref(), Some("dark"));
        assert_eq!(history[1].value.as_deref(), Some("light"));
        assert_eq!(history[2].value, None);
    }

    /// Spec §4.4: `Page.frameNavigated` for the main frame both updates the
    /// source URL attached to later timeline entries and triggers a cookie
    /// re-poll.
    #[tokio::test]
    async fn frame_navigated_updates_url_and_repolls_cookies() {
        let (ctx, mut cmd_rx, _event_rx) = test_ctx();
        let mut monitor = StorageMonitor::default();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "Page.frameNavigated",
                params: serde_json::json!({
                    "frame": {"url": "https://second.example/"},
                }),
                session_id: None,
            },
        );

        let text = tokio::time::timeout(Duration::from_secs(1), cmd_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let envelope: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope["method"], "Network.getAllCookies");
        ctx.dispatcher
            .resolve(envelope["id"].as_u64().unwrap(), Some(serde_json::json!({"cookies": []})), None)
            .await;

        assert_eq!(*monitor.current_url.lock().unwrap(), "https://second.example/");
    }
}

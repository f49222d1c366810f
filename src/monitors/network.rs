//! Assembles fragmented CDP network events into complete transactions with
//! bodies (spec §4.3). Grounded on `src/handler/network.rs`'s
//! `NetworkManager` (which only issued the `Network.enable` init command in
//! the teacher) and `src/handler/frame.rs`'s event-driven state tracking
//! style, generalized here to the full request/response/body lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::events::{
    CaptureEvent, NetworkTransactionEvent, ResponseBody, TransactionFailure, TransactionState,
};
use crate::monitors::{Monitor, MonitorContext, RawEvent};

#[derive(Debug, Clone)]
struct Transaction {
    request_id: String,
    method: String,
    url: String,
    request_headers: HashMap<String, String>,
    request_post_data: Option<String>,
    resource_type: String,
    timing: Option<Value>,
    response_status: Option<i64>,
    response_headers: Option<HashMap<String, String>>,
    mime_type: Option<String>,
    response_body: Option<ResponseBody>,
    failure: Option<TransactionFailure>,
    state: TransactionState,
    body_fetch_outstanding: bool,
    loading_finished: bool,
}

impl Transaction {
    fn new(request_id: String) -> Self {
        Self {
            request_id,
            method: String::new(),
            url: String::new(),
            request_headers: HashMap::new(),
            request_post_data: None,
            resource_type: String::new(),
            timing: None,
            response_status: None,
            response_headers: None,
            mime_type: None,
            response_body: None,
            failure: None,
            state: TransactionState::Pending,
            body_fetch_outstanding: false,
            loading_finished: false,
        }
    }

    fn into_event(self, sequence: u64, timestamp: chrono::DateTime<chrono::Utc>) -> NetworkTransactionEvent {
        NetworkTransactionEvent {
            sequence,
            timestamp,
            request_id: self.request_id,
            method: self.method,
            url: self.url,
            request_headers: self.request_headers,
            request_post_data: self.request_post_data,
            resource_type: self.resource_type,
            timing: self.timing,
            response_status: self.response_status,
            response_headers: self.response_headers,
            mime_type: self.mime_type,
            response_body: self.response_body,
            failure: self.failure,
            state: self.state,
        }
    }
}

/// Tracks every `requestId` currently in flight. Shared with the body-fetch
/// tasks this monitor spawns, but never touched outside this module.
type TransactionTable = Arc<Mutex<HashMap<String, Transaction>>>;

pub struct NetworkMonitor {
    in_flight: TransactionTable,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn headers_from(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

impl NetworkMonitor {
    /// Inserted synchronously: a response for this `requestId` can arrive as
    /// the very next frame, so the entry must exist before this call returns
    /// rather than racing a spawned insert against a spawned response.
    fn on_request_will_be_sent(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let request = params.get("request").cloned().unwrap_or(Value::Null);
        let mut txn = Transaction::new(request_id.to_string());
        txn.method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_string();
        txn.url = request
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        txn.request_headers = headers_from(request.get("headers").unwrap_or(&Value::Null));
        txn.request_post_data = request
            .get("postData")
            .and_then(Value::as_str)
            .map(str::to_string);
        txn.resource_type = params
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("Other")
            .to_string();

        self.in_flight.lock().unwrap().insert(request_id.to_string(), txn);
        ctx.stats
            .network_in_flight
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_request_will_be_sent_extra_info(&mut self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let extra = headers_from(params.get("headers").unwrap_or(&Value::Null));
        if let Some(txn) = self.in_flight.lock().unwrap().get_mut(request_id) {
            txn.request_headers.extend(extra);
        }
    }

    fn on_response_received(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let response = params.get("response").cloned().unwrap_or(Value::Null);
        let status = response.get("status").and_then(Value::as_i64);
        let headers = headers_from(response.get("headers").unwrap_or(&Value::Null));
        let mime = response
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timing = response.get("timing").cloned();

        let should_fetch = {
            let mut guard = self.in_flight.lock().unwrap();
            let Some(txn) = guard.get_mut(&request_id) else {
                return;
            };
            txn.response_status = status;
            txn.response_headers = Some(headers);
            txn.mime_type = mime;
            txn.timing = timing;
            txn.state = TransactionState::Headers;
            let resource_type = txn.resource_type.to_lowercase();
            let capture = ctx.config.capture_resource_types.contains(&resource_type);
            if capture {
                txn.body_fetch_outstanding = true;
            }
            capture
        };
        if should_fetch {
            let table = self.in_flight.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                fetch_body(ctx, table, request_id).await;
            });
        }
    }

    fn on_response_received_extra_info(&mut self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let extra = headers_from(params.get("headers").unwrap_or(&Value::Null));
        if let Some(txn) = self.in_flight.lock().unwrap().get_mut(request_id) {
            let headers = txn.response_headers.get_or_insert_with(HashMap::new);
            headers.extend(extra);
        }
    }

    fn on_loading_finished(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let ready = {
            let mut guard = self.in_flight.lock().unwrap();
            let Some(txn) = guard.get_mut(&request_id) else {
                return;
            };
            txn.loading_finished = true;
            !txn.body_fetch_outstanding
        };
        if ready {
            emit_terminal(ctx, &self.in_flight, &request_id, TransactionState::Completed, None);
        }
    }

    fn on_loading_failed(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let error_text = params
            .get("errorText")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let canceled = params
            .get("canceled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let failure = TransactionFailure { error_text, canceled };
        emit_terminal(ctx, &self.in_flight, request_id, TransactionState::Failed, Some(failure));
    }
}

/// Best-effort `Network.getResponseBody`; failures (e.g. the body has been
/// evicted by the browser) still let the transaction reach a terminal
/// state, just without a body (spec §4.3, §8).
async fn fetch_body(ctx: MonitorContext, table: TransactionTable, request_id: String) {
    let params = serde_json::json!({ "requestId": request_id });
    let result = ctx
        .dispatcher
        .send_and_wait(
            "Network.getResponseBody",
            Some(params),
            Duration::from_millis(ctx.config.command_default_timeout_ms),
        )
        .await;

    let ready = {
        let mut guard = table.lock().unwrap();
        let Some(txn) = guard.get_mut(&request_id) else {
            return;
        };
        match result {
            Ok(value) => {
                let body = value.get("body").and_then(Value::as_str).unwrap_or_default();
                let base64_encoded = value
                    .get("base64Encoded")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                txn.response_body = Some(ResponseBody {
                    body: body.to_string(),
                    base64_encoded,
                });
                txn.state = TransactionState::BodyFetched;
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "response body unavailable");
            }
        }
        txn.body_fetch_outstanding = false;
        txn.loading_finished
    };

    if ready {
        emit_terminal(&ctx, &table, &request_id, TransactionState::Completed, None);
    }
}

fn emit_terminal(
    ctx: &MonitorContext,
    table: &TransactionTable,
    request_id: &str,
    state: TransactionState,
    failure: Option<TransactionFailure>,
) {
    let txn = table.lock().unwrap().remove(request_id);
    let Some(mut txn) = txn else { return };
    txn.state = state;
    if failure.is_some() {
        txn.failure = failure;
    }
    ctx.stats.network_in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    match txn.state {
        TransactionState::Completed => {
            ctx.stats.network_completed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        TransactionState::Failed => {
            ctx.stats.network_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        _ => {}
    }
    let sequence = ctx.next_sequence();
    let event = txn.into_event(sequence, chrono::Utc::now());
    ctx.emit(CaptureEvent::Network(event));
}

impl Monitor for NetworkMonitor {
    fn handles(&self, method: &str) -> bool {
        matches!(
            method,
            "Network.requestWillBeSent"
                | "Network.requestWillBeSentExtraInfo"
                | "Network.responseReceived"
                | "Network.responseReceivedExtraInfo"
                | "Network.loadingFinished"
                | "Network.loadingFailed"
        )
    }

    fn handle(&mut self, ctx: &MonitorContext, event: RawEvent<'_>) {
        match event.method {
            "Network.requestWillBeSent" => self.on_request_will_be_sent(ctx, &event.params),
            "Network.requestWillBeSentExtraInfo" => {
                self.on_request_will_be_sent_extra_info(&event.params)
            }
            "Network.responseReceived" => self.on_response_received(ctx, &event.params),
            "Network.responseReceivedExtraInfo" => {
                self.on_response_received_extra_info(&event.params)
            }
            "Network.loadingFinished" => self.on_loading_finished(ctx, &event.params),
            "Network.loadingFailed" => self.on_loading_failed(ctx, &event.params),
            _ => {}
        }
    }

    fn finalize(&mut self, ctx: &MonitorContext) {
        let remaining: Vec<Transaction> = self.in_flight.lock().unwrap().drain().map(|(_, txn)| txn).collect();
        for mut txn in remaining {
            txn.state = TransactionState::Failed;
            txn.failure = Some(TransactionFailure {
                error_text: "session finalized with request in flight".to_string(),
                canceled: true,
            });
            ctx.stats.network_in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            ctx.stats.network_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let sequence = ctx.next_sequence();
            let event = txn.into_event(sequence, chrono::Utc::now());
            ctx.emit(CaptureEvent::Network(event));
        }
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
    async fn completed_xhr_emits_network_transaction_with_body() {
        let (ctx, mut cmd_rx, mut event_rx) = test_ctx();
        let mut monitor = NetworkMonitor::default();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.requestWillBeSent",
                params: serde_json::json!({
                    "requestId": "req-1",
                    "type": "XHR",
                    "request": {"method": "GET", "url": "https://example.com/api", "headers": {}},
                }),
                session_id: None,
            },
        );

        let responder_dispatcher = ctx.dispatcher.clone();
        let responder = tokio::spawn(async move {
            while let Some(text) = cmd_rx.recv().await {
                let envelope: Value = serde_json::from_str(&text).unwrap();
                if envelope["method"] == "Network.getResponseBody" {
                    let id = envelope["id"].as_u64().unwrap();
                    responder_dispatcher
                        .resolve(
                            id,
                            Some(serde_json::json!({"body": "{\"ok\":true}", "base64Encoded": false})),
                            None,
                        )
                        .await;
                    return;
                }
            }
        });

        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.responseReceived",
                params: serde_json::json!({
                    "requestId": "req-1",
                    "response": {"status": 200, "headers": {}, "mimeType": "application/json"},
                }),
                session_id: None,
            },
        );
        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.loadingFinished",
                params: serde_json::json!({"requestId": "req-1"}),
                session_id: None,
            },
        );

        responder.await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .expect("event emitted")
            .expect("channel open");
        match event {
            CaptureEvent::Network(txn) => {
                assert_eq!(txn.state, TransactionState::Completed);
                assert_eq!(txn.response_body.unwrap().body, "{\"ok\":true}");
                assert_eq!(txn.request_id, "req-1");
            }
            other => panic!("expected a network event, got {other:?}"),
        }
        assert_eq!(ctx.stats.network_completed.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.stats.network_in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn canceled_request_emits_failed_transaction() {
        let (ctx, _cmd_rx, mut event_rx) = test_ctx();
        let mut monitor = NetworkMonitor::default();

        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.requestWillBeSent",
                params: serde_json::json!({
                    "requestId": "req-2",
                    "type": "Fetch",
                    "request": {"method": "GET", "url": "https://example.com/cancel", "headers": {}},
                }),
                session_id: None,
            },
        );
        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.loadingFailed",
                params: serde_json::json!({
                    "requestId": "req-2",
                    "errorText": "net::ERR_ABORTED",
                    "canceled": true,
                }),
                session_id: None,
            },
        );

        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .expect("event emitted")
            .expect("channel open");
        match event {
            CaptureEvent::Network(txn) => {
                assert_eq!(txn.state, TransactionState::Failed);
                assert!(txn.failure.unwrap().canceled);
            }
            other => panic!("expected a network event, got {other:?}"),
        }
        assert_eq!(ctx.stats.network_failed.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.stats.network_in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn finalize_drains_in_flight_transactions_as_failed() {
        let (ctx, _cmd_rx, mut event_rx) = test_ctx();
        let mut monitor = NetworkMonitor::default();
        monitor.handle(
            &ctx,
            RawEvent {
                method: "Network.requestWillBeSent",
                params: serde_json::json!({
                    "requestId": "req-3",
                    "type": "Document",
                    "request": {"method": "GET", "url": "https://example.com/", "headers": {}},
                }),
                session_id: None,
            },
        );
        monitor.finalize(&ctx);
        let event = tokio::time::timeout(Duration::from_secs(1), event_rx.recv())
            .await
            .expect("event emitted")
            .expect("channel open");
        match event {
            CaptureEvent::Network(txn) => {
                assert_eq!(txn.state, TransactionState::Failed);
                assert!(txn.failure.unwrap().canceled);
            }
            other => panic!("expected a network event, got {other:?}"),
        }
    }
}

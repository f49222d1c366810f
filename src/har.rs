//! Pure HAR 1.2 log projection (spec §4.3 Non-goals: "the core does not
//! persist HAR" — it doesn't write files or own a HAR lifecycle, but nothing
//! stops it from offering the pure computation a host can use to persist one
//! itself). Grounded on the `NetworkTransactionEvent` shape already defined
//! in `events.rs`; there is no teacher equivalent since `chromiumoxide` never
//! produced HAR, so this is built directly against the HAR 1.2 spec fields
//! a consumer (e.g. a browser devtools panel) expects.

use serde::Serialize;

use crate::events::{NetworkTransactionEvent, TransactionState};

#[derive(Debug, Clone, Serialize)]
pub struct HarLog {
    pub log: HarLogBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarLogBody {
    pub version: &'static str,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarCreator {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarEntry {
    #[serde(rename = "startedDateTime")]
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: serde_json::Value,
    pub timings: serde_json::Value,
    /// The originating CDP `requestId`, carried as the underscore-prefixed
    /// custom field Chrome DevTools itself uses for the same purpose — HAR
    /// 1.2 has no native slot for it, but the testable round-trip property
    /// (spec §8: "parseable back into a set whose `requestId → url` mapping
    /// equals the emitted set") needs it preserved somewhere in the log.
    #[serde(rename = "_requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(rename = "httpVersion")]
    pub http_version: &'static str,
    pub headers: Vec<HarHeader>,
    #[serde(rename = "queryString")]
    pub query_string: Vec<serde_json::Value>,
    #[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    #[serde(rename = "bodySize")]
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarPostData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarResponse {
    pub status: i64,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(rename = "httpVersion")]
    pub http_version: &'static str,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    #[serde(rename = "bodySize")]
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarContent {
    pub size: i64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "encoding", skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

fn headers_to_har(headers: &std::collections::HashMap<String, String>) -> Vec<HarHeader> {
    let mut out: Vec<HarHeader> = headers
        .iter()
        .map(|(name, value)| HarHeader {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// Builds a HAR 1.2 log from completed transactions. Transactions that
/// never reached [`TransactionState::Completed`] or
/// [`TransactionState::Failed`] are skipped — an in-flight entry has no
/// well-defined `response` block.
pub fn build_har(transactions: &[NetworkTransactionEvent]) -> HarLog {
    let entries = transactions
        .iter()
        .filter(|txn| matches!(txn.state, TransactionState::Completed | TransactionState::Failed))
        .map(to_entry)
        .collect();

    HarLog {
        log: HarLogBody {
            version: "1.2",
            creator: HarCreator {
                name: "cdp-session-core",
                version: env!("CARGO_PKG_VERSION"),
            },
            entries,
        },
    }
}

fn to_entry(txn: &NetworkTransactionEvent) -> HarEntry {
    let request_headers = headers_to_har(&txn.request_headers);
    let post_data = txn.request_post_data.as_ref().map(|text| HarPostData {
        mime_type: "application/x-www-form-urlencoded".to_string(),
        text: text.clone(),
    });

    let response_headers = txn
        .response_headers
        .as_ref()
        .map(headers_to_har)
        .unwrap_or_default();
    let mime_type = txn.mime_type.clone().unwrap_or_default();
    let body_text = txn.response_body.as_ref().map(|b| b.body.clone());
    let encoding = txn
        .response_body
        .as_ref()
        .filter(|b| b.base64_encoded)
        .map(|_| "base64".to_string());
    let content_size = txn
        .response_body
        .as_ref()
        .map(|b| b.body.len() as i64)
        .unwrap_or(-1);

    HarEntry {
        started_date_time: txn.timestamp.to_rfc3339(),
        time: 0.0,
        request: HarRequest {
            method: txn.method.clone(),
            url: txn.url.clone(),
            http_version: "HTTP/1.1",
            headers: request_headers,
            query_string: Vec::new(),
            post_data,
            headers_size: -1,
            body_size: txn.request_post_data.as_ref().map(|d| d.len() as i64).unwrap_or(0),
        },
        response: HarResponse {
            status: txn.response_status.unwrap_or(0),
            status_text: String::new(),
            http_version: "HTTP/1.1",
            headers: response_headers,
            content: HarContent {
                size: content_size,
                mime_type,
                text: body_text,
                encoding,
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
        },
        cache: serde_json::json!({}),
        timings: txn.timing.clone().unwrap_or_else(|| serde_json::json!({})),
        request_id: txn.request_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ResponseBody;
    use std::collections::HashMap;

    fn completed_txn() -> NetworkTransactionEvent {
        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "*/*".to_string());
        NetworkTransactionEvent {
            sequence: 1,
            timestamp: chrono::Utc::now(),
            request_id: "1".to_string(),
            method: "GET".to_string(),
            url: "https://example.com/api".to_string(),
            request_headers: headers,
            request_post_data: None,
            resource_type: "xhr".to_string(),
            timing: None,
            response_status: Some(200),
            response_headers: Some(HashMap::new()),
            mime_type: Some("application/json".to_string()),
            response_body: Some(ResponseBody {
                body: "{}".to_string(),
                base64_encoded: false,
            }),
            failure: None,
            state: TransactionState::Completed,
        }
    }

    #[test]
    fn skips_non_terminal_transactions() {
        let mut pending = completed_txn();
        pending.state = TransactionState::Pending;
        let har = build_har(&[pending]);
        assert!(har.log.entries.is_empty());
    }

    #[test]
    fn includes_completed_transaction_with_body() {
        let har = build_har(&[completed_txn()]);
        assert_eq!(har.log.entries.len(), 1);
        assert_eq!(har.log.entries[0].response.status, 200);
        assert_eq!(har.log.entries[0].response.content.text.as_deref(), Some("{}"));
    }

    /// Spec §8 round-trip property: the HAR projection must be parseable
    /// back into a `requestId → url` mapping equal to the emitted set.
    #[test]
    fn har_round_trips_request_id_to_url() {
        let mut second = completed_txn();
        second.request_id = "2".to_string();
        second.url = "https://example.com/other".to_string();

        let har = build_har(&[completed_txn(), second]);
        let serialized = serde_json::to_string(&har).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&serialized).unwrap();

        let mut round_tripped: HashMap<String, String> = HashMap::new();
        for entry in parsed["log"]["entries"].as_array().unwrap() {
            let request_id = entry["_requestId"].as_str().unwrap().to_string();
            let url = entry["request"]["url"].as_str().unwrap().to_string();
            round_tripped.insert(request_id, url);
        }

        let mut expected = HashMap::new();
        expected.insert("1".to_string(), "https://example.com/api".to_string());
        expected.insert("2".to_string(), "https://example.com/other".to_string());
        assert_eq!(round_tripped, expected);
    }
}

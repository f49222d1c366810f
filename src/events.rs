//! Typed capture events emitted through the host callback (spec §3, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four independent capture categories a host callback distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Network,
    Storage,
    WindowProperties,
    Interaction,
}

/// A value transferred to the host through `on_event(category, event)`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum CaptureEvent {
    Network(NetworkTransactionEvent),
    Storage(StorageEvent),
    WindowProperties(WindowPropertyEvent),
    Interaction(InteractionEvent),
}

impl CaptureEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            CaptureEvent::Network(_) => EventCategory::Network,
            CaptureEvent::Storage(_) => EventCategory::Storage,
            CaptureEvent::WindowProperties(_) => EventCategory::WindowProperties,
            CaptureEvent::Interaction(_) => EventCategory::Interaction,
        }
    }
}

/// Lifecycle state of a [`NetworkTransactionEvent`]'s backing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Headers,
    BodyFetched,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFailure {
    pub error_text: String,
    pub canceled: bool,
}

/// One complete HTTP exchange, emitted exactly once when it reaches a
/// terminal state (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTransactionEvent {
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_post_data: Option<String>,
    pub resource_type: String,
    pub timing: Option<Value>,
    pub response_status: Option<i64>,
    pub response_headers: Option<HashMap<String, String>>,
    pub mime_type: Option<String>,
    pub response_body: Option<ResponseBody>,
    pub failure: Option<TransactionFailure>,
    pub state: TransactionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    pub body: String,
    pub base64_encoded: bool,
}

/// Storage scope a `(scope, key)` timeline entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageScope {
    Cookie,
    SessionStorage,
    LocalStorage,
}

/// One entry in a key timeline: `(timestamp, value, source_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub value: Option<String>,
    pub source_url: String,
}

/// The tagged union of storage mutations (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageEvent {
    CookieChanged {
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
        domain: String,
        path: String,
        name: String,
        change: ChangeKind,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    StorageKeyAdded {
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
        origin: String,
        is_local_storage: bool,
        key: String,
        new_value: Option<String>,
    },
    StorageKeyRemoved {
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
        origin: String,
        is_local_storage: bool,
        key: String,
        old_value: Option<String>,
    },
    StorageKeyUpdated {
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
        origin: String,
        is_local_storage: bool,
        key: String,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    IndexedDbChanged {
        sequence: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
        origin: String,
        database_name: String,
        object_store_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A scalar value at a window-property leaf path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyScalar {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// One change since the previous window-property collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyChange {
    pub path: String,
    pub value: Option<PropertyScalar>,
}

/// Emitted after each window-property collection cycle (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowPropertyEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub url: String,
    pub changes: Vec<PropertyChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Click,
    Dblclick,
    Mousedown,
    Mouseup,
    Contextmenu,
    Mouseover,
    Keydown,
    Keyup,
    Keypress,
    Input,
    Change,
    Focus,
    Blur,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDetail {
    pub button: Option<i32>,
    pub key: Option<String>,
    pub code: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub client_x: Option<f64>,
    pub client_y: Option<f64>,
    pub page_x: Option<f64>,
    pub page_y: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Css,
    Xpath,
    Text,
    Role,
    Name,
    Id,
}

impl LocatorKind {
    /// Priority per spec §4.6 / `original_source`'s `DEFAULT_IDENTIFIER_PRIORITIES`.
    pub fn default_priority(self) -> i32 {
        match self {
            LocatorKind::Id => 10,
            LocatorKind::Name => 20,
            LocatorKind::Css => 30,
            LocatorKind::Role => 40,
            LocatorKind::Text => 50,
            LocatorKind::Xpath => 80,
        }
    }

    pub fn default_priorities() -> HashMap<LocatorKind, i32> {
        [
            LocatorKind::Id,
            LocatorKind::Name,
            LocatorKind::Css,
            LocatorKind::Role,
            LocatorKind::Text,
            LocatorKind::Xpath,
        ]
        .into_iter()
        .map(|k| (k, k.default_priority()))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "type")]
    pub kind: LocatorKind,
    pub value: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A DOM element description sufficient to re-identify it in a later
/// session (spec §3, §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiElement {
    pub tag: String,
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(rename = "type")]
    pub type_attr: Option<String>,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub placeholder: Option<String>,
    pub href: Option<String>,
    pub src: Option<String>,
    pub value: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub locators: Vec<Locator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub timestamp_ms: i64,
    pub url: String,
    pub event_detail: EventDetail,
    pub target: UiElement,
}

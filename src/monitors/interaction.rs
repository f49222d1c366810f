//! Injected-script DOM listener plus the `Runtime.bindingCalled` decode path
//! (spec §4.6). The locator-priority scheme and the "stable-looking CSS
//! class" fallback are ported verbatim from
//! `original_source/web_hacker/data_models/ui_elements.py`'s
//! `build_default_Identifiers` — the spec names the priority table but
//! leaves the fallback rule to the original.

use serde_json::Value;

use crate::config::SessionConfig;
use crate::events::{
    BoundingBox, CaptureEvent, EventDetail, InteractionEvent, InteractionType, Locator,
    LocatorKind, UiElement,
};
use crate::monitors::{Monitor, MonitorContext, RawEvent};

pub const INTERACTION_BINDING_NAME: &str = "__cdp_session_core_emit_interaction__";

/// Attached to `document` in the capturing phase so it sees every bubbling
/// and non-bubbling interaction type the spec tracks, then hands a flat JSON
/// payload to the host binding. Kept deliberately small: all locator
/// construction happens host-side in [`build_locators`], not in-page.
pub const INJECTED_SCRIPT: &str = include_str!("interaction_listener.js");

pub struct InteractionMonitor {
    installed: bool,
}

impl Default for InteractionMonitor {
    fn default() -> Self {
        Self { installed: false }
    }
}

impl InteractionMonitor {
    /// Registers the host binding and injects the listener, both for the
    /// current document and every future navigation (spec §4.6).
    pub fn start(&mut self, ctx: &MonitorContext) {
        if self.installed {
            return;
        }
        self.installed = true;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let timeout = std::time::Duration::from_millis(ctx.config.command_default_timeout_ms);
            let _ = ctx
                .dispatcher
                .send_and_wait(
                    "Runtime.addBinding",
                    Some(serde_json::json!({ "name": INTERACTION_BINDING_NAME })),
                    timeout,
                )
                .await;
            let _ = ctx
                .dispatcher
                .send_and_wait(
                    "Page.addScriptToEvaluateOnNewDocument",
                    Some(serde_json::json!({ "source": INJECTED_SCRIPT })),
                    timeout,
                )
                .await;
            let _ = ctx
                .dispatcher
                .send_and_wait(
                    "Runtime.evaluate",
                    Some(serde_json::json!({ "expression": INJECTED_SCRIPT })),
                    timeout,
                )
                .await;
        });
    }

    fn on_binding_called(&mut self, ctx: &MonitorContext, params: &Value) {
        let Some(name) = params.get("name").and_then(Value::as_str) else { return };
        if name != INTERACTION_BINDING_NAME {
            return;
        }
        let Some(payload) = params.get("payload").and_then(Value::as_str) else { return };
        let Ok(raw) = serde_json::from_str::<Value>(payload) else { return };
        let Some(event) = decode_interaction(&raw, &ctx.config) else { return };
        ctx.stats
            .interactions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        ctx.emit(CaptureEvent::Interaction(event));
    }
}

fn decode_interaction(raw: &Value, config: &SessionConfig) -> Option<InteractionEvent> {
    let kind = parse_interaction_type(raw.get("type").and_then(Value::as_str)?)?;
    let timestamp_ms = raw.get("timestampMs").and_then(Value::as_i64).unwrap_or_default();
    let url = raw.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
    let event_detail = decode_event_detail(raw.get("detail").unwrap_or(&Value::Null));
    let target = decode_target(raw.get("target").unwrap_or(&Value::Null), config);

    Some(InteractionEvent {
        kind,
        timestamp_ms,
        url,
        event_detail,
        target,
    })
}

fn parse_interaction_type(s: &str) -> Option<InteractionType> {
    Some(match s {
        "click" => InteractionType::Click,
        "dblclick" => InteractionType::Dblclick,
        "mousedown" => InteractionType::Mousedown,
        "mouseup" => InteractionType::Mouseup,
        "contextmenu" => InteractionType::Contextmenu,
        "mouseover" => InteractionType::Mouseover,
        "keydown" => InteractionType::Keydown,
        "keyup" => InteractionType::Keyup,
        "keypress" => InteractionType::Keypress,
        "input" => InteractionType::Input,
        "change" => InteractionType::Change,
        "focus" => InteractionType::Focus,
        "blur" => InteractionType::Blur,
        _ => return None,
    })
}

fn decode_event_detail(v: &Value) -> EventDetail {
    EventDetail {
        button: v.get("button").and_then(Value::as_i64).map(|b| b as i32),
        key: v.get("key").and_then(Value::as_str).map(str::to_string),
        code: v.get("code").and_then(Value::as_str).map(str::to_string),
        modifiers: v
            .get("modifiers")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        client_x: v.get("clientX").and_then(Value::as_f64),
        client_y: v.get("clientY").and_then(Value::as_f64),
        page_x: v.get("pageX").and_then(Value::as_f64),
        page_y: v.get("pageY").and_then(Value::as_f64),
    }
}

fn decode_target(v: &Value, config: &SessionConfig) -> UiElement {
    let tag = v
        .get("tagName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let id = v.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string);
    let name = v
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let classes = v
        .get("classes")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let type_attr = v.get("type").and_then(Value::as_str).map(str::to_string);
    let role = v.get("role").and_then(Value::as_str).map(str::to_string);
    let aria_label = v.get("ariaLabel").and_then(Value::as_str).map(str::to_string);
    let placeholder = v.get("placeholder").and_then(Value::as_str).map(str::to_string);
    let href = v.get("href").and_then(Value::as_str).map(str::to_string);
    let src = v.get("src").and_then(Value::as_str).map(str::to_string);
    let value = v.get("value").and_then(Value::as_str).map(str::to_string);
    let title = v.get("title").and_then(Value::as_str).map(str::to_string);
    let attributes = v
        .get("attributes")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, val)| (k.clone(), val.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default();
    let text = v
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let bounding_box = v.get("boundingBox").map(|b| BoundingBox {
        x: b.get("x").and_then(Value::as_f64).unwrap_or_default(),
        y: b.get("y").and_then(Value::as_f64).unwrap_or_default(),
        width: b.get("width").and_then(Value::as_f64).unwrap_or_default(),
        height: b.get("height").and_then(Value::as_f64).unwrap_or_default(),
    });
    let css_path = v.get("cssPath").and_then(Value::as_str).map(str::to_string);
    let xpath = v.get("xpath").and_then(Value::as_str).map(str::to_string);

    let mut element = UiElement {
        tag,
        id,
        name,
        classes,
        type_attr,
        role,
        aria_label,
        placeholder,
        href,
        src,
        value,
        title,
        attributes,
        text,
        bounding_box,
        locators: Vec::new(),
    };
    element.locators = build_locators(&element, css_path.as_deref(), xpath.as_deref(), config);
    element
}

/// Ports `UiElement.build_default_Identifiers` field-for-field: id, then
/// name, then placeholder-as-css, then role, then text, then the recorded
/// css path and xpath, falling back to the first stable-looking class only
/// when nothing else produced a locator. Priorities honor any host override
/// in `config.locator_priorities` (spec §4.6, §6).
fn build_locators(
    element: &UiElement,
    css_path: Option<&str>,
    xpath: Option<&str>,
    config: &SessionConfig,
) -> Vec<Locator> {
    let mut locators = Vec::new();

    if let Some(id) = &element.id {
        locators.push(Locator {
            kind: LocatorKind::Id,
            value: id.clone(),
            priority: config.priority_for(LocatorKind::Id),
        });
    }
    if let Some(name) = &element.name {
        locators.push(Locator {
            kind: LocatorKind::Name,
            value: name.clone(),
            priority: config.priority_for(LocatorKind::Name),
        });
    }
    if let Some(placeholder) = &element.placeholder {
        locators.push(Locator {
            kind: LocatorKind::Css,
            value: format!("{}[placeholder=\"{}\"]", element.tag, placeholder),
            priority: config.priority_for(LocatorKind::Css),
        });
    }
    if let Some(role) = &element.role {
        locators.push(Locator {
            kind: LocatorKind::Role,
            value: role.clone(),
            priority: config.priority_for(LocatorKind::Role),
        });
    }
    if let Some(text) = &element.text {
        locators.push(Locator {
            kind: LocatorKind::Text,
            value: text.clone(),
            priority: config.priority_for(LocatorKind::Text),
        });
    }
    if let Some(css_path) = css_path.filter(|s| !s.is_empty()) {
        locators.push(Locator {
            kind: LocatorKind::Css,
            value: css_path.to_string(),
            priority: config.priority_for(LocatorKind::Css),
        });
    }
    if let Some(xpath) = xpath.filter(|s| !s.is_empty()) {
        locators.push(Locator {
            kind: LocatorKind::Xpath,
            value: xpath.to_string(),
            priority: config.priority_for(LocatorKind::Xpath),
        });
    }

    if locators.is_empty() && !element.classes.is_empty() {
        if let Some(stable) = element.classes.iter().find(|c| is_stable_class(c)) {
            locators.push(Locator {
                kind: LocatorKind::Css,
                value: format!(".{stable}"),
                priority: config.priority_for(LocatorKind::Css),
            });
        }
    }

    locators
}

fn is_stable_class(class: &str) -> bool {
    if class.starts_with("sc-") || class.starts_with("css-") {
        return false;
    }
    let looks_hashed = class.chars().all(char::is_alphanumeric) && class.len() >= 10;
    !looks_hashed
}

impl Monitor for InteractionMonitor {
    fn handles(&self, method: &str) -> bool {
        method == "Runtime.bindingCalled"
    }

    fn handle(&mut self, ctx: &MonitorContext, event: RawEvent<'_>) {
        if event.method == "Runtime.bindingCalled" {
            self.on_binding_called(ctx, &event.params);
        }
    }

    fn finalize(&mut self, _ctx: &MonitorContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_class_filters_hashed_and_styled_components() {
        assert!(!is_stable_class("sc-bZQynM"));
        assert!(!is_stable_class("css-1x2y3z4a5b"));
        assert!(!is_stable_class("a1b2c3d4e5"));
        assert!(is_stable_class("nav-item"));
        assert!(is_stable_class("btn"));
    }

    #[test]
    fn priority_order_matches_id_first() {
        let mut el = UiElement::default();
        el.id = Some("submit".to_string());
        el.name = Some("submit-name".to_string());
        let locators = build_locators(&el, None, None, &SessionConfig::default());
        assert_eq!(locators[0].kind, LocatorKind::Id);
        assert_eq!(locators[1].kind, LocatorKind::Name);
    }

    /// Spec §8 scenario 6: a click on a `<button id="buy">Buy now</button>`
    /// decodes into an `InteractionEvent` whose locators begin with the id,
    /// followed by a text locator.
    #[test]
    fn binding_payload_decodes_click_with_id_and_text_locators() {
        let raw = serde_json::json!({
            "type": "click",
            "timestampMs": 1_700_000_000_000i64,
            "url": "https://example.com/cart",
            "detail": {"button": 0, "modifiers": []},
            "target": {
                "tagName": "BUTTON",
                "id": "buy",
                "text": "Buy now",
                "classes": [],
                "attributes": {"id": "buy"},
            },
        });

        let event = decode_interaction(&raw, &SessionConfig::default()).expect("decodes");
        assert_eq!(event.kind, InteractionType::Click);
        assert_eq!(event.url, "https://example.com/cart");
        assert_eq!(event.target.tag, "button");
        assert_eq!(event.target.locators[0].kind, LocatorKind::Id);
        assert_eq!(event.target.locators[0].value, "buy");
        assert_eq!(event.target.locators[0].priority, 10);
        assert!(event
            .target
            .locators
            .iter()
            .any(|l| l.kind == LocatorKind::Text && l.value == "Buy now" && l.priority == 50));
    }

    #[test]
    fn unknown_binding_name_is_ignored() {
        let mut monitor = InteractionMonitor::default();
        let (writer, _cmd_rx) = crate::transport::TransportWriter::fake();
        let dispatcher = crate::dispatcher::Dispatcher::new(writer);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let emit: crate::monitors::EventCallback = std::sync::Arc::new(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(event);
            })
        });
        let ctx = MonitorContext {
            dispatcher,
            emit,
            sequence: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
            config: std::sync::Arc::new(SessionConfig::default()),
            stats: std::sync::Arc::new(crate::stats::SessionStats::default()),
        };

        monitor.handle(
            &ctx,
            RawEvent {
                method: "Runtime.bindingCalled",
                params: serde_json::json!({"name": "some_other_binding", "payload": "{}"}),
                session_id: None,
            },
        );
        rx.close();
        assert!(rx.try_recv().is_err());
    }
}

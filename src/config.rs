use std::collections::{HashMap, HashSet};

use crate::events::LocatorKind;

/// Options a host may tune when constructing a [`Session`](crate::session::Session).
///
/// Field defaults match spec §6 exactly.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resource types whose response bodies are fetched. Requests outside
    /// this set are still tracked (for pairing) but their bodies are not
    /// fetched. Default: xhr, fetch, document.
    pub capture_resource_types: HashSet<String>,
    /// Interval between window-property collection cycles.
    pub window_property_interval_ms: u64,
    /// Maximum recursion depth for the window-property walk.
    pub window_property_max_depth: u32,
    /// Interval between cookie polls.
    pub cookie_poll_ms: u64,
    /// Default timeout for a `sendAndWait` command issued by the Coordinator
    /// during setup.
    pub command_default_timeout_ms: u64,
    /// Timeout for each individual CDP call made by the window-property
    /// walker (property/URL fetches use this value; the top-level
    /// window-properties enumeration uses double it, per spec §4.5).
    pub window_property_call_timeout_ms: u64,
    /// Grace period allotted to monitors to observe cancellation before
    /// `finalize()` proceeds regardless.
    pub finalize_grace_ms: u64,
    /// Overrides for locator priority (lower = tried first).
    pub locator_priorities: HashMap<LocatorKind, i32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_resource_types: ["xhr", "fetch", "document"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            window_property_interval_ms: 10_000,
            window_property_max_depth: 10,
            cookie_poll_ms: 1_000,
            command_default_timeout_ms: 10_000,
            window_property_call_timeout_ms: 500,
            finalize_grace_ms: 5_000,
            locator_priorities: LocatorKind::default_priorities(),
        }
    }
}

impl SessionConfig {
    /// The effective priority for a locator kind, honoring any host override.
    pub fn priority_for(&self, kind: LocatorKind) -> i32 {
        self.locator_priorities
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_priority())
    }
}

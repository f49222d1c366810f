//! Cheap counters backing `Session::summary()` (spec §4.7). Each monitor
//! updates its own fields directly; `summary()` just snapshots them with
//! relaxed loads, so it never traverses emitted-event history.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct SessionStats {
    pub network_in_flight: AtomicI64,
    pub network_completed: AtomicU64,
    pub network_failed: AtomicU64,
    pub cookies: AtomicI64,
    pub local_storage_keys: AtomicI64,
    pub session_storage_keys: AtomicI64,
    pub window_paths: AtomicI64,
    pub window_history_entries: AtomicU64,
    pub interactions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSummary {
    pub in_flight: i64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageSummary {
    pub cookies: i64,
    pub local: i64,
    pub session: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowPropertySummary {
    pub paths: i64,
    pub history_entries: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionSummary {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSummary {
    pub network: NetworkSummary,
    pub storage: StorageSummary,
    pub window_properties: WindowPropertySummary,
    pub interactions: InteractionSummary,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionSummary {
        SessionSummary {
            network: NetworkSummary {
                in_flight: self.network_in_flight.load(Ordering::Relaxed),
                completed: self.network_completed.load(Ordering::Relaxed),
                failed: self.network_failed.load(Ordering::Relaxed),
            },
            storage: StorageSummary {
                cookies: self.cookies.load(Ordering::Relaxed),
                local: self.local_storage_keys.load(Ordering::Relaxed),
                session: self.session_storage_keys.load(Ordering::Relaxed),
            },
            window_properties: WindowPropertySummary {
                paths: self.window_paths.load(Ordering::Relaxed),
                history_entries: self.window_history_entries.load(Ordering::Relaxed),
            },
            interactions: InteractionSummary {
                count: self.interactions.load(Ordering::Relaxed),
            },
        }
    }
}

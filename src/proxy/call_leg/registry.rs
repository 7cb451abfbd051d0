use super::event::{CallLegHandle, EventBus, LegEvent};
use super::session::CallLeg;
use super::state::{LegId, LegRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Debug, Serialize)]
pub struct LegEntry {
    pub leg_id: LegId,
    pub role: LegRole,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<LegId, LegEntry>,
    handles: HashMap<LegId, CallLegHandle>,
}

/// Routes events between running legs by id.
pub struct LegRegistry {
    inner: Mutex<RegistryState>,
}

impl LegRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryState::default()),
        })
    }

    pub fn register(&self, role: LegRole, handle: CallLegHandle) {
        let leg_id = handle.leg_id().to_string();
        let mut guard = self.inner.lock().unwrap();
        guard.entries.insert(
            leg_id.clone(),
            LegEntry {
                leg_id: leg_id.clone(),
                role,
                started_at: Utc::now(),
            },
        );
        guard.handles.insert(leg_id, handle);
    }

    pub fn get_handle(&self, leg_id: &str) -> Option<CallLegHandle> {
        self.inner.lock().unwrap().handles.get(leg_id).cloned()
    }

    pub fn get(&self, leg_id: &str) -> Option<LegEntry> {
        self.inner.lock().unwrap().entries.get(leg_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn list_recent(&self, limit: usize) -> Vec<LegEntry> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .entries
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries.truncate(limit);
        entries
    }

    /// Registers `leg` and runs it on the current tokio runtime until it
    /// terminates or `cancel_token` fires.
    pub fn spawn(
        self: &Arc<Self>,
        leg: CallLeg,
        cancel_token: CancellationToken,
    ) -> (CallLegHandle, JoinHandle<()>) {
        let (handle, rx) = CallLegHandle::with_id(leg.id().to_string());
        self.register(leg.role(), handle.clone());
        let task = tokio::spawn(leg.serve(rx, cancel_token));
        (handle, task)
    }
}

impl EventBus for LegRegistry {
    fn post(&self, target: &str, event: LegEvent) -> bool {
        match self.get_handle(target) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    fn unregister(&self, leg_id: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.remove(leg_id);
        if guard.handles.remove(leg_id).is_some() {
            debug!(leg = leg_id, "Leg unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_routes_by_id() {
        let registry = LegRegistry::new();
        let (handle, mut rx) = CallLegHandle::with_id("a1");
        registry.register(LegRole::A, handle);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("a1").map(|e| e.role), Some(LegRole::A));

        assert!(registry.post("a1", LegEvent::PutOnHold));
        assert!(matches!(rx.try_recv(), Ok(LegEvent::PutOnHold)));
        assert!(!registry.post("b1", LegEvent::PutOnHold));

        registry.unregister("a1");
        assert_eq!(registry.count(), 0);
        assert!(!registry.post("a1", LegEvent::PutOnHold));
    }

    #[test]
    fn test_post_to_closed_leg() {
        let registry = LegRegistry::new();
        let (handle, rx) = CallLegHandle::with_id("a1");
        registry.register(LegRole::A, handle);
        drop(rx);
        assert!(!registry.post("a1", LegEvent::ResumeHeld));
    }

    #[test]
    fn test_entry_serializes() {
        let registry = LegRegistry::new();
        let (handle, _rx) = CallLegHandle::with_id("b1");
        registry.register(LegRole::B, handle);
        let entry = registry.get("b1").unwrap();
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["leg_id"], "b1");
        assert_eq!(json["role"], "B");
        let started: DateTime<Utc> = json["started_at"].as_str().unwrap().parse().unwrap();
        assert_eq!(started, entry.started_at);
    }
}

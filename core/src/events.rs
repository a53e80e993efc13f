//! Event recording for the reconcilers.
//!
//! Events are diagnostic records attached to a resource, in the manner of
//! Kubernetes Events. Recording is fire-and-forget and never fails a
//! reconcile.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::Span;
use zonewall_common::meta::ObjectKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: &'static str,
    pub object: ObjectKey,
    pub type_: EventType,
    pub reason: &'static str,
    pub note: String,
}

impl Event {
    pub fn normal(kind: &'static str, object: ObjectKey, reason: &'static str, note: impl Into<String>) -> Self {
        Self {
            kind,
            object,
            type_: EventType::Normal,
            reason,
            note: note.into(),
        }
    }

    pub fn warning(kind: &'static str, object: ObjectKey, reason: &'static str, note: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            ..Self::normal(kind, object, reason, note)
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Well-known event reasons.
pub mod reasons {
    /// The management client could not be built or connected
    pub const CONNECTION_FAILED: &str = "ConnectionFailed";
    /// The operating system of a host was observed
    pub const OS_PROBED: &str = "OSProbed";
    /// A firewall's host selector does not compile
    pub const INVALID_HOST_SELECTOR: &str = "InvalidHostSelector";
    /// A selected host fails the compatibility gate
    pub const HOST_INCOMPATIBLE: &str = "HostIncompatible";
    pub const HOST_COUNT_UPDATED: &str = "HostCountUpdated";
}

/// Writes events to the log.
pub struct TracingRecorder {
    span: Span,
}

impl TracingRecorder {
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.type_ {
            EventType::Normal => tracing::info!(
                parent: &self.span,
                kind = event.kind,
                object = %event.object,
                reason = event.reason,
                "{}",
                event.note
            ),
            EventType::Warning => tracing::warn!(
                parent: &self.span,
                kind = event.kind,
                object = %event.object,
                reason = event.reason,
                "{}",
                event.note
            ),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps every event in memory. Grows without bound; meant for tests and
/// short runs.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn reasons(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(|e| e.reason).collect()
    }

    /// Most recent event recorded for `object`.
    pub fn latest(&self, object: &ObjectKey) -> Option<Event> {
        lock(&self.events).iter().rev().find(|e| &e.object == object).cloned()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        lock(&self.events).push(event);
    }
}

/// Keeps only the most recent event per resource.
#[derive(Clone, Default)]
pub struct LatestEvents {
    latest: Arc<Mutex<BTreeMap<(&'static str, ObjectKey), Event>>>,
}

impl LatestEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &'static str, object: &ObjectKey) -> Option<Event> {
        lock(&self.latest).get(&(kind, object.clone())).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.latest).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.latest).is_empty()
    }
}

impl EventRecorder for LatestEvents {
    fn record(&self, event: Event) {
        lock(&self.latest).insert((event.kind, event.object.clone()), event);
    }
}

/// Forwards every event to several recorders.
pub struct FanoutRecorder {
    recorders: Vec<Arc<dyn EventRecorder>>,
}

impl FanoutRecorder {
    pub fn new(recorders: Vec<Arc<dyn EventRecorder>>) -> Self {
        Self { recorders }
    }
}

impl EventRecorder for FanoutRecorder {
    fn record(&self, event: Event) {
        for recorder in &self.recorders {
            recorder.record(event.clone());
        }
    }
}

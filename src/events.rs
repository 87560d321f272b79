//! Notification surface for ingestion drivers.
//!
//! Hosts register [`EventSink`]s on the database; the ingestion driver
//! reports progress and out-of-date units through them. Multiple sinks
//! are supported by a fan-out list guarded by a single mutex; callbacks
//! run outside the lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::paths::CanonicalPath;
use crate::types::{Code, TimePoint};

/// Identity of a unit that was found to be out of date.
///
/// The value is shared with the sink for the duration of the callback
/// only; sinks that need it longer clone it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfDateUnit {
    pub name: String,
    pub unit_code: Code,
    pub main_file: Option<CanonicalPath>,
    pub out_file: Option<CanonicalPath>,
}

/// What made a unit out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfDateTrigger {
    /// The file whose change triggered the notification, when known.
    pub path: Option<CanonicalPath>,
    /// Human-readable description of the trigger (e.g. "dependency
    /// modified").
    pub description: String,
}

impl OutOfDateTrigger {
    pub fn modified_file(path: CanonicalPath) -> OutOfDateTrigger {
        OutOfDateTrigger {
            description: format!("modified file '{path}'"),
            path: Some(path),
        }
    }

    pub fn removed_file(path: CanonicalPath) -> OutOfDateTrigger {
        OutOfDateTrigger {
            description: format!("removed file '{path}'"),
            path: Some(path),
        }
    }
}

/// Receives ingestion notifications. All methods have default no-op
/// implementations so sinks override only what they care about.
pub trait EventSink: Send + Sync {
    /// Ingestion queue accounting: `added` units discovered so far,
    /// `completed` units fully processed.
    fn on_processing_progress(&self, added: usize, completed: usize) {
        let _ = (added, completed);
    }

    /// A stored unit no longer matches its raw-store counterpart.
    /// `synchronous` is true when the caller waits for the sink to finish
    /// before continuing the scan.
    fn on_unit_out_of_date(
        &self,
        unit: &OutOfDateUnit,
        out_of_date_mod_time: TimePoint,
        trigger: &OutOfDateTrigger,
        synchronous: bool,
    ) {
        let _ = (unit, out_of_date_mod_time, trigger, synchronous);
    }
}

/// Mutation-safe fan-out list of sinks.
#[derive(Default)]
pub(crate) struct SinkRegistry {
    sinks: Mutex<Vec<Arc<dyn EventSink>>>,
}

impl SinkRegistry {
    pub fn add(&self, sink: Arc<dyn EventSink>) {
        self.sinks.lock().push(sink);
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.lock().clone()
    }

    pub fn notify_progress(&self, added: usize, completed: usize) {
        for sink in self.snapshot() {
            sink.on_processing_progress(added, completed);
        }
    }

    pub fn notify_out_of_date(
        &self,
        unit: &OutOfDateUnit,
        out_of_date_mod_time: TimePoint,
        trigger: &OutOfDateTrigger,
        synchronous: bool,
    ) {
        for sink in self.snapshot() {
            sink.on_unit_out_of_date(unit, out_of_date_mod_time, trigger, synchronous);
        }
    }
}

//! Boundary contract with the raw compiler-record store.
//!
//! The reader of the compiler's on-disk index format lives outside this
//! crate; it implements [`RawStore`] and feeds the ingestion driver.
//! Everything here is a trait or plain data: the database itself never
//! touches record files.
//!
//! Callback enumeration uses higher-order functions; a C-facing host is
//! expected to trampoline its function-pointer-with-context variants into
//! these closures. Returning `false` from a callback stops enumeration
//! early.

use crossbeam_channel::Receiver;

use crate::error::DbResult;
use crate::paths::CanonicalPath;
use crate::types::{ProviderKind, SymbolInfo, SymbolRoles, TimePoint};

/// One dependency edge listed by a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitDependency {
    /// A record file carrying symbol occurrences for one source file.
    Record {
        record_name: String,
        file: CanonicalPath,
        module_name: Option<String>,
        is_system: bool,
        mod_time: TimePoint,
    },
    /// A plain file dependency without symbol occurrences (e.g. a header).
    File {
        file: CanonicalPath,
        is_system: bool,
    },
    /// Another unit this unit depends on.
    Unit { unit_name: String },
}

/// An `#include`/import edge between two files inside a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeEdge {
    pub source: CanonicalPath,
    pub source_line: u32,
    pub target: CanonicalPath,
}

/// Decoded view of one build unit in the raw store.
pub trait UnitReader {
    fn provider_identifier(&self) -> &str;
    fn provider_version(&self) -> &str;
    fn provider_kind(&self) -> ProviderKind;
    fn mod_time(&self) -> TimePoint;
    fn is_system_unit(&self) -> bool;
    fn is_module_unit(&self) -> bool;
    fn has_main_file(&self) -> bool;
    fn main_file_path(&self) -> Option<CanonicalPath>;
    fn module_name(&self) -> Option<&str>;
    fn working_dir(&self) -> Option<CanonicalPath>;
    fn output_file(&self) -> Option<CanonicalPath>;
    fn sysroot_path(&self) -> Option<CanonicalPath>;
    fn target(&self) -> Option<&str>;

    /// Enumerate dependencies; stop early when the callback returns false.
    fn for_each_dependency(&self, cb: &mut dyn FnMut(&UnitDependency) -> bool) -> DbResult<()>;

    /// Enumerate include edges; stop early when the callback returns false.
    fn for_each_include(&self, cb: &mut dyn FnMut(&IncludeEdge) -> bool) -> DbResult<()>;
}

/// A symbol declared somewhere in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSymbol {
    pub usr: String,
    pub name: String,
    pub info: SymbolInfo,
}

/// How a related symbol participates in an occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRelation {
    pub roles: SymbolRoles,
    pub usr: String,
}

/// One symbol occurrence inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolOccurrence {
    pub symbol: RecordSymbol,
    pub roles: SymbolRoles,
    pub line: u32,
    pub column: u32,
    pub relations: Vec<SymbolRelation>,
}

/// Filter applied while enumerating occurrences; `None` accepts all.
pub type SymbolFilter<'a> = Option<&'a dyn Fn(&RecordSymbol) -> bool>;

/// Decoded view of one record file.
pub trait RecordReader {
    fn for_each_symbol(&self, cb: &mut dyn FnMut(&RecordSymbol) -> bool) -> DbResult<()>;

    /// Enumerate occurrences whose symbol passes `symbols_filter`; the
    /// relations of each emitted occurrence are filtered by
    /// `related_filter`.
    fn for_each_occurrence(
        &self,
        symbols_filter: SymbolFilter<'_>,
        related_filter: SymbolFilter<'_>,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) -> DbResult<()>;
}

/// Change events observed on the raw store, one per unit, plus the marker
/// closing the initial scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Added(String),
    Removed(String),
    Modified(String),
    /// The store's directory vanished wholesale.
    DirectoryDeleted,
    /// All units present at watcher start have been reported.
    InitialScanComplete,
}

/// The raw store itself.
pub trait RawStore {
    /// Unit names currently present, optionally in sorted order.
    fn list_units(&self, sorted: bool) -> DbResult<Vec<String>>;

    fn open_unit(&self, unit_name: &str) -> DbResult<Box<dyn UnitReader + '_>>;

    fn open_record(&self, record_name: &str) -> DbResult<Box<dyn RecordReader + '_>>;

    /// Channel of change events. Implementations that do not watch return
    /// a channel that only ever yields [`UnitEvent::InitialScanComplete`].
    fn events(&self) -> Receiver<UnitEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_unit_event_stream_order() {
        let (tx, rx) = unbounded();
        tx.send(UnitEvent::Added("u1".into())).unwrap();
        tx.send(UnitEvent::Modified("u1".into())).unwrap();
        tx.send(UnitEvent::InitialScanComplete).unwrap();
        drop(tx);

        let events: Vec<UnitEvent> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                UnitEvent::Added("u1".into()),
                UnitEvent::Modified("u1".into()),
                UnitEvent::InitialScanComplete,
            ]
        );
    }
}

//! Persistent cross-reference database for code navigation tooling.
//!
//! `xrefdb` ingests compiler-produced raw index records (build units,
//! symbol providers, occurrences) into a transactional, memory-mapped
//! store and answers the queries code navigation needs: all occurrences
//! of a USR, the units depending on a file, symbols matching a name
//! pattern, root units of a dependency closure.
//!
//! The store is single-writer / many-reader: read transactions are
//! snapshot-isolated and never block, the one writer commits atomically,
//! and the mapped region grows on demand by quiescing readers.

pub mod adapter;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod events;
pub mod logging;
pub mod paths;
pub mod schema;
pub mod types;

pub use config::{LoggingConfig, Settings};
pub use db::{
    Database, DbStats, ImportTransaction, PatternOptions, ProviderDependencyDesc,
    ProviderFileRef, ReadTransaction, UnitDescription, UnitImportOutcome, UsrProvider,
    matches_pattern,
};
pub use error::{DbError, DbResult, StoreErrorKind};
pub use events::{EventSink, OutOfDateTrigger, OutOfDateUnit};
pub use paths::{CanonicalPath, PathPrefixMap, PrefixMapping};
pub use types::{
    Code, GlobalKind, ProviderKind, SymbolInfo, SymbolKind, SymbolLanguage, SymbolProperties,
    SymbolRoles, SymbolSubKind, TimePoint,
};

//! The database facade: open/create with version and crash guards, typed
//! read and import transactions, event-sink registration, and the
//! explicit output-unit registry.
//!
//! A database is a directory. The store lives in a versioned
//! subdirectory (`v<schema>`), so an incompatible schema bump starts
//! fresh without touching older data. A sidecar `info.json` records the
//! schema version and the last writer; the data file itself carries the
//! schema tag in its meta map as well.

mod diff;
mod import;
mod pattern;
mod read;

pub use diff::{ProviderDependencyDesc, UnitDescription, UnitImportOutcome};
pub use import::ImportTransaction;
pub use pattern::{PatternOptions, matches_pattern};
pub use read::{DbStats, ProviderFileRef, ReadTransaction, UsrProvider};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::env::{EnvOptions, Environment, grow_marker_path};
use crate::error::{DbError, DbResult, StoreErrorKind};
use crate::events::{EventSink, OutOfDateTrigger, OutOfDateUnit, SinkRegistry};
use crate::paths::{CanonicalPath, PathPrefixMap};
use crate::schema::{META_SCHEMA_VERSION_KEY, MapId, SCHEMA_VERSION};
use crate::types::{Code, TimePoint};

const DATA_FILE_NAME: &str = "data.xdb";
const INFO_FILE_NAME: &str = "info.json";

/// Bounded retries for imports aborted by `MapFull`.
const MAX_IMPORT_RETRIES: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct SidecarInfo {
    schema_version: u32,
    writer_identity: String,
}

/// A persistent cross-reference database.
pub struct Database {
    env: Environment,
    prefix_map: PathPrefixMap,
    use_explicit_output_units: bool,
    sinks: SinkRegistry,
    out_files: Mutex<HashSet<Code>>,
    versioned_dir: PathBuf,
}

impl Database {
    /// Open (or create) the database described by `settings`.
    ///
    /// A read-only open skips recovery and creation entirely. Otherwise:
    /// a lingering resize marker or a corrupted image causes the
    /// versioned directory to be archived under a timestamped name and a
    /// fresh store to be created — the raw record store remains the
    /// source of truth, so the index is always re-derivable.
    pub fn open(settings: &Settings) -> DbResult<Database> {
        let versioned_dir = settings
            .database_path
            .join(format!("v{SCHEMA_VERSION}"));
        let data_file = versioned_dir.join(DATA_FILE_NAME);
        let env_options = EnvOptions {
            readonly: settings.readonly,
            initial_map_size: settings.initial_map_size,
            max_map_size: settings.max_map_size,
            max_readers: settings.max_readers,
        };

        let env = if settings.readonly {
            let env = Environment::open(&data_file, env_options)?;
            check_schema_version(&env, true)?;
            env
        } else {
            fs::create_dir_all(&versioned_dir)
                .map_err(|e| DbError::io(&versioned_dir, e))?;

            if grow_marker_path(&data_file).exists() {
                tracing::warn!(
                    path = %versioned_dir.display(),
                    "previous process died mid-resize; starting fresh"
                );
                archive_database(&settings.database_path, &versioned_dir)?;
                fs::create_dir_all(&versioned_dir)
                    .map_err(|e| DbError::io(&versioned_dir, e))?;
            }

            let env = match Environment::open(&data_file, env_options.clone()) {
                Ok(env) => env,
                Err(err) if err.is_corruption() => {
                    tracing::warn!(
                        path = %data_file.display(),
                        error = %err,
                        "database image is damaged; starting fresh"
                    );
                    archive_database(&settings.database_path, &versioned_dir)?;
                    fs::create_dir_all(&versioned_dir)
                        .map_err(|e| DbError::io(&versioned_dir, e))?;
                    Environment::open(&data_file, env_options)?
                }
                Err(err) => return Err(err),
            };
            check_schema_version(&env, false)?;
            write_sidecar(&versioned_dir)?;
            env
        };

        Ok(Database {
            env,
            prefix_map: PathPrefixMap::from_mappings(settings.prefix_mappings.iter().cloned()),
            use_explicit_output_units: settings.use_explicit_output_units,
            sinks: SinkRegistry::default(),
            out_files: Mutex::new(HashSet::new()),
            versioned_dir,
        })
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Directory holding this schema version's store.
    pub fn directory(&self) -> &Path {
        &self.versioned_dir
    }

    /// Canonicalize a path for ingestion or lookup, applying the
    /// configured prefix mappings.
    pub fn canonicalize(&self, path: &Path) -> DbResult<CanonicalPath> {
        self.prefix_map.remap(path)
    }

    /// The configured prefix mappings, for hosts that need the reverse
    /// translation of stored paths.
    pub fn prefix_map(&self) -> &PathPrefixMap {
        &self.prefix_map
    }

    /// Begin a snapshot read transaction.
    pub fn read(&self) -> DbResult<ReadTransaction<'_>> {
        Ok(ReadTransaction::new(self.env.begin_read()?, self))
    }

    /// Begin an import transaction without the automatic retry loop.
    pub fn begin_import(&self) -> DbResult<ImportTransaction<'_>> {
        Ok(ImportTransaction::new(self.env.begin_write()?))
    }

    /// Run an import body and commit it, growing the map and retrying
    /// (bounded) when the write runs out of space. The body must be
    /// re-runnable: on retry it starts over on a fresh transaction.
    pub fn import<T>(
        &self,
        mut body: impl FnMut(&mut ImportTransaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut attempt = 0;
        loop {
            let mut txn = self.begin_import()?;
            let result = match body(&mut txn) {
                Ok(value) => txn.commit().map(|_| value),
                Err(err) => {
                    drop(txn);
                    Err(err)
                }
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_map_full() && attempt < MAX_IMPORT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "import hit map-full; growing");
                    self.env.grow()?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Register a hook fired after every commit with the new sequence
    /// number. Used by hosts for external change notification.
    pub fn on_commit(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        self.env.on_commit(hook);
    }

    // Event sinks

    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.add(sink);
    }

    /// Called by the ingestion driver as units are queued and finished.
    pub fn notify_processing_progress(&self, added: usize, completed: usize) {
        self.sinks.notify_progress(added, completed);
    }

    /// Called by the ingestion driver when a stored unit no longer
    /// matches the raw store.
    pub fn notify_unit_out_of_date(
        &self,
        unit: &OutOfDateUnit,
        out_of_date_mod_time: TimePoint,
        trigger: &OutOfDateTrigger,
        synchronous: bool,
    ) {
        self.sinks
            .notify_out_of_date(unit, out_of_date_mod_time, trigger, synchronous);
    }

    // Explicit output-unit registry

    /// Whether ingestion considers only explicitly registered output
    /// files.
    pub fn uses_explicit_output_units(&self) -> bool {
        self.use_explicit_output_units
    }

    /// Register build-output paths whose units the index should consider.
    /// Returns the code of each path.
    pub fn add_unit_out_file_paths(&self, paths: &[CanonicalPath]) -> Vec<Code> {
        let mut registry = self.out_files.lock();
        paths
            .iter()
            .map(|path| {
                let code = Code::of(path.as_str());
                registry.insert(code);
                code
            })
            .collect()
    }

    pub fn is_known_out_file(&self, code: Code) -> bool {
        self.out_files.lock().contains(&code)
    }
}

fn check_schema_version(env: &Environment, readonly: bool) -> DbResult<()> {
    let stored: Option<Option<u32>> = {
        let txn = env.begin_read()?;
        txn.get(MapId::Meta, META_SCHEMA_VERSION_KEY)
            .map(|bytes| bytes.try_into().ok().map(u32::from_le_bytes))
    };
    match stored {
        Some(Some(found)) if found == SCHEMA_VERSION => Ok(()),
        Some(Some(found)) => Err(DbError::IncompatibleVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
        Some(None) => Err(DbError::store("open", StoreErrorKind::Corrupted)),
        None if readonly => {
            // An empty read-only store cannot be tagged; accept it.
            Ok(())
        }
        None => {
            let mut txn = env.begin_write()?;
            txn.put(
                MapId::Meta,
                META_SCHEMA_VERSION_KEY,
                &SCHEMA_VERSION.to_le_bytes(),
            )?;
            txn.commit()?;
            Ok(())
        }
    }
}

fn write_sidecar(versioned_dir: &Path) -> DbResult<()> {
    let info_path = versioned_dir.join(INFO_FILE_NAME);
    let identity = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    if let Ok(existing) = fs::read_to_string(&info_path) {
        if let Ok(info) = serde_json::from_str::<SidecarInfo>(&existing) {
            if info.writer_identity != identity {
                tracing::warn!(
                    previous = %info.writer_identity,
                    current = %identity,
                    "database was last written by a different process"
                );
            }
        }
    }

    let info = SidecarInfo {
        schema_version: SCHEMA_VERSION,
        writer_identity: identity,
    };
    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| DbError::invalid_record(format!("failed to serialize sidecar: {e}")))?;
    fs::write(&info_path, json).map_err(|e| DbError::io(&info_path, e))?;
    Ok(())
}

/// Move a damaged versioned directory aside under a timestamped name.
fn archive_database(base: &Path, versioned_dir: &Path) -> DbResult<()> {
    if !versioned_dir.exists() {
        return Ok(());
    }
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let target = base.join(format!("saved-v{SCHEMA_VERSION}-{stamp}"));
    fs::rename(versioned_dir, &target).map_err(|e| DbError::io(versioned_dir, e))?;
    tracing::warn!(
        from = %versioned_dir.display(),
        to = %target.display(),
        "archived database directory"
    );
    Ok(())
}

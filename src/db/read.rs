//! Read-side typed API: USR lookups, name and filename scans, path joins,
//! and dependency-closure traversals.
//!
//! Every operation runs against one snapshot: results are consistent for
//! the lifetime of the transaction and unaffected by concurrent imports.
//! Missing keys fold into `None`/empty iterators rather than errors.

use std::collections::HashSet;

use crate::env::ReadTxn;
use crate::error::DbResult;
use crate::paths::CanonicalPath;
use crate::schema::MapId;
use crate::schema::records::{ProviderForUsr, TimestampedFileForProvider, UnitInfoRef};
use crate::types::{Code, GlobalKind, SymbolRoles, TimePoint};

use super::Database;
use super::pattern::{PatternOptions, matches_pattern};

/// Result-set page size for batched scans.
const SCAN_BATCH: usize = 128;

/// One provider's accumulated roles for a USR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsrProvider {
    pub provider: Code,
    pub roles: SymbolRoles,
    pub related_roles: SymbolRoles,
}

/// One file associated with a provider, resolved for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFileRef {
    pub path: CanonicalPath,
    pub mod_time: TimePoint,
    pub module: Option<String>,
    pub is_system: bool,
    pub sysroot: Option<String>,
}

/// Per-map entry counts, for tooling and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbStats {
    pub units: usize,
    pub providers: usize,
    pub usrs: usize,
    pub symbol_names: usize,
    pub files: usize,
    pub directories: usize,
}

fn code_from(bytes: &[u8]) -> Option<Code> {
    Some(Code::from_bytes(bytes.try_into().ok()?))
}

fn batched(codes: Vec<Code>) -> impl Iterator<Item = Vec<Code>> {
    let mut iter = codes.into_iter();
    std::iter::from_fn(move || {
        let batch: Vec<Code> = iter.by_ref().take(SCAN_BATCH).collect();
        (!batch.is_empty()).then_some(batch)
    })
}

/// Typed query handle over one read transaction.
pub struct ReadTransaction<'db> {
    txn: ReadTxn<'db>,
    db: &'db Database,
}

impl<'db> ReadTransaction<'db> {
    pub(crate) fn new(txn: ReadTxn<'db>, db: &'db Database) -> ReadTransaction<'db> {
        ReadTransaction { txn, db }
    }

    /// Sequence number of the commit this snapshot observes.
    pub fn seq(&self) -> u64 {
        self.txn.seq()
    }

    /// Providers that recorded occurrences of `usr`, filtered by role
    /// masks. Empty masks accept every entry.
    pub fn providers_for_usr(
        &self,
        usr: Code,
        role_filter: SymbolRoles,
        related_role_filter: SymbolRoles,
    ) -> impl Iterator<Item = UsrProvider> {
        let key = usr.to_bytes();
        let rows: Vec<UsrProvider> = self
            .txn
            .dups(MapId::ProvidersByUsr, &key)
            .filter_map(|bytes| match ProviderForUsr::decode(bytes) {
                Ok(row) => Some(UsrProvider {
                    provider: row.provider(),
                    roles: row.role_set(),
                    related_roles: row.related_role_set(),
                }),
                Err(_) => {
                    tracing::warn!(usr = usr.raw(), "skipping malformed provider row");
                    None
                }
            })
            .filter(move |entry| {
                (role_filter.is_empty() && related_role_filter.is_empty())
                    || entry.roles.intersects(role_filter)
                    || entry.related_roles.intersects(related_role_filter)
            })
            .collect();
        rows.into_iter()
    }

    /// For each unique file associated with `provider`, the most recent
    /// `(unit, mod_time)` entry whose unit passes `unit_filter`. Files
    /// with no passing unit are skipped.
    pub fn provider_file_refs(
        &self,
        provider: Code,
        mut unit_filter: impl FnMut(Code) -> bool,
    ) -> DbResult<Vec<ProviderFileRef>> {
        let key = provider.to_bytes();
        let mut rows = Vec::new();
        for bytes in self.txn.dups(MapId::TimestampedFilesByProvider, &key) {
            rows.push(TimestampedFileForProvider::decode(bytes)?);
        }

        let mut refs = Vec::new();
        let mut start = 0;
        while start < rows.len() {
            let file = rows[start].file();
            let mut end = start;
            let mut best: Option<TimestampedFileForProvider> = None;
            while end < rows.len() && rows[end].file() == file {
                if unit_filter(rows[end].unit()) {
                    best = match best {
                        Some(prev) if prev.mod_time() >= rows[end].mod_time() => Some(prev),
                        _ => Some(rows[end]),
                    };
                }
                end += 1;
            }
            if let Some(best) = best {
                if let Some(path) = self.full_path(file) {
                    let module = if best.module().is_empty() {
                        None
                    } else {
                        self.module_name(best.module())
                    };
                    let sysroot = match self.unit_info(best.unit())? {
                        Some(info) => info.sysroot().and_then(|code| self.directory_name(code)),
                        None => None,
                    };
                    refs.push(ProviderFileRef {
                        path,
                        mod_time: best.mod_time(),
                        module,
                        is_system: best.system(),
                        sysroot,
                    });
                }
            }
            start = end;
        }
        Ok(refs)
    }

    /// USR codes of one global kind, in batches.
    pub fn usrs_of_global_kind(&self, kind: GlobalKind) -> impl Iterator<Item = Vec<Code>> {
        let key = [kind as u8];
        let codes: Vec<Code> = self
            .txn
            .dups(MapId::UsrsByGlobalKind, &key)
            .filter_map(code_from)
            .collect();
        batched(codes)
    }

    /// Scan symbol names in sort order; each accepted name yields the
    /// full batch of its USR codes.
    pub fn find_usrs_matching<'a>(
        &'a self,
        pattern: &'a str,
        options: &'a PatternOptions,
    ) -> impl Iterator<Item = Vec<Code>> + 'a {
        self.txn
            .scan_keys(MapId::UsrsBySymbolName)
            .filter_map(move |key| {
                let name = std::str::from_utf8(key).ok()?;
                if !matches_pattern(name, pattern, options) {
                    return None;
                }
                let usrs: Vec<Code> = self
                    .txn
                    .dups(MapId::UsrsBySymbolName, key)
                    .filter_map(code_from)
                    .collect();
                (!usrs.is_empty()).then_some(usrs)
            })
    }

    /// Scan stored filenames; object files and module caches are
    /// excluded. Yields batches of file codes.
    // TODO: replace the .o/.pcm suffix exclusion with an out-file flag on
    // the filename row once the schema version is next bumped.
    pub fn find_filenames_matching<'a>(
        &'a self,
        pattern: &'a str,
        options: &'a PatternOptions,
    ) -> impl Iterator<Item = Vec<Code>> + 'a {
        let mut matches = self
            .txn
            .scan_single(MapId::FilenameByCode)
            .filter_map(move |(key, value)| {
                let name = std::str::from_utf8(value.get(8..)?).ok()?;
                if name.ends_with(".o") || name.ends_with(".pcm") {
                    return None;
                }
                if matches_pattern(name, pattern, options) {
                    code_from(key)
                } else {
                    None
                }
            });
        std::iter::from_fn(move || {
            let batch: Vec<Code> = matches.by_ref().take(SCAN_BATCH).collect();
            (!batch.is_empty()).then_some(batch)
        })
    }

    /// Join the stored directory and filename back into a full path.
    pub fn full_path(&self, file: Code) -> Option<CanonicalPath> {
        let row = self.txn.get(MapId::FilenameByCode, &file.to_bytes())?;
        let dir_code = code_from(row.get(..8)?)?;
        let name = std::str::from_utf8(row.get(8..)?).ok()?;
        let dir = self.directory_name(dir_code)?;
        Some(CanonicalPath::from_dir_and_name(&dir, name))
    }

    pub fn provider_name(&self, provider: Code) -> Option<String> {
        self.lookup_name(MapId::SymbolProviderNameByCode, provider)
    }

    pub fn directory_name(&self, dir: Code) -> Option<String> {
        self.lookup_name(MapId::DirNameByCode, dir)
    }

    pub fn module_name(&self, module: Code) -> Option<String> {
        self.lookup_name(MapId::ModuleNameByCode, module)
    }

    pub fn target_name(&self, target: Code) -> Option<String> {
        self.lookup_name(MapId::TargetNameByCode, target)
    }

    fn lookup_name(&self, map: MapId, code: Code) -> Option<String> {
        if code.is_empty() {
            return None;
        }
        let bytes = self.txn.get(map, &code.to_bytes())?;
        std::str::from_utf8(bytes).ok().map(str::to_string)
    }

    pub fn provider_has_test_symbols(&self, provider: Code) -> bool {
        self.txn
            .contains_key(MapId::ProvidersWithTestSymbols, &provider.to_bytes())
    }

    pub fn providers_with_test_symbols(&self) -> impl Iterator<Item = Code> + '_ {
        self.txn
            .scan_keys(MapId::ProvidersWithTestSymbols)
            .filter_map(code_from)
    }

    /// Zero-copy view of a unit's stored record, valid for the lifetime
    /// of this transaction.
    pub fn unit_info(&self, unit: Code) -> DbResult<Option<UnitInfoRef<'_>>> {
        let Some(bytes) = self.txn.get(MapId::UnitInfoByCode, &unit.to_bytes()) else {
            return Ok(None);
        };
        match UnitInfoRef::parse(bytes) {
            Ok(view) => Ok(Some(view)),
            Err(err) => {
                // A record we wrote ourselves failed to parse: the image
                // cannot be trusted anymore.
                self.db.env().poison();
                Err(err)
            }
        }
    }

    pub fn unit_info_by_name(&self, name: &str) -> DbResult<Option<UnitInfoRef<'_>>> {
        self.unit_info(Code::of(name))
    }

    /// Units listing `file` among their dependencies (record or plain).
    pub fn units_containing_file(&self, file: Code) -> impl Iterator<Item = Code> {
        let key = file.to_bytes();
        let units: Vec<Code> = self
            .txn
            .dups(MapId::UnitByFileDependency, &key)
            .filter_map(code_from)
            .collect();
        units.into_iter()
    }

    /// Units depending on `unit`.
    pub fn units_containing_unit(&self, unit: Code) -> impl Iterator<Item = Code> {
        let key = unit.to_bytes();
        let units: Vec<Code> = self
            .txn
            .dups(MapId::UnitByUnitDependency, &key)
            .filter_map(code_from)
            .collect();
        units.into_iter()
    }

    /// Root units (units with a main file) transitively depending on
    /// `file`. Cycles in the unit graph terminate at the visited set.
    pub fn root_units_of_file(&self, file: Code) -> DbResult<Vec<Code>> {
        let seeds: Vec<Code> = self.units_containing_file(file).collect();
        self.climb_to_roots(seeds)
    }

    /// Root units transitively depending on `unit`, including `unit`
    /// itself when it has a main file.
    pub fn root_units_of_unit(&self, unit: Code) -> DbResult<Vec<Code>> {
        self.climb_to_roots(vec![unit])
    }

    fn climb_to_roots(&self, seeds: Vec<Code>) -> DbResult<Vec<Code>> {
        let mut visited: HashSet<Code> = HashSet::new();
        let mut roots = Vec::new();
        let mut stack = seeds;
        while let Some(unit) = stack.pop() {
            if !visited.insert(unit) {
                continue;
            }
            if let Some(info) = self.unit_info(unit)? {
                if info.has_main_file() {
                    roots.push(unit);
                }
            }
            for parent in self.units_containing_unit(unit) {
                if !visited.contains(&parent) {
                    stack.push(parent);
                }
            }
        }
        Ok(roots)
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            units: self.txn.entry_count(MapId::UnitInfoByCode),
            providers: self.txn.entry_count(MapId::SymbolProviderNameByCode),
            usrs: self.txn.entry_count(MapId::ProvidersByUsr),
            symbol_names: self.txn.entry_count(MapId::UsrsBySymbolName),
            files: self.txn.entry_count(MapId::FilenameByCode),
            directories: self.txn.entry_count(MapId::DirNameByCode),
        }
    }
}

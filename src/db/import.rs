//! Write-side typed API: providers, symbol infos, file paths, unit
//! records, and the cascading removals that keep the inverted indexes
//! consistent.
//!
//! An import transaction wraps one environment write transaction; nothing
//! is visible to readers until [`ImportTransaction::commit`]. All inserts
//! are idempotent, so re-running an ingestion over unchanged input leaves
//! the stored byte image untouched.

use std::collections::BTreeSet;

use zerocopy::AsBytes;

use crate::env::WriteTxn;
use crate::error::DbResult;
use crate::paths::CanonicalPath;
use crate::schema::MapId;
use crate::schema::records::{
    ProviderForUsr, TimestampedFileForProvider, UnitInfoOwned,
};
use crate::types::{Code, GlobalKind, SymbolInfo, SymbolProperties, SymbolRoles, TimePoint};

use super::diff::{self, UnitDescription, UnitImportOutcome};

/// Typed mutation handle over one write transaction.
pub struct ImportTransaction<'db> {
    pub(crate) txn: WriteTxn<'db>,
}

impl<'db> ImportTransaction<'db> {
    pub(crate) fn new(txn: WriteTxn<'db>) -> ImportTransaction<'db> {
        ImportTransaction { txn }
    }

    /// The stable code a unit name maps to.
    pub fn unit_code(&self, name: &str) -> Code {
        Code::of(name)
    }

    /// Derive the code identifying a unit file. The name itself is stored
    /// inside the unit's record at import time.
    pub fn add_unit_file_identifier(&mut self, unit_file: &str) -> Code {
        Code::of(unit_file)
    }

    /// Intern a provider name. Returns the code and whether it was newly
    /// inserted.
    pub fn add_provider_name(&mut self, name: &str) -> DbResult<(Code, bool)> {
        let code = Code::of(name);
        let inserted = self.txn.put_if_absent(
            MapId::SymbolProviderNameByCode,
            &code.to_bytes(),
            name.as_bytes(),
        )?;
        Ok((code, inserted))
    }

    /// Mark a provider as contributing test symbols.
    pub fn set_provider_contains_test_symbols(&mut self, provider: Code) -> DbResult<()> {
        self.txn
            .put_if_absent(MapId::ProvidersWithTestSymbols, &provider.to_bytes(), &[])?;
        Ok(())
    }

    pub fn provider_contains_test_symbols(&self, provider: Code) -> bool {
        self.txn
            .contains_key(MapId::ProvidersWithTestSymbols, &provider.to_bytes())
    }

    /// Record one symbol occurrence for `(provider, usr)`.
    ///
    /// Roles accumulate across occurrences; the stored row is rewritten
    /// only when the accumulated bits actually change. Declaration and
    /// definition sites feed the name and global-kind indexes; a
    /// unit-test definition additionally marks the provider and the
    /// test-specific global kind.
    pub fn add_symbol_info(
        &mut self,
        provider: Code,
        usr: &str,
        name: &str,
        info: &SymbolInfo,
        roles: SymbolRoles,
        related_roles: SymbolRoles,
    ) -> DbResult<Code> {
        let usr_code = Code::of(usr);
        let usr_key = usr_code.to_bytes();
        let prefix = ProviderForUsr::provider_prefix(provider);
        let existing: Option<Vec<u8>> = self
            .txn
            .dups_with_prefix(MapId::ProvidersByUsr, &usr_key, &prefix)
            .next()
            .map(|row| row.to_vec());

        let (merged_roles, merged_related) = match &existing {
            Some(bytes) => {
                let row = ProviderForUsr::decode(bytes)?;
                (
                    row.role_set() | roles,
                    row.related_role_set() | related_roles,
                )
            }
            None => (roles, related_roles),
        };
        let row = ProviderForUsr::new(provider, merged_roles, merged_related);
        if existing.as_deref() != Some(row.as_bytes()) {
            if let Some(old) = &existing {
                self.txn.remove_dup(MapId::ProvidersByUsr, &usr_key, old)?;
            }
            self.txn
                .insert_dup(MapId::ProvidersByUsr, &usr_key, row.as_bytes())?;
        }

        let decl_or_def = roles.intersects(SymbolRoles::DECLARATION | SymbolRoles::DEFINITION);
        if decl_or_def {
            if !name.is_empty() && info.include_in_global_name_search() {
                self.txn
                    .insert_dup(MapId::UsrsBySymbolName, name.as_bytes(), &usr_key)?;
            }
            if let Some(kind) = GlobalKind::of(info.kind) {
                self.txn
                    .insert_dup(MapId::UsrsByGlobalKind, &[kind as u8], &usr_key)?;
            }
        }
        if info.properties.contains(SymbolProperties::UNIT_TEST)
            && roles.contains(SymbolRoles::DEFINITION)
        {
            if let Some(kind) = GlobalKind::test_kind_of(info.kind) {
                self.txn
                    .insert_dup(MapId::UsrsByGlobalKind, &[kind as u8], &usr_key)?;
            }
            self.set_provider_contains_test_symbols(provider)?;
        }
        Ok(usr_code)
    }

    /// Intern a file path: directory string, filename row, and the
    /// directory's reverse index. Idempotent.
    pub fn add_file_path(&mut self, path: &CanonicalPath) -> DbResult<Code> {
        let (dir, name) = path.split();
        let dir_code = Code::of(dir);
        let file_code = Code::of(path.as_str());

        self.txn
            .put_if_absent(MapId::DirNameByCode, &dir_code.to_bytes(), dir.as_bytes())?;
        if !self
            .txn
            .contains_key(MapId::FilenameByCode, &file_code.to_bytes())
        {
            let mut value = Vec::with_capacity(8 + name.len());
            value.extend_from_slice(&dir_code.to_bytes());
            value.extend_from_slice(name.as_bytes());
            self.txn
                .put(MapId::FilenameByCode, &file_code.to_bytes(), &value)?;
        }
        self.txn.insert_dup(
            MapId::FilePathCodesByDir,
            &dir_code.to_bytes(),
            &file_code.to_bytes(),
        )?;
        Ok(file_code)
    }

    /// Intern a module name; empty or absent names map to the empty code.
    pub fn add_module_name(&mut self, name: &str) -> DbResult<Code> {
        if name.is_empty() {
            return Ok(Code::EMPTY);
        }
        let code = Code::of(name);
        self.txn
            .put_if_absent(MapId::ModuleNameByCode, &code.to_bytes(), name.as_bytes())?;
        Ok(code)
    }

    pub fn add_target_name(&mut self, name: &str) -> DbResult<Code> {
        if name.is_empty() {
            return Ok(Code::EMPTY);
        }
        let code = Code::of(name);
        self.txn
            .put_if_absent(MapId::TargetNameByCode, &code.to_bytes(), name.as_bytes())?;
        Ok(code)
    }

    pub(crate) fn add_directory_name(&mut self, dir: &str) -> DbResult<Code> {
        if dir.is_empty() {
            return Ok(Code::EMPTY);
        }
        let code = Code::of(dir);
        self.txn
            .put_if_absent(MapId::DirNameByCode, &code.to_bytes(), dir.as_bytes())?;
        Ok(code)
    }

    /// Associate `(file, unit)` with a provider, keeping the stored
    /// mod-time at the maximum ever observed for the triple.
    pub fn add_file_association_for_provider(
        &mut self,
        provider: Code,
        file: Code,
        unit: Code,
        mod_time: TimePoint,
        module: Code,
        is_system: bool,
    ) -> DbResult<()> {
        let key = provider.to_bytes();
        let row = TimestampedFileForProvider::new(file, unit, module, mod_time, is_system);
        if self
            .txn
            .dup_contains(MapId::TimestampedFilesByProvider, &key, row.as_bytes())
        {
            return Ok(());
        }

        let prefix = TimestampedFileForProvider::file_unit_prefix(file, unit);
        let existing: Vec<Vec<u8>> = self
            .txn
            .dups_with_prefix(MapId::TimestampedFilesByProvider, &key, &prefix)
            .map(|v| v.to_vec())
            .collect();
        if existing.is_empty() {
            self.txn
                .insert_dup(MapId::TimestampedFilesByProvider, &key, row.as_bytes())?;
            return Ok(());
        }

        let mut max_time = mod_time;
        for bytes in &existing {
            max_time = max_time.max(TimestampedFileForProvider::decode(bytes)?.mod_time());
        }
        let merged = TimestampedFileForProvider::new(file, unit, module, max_time, is_system);
        if existing.len() == 1 && existing[0] == merged.as_bytes() {
            return Ok(());
        }
        for bytes in &existing {
            self.txn
                .remove_dup(MapId::TimestampedFilesByProvider, &key, bytes)?;
        }
        self.txn
            .insert_dup(MapId::TimestampedFilesByProvider, &key, merged.as_bytes())?;
        Ok(())
    }

    /// Drop the `(file, unit)` association. Returns true when the
    /// provider has no file associations left, which tells the caller to
    /// drop provider-level indexes.
    pub fn remove_file_association_from_provider(
        &mut self,
        provider: Code,
        file: Code,
        unit: Code,
    ) -> DbResult<bool> {
        let key = provider.to_bytes();
        let prefix = TimestampedFileForProvider::file_unit_prefix(file, unit);
        let stale: Vec<Vec<u8>> = self
            .txn
            .dups_with_prefix(MapId::TimestampedFilesByProvider, &key, &prefix)
            .map(|v| v.to_vec())
            .collect();
        for bytes in &stale {
            self.txn
                .remove_dup(MapId::TimestampedFilesByProvider, &key, bytes)?;
        }
        Ok(self.txn.dup_count(MapId::TimestampedFilesByProvider, &key) == 0)
    }

    pub(crate) fn add_file_dependency_edge(&mut self, file: Code, unit: Code) -> DbResult<()> {
        self.txn
            .insert_dup(MapId::UnitByFileDependency, &file.to_bytes(), &unit.to_bytes())?;
        Ok(())
    }

    pub(crate) fn remove_file_dependency_edge(&mut self, file: Code, unit: Code) -> DbResult<()> {
        self.txn
            .remove_dup(MapId::UnitByFileDependency, &file.to_bytes(), &unit.to_bytes())?;
        Ok(())
    }

    pub(crate) fn add_unit_dependency_edge(&mut self, depended: Code, unit: Code) -> DbResult<()> {
        self.txn.insert_dup(
            MapId::UnitByUnitDependency,
            &depended.to_bytes(),
            &unit.to_bytes(),
        )?;
        Ok(())
    }

    pub(crate) fn remove_unit_dependency_edge(
        &mut self,
        depended: Code,
        unit: Code,
    ) -> DbResult<()> {
        self.txn.remove_dup(
            MapId::UnitByUnitDependency,
            &depended.to_bytes(),
            &unit.to_bytes(),
        )?;
        Ok(())
    }

    pub(crate) fn clear_provider_marks(&mut self, provider: Code) -> DbResult<()> {
        self.txn
            .remove_key(MapId::ProvidersWithTestSymbols, &provider.to_bytes())?;
        Ok(())
    }

    pub(crate) fn put_unit_record(&mut self, unit: Code, record: &UnitInfoOwned) -> DbResult<()> {
        let bytes = record.encode()?;
        self.txn.put(MapId::UnitInfoByCode, &unit.to_bytes(), &bytes)
    }

    /// The stored record for `unit`, decoded, if any.
    pub fn unit_info_owned(&self, unit: Code) -> DbResult<Option<UnitInfoOwned>> {
        match self.txn.get(MapId::UnitInfoByCode, &unit.to_bytes()) {
            Some(bytes) => Ok(Some(UnitInfoOwned::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Reconcile a freshly decoded unit description against the stored
    /// state, adding only new edges and removing only stale ones.
    pub fn import_unit(&mut self, desc: &UnitDescription) -> DbResult<UnitImportOutcome> {
        diff::apply_unit(self, desc)
    }

    /// Remove a unit and every inverted-index entry that referred to it.
    /// Provider file associations are dropped only when no other unit
    /// still references the `(provider, file)` pair.
    pub fn remove_unit_data(&mut self, unit: Code) -> DbResult<bool> {
        let Some(info) = self.unit_info_owned(unit)? else {
            return Ok(false);
        };
        tracing::debug!(unit = %info.name, "removing unit data");

        let files: BTreeSet<Code> = info.combined_file_depends().collect();
        for file in files {
            self.remove_file_dependency_edge(file, unit)?;
        }
        for depended in &info.unit_depends {
            self.remove_unit_dependency_edge(*depended, unit)?;
        }
        for (provider, file) in &info.provider_depends {
            if self.remove_file_association_from_provider(*provider, *file, unit)? {
                self.clear_provider_marks(*provider)?;
            }
        }
        self.txn.remove_key(MapId::UnitInfoByCode, &unit.to_bytes())?;
        Ok(true)
    }

    pub fn remove_unit_data_by_name(&mut self, name: &str) -> DbResult<bool> {
        self.remove_unit_data(Code::of(name))
    }

    /// Atomically publish everything written through this transaction.
    pub fn commit(self) -> DbResult<u64> {
        self.txn.commit()
    }
}

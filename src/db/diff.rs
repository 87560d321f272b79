//! Differential unit import.
//!
//! A freshly decoded unit description is reconciled against its stored
//! predecessor: dependencies still present keep their edges, new ones are
//! added, and whatever remains of the previous sets afterwards is stale
//! and gets removed. A matching mod-time short-circuits the whole import,
//! leaving the on-disk byte image untouched.

use std::collections::BTreeSet;

use crate::error::DbResult;
use crate::paths::CanonicalPath;
use crate::schema::records::{UnitFlags, UnitInfoOwned};
use crate::types::{Code, ProviderKind, TimePoint};

use super::import::ImportTransaction;

/// Fully decoded description of one build unit, as handed over by the
/// raw-store reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescription {
    pub name: String,
    pub provider_kind: ProviderKind,
    pub mod_time: TimePoint,
    pub is_system: bool,
    pub main_file: Option<CanonicalPath>,
    pub out_file: Option<CanonicalPath>,
    pub sysroot: Option<CanonicalPath>,
    pub target: Option<String>,
    /// Files the unit depends on without contributing symbols (headers,
    /// module maps).
    pub file_depends: Vec<CanonicalPath>,
    /// Names of units this unit depends on.
    pub unit_depends: Vec<String>,
    /// Symbol providers with the file each one covers.
    pub provider_depends: Vec<ProviderDependencyDesc>,
}

/// One provider dependency of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDependencyDesc {
    pub provider_name: String,
    pub file: CanonicalPath,
    pub module_name: Option<String>,
    pub is_system: bool,
    pub mod_time: TimePoint,
}

/// What an import did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitImportOutcome {
    /// No prior record existed.
    Created,
    /// A prior record existed and was reconciled.
    Updated,
    /// The stored mod-time matches; nothing was written.
    UpToDate,
}

pub(crate) fn apply_unit(
    txn: &mut ImportTransaction<'_>,
    desc: &UnitDescription,
) -> DbResult<UnitImportOutcome> {
    let unit_code = Code::of(&desc.name);
    let prior = txn.unit_info_owned(unit_code)?;

    if let Some(prior) = &prior {
        if prior.mod_time == desc.mod_time {
            return Ok(UnitImportOutcome::UpToDate);
        }
    }
    let outcome = if prior.is_some() {
        UnitImportOutcome::Updated
    } else {
        UnitImportOutcome::Created
    };

    // Previous state, consumed as matching dependencies are encountered.
    let mut prev_files: BTreeSet<Code> = prior
        .as_ref()
        .map(|p| p.combined_file_depends().collect())
        .unwrap_or_default();
    let mut prev_units: BTreeSet<Code> = prior
        .as_ref()
        .map(|p| p.unit_depends.iter().copied().collect())
        .unwrap_or_default();
    let mut prev_providers: BTreeSet<(Code, Code)> = prior
        .as_ref()
        .map(|p| p.provider_depends.iter().copied().collect())
        .unwrap_or_default();

    let mut flags = UnitFlags::empty();
    if desc.is_system {
        flags |= UnitFlags::IS_SYSTEM;
    }

    let main_file = match &desc.main_file {
        Some(path) => {
            flags |= UnitFlags::HAS_MAIN_FILE;
            txn.add_file_path(path)?
        }
        None => Code::EMPTY,
    };
    let out_file = match &desc.out_file {
        Some(path) => txn.add_file_path(path)?,
        None => Code::EMPTY,
    };
    let sysroot = match &desc.sysroot {
        Some(path) => {
            flags |= UnitFlags::HAS_SYSROOT;
            txn.add_directory_name(path.as_str())?
        }
        None => Code::EMPTY,
    };
    let target = match &desc.target {
        Some(name) => txn.add_target_name(name)?,
        None => Code::EMPTY,
    };

    let mut record = UnitInfoOwned {
        name: desc.name.clone(),
        main_file,
        out_file,
        sysroot,
        target,
        mod_time: desc.mod_time,
        provider_kind: desc.provider_kind,
        flags,
        file_depends: Vec::with_capacity(desc.file_depends.len()),
        unit_depends: Vec::with_capacity(desc.unit_depends.len()),
        provider_depends: Vec::with_capacity(desc.provider_depends.len()),
    };

    // Dependency arrays are stored deduplicated; `seen_*` also guards the
    // edge bookkeeping against repeated input entries.
    let mut seen_files: BTreeSet<Code> = BTreeSet::new();
    let mut seen_units: BTreeSet<Code> = BTreeSet::new();
    let mut seen_providers: BTreeSet<(Code, Code)> = BTreeSet::new();

    for path in &desc.file_depends {
        let file = txn.add_file_path(path)?;
        if seen_files.insert(file) {
            record.file_depends.push(file);
            if !prev_files.remove(&file) {
                txn.add_file_dependency_edge(file, unit_code)?;
            }
        }
    }

    for name in &desc.unit_depends {
        let depended = Code::of(name);
        if seen_units.insert(depended) {
            record.unit_depends.push(depended);
            if !prev_units.remove(&depended) {
                txn.add_unit_dependency_edge(depended, unit_code)?;
            }
        }
    }

    let mut has_test_symbols = false;
    for dep in &desc.provider_depends {
        let (provider, _) = txn.add_provider_name(&dep.provider_name)?;
        let file = txn.add_file_path(&dep.file)?;
        let module = match &dep.module_name {
            Some(name) => txn.add_module_name(name)?,
            None => Code::EMPTY,
        };

        if seen_providers.insert((provider, file)) {
            record.provider_depends.push((provider, file));
            prev_providers.remove(&(provider, file));
        }
        if seen_files.insert(file) && !prev_files.remove(&file) {
            txn.add_file_dependency_edge(file, unit_code)?;
        }
        txn.add_file_association_for_provider(
            provider,
            file,
            unit_code,
            dep.mod_time,
            module,
            dep.is_system,
        )?;
        if txn.provider_contains_test_symbols(provider) {
            has_test_symbols = true;
        }
    }

    // Whatever the new description no longer mentions is stale.
    for file in prev_files {
        txn.remove_file_dependency_edge(file, unit_code)?;
    }
    for depended in prev_units {
        txn.remove_unit_dependency_edge(depended, unit_code)?;
    }
    for (provider, file) in prev_providers {
        if txn.remove_file_association_from_provider(provider, file, unit_code)? {
            txn.clear_provider_marks(provider)?;
        }
    }

    if has_test_symbols {
        record.flags |= UnitFlags::HAS_TEST_SYMBOLS;
    }
    txn.put_unit_record(unit_code, &record)?;
    tracing::debug!(unit = %desc.name, ?outcome, "imported unit");
    Ok(outcome)
}

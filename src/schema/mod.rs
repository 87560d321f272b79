//! Named-map schema: which maps exist, their key/value disciplines, and
//! the frozen binary record layouts (see [`records`]).
//!
//! Every map's open-time behavior (sorted duplicates, fixed duplicate
//! size) is pinned by [`SCHEMA_VERSION`]; incompatible layout changes bump
//! the version and refuse older files.

pub mod records;

/// Version tag for the on-disk schema. Stored both in the sidecar metadata
/// file and under [`META_SCHEMA_VERSION_KEY`] in the [`MapId::Meta`] map.
pub const SCHEMA_VERSION: u32 = 1;

/// Keys longer than this are truncated to this length; the truncated bytes
/// are the lookup identity.
pub const MAX_KEY_SIZE: usize = 511;

/// Key in [`MapId::Meta`] holding the little-endian `u32` schema version.
pub const META_SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Open-time behavior of a named map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    /// Multiple values per key, kept in byte-wise sorted order.
    pub dup_sorted: bool,
    /// All duplicate values share this exact size, enabling bulk page
    /// reads.
    pub fixed_dup_size: Option<usize>,
}

impl MapFlags {
    const fn single() -> MapFlags {
        MapFlags {
            dup_sorted: false,
            fixed_dup_size: None,
        }
    }

    const fn dup_fixed(size: usize) -> MapFlags {
        MapFlags {
            dup_sorted: true,
            fixed_dup_size: Some(size),
        }
    }
}

/// The named maps of the database. One per row of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MapId {
    /// Internal metadata (schema version tag).
    Meta = 0,
    /// `usr_code -> (provider_code, roles, related_roles)` (sorted dups).
    ProvidersByUsr = 1,
    /// `symbol name -> usr_code` (sorted dups).
    UsrsBySymbolName = 2,
    /// `GlobalKind byte -> usr_code` (sorted dups).
    UsrsByGlobalKind = 3,
    /// `directory_code -> file_code` (sorted dups).
    FilePathCodesByDir = 4,
    /// `provider_code -> (file, unit, module, nanos, is_system)` (sorted dups).
    TimestampedFilesByProvider = 5,
    /// `file_code -> unit_code` (sorted dups).
    UnitByFileDependency = 6,
    /// `unit_code -> dependent unit_code` (sorted dups).
    UnitByUnitDependency = 7,
    /// `provider_code -> ()`; presence marks a provider with test symbols.
    ProvidersWithTestSymbols = 8,
    /// `provider_code -> provider name`.
    SymbolProviderNameByCode = 9,
    /// `directory_code -> directory path`.
    DirNameByCode = 10,
    /// `file_code -> directory_code || filename`.
    FilenameByCode = 11,
    /// `unit_code -> UnitInfo record`.
    UnitInfoByCode = 12,
    /// `target_code -> target triple`.
    TargetNameByCode = 13,
    /// `module_code -> module name`.
    ModuleNameByCode = 14,
}

/// Total number of named maps.
pub const MAP_COUNT: usize = 15;

impl MapId {
    pub const ALL: [MapId; MAP_COUNT] = [
        MapId::Meta,
        MapId::ProvidersByUsr,
        MapId::UsrsBySymbolName,
        MapId::UsrsByGlobalKind,
        MapId::FilePathCodesByDir,
        MapId::TimestampedFilesByProvider,
        MapId::UnitByFileDependency,
        MapId::UnitByUnitDependency,
        MapId::ProvidersWithTestSymbols,
        MapId::SymbolProviderNameByCode,
        MapId::DirNameByCode,
        MapId::FilenameByCode,
        MapId::UnitInfoByCode,
        MapId::TargetNameByCode,
        MapId::ModuleNameByCode,
    ];

    pub fn from_u8(value: u8) -> Option<MapId> {
        MapId::ALL.get(value as usize).copied()
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::ProvidersByUsr => "providers_by_usr",
            Self::UsrsBySymbolName => "usrs_by_symbol_name",
            Self::UsrsByGlobalKind => "usrs_by_global_kind",
            Self::FilePathCodesByDir => "file_path_codes_by_dir",
            Self::TimestampedFilesByProvider => "timestamped_files_by_provider",
            Self::UnitByFileDependency => "unit_by_file_dependency",
            Self::UnitByUnitDependency => "unit_by_unit_dependency",
            Self::ProvidersWithTestSymbols => "providers_with_test_symbols",
            Self::SymbolProviderNameByCode => "symbol_provider_name_by_code",
            Self::DirNameByCode => "dir_name_by_code",
            Self::FilenameByCode => "filename_by_code",
            Self::UnitInfoByCode => "unit_info_by_code",
            Self::TargetNameByCode => "target_name_by_code",
            Self::ModuleNameByCode => "module_name_by_code",
        }
    }

    pub const fn flags(self) -> MapFlags {
        match self {
            Self::Meta
            | Self::ProvidersWithTestSymbols
            | Self::SymbolProviderNameByCode
            | Self::DirNameByCode
            | Self::FilenameByCode
            | Self::UnitInfoByCode
            | Self::TargetNameByCode
            | Self::ModuleNameByCode => MapFlags::single(),
            Self::ProvidersByUsr => MapFlags::dup_fixed(records::ProviderForUsr::SIZE),
            Self::TimestampedFilesByProvider => {
                MapFlags::dup_fixed(records::TimestampedFileForProvider::SIZE)
            }
            Self::UsrsBySymbolName
            | Self::UsrsByGlobalKind
            | Self::FilePathCodesByDir
            | Self::UnitByFileDependency
            | Self::UnitByUnitDependency => MapFlags::dup_fixed(8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_id_round_trip() {
        for (idx, map) in MapId::ALL.iter().enumerate() {
            assert_eq!(map.index(), idx);
            assert_eq!(MapId::from_u8(idx as u8), Some(*map));
        }
        assert_eq!(MapId::from_u8(MAP_COUNT as u8), None);
    }

    #[test]
    fn test_dup_maps_have_fixed_sizes() {
        assert_eq!(MapId::ProvidersByUsr.flags().fixed_dup_size, Some(24));
        assert_eq!(
            MapId::TimestampedFilesByProvider.flags().fixed_dup_size,
            Some(33)
        );
        assert_eq!(MapId::UnitByFileDependency.flags().fixed_dup_size, Some(8));
        assert!(!MapId::UnitInfoByCode.flags().dup_sorted);
    }
}

//! Bit-exact binary record layouts.
//!
//! Every layout here is frozen under [`super::SCHEMA_VERSION`]. All fields
//! are little-endian and packed; the byteorder wrapper types keep each
//! struct alignment-1 so records can be read straight out of the mapped
//! region regardless of where a value landed in the file.
//!
//! `UnitInfo` records are padded with zeros to a multiple of 8 so the
//! embedded code arrays stay slice-castable without copying.

use bitflags::bitflags;
use zerocopy::byteorder::{I64, LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Ref, Unaligned};

use crate::error::{DbError, DbResult};
use crate::types::{Code, ProviderKind, SymbolRoles, TimePoint};

type LE = LittleEndian;

/// Duplicate value of `ProvidersByUsr`: one provider's accumulated roles
/// for a USR. 24 bytes.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ProviderForUsr {
    pub provider_code: U64<LE>,
    pub roles: U64<LE>,
    pub related_roles: U64<LE>,
}

impl ProviderForUsr {
    pub const SIZE: usize = 24;

    pub fn new(provider: Code, roles: SymbolRoles, related_roles: SymbolRoles) -> ProviderForUsr {
        ProviderForUsr {
            provider_code: U64::new(provider.raw()),
            roles: U64::new(roles.bits()),
            related_roles: U64::new(related_roles.bits()),
        }
    }

    pub fn decode(bytes: &[u8]) -> DbResult<ProviderForUsr> {
        ProviderForUsr::read_from(bytes)
            .ok_or_else(|| DbError::invalid_record("provider-for-usr row has wrong size"))
    }

    pub fn provider(&self) -> Code {
        Code::from_raw(self.provider_code.get())
    }

    pub fn role_set(&self) -> SymbolRoles {
        SymbolRoles::from_bits_retain(self.roles.get())
    }

    pub fn related_role_set(&self) -> SymbolRoles {
        SymbolRoles::from_bits_retain(self.related_roles.get())
    }

    /// The 8-byte duplicate prefix selecting one provider's row.
    pub fn provider_prefix(provider: Code) -> [u8; 8] {
        provider.to_bytes()
    }
}

/// Duplicate value of `TimestampedFilesByProvider`. 33 bytes packed; the
/// odd width is deliberate and documented (no tail padding).
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct TimestampedFileForProvider {
    pub file_code: U64<LE>,
    pub unit_code: U64<LE>,
    pub module_name_code: U64<LE>,
    pub nanos: I64<LE>,
    pub is_system: u8,
}

impl TimestampedFileForProvider {
    pub const SIZE: usize = 33;

    pub fn new(
        file: Code,
        unit: Code,
        module: Code,
        mod_time: TimePoint,
        is_system: bool,
    ) -> TimestampedFileForProvider {
        TimestampedFileForProvider {
            file_code: U64::new(file.raw()),
            unit_code: U64::new(unit.raw()),
            module_name_code: U64::new(module.raw()),
            nanos: I64::new(mod_time.nanos()),
            is_system: is_system as u8,
        }
    }

    pub fn decode(bytes: &[u8]) -> DbResult<TimestampedFileForProvider> {
        TimestampedFileForProvider::read_from(bytes)
            .ok_or_else(|| DbError::invalid_record("timestamped-file row has wrong size"))
    }

    pub fn file(&self) -> Code {
        Code::from_raw(self.file_code.get())
    }

    pub fn unit(&self) -> Code {
        Code::from_raw(self.unit_code.get())
    }

    pub fn module(&self) -> Code {
        Code::from_raw(self.module_name_code.get())
    }

    pub fn mod_time(&self) -> TimePoint {
        TimePoint::from_nanos(self.nanos.get())
    }

    pub fn system(&self) -> bool {
        self.is_system != 0
    }

    /// Duplicate prefix selecting every unit's row for one file.
    pub fn file_prefix(file: Code) -> [u8; 8] {
        file.to_bytes()
    }

    /// Duplicate prefix selecting the single `(file, unit)` row.
    pub fn file_unit_prefix(file: Code, unit: Code) -> [u8; 16] {
        let mut prefix = [0u8; 16];
        prefix[..8].copy_from_slice(&file.to_bytes());
        prefix[8..].copy_from_slice(&unit.to_bytes());
        prefix
    }
}

/// One provider dependency inside a `UnitInfo` record.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ProviderDependency {
    pub provider_code: U64<LE>,
    pub file_code: U64<LE>,
}

impl ProviderDependency {
    pub fn provider(&self) -> Code {
        Code::from_raw(self.provider_code.get())
    }

    pub fn file(&self) -> Code {
        Code::from_raw(self.file_code.get())
    }
}

bitflags! {
    /// Flag byte of a `UnitInfo` record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnitFlags: u8 {
        const HAS_MAIN_FILE = 1 << 0;
        const HAS_SYSROOT = 1 << 1;
        const IS_SYSTEM = 1 << 2;
        const HAS_TEST_SYMBOLS = 1 << 3;
    }
}

/// Fixed 56-byte header of a `UnitInfo` record.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct UnitInfoHeader {
    pub main_file_code: U64<LE>,
    pub out_file_code: U64<LE>,
    pub sysroot_code: U64<LE>,
    pub target_code: U64<LE>,
    pub nanos: I64<LE>,
    pub name_len: U16<LE>,
    pub provider_kind: u8,
    pub flags: u8,
    pub file_depends_count: U32<LE>,
    pub unit_depends_count: U32<LE>,
    pub provider_depends_count: U32<LE>,
}

impl UnitInfoHeader {
    pub const SIZE: usize = 56;
}

/// Zero-copy view of a `UnitInfo` record, borrowed from the mapped region
/// for the lifetime of a read transaction.
#[derive(Clone, Copy)]
pub struct UnitInfoRef<'a> {
    header: &'a UnitInfoHeader,
    file_depends: &'a [U64<LE>],
    unit_depends: &'a [U64<LE>],
    provider_depends: &'a [ProviderDependency],
    name: &'a str,
}

impl<'a> UnitInfoRef<'a> {
    pub fn parse(bytes: &'a [u8]) -> DbResult<UnitInfoRef<'a>> {
        let (header, rest) = Ref::<_, UnitInfoHeader>::new_from_prefix(bytes)
            .ok_or_else(|| DbError::invalid_record("unit record shorter than its header"))?;
        let header = header.into_ref();

        let file_count = header.file_depends_count.get() as usize;
        let unit_count = header.unit_depends_count.get() as usize;
        let provider_count = header.provider_depends_count.get() as usize;
        let name_len = header.name_len.get() as usize;

        let (file_depends, rest) = Ref::<_, [U64<LE>]>::new_slice_from_prefix(rest, file_count)
            .ok_or_else(|| DbError::invalid_record("unit record truncated in file dependencies"))?;
        let (unit_depends, rest) = Ref::<_, [U64<LE>]>::new_slice_from_prefix(rest, unit_count)
            .ok_or_else(|| DbError::invalid_record("unit record truncated in unit dependencies"))?;
        let (provider_depends, rest) =
            Ref::<_, [ProviderDependency]>::new_slice_from_prefix(rest, provider_count)
                .ok_or_else(|| {
                    DbError::invalid_record("unit record truncated in provider dependencies")
                })?;

        if rest.len() < name_len {
            return Err(DbError::invalid_record("unit record truncated in name"));
        }
        let name = std::str::from_utf8(&rest[..name_len])
            .map_err(|_| DbError::invalid_record("unit name is not valid UTF-8"))?;

        Ok(UnitInfoRef {
            header,
            file_depends: file_depends.into_slice(),
            unit_depends: unit_depends.into_slice(),
            provider_depends: provider_depends.into_slice(),
            name,
        })
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn flags(&self) -> UnitFlags {
        UnitFlags::from_bits_truncate(self.header.flags)
    }

    pub fn has_main_file(&self) -> bool {
        self.flags().contains(UnitFlags::HAS_MAIN_FILE)
    }

    pub fn has_sysroot(&self) -> bool {
        self.flags().contains(UnitFlags::HAS_SYSROOT)
    }

    pub fn is_system(&self) -> bool {
        self.flags().contains(UnitFlags::IS_SYSTEM)
    }

    pub fn has_test_symbols(&self) -> bool {
        self.flags().contains(UnitFlags::HAS_TEST_SYMBOLS)
    }

    pub fn main_file(&self) -> Option<Code> {
        self.has_main_file()
            .then(|| Code::from_raw(self.header.main_file_code.get()))
    }

    pub fn out_file(&self) -> Code {
        Code::from_raw(self.header.out_file_code.get())
    }

    pub fn sysroot(&self) -> Option<Code> {
        self.has_sysroot()
            .then(|| Code::from_raw(self.header.sysroot_code.get()))
    }

    pub fn target(&self) -> Code {
        Code::from_raw(self.header.target_code.get())
    }

    pub fn mod_time(&self) -> TimePoint {
        TimePoint::from_nanos(self.header.nanos.get())
    }

    pub fn provider_kind(&self) -> Option<ProviderKind> {
        ProviderKind::from_u8(self.header.provider_kind)
    }

    pub fn file_depends(&self) -> impl ExactSizeIterator<Item = Code> + 'a {
        self.file_depends.iter().map(|c| Code::from_raw(c.get()))
    }

    pub fn unit_depends(&self) -> impl ExactSizeIterator<Item = Code> + 'a {
        self.unit_depends.iter().map(|c| Code::from_raw(c.get()))
    }

    pub fn provider_depends(&self) -> &'a [ProviderDependency] {
        self.provider_depends
    }

    pub fn to_owned(&self) -> UnitInfoOwned {
        UnitInfoOwned {
            name: self.name.to_string(),
            main_file: self.main_file().unwrap_or(Code::EMPTY),
            out_file: self.out_file(),
            sysroot: self.sysroot().unwrap_or(Code::EMPTY),
            target: self.target(),
            mod_time: self.mod_time(),
            provider_kind: self.provider_kind().unwrap_or(ProviderKind::Clang),
            flags: self.flags(),
            file_depends: self.file_depends().collect(),
            unit_depends: self.unit_depends().collect(),
            provider_depends: self
                .provider_depends
                .iter()
                .map(|p| (p.provider(), p.file()))
                .collect(),
        }
    }
}

/// Owned form of a `UnitInfo` record, used by the differencer and the
/// encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfoOwned {
    pub name: String,
    pub main_file: Code,
    pub out_file: Code,
    pub sysroot: Code,
    pub target: Code,
    pub mod_time: TimePoint,
    pub provider_kind: ProviderKind,
    pub flags: UnitFlags,
    pub file_depends: Vec<Code>,
    pub unit_depends: Vec<Code>,
    /// `(provider_code, file_code)` pairs.
    pub provider_depends: Vec<(Code, Code)>,
}

impl UnitInfoOwned {
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        if self.name.len() > u16::MAX as usize {
            return Err(DbError::invalid_record(format!(
                "unit name too long: {} bytes",
                self.name.len()
            )));
        }

        let header = UnitInfoHeader {
            main_file_code: U64::new(self.main_file.raw()),
            out_file_code: U64::new(self.out_file.raw()),
            sysroot_code: U64::new(self.sysroot.raw()),
            target_code: U64::new(self.target.raw()),
            nanos: I64::new(self.mod_time.nanos()),
            name_len: U16::new(self.name.len() as u16),
            provider_kind: self.provider_kind as u8,
            flags: self.flags.bits(),
            file_depends_count: U32::new(self.file_depends.len() as u32),
            unit_depends_count: U32::new(self.unit_depends.len() as u32),
            provider_depends_count: U32::new(self.provider_depends.len() as u32),
        };

        let body_len = UnitInfoHeader::SIZE
            + self.file_depends.len() * 8
            + self.unit_depends.len() * 8
            + self.provider_depends.len() * 16
            + self.name.len();
        let padded_len = body_len.next_multiple_of(8);

        let mut bytes = Vec::with_capacity(padded_len);
        bytes.extend_from_slice(header.as_bytes());
        for code in &self.file_depends {
            bytes.extend_from_slice(&code.to_bytes());
        }
        for code in &self.unit_depends {
            bytes.extend_from_slice(&code.to_bytes());
        }
        for (provider, file) in &self.provider_depends {
            bytes.extend_from_slice(&provider.to_bytes());
            bytes.extend_from_slice(&file.to_bytes());
        }
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.resize(padded_len, 0);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> DbResult<UnitInfoOwned> {
        Ok(UnitInfoRef::parse(bytes)?.to_owned())
    }

    /// The union of record/non-record file dependencies and every provider
    /// dependency's file, i.e. everything that must appear in
    /// `UnitByFileDependency`.
    pub fn combined_file_depends(&self) -> impl Iterator<Item = Code> + '_ {
        self.file_depends
            .iter()
            .copied()
            .chain(self.provider_depends.iter().map(|(_, file)| *file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::mem::size_of;

    #[test]
    fn test_record_sizes_are_frozen() {
        assert_eq!(size_of::<ProviderForUsr>(), ProviderForUsr::SIZE);
        assert_eq!(
            size_of::<TimestampedFileForProvider>(),
            TimestampedFileForProvider::SIZE
        );
        assert_eq!(size_of::<ProviderDependency>(), 16);
        assert_eq!(size_of::<UnitInfoHeader>(), UnitInfoHeader::SIZE);
    }

    #[test]
    fn test_provider_for_usr_round_trip() {
        let row = ProviderForUsr::new(
            Code::of("provider"),
            SymbolRoles::DEFINITION | SymbolRoles::CANONICAL,
            SymbolRoles::REL_CHILD_OF,
        );
        let decoded = ProviderForUsr::decode(row.as_bytes()).unwrap();
        assert_eq!(decoded.provider(), Code::of("provider"));
        assert_eq!(
            decoded.role_set(),
            SymbolRoles::DEFINITION | SymbolRoles::CANONICAL
        );
        assert_eq!(decoded.related_role_set(), SymbolRoles::REL_CHILD_OF);
    }

    #[test]
    fn test_timestamped_file_prefixes() {
        let row = TimestampedFileForProvider::new(
            Code::of("/a.swift"),
            Code::of("unit"),
            Code::EMPTY,
            TimePoint::from_nanos(42),
            true,
        );
        let bytes = row.as_bytes();
        assert!(bytes.starts_with(&TimestampedFileForProvider::file_prefix(Code::of("/a.swift"))));
        assert!(bytes.starts_with(&TimestampedFileForProvider::file_unit_prefix(
            Code::of("/a.swift"),
            Code::of("unit"),
        )));
        assert!(row.system());
    }

    fn sample_unit() -> UnitInfoOwned {
        UnitInfoOwned {
            name: "main.o-2AFC2B3".to_string(),
            main_file: Code::of("/src/main.swift"),
            out_file: Code::of("/build/main.o"),
            sysroot: Code::of("/sysroot"),
            target: Code::of("x86_64-apple-macosx"),
            mod_time: TimePoint::from_nanos(1_700_000_000_000_000_000),
            provider_kind: ProviderKind::Swift,
            flags: UnitFlags::HAS_MAIN_FILE | UnitFlags::HAS_SYSROOT,
            file_depends: vec![Code::of("/src/main.swift"), Code::of("/src/util.swift")],
            unit_depends: vec![Code::of("dep.pcm-AAA")],
            provider_depends: vec![(Code::of("main.o-2AFC2B3"), Code::of("/src/main.swift"))],
        }
    }

    #[test]
    fn test_unit_info_round_trip() {
        let unit = sample_unit();
        let bytes = unit.encode().unwrap();
        assert_eq!(bytes.len() % 8, 0);

        let view = UnitInfoRef::parse(&bytes).unwrap();
        assert_eq!(view.name(), "main.o-2AFC2B3");
        assert_eq!(view.main_file(), Some(Code::of("/src/main.swift")));
        assert_eq!(view.sysroot(), Some(Code::of("/sysroot")));
        assert_eq!(view.provider_kind(), Some(ProviderKind::Swift));
        assert!(!view.is_system());
        assert_eq!(view.file_depends().count(), 2);
        assert_eq!(view.provider_depends().len(), 1);
        assert_eq!(UnitInfoOwned::decode(&bytes).unwrap(), unit);
    }

    #[test]
    fn test_unit_info_without_optionals() {
        let mut unit = sample_unit();
        unit.flags = UnitFlags::empty();
        let bytes = unit.encode().unwrap();
        let view = UnitInfoRef::parse(&bytes).unwrap();
        assert_eq!(view.main_file(), None);
        assert_eq!(view.sysroot(), None);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = sample_unit().encode().unwrap();
        assert!(UnitInfoRef::parse(&bytes[..UnitInfoHeader::SIZE - 1]).is_err());
        assert!(UnitInfoRef::parse(&bytes[..UnitInfoHeader::SIZE + 4]).is_err());
    }

    #[test]
    fn test_combined_file_depends_includes_provider_files() {
        let unit = sample_unit();
        let combined: Vec<Code> = unit.combined_file_depends().collect();
        assert_eq!(combined.len(), 3);
        assert!(combined.contains(&Code::of("/src/main.swift")));
    }

    proptest! {
        #[test]
        fn prop_unit_info_encode_decode(
            name in "[a-zA-Z0-9._-]{1,64}",
            nanos in any::<i64>(),
            files in proptest::collection::vec(any::<u64>(), 0..16),
            units in proptest::collection::vec(any::<u64>(), 0..8),
            providers in proptest::collection::vec(any::<(u64, u64)>(), 0..8),
            flag_bits in 0u8..16,
        ) {
            let unit = UnitInfoOwned {
                name,
                main_file: Code::from_raw(1),
                out_file: Code::from_raw(2),
                sysroot: Code::from_raw(3),
                target: Code::from_raw(4),
                mod_time: TimePoint::from_nanos(nanos),
                provider_kind: ProviderKind::Clang,
                flags: UnitFlags::from_bits_truncate(flag_bits),
                file_depends: files.into_iter().map(Code::from_raw).collect(),
                unit_depends: units.into_iter().map(Code::from_raw).collect(),
                provider_depends: providers
                    .into_iter()
                    .map(|(p, f)| (Code::from_raw(p), Code::from_raw(f)))
                    .collect(),
            };
            let bytes = unit.encode().unwrap();
            prop_assert_eq!(bytes.len() % 8, 0);
            prop_assert_eq!(UnitInfoOwned::decode(&bytes).unwrap(), unit);
        }
    }
}

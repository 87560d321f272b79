//! Primitive types shared across the database: stable 64-bit codes,
//! timestamps, and the closed symbol vocabularies (kinds, roles,
//! properties) carried by compiler-produced index records.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// A stable 64-bit identifier derived from a byte string.
///
/// Codes are the only identity the database stores for long strings (USRs,
/// file paths, unit names). Equal strings yield equal codes across
/// processes and runs because the hash is a fixed algorithm (xxh64, seed
/// 0). Collisions are treated as identity: this is a documented limitation
/// of the index, not defended against. `Code::EMPTY` is the "absent"
/// sentinel and never refers to an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Code(u64);

impl Code {
    /// Sentinel meaning "no value". Stored wherever an optional code slot
    /// is absent (e.g. a unit without a main file).
    pub const EMPTY: Code = Code(0);

    /// Derive the code for a byte string.
    pub fn of(bytes: impl AsRef<[u8]>) -> Code {
        Code(xxh64(bytes.as_ref(), 0))
    }

    pub const fn from_raw(value: u64) -> Code {
        Code(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Little-endian key/value bytes, the on-disk representation everywhere
    /// a code appears in a map.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 8]) -> Code {
        Code(u64::from_le_bytes(bytes))
    }
}

/// Nanoseconds since the Unix epoch, 64-bit signed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimePoint(i64);

impl TimePoint {
    pub const fn from_nanos(nanos: i64) -> TimePoint {
        TimePoint(nanos)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub fn max(self, other: TimePoint) -> TimePoint {
        if other.0 > self.0 { other } else { self }
    }
}

bitflags! {
    /// Roles a symbol occurrence carries, as emitted by the indexing
    /// compiler. The low bits describe the occurrence itself; the
    /// `REL_*` bits describe how a related symbol participates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolRoles: u64 {
        const DECLARATION = 1 << 0;
        const DEFINITION = 1 << 1;
        const REFERENCE = 1 << 2;
        const READ = 1 << 3;
        const WRITE = 1 << 4;
        const CALL = 1 << 5;
        const DYNAMIC = 1 << 6;
        const ADDRESS_OF = 1 << 7;
        const IMPLICIT = 1 << 8;

        const REL_CHILD_OF = 1 << 9;
        const REL_BASE_OF = 1 << 10;
        const REL_OVERRIDE_OF = 1 << 11;
        const REL_RECEIVED_BY = 1 << 12;
        const REL_CALLED_BY = 1 << 13;
        const REL_EXTENDED_BY = 1 << 14;
        const REL_ACCESSOR_OF = 1 << 15;
        const REL_CONTAINED_BY = 1 << 16;
        const REL_IB_TYPE_OF = 1 << 17;
        const REL_SPECIALIZATION_OF = 1 << 18;

        /// Marks the canonical occurrence of the symbol.
        const CANONICAL = 1 << 63;
    }
}

bitflags! {
    /// Properties attached to a symbol declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolProperties: u32 {
        const GENERIC = 1 << 0;
        const TEMPLATE_PARTIAL_SPECIALIZATION = 1 << 1;
        const TEMPLATE_SPECIALIZATION = 1 << 2;
        const UNIT_TEST = 1 << 3;
        const IB_ANNOTATED = 1 << 4;
        const IB_OUTLET_COLLECTION = 1 << 5;
        const GK_INSPECTABLE = 1 << 6;
        const LOCAL = 1 << 7;
        const PROTOCOL_INTERFACE = 1 << 8;
        const SWIFT_ASYNC = 1 << 16;
    }
}

/// Kind of a symbol declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SymbolKind {
    Unknown = 0,
    Module,
    Namespace,
    NamespaceAlias,
    Macro,
    Enum,
    Struct,
    Class,
    Protocol,
    Extension,
    Union,
    TypeAlias,
    Function,
    Variable,
    Field,
    EnumConstant,
    InstanceMethod,
    ClassMethod,
    StaticMethod,
    InstanceProperty,
    ClassProperty,
    StaticProperty,
    Constructor,
    Destructor,
    ConversionFunction,
    Parameter,
    Using,
    Concept,
    CommentTag,
}

impl SymbolKind {
    /// True for kinds that introduce a type-like container a test class or
    /// extension can hang off.
    pub fn is_class_like(self) -> bool {
        matches!(
            self,
            Self::Class | Self::Struct | Self::Enum | Self::Extension | Self::Protocol
        )
    }

    pub fn is_method_like(self) -> bool {
        matches!(
            self,
            Self::InstanceMethod | Self::ClassMethod | Self::StaticMethod
        )
    }
}

/// Refinement of [`SymbolKind`] for accessor and using flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SymbolSubKind {
    #[default]
    None = 0,
    CxxCopyConstructor,
    CxxMoveConstructor,
    AccessorGetter,
    AccessorSetter,
    UsingTypename,
    UsingValue,
    UsingEnum,
    SwiftAccessorWillSet,
    SwiftAccessorDidSet,
    SwiftAccessorAddressor,
    SwiftAccessorMutableAddressor,
    SwiftExtensionOfStruct,
    SwiftExtensionOfClass,
    SwiftExtensionOfEnum,
    SwiftExtensionOfProtocol,
    SwiftPrefixOperator,
    SwiftPostfixOperator,
    SwiftInfixOperator,
    SwiftSubscript,
    SwiftAssociatedType,
    SwiftGenericTypeParam,
}

/// Source language of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SymbolLanguage {
    #[default]
    C = 0,
    ObjC,
    Cxx,
    Swift,
}

/// Which indexer family produced a unit's symbol provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProviderKind {
    Clang = 0,
    Swift = 1,
}

impl ProviderKind {
    pub fn from_u8(value: u8) -> Option<ProviderKind> {
        match value {
            0 => Some(Self::Clang),
            1 => Some(Self::Swift),
            _ => None,
        }
    }
}

/// Static description of a symbol declaration, carried alongside each
/// occurrence handed to the import transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub sub_kind: SymbolSubKind,
    pub properties: SymbolProperties,
    pub language: SymbolLanguage,
}

impl SymbolInfo {
    pub fn new(kind: SymbolKind) -> SymbolInfo {
        SymbolInfo {
            kind,
            sub_kind: SymbolSubKind::None,
            properties: SymbolProperties::empty(),
            language: SymbolLanguage::C,
        }
    }

    pub fn with_properties(mut self, properties: SymbolProperties) -> SymbolInfo {
        self.properties = properties;
        self
    }

    pub fn with_language(mut self, language: SymbolLanguage) -> SymbolInfo {
        self.language = language;
        self
    }

    /// Whether this symbol's name participates in global name search.
    ///
    /// Local symbols and parameters are visible only in their own context
    /// and would pollute the name index.
    pub fn include_in_global_name_search(&self) -> bool {
        !self.properties.contains(SymbolProperties::LOCAL)
            && !matches!(self.kind, SymbolKind::Parameter | SymbolKind::Unknown)
    }
}

/// Compact classes of globally interesting symbols, the key space of the
/// by-kind inverted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GlobalKind {
    Class = 0,
    Protocol = 1,
    Function = 2,
    Struct = 3,
    Union = 4,
    Enum = 5,
    Type = 6,
    GlobalVar = 7,
    TestClassOrExtension = 8,
    TestMethod = 9,
    CommentTag = 10,
}

impl GlobalKind {
    /// The non-test global kind a symbol kind maps to, if any.
    pub fn of(kind: SymbolKind) -> Option<GlobalKind> {
        match kind {
            SymbolKind::Class => Some(Self::Class),
            SymbolKind::Protocol => Some(Self::Protocol),
            SymbolKind::Function => Some(Self::Function),
            SymbolKind::Struct => Some(Self::Struct),
            SymbolKind::Union => Some(Self::Union),
            SymbolKind::Enum => Some(Self::Enum),
            SymbolKind::TypeAlias => Some(Self::Type),
            SymbolKind::Variable => Some(Self::GlobalVar),
            SymbolKind::CommentTag => Some(Self::CommentTag),
            _ => None,
        }
    }

    /// The test-specific global kind for a unit-test definition site.
    pub fn test_kind_of(kind: SymbolKind) -> Option<GlobalKind> {
        if kind.is_class_like() {
            Some(Self::TestClassOrExtension)
        } else if kind.is_method_like() {
            Some(Self::TestMethod)
        } else {
            None
        }
    }

    pub fn from_u8(value: u8) -> Option<GlobalKind> {
        match value {
            0 => Some(Self::Class),
            1 => Some(Self::Protocol),
            2 => Some(Self::Function),
            3 => Some(Self::Struct),
            4 => Some(Self::Union),
            5 => Some(Self::Enum),
            6 => Some(Self::Type),
            7 => Some(Self::GlobalVar),
            8 => Some(Self::TestClassOrExtension),
            9 => Some(Self::TestMethod),
            10 => Some(Self::CommentTag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_determinism() {
        let a = Code::of("s:4main1cyyF");
        let b = Code::of("s:4main1cyyF");
        assert_eq!(a, b);
        assert_ne!(a, Code::of("s:4main1dyyF"));
    }

    #[test]
    fn test_code_byte_round_trip() {
        let code = Code::of("/src/a.swift");
        assert_eq!(Code::from_bytes(code.to_bytes()), code);
    }

    #[test]
    fn test_empty_sentinel() {
        assert!(Code::EMPTY.is_empty());
        assert!(!Code::of("x").is_empty());
    }

    #[test]
    fn test_time_point_max() {
        let a = TimePoint::from_nanos(10);
        let b = TimePoint::from_nanos(20);
        assert_eq!(a.max(b), b);
        assert_eq!(b.max(a), b);
    }

    #[test]
    fn test_roles_relation_bits_disjoint() {
        let occurrence = SymbolRoles::DEFINITION | SymbolRoles::IMPLICIT;
        let relation = SymbolRoles::REL_CHILD_OF | SymbolRoles::REL_CALLED_BY;
        assert!((occurrence & relation).is_empty());
    }

    #[test]
    fn test_global_kind_mapping() {
        assert_eq!(GlobalKind::of(SymbolKind::Class), Some(GlobalKind::Class));
        assert_eq!(
            GlobalKind::of(SymbolKind::TypeAlias),
            Some(GlobalKind::Type)
        );
        assert_eq!(GlobalKind::of(SymbolKind::Parameter), None);
    }

    #[test]
    fn test_test_kind_mapping() {
        assert_eq!(
            GlobalKind::test_kind_of(SymbolKind::Class),
            Some(GlobalKind::TestClassOrExtension)
        );
        assert_eq!(
            GlobalKind::test_kind_of(SymbolKind::InstanceMethod),
            Some(GlobalKind::TestMethod)
        );
        assert_eq!(GlobalKind::test_kind_of(SymbolKind::Function), None);
    }

    #[test]
    fn test_global_kind_u8_round_trip() {
        for raw in 0u8..=10 {
            let kind = GlobalKind::from_u8(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert!(GlobalKind::from_u8(11).is_none());
    }

    #[test]
    fn test_name_search_eligibility() {
        let info = SymbolInfo::new(SymbolKind::Function);
        assert!(info.include_in_global_name_search());

        let local = info.with_properties(SymbolProperties::LOCAL);
        assert!(!local.include_in_global_name_search());

        let param = SymbolInfo::new(SymbolKind::Parameter);
        assert!(!param.include_in_global_name_search());
    }
}

//! Prefix remapping: indexes built under one source root are usable
//! under another.

use std::path::Path;

use tempfile::TempDir;
use xrefdb::{
    Code, Database, PrefixMapping, ProviderKind, Settings, TimePoint, UnitDescription,
};

fn settings_with_mapping(dir: &TempDir) -> Settings {
    Settings {
        database_path: dir.path().join("db"),
        initial_map_size: 1 << 20,
        prefix_mappings: vec![PrefixMapping {
            original: "/SRC_ROOT".to_string(),
            replacement: "/home/u/src".to_string(),
        }],
        ..Settings::default()
    }
}

#[test]
fn test_file_queryable_under_either_root() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&settings_with_mapping(&dir)).unwrap();

    // ingestion hands over the path as the build record spells it
    let ingested = db.canonicalize(Path::new("/SRC_ROOT/a.swift")).unwrap();
    assert_eq!(ingested.as_str(), "/home/u/src/a.swift");

    let desc = UnitDescription {
        name: "main.o-U1".to_string(),
        provider_kind: ProviderKind::Swift,
        mod_time: TimePoint::from_nanos(1_000),
        is_system: false,
        main_file: Some(ingested.clone()),
        out_file: None,
        sysroot: None,
        target: None,
        file_depends: vec![ingested.clone()],
        unit_depends: Vec::new(),
        provider_depends: Vec::new(),
    };
    db.import(|txn| txn.import_unit(&desc)).unwrap();

    // both spellings canonicalize onto the same stored entry
    let read = db.read().unwrap();
    for spelling in ["/SRC_ROOT/a.swift", "/home/u/src/a.swift"] {
        let canonical = db.canonicalize(Path::new(spelling)).unwrap();
        assert_eq!(
            read.units_containing_file(Code::of(canonical.as_str()))
                .collect::<Vec<_>>(),
            vec![Code::of("main.o-U1")],
            "spelling {spelling} did not resolve"
        );
    }
}

#[test]
fn test_stored_paths_translate_back_to_build_root() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&settings_with_mapping(&dir)).unwrap();

    let stored = db
        .canonicalize(Path::new("/SRC_ROOT/lib/util.swift"))
        .unwrap();
    db.import(|txn| {
        txn.add_file_path(&stored)?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let resolved = read.full_path(Code::of(stored.as_str())).unwrap();
    assert_eq!(resolved.as_str(), "/home/u/src/lib/util.swift");

    // the reverse direction recovers the build-record spelling
    let build_spelling = db.prefix_map().reverse(resolved.as_path()).unwrap();
    assert_eq!(build_spelling.as_str(), "/SRC_ROOT/lib/util.swift");

    // paths outside the mapping pass through both directions untouched
    let other = db.prefix_map().reverse(Path::new("/usr/include/stdio.h")).unwrap();
    assert_eq!(other.as_str(), "/usr/include/stdio.h");
}

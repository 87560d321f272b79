//! Open-time guards: persistence across reopen, version checking, crash
//! recovery, and read-only mode.

use std::fs;

use tempfile::TempDir;
use xrefdb::env::{EnvOptions, Environment};
use xrefdb::schema::{MapId, META_SCHEMA_VERSION_KEY};
use xrefdb::{
    CanonicalPath, Code, Database, DbError, ProviderKind, Settings, TimePoint, UnitDescription,
};

fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        database_path: dir.path().join("db"),
        initial_map_size: 1 << 20,
        ..Settings::default()
    }
}

fn sample_unit() -> UnitDescription {
    UnitDescription {
        name: "main.o-U1".to_string(),
        provider_kind: ProviderKind::Swift,
        mod_time: TimePoint::from_nanos(1_000),
        is_system: false,
        main_file: Some(CanonicalPath::new("/src/a.swift").unwrap()),
        out_file: None,
        sysroot: None,
        target: None,
        file_depends: vec![CanonicalPath::new("/src/a.swift").unwrap()],
        unit_depends: Vec::new(),
        provider_depends: Vec::new(),
    }
}

fn saved_dirs(settings: &Settings) -> Vec<String> {
    fs::read_dir(&settings.database_path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with("saved-"))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_reopen_preserves_data() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    {
        let db = Database::open(&settings).unwrap();
        db.import(|txn| txn.import_unit(&sample_unit())).unwrap();
    }

    let db = Database::open(&settings).unwrap();
    let read = db.read().unwrap();
    let info = read.unit_info(Code::of("main.o-U1")).unwrap().unwrap();
    assert_eq!(info.name(), "main.o-U1");
    assert_eq!(
        read.units_containing_file(Code::of("/src/a.swift"))
            .collect::<Vec<_>>(),
        vec![Code::of("main.o-U1")]
    );
}

#[test]
fn test_lingering_resize_marker_archives_database() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    {
        let db = Database::open(&settings).unwrap();
        db.import(|txn| txn.import_unit(&sample_unit())).unwrap();
    }

    // simulate a crash mid-resize
    let marker = db_dir(&settings).join("data.grow");
    fs::write(&marker, b"resize in progress").unwrap();

    let db = Database::open(&settings).unwrap();
    // the damaged store was archived and a fresh one created
    assert_eq!(saved_dirs(&settings).len(), 1);
    let read = db.read().unwrap();
    assert!(read.unit_info(Code::of("main.o-U1")).unwrap().is_none());
}

#[test]
fn test_corrupted_header_archives_database() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    {
        let db = Database::open(&settings).unwrap();
        db.import(|txn| txn.import_unit(&sample_unit())).unwrap();
    }

    // clobber the file magic
    let data_file = db_dir(&settings).join("data.xdb");
    let mut bytes = fs::read(&data_file).unwrap();
    bytes[..8].copy_from_slice(b"garbage!");
    fs::write(&data_file, &bytes).unwrap();

    let db = Database::open(&settings).unwrap();
    assert_eq!(saved_dirs(&settings).len(), 1);
    assert_eq!(db.read().unwrap().stats().units, 0);
}

#[test]
fn test_torn_final_commit_is_invisible() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let second_unit = UnitDescription {
        name: "second.o-U2".to_string(),
        mod_time: TimePoint::from_nanos(2_000),
        ..sample_unit()
    };
    {
        let db = Database::open(&settings).unwrap();
        db.import(|txn| txn.import_unit(&sample_unit())).unwrap();
        db.import(|txn| txn.import_unit(&second_unit)).unwrap();
    }

    // flip one byte in the tail region of the file, where the second
    // frame's payload lives
    let data_file = db_dir(&settings).join("data.xdb");
    let mut bytes = fs::read(&data_file).unwrap();
    let tail = bytes.iter().rposition(|&b| b != 0).unwrap();
    bytes[tail] ^= 0xFF;
    fs::write(&data_file, &bytes).unwrap();

    // the torn commit is rolled back; the first one survives
    let db = Database::open(&settings).unwrap();
    let read = db.read().unwrap();
    assert!(read.unit_info(Code::of("main.o-U1")).unwrap().is_some());
    assert!(read.unit_info(Code::of("second.o-U2")).unwrap().is_none());
}

#[test]
fn test_schema_version_mismatch_refuses_open() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);

    // craft a store tagged with a future schema version
    fs::create_dir_all(db_dir(&settings)).unwrap();
    let env = Environment::open(&db_dir(&settings).join("data.xdb"), EnvOptions::default())
        .unwrap();
    let mut txn = env.begin_write().unwrap();
    txn.put(MapId::Meta, META_SCHEMA_VERSION_KEY, &999u32.to_le_bytes())
        .unwrap();
    txn.commit().unwrap();
    drop(env);

    match Database::open(&settings) {
        Err(DbError::IncompatibleVersion { found, expected }) => {
            assert_eq!(found, 999);
            assert_ne!(expected, 999);
        }
        other => panic!("expected IncompatibleVersion, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_readonly_open() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    {
        let db = Database::open(&settings).unwrap();
        db.import(|txn| txn.import_unit(&sample_unit())).unwrap();
    }

    let readonly = Settings {
        readonly: true,
        ..settings.clone()
    };
    let db = Database::open(&readonly).unwrap();
    assert!(db.read().unwrap().unit_info(Code::of("main.o-U1")).unwrap().is_some());
    assert!(matches!(db.begin_import(), Err(DbError::ReadOnly)));

    // a read-only open of a missing database fails instead of creating it
    let missing = Settings {
        database_path: dir.path().join("nonexistent"),
        readonly: true,
        ..Settings::default()
    };
    assert!(Database::open(&missing).is_err());
}

fn db_dir(settings: &Settings) -> std::path::PathBuf {
    settings.database_path.join("v1")
}

//! Query-side integration: shared dependencies, root-unit climbs, name
//! and filename pattern scans, and provider file references.

use std::collections::HashSet;

use tempfile::TempDir;
use xrefdb::{
    CanonicalPath, Code, Database, PatternOptions, ProviderDependencyDesc, ProviderKind,
    Settings, SymbolInfo, SymbolKind, SymbolRoles, TimePoint, UnitDescription,
};

fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        database_path: dir.path().join("db"),
        initial_map_size: 1 << 20,
        ..Settings::default()
    }
}

fn path(s: &str) -> CanonicalPath {
    CanonicalPath::new(s).unwrap()
}

fn unit_desc(name: &str, main_file: Option<&str>) -> UnitDescription {
    UnitDescription {
        name: name.to_string(),
        provider_kind: ProviderKind::Clang,
        mod_time: TimePoint::from_nanos(1_000),
        is_system: false,
        main_file: main_file.map(path),
        out_file: Some(path(&format!("/build/{name}"))),
        sysroot: Some(path("/sysroot")),
        target: Some("arm64-apple-macosx".to_string()),
        file_depends: Vec::new(),
        unit_depends: Vec::new(),
        provider_depends: Vec::new(),
    }
}

#[test]
fn test_shared_header_and_root_units() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    let mut u1 = unit_desc("main.o-U1", Some("/src/main.c"));
    u1.file_depends = vec![path("/src/main.c"), path("/include/shared.h")];
    let mut u2 = unit_desc("tool.o-U2", Some("/src/tool.c"));
    u2.file_depends = vec![path("/src/tool.c"), path("/include/shared.h")];
    // a module unit without a main file, also using the header
    let mut m1 = unit_desc("common.pcm-M1", None);
    m1.file_depends = vec![path("/include/shared.h")];
    // a root that reaches the header only through the module unit
    let mut u3 = unit_desc("app.o-U3", Some("/src/app.c"));
    u3.file_depends = vec![path("/src/app.c")];
    u3.unit_depends = vec!["common.pcm-M1".to_string()];

    db.import(|txn| {
        txn.import_unit(&u1)?;
        txn.import_unit(&u2)?;
        txn.import_unit(&m1)?;
        txn.import_unit(&u3)?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let header = Code::of("/include/shared.h");

    let containing: HashSet<Code> = read.units_containing_file(header).collect();
    assert_eq!(
        containing,
        HashSet::from([
            Code::of("main.o-U1"),
            Code::of("tool.o-U2"),
            Code::of("common.pcm-M1"),
        ])
    );

    let roots: HashSet<Code> = read.root_units_of_file(header).unwrap().into_iter().collect();
    assert_eq!(
        roots,
        HashSet::from([
            Code::of("main.o-U1"),
            Code::of("tool.o-U2"),
            Code::of("app.o-U3"),
        ])
    );

    let roots_of_module: Vec<Code> = read.root_units_of_unit(Code::of("common.pcm-M1")).unwrap();
    assert_eq!(roots_of_module, vec![Code::of("app.o-U3")]);
}

#[test]
fn test_cyclic_unit_dependencies_terminate() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    // A and B depend on each other; R depends on A.
    let mut a = unit_desc("a.pcm-A", None);
    a.unit_depends = vec!["b.pcm-B".to_string()];
    let mut b = unit_desc("b.pcm-B", None);
    b.unit_depends = vec!["a.pcm-A".to_string()];
    let mut r = unit_desc("root.o-R", Some("/src/root.c"));
    r.unit_depends = vec!["a.pcm-A".to_string()];

    db.import(|txn| {
        txn.import_unit(&a)?;
        txn.import_unit(&b)?;
        txn.import_unit(&r)?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let roots = read.root_units_of_unit(Code::of("b.pcm-B")).unwrap();
    assert_eq!(roots, vec![Code::of("root.o-R")]);
}

#[test]
fn test_find_usrs_by_name_pattern() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    db.import(|txn| {
        let (provider, _) = txn.add_provider_name("view.o-P")?;
        for (usr, name) in [
            ("c:objc(cs)Controller(im)viewDidLoad", "viewDidLoad"),
            ("c:objc(cs)Controller(im)viewWillAppear:", "viewWillAppear:"),
            ("c:@F@main", "main"),
        ] {
            txn.add_symbol_info(
                provider,
                usr,
                name,
                &SymbolInfo::new(SymbolKind::InstanceMethod),
                SymbolRoles::DECLARATION,
                SymbolRoles::empty(),
            )?;
        }
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();

    let options = PatternOptions {
        subsequence: true,
        ignore_case: true,
        ..PatternOptions::default()
    };
    let hits: Vec<Code> = read.find_usrs_matching("vwp", &options).flatten().collect();
    assert_eq!(hits, vec![Code::of("c:objc(cs)Controller(im)viewWillAppear:")]);

    let anchored = PatternOptions {
        anchor_start: true,
        ..PatternOptions::default()
    };
    let hits: Vec<Code> = read.find_usrs_matching("view", &anchored).flatten().collect();
    assert_eq!(hits.len(), 2);

    // the empty pattern matches every stored name
    let all: Vec<Code> = read
        .find_usrs_matching("", &PatternOptions::default())
        .flatten()
        .collect();
    assert_eq!(all.len(), 3);
}

#[test]
fn test_filename_search_excludes_build_outputs() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    let mut desc = unit_desc("main.o-U1", Some("/src/main.c"));
    desc.file_depends = vec![path("/src/main.c"), path("/src/util.c")];
    // out_file "/build/main.o-U1" and module caches are interned too
    desc.unit_depends = Vec::new();
    db.import(|txn| {
        txn.import_unit(&desc)?;
        txn.add_file_path(&path("/build/cache/foo.pcm"))?;
        txn.add_file_path(&path("/build/obj/bar.o"))?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let all: Vec<Code> = read
        .find_filenames_matching("", &PatternOptions::default())
        .flatten()
        .collect();
    assert!(all.contains(&Code::of("/src/main.c")));
    assert!(all.contains(&Code::of("/src/util.c")));
    assert!(!all.contains(&Code::of("/build/obj/bar.o")));
    assert!(!all.contains(&Code::of("/build/cache/foo.pcm")));
}

#[test]
fn test_full_path_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    db.import(|txn| {
        txn.add_file_path(&path("/deep/nested/dir/file.swift"))?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let code = Code::of("/deep/nested/dir/file.swift");
    assert_eq!(
        read.full_path(code).unwrap().as_str(),
        "/deep/nested/dir/file.swift"
    );
    assert!(read.full_path(Code::of("/not/stored")).is_none());
}

#[test]
fn test_provider_file_refs_unit_filter_and_sysroot() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    let mut u1 = unit_desc("main.o-U1", Some("/src/a.swift"));
    u1.provider_depends = vec![ProviderDependencyDesc {
        provider_name: "prov-A".to_string(),
        file: path("/src/a.swift"),
        module_name: Some("Main".to_string()),
        is_system: false,
        mod_time: TimePoint::from_nanos(100),
    }];
    let mut u2 = unit_desc("alt.o-U2", Some("/src/b.swift"));
    u2.provider_depends = vec![ProviderDependencyDesc {
        provider_name: "prov-A".to_string(),
        file: path("/src/a.swift"),
        module_name: Some("Main".to_string()),
        is_system: false,
        mod_time: TimePoint::from_nanos(300),
    }];

    db.import(|txn| {
        txn.import_unit(&u1)?;
        txn.import_unit(&u2)?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let provider = Code::of("prov-A");

    // unfiltered: the newest (unit, mod_time) pair wins
    let refs = read.provider_file_refs(provider, |_| true).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].mod_time, TimePoint::from_nanos(300));
    assert_eq!(refs[0].module.as_deref(), Some("Main"));
    assert_eq!(refs[0].sysroot.as_deref(), Some("/sysroot"));
    assert!(!refs[0].is_system);

    // filter to U1 only
    let u1_code = Code::of("main.o-U1");
    let refs = read
        .provider_file_refs(provider, |unit| unit == u1_code)
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].mod_time, TimePoint::from_nanos(100));

    // no unit passes: the file is skipped
    let refs = read.provider_file_refs(provider, |_| false).unwrap();
    assert!(refs.is_empty());
}

#[test]
fn test_stats_reflect_contents() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&test_settings(&dir)).unwrap();

    let mut desc = unit_desc("main.o-U1", Some("/src/a.swift"));
    desc.file_depends = vec![path("/src/a.swift"), path("/src/b.swift")];
    db.import(|txn| {
        let (provider, _) = txn.add_provider_name("main.o-U1")?;
        txn.add_symbol_info(
            provider,
            "c:@F@main",
            "main",
            &SymbolInfo::new(SymbolKind::Function),
            SymbolRoles::DEFINITION,
            SymbolRoles::empty(),
        )?;
        txn.import_unit(&desc)?;
        Ok(())
    })
    .unwrap();

    let read = db.read().unwrap();
    let stats = read.stats();
    assert_eq!(stats.units, 1);
    assert_eq!(stats.providers, 1);
    assert_eq!(stats.usrs, 1);
    assert_eq!(stats.symbol_names, 1);
    // a.swift, b.swift, the out file, plus nothing else
    assert_eq!(stats.files, 3);
}

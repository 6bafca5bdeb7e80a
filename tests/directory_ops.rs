#[path = "support/mod.rs"]
mod support;

use std::ffi::OsStr;

use support::{ctx, Fixture};

// spec.md §8: "readdir of any directory never yields any entry whose name
// begins with `.groot.`."
#[test]
fn readdir_never_yields_reserved_names() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("visible"), b"x").unwrap();
    fixture.engine.symlink(OsStr::new("target"), OsStr::new("s"), ctx(0, 0)).unwrap();
    fixture.engine.chown(OsStr::new("s"), Some(1), Some(1)).unwrap();

    let names: Vec<String> =
        fixture.engine.readdir(OsStr::new("")).unwrap().into_iter().map(|e| e.name.to_string_lossy().into_owned()).collect();

    assert!(names.contains(&"visible".to_string()));
    assert!(names.contains(&"s".to_string()));
    assert!(!names.iter().any(|n| n.starts_with(".groot.")));
}

#[test]
fn readdir_on_a_subdirectory_lists_its_own_entries_only() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(0, 0)).unwrap();
    fixture
        .engine
        .open(OsStr::new("d/inner"), libc::O_CREAT | libc::O_WRONLY, 0o600, ctx(0, 0))
        .unwrap();
    std::fs::write(fixture.path("outer"), b"x").unwrap();

    let names: Vec<String> =
        fixture.engine.readdir(OsStr::new("d")).unwrap().into_iter().map(|e| e.name.to_string_lossy().into_owned()).collect();
    assert_eq!(names, vec!["inner"]);
}

#[test]
fn rmdir_removes_an_empty_directory() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(0, 0)).unwrap();
    fixture.engine.rmdir(OsStr::new("d")).unwrap();
    assert!(!fixture.path("d").exists());
}

#[test]
fn rename_moves_the_backing_object_and_preserves_its_record() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(9, 9)).unwrap();
    fixture.engine.rename(OsStr::new("d"), OsStr::new("d2")).unwrap();
    let st = fixture.engine.getattr(OsStr::new("d2")).unwrap();
    assert_eq!(st.st_uid, 9);
    assert!(!fixture.path("d").exists());
    assert!(fixture.path("d2").exists());
}

#[path = "support/mod.rs"]
mod support;

use std::ffi::OsStr;

use support::{ctx, placeholder_names, Fixture};

// spec.md §8, scenario 3.
#[test]
fn symlink_chown_round_trips_via_placeholder_and_unlink_removes_it() {
    let fixture = Fixture::new();
    fixture.engine.symlink(OsStr::new("target"), OsStr::new("s"), ctx(1, 1)).unwrap();
    fixture.engine.chown(OsStr::new("s"), Some(42), Some(43)).unwrap();

    let st = fixture.engine.getattr(OsStr::new("s")).unwrap();
    assert_eq!(st.st_uid, 42);
    assert_eq!(st.st_gid, 43);
    assert_eq!(placeholder_names(fixture.tempdir.path()).len(), 1);

    fixture.engine.unlink(OsStr::new("s")).unwrap();
    assert!(placeholder_names(fixture.tempdir.path()).is_empty(), "no orphan placeholder must remain");
}

#[test]
fn symlink_without_explicit_chown_reports_creating_caller_as_owner() {
    let fixture = Fixture::new();
    fixture.engine.symlink(OsStr::new("target"), OsStr::new("s"), ctx(7, 8)).unwrap();
    let st = fixture.engine.getattr(OsStr::new("s")).unwrap();
    assert_eq!(st.st_uid, 7);
    assert_eq!(st.st_gid, 8);
}

#[test]
fn readlink_returns_the_original_target() {
    let fixture = Fixture::new();
    fixture.engine.symlink(OsStr::new("some/target"), OsStr::new("s"), ctx(0, 0)).unwrap();
    let mut buf = vec![0u8; 256];
    let n = fixture.engine.readlink(OsStr::new("s"), &mut buf).unwrap();
    assert_eq!(&buf[..n], b"some/target");
}

#[test]
fn unlinking_a_plain_file_does_not_touch_unrelated_placeholders() {
    let fixture = Fixture::new();
    fixture.engine.symlink(OsStr::new("target"), OsStr::new("s"), ctx(1, 1)).unwrap();
    fixture.engine.chown(OsStr::new("s"), Some(1), Some(1)).unwrap();
    assert_eq!(placeholder_names(fixture.tempdir.path()).len(), 1);

    std::fs::write(fixture.path("plain"), b"x").unwrap();
    fixture.engine.unlink(OsStr::new("plain")).unwrap();

    assert_eq!(placeholder_names(fixture.tempdir.path()).len(), 1, "unrelated placeholder survives");
}

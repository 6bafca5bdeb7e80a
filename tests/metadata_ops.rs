#[path = "support/mod.rs"]
mod support;

use std::ffi::OsStr;

use grootfs::config::EngineConfig;
use support::{ctx, Fixture};

// spec.md §8, scenario 1.
#[test]
fn create_reports_caller_as_owner_and_requested_mode() {
    let fixture = Fixture::new();
    let fh = fixture
        .engine
        .open(OsStr::new("a"), libc::O_CREAT | libc::O_WRONLY, 0o640, ctx(1000, 1000))
        .unwrap();
    drop(fh);

    let st = fixture.engine.getattr(OsStr::new("a")).unwrap();
    assert_eq!(st.st_uid, 1000);
    assert_eq!(st.st_gid, 1000);
    assert_eq!(st.st_mode & 0o7777, 0o640);

    // Real backing file is never actually owned by uid 1000 (we're not root).
    let real = std::fs::metadata(fixture.path("a")).unwrap();
    use std::os::unix::fs::MetadataExt;
    assert_ne!(real.uid(), 1000);
}

// spec.md §8, scenario 2.
#[test]
fn mkdir_chown_chmod_round_trips_and_sets_execute_bits_on_backing_dir() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(1000, 1000)).unwrap();
    fixture.engine.chown(OsStr::new("d"), Some(0), Some(0)).unwrap();
    fixture.engine.chmod(OsStr::new("d"), 0o555).unwrap();

    let st = fixture.engine.getattr(OsStr::new("d")).unwrap();
    assert_eq!(st.st_uid, 0);
    assert_eq!(st.st_gid, 0);
    assert_eq!(st.st_mode & 0o7777, 0o555);

    let real = std::fs::metadata(fixture.path("d")).unwrap();
    use std::os::unix::fs::PermissionsExt;
    assert_eq!(real.permissions().mode() & 0o111, 0o111);
}

// spec.md §8: "a subsequent stat returns the most recently written uid, gid,
// and mode bits for the flags set, and the backing file's unchanged values
// for the flags unset" — chmod alone must not disturb a previously set owner.
#[test]
fn chmod_after_chown_preserves_previously_set_owner() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(5, 6)).unwrap();
    fixture.engine.chown(OsStr::new("d"), Some(42), None).unwrap();
    fixture.engine.chmod(OsStr::new("d"), 0o750).unwrap();

    let st = fixture.engine.getattr(OsStr::new("d")).unwrap();
    assert_eq!(st.st_uid, 42);
    assert_eq!(st.st_gid, 6, "gid flag from mkdir's fresh record must survive an unrelated chmod");
    assert_eq!(st.st_mode & 0o7777, 0o750);
}

// spec.md §8: "-1" sentinel leaves the corresponding chown field untouched.
#[test]
fn chown_minus_one_sentinel_leaves_gid_untouched() {
    let fixture = Fixture::new();
    fixture.engine.mkdir(OsStr::new("d"), 0o700, ctx(1, 1)).unwrap();
    fixture.engine.chown(OsStr::new("d"), Some(99), None).unwrap();
    let st = fixture.engine.getattr(OsStr::new("d")).unwrap();
    assert_eq!(st.st_uid, 99);
    assert_eq!(st.st_gid, 1);
}

// spec.md §8, scenario 5 (clamping).
#[test]
fn uid_above_ceiling_is_clamped_to_zero() {
    let fixture = Fixture::with_config(EngineConfig::new(65535, 65535));
    std::fs::write(fixture.path("f"), b"x").unwrap();
    fixture.engine.chown(OsStr::new("f"), Some(100_000), Some(100_000)).unwrap();
    let st = fixture.engine.getattr(OsStr::new("f")).unwrap();
    assert_eq!(st.st_uid, 0);
    assert_eq!(st.st_gid, 0);
}

#[test]
fn gid_below_ceiling_is_not_clamped() {
    let fixture = Fixture::with_config(EngineConfig::new(65535, 65535));
    std::fs::write(fixture.path("f"), b"x").unwrap();
    fixture.engine.chown(OsStr::new("f"), Some(500), Some(500)).unwrap();
    let st = fixture.engine.getattr(OsStr::new("f")).unwrap();
    assert_eq!(st.st_uid, 500);
    assert_eq!(st.st_gid, 500);
}

#[test]
fn mknod_is_read_only_filesystem_error() {
    let fixture = Fixture::new();
    let err = fixture.engine.mknod().unwrap_err();
    assert_eq!(err.errno(), libc::EROFS);
}

#[test]
fn create_without_o_excl_does_not_overwrite_existing_metadata() {
    let fixture = Fixture::new();
    fixture.engine.open(OsStr::new("a"), libc::O_CREAT | libc::O_WRONLY, 0o600, ctx(1, 1)).unwrap();
    // Second open of the same path, still with O_CREAT but no O_EXCL, must
    // not overwrite the record written by the first create.
    fixture.engine.open(OsStr::new("a"), libc::O_CREAT | libc::O_WRONLY, 0o777, ctx(2, 2)).unwrap();
    let st = fixture.engine.getattr(OsStr::new("a")).unwrap();
    assert_eq!(st.st_uid, 1);
    assert_eq!(st.st_mode & 0o7777, 0o600);
}

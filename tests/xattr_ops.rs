#[path = "support/mod.rs"]
mod support;

use std::ffi::OsStr;

use support::Fixture;

// spec.md §8, scenario 4.
#[test]
fn setxattr_then_listxattr_exposes_exactly_the_client_name() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("f"), b"x").unwrap();

    fixture.engine.setxattr(OsStr::new("f"), "user.myattr", b"v").unwrap();

    let needed = fixture.engine.listxattr(OsStr::new("f"), &mut []).unwrap();
    let mut buf = vec![0u8; needed];
    let got = fixture.engine.listxattr(OsStr::new("f"), &mut buf).unwrap();
    assert_eq!(got, needed);
    let names: Vec<&str> =
        buf[..got].split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| std::str::from_utf8(s).unwrap()).collect();
    assert_eq!(names, vec!["user.myattr"]);

    let mut val = [0u8; 8];
    let n = fixture.engine.getxattr(OsStr::new("f"), "user.myattr", &mut val).unwrap();
    assert_eq!(&val[..n], b"v");
}

#[test]
fn client_listxattr_never_exposes_the_engines_own_record_key() {
    let fixture = Fixture::new();
    // Writing any fake metadata (e.g. via chown) also writes the engine's
    // own `user.grootfs` key on the same backing object.
    fixture.engine.mkdir(OsStr::new("d"), 0o700, support::ctx(1, 1)).unwrap();
    fixture.engine.setxattr(OsStr::new("d"), "user.mine", b"1").unwrap();

    let needed = fixture.engine.listxattr(OsStr::new("d"), &mut []).unwrap();
    let mut buf = vec![0u8; needed];
    fixture.engine.listxattr(OsStr::new("d"), &mut buf).unwrap();
    let names: Vec<&str> =
        buf.split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| std::str::from_utf8(s).unwrap()).collect();
    assert_eq!(names, vec!["user.mine"]);
    assert!(!names.iter().any(|n| n.contains("grootfs")));
}

// spec.md §8: "listxattr with size 0 returns the exact byte count that a
// subsequent call with that size would fill."
#[test]
fn listxattr_size_probe_matches_actual_fill() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("f"), b"x").unwrap();
    fixture.engine.setxattr(OsStr::new("f"), "user.a", b"1").unwrap();
    fixture.engine.setxattr(OsStr::new("f"), "user.bb", b"22").unwrap();

    let probed = fixture.engine.listxattr(OsStr::new("f"), &mut []).unwrap();
    let mut buf = vec![0u8; probed];
    let filled = fixture.engine.listxattr(OsStr::new("f"), &mut buf).unwrap();
    assert_eq!(probed, filled);
}

#[test]
fn listxattr_too_small_nonzero_buffer_is_erange() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("f"), b"x").unwrap();
    fixture.engine.setxattr(OsStr::new("f"), "user.myattr", b"v").unwrap();
    let err = fixture.engine.listxattr(OsStr::new("f"), &mut [0u8; 1]).unwrap_err();
    assert_eq!(err.errno(), libc::ERANGE);
}

#[test]
fn removexattr_removes_only_the_named_client_attribute() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("f"), b"x").unwrap();
    fixture.engine.setxattr(OsStr::new("f"), "user.a", b"1").unwrap();
    fixture.engine.setxattr(OsStr::new("f"), "user.b", b"2").unwrap();
    fixture.engine.removexattr(OsStr::new("f"), "user.a").unwrap();

    let needed = fixture.engine.listxattr(OsStr::new("f"), &mut []).unwrap();
    let mut buf = vec![0u8; needed];
    fixture.engine.listxattr(OsStr::new("f"), &mut buf).unwrap();
    let names: Vec<&str> =
        buf.split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| std::str::from_utf8(s).unwrap()).collect();
    assert_eq!(names, vec!["user.b"]);
}

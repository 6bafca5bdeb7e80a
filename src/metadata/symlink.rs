//! Symlink placeholder naming.
//!
//! The backing filesystem refuses user xattrs on symlinks themselves, so a
//! symlink's record is stored on a regular placeholder file in the backing
//! root, named from the symlink's device/inode pair.

/// Reserved prefix for every name this engine owns in the backing root:
/// placeholders, and — by convention — anything else the engine might need
/// to stash there in the future.
pub const RESERVED_PREFIX: &str = ".groot.";

const PLACEHOLDER_PREFIX: &str = ".groot.symlink.";

/// Build the placeholder filename for a symlink identified by `(dev, ino)`.
pub fn placeholder_name(dev: u64, ino: u64) -> String {
    format!("{PLACEHOLDER_PREFIX}{dev:x}_{ino:x}")
}

/// Whether `name` belongs to the engine's reserved namespace and must never
/// be surfaced to a client (enforced by `readdir`'s listing filter).
///
/// Compares raw bytes rather than going through `to_str()`: a client-created
/// name need not be valid UTF-8, and such a name must still be caught.
pub fn is_reserved(name: &std::ffi::OsStr) -> bool {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().starts_with(RESERVED_PREFIX.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_name_is_hex_dev_underscore_hex_ino() {
        assert_eq!(placeholder_name(0x10, 0xff), ".groot.symlink.10_ff");
    }

    #[test]
    fn reserved_prefix_is_detected() {
        assert!(is_reserved(std::ffi::OsStr::new(".groot.symlink.1_2")));
        assert!(!is_reserved(std::ffi::OsStr::new("regular-file")));
    }

    #[test]
    fn reserved_prefix_is_detected_on_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;
        let mut bytes = RESERVED_PREFIX.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let name = std::ffi::OsStr::from_bytes(&bytes);
        assert!(is_reserved(name));
    }
}

//! The fake-metadata record itself.

use super::codec::{self, Flags, RECORD_LEN};

/// Permission-bit mask the record's `mode` field is restricted to:
/// `S_IRWXU | S_IRWXG | S_IRWXO | S_ISUID | S_ISGID | S_ISVTX`.
pub const MODE_PERM_MASK: u32 = 0o7777;

/// `flags, uid, gid, mode` overlay for one backing filesystem object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub flags: Flags,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Record {
    /// The zero record: no field is authoritative. Missing record, empty
    /// record, `ENODATA`/`ENOTSUP`, and (for symlink placeholders) `ENOENT`
    /// are all treated as this value.
    pub const ZERO: Record = Record { flags: Flags::empty(), uid: 0, gid: 0, mode: 0 };

    /// A fresh record as produced by `create`/`mkdir` for the calling
    /// request's uid/gid and the requested mode.
    pub fn fresh(uid: u32, gid: u32, mode: u32) -> Self {
        Self { flags: Flags::UID_SET | Flags::GID_SET | Flags::MODE_SET, uid, gid, mode: mode & MODE_PERM_MASK }
    }

    /// A record carrying only ownership, as written for a new symlink
    /// target: no mode, just the caller's uid/gid.
    pub fn owner_only(uid: u32, gid: u32) -> Self {
        Self { flags: Flags::UID_SET | Flags::GID_SET, uid, gid, mode: 0 }
    }

    /// Overlay `chmod`'s requested mode onto an existing record, preserving
    /// whatever uid/gid flags were already set.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & MODE_PERM_MASK;
        self.flags |= Flags::MODE_SET;
        self
    }

    /// Overlay a `chown`; `uid`/`gid` of `None` leaves the corresponding
    /// field (and its flag) untouched — the `-1` sentinel a caller uses to
    /// mean "don't change this".
    pub fn with_chown(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        if let Some(uid) = uid {
            self.uid = uid;
            self.flags |= Flags::UID_SET;
        }
        if let Some(gid) = gid {
            self.gid = gid;
            self.flags |= Flags::GID_SET;
        }
        self
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        codec::encode(self.flags.bits(), self.uid, self.gid, self.mode)
    }

    /// Decode a buffer that is exactly [`RECORD_LEN`] bytes long.
    pub fn decode(buf: &[u8]) -> Self {
        let (flags, uid, gid, mode) = codec::decode(buf);
        Self { flags: Flags::from_bits_truncate(flags), uid, gid, mode }
    }

    /// Overlay this record's set fields onto a real `stat` result, then
    /// clamp owners to the configured ceilings.
    pub fn apply(&self, st: &mut libc::stat, max_uid: u32, max_gid: u32) {
        if self.flags.contains(Flags::UID_SET) {
            st.st_uid = self.uid;
        }
        if self.flags.contains(Flags::GID_SET) {
            st.st_gid = self.gid;
        }
        if self.flags.contains(Flags::MODE_SET) {
            let perm_bits = self.mode & MODE_PERM_MASK;
            st.st_mode = (st.st_mode & !MODE_PERM_MASK) | perm_bits;
        }
        if st.st_uid > max_uid {
            st.st_uid = 0;
        }
        if st.st_gid > max_gid {
            st.st_gid = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_round_trips() {
        let rec = Record::fresh(1000, 1000, 0o640);
        let decoded = Record::decode(&rec.encode());
        assert_eq!(rec, decoded);
    }

    #[test]
    fn chown_minus_one_sentinel_leaves_field_untouched() {
        let rec = Record::fresh(1000, 1000, 0o640).with_chown(Some(42), None);
        assert_eq!(rec.uid, 42);
        assert_eq!(rec.gid, 1000);
        assert!(rec.flags.contains(Flags::GID_SET), "gid flag survives from fresh()");
    }

    #[test]
    fn apply_clamps_owner_above_ceiling() {
        let rec = Record::ZERO;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_uid = 100_000;
        rec.apply(&mut st, 65535, 65535);
        assert_eq!(st.st_uid, 0);
    }
}

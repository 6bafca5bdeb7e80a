//! Fixed 16-byte wire layout for the fake-metadata record.
//!
//! Four big-endian `u32` fields in the order `flags, uid, gid, mode`.

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

/// Byte length of an encoded [`super::record::Record`].
pub const RECORD_LEN: usize = 16;

bitflags! {
    /// Which fields of a [`super::record::Record`] are authoritative.
    ///
    /// A flag bit set without the corresponding field carrying meaning is
    /// never produced by this engine, but readers tolerate it.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Flags: u32 {
        const UID_SET  = 1 << 0;
        const GID_SET  = 1 << 1;
        const MODE_SET = 1 << 2;
    }
}

/// Encode `flags, uid, gid, mode` into the fixed 16-byte big-endian layout.
pub fn encode(flags: u32, uid: u32, gid: u32, mode: u32) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    BigEndian::write_u32(&mut buf[0..4], flags);
    BigEndian::write_u32(&mut buf[4..8], uid);
    BigEndian::write_u32(&mut buf[8..12], gid);
    BigEndian::write_u32(&mut buf[12..16], mode);
    buf
}

/// Decode a byte slice that is known to be exactly [`RECORD_LEN`] bytes.
///
/// Callers are responsible for treating any other length as an internal
/// consistency error; this function is total over its documented
/// precondition and panics otherwise since it is only ever called after a
/// length check.
pub fn decode(buf: &[u8]) -> (u32, u32, u32, u32) {
    assert_eq!(buf.len(), RECORD_LEN, "decode called on wrong-sized buffer");
    (
        BigEndian::read_u32(&buf[0..4]),
        BigEndian::read_u32(&buf[4..8]),
        BigEndian::read_u32(&buf[8..12]),
        BigEndian::read_u32(&buf[12..16]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_field() {
        let buf = encode(Flags::MODE_SET.bits() | Flags::UID_SET.bits(), 1000, 2000, 0o755);
        assert_eq!(buf.len(), RECORD_LEN);
        let (flags, uid, gid, mode) = decode(&buf);
        assert_eq!(flags, Flags::MODE_SET.bits() | Flags::UID_SET.bits());
        assert_eq!(uid, 1000);
        assert_eq!(gid, 2000);
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn is_big_endian_on_the_wire() {
        let buf = encode(1, 0, 0, 0);
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
    }

    #[test]
    #[should_panic]
    fn decode_rejects_wrong_size() {
        decode(&[0u8; 8]);
    }
}

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// Fixed-width type storable in a hash table slot
///
/// Keys and values are laid out inline in block pages, so each type
/// declares its encoded width up front and reads/writes itself at a slot
/// boundary.
pub trait SlotValue: Copy + PartialEq {
    const ENCODED_SIZE: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl SlotValue for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl SlotValue for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl SlotValue for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl SlotValue for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl SlotValue for Rid {
    const ENCODED_SIZE: usize = Rid::ENCODED_SIZE;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        Rid::from_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_roundtrips() {
        let mut buf = [0u8; 8];

        (-7i32).encode_into(&mut buf);
        assert_eq!(i32::decode_from(&buf), -7);

        0xDEAD_BEEFu32.encode_into(&mut buf);
        assert_eq!(u32::decode_from(&buf), 0xDEAD_BEEF);

        (-1i64).encode_into(&mut buf);
        assert_eq!(i64::decode_from(&buf), -1);
    }

    #[test]
    fn test_rid_roundtrip() {
        let mut buf = [0u8; Rid::ENCODED_SIZE];
        let rid = Rid::new(12, 34);
        rid.encode_into(&mut buf);
        assert_eq!(Rid::decode_from(&buf), rid);
    }
}

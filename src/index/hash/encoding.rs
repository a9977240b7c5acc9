use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// Fixed-width byte encoding for hash index keys and values.
///
/// Block pages store entries in a flat slot array, so every key and value
/// type must occupy a fixed number of bytes.
pub trait FixedSlot: Copy + PartialEq {
    const ENCODED_LEN: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl FixedSlot for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl FixedSlot for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl FixedSlot for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl FixedSlot for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl FixedSlot for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    fn decode_from(buf: &[u8]) -> Self {
        Rid::new(
            LittleEndian::read_u32(&buf[0..4]),
            LittleEndian::read_u32(&buf[4..8]),
        )
    }
}

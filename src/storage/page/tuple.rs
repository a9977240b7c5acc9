use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Deserialize};

/// An opaque row payload.
///
/// The executor layer owns the column encoding; the storage engine only
/// moves tuple bytes between pages and log records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes `serialize_to` writes
    pub fn serialized_len(&self) -> usize {
        4 + self.data.len()
    }

    /// Write the tuple as a length-prefixed byte string
    pub fn serialize_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.data.len() as u32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    /// Read a tuple previously written by `serialize_to`.
    ///
    /// Returns None if the buffer is too short for the declared length.
    pub fn deserialize_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            return None;
        }
        Some(Self {
            data: buf[4..4 + len].to_vec(),
        })
    }
}

impl From<&[u8]> for Tuple {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip() {
        let tuple = Tuple::new(vec![1, 2, 3, 4, 5]);
        let mut buf = vec![0u8; tuple.serialized_len()];
        tuple.serialize_to(&mut buf);

        let back = Tuple::deserialize_from(&buf).unwrap();
        assert_eq!(back, tuple);
    }

    #[test]
    fn test_deserialize_truncated() {
        let tuple = Tuple::new(vec![9; 32]);
        let mut buf = vec![0u8; tuple.serialized_len()];
        tuple.serialize_to(&mut buf);

        assert!(Tuple::deserialize_from(&buf[..10]).is_none());
        assert!(Tuple::deserialize_from(&[]).is_none());
    }
}

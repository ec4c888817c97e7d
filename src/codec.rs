//! Hand-rolled little-endian binary encoding for on-disk structures.
//!
//! Every multi-byte integer in the database and WAL file formats is
//! little-endian (spec §6.2). These traits keep that rule in one place
//! instead of scattering `to_le_bytes`/`from_le_bytes` calls across the
//! pager, page, and WAL modules.

use std::convert::TryInto;
use std::io::{self, Read, Write};

pub trait Encode {
    fn encode_to(&self, out: &mut Vec<u8>);
}

pub trait Decode: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> io::Result<Self>;
}

pub fn read_exact_vec<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_to<W: Write, T: Encode>(writer: &mut W, value: &T) -> io::Result<()> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf);
    writer.write_all(&buf)
}

macro_rules! impl_int_codec {
    ($($t:ty),+) => {
        $(
            impl Encode for $t {
                fn encode_to(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode_from<R: Read>(reader: &mut R) -> io::Result<Self> {
                    let bytes = read_exact_vec(reader, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.as_slice().try_into().unwrap()))
                }
            }
        )+
    };
}

impl_int_codec!(u8, u16, u32, u64, i8, i16, i32, i64);

/// A length-prefixed (`u32`) byte buffer, used for keys, values, and WAL
/// payloads.
pub struct LenPrefixedBytes<'a>(pub &'a [u8]);

impl Encode for LenPrefixedBytes<'_> {
    fn encode_to(&self, out: &mut Vec<u8>) {
        (self.0.len() as u32).encode_to(out);
        out.extend_from_slice(self.0);
    }
}

pub fn decode_len_prefixed<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = u32::decode_from(reader)? as usize;
    read_exact_vec(reader, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_integers() {
        let mut buf = Vec::new();
        42u32.encode_to(&mut buf);
        12345u64.encode_to(&mut buf);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(u32::decode_from(&mut cursor).unwrap(), 42);
        assert_eq!(u64::decode_from(&mut cursor).unwrap(), 12345);
    }

    #[test]
    fn round_trip_len_prefixed_bytes() {
        let mut buf = Vec::new();
        LenPrefixedBytes(b"hello world").encode_to(&mut buf);
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(decode_len_prefixed(&mut cursor).unwrap(), b"hello world");
    }
}

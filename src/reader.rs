use anyhow::Result;
use thiserror::Error;

use crate::shape::TypeShape;
use crate::{HeaderFlags, PmatString, Ptr};

/// Fatal decode failures. Everything else is logged and counted.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid PMAT data: {0}")]
    InvalidFormat(String),
    #[error("truncated dump: wanted {wanted} bytes at offset {offset}")]
    Truncated { offset: usize, wanted: usize },
}

/// Cursor over the raw dump bytes.
///
/// All multi-byte reads honor the header flags: byte order follows
/// `big_endian`, and the "uint" and pointer widths follow `integer_64` /
/// `pointer_64`. The flags are unknown until the header flags byte has
/// been decoded, so the reader starts from the all-clear default and the
/// header decoder injects the real value via [`DumpReader::set_flags`].
pub struct DumpReader<'a> {
    data: &'a [u8],
    pos: usize,
    flags: HeaderFlags,
}

impl<'a> DumpReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            flags: HeaderFlags::default(),
        }
    }

    pub fn set_flags(&mut self, flags: HeaderFlags) {
        self.flags = flags;
    }

    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    /// Bytes consumed so far. After a full decode this equals the length
    /// of the consumed prefix of the dump.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], FormatError> {
        if wanted > self.data.len() - self.pos {
            return Err(FormatError::Truncated {
                offset: self.pos,
                wanted,
            });
        }
        let bytes = &self.data[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        Ok(bytes.try_into().unwrap())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array()?;
        Ok(if self.flags.is_big_endian() {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array()?;
        Ok(if self.flags.is_big_endian() {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array()?;
        Ok(if self.flags.is_big_endian() {
            u64::from_be_bytes(bytes)
        } else {
            u64::from_le_bytes(bytes)
        })
    }

    /// Always network order, independent of the endian flag. Only the
    /// source-interpreter version in the header is stored this way.
    pub fn read_u32_net(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_array()?;
        Ok(if self.flags.is_big_endian() {
            f64::from_be_bytes(bytes)
        } else {
            f64::from_le_bytes(bytes)
        })
    }

    /// A perl integer at the width declared by the header.
    pub fn read_uint(&mut self) -> Result<u64> {
        if self.flags.has_64bit_integers() {
            self.read_u64()
        } else {
            self.read_u32().map(u64::from)
        }
    }

    /// A raw interpreter address at the width declared by the header.
    pub fn read_ptr(&mut self) -> Result<Ptr> {
        if self.flags.has_64bit_pointers() {
            self.read_u64().map(Ptr)
        } else {
            self.read_u32().map(|v| Ptr(v.into()))
        }
    }

    /// All-bits-set at the current "uint" width, the null-string sentinel.
    fn uint_max(&self) -> u64 {
        if self.flags.has_64bit_integers() {
            u64::MAX
        } else {
            u32::MAX.into()
        }
    }

    /// Length-prefixed string: "uint" length then raw bytes. A length of
    /// `~0` denotes a null string and carries no body bytes.
    pub fn read_str(&mut self) -> Result<PmatString> {
        let length = self.read_uint()?;
        if length == self.uint_max() {
            return Ok(PmatString::default());
        }
        let length = usize::try_from(length).map_err(|_| {
            FormatError::InvalidFormat(format!(
                "string length {length:#x} does not fit in memory"
            ))
        })?;
        Ok(PmatString::new(self.take(length)?.to_vec()))
    }

    /// Consume an object body described only by its shape table entry:
    /// `headerlen` raw bytes, `nptrs` pointers, `nstrs` strings.
    pub fn skip_shape(&mut self, shape: &TypeShape) -> Result<()> {
        self.take(shape.headerlen.into())?;
        for _ in 0..shape.nptrs {
            self.read_ptr()?;
        }
        for _ in 0..shape.nstrs {
            self.read_str()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn le_reader(data: &[u8]) -> DumpReader<'_> {
        let mut reader = DumpReader::new(data);
        reader.set_flags(HeaderFlags::from_raw(0x06));
        reader
    }

    #[test]
    fn truncated_read_reports_offset() {
        let data = [0x01, 0x02];
        let mut reader = DumpReader::new(&data);
        reader.read_u8().unwrap();
        let err = reader.read_u32().unwrap_err();
        match err.downcast_ref::<FormatError>() {
            Some(FormatError::Truncated { offset: 1, wanted: 4 }) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn endian_flag_controls_multibyte_reads() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut le = DumpReader::new(&data);
        le.set_flags(HeaderFlags::from_raw(0x00));
        assert_eq!(le.read_u32().unwrap(), 0x7856_3412);

        let mut be = DumpReader::new(&data);
        be.set_flags(HeaderFlags::from_raw(0x01));
        assert_eq!(be.read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn uint_and_ptr_track_header_widths() {
        let data = [
            0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // u64 uint
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // u64 ptr
        ];
        let mut wide = le_reader(&data);
        assert_eq!(wide.read_uint().unwrap(), 8);
        assert_eq!(wide.read_ptr().unwrap(), Ptr(0x10));

        let mut narrow = DumpReader::new(&data);
        narrow.set_flags(HeaderFlags::from_raw(0x00));
        assert_eq!(narrow.read_uint().unwrap(), 8);
        assert_eq!(narrow.read_ptr().unwrap(), Ptr(0));
        assert_eq!(narrow.offset(), 8);
    }

    #[test]
    fn null_string_sentinel_consumes_no_body() {
        let data = [0xFF; 8];
        let mut reader = le_reader(&data);
        let s = reader.read_str().unwrap();
        assert!(s.as_bytes().is_empty());
        assert_eq!(reader.offset(), 8);

        // 32-bit uints use the 32-bit sentinel
        let mut narrow = DumpReader::new(&data);
        narrow.set_flags(HeaderFlags::from_raw(0x00));
        let s = narrow.read_str().unwrap();
        assert!(s.as_bytes().is_empty());
        assert_eq!(narrow.offset(), 4);
    }

    #[test]
    fn skip_shape_advances_past_unknown_bodies() {
        // headerlen 3, 2 pointers, 1 string ("ab")
        let mut data = vec![0xAA, 0xBB, 0xCC];
        data.extend_from_slice(&[0x01; 8]);
        data.extend_from_slice(&[0x02; 8]);
        data.extend_from_slice(&2u64.to_le_bytes());
        data.extend_from_slice(b"ab");
        let mut reader = le_reader(&data);
        let shape = TypeShape {
            headerlen: 3,
            nptrs: 2,
            nstrs: 1,
        };
        reader.skip_shape(&shape).unwrap();
        assert_eq!(reader.offset(), data.len());
    }
}

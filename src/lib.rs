#![forbid(unsafe_code)]
mod fixup;
pub mod reader;
pub mod report;
pub mod roots;
pub mod shape;
pub mod sv;
pub mod table;


use std::borrow::Cow;

use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;

use crate::reader::{DumpReader, FormatError};
use crate::roots::Roots;
use crate::shape::ShapeTables;
use crate::sv::MagicNote;
use crate::table::ObjectTable;

/// A raw address in the dumped interpreter. Pure identity: it is never
/// dereferenced, only used as a key into the [`ObjectTable`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
)]
pub struct Ptr(pub u64);

impl Ptr {
    pub const NULL: Ptr = Ptr(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Ptr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::LowerHex for Ptr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl std::fmt::UpperHex for Ptr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

/// A byte string from the dump. Perl strings are not guaranteed to be
/// UTF-8, so the raw bytes are kept and display is lossy.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct PmatString(Vec<u8>);

impl PmatString {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for PmatString {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.as_utf8_lossy())
    }
}

impl std::fmt::Display for PmatString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_utf8_lossy().fmt(f)
    }
}

impl std::fmt::Debug for PmatString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        f.write_char('"')?;
        f.write_str(&self.as_utf8_lossy())?;
        f.write_char('"')?;
        Ok(())
    }
}

const HEADER_FLAG_BIG_ENDIAN: u8 = 1 << 0;
const HEADER_FLAG_INTEGER_64: u8 = 1 << 1;
const HEADER_FLAG_POINTER_64: u8 = 1 << 2;
const HEADER_FLAG_FLOAT_64: u8 = 1 << 3;
const HEADER_FLAG_THREADS: u8 = 1 << 4;
const HEADER_FLAG_ALL: u8 = HEADER_FLAG_BIG_ENDIAN
    | HEADER_FLAG_INTEGER_64
    | HEADER_FLAG_POINTER_64
    | HEADER_FLAG_FLOAT_64
    | HEADER_FLAG_THREADS;

/// Build details of the interpreter that produced the dump. Drives the
/// width and byte order of every subsequent read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    pub fn from_raw(value: u8) -> Self {
        let unknown = value & !HEADER_FLAG_ALL;
        if unknown != 0 {
            log::warn!("unknown header flag bits {unknown:#x}");
        }
        Self(value)
    }

    pub fn into_raw(&self) -> u8 {
        self.0
    }

    /// Multi-byte fields are big-endian.
    pub fn is_big_endian(&self) -> bool {
        self.0 & HEADER_FLAG_BIG_ENDIAN != 0
    }

    /// Perl integers (IV/UV) are 64-bit.
    pub fn has_64bit_integers(&self) -> bool {
        self.0 & HEADER_FLAG_INTEGER_64 != 0
    }

    /// Pointers are 64-bit.
    pub fn has_64bit_pointers(&self) -> bool {
        self.0 & HEADER_FLAG_POINTER_64 != 0
    }

    /// Floats (NV) are 64-bit.
    pub fn has_64bit_floats(&self) -> bool {
        self.0 & HEADER_FLAG_FLOAT_64 != 0
    }

    /// The interpreter was built with ithreads.
    pub fn has_threads(&self) -> bool {
        self.0 & HEADER_FLAG_THREADS != 0
    }
}

/// The fixed dump prefix: magic, build flags, format version and the
/// version of the interpreter that wrote the file.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Header {
    pub flags: HeaderFlags,
    pub major: u8,
    pub minor: u8,
    pub perl_version: u32,
}

impl Header {
    pub(crate) fn read(reader: &mut DumpReader) -> Result<Self> {
        let magic: [u8; 4] = reader.read_array()?;
        if magic != *b"PMAT" {
            bail!(FormatError::InvalidFormat(format!(
                "invalid magic {magic:?}, expected \"PMAT\""
            )));
        }
        let flags = HeaderFlags::from_raw(reader.read_u8()?);
        reader.set_flags(flags);
        let reserved = reader.read_u8()?;
        if reserved != 0 {
            bail!(FormatError::InvalidFormat(format!(
                "reserved header byte is {reserved:#x}, expected zero"
            )));
        }
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        let perl_version = reader.read_u32_net()?;
        Ok(Self {
            flags,
            major,
            minor,
            perl_version,
        })
    }

    /// "major.minor" of the dump format itself.
    pub fn pmat_version_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// "revision.version.subversion" of the dumping interpreter.
    pub fn perl_version_string(&self) -> String {
        let v = self.perl_version;
        format!("{}.{}.{}", v & 0xFF, (v >> 8) & 0xFFFF, (v >> 24) & 0xFFFF)
    }
}

/// The decoded dump: everything a diagnostic tool needs to answer
/// questions about the captured object graph.
#[derive(Debug)]
pub struct Dump {
    pub header: Header,
    pub shapes: ShapeTables,
    pub roots: Roots,
    pub stack: Vec<Ptr>,
    /// Magic annotations, in heap order. Never interned.
    pub magic: Vec<MagicNote>,
    pub objects: ObjectTable,
}

/// Decode a complete PMAT image: header, shape tables, roots, stack and
/// heap, then resolve deferred references and run fixup.
pub fn parse(bytes: &[u8]) -> Result<Dump> {
    let mut reader = DumpReader::new(bytes);
    let header = Header::read(&mut reader)?;
    debug!(
        "PMAT format {} generated on perl {}",
        header.pmat_version_string(),
        header.perl_version_string()
    );
    let shapes = ShapeTables::read(&mut reader)?;
    let roots = Roots::read(&mut reader)?;
    let stack = roots::read_stack(&mut reader)?;
    let mut objects = ObjectTable::new();
    let magic = sv::read_heap(&mut reader, &shapes, &mut objects)?;
    objects.finish();

    if reader.remaining() != 0 {
        debug!("{} bytes after the heap terminator", reader.remaining());
    }
    debug!("decode consumed {} bytes", reader.offset());
    Ok(Dump {
        header,
        shapes,
        roots,
        stack,
        magic,
        objects,
    })
}

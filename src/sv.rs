use anyhow::{bail, Result};
use log::{debug, trace};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::reader::{DumpReader, FormatError};
use crate::shape::ShapeTables;
use crate::table::ObjectTable;
use crate::{PmatString, Ptr};

/// Heap object tags. Values 0..=12 appear on the wire; PADNAMES, PADLIST
/// and PAD exist only after fixup has reclassified arrays reachable from
/// a CODE object.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
)]
#[repr(u8)]
pub enum SvType {
    End = 0,
    Glob = 1,
    Scalar = 2,
    Ref = 3,
    Array = 4,
    Hash = 5,
    Stash = 6,
    Code = 7,
    Io = 8,
    Lvalue = 9,
    Regexp = 10,
    Format = 11,
    Invlist = 12,
    Padnames = 13,
    Padlist = 14,
    Pad = 15,
    Magic = 0x80,
    Unknown = 0xFF,
}

impl SvType {
    pub fn name(&self) -> &'static str {
        match self {
            SvType::End => "end of list",
            SvType::Glob => "GLOB",
            SvType::Scalar => "SCALAR",
            SvType::Ref => "REF",
            SvType::Array => "ARRAY",
            SvType::Hash => "HASH",
            SvType::Stash => "STASH",
            SvType::Code => "CODE",
            SvType::Io => "IO",
            SvType::Lvalue => "LVALUE",
            SvType::Regexp => "REGEXP",
            SvType::Format => "FORMAT",
            SvType::Invlist => "INVLIST",
            SvType::Padnames => "PADNAMES",
            SvType::Padlist => "PADLIST",
            SvType::Pad => "PAD",
            SvType::Magic => "MAGIC",
            SvType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for SvType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fields shared by every heap object, decoded before the type-specific
/// body.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SvHead {
    pub address: Ptr,
    pub refcnt: u32,
    pub size: u64,
    /// Address of the stash this object is blessed into, null if plain.
    pub blessed: Ptr,
}

impl SvHead {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            address: reader.read_ptr()?,
            refcnt: reader.read_u32()?,
            size: reader.read_uint()?,
            blessed: reader.read_ptr()?,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Sv {
    pub head: SvHead,
    pub body: SvBody,
}

impl Sv {
    pub fn sv_type(&self) -> SvType {
        match &self.body {
            SvBody::Glob(_) => SvType::Glob,
            SvBody::Scalar(_) => SvType::Scalar,
            SvBody::Ref(_) => SvType::Ref,
            SvBody::Array(_) => SvType::Array,
            SvBody::Hash(_) => SvType::Hash,
            SvBody::Stash(_) => SvType::Stash,
            SvBody::Code(_) => SvType::Code,
            SvBody::Io(_) => SvType::Io,
            SvBody::Lvalue(_) => SvType::Lvalue,
            SvBody::Regexp => SvType::Regexp,
            SvBody::Format => SvType::Format,
            SvBody::Invlist => SvType::Invlist,
            SvBody::Padnames(_) => SvType::Padnames,
            SvBody::Padlist(_) => SvType::Padlist,
            SvBody::Pad(_) => SvType::Pad,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.sv_type().name()
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum SvBody {
    Glob(GlobBody),
    Scalar(ScalarBody),
    Ref(RefBody),
    Array(ArrayBody),
    Hash(HashBody),
    Stash(StashBody),
    Code(CodeBody),
    Io(IoBody),
    Lvalue(LvalueBody),
    /// Body skipped via the shape table, nothing retained.
    Regexp,
    Format,
    Invlist,
    /// Synthetic, produced by fixup from ARRAYs owned by a CODE object.
    Padnames(ArrayBody),
    Padlist(ArrayBody),
    Pad(ArrayBody),
}

const SCALAR_FLAG_IV: u8 = 0x01;
const SCALAR_FLAG_UV: u8 = 0x02;
const SCALAR_FLAG_NV: u8 = 0x04;
const SCALAR_FLAG_PV: u8 = 0x08;
const SCALAR_FLAG_UTF8: u8 = 0x10;
const SCALAR_FLAG_ALL: u8 = 0x1F;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScalarBody {
    pub flags: u8,
    pub iv: u64,
    pub nv: f64,
    pub pvlen: u64,
    pub ourstash: Ptr,
    pub pv: PmatString,
}

impl ScalarBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        let flags = reader.read_u8()?;
        if flags & !SCALAR_FLAG_ALL != 0 {
            #[cfg(feature = "restrictive")]
            bail!(FormatError::InvalidFormat(format!(
                "invalid scalar flags {flags:#x}"
            )));
            #[cfg(not(feature = "restrictive"))]
            log::warn!("scalar with unknown flag bits {flags:#x}");
        }
        Ok(Self {
            flags,
            iv: reader.read_uint()?,
            nv: reader.read_f64()?,
            pvlen: reader.read_uint()?,
            ourstash: reader.read_ptr()?,
            pv: reader.read_str()?,
        })
    }

    pub fn has_iv(&self) -> bool {
        self.flags & SCALAR_FLAG_IV != 0
    }

    /// The IV slot holds an unsigned value.
    pub fn iv_is_uv(&self) -> bool {
        self.flags & SCALAR_FLAG_UV != 0
    }

    pub fn has_nv(&self) -> bool {
        self.flags & SCALAR_FLAG_NV != 0
    }

    pub fn has_pv(&self) -> bool {
        self.flags & SCALAR_FLAG_PV != 0
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & SCALAR_FLAG_UTF8 != 0
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GlobBody {
    pub line: u64,
    pub stash: Ptr,
    pub scalar: Ptr,
    pub array: Ptr,
    pub hash: Ptr,
    pub code: Ptr,
    pub egv: Ptr,
    pub io: Ptr,
    pub form: Ptr,
    pub name: PmatString,
    pub file: PmatString,
}

impl GlobBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            line: reader.read_uint()?,
            stash: reader.read_ptr()?,
            scalar: reader.read_ptr()?,
            array: reader.read_ptr()?,
            hash: reader.read_ptr()?,
            code: reader.read_ptr()?,
            egv: reader.read_ptr()?,
            io: reader.read_ptr()?,
            form: reader.read_ptr()?,
            name: reader.read_str()?,
            file: reader.read_str()?,
        })
    }
}

const REF_FLAG_WEAK: u8 = 0x01;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RefBody {
    pub flags: u8,
    pub rv: Ptr,
    pub ourstash: Ptr,
}

impl RefBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            flags: reader.read_u8()?,
            rv: reader.read_ptr()?,
            ourstash: reader.read_ptr()?,
        })
    }

    pub fn is_weak(&self) -> bool {
        self.flags & REF_FLAG_WEAK != 0
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ArrayBody {
    pub count: u64,
    pub flags: u8,
    pub elements: Vec<Ptr>,
}

impl ArrayBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        let count = reader.read_uint()?;
        let flags = reader.read_u8()?;
        let elements = (0..count)
            .map(|_| reader.read_ptr())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            count,
            flags,
            elements,
        })
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct HashBody {
    pub count: u64,
    pub backrefs: Ptr,
    /// Key/value pairs in wire order.
    pub elements: Vec<(PmatString, Ptr)>,
}

impl HashBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        let count = reader.read_uint()?;
        let backrefs = reader.read_ptr()?;
        let elements = Self::read_elements(reader, count)?;
        Ok(Self {
            count,
            backrefs,
            elements,
        })
    }

    fn read_elements(
        reader: &mut DumpReader,
        count: u64,
    ) -> Result<Vec<(PmatString, Ptr)>> {
        (0..count)
            .map(|_| Ok((reader.read_str()?, reader.read_ptr()?)))
            .collect()
    }
}

/// A stash is a hash with method-resolution data and a class name; the
/// key/value pairs come after the name on the wire.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StashBody {
    pub hash: HashBody,
    pub mro_linear_all: Ptr,
    pub mro_linear_current: Ptr,
    pub mro_nextmethod: Ptr,
    pub mro_isa: Ptr,
    pub name: PmatString,
}

impl StashBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        let count = reader.read_uint()?;
        let backrefs = reader.read_ptr()?;
        let mro_linear_all = reader.read_ptr()?;
        let mro_linear_current = reader.read_ptr()?;
        let mro_nextmethod = reader.read_ptr()?;
        let mro_isa = reader.read_ptr()?;
        let name = reader.read_str()?;
        let elements = HashBody::read_elements(reader, count)?;
        Ok(Self {
            hash: HashBody {
                count,
                backrefs,
                elements,
            },
            mro_linear_all,
            mro_linear_current,
            mro_nextmethod,
            mro_isa,
            name,
        })
    }
}

/// Tags of the variable trailer after a CODE body, terminated by 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum CodeTag {
    End = 0,
    ConstSv = 1,
    ConstIx = 2,
    GvSv = 3,
    GvIx = 4,
    PadName = 5,
    PadSv = 6,
    Padnames = 7,
    Pad = 8,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CodeBody {
    pub line: u64,
    pub flags: u8,
    pub op_root: Ptr,
    pub stash: Ptr,
    pub glob: Ptr,
    pub outside: Ptr,
    pub padlist: Ptr,
    pub constval: Ptr,
    pub file: PmatString,
    pub constsv: Ptr,
    pub constix: u64,
    pub gvsv: Ptr,
    pub gvix: u64,
    pub padnames: Ptr,
    /// Scratchpad addresses indexed by depth; depth 0 is unused.
    pub pads: Vec<Ptr>,
    /// Addresses of the PAD objects fixup reclassified for this sub.
    pub pad_svs: Vec<Ptr>,
}

impl CodeBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        let mut body = Self {
            line: reader.read_uint()?,
            flags: reader.read_u8()?,
            op_root: reader.read_ptr()?,
            stash: reader.read_ptr()?,
            glob: reader.read_ptr()?,
            outside: reader.read_ptr()?,
            padlist: reader.read_ptr()?,
            constval: reader.read_ptr()?,
            file: reader.read_str()?,
            ..Self::default()
        };
        body.read_trailer(reader)?;
        Ok(body)
    }

    fn read_trailer(&mut self, reader: &mut DumpReader) -> Result<()> {
        loop {
            let raw = reader.read_u8()?;
            let Ok(tag) = CodeTag::try_from_primitive(raw) else {
                // An unrecognized entry has an unknowable length, there
                // is no way to resynchronize inside the trailer.
                bail!(FormatError::InvalidFormat(format!(
                    "unknown CODE trailer tag {raw}"
                )));
            };
            trace!("CODE trailer entry {tag:?}");
            match tag {
                CodeTag::End => return Ok(()),
                CodeTag::ConstSv => self.constsv = reader.read_ptr()?,
                CodeTag::ConstIx => self.constix = reader.read_uint()?,
                CodeTag::GvSv => self.gvsv = reader.read_ptr()?,
                CodeTag::GvIx => self.gvix = reader.read_uint()?,
                // The legacy per-name entries have no documented layout;
                // consuming a guessed one would desynchronize the stream
                // just as silently as an unknown tag.
                CodeTag::PadName | CodeTag::PadSv => {
                    bail!(FormatError::InvalidFormat(format!(
                        "legacy {tag:?} entry in CODE trailer"
                    )))
                }
                CodeTag::Padnames => self.padnames = reader.read_ptr()?,
                CodeTag::Pad => {
                    let depth = usize::try_from(reader.read_uint()?)?;
                    let pad = reader.read_ptr()?;
                    if depth >= self.pads.len() {
                        self.pads.resize(depth + 1, Ptr::NULL);
                    }
                    self.pads[depth] = pad;
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct IoBody {
    pub ifileno: u64,
    pub ofileno: u64,
    pub top: Ptr,
    pub format: Ptr,
    pub bottom: Ptr,
}

impl IoBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            ifileno: reader.read_uint()?,
            ofileno: reader.read_uint()?,
            top: reader.read_ptr()?,
            format: reader.read_ptr()?,
            bottom: reader.read_ptr()?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct LvalueBody {
    pub lv_type: u8,
    pub offset: u64,
    pub length: u64,
    pub target: Ptr,
}

impl LvalueBody {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            lv_type: reader.read_u8()?,
            offset: reader.read_uint()?,
            length: reader.read_uint()?,
            target: reader.read_ptr()?,
        })
    }
}

/// An auxiliary annotation attached to another object. Decoded from the
/// heap stream but never interned.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MagicNote {
    pub addr: Ptr,
    pub kind: u8,
    pub flags: u8,
    pub obj: Ptr,
    pub ptr: Ptr,
}

impl MagicNote {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            addr: reader.read_ptr()?,
            kind: reader.read_u8()?,
            flags: reader.read_u8()?,
            obj: reader.read_ptr()?,
            ptr: reader.read_ptr()?,
        })
    }
}

enum HeapEntry {
    Sv(Sv),
    Magic(MagicNote),
    Skipped,
    End,
}

/// Decode heap objects until the END record, interning each into the
/// table and collecting magic annotations on the side.
pub(crate) fn read_heap(
    reader: &mut DumpReader,
    shapes: &ShapeTables,
    table: &mut ObjectTable,
) -> Result<Vec<MagicNote>> {
    let mut notes = Vec::new();
    loop {
        match read_heap_entry(reader, shapes)? {
            HeapEntry::End => break,
            HeapEntry::Sv(sv) => table.add(sv),
            HeapEntry::Magic(note) => notes.push(note),
            HeapEntry::Skipped => {}
        }
    }
    Ok(notes)
}

fn read_heap_entry(
    reader: &mut DumpReader,
    shapes: &ShapeTables,
) -> Result<HeapEntry> {
    let tag = reader.read_u8()?;
    if tag == u8::from(SvType::End) {
        trace!("heap terminator at offset {}", reader.offset());
        return Ok(HeapEntry::End);
    }
    if tag == u8::from(SvType::Magic) {
        return MagicNote::read(reader).map(HeapEntry::Magic);
    }

    let head = SvHead::read(reader)?;
    trace!(
        "object tag {tag} at {:#x}, size {}",
        head.address.0,
        head.size
    );
    let body = match SvType::try_from_primitive(tag) {
        Ok(SvType::Glob) => SvBody::Glob(GlobBody::read(reader)?),
        Ok(SvType::Scalar) => SvBody::Scalar(ScalarBody::read(reader)?),
        Ok(SvType::Ref) => SvBody::Ref(RefBody::read(reader)?),
        Ok(SvType::Array) => SvBody::Array(ArrayBody::read(reader)?),
        Ok(SvType::Hash) => SvBody::Hash(HashBody::read(reader)?),
        Ok(SvType::Stash) => SvBody::Stash(StashBody::read(reader)?),
        Ok(SvType::Code) => SvBody::Code(CodeBody::read(reader)?),
        Ok(SvType::Io) => SvBody::Io(IoBody::read(reader)?),
        Ok(SvType::Lvalue) => SvBody::Lvalue(LvalueBody::read(reader)?),
        // The producer does not serialize these bodies field by field;
        // consume them through the shape table and keep the object.
        Ok(SvType::Regexp) => {
            skip_by_shape(reader, shapes, tag)?;
            SvBody::Regexp
        }
        Ok(SvType::Format) => {
            skip_by_shape(reader, shapes, tag)?;
            SvBody::Format
        }
        Ok(SvType::Invlist) => {
            skip_by_shape(reader, shapes, tag)?;
            SvBody::Invlist
        }
        // Synthetic and sentinel tags never carry a wire body of their
        // own; anything else is a tag this parser has never heard of.
        // Either way the shape table is the only way past the record.
        Ok(_) | Err(_) => {
            debug!(
                "skipping object with unhandled tag {tag} at {:#x}",
                head.address.0
            );
            skip_by_shape(reader, shapes, tag)?;
            return Ok(HeapEntry::Skipped);
        }
    };
    Ok(HeapEntry::Sv(Sv { head, body }))
}

fn skip_by_shape(
    reader: &mut DumpReader,
    shapes: &ShapeTables,
    tag: u8,
) -> Result<()> {
    let Some(shape) = shapes.for_tag(tag) else {
        bail!(FormatError::InvalidFormat(format!(
            "object tag {tag} has no shape table entry"
        )));
    };
    reader.skip_shape(shape)
}

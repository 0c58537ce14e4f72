use anyhow::Result;
use log::trace;
use serde::Serialize;

use crate::reader::DumpReader;

/// How many extra bytes, pointers and strings compose an object body at a
/// given type tag. Entry 0 is the generic shape shared by every object;
/// entries 1.. are indexed by the wire tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TypeShape {
    pub headerlen: u8,
    pub nptrs: u8,
    pub nstrs: u8,
}

impl TypeShape {
    fn read(reader: &mut DumpReader) -> Result<Self> {
        Ok(Self {
            headerlen: reader.read_u8()?,
            nptrs: reader.read_u8()?,
            nstrs: reader.read_u8()?,
        })
    }
}

/// The two shape tables from the dump header: one for heap objects, one
/// for context frames. Immutable once the header has been decoded.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ShapeTables {
    pub sv: Vec<TypeShape>,
    pub context: Vec<TypeShape>,
}

impl ShapeTables {
    pub(crate) fn read(reader: &mut DumpReader) -> Result<Self> {
        let sv = Self::read_table(reader)?;
        let context = Self::read_table(reader)?;
        trace!(
            "shape tables: {} sv entries, {} context entries",
            sv.len(),
            context.len()
        );
        Ok(Self { sv, context })
    }

    fn read_table(reader: &mut DumpReader) -> Result<Vec<TypeShape>> {
        let count = reader.read_u8()?;
        (0..count).map(|_| TypeShape::read(reader)).collect()
    }

    /// Shape entry for a wire tag, if the producer declared one.
    pub fn for_tag(&self, tag: u8) -> Option<&TypeShape> {
        self.sv.get(usize::from(tag))
    }
}

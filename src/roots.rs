use anyhow::Result;
use log::trace;
use serde::Serialize;

use crate::reader::DumpReader;
use crate::{PmatString, Ptr};

/// The distinguished immortal scalars plus the named root table.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Roots {
    pub undef: Ptr,
    pub yes: Ptr,
    pub no: Ptr,
    pub other: Vec<(PmatString, Ptr)>,
}

impl Roots {
    pub(crate) fn read(reader: &mut DumpReader) -> Result<Self> {
        let undef = reader.read_ptr()?;
        let yes = reader.read_ptr()?;
        let no = reader.read_ptr()?;
        let count = reader.read_u32()?;
        trace!("{count} named roots");
        let other = (0..count)
            .map(|_| Ok((reader.read_str()?, reader.read_ptr()?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            undef,
            yes,
            no,
            other,
        })
    }

    /// Pointer for a named root slot, if the dump recorded one.
    pub fn by_name(&self, name: &str) -> Option<Ptr> {
        self.other
            .iter()
            .find(|(n, _)| n.as_bytes() == name.as_bytes())
            .map(|(_, ptr)| *ptr)
    }
}

/// The value stack: addresses of the live temporaries at dump time.
pub(crate) fn read_stack(reader: &mut DumpReader) -> Result<Vec<Ptr>> {
    let count = reader.read_uint()?;
    trace!("{count} stack entries");
    (0..count).map(|_| reader.read_ptr()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::HeaderFlags;

    #[test]
    fn reads_named_roots_after_immortals() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x100u64.to_le_bytes()); // undef
        data.extend_from_slice(&0x200u64.to_le_bytes()); // yes
        data.extend_from_slice(&0x300u64.to_le_bytes()); // no
        data.extend_from_slice(&1u32.to_le_bytes()); // one named root
        data.extend_from_slice(&7u64.to_le_bytes());
        data.extend_from_slice(b"main_cv");
        data.extend_from_slice(&0x400u64.to_le_bytes());

        let mut reader = DumpReader::new(&data);
        reader.set_flags(HeaderFlags::from_raw(0x06));
        let roots = Roots::read(&mut reader).unwrap();
        assert_eq!(roots.undef, Ptr(0x100));
        assert_eq!(roots.no, Ptr(0x300));
        assert_eq!(roots.by_name("main_cv"), Some(Ptr(0x400)));
        assert_eq!(roots.by_name("defstash"), None);
        assert_eq!(reader.offset(), data.len());
    }

    #[test]
    fn stack_length_uses_integer_width() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u64.to_le_bytes());
        data.extend_from_slice(&0xAAu64.to_le_bytes());
        data.extend_from_slice(&0xBBu64.to_le_bytes());
        let mut reader = DumpReader::new(&data);
        reader.set_flags(HeaderFlags::from_raw(0x06));
        let stack = read_stack(&mut reader).unwrap();
        assert_eq!(stack, vec![Ptr(0xAA), Ptr(0xBB)]);
    }
}

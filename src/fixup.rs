use log::{debug, error, info};

use crate::sv::{Sv, SvBody, SvType};
use crate::table::ObjectTable;
use crate::Ptr;

/// Which synthetic tag an ARRAY is being promoted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PadKind {
    Padlist,
    Padnames,
    Pad,
}

impl PadKind {
    fn name(self) -> &'static str {
        match self {
            PadKind::Padlist => "padlist",
            PadKind::Padnames => "padnames",
            PadKind::Pad => "pad",
        }
    }
}

/// Upgrade the ARRAYs referenced by every CODE object into their
/// post-decode forms. Inconsistencies skip the specific upgrade and are
/// counted; the rest of the pass continues.
pub(crate) fn run(table: &mut ObjectTable) {
    let code_addrs: Vec<Ptr> = table
        .iter()
        .filter(|sv| sv.sv_type() == SvType::Code)
        .map(|sv| sv.head.address)
        .collect();
    for cv_addr in code_addrs {
        fixup_code(table, cv_addr);
    }
}

fn fixup_code(table: &mut ObjectTable, cv_addr: Ptr) {
    let Ok(Sv {
        body: SvBody::Code(code),
        ..
    }) = table.get(cv_addr)
    else {
        return;
    };
    let (padlist, padnames, pads) =
        (code.padlist, code.padnames, code.pads.clone());
    debug!("fixing up CODE at {cv_addr}");

    if padlist.is_null() {
        info!("CODE at {cv_addr} has no padlist, skipping");
        return;
    }
    reclassify(table, cv_addr, padlist, PadKind::Padlist);

    if padnames.is_null() {
        error!("CODE at {cv_addr} has a padlist but no padnames");
        table.note_fixup_skip();
    } else {
        reclassify(table, cv_addr, padnames, PadKind::Padnames);
    }

    // Depth 0 is an empty slot by convention.
    let mut pad_svs = Vec::new();
    for (depth, pad) in pads.iter().enumerate().skip(1) {
        if pad.is_null() {
            continue;
        }
        debug!("pad depth {depth} at {pad}");
        if reclassify(table, cv_addr, *pad, PadKind::Pad) {
            pad_svs.push(*pad);
        }
    }
    if let Some(Sv {
        body: SvBody::Code(code),
        ..
    }) = table.get_mut(cv_addr)
    {
        code.pad_svs = pad_svs;
    }
}

fn reclassify(
    table: &mut ObjectTable,
    cv_addr: Ptr,
    addr: Ptr,
    kind: PadKind,
) -> bool {
    let upgraded = match table.get(addr) {
        Err(_) => {
            error!(
                "CODE at {cv_addr}: {} points at {addr}, which does not \
                 exist",
                kind.name()
            );
            None
        }
        Ok(Sv {
            head,
            body: SvBody::Array(array),
        }) => {
            if kind == PadKind::Padnames
                && array.count != array.elements.len() as u64
            {
                error!(
                    "padnames at {addr} claims {} elements but holds {}",
                    array.count,
                    array.elements.len()
                );
                None
            } else {
                let body = match kind {
                    PadKind::Padlist => SvBody::Padlist(array.clone()),
                    PadKind::Padnames => SvBody::Padnames(array.clone()),
                    PadKind::Pad => SvBody::Pad(array.clone()),
                };
                Some(Sv { head: *head, body })
            }
        }
        Ok(other) => {
            error!(
                "CODE at {cv_addr}: {} points at a {}, expected an ARRAY",
                kind.name(),
                other.type_name()
            );
            None
        }
    };
    match upgraded {
        // The address was just looked up, so the swap cannot fail.
        Some(sv) => table.replace(sv).is_ok(),
        None => {
            table.note_fixup_skip();
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sv::{ArrayBody, CodeBody, SvHead};

    fn head(addr: u64, size: u64) -> SvHead {
        SvHead {
            address: Ptr(addr),
            refcnt: 1,
            size,
            blessed: Ptr::NULL,
        }
    }

    fn array(addr: u64, elements: Vec<Ptr>) -> Sv {
        Sv {
            head: head(addr, 80),
            body: SvBody::Array(ArrayBody {
                count: elements.len() as u64,
                flags: 0,
                elements,
            }),
        }
    }

    fn code(addr: u64, padlist: u64, padnames: u64, pads: Vec<Ptr>) -> Sv {
        Sv {
            head: head(addr, 160),
            body: SvBody::Code(CodeBody {
                padlist: Ptr(padlist),
                padnames: Ptr(padnames),
                pads,
                ..CodeBody::default()
            }),
        }
    }

    #[test]
    fn promotes_padlist_padnames_and_pads() {
        let mut table = ObjectTable::new();
        table.add(array(0xA000, vec![]));
        table.add(array(0xB000, vec![]));
        table.add(array(0xC000, vec![Ptr(0x1)]));
        table.add(code(
            0xF000,
            0xA000,
            0xB000,
            vec![Ptr::NULL, Ptr(0xC000)],
        ));
        run(&mut table);

        assert_eq!(
            table.get(Ptr(0xA000)).unwrap().sv_type(),
            SvType::Padlist
        );
        assert_eq!(
            table.get(Ptr(0xB000)).unwrap().sv_type(),
            SvType::Padnames
        );
        assert_eq!(table.get(Ptr(0xC000)).unwrap().sv_type(), SvType::Pad);
        assert!(!table.stats().count_by_type.contains_key(&SvType::Array));

        let Sv {
            body: SvBody::Code(code),
            ..
        } = table.get(Ptr(0xF000)).unwrap()
        else {
            panic!("CODE vanished");
        };
        assert_eq!(code.pad_svs, vec![Ptr(0xC000)]);
        assert_eq!(table.stats().fixup_skipped, 0);
    }

    #[test]
    fn code_without_padlist_is_left_alone() {
        let mut table = ObjectTable::new();
        table.add(array(0xA000, vec![]));
        table.add(code(0xF000, 0, 0, vec![]));
        run(&mut table);
        assert_eq!(table.get(Ptr(0xA000)).unwrap().sv_type(), SvType::Array);
        assert_eq!(table.stats().fixup_skipped, 0);
    }

    #[test]
    fn dangling_padlist_is_skipped_but_padnames_still_runs() {
        let mut table = ObjectTable::new();
        table.add(array(0xB000, vec![]));
        table.add(code(0xF000, 0xDEAD, 0xB000, vec![]));
        run(&mut table);
        assert_eq!(table.stats().fixup_skipped, 1);
        assert_eq!(
            table.get(Ptr(0xB000)).unwrap().sv_type(),
            SvType::Padnames
        );
    }

    #[test]
    fn non_array_padlist_is_skipped() {
        let mut table = ObjectTable::new();
        table.add(Sv {
            head: head(0xA000, 24),
            body: SvBody::Scalar(crate::sv::ScalarBody::default()),
        });
        table.add(array(0xB000, vec![]));
        table.add(code(0xF000, 0xA000, 0xB000, vec![]));
        run(&mut table);
        assert_eq!(table.stats().fixup_skipped, 1);
        assert_eq!(table.get(Ptr(0xA000)).unwrap().sv_type(), SvType::Scalar);
    }

    #[test]
    fn padnames_element_count_mismatch_is_skipped() {
        let mut table = ObjectTable::new();
        table.add(array(0xA000, vec![]));
        let mut bad = array(0xB000, vec![Ptr(0x1)]);
        if let SvBody::Array(body) = &mut bad.body {
            body.count = 5;
        }
        table.add(bad);
        table.add(code(0xF000, 0xA000, 0xB000, vec![]));
        run(&mut table);
        assert_eq!(table.stats().fixup_skipped, 1);
        assert_eq!(table.get(Ptr(0xB000)).unwrap().sv_type(), SvType::Array);
    }
}

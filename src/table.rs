use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use log::{debug, error};
use serde::Serialize;

use crate::sv::{Sv, SvBody, SvType};
use crate::Ptr;

/// Per-type and per-class accounting, plus counters for the recoverable
/// oddities met during decode and fixup.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Stats {
    /// Objects with no blessed pointer, bucketed by tag.
    pub count_by_type: BTreeMap<SvType, u64>,
    pub size_by_type: BTreeMap<SvType, u64>,
    /// Blessed objects, bucketed by "TYPE(Class::Name)".
    pub count_by_blessed: BTreeMap<String, u64>,
    pub size_by_blessed: BTreeMap<String, u64>,
    pub duplicate_addresses: u64,
    pub dangling_blessed: u64,
    pub fixup_skipped: u64,
}

impl Stats {
    fn bump_type(&mut self, ty: SvType, size: u64) {
        *self.count_by_type.entry(ty).or_default() += 1;
        *self.size_by_type.entry(ty).or_default() += size;
    }

    fn drop_type(&mut self, ty: SvType, size: u64) {
        dec(&mut self.count_by_type, &ty, 1);
        dec(&mut self.size_by_type, &ty, size);
    }

    fn bump_blessed(&mut self, bucket: String, size: u64) {
        *self.size_by_blessed.entry(bucket.clone()).or_default() += size;
        *self.count_by_blessed.entry(bucket).or_default() += 1;
    }

    fn drop_blessed(&mut self, bucket: &str, size: u64) {
        dec(&mut self.count_by_blessed, bucket, 1);
        dec(&mut self.size_by_blessed, bucket, size);
    }
}

/// Decrement a counter bucket, dropping it once it reaches zero so that
/// fixup does not leave empty rows behind.
fn dec<K: Ord + ?Sized, Q: Ord + std::borrow::Borrow<K>>(
    map: &mut BTreeMap<Q, u64>,
    key: &K,
    by: u64,
) {
    if let Some(value) = map.get_mut(key) {
        *value = value.saturating_sub(by);
        if *value == 0 {
            map.remove(key);
        }
    }
}

/// Address-keyed store owning every decoded object. Cross-references
/// between objects stay raw addresses; traversal is a lookup here.
#[derive(Debug, Default)]
pub struct ObjectTable {
    svs: HashMap<Ptr, Sv>,
    stats: Stats,
    /// Objects whose blessed stash had not been decoded yet, keyed by
    /// the awaited stash address.
    blessed_pending: HashMap<Ptr, Vec<Ptr>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a decoded object. The first record at an address wins;
    /// duplicates are counted and dropped.
    pub fn add(&mut self, sv: Sv) {
        let addr = sv.head.address;
        if let Some(existing) = self.svs.get(&addr) {
            error!(
                "address {addr} already occupied by {}, dropping incoming {}",
                existing.type_name(),
                sv.type_name()
            );
            self.stats.duplicate_addresses += 1;
            return;
        }
        let ty = sv.sv_type();
        let size = sv.head.size;
        let blessed = sv.head.blessed;
        self.svs.insert(addr, sv);
        if blessed.is_null() {
            self.stats.bump_type(ty, size);
        } else {
            self.update_blessed(addr);
        }

        // Anything waiting on this address for its class name can now
        // resolve.
        if let Some(waiting) = self.blessed_pending.remove(&addr) {
            debug!(
                "{} objects were waiting on the stash at {addr}",
                waiting.len()
            );
            if ty != SvType::Stash {
                error!("blessed target at {addr} is a {ty}, not a stash");
            }
            for pending in waiting {
                debug_assert_eq!(self.svs[&pending].head.blessed, addr);
                self.update_blessed(pending);
            }
        }
    }

    /// Account `addr` into its blessed-class bucket, or defer it until
    /// the stash it points at has been interned.
    fn update_blessed(&mut self, addr: Ptr) {
        let sv = &self.svs[&addr];
        let (ty, size, blessed) = (sv.sv_type(), sv.head.size, sv.head.blessed);
        if self.svs.contains_key(&blessed) {
            let bucket = self.blessed_bucket(ty, blessed);
            self.stats.bump_blessed(bucket, size);
        } else {
            debug!("no stash at {blessed} yet, deferring {addr}");
            self.blessed_pending.entry(blessed).or_default().push(addr);
        }
    }

    /// "TYPE(Class::Name)", falling back to the bare type name when the
    /// blessed pointer turns out not to reference a stash.
    fn blessed_bucket(&self, ty: SvType, stash: Ptr) -> String {
        match self.svs.get(&stash) {
            Some(Sv {
                body: SvBody::Stash(st),
                ..
            }) => format!("{}({})", ty.name(), st.name),
            Some(other) => {
                error!(
                    "object blessed into a {} at {stash}, not a stash",
                    other.type_name()
                );
                ty.name().to_string()
            }
            None => ty.name().to_string(),
        }
    }

    pub fn get(&self, addr: Ptr) -> Result<&Sv> {
        self.svs
            .get(&addr)
            .ok_or_else(|| anyhow!("no object at address {addr}"))
    }

    pub(crate) fn get_mut(&mut self, addr: Ptr) -> Option<&mut Sv> {
        self.svs.get_mut(&addr)
    }

    pub fn contains(&self, addr: Ptr) -> bool {
        self.svs.contains_key(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sv> {
        self.svs.values()
    }

    pub fn len(&self) -> usize {
        self.svs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.svs.is_empty()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn note_fixup_skip(&mut self) {
        self.stats.fixup_skipped += 1;
    }

    /// Swap in a reclassified object for the record already interned at
    /// the same address, moving its statistics to the new tag. Fixup is
    /// the only caller.
    pub(crate) fn replace(&mut self, now: Sv) -> Result<()> {
        let addr = now.head.address;
        let was = self
            .svs
            .get(&addr)
            .ok_or_else(|| anyhow!("replace of unmapped address {addr}"))?;
        let (was_ty, was_size, was_blessed) =
            (was.sv_type(), was.head.size, was.head.blessed);
        if was_blessed.is_null() {
            self.stats.drop_type(was_ty, was_size);
        } else {
            let bucket = self.blessed_bucket(was_ty, was_blessed);
            self.stats.drop_blessed(&bucket, was_size);
        }

        let (ty, size, blessed) = (now.sv_type(), now.head.size, now.head.blessed);
        if blessed.is_null() {
            self.stats.bump_type(ty, size);
        } else {
            let bucket = self.blessed_bucket(ty, blessed);
            self.stats.bump_blessed(bucket, size);
        }
        self.svs.insert(addr, now);
        Ok(())
    }

    /// Close out the decode: discard unresolved blessed references, then
    /// reclassify scratchpad arrays.
    pub fn finish(&mut self) {
        if !self.blessed_pending.is_empty() {
            let total: u64 = self
                .blessed_pending
                .values()
                .map(|v| v.len() as u64)
                .sum();
            error!(
                "{total} objects never resolved their blessed stash pointer"
            );
            self.stats.dangling_blessed += total;
            self.blessed_pending.clear();
        }
        crate::fixup::run(self);
    }

    #[cfg(test)]
    pub(crate) fn pending_blessed(&self) -> usize {
        self.blessed_pending.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sv::{ArrayBody, ScalarBody, StashBody, SvHead};
    use crate::PmatString;

    fn scalar(addr: u64, size: u64, blessed: u64) -> Sv {
        Sv {
            head: SvHead {
                address: Ptr(addr),
                refcnt: 1,
                size,
                blessed: Ptr(blessed),
            },
            body: SvBody::Scalar(ScalarBody::default()),
        }
    }

    fn stash(addr: u64, name: &str) -> Sv {
        Sv {
            head: SvHead {
                address: Ptr(addr),
                refcnt: 1,
                size: 64,
                blessed: Ptr::NULL,
            },
            body: SvBody::Stash(StashBody {
                name: PmatString::new(name.as_bytes().to_vec()),
                ..StashBody::default()
            }),
        }
    }

    #[test]
    fn plain_objects_land_in_type_buckets() {
        let mut table = ObjectTable::new();
        table.add(scalar(0x1000, 24, 0));
        table.add(scalar(0x2000, 40, 0));
        assert_eq!(table.stats().count_by_type[&SvType::Scalar], 2);
        assert_eq!(table.stats().size_by_type[&SvType::Scalar], 64);
        assert!(table.contains(Ptr(0x1000)));
        assert!(table.get(Ptr(0x3000)).is_err());
    }

    #[test]
    fn duplicate_address_keeps_first() {
        let mut table = ObjectTable::new();
        table.add(scalar(0x1000, 24, 0));
        table.add(scalar(0x1000, 99, 0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.stats().duplicate_addresses, 1);
        assert_eq!(table.stats().size_by_type[&SvType::Scalar], 24);
        assert_eq!(table.get(Ptr(0x1000)).unwrap().head.size, 24);
    }

    #[test]
    fn blessed_after_stash_resolves_immediately() {
        let mut table = ObjectTable::new();
        table.add(stash(0x2000, "Foo::Bar"));
        table.add(scalar(0x1000, 24, 0x2000));
        assert_eq!(table.stats().count_by_blessed["SCALAR(Foo::Bar)"], 1);
        assert_eq!(table.stats().size_by_blessed["SCALAR(Foo::Bar)"], 24);
        assert_eq!(table.pending_blessed(), 0);
    }

    #[test]
    fn blessed_before_stash_is_deferred_then_resolved() {
        let mut table = ObjectTable::new();
        table.add(scalar(0x1000, 24, 0x2000));
        assert_eq!(table.pending_blessed(), 1);
        assert!(table.stats().count_by_blessed.is_empty());

        table.add(stash(0x2000, "Foo::Bar"));
        assert_eq!(table.pending_blessed(), 0);
        assert_eq!(table.stats().count_by_blessed["SCALAR(Foo::Bar)"], 1);
    }

    #[test]
    fn unresolved_blessed_is_discarded_at_finish() {
        let mut table = ObjectTable::new();
        table.add(scalar(0x1000, 24, 0xDEAD));
        table.finish();
        assert_eq!(table.stats().dangling_blessed, 1);
        assert_eq!(table.pending_blessed(), 0);
    }

    #[test]
    fn replace_moves_statistics_to_the_new_tag() {
        let mut table = ObjectTable::new();
        table.add(Sv {
            head: SvHead {
                address: Ptr(0xA000),
                refcnt: 1,
                size: 128,
                blessed: Ptr::NULL,
            },
            body: SvBody::Array(ArrayBody::default()),
        });
        table
            .replace(Sv {
                head: SvHead {
                    address: Ptr(0xA000),
                    refcnt: 1,
                    size: 128,
                    blessed: Ptr::NULL,
                },
                body: SvBody::Padlist(ArrayBody::default()),
            })
            .unwrap();
        assert!(!table.stats().count_by_type.contains_key(&SvType::Array));
        assert_eq!(table.stats().count_by_type[&SvType::Padlist], 1);
        assert_eq!(table.stats().size_by_type[&SvType::Padlist], 128);
        assert_eq!(
            table.get(Ptr(0xA000)).unwrap().sv_type(),
            SvType::Padlist
        );
    }
}

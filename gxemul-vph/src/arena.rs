//! The per-CPU translation cache: a bump-allocated arena of [`Physpage`]
//! records, addressed by [`PhyspageId`] rather than raw pointers so that
//! a full-cache reset can never leave a dangling reference anywhere else
//! in the system (see the design notes on arena/VPH interaction).

use crate::ic::InstrCall;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::debug;

bitflags! {
    /// Bits recorded on a [`Physpage`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PhyspageFlags: u8 {
        /// At least one `ic` on this page has been filled in by the decoder.
        const TRANSLATIONS  = 1 << 0;
        /// At least one combination of adjacent instructions has been fused.
        const COMBINATIONS  = 1 << 1;
    }
}

/// An index into the arena's page vector. Only meaningful together with
/// the [`PhyspageRef`] generation it was handed out with — the vector is
/// cleared wholesale on reset, so a bare index can silently refer to an
/// unrelated page after that happens.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PhyspageId(u32);

/// A weak, generation-checked reference to a [`Physpage`]. This is what
/// VPH entries hold instead of a pointer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PhyspageRef {
    id: PhyspageId,
    generation: u32,
}

/// One physical page's translation record: the guest physical address it
/// was built for, the hash-chain link, and its `ic` array (the
/// instruction slots plus the trailing sentinel slots).
pub struct Physpage<Cpu> {
    pub physaddr: u64,
    next: Option<PhyspageId>,
    pub flags: PhyspageFlags,
    pub ics: Vec<InstrCall<Cpu>>,
}

impl<Cpu> Physpage<Cpu> {
    pub fn ic(&self, index: usize) -> &InstrCall<Cpu> {
        &self.ics[index]
    }
}

/// Per-CPU arena of [`Physpage`]s, indexed by a fixed-size open-addressed
/// base table keyed on a hash of the physical page number.
pub struct TranslationCache<Cpu> {
    capacity_bytes: usize,
    used_bytes: usize,
    margin_bytes: usize,
    generation: u32,
    pages: Vec<Physpage<Cpu>>,
    base_table: Vec<Option<PhyspageId>>,
    base_mask: u64,
    page_shift: u32,
    ics_per_page: usize,
    default_ic: InstrCall<Cpu>,
    sentinels: Vec<InstrCall<Cpu>>,
}

impl<Cpu> TranslationCache<Cpu> {
    /// `capacity_mb` sizes the arena; `base_table_bits` sizes the hash
    /// table (rounded to a power of two); `page_shift` is the guest page
    /// size in bits; `ics_per_page` is `ICS_PER_PAGE` for this ISA;
    /// `default_ic` is the `to_be_translated` handler every fresh slot
    /// starts as; `sentinels` are the trailing `end_of_page` (and, for
    /// delay-slot ISAs, `end_of_page2`) handlers appended after the
    /// translatable slots.
    pub fn new(
        capacity_mb: usize,
        base_table_bits: u32,
        page_shift: u32,
        ics_per_page: usize,
        default_ic: InstrCall<Cpu>,
        sentinels: Vec<InstrCall<Cpu>>,
    ) -> Self {
        let base_len = 1usize << base_table_bits;
        let capacity_bytes = capacity_mb * 1024 * 1024;
        let margin_bytes = Self::page_cost(ics_per_page, sentinels.len()) * 4;
        Self {
            capacity_bytes,
            used_bytes: 0,
            margin_bytes,
            generation: 0,
            pages: Vec::new(),
            base_table: alloc::vec![None; base_len],
            base_mask: (base_len as u64) - 1,
            page_shift,
            ics_per_page,
            default_ic,
            sentinels,
        }
    }

    fn page_cost(ics_per_page: usize, sentinel_count: usize) -> usize {
        (ics_per_page + sentinel_count) * core::mem::size_of::<InstrCall<Cpu>>()
            + core::mem::size_of::<u64>() * 2
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Resolves a weak reference, returning `None` if the arena has been
    /// reset since it was handed out.
    pub fn resolve(&self, r: PhyspageRef) -> Option<PhyspageId> {
        if r.generation == self.generation {
            Some(r.id)
        } else {
            None
        }
    }

    pub fn get(&self, id: PhyspageId) -> &Physpage<Cpu> {
        &self.pages[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PhyspageId) -> &mut Physpage<Cpu> {
        &mut self.pages[id.0 as usize]
    }

    fn bucket(&self, physaddr: u64) -> usize {
        ((physaddr >> self.page_shift) & self.base_mask) as usize
    }

    /// Walks the hash chain for `physaddr`, returning an existing page if
    /// present.
    pub fn lookup(&self, physaddr: u64) -> Option<PhyspageRef> {
        let mut cursor = self.base_table[self.bucket(physaddr)];
        while let Some(id) = cursor {
            let page = &self.pages[id.0 as usize];
            if page.physaddr == physaddr {
                return Some(PhyspageRef {
                    id,
                    generation: self.generation,
                });
            }
            cursor = page.next;
        }
        None
    }

    /// Finds the page translating `physaddr`, creating (and
    /// bump-allocating) it if it does not exist yet. Resets the whole
    /// arena first if the new page would not fit within the configured
    /// margin.
    pub fn find_or_create(&mut self, physaddr: u64) -> PhyspageRef {
        if let Some(existing) = self.lookup(physaddr) {
            return existing;
        }

        let cost = Self::page_cost(self.ics_per_page, self.sentinels.len());
        if self.used_bytes + cost + self.margin_bytes > self.capacity_bytes {
            self.reset();
        }

        let mut ics = alloc::vec![self.default_ic; self.ics_per_page];
        ics.extend_from_slice(&self.sentinels);

        let bucket = self.bucket(physaddr);
        let id = PhyspageId(self.pages.len() as u32);
        self.pages.push(Physpage {
            physaddr,
            next: self.base_table[bucket],
            flags: PhyspageFlags::empty(),
            ics,
        });
        self.base_table[bucket] = Some(id);
        self.used_bytes += cost;

        PhyspageRef {
            id,
            generation: self.generation,
        }
    }

    /// Discards every translation: all base-table buckets and all pages
    /// are dropped and the bump pointer restarts from zero. Bumps the
    /// generation so outstanding [`PhyspageRef`]s held by VPH entries
    /// resolve to `None` instead of aliasing an unrelated page.
    pub fn reset(&mut self) {
        debug!(
            "translation cache exhausted ({} bytes used), resetting",
            self.used_bytes
        );
        self.pages.clear();
        for slot in self.base_table.iter_mut() {
            *slot = None;
        }
        self.used_bytes = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Resets every `ic` on the page back to `to_be_translated` and
    /// clears its flags, in place — the "reset instructions" alternative
    /// to unlinking for code invalidation. The page stays reachable by
    /// its old physical address (so a subsequent PC->pointers lookup
    /// finds it again and lazily retranslates it).
    pub fn invalidate_page(&mut self, id: PhyspageId) {
        let page = &mut self.pages[id.0 as usize];
        for slot in page.ics.iter_mut().take(self.ics_per_page) {
            *slot = self.default_ic;
        }
        page.flags = PhyspageFlags::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut (), _: &InstrCall<()>) {}

    fn cache(capacity_mb: usize) -> TranslationCache<()> {
        TranslationCache::new(
            capacity_mb,
            4, // 16 buckets
            12,
            4, // tiny page for exhaustion tests
            InstrCall::new(noop, [0; 3]),
            alloc::vec![InstrCall::new(noop, [0; 3])],
        )
    }

    #[test]
    fn same_physaddr_returns_same_page() {
        let mut c = cache(4);
        let a = c.find_or_create(0x1000);
        let b = c.find_or_create(0x1000);
        assert_eq!(c.resolve(a), c.resolve(b));
    }

    #[test]
    fn different_physaddr_same_bucket_chains() {
        let mut c = cache(4);
        let a = c.find_or_create(0x1000);
        let b = c.find_or_create(0x1000 + (16 << 12)); // same bucket, different page
        assert_ne!(c.resolve(a), c.resolve(b));
    }

    #[test]
    fn exhaustion_triggers_exactly_one_reset_and_then_succeeds() {
        let mut c = cache(0); // capacity 0 forces a reset on first allocation that exceeds margin
        let gen0 = c.generation();
        let r = c.find_or_create(0x4000);
        assert_eq!(c.generation(), gen0 + 1);
        assert!(c.resolve(r).is_some());
        // A second translation after the reset must complete fine too.
        let r2 = c.find_or_create(0x5000);
        assert!(c.resolve(r2).is_some());
    }

    #[test]
    fn stale_ref_after_reset_resolves_to_none() {
        let mut c = cache(4);
        let stale = c.find_or_create(0x1000);
        c.reset();
        assert!(c.resolve(stale).is_none());
    }

    #[test]
    fn invalidate_page_resets_every_translatable_slot() {
        fn marker(_: &mut (), _: &InstrCall<()>) {}
        let mut c = cache(4);
        let r = c.find_or_create(0x9000);
        let id = c.resolve(r).unwrap();
        c.get_mut(id).ics[0] = InstrCall::new(marker, [7; 3]);
        c.get_mut(id).flags = PhyspageFlags::TRANSLATIONS;
        c.invalidate_page(id);
        assert_eq!(c.get(id).ics[0].arg, [0; 3]);
        assert!(c.get(id).flags.is_empty());
    }
}

//! The 64-bit VPH table: a 3-level radix tree of [`VphEntry`] leaves,
//! built lazily so that a sparse 64-bit guest address space does not cost
//! a `2^52`-entry array up front. Each level indexes `LEVEL_BITS` bits of
//! `vaddr_page`; the leaf array width matches [`crate::vph32::Vph32`]'s
//! direct entries so the two variants share exactly the same per-entry
//! contract.
//!
//! Covers guest address spaces up to `page_shift + 3 * LEVEL_BITS` bits,
//! which comfortably spans the 40-to-44-bit physical/virtual ranges real
//! 64-bit CPU families in this emulator's scope actually use; wider
//! spaces would need a fourth level.

use crate::phystrans::PhysTranslationBitmap;
use crate::tlb::{TlbArray, TlbHalf, UpdateKind};
use crate::{Invalidate, PhyspageRef};
use alloc::boxed::Box;
use alloc::vec::Vec;

const LEVEL_BITS: u32 = 10;
const LEVEL_LEN: usize = 1 << LEVEL_BITS;
const LEVEL_MASK: u64 = (LEVEL_LEN as u64) - 1;

#[derive(Clone, Copy)]
struct VphEntry {
    present: bool,
    writable: bool,
    paddr_page: u64,
    phys_page: Option<PhyspageRef>,
    tlb_slot: Option<usize>,
}

impl Default for VphEntry {
    fn default() -> Self {
        Self {
            present: false,
            writable: false,
            paddr_page: 0,
            phys_page: None,
            tlb_slot: None,
        }
    }
}

impl VphEntry {
    fn is_empty(&self) -> bool {
        !self.present && self.phys_page.is_none()
    }
}

struct Leaf {
    entries: Vec<VphEntry>,
    live: usize,
}

impl Leaf {
    fn new() -> Self {
        Self {
            entries: alloc::vec![VphEntry::default(); LEVEL_LEN],
            live: 0,
        }
    }
}

struct Mid {
    leaves: Vec<Option<Box<Leaf>>>,
    live: usize,
}

impl Mid {
    fn new() -> Self {
        Self {
            leaves: (0..LEVEL_LEN).map(|_| None).collect(),
            live: 0,
        }
    }
}

/// 3-level radix VPH table for 64-bit guest address spaces.
pub struct Vph64 {
    page_shift: u32,
    top: Vec<Option<Box<Mid>>>,
    tlb: TlbArray,
    phys_translated: PhysTranslationBitmap,
}

struct Indices {
    l1: usize,
    l2: usize,
    l3: usize,
}

impl Vph64 {
    pub fn new(page_shift: u32, tlb_capacity_per_half: usize, max_physical_pages: u64) -> Self {
        Self {
            page_shift,
            top: (0..LEVEL_LEN).map(|_| None).collect(),
            tlb: TlbArray::new(tlb_capacity_per_half * 2),
            phys_translated: PhysTranslationBitmap::new(max_physical_pages, page_shift),
        }
    }

    fn split(&self, vaddr_page: u64) -> Indices {
        let page_nr = vaddr_page >> self.page_shift;
        Indices {
            l1: ((page_nr >> (2 * LEVEL_BITS)) & LEVEL_MASK) as usize,
            l2: ((page_nr >> LEVEL_BITS) & LEVEL_MASK) as usize,
            l3: (page_nr & LEVEL_MASK) as usize,
        }
    }

    fn page_mask(&self) -> u64 {
        (1u64 << self.page_shift) - 1
    }

    fn get(&self, vaddr_page: u64) -> Option<&VphEntry> {
        let idx = self.split(vaddr_page);
        let mid = self.top[idx.l1].as_deref()?;
        let leaf = mid.leaves[idx.l2].as_deref()?;
        Some(&leaf.entries[idx.l3])
    }

    fn get_or_insert_mut(&mut self, vaddr_page: u64) -> &mut VphEntry {
        let idx = self.split(vaddr_page);
        let mid = self.top[idx.l1].get_or_insert_with(|| Box::new(Mid::new()));
        let leaf = mid.leaves[idx.l2].get_or_insert_with(|| {
            mid.live += 1;
            Box::new(Leaf::new())
        });
        &mut leaf.entries[idx.l3]
    }

    /// Drops a leaf/mid once it becomes entirely empty, so long-lived
    /// sparse guests don't retain pages they touched once and invalidated.
    fn prune_if_empty(&mut self, vaddr_page: u64) {
        let idx = self.split(vaddr_page);
        if let Some(mid) = self.top[idx.l1].as_mut() {
            if let Some(leaf) = mid.leaves[idx.l2].as_ref() {
                if leaf.live == 0 {
                    mid.leaves[idx.l2] = None;
                    mid.live -= 1;
                }
            }
            if mid.live == 0 {
                self.top[idx.l1] = None;
            }
        }
    }

    pub fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64> {
        let entry = self.get(vaddr)?;
        if entry.present && (!write || entry.writable) {
            Some(entry.paddr_page | (vaddr & self.page_mask()))
        } else {
            None
        }
    }

    pub fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef> {
        self.get(vaddr).and_then(|e| e.phys_page)
    }

    pub fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64) {
        self.phys_translated.set(paddr_page);
        let idx = self.split(vaddr_page);
        let was_empty;
        {
            let entry = self.get_or_insert_mut(vaddr_page);
            was_empty = entry.is_empty();
            entry.phys_page = Some(r);
        }
        if was_empty {
            if let Some(mid) = self.top[idx.l1].as_mut() {
                if let Some(leaf) = mid.leaves[idx.l2].as_mut() {
                    leaf.live += 1;
                }
            }
        }
    }

    pub fn has_translation(&self, paddr_page: u64) -> bool {
        self.phys_translated.is_set(paddr_page)
    }

    pub fn clear_translated(&mut self, paddr_page: u64) {
        self.phys_translated.clear(paddr_page);
    }

    pub fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    ) {
        let existing_slot = self.get(vaddr_page).and_then(|e| e.tlb_slot);
        if let Some(slot_idx) = existing_slot {
            if self.tlb.slot(slot_idx).valid && self.tlb.slot(slot_idx).vaddr_page == vaddr_page {
                let slot = self.tlb.slot_mut(slot_idx);
                slot.paddr_page = paddr_page;
                slot.writable = if kind == UpdateKind::Downgrade {
                    false
                } else {
                    kind.is_writable()
                };
                let writable = slot.writable;
                let entry = self.get_or_insert_mut(vaddr_page);
                entry.present = true;
                entry.writable = writable;
                entry.paddr_page = paddr_page;
                return;
            }
        }

        let victim = self.tlb.oldest(half);
        if self.tlb.slot(victim).valid {
            let evicted_vaddr_page = self.tlb.slot(victim).vaddr_page;
            self.clear_entry(evicted_vaddr_page);
        }

        let ts = self.tlb.next_timestamp();
        *self.tlb.slot_mut(victim) = crate::tlb::TlbSlot {
            valid: true,
            writable: kind.is_writable(),
            timestamp: ts,
            vaddr_page,
            paddr_page,
        };

        let was_empty;
        {
            let entry = self.get_or_insert_mut(vaddr_page);
            was_empty = entry.is_empty();
            *entry = VphEntry {
                present: true,
                writable: kind.is_writable(),
                paddr_page,
                phys_page: None,
                tlb_slot: Some(victim),
            };
        }
        if was_empty {
            let idx = self.split(vaddr_page);
            if let Some(mid) = self.top[idx.l1].as_mut() {
                if let Some(leaf) = mid.leaves[idx.l2].as_mut() {
                    leaf.live += 1;
                }
            }
        }
    }

    fn clear_entry(&mut self, vaddr_page: u64) {
        let idx = self.split(vaddr_page);
        let mut became_empty = false;
        if let Some(mid) = self.top[idx.l1].as_mut() {
            if let Some(leaf) = mid.leaves[idx.l2].as_mut() {
                if !leaf.entries[idx.l3].is_empty() {
                    leaf.entries[idx.l3] = VphEntry::default();
                    leaf.live -= 1;
                    became_empty = leaf.live == 0;
                }
            }
        }
        if became_empty {
            self.prune_if_empty(vaddr_page);
        }
    }

    pub fn invalidate(&mut self, inv: Invalidate) {
        match inv {
            Invalidate::Vaddr(vaddr) => {
                if let Some(slot_idx) = self.get(vaddr).and_then(|e| e.tlb_slot) {
                    self.tlb.slot_mut(slot_idx).valid = false;
                }
                self.clear_entry(vaddr);
            }
            Invalidate::Paddr {
                paddr_page,
                just_mark_as_non_writable,
            } => {
                let matches: Vec<(usize, u64)> = self
                    .tlb
                    .iter_valid()
                    .filter(|(_, slot)| slot.paddr_page == paddr_page)
                    .map(|(i, slot)| (i, slot.vaddr_page))
                    .collect();
                for (slot_idx, vaddr_page) in matches {
                    if just_mark_as_non_writable {
                        self.tlb.slot_mut(slot_idx).writable = false;
                        if let Some(entry) = self.entry_mut(vaddr_page) {
                            entry.writable = false;
                        }
                    } else {
                        self.tlb.slot_mut(slot_idx).valid = false;
                        self.clear_entry(vaddr_page);
                    }
                }
            }
            Invalidate::All => {
                self.tlb.invalidate_all();
                self.top = (0..LEVEL_LEN).map(|_| None).collect();
            }
            Invalidate::VaddrUpper4(vaddr) => {
                // The radix split discards bits above the covered window, so
                // matching is done against materialized TLB entries rather
                // than by computing a bucket index directly.
                let top4 = (vaddr >> 60) & 0xF;
                let matches: Vec<u64> = self
                    .tlb
                    .iter_valid()
                    .filter(|(_, slot)| (slot.vaddr_page >> 60) & 0xF == top4)
                    .map(|(_, slot)| slot.vaddr_page)
                    .collect();
                for vaddr_page in matches {
                    self.clear_entry(vaddr_page);
                }
                self.tlb.invalidate_all();
            }
        }
    }

    fn entry_mut(&mut self, vaddr_page: u64) -> Option<&mut VphEntry> {
        let idx = self.split(vaddr_page);
        let mid = self.top[idx.l1].as_mut()?;
        let leaf = mid.leaves[idx.l2].as_mut()?;
        Some(&mut leaf.entries[idx.l3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vph() -> Vph64 {
        Vph64::new(12, 4, 1024)
    }

    #[test]
    fn update_then_lookup_data_hits_across_levels() {
        let mut v = vph();
        let vaddr = 0x0000_1234_5678_9000u64;
        v.update_translation_table(vaddr, 0x9000, UpdateKind::Write, TlbHalf::Data);
        assert_eq!(v.lookup_data(vaddr | 4, false), Some(0x9004));
    }

    #[test]
    fn unmaterialized_path_reports_no_mapping() {
        let v = vph();
        assert_eq!(v.lookup_data(0x1234_5678_9000, false), None);
    }

    #[test]
    fn invalidate_vaddr_prunes_empty_leaf() {
        let mut v = vph();
        let vaddr = 0x2000;
        v.update_translation_table(vaddr, 0xB000, UpdateKind::Write, TlbHalf::Data);
        v.invalidate(Invalidate::Vaddr(vaddr));
        assert_eq!(v.lookup_data(vaddr, false), None);
        let idx = v.split(vaddr);
        assert!(v.top[idx.l1].is_none());
    }

    #[test]
    fn invalidate_all_drops_whole_tree() {
        let mut v = vph();
        v.update_translation_table(0x3000, 0xC000, UpdateKind::Write, TlbHalf::Data);
        v.invalidate(Invalidate::All);
        assert_eq!(v.lookup_data(0x3000, false), None);
    }
}

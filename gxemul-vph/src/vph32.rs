//! The 32-bit VPH table: one flat array of [`VphEntry`], indexed directly
//! by `vaddr_page`. This is the fast path — array index, no tree walk, no
//! device scan.
//!
//! Where the original keeps a raw host pointer per entry, an entry here
//! keeps `paddr_page` plus a weak [`PhyspageRef`]: "fast path" means
//! skip-translation-and-skip-device-scan, not raw-pointer dereference.
//! `memory_rw` still turns `paddr_page | (vaddr & PAGE_MASK)` into bytes
//! through `gxemul-memory`, same as the slow path — it is just not asked
//! to re-walk the page tables first.

use crate::phystrans::PhysTranslationBitmap;
use crate::tlb::{TlbArray, TlbHalf, UpdateKind};
use crate::{Invalidate, PhyspageRef};
use alloc::vec::Vec;

#[derive(Clone, Copy)]
struct VphEntry {
    present: bool,
    writable: bool,
    paddr_page: u64,
    phys_page: Option<PhyspageRef>,
    tlb_slot: Option<(TlbHalf, usize)>,
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

/// Direct-array VPH table for 32-bit guest address spaces: `2^(32 -
/// page_shift)` entries, each four machine words wide.
pub struct Vph32 {
    page_shift: u32,
    entries: Vec<VphEntry>,
    tlb: TlbArray,
    phys_translated: PhysTranslationBitmap,
}

impl Vph32 {
    pub fn new(page_shift: u32, tlb_capacity_per_half: usize, max_physical_pages: u64) -> Self {
        let entry_count = 1usize << (32 - page_shift);
        Self {
            page_shift,
            entries: alloc::vec![VphEntry::default(); entry_count],
            tlb: TlbArray::new(tlb_capacity_per_half * 2),
            phys_translated: PhysTranslationBitmap::new(max_physical_pages, page_shift),
        }
    }

    fn index(&self, vaddr: u64) -> usize {
        ((vaddr as u32) >> self.page_shift) as usize
    }

    fn page_mask(&self) -> u64 {
        (1u64 << self.page_shift) - 1
    }

    /// Fast-path lookup for a load/store: `Some(paddr)` if `vaddr` has a
    /// live entry permitting the requested access, `None` to fall back to
    /// the slow (full MMU) translation path.
    pub fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64> {
        let entry = &self.entries[self.index(vaddr)];
        if entry.present && (!write || entry.writable) {
            Some(entry.paddr_page | (vaddr & self.page_mask()))
        } else {
            None
        }
    }

    /// Fast-path lookup for PC->pointers: the cached [`PhyspageRef`] for
    /// the page containing `vaddr`, if any.
    pub fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef> {
        self.entries[self.index(vaddr)].phys_page
    }

    pub fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64) {
        let idx = self.index(vaddr_page);
        self.phys_translated.set(paddr_page);
        let entry = &mut self.entries[idx];
        entry.phys_page = Some(r);
    }

    pub fn has_translation(&self, paddr_page: u64) -> bool {
        self.phys_translated.is_set(paddr_page)
    }

    pub fn clear_translated(&mut self, paddr_page: u64) {
        self.phys_translated.clear(paddr_page);
    }

    /// Installs or refreshes a mapping. If `vaddr_page` already owns a
    /// live TLB slot, that slot (and the VPH entry) is refreshed in
    /// place; otherwise the oldest slot in the relevant half is evicted,
    /// its previous VPH entry (if any) invalidated, and the new mapping
    /// installed.
    pub fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    ) {
        let idx = self.index(vaddr_page);

        if let Some((_, slot_idx)) = self.entries[idx].tlb_slot {
            if self.tlb.slot(slot_idx).valid && self.tlb.slot(slot_idx).vaddr_page == vaddr_page {
                let slot = self.tlb.slot_mut(slot_idx);
                slot.paddr_page = paddr_page;
                slot.writable = if kind == UpdateKind::Downgrade {
                    false
                } else {
                    kind.is_writable()
                };
                let writable = slot.writable;
                let entry = &mut self.entries[idx];
                entry.present = true;
                entry.writable = writable;
                entry.paddr_page = paddr_page;
                return;
            }
        }

        let victim = self.tlb.oldest(half);
        if self.tlb.slot(victim).valid {
            let evicted_vaddr_page = self.tlb.slot(victim).vaddr_page;
            let evicted_idx = self.index(evicted_vaddr_page);
            self.entries[evicted_idx] = VphEntry::default();
        }

        let ts = self.tlb.next_timestamp();
        *self.tlb.slot_mut(victim) = crate::tlb::TlbSlot {
            valid: true,
            writable: kind.is_writable(),
            timestamp: ts,
            vaddr_page,
            paddr_page,
        };

        self.entries[idx] = VphEntry {
            present: true,
            writable: kind.is_writable(),
            paddr_page,
            phys_page: None,
            tlb_slot: Some((half, victim)),
        };
    }

    pub fn invalidate(&mut self, inv: Invalidate) {
        match inv {
            Invalidate::Vaddr(vaddr) => {
                let idx = self.index(vaddr);
                if let Some((_, slot_idx)) = self.entries[idx].tlb_slot {
                    self.tlb.slot_mut(slot_idx).valid = false;
                }
                self.entries[idx] = VphEntry::default();
            }
            Invalidate::Paddr {
                paddr_page,
                just_mark_as_non_writable,
            } => {
                self.invalidate_paddr(paddr_page, just_mark_as_non_writable);
            }
            Invalidate::All => {
                self.tlb.invalidate_all();
                for entry in self.entries.iter_mut() {
                    *entry = VphEntry::default();
                }
            }
            Invalidate::VaddrUpper4(vaddr) => {
                let top4 = (vaddr as u32) & 0xF000_0000;
                for (page_nr, entry) in self.entries.iter_mut().enumerate() {
                    let entry_vaddr = (page_nr as u32) << self.page_shift;
                    if entry_vaddr & 0xF000_0000 == top4 {
                        *entry = VphEntry::default();
                    }
                }
                self.tlb.invalidate_all();
            }
        }
    }

    fn invalidate_paddr(&mut self, paddr_page: u64, just_mark_as_non_writable: bool) {
        let matches: Vec<(usize, u64)> = self
            .tlb
            .iter_valid()
            .filter(|(_, slot)| slot.paddr_page == paddr_page)
            .map(|(i, slot)| (i, slot.vaddr_page))
            .collect();

        for (slot_idx, vaddr_page) in matches {
            let entry_idx = self.index(vaddr_page);
            if just_mark_as_non_writable {
                self.tlb.slot_mut(slot_idx).writable = false;
                self.entries[entry_idx].writable = false;
            } else {
                self.tlb.slot_mut(slot_idx).valid = false;
                self.entries[entry_idx] = VphEntry::default();
            }
        }
    }
}

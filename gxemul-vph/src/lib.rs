//! VPH (Virtual-Physical-Host) address translation and the per-CPU
//! instruction-call translation cache.
//!
//! This crate owns the two caches a dyntrans CPU consults before falling
//! back to a full MMU walk or decode: the [`Vph32`]/[`Vph64`] tables
//! mapping guest virtual pages to physical pages, and the
//! [`TranslationCache`] arena mapping physical pages to pre-decoded
//! [`InstrCall`] sequences. Neither knows anything about CPU semantics —
//! that lives one layer up, in `gxemul-cpu`.

#![no_std]

extern crate alloc;

mod arena;
mod ic;
mod phystrans;
mod tlb;
mod vph32;
mod vph64;

pub use arena::{Physpage, PhyspageFlags, PhyspageId, PhyspageRef, TranslationCache};
pub use ic::{HandlerFn, InstrCall};
pub use phystrans::PhysTranslationBitmap;
pub use tlb::{TlbArray, TlbHalf, TlbSlot, UpdateKind};
pub use vph32::Vph32;
pub use vph64::Vph64;

/// The operations a dyntrans CPU needs from either VPH variant, so the
/// dispatch loop in `gxemul-cpu` can stay generic over guest address
/// width instead of duplicating itself for [`Vph32`] and [`Vph64`].
pub trait VphTable {
    fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64>;
    fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef>;
    fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64);
    fn has_translation(&self, paddr_page: u64) -> bool;
    fn clear_translated(&mut self, paddr_page: u64);
    fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    );
    fn invalidate(&mut self, inv: Invalidate);
}

impl VphTable for Vph32 {
    fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64> {
        Vph32::lookup_data(self, vaddr, write)
    }
    fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef> {
        Vph32::lookup_code(self, vaddr)
    }
    fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64) {
        Vph32::set_code(self, vaddr_page, r, paddr_page)
    }
    fn has_translation(&self, paddr_page: u64) -> bool {
        Vph32::has_translation(self, paddr_page)
    }
    fn clear_translated(&mut self, paddr_page: u64) {
        Vph32::clear_translated(self, paddr_page)
    }
    fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    ) {
        Vph32::update_translation_table(self, vaddr_page, paddr_page, kind, half)
    }
    fn invalidate(&mut self, inv: Invalidate) {
        Vph32::invalidate(self, inv)
    }
}

impl VphTable for Vph64 {
    fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64> {
        Vph64::lookup_data(self, vaddr, write)
    }
    fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef> {
        Vph64::lookup_code(self, vaddr)
    }
    fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64) {
        Vph64::set_code(self, vaddr_page, r, paddr_page)
    }
    fn has_translation(&self, paddr_page: u64) -> bool {
        Vph64::has_translation(self, paddr_page)
    }
    fn clear_translated(&mut self, paddr_page: u64) {
        Vph64::clear_translated(self, paddr_page)
    }
    fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    ) {
        Vph64::update_translation_table(self, vaddr_page, paddr_page, kind, half)
    }
    fn invalidate(&mut self, inv: Invalidate) {
        Vph64::invalidate(self, inv)
    }
}

/// What an `invalidate_translation_caches` call should drop. Mirrors the
/// four invalidation shapes a dyntrans CPU needs: a single virtual page
/// (a TLB entry was overwritten), a single physical page (the guest
/// wrote through a second virtual alias, or a device remapped it), every
/// mapping (an ASID/context switch or a full TLB flush instruction), or
/// every mapping whose virtual address shares the top 4 bits with the
/// given one (a MIPS-style segment/kernel-mode transition).
#[derive(Clone, Copy, Debug)]
pub enum Invalidate {
    Vaddr(u64),
    Paddr {
        paddr_page: u64,
        just_mark_as_non_writable: bool,
    },
    All,
    VaddrUpper4(u64),
}

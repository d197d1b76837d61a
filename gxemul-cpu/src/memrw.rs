//! The generic `memory_rw` / `translate_address` contract (§4.5), shared
//! by every ISA instead of reimplemented per family. ISA cores only
//! supply the actual guest MMU/segment decode via [`Isa::translate`];
//! everything about page-boundary decomposition, the VPH fast path, and
//! code-invalidation-on-write is handled once, here.
//!
//! Every method here takes only `&mut self`, reaching `Memory` through
//! `self.mem` rather than a separate parameter: `ic` handlers are called
//! as `fn(&mut Cpu, &InstrCall<Cpu>)` with no room for an extra argument,
//! so load/store handlers need the same path `run_instr` uses.

use crate::cpu::CpuState;
use crate::isa::{ExceptionKind, Isa};
use gxemul_memory::AccessFlags;
use gxemul_vph::{Invalidate, TlbHalf, UpdateKind, VphTable};

/// Returned by [`Isa::translate`]: the guest's own MMU/segment decode,
/// consulted only on a VPH miss.
pub struct Translated {
    pub paddr_page: u64,
    pub writable: bool,
}

impl<I: Isa> CpuState<I> {
    fn page_mask(&self) -> u64 {
        (1u64 << I::PAGE_SHIFT) - 1
    }

    /// vaddr -> paddr, consulting the VPH fast path first and falling
    /// back to the ISA's own MMU decode (installing the result into VPH
    /// on success) otherwise. `Err(())` means an exception has already
    /// been delivered (unless `flags` carried `NO_EXCEPTIONS`, in which
    /// case nothing was delivered and the caller is a probe).
    pub fn translate_address(&mut self, vaddr: u64, flags: AccessFlags) -> Result<u64, ()> {
        let write = flags.is_write();
        if let Some(paddr) = self.vph.lookup_data(vaddr, write) {
            return Ok(paddr);
        }

        match I::translate(self, vaddr, flags) {
            Ok(t) => {
                let vaddr_page = vaddr & !self.page_mask();
                let half = if flags.contains(AccessFlags::INSTRUCTION) {
                    TlbHalf::Code
                } else {
                    TlbHalf::Data
                };
                let kind = if write {
                    UpdateKind::Write
                } else {
                    UpdateKind::Read
                };
                self.vph
                    .update_translation_table(vaddr_page, t.paddr_page, kind, half);
                Ok(t.paddr_page | (vaddr & self.page_mask()))
            }
            Err(kind) => {
                if !flags.contains(AccessFlags::NO_EXCEPTIONS) {
                    self.fault_vaddr = vaddr;
                    I::exception(self, kind);
                }
                Err(())
            }
        }
    }

    /// The full `memory_rw` contract: physical passthrough, single-access
    /// fast path, or byte-by-byte decomposition (with a write-probe pass
    /// first) when the access straddles a page boundary.
    pub fn memory_rw(&mut self, vaddr: u64, buf: &mut [u8], flags: AccessFlags) -> Result<(), ()> {
        if buf.is_empty() {
            return Ok(());
        }

        if flags.contains(AccessFlags::PHYSICAL) {
            return self.physical_access(vaddr, buf, flags);
        }

        let start_page = vaddr & !self.page_mask();
        let end_page = (vaddr + buf.len() as u64 - 1) & !self.page_mask();
        if start_page == end_page {
            let paddr = self.translate_address(vaddr, flags)?;
            return self.physical_access(paddr, buf, flags);
        }

        if flags.is_write() {
            // Probe every byte before committing any store, so a fault
            // partway through a cross-page write never leaves a partial
            // store behind.
            for i in 0..buf.len() as u64 {
                if self
                    .translate_address(vaddr + i, flags | AccessFlags::NO_EXCEPTIONS)
                    .is_err()
                {
                    if !flags.contains(AccessFlags::NO_EXCEPTIONS) {
                        self.fault_vaddr = vaddr + i;
                        I::exception(self, ExceptionKind::AddressError { write: true });
                    }
                    return Err(());
                }
            }
        }

        for (i, byte) in buf.iter_mut().enumerate() {
            let a = vaddr + i as u64;
            let paddr = self.translate_address(a, flags)?;
            let mut one = [*byte];
            self.physical_access(paddr, &mut one, flags)?;
            *byte = one[0];
        }
        Ok(())
    }

    fn physical_access(&mut self, paddr: u64, buf: &mut [u8], flags: AccessFlags) -> Result<(), ()> {
        let mem = self.mem.clone();
        let result = mem.borrow_mut().access_physical(paddr, buf, flags);
        match result {
            Ok(_) => {
                if flags.is_write() {
                    self.invalidate_code_translation(paddr);
                }
                Ok(())
            }
            Err(_) => {
                if !flags.contains(AccessFlags::NO_EXCEPTIONS) {
                    self.fault_vaddr = paddr;
                    I::exception(self, ExceptionKind::BusError);
                }
                Err(())
            }
        }
    }

    /// §4.5 "Code invalidation": if `paddr` falls on a page that has ever
    /// produced a translation, drop that translation (reset every `ic`
    /// back to `to_be_translated`, the simpler of the two sanctioned
    /// alternatives to unlinking), clear the `phystranslation` bit, and
    /// drop every VPH/TLB entry mapping to that physical page.
    pub fn invalidate_code_translation(&mut self, paddr: u64) {
        let paddr_page = paddr & !self.page_mask();
        if !self.vph.has_translation(paddr_page) {
            return;
        }
        if let Some(r) = self.cache.lookup(paddr_page) {
            if let Some(id) = self.cache.resolve(r) {
                self.cache.invalidate_page(id);
            }
        }
        self.vph.clear_translated(paddr_page);
        self.vph.invalidate(Invalidate::Paddr {
            paddr_page,
            just_mark_as_non_writable: false,
        });
    }
}

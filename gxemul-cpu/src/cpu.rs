//! The polymorphic per-CPU state record (§3 "CPU state"): everything the
//! dispatch loop, PC->pointers, and exception entry share across ISAs,
//! parameterised by the concrete [`Isa`].

use crate::delay_slot::DelayState;
use crate::isa::Isa;
use crate::tick::TickScheduler;
use alloc::rc::Rc;
use core::cell::RefCell;
use gxemul_memory::Memory;
use gxemul_vph::{
    Invalidate, PhyspageRef, TlbHalf, TranslationCache, UpdateKind, Vph32, Vph64, VphTable,
};

/// Either VPH variant, picked per machine at configuration time. A plain
/// enum rather than `Box<dyn VphTable>`: the set of variants is closed
/// (this core supports exactly two address widths) and match dispatch
/// avoids a vtable indirection on the hottest path in the system.
pub enum GuestVph {
    ThirtyTwo(Vph32),
    SixtyFour(Vph64),
}

impl VphTable for GuestVph {
    fn lookup_data(&self, vaddr: u64, write: bool) -> Option<u64> {
        match self {
            GuestVph::ThirtyTwo(v) => v.lookup_data(vaddr, write),
            GuestVph::SixtyFour(v) => v.lookup_data(vaddr, write),
        }
    }
    fn lookup_code(&self, vaddr: u64) -> Option<PhyspageRef> {
        match self {
            GuestVph::ThirtyTwo(v) => v.lookup_code(vaddr),
            GuestVph::SixtyFour(v) => v.lookup_code(vaddr),
        }
    }
    fn set_code(&mut self, vaddr_page: u64, r: PhyspageRef, paddr_page: u64) {
        match self {
            GuestVph::ThirtyTwo(v) => v.set_code(vaddr_page, r, paddr_page),
            GuestVph::SixtyFour(v) => v.set_code(vaddr_page, r, paddr_page),
        }
    }
    fn has_translation(&self, paddr_page: u64) -> bool {
        match self {
            GuestVph::ThirtyTwo(v) => v.has_translation(paddr_page),
            GuestVph::SixtyFour(v) => v.has_translation(paddr_page),
        }
    }
    fn clear_translated(&mut self, paddr_page: u64) {
        match self {
            GuestVph::ThirtyTwo(v) => v.clear_translated(paddr_page),
            GuestVph::SixtyFour(v) => v.clear_translated(paddr_page),
        }
    }
    fn update_translation_table(
        &mut self,
        vaddr_page: u64,
        paddr_page: u64,
        kind: UpdateKind,
        half: TlbHalf,
    ) {
        match self {
            GuestVph::ThirtyTwo(v) => v.update_translation_table(vaddr_page, paddr_page, kind, half),
            GuestVph::SixtyFour(v) => v.update_translation_table(vaddr_page, paddr_page, kind, half),
        }
    }
    fn invalidate(&mut self, inv: Invalidate) {
        match self {
            GuestVph::ThirtyTwo(v) => v.invalidate(inv),
            GuestVph::SixtyFour(v) => v.invalidate(inv),
        }
    }
}

/// A cursor into the translation cache: the page currently being
/// executed from, plus the slot index `next_ic` will read next. Replaces
/// the original's raw `cur_ic_page`/`next_ic` pointer pair; `page` is
/// resolved back to a `PhyspageId` through the arena's generation check
/// on every use, so a cache reset during a fault naturally invalidates
/// it instead of leaving it dangling.
#[derive(Clone, Copy)]
pub struct IcCursor {
    pub page: PhyspageRef,
    pub index: usize,
}

/// One emulated CPU. Owns its translation cache, VPH table, and tick
/// scheduler exclusively; guest `memory` is shared across every CPU in
/// the machine via `mem` below.
pub struct CpuState<I: Isa> {
    pub pc: u64,
    pub regs: I::Regs,
    pub delay: DelayState,
    pub delay_jmpaddr: u64,
    pub nullify_next: bool,
    pub interrupt_possible: bool,
    pub pc_last: u64,
    /// The virtual (or, for a purely-physical access, physical) address
    /// that caused the most recent fault. Set by `translate_address`/
    /// `memory_rw` immediately before calling [`Isa::exception`], since
    /// `ExceptionKind` itself carries no address — this is how an ISA's
    /// exception entry recovers BadVAddr.
    pub fault_vaddr: u64,
    pub n_translated_instrs: u64,
    pub running_translated: bool,
    pub halted: bool,
    pub single_step: bool,

    pub cursor: Option<IcCursor>,
    pub cache: TranslationCache<CpuState<I>>,
    pub vph: GuestVph,
    pub ticks: TickScheduler,

    /// Shared with every other CPU in the emulation and with the
    /// top-level runner. `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>`:
    /// §5 fixes scheduling as single-threaded cooperative round-robin
    /// chunking, so there is no real concurrent access to guard against,
    /// only the aliasing `ic` handlers would otherwise need raw pointers
    /// to route around.
    pub mem: Rc<RefCell<Memory>>,

    /// Index of this CPU among its siblings; used to key the shared LL/SC
    /// reservation table and as the tick-servicing "CPU 0" test in the
    /// top-level runner.
    pub cpu_id: usize,
    pub rmw: bool,
    pub rmw_addr: u64,
    pub rmw_len: u32,
}

impl<I: Isa> CpuState<I> {
    pub fn new(
        cpu_id: usize,
        vph: GuestVph,
        cache: TranslationCache<CpuState<I>>,
        mem: Rc<RefCell<Memory>>,
    ) -> Self {
        Self {
            pc: 0,
            regs: I::Regs::default(),
            delay: DelayState::NotDelayed,
            delay_jmpaddr: 0,
            nullify_next: false,
            interrupt_possible: false,
            pc_last: 0,
            fault_vaddr: 0,
            n_translated_instrs: 0,
            running_translated: true,
            halted: false,
            single_step: false,
            cursor: None,
            cache,
            vph,
            ticks: TickScheduler::new(),
            mem,
            cpu_id,
            rmw: false,
            rmw_addr: 0,
            rmw_len: 0,
        }
    }
}

//! A minimal, fully-wired `CpuState<MipsLite>` for this crate's own unit
//! tests. Not exposed outside `#[cfg(test)]` builds.

use crate::isa::MipsLite;
use alloc::rc::Rc;
use alloc::vec;
use core::cell::RefCell;
use gxemul_cpu::{end_of_page, end_of_page2, to_be_translated, CpuState, GuestVph};
use gxemul_memory::Memory;
use gxemul_vph::{InstrCall, TranslationCache, Vph32};

pub fn new_test_cpu() -> CpuState<MipsLite> {
    let mem = Rc::new(RefCell::new(Memory::new(12, 0x00, 0x1000_0000, 1, 6)));
    let vph = GuestVph::ThirtyTwo(Vph32::new(12, 8, 0x10_0000));
    let cache = TranslationCache::new(
        1,
        8,
        12,
        1024,
        InstrCall::new(to_be_translated::<MipsLite>, [0; 3]),
        vec![
            InstrCall::new(end_of_page::<MipsLite>, [0; 3]),
            InstrCall::new(end_of_page2::<MipsLite>, [0; 3]),
        ],
    );
    CpuState::new(0, vph, cache, mem)
}

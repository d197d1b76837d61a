//! A small 32-bit MIPS instruction set, plugged into `gxemul-cpu`'s
//! generic dyntrans core through [`Isa`]. Exists to exercise the core
//! end to end (decoding, delay slots, TLB misses, combination of
//! adjacent instructions) with a real, if deliberately tiny, ISA rather
//! than a synthetic test harness.

#![no_std]

extern crate alloc;

mod combine;
mod decode;
mod isa;
mod regs;

#[cfg(test)]
mod test_support;

pub use isa::{MipsLite, VEC_COMMON, VEC_TLB_REFILL};
pub use regs::{MipsRegs, TlbMapping};

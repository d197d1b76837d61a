//! The dyntrans CPU core: the per-CPU state record, the generic dispatch
//! loop, PC->pointers, `memory_rw`/`translate_address`, the delay-slot
//! state machine, and the tick scheduler.
//!
//! A concrete instruction set (MIPS, ARM, ...) implements [`Isa`] and
//! gets all of the above for free; see the bundled `mips-lite` crate for
//! a worked example.

#![no_std]

extern crate alloc;

mod cpu;
mod delay_slot;
mod dispatch;
mod error;
mod isa;
mod memrw;
mod tick;

pub use cpu::{CpuState, GuestVph, IcCursor};
pub use delay_slot::DelayState;
pub use dispatch::{end_of_page, end_of_page2, pc_to_pointers, run_instr, to_be_translated};
pub use error::{CpuError, Result};
pub use isa::{ExceptionKind, Isa};
pub use memrw::Translated;
pub use tick::{TickEntry, TickScheduler};

pub use gxemul_memory;
pub use gxemul_vph;

//! The CPU family plug (§6): the set of operations a concrete ISA (MIPS,
//! ARM, PPC, ...) must supply so that [`crate::cpu::CpuState`] can drive a
//! generic dispatch loop, PC->pointers, and exception entry without
//! knowing anything about the instruction set itself.
//!
//! Where the original groups these as a struct of function pointers
//! (`cpu_new`, `run_instr`, `memory_rw`, ...), this is a trait: `run_instr`
//! and `memory_rw` are not reimplemented per ISA since both are entirely
//! generic over [`Isa`] and live in [`crate::dispatch`] / [`crate::memrw`]
//! once instead of once per family.

use crate::cpu::CpuState;
use crate::memrw::Translated;
use gxemul_memory::AccessFlags;
use gxemul_vph::InstrCall;

/// Why an exception is being delivered. ISA cores map these onto their
/// own cause-register encoding; `Custom` covers family-specific faults
/// this core has no generic name for (e.g. a PPC decrementer underflow).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExceptionKind {
    TlbMiss { write: bool },
    AddressError { write: bool },
    BusError,
    IllegalInstruction,
    Syscall,
    Trap,
    Overflow,
    CoprocessorUnusable,
    Interrupt,
    Custom(u32),
}

/// A concrete instruction set family, generic over its own register file
/// and decode/exception semantics.
pub trait Isa: Sized {
    /// The ISA's register file and any special/coprocessor registers.
    type Regs: Default;

    /// `ICS_PER_PAGE`: translatable instruction slots per guest page.
    const ICS_PER_PAGE: usize;

    /// How many low bits of `pc` select `next_ic` within a page, i.e.
    /// `log2` of the instruction slot stride used in the §4.1 resync
    /// formula (2 for fixed 4-byte instructions).
    const ALIGNMENT_SHIFT: u32 = 2;

    /// Whether this ISA has delay slots, selecting between the one- and
    /// two-sentinel `end_of_page`/`end_of_page2` layouts.
    const HAS_DELAY_SLOT: bool;

    /// Guest page size in bits. 12 (4 KiB pages) for every ISA this core
    /// bundles.
    const PAGE_SHIFT: u32 = 12;

    /// The guest's own MMU/segment decode, consulted only on a VPH miss.
    /// `Err` delivers (or reports, if this is a probe) the appropriate
    /// guest fault.
    fn translate(
        cpu: &mut CpuState<Self>,
        vaddr: u64,
        flags: AccessFlags,
    ) -> Result<Translated, ExceptionKind>;

    /// Decodes the instruction word at `pc` and writes the resulting
    /// handler and `arg[*]` into `ic`. Must not leave `ic.f` as
    /// `to_be_translated` (checked by the caller, which halts the CPU
    /// with [`crate::error::CpuError::DecoderLeftUntranslated`] if so).
    fn decode(cpu: &mut CpuState<Self>, pc: u64, instr_word: u32, ic: &mut InstrCall<CpuState<Self>>);

    /// Byte length of the instruction fetch at `pc` (4 for every ISA this
    /// core bundles; kept as a method so a future variable-length ISA can
    /// override it).
    fn instr_len(_pc: u64) -> u32 {
        4
    }

    /// ISA-specific predicate: is an enabled interrupt currently asserted?
    fn interrupt_pending(cpu: &CpuState<Self>) -> bool;

    /// Delivers an exception: computes EPC/cause/vector and sets `pc` to
    /// the handler address, per §4.6.
    fn exception(cpu: &mut CpuState<Self>, kind: ExceptionKind);

    /// Applies any per-batch side effects tied to instruction count, e.g.
    /// incrementing MIPS r4k+ COUNT and firing the COUNT==COMPARE
    /// interrupt, or decrementing PPC's DEC and raising the decrementer
    /// exception on underflow.
    fn account_instructions(cpu: &mut CpuState<Self>, n: u64);

    /// Optional combination/fusion pass: inspects the last few `ic`s
    /// written on the current page and may rewrite the earliest one into
    /// a fused handler. Default: no fusion.
    fn try_combine(_cpu: &mut CpuState<Self>) {}

    /// Machine-dependent interrupt assert/acknowledge for IRQ numbers
    /// ≥ 8 (numbers 2-7 are wired directly into the ISA's cause bits by
    /// `exception`).
    fn interrupt(_cpu: &mut CpuState<Self>, _irq_nr: u32, _assert: bool) {}
}

//! The [`gxemul_cpu::Isa`] implementation: address translation and
//! exception entry. Decoding and the combination checker live in
//! [`crate::decode`] and [`crate::combine`] respectively; this module is
//! just the two pieces that touch CPU-wide state rather than one `ic`.

use crate::regs::{
    MipsRegs, TlbMapping, CAUSE_BD, CAUSE_EXC_CODE_MASK, CAUSE_EXC_CODE_SHIFT, CAUSE_IP7,
    CAUSE_IP_MASK, EXC_CODE_ADEL, EXC_CODE_ADES, EXC_CODE_BUS, EXC_CODE_CPU, EXC_CODE_INT,
    EXC_CODE_MOD, EXC_CODE_OV, EXC_CODE_RI, EXC_CODE_SYS, EXC_CODE_TLBL, EXC_CODE_TLBS,
    EXC_CODE_TR, STATUS_EXL, STATUS_IE, STATUS_IM_SHIFT,
};
use gxemul_cpu::{CpuState, DelayState, ExceptionKind, Isa, Translated};
use gxemul_memory::AccessFlags;
use gxemul_vph::InstrCall;

/// TLB-refill vector: where control transfers on a miss with `Status.EXL
/// == 0`, matching real MIPS's `UTLBMiss`/`UseTLB` vector at `0x80000000`.
pub const VEC_TLB_REFILL: u64 = 0x8000_0000;
/// The common vector every other exception (and a TLB-refill taken with
/// `Status.EXL == 1`) uses.
pub const VEC_COMMON: u64 = 0x8000_0180;

/// A small 32-bit MIPS integer subset: `lui`, `ori`, `addiu`, `sw`, `lw`,
/// `ll`/`sc`, `beq`, `bne`, `beql`, `j`, `mtc0`/`mfc0`. Exists to exercise
/// the dyntrans framework end-to-end, not to be a faithful MIPS core —
/// see DESIGN.md for the specific simplifications (flat TLB instead of
/// kseg0/kseg1/kuseg, no 64-bit compatibility mode, no FPU/COP1-3).
pub struct MipsLite;

impl MipsLite {
    /// Installs a 1:1 (or arbitrary) virtual-to-physical TLB mapping.
    /// There is no MMU-off / unmapped-segment mode here (see DESIGN.md):
    /// every address a test or machine setup wants to touch, including
    /// the exception vectors themselves, needs an entry installed this
    /// way first.
    pub fn map_identity(cpu: &mut CpuState<Self>, vpage: u64, ppage: u64, writable: bool) {
        cpu.regs.tlb.push(TlbMapping {
            vpage,
            ppage,
            writable,
        });
    }
}

impl Isa for MipsLite {
    type Regs = MipsRegs;

    // 4 KiB pages / 4-byte instructions.
    const ICS_PER_PAGE: usize = 1024;
    const ALIGNMENT_SHIFT: u32 = 2;
    const HAS_DELAY_SLOT: bool = true;
    const PAGE_SHIFT: u32 = 12;

    fn translate(
        cpu: &mut CpuState<Self>,
        vaddr: u64,
        flags: AccessFlags,
    ) -> Result<Translated, ExceptionKind> {
        let write = flags.is_write();
        let vpage = vaddr >> Self::PAGE_SHIFT;
        let entry = cpu.regs.tlb.iter().find(|e| e.vpage == vpage);
        match entry {
            Some(e) if write && !e.writable => Err(ExceptionKind::Custom(EXC_CODE_MOD)),
            Some(e) => Ok(Translated {
                paddr_page: e.ppage << Self::PAGE_SHIFT,
                writable: e.writable,
            }),
            None => Err(ExceptionKind::TlbMiss { write }),
        }
    }

    fn decode(
        cpu: &mut CpuState<Self>,
        pc: u64,
        instr_word: u32,
        ic: &mut InstrCall<CpuState<Self>>,
    ) {
        crate::decode::decode(cpu, pc, instr_word, ic);
    }

    fn interrupt_pending(cpu: &CpuState<Self>) -> bool {
        let r = &cpu.regs;
        r.status & STATUS_IE != 0
            && r.status & STATUS_EXL == 0
            && (r.cause & CAUSE_IP_MASK) & (r.status & (0xFFu32 << STATUS_IM_SHIFT)) != 0
    }

    fn exception(cpu: &mut CpuState<Self>, kind: ExceptionKind) {
        let in_delay_slot = cpu.delay == DelayState::Delayed;
        let epc = if in_delay_slot {
            cpu.pc_last.wrapping_sub(4)
        } else {
            cpu.pc_last
        };

        cpu.delay = DelayState::NotDelayed;
        cpu.nullify_next = false;

        let exc_code = match kind {
            ExceptionKind::Interrupt => EXC_CODE_INT,
            ExceptionKind::TlbMiss { write: false } => EXC_CODE_TLBL,
            ExceptionKind::TlbMiss { write: true } => EXC_CODE_TLBS,
            ExceptionKind::AddressError { write: false } => EXC_CODE_ADEL,
            ExceptionKind::AddressError { write: true } => EXC_CODE_ADES,
            ExceptionKind::BusError => EXC_CODE_BUS,
            ExceptionKind::IllegalInstruction => EXC_CODE_RI,
            ExceptionKind::Syscall => EXC_CODE_SYS,
            ExceptionKind::Trap => EXC_CODE_TR,
            ExceptionKind::Overflow => EXC_CODE_OV,
            ExceptionKind::CoprocessorUnusable => EXC_CODE_CPU,
            ExceptionKind::Custom(code) => code,
        };

        if matches!(kind, ExceptionKind::TlbMiss { .. } | ExceptionKind::AddressError { .. }) {
            cpu.regs.badvaddr = cpu.fault_vaddr;
        }

        cpu.regs.epc = epc;
        cpu.regs.cause = (cpu.regs.cause & !(CAUSE_EXC_CODE_MASK | CAUSE_BD))
            | ((exc_code << CAUSE_EXC_CODE_SHIFT) & CAUSE_EXC_CODE_MASK)
            | if in_delay_slot { CAUSE_BD } else { 0 };

        // A TLB-refill miss taken with EXL already set re-enters at the
        // common vector instead of the refill vector, same as real MIPS
        // (nested faults during a handler are not refills any more).
        let exl_already_set = cpu.regs.status & STATUS_EXL != 0;
        cpu.pc = if matches!(kind, ExceptionKind::TlbMiss { .. }) && !exl_already_set {
            VEC_TLB_REFILL
        } else {
            VEC_COMMON
        };
        cpu.regs.status |= STATUS_EXL;
        cpu.cursor = None;
    }

    fn account_instructions(cpu: &mut CpuState<Self>, n: u64) {
        if n == 0 {
            return;
        }
        let after = cpu.regs.count.wrapping_add(n as u32);
        // Detects a COUNT==COMPARE crossing even across a wraparound: the
        // crossing happened within the last `n` counts iff `after -
        // compare` (mod 2^32) is smaller than `n`.
        let crossed = after.wrapping_sub(cpu.regs.compare) < (n as u32).max(1);
        cpu.regs.count = after;
        if crossed {
            cpu.regs.cause |= CAUSE_IP7;
        }
    }

    fn try_combine(cpu: &mut CpuState<Self>) {
        crate::combine::try_combine(cpu);
    }
}

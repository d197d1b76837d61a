//! Decoding for mips_lite's instruction subset, and the `ic` handlers
//! each opcode decodes to. Each handler has the exact shape
//! [`gxemul_vph::HandlerFn`] requires: `fn(&mut CpuState<MipsLite>,
//! &InstrCall<CpuState<MipsLite>>)`, reading its operands out of
//! `ic.arg` rather than a raw register-file pointer (the data model
//! names a pointer as one valid interpretation of `arg[i]`; an index is
//! just as valid and needs no `unsafe`, a reasonable Rust-idiomatic
//! generalisation recorded in DESIGN.md).

use crate::isa::MipsLite;
use gxemul_cpu::{CpuState, DelayState, ExceptionKind};
use gxemul_memory::AccessFlags;
use gxemul_vph::InstrCall;

type Ic = InstrCall<CpuState<MipsLite>>;

fn sign_extend16(v: u16) -> u64 {
    (v as i16) as i64 as u64
}

/// Decodes the instruction word at `pc` (the address `ic` will occupy)
/// and writes the resulting handler/args into `ic`. Never leaves `ic.f`
/// as `to_be_translated`; unrecognised opcodes decode to
/// [`illegal_instruction`], matching the "decoder is buggy, halt" vs.
/// "guest executed something the ISA itself rejects" distinction.
pub fn decode(_cpu: &mut CpuState<MipsLite>, pc: u64, instr_word: u32, ic: &mut Ic) {
    let opcode = (instr_word >> 26) & 0x3F;
    let rs = ((instr_word >> 21) & 0x1F) as u64;
    let rt = ((instr_word >> 16) & 0x1F) as u64;
    let rd = ((instr_word >> 11) & 0x1F) as u64;
    let imm16 = (instr_word & 0xFFFF) as u16;
    let instr_index = (instr_word & 0x03FF_FFFF) as u64;

    match opcode {
        0x0F => {
            *ic = Ic::new(lui, [rt, imm16 as u64, 0]);
        }
        0x0D => {
            *ic = Ic::new(ori, [rt, rs, imm16 as u64]);
        }
        0x09 => {
            *ic = Ic::new(addiu, [rt, rs, sign_extend16(imm16)]);
        }
        0x2B => {
            *ic = Ic::new(sw, [rt, rs, sign_extend16(imm16)]);
        }
        0x23 => {
            *ic = Ic::new(lw, [rt, rs, sign_extend16(imm16)]);
        }
        0x30 => {
            *ic = Ic::new(ll, [rt, rs, sign_extend16(imm16)]);
        }
        0x38 => {
            *ic = Ic::new(sc, [rt, rs, sign_extend16(imm16)]);
        }
        0x04 => {
            let target = (pc.wrapping_add(4)).wrapping_add(sign_extend16(imm16) << 2);
            *ic = Ic::new(beq, [rs, rt, target]);
        }
        0x05 => {
            let target = (pc.wrapping_add(4)).wrapping_add(sign_extend16(imm16) << 2);
            *ic = Ic::new(bne, [rs, rt, target]);
        }
        0x14 => {
            let target = (pc.wrapping_add(4)).wrapping_add(sign_extend16(imm16) << 2);
            *ic = Ic::new(beql, [rs, rt, target]);
        }
        0x02 => {
            let target = ((pc.wrapping_add(4)) & 0xF000_0000) | (instr_index << 2);
            *ic = Ic::new(j, [target, 0, 0]);
        }
        0x10 => {
            // COP0: rs selects MF (0) vs MT (4); rd selects the register.
            let cop0_op = (instr_word >> 21) & 0x1F;
            if cop0_op == 0x04 {
                *ic = Ic::new(mtc0, [rt, rd, 0]);
            } else {
                *ic = Ic::new(mfc0, [rt, rd, 0]);
            }
        }
        0x3F => {
            // Reserved here as mips_lite's own `syscall`-equivalent trap
            // for test harnesses (not a real MIPS opcode assignment).
            *ic = Ic::new(syscall, [0, 0, 0]);
        }
        _ => {
            *ic = Ic::new(illegal_instruction, [instr_word as u64, 0, 0]);
        }
    }
}

fn illegal_instruction(cpu: &mut CpuState<MipsLite>, _ic: &Ic) {
    MipsLiteException::deliver(cpu, ExceptionKind::IllegalInstruction);
}

fn syscall(cpu: &mut CpuState<MipsLite>, _ic: &Ic) {
    MipsLiteException::deliver(cpu, ExceptionKind::Syscall);
}

/// Tiny indirection so handlers call exception delivery the same way
/// regardless of which `Isa` method ends up doing the work, without
/// importing `gxemul_cpu::Isa` into every handler (would shadow `Isa`
/// against `MipsLite`'s own inherent impl block naming).
struct MipsLiteException;
impl MipsLiteException {
    fn deliver(cpu: &mut CpuState<MipsLite>, kind: ExceptionKind) {
        <MipsLite as gxemul_cpu::Isa>::exception(cpu, kind);
    }
}

fn lui(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let rt = ic.arg[0] as u8;
    let imm = ic.arg[1];
    cpu.regs.gpr_write(rt, imm << 16);
}

fn ori(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, imm) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2]);
    let val = cpu.regs.gpr_read(rs) | imm;
    cpu.regs.gpr_write(rt, val);
}

pub(crate) fn addiu(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, imm) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as i64);
    let rs_val = cpu.regs.gpr_read(rs) as u32 as i32;
    let sum = rs_val.wrapping_add(imm as i32);
    cpu.regs.gpr_write(rt, sum as u32 as u64);
}

pub(crate) fn sw(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, off) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as i64 as u64);
    let addr = cpu.regs.gpr_read(rs).wrapping_add(off);
    let val = cpu.regs.gpr_read(rt) as u32;
    let mut buf = val.to_le_bytes();
    let _ = cpu.memory_rw(addr, &mut buf, AccessFlags::WRITE);
}

fn lw(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, off) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as i64 as u64);
    let addr = cpu.regs.gpr_read(rs).wrapping_add(off);
    let mut buf = [0u8; 4];
    if cpu.memory_rw(addr, &mut buf, AccessFlags::empty()).is_err() {
        return;
    }
    cpu.regs.gpr_write(rt, u32::from_le_bytes(buf) as u64);
}

/// `ll`: an ordinary load plus a reservation, local (`cpu.rmw*`) and
/// shared (the cross-CPU table in `gxemul_memory::LlscTable`) so a later
/// `sc` can tell whether any write landed on this line in between.
fn ll(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, off) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as i64 as u64);
    let addr = cpu.regs.gpr_read(rs).wrapping_add(off);
    let mut buf = [0u8; 4];
    if cpu.memory_rw(addr, &mut buf, AccessFlags::empty()).is_err() {
        return;
    }
    cpu.regs.gpr_write(rt, u32::from_le_bytes(buf) as u64);

    let cpu_id = cpu.cpu_id as u32;
    cpu.mem.borrow().llsc().link(cpu_id, addr);
    cpu.rmw = true;
    cpu.rmw_addr = addr;
    cpu.rmw_len = 4;
}

/// `sc`: consumes the reservation from [`LlscTable`](gxemul_memory::LlscTable)
/// first (so the store it performs on success cannot invalidate its own
/// reservation before the check runs), then stores only if it was still
/// live, writing the pass/fail result back into `rt`.
fn sc(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rs, off) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as i64 as u64);
    let addr = cpu.regs.gpr_read(rs).wrapping_add(off);

    let locally_armed = cpu.rmw && cpu.rmw_addr == addr;
    cpu.rmw = false;
    let cpu_id = cpu.cpu_id as u32;
    let reservation_live = cpu.mem.borrow().llsc().store_conditional(cpu_id, addr);

    if !locally_armed || !reservation_live {
        cpu.regs.gpr_write(rt, 0);
        return;
    }

    let val = cpu.regs.gpr_read(rt) as u32;
    let mut buf = val.to_le_bytes();
    if cpu.memory_rw(addr, &mut buf, AccessFlags::WRITE).is_err() {
        return;
    }
    cpu.regs.gpr_write(rt, 1);
}

/// Shared by `beq`/`bne`: sets up the delay-slot state machine so the
/// generic dispatch loop (which already knows how to sequence
/// `ToBeDelayed` -> `Delayed` -> jump) lands on `target` if taken, or on
/// the instruction after the delay slot otherwise. Both non-likely
/// branches always execute their delay slot.
fn branch_with_delay_slot(cpu: &mut CpuState<MipsLite>, taken: bool, target: u64) {
    let fallthrough = cpu.pc.wrapping_add(8);
    cpu.delay = DelayState::ToBeDelayed;
    cpu.delay_jmpaddr = if taken { target } else { fallthrough };
}

fn beq(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rs, rt, target) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2]);
    let taken = cpu.regs.gpr_read(rs) == cpu.regs.gpr_read(rt);
    branch_with_delay_slot(cpu, taken, target);
}

pub(crate) fn bne(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rs, rt, target) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2]);
    let taken = cpu.regs.gpr_read(rs) != cpu.regs.gpr_read(rt);
    branch_with_delay_slot(cpu, taken, target);
}

/// `beql`: nullifies the delay slot instead of executing it when not
/// taken. The dispatch loop's generic `nullify_next` handling does the
/// actual squashing; this handler only has to avoid entering the
/// delay-slot state machine in the not-taken case.
fn beql(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rs, rt, target) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2]);
    let taken = cpu.regs.gpr_read(rs) == cpu.regs.gpr_read(rt);
    if taken {
        cpu.delay = DelayState::ToBeDelayed;
        cpu.delay_jmpaddr = target;
    } else {
        cpu.nullify_next = true;
    }
}

fn j(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let target = ic.arg[0];
    cpu.delay = DelayState::ToBeDelayed;
    cpu.delay_jmpaddr = target;
}

fn mtc0(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, cop0_reg) = (ic.arg[0] as u8, ic.arg[1]);
    let val = cpu.regs.gpr_read(rt);
    match cop0_reg {
        9 => cpu.regs.count = val as u32,
        11 => cpu.regs.compare = val as u32,
        12 => cpu.regs.status = val as u32,
        13 => cpu.regs.cause = val as u32,
        14 => cpu.regs.epc = val,
        _ => {}
    }
}

fn mfc0(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, cop0_reg) = (ic.arg[0] as u8, ic.arg[1]);
    let val = match cop0_reg {
        9 => cpu.regs.count as u64,
        11 => cpu.regs.compare as u64,
        12 => cpu.regs.status as u64,
        13 => cpu.regs.cause as u64,
        14 => cpu.regs.epc,
        8 => cpu.regs.badvaddr,
        _ => 0,
    };
    cpu.regs.gpr_write(rt, val);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr_word(opcode: u32, rs: u32, rt: u32, imm: u16) -> u32 {
        (opcode << 26) | (rs << 21) | (rt << 16) | (imm as u32)
    }

    #[test]
    fn lui_decodes_upper_immediate_into_rt() {
        let mut ic = Ic::new(illegal_instruction, [0; 3]);
        decode(
            &mut dummy_cpu(),
            0,
            instr_word(0x0F, 0, 2, 0x1234),
            &mut ic,
        );
        assert_eq!(ic.f, lui as fn(&mut CpuState<MipsLite>, &Ic));
        assert_eq!(ic.arg[0], 2);
        assert_eq!(ic.arg[1], 0x1234);
    }

    #[test]
    fn beq_decodes_pc_relative_target() {
        let mut ic = Ic::new(illegal_instruction, [0; 3]);
        // offset = 2 (words) -> +8 bytes from the delay slot address.
        decode(&mut dummy_cpu(), 0x1000, instr_word(0x04, 1, 2, 2), &mut ic);
        assert_eq!(ic.arg[2], 0x1000 + 4 + 8);
    }

    #[test]
    fn unknown_opcode_decodes_to_illegal_instruction() {
        let mut ic = Ic::new(lui, [0; 3]);
        decode(&mut dummy_cpu(), 0, instr_word(0x3E, 0, 0, 0), &mut ic);
        assert_eq!(ic.f, illegal_instruction as fn(&mut CpuState<MipsLite>, &Ic));
    }

    fn mapped_cpu() -> CpuState<MipsLite> {
        let mut cpu = dummy_cpu();
        MipsLite::map_identity(&mut cpu, 0, 0, true);
        cpu
    }

    #[test]
    fn sc_succeeds_without_an_intervening_write() {
        let mut cpu = mapped_cpu();
        cpu.regs.gpr_write(1, 0x100); // base register
        cpu.regs.gpr_write(2, 0xABCD); // value to store

        let ll_ic = Ic::new(ll, [3, 1, 0]); // ll r3, 0(r1)
        ll(&mut cpu, &ll_ic);

        let sc_ic = Ic::new(sc, [2, 1, 0]); // sc r2, 0(r1)
        sc(&mut cpu, &sc_ic);
        assert_eq!(cpu.regs.gpr_read(2), 1);

        let mut buf = [0u8; 4];
        cpu.memory_rw(0x100, &mut buf, AccessFlags::empty()).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0xABCD);
    }

    #[test]
    fn sc_fails_after_an_intervening_write_to_the_same_line() {
        let mut cpu = mapped_cpu();
        cpu.regs.gpr_write(1, 0x100);

        let ll_ic = Ic::new(ll, [3, 1, 0]);
        ll(&mut cpu, &ll_ic);

        // A write from outside this ll/sc pair (e.g. another CPU) to the
        // same line breaks the reservation.
        let mem = cpu.mem.clone();
        mem.borrow_mut()
            .access_physical(0x100, &mut [0u8; 4], AccessFlags::WRITE)
            .unwrap();

        cpu.regs.gpr_write(2, 0xFFFF);
        let sc_ic = Ic::new(sc, [2, 1, 0]);
        sc(&mut cpu, &sc_ic);
        assert_eq!(cpu.regs.gpr_read(2), 0);
    }

    fn dummy_cpu() -> CpuState<MipsLite> {
        crate::test_support::new_test_cpu()
    }
}

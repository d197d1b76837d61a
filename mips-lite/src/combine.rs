//! The one combination of adjacent instructions this workspace ships:
//! a generic store/increment/decrement/branch-back fill loop,
//! matched structurally against the last four `ic` slots on the current
//! page right after the branch closing the loop gets translated.
//!
//! Recognises:
//! ```text
//! loop: sw    rt, 0(rbase)
//!       addiu rbase, rbase, 4
//!       addiu cnt,   cnt,   -1
//!       bne   cnt,   r0,    loop
//! ```
//! and replaces the `sw`'s slot with [`fused_fill_loop`], which performs
//! up to [`CAP`] iterations of the whole loop body per dispatch call
//! instead of one instruction at a time. The three slots after it are
//! left untouched: the first time the loop runs, before fusion has
//! happened, they still execute individually and produce identical guest
//! state to the fused path.

use crate::decode::{addiu, bne, sw};
use crate::isa::MipsLite;
use gxemul_cpu::CpuState;
use gxemul_memory::AccessFlags;
use gxemul_vph::{InstrCall, PhyspageFlags, VphTable};

type Ic = InstrCall<CpuState<MipsLite>>;

/// Bounds how much guest work one call to [`fused_fill_loop`] does, so a
/// pending interrupt or tick never waits for an arbitrarily long guest
/// loop to finish.
const CAP: u32 = 256;

/// Called right after a fresh `ic` is decoded and written into the
/// current page, while `cpu.pc`/`cpu.cursor` still point at it.
/// Looks at the three preceding slots on the same page; if they and this
/// one match the fill-loop shape, replaces the loop head's slot in place.
pub fn try_combine(cpu: &mut CpuState<MipsLite>) {
    if cpu.single_step {
        return;
    }
    let Some(cursor) = cpu.cursor else { return };
    if cursor.index < 3 {
        return;
    }
    let Some(page_id) = cpu.cache.resolve(cursor.page) else {
        return;
    };

    let (ic0, ic1, ic2, ic3) = {
        let page = cpu.cache.get(page_id);
        (
            page.ics[cursor.index - 3],
            page.ics[cursor.index - 2],
            page.ics[cursor.index - 1],
            page.ics[cursor.index],
        )
    };

    let sw_fn: fn(&mut CpuState<MipsLite>, &Ic) = sw_ptr();
    let addiu_fn: fn(&mut CpuState<MipsLite>, &Ic) = addiu_ptr();
    let bne_fn: fn(&mut CpuState<MipsLite>, &Ic) = bne_ptr();

    if ic0.f != sw_fn || ic1.f != addiu_fn || ic2.f != addiu_fn || ic3.f != bne_fn {
        return;
    }

    // sw rt, 0(rbase)
    let rt = ic0.arg[0];
    let rbase = ic0.arg[1];
    if ic0.arg[2] != 0 {
        return;
    }
    // addiu rbase, rbase, 4
    if ic1.arg[0] != rbase || ic1.arg[1] != rbase || ic1.arg[2] != 4 {
        return;
    }
    // addiu cnt, cnt, -1
    let cnt = ic2.arg[0];
    if ic2.arg[1] != cnt || (ic2.arg[2] as i64) != -1 {
        return;
    }
    // bne cnt, r0, loop_head (each mips_lite instruction is 4 bytes)
    let loop_head_addr = cpu.pc.wrapping_sub(12);
    if ic3.arg[0] != cnt || ic3.arg[1] != 0 || ic3.arg[2] != loop_head_addr {
        return;
    }

    let fused = Ic::new(fused_fill_loop, [rt, rbase, cnt]);
    cpu.cache.get_mut(page_id).ics[cursor.index - 3] = fused;
    cpu.cache.get_mut(page_id).flags |= PhyspageFlags::COMBINATIONS;
}

fn sw_ptr() -> fn(&mut CpuState<MipsLite>, &Ic) {
    sw
}
fn addiu_ptr() -> fn(&mut CpuState<MipsLite>, &Ic) {
    addiu
}
fn bne_ptr() -> fn(&mut CpuState<MipsLite>, &Ic) {
    bne
}

/// Runs up to [`CAP`] iterations of the fill loop in one dispatch step.
/// Bypasses the generic delay-slot state machine entirely — it computes
/// the net effect of N iterations directly rather than stepping through
/// `ToBeDelayed`/`Delayed` N times — and positions `cpu.pc`/`cpu.cursor`
/// itself afterwards instead of letting the dispatch loop's automatic
/// single-slot advance run.
fn fused_fill_loop(cpu: &mut CpuState<MipsLite>, ic: &Ic) {
    let (rt, rbase_reg, cnt_reg) = (ic.arg[0] as u8, ic.arg[1] as u8, ic.arg[2] as u8);
    let loop_head_addr = cpu.pc;
    let val = (cpu.regs.gpr_read(rt) as u32).to_le_bytes();

    let mut iterations: u32 = 0;
    loop {
        let cnt = cpu.regs.gpr_read(cnt_reg) as u32;
        if cnt == 0 || iterations >= CAP {
            break;
        }
        let addr = cpu.regs.gpr_read(rbase_reg);

        // If the host page backing this store is no longer VPH-mapped,
        // fall back to a single ordinary store through `memory_rw` (which
        // re-populates VPH, or delivers a fault, as a normal `sw` would)
        // and stop folding further iterations this call.
        let fast_path_mapped = cpu.vph.lookup_data(addr, true).is_some();
        let mut buf = val;
        if cpu.memory_rw(addr, &mut buf, AccessFlags::WRITE).is_err() {
            // Fault already delivered by memory_rw/translate_address;
            // cpu.cursor has been cleared by exception entry.
            return;
        }
        cpu.regs.gpr_write(rbase_reg, addr.wrapping_add(4));
        cpu.regs.gpr_write(cnt_reg, cnt.wrapping_sub(1));
        iterations += 1;

        if !fast_path_mapped {
            break;
        }
    }

    if iterations > 0 {
        // The dispatch loop already counts this call as one instruction;
        // each iteration folded four (sw, addiu, addiu, bne).
        let logical = (iterations as u64) * 4;
        cpu.n_translated_instrs += logical.saturating_sub(1);
    }

    let cnt_now = cpu.regs.gpr_read(cnt_reg) as u32;
    cpu.cursor = None;
    cpu.pc = if cnt_now != 0 {
        loop_head_addr
    } else {
        loop_head_addr.wrapping_add(16)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{addiu as addiu_handler, bne as bne_handler, sw as sw_handler};
    use gxemul_vph::InstrCall as RawIc;

    #[test]
    fn recognises_fill_loop_shape() {
        let mut cpu = crate::test_support::new_test_cpu();
        cpu.pc = 0x1000 + 12; // address of the `bne`

        let page_ref = cpu.cache.find_or_create(0x1000);
        let page_id = cpu.cache.resolve(page_ref).unwrap();
        cpu.vph.set_code(0x1000, page_ref, 0x1000);
        cpu.cursor = Some(gxemul_cpu::IcCursor {
            page: page_ref,
            index: 3,
        });

        let page = cpu.cache.get_mut(page_id);
        page.ics[0] = RawIc::new(sw_handler, [8, 9, 0]); // sw r8, 0(r9)
        page.ics[1] = RawIc::new(addiu_handler, [9, 9, 4]); // addiu r9,r9,4
        page.ics[2] = RawIc::new(addiu_handler, [10, 10, (-1i64) as u64]); // addiu r10,r10,-1
        page.ics[3] = RawIc::new(bne_handler, [10, 0, 0x1000]); // bne r10,r0,loop

        try_combine(&mut cpu);

        let page = cpu.cache.get(page_id);
        assert_eq!(page.ics[0].f, fused_fill_loop as fn(&mut CpuState<MipsLite>, &Ic));
        assert!(page.flags.contains(PhyspageFlags::COMBINATIONS));
    }

    /// Once folded, a single call to the fused handler must store the
    /// same value at every target address, advance `rbase` and drain
    /// `cnt` the same as running the four original instructions one at a
    /// time would, and land `pc` just past the loop.
    #[test]
    fn fused_fill_loop_matches_the_unrolled_effect() {
        let mut cpu = crate::test_support::new_test_cpu();
        MipsLite::map_identity(&mut cpu, 0x2000 >> 12, 0x2000 >> 12, true);

        cpu.pc = 0x1010; // just past the 4-instruction loop body
        cpu.regs.gpr_write(2, 0xABCDEF); // rt
        cpu.regs.gpr_write(3, 0x2000); // rbase
        cpu.regs.gpr_write(4, 5); // cnt

        let ic = Ic::new(fused_fill_loop, [2, 3, 4]);
        fused_fill_loop(&mut cpu, &ic);

        assert_eq!(cpu.regs.gpr_read(4), 0);
        assert_eq!(cpu.regs.gpr_read(3), 0x2000 + 5 * 4);
        assert_eq!(cpu.pc, 0x1010 + 16);
        assert!(cpu.cursor.is_none());
        for i in 0..5u64 {
            let mut buf = [0u8; 4];
            cpu.memory_rw(0x2000 + i * 4, &mut buf, AccessFlags::empty()).unwrap();
            assert_eq!(u32::from_le_bytes(buf), 0xABCDEF);
        }
    }

    #[test]
    fn non_matching_sequence_is_left_alone() {
        let mut cpu = crate::test_support::new_test_cpu();
        cpu.pc = 0x1000 + 12;

        let page_ref = cpu.cache.find_or_create(0x1000);
        let page_id = cpu.cache.resolve(page_ref).unwrap();
        cpu.cursor = Some(gxemul_cpu::IcCursor {
            page: page_ref,
            index: 3,
        });

        let page = cpu.cache.get_mut(page_id);
        page.ics[0] = RawIc::new(sw_handler, [8, 9, 4]); // non-zero offset: not a match
        page.ics[1] = RawIc::new(addiu_handler, [9, 9, 4]);
        page.ics[2] = RawIc::new(addiu_handler, [10, 10, (-1i64) as u64]);
        page.ics[3] = RawIc::new(bne_handler, [10, 0, 0x1000]);

        try_combine(&mut cpu);

        let page = cpu.cache.get(page_id);
        assert_eq!(page.ics[0].f, sw_handler as fn(&mut CpuState<MipsLite>, &Ic));
    }
}

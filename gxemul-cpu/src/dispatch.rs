//! The generic dispatch loop (§4.1), PC->pointers (§4.4), and the
//! `to_be_translated` / `end_of_page` / `end_of_page2` sentinel handlers
//! (§4.2). None of this is specialised per ISA; [`Isa::decode`] and the
//! other [`Isa`] methods are the only family-specific moving parts.

use crate::cpu::{CpuState, IcCursor};
use crate::delay_slot::DelayState;
use crate::error::CpuError;
use crate::isa::{ExceptionKind, Isa};
use gxemul_memory::AccessFlags;
use gxemul_vph::{InstrCall, Invalidate, PhyspageFlags, PhyspageId, VphTable};
use log::{trace, warn};

/// Instructions executed per call to [`run_instr`] before returning to
/// the caller to re-check ticks and the single-step/stop flags. Tunable;
/// unlike the original this core re-validates the cursor every
/// iteration rather than only once per batch, trading a little raw
/// throughput for never risking a stale arena reference.
const UNROLL_FACTOR: u32 = 60;

/// One guest instruction's worth of accounting the dispatch loop
/// performs centrally instead of delegating to every handler: delay-slot
/// finalisation and nullify-on-branch-likely.
fn finalize_one_step<I: Isa>(cpu: &mut CpuState<I>, cursor_before: IcCursor) {
    match cpu.delay {
        DelayState::ToBeDelayed => {
            cpu.delay = DelayState::Delayed;
        }
        DelayState::Delayed => {
            cpu.pc = cpu.delay_jmpaddr;
            cpu.delay = DelayState::NotDelayed;
            cpu.cursor = None;
            return;
        }
        DelayState::NotDelayed => {}
    }

    if let Some(cursor) = cpu.cursor {
        if cursor.page == cursor_before.page && cursor.index == cursor_before.index {
            cpu.cursor = Some(IcCursor {
                page: cursor.page,
                index: cursor.index + 1,
            });
            cpu.pc += 1u64 << I::ALIGNMENT_SHIFT;
        }
    }
}

fn pc_to_ic_index<I: Isa>(cpu: &CpuState<I>, vaddr: u64) -> usize {
    let page_mask = (1u64 << I::PAGE_SHIFT) - 1;
    ((vaddr & page_mask) >> I::ALIGNMENT_SHIFT) as usize
}

/// PC->pointers (§4.4): resolves `cpu.pc` to a translation-cache cursor,
/// consulting the VPH code fast path first and falling back to a full
/// address translation plus cache lookup/creation otherwise.
pub fn pc_to_pointers<I: Isa>(cpu: &mut CpuState<I>) -> Result<(), ()> {
    let vaddr = cpu.pc;

    if let Some(page) = cpu.vph.lookup_code(vaddr) {
        cpu.cursor = Some(IcCursor {
            page,
            index: pc_to_ic_index(cpu, vaddr),
        });
        return Ok(());
    }

    let paddr = cpu.translate_address(vaddr, AccessFlags::INSTRUCTION)?;
    let page_mask = (1u64 << I::PAGE_SHIFT) - 1;
    let paddr_page = paddr & !page_mask;

    let page_ref = cpu.cache.find_or_create(paddr_page);
    let vaddr_page = vaddr & !page_mask;
    cpu.vph.set_code(vaddr_page, page_ref, paddr_page);
    // The page now holds (or will hold) translated code; any store to it
    // must go through the code-invalidation path from here on.
    cpu.vph.invalidate(Invalidate::Paddr {
        paddr_page,
        just_mark_as_non_writable: true,
    });

    cpu.cursor = Some(IcCursor {
        page: page_ref,
        index: pc_to_ic_index(cpu, vaddr),
    });
    Ok(())
}

/// The sentinel every fresh `ic` slot starts as. Decodes the instruction
/// at the current `pc`, writes the result back into the arena slot the
/// cursor names, and then executes it immediately (the loop does not
/// re-read the slot; the freshly decoded handler runs in the same
/// dispatch step it was translated in, as the original does).
pub fn to_be_translated<I: Isa>(cpu: &mut CpuState<I>, _ic: &InstrCall<CpuState<I>>) {
    let cursor = match cpu.cursor {
        Some(c) => c,
        None => return,
    };
    let Some(page_id) = cpu.cache.resolve(cursor.page) else {
        // The arena reset since this cursor was handed out; re-resolve.
        cpu.cursor = None;
        if pc_to_pointers(cpu).is_err() {
            return;
        }
        let Some(cursor) = cpu.cursor else { return };
        let Some(page_id) = cpu.cache.resolve(cursor.page) else {
            return;
        };
        decode_and_run(cpu, page_id, cursor);
        return;
    };
    decode_and_run(cpu, page_id, cursor);
}

fn decode_and_run<I: Isa>(cpu: &mut CpuState<I>, page_id: PhyspageId, cursor: IcCursor) {
    let pc = cpu.pc;
    let instr_len = I::instr_len(pc);
    let mut word_buf = [0u8; 4];
    if cpu
        .memory_rw(
            pc,
            &mut word_buf[..instr_len as usize],
            AccessFlags::INSTRUCTION,
        )
        .is_err()
    {
        // memory_rw already delivered the appropriate fault.
        return;
    }
    let instr_word = u32::from_le_bytes(word_buf);

    let mut new_ic = InstrCall::new(to_be_translated::<I>, [0; 3]);
    I::decode(cpu, pc, instr_word, &mut new_ic);

    if new_ic.f == to_be_translated::<I> {
        let err = CpuError::DecoderLeftUntranslated { pc };
        warn!("{err}; halting");
        cpu.halted = true;
        return;
    }

    cpu.cache.get_mut(page_id).ics[cursor.index] = new_ic;
    cpu.cache.get_mut(page_id).flags |= PhyspageFlags::TRANSLATIONS;

    I::try_combine(cpu);

    trace!("translated pc {:#x}", pc);

    (new_ic.f)(cpu, &new_ic);
}

/// `end_of_page`: advance `pc` to the first instruction of the next
/// page, re-point, and undo the dispatch loop's automatic instruction
/// count increment for this step (the boundary itself is not a guest
/// instruction).
pub fn end_of_page<I: Isa>(cpu: &mut CpuState<I>, _ic: &InstrCall<CpuState<I>>) {
    let page_mask = (1u64 << I::PAGE_SHIFT) - 1;
    cpu.pc = (cpu.pc & !page_mask) + (1 << I::PAGE_SHIFT);
    cpu.cursor = None;
    cpu.n_translated_instrs = cpu.n_translated_instrs.saturating_sub(1);
}

/// `end_of_page2`: only reachable on delay-slot ISAs, when a taken
/// branch's delay slot was the last slot of a page. Resynchronises `pc`
/// to the *second* instruction of the next page (the delay slot already
/// accounted for the first).
pub fn end_of_page2<I: Isa>(cpu: &mut CpuState<I>, _ic: &InstrCall<CpuState<I>>) {
    let page_mask = (1u64 << I::PAGE_SHIFT) - 1;
    cpu.pc = (cpu.pc & !page_mask) + (1 << I::PAGE_SHIFT) + (1 << I::ALIGNMENT_SHIFT);
    cpu.cursor = None;
    cpu.n_translated_instrs = cpu.n_translated_instrs.saturating_sub(1);
}

/// `run_instr` (§4.1): executes at least one guest instruction, or
/// returns 0 if an exception fired before the first instruction of this
/// call (or the CPU is halted). Returns the number of guest instructions
/// accounted for.
///
/// `max_instrs` is the "safety instruction cap" §4.1 step 3 checks
/// between batches alongside `running_translated`: the unrolled batch
/// never executes more than this many instructions, so a caller tracking
/// its own chunk/tick budget can bound exactly one call instead of
/// overshooting by up to `UNROLL_FACTOR - 1`. Pass `u32::MAX` for no
/// caller-imposed bound beyond the built-in unroll factor.
pub fn run_instr<I: Isa>(cpu: &mut CpuState<I>, max_instrs: u32) -> u32 {
    if cpu.halted {
        return 0;
    }

    if cpu.cursor.is_none() && pc_to_pointers(cpu).is_err() {
        return 0;
    }

    if I::interrupt_pending(cpu) {
        I::exception(cpu, ExceptionKind::Interrupt);
        return 0;
    }

    let batch = if cpu.single_step {
        1
    } else {
        UNROLL_FACTOR.min(max_instrs.max(1))
    };
    let mut executed: u32 = 0;

    for _ in 0..batch {
        if !cpu.running_translated || cpu.halted {
            break;
        }

        let cursor = match cpu.cursor {
            Some(c) => c,
            None => {
                if pc_to_pointers(cpu).is_err() {
                    break;
                }
                cpu.cursor.expect("pc_to_pointers always sets cursor on success")
            }
        };

        let Some(page_id) = cpu.cache.resolve(cursor.page) else {
            cpu.cursor = None;
            continue;
        };

        if cpu.nullify_next {
            cpu.nullify_next = false;
            finalize_one_step(cpu, cursor);
            cpu.n_translated_instrs += 1;
            executed += 1;
            continue;
        }

        cpu.pc_last = cpu.pc;
        let ic_copy: InstrCall<CpuState<I>> = *cpu.cache.get(page_id).ic(cursor.index);
        (ic_copy.f)(cpu, &ic_copy);

        finalize_one_step(cpu, cursor);
        cpu.n_translated_instrs += 1;
        executed += 1;

        if cpu.single_step {
            // Flush the page the just-executed instruction came from (not
            // wherever the instruction may have jumped to), forcing every
            // slot back through to_be_translated on next entry.
            cpu.cache.invalidate_page(page_id);
            break;
        }
    }

    I::account_instructions(cpu, executed as u64);
    executed
}

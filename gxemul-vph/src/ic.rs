//! The instruction call (`ic`): one pre-decoded, pre-dispatched
//! instruction.
//!
//! An `ic` is a fixed-size record: a handler function pointer plus a
//! small fixed-arity argument array. Per the data model, `arg[i]` is
//! interpreted by the handler itself as a register pointer, a sign-
//! extended immediate, a precomputed host/page-boundary target or an
//! opaque tag (e.g. an instruction length) — this crate never interprets
//! `arg` itself.
//!
//! `Cpu` is left generic so this crate does not need to depend on the
//! concrete CPU-state type defined one layer up in `gxemul-cpu`; the only
//! requirement is that handlers are plain `fn` pointers, never closures,
//! matching the "call through pointer" shape the original C uses.

/// A handler function: given the CPU and the `ic` slot that is
/// executing, perform the instruction's effect.
pub type HandlerFn<Cpu> = fn(&mut Cpu, &InstrCall<Cpu>);

/// One decoded instruction-call slot.
///
/// Once written by the ISA decoder, an `ic` is immutable until its
/// containing [`crate::arena::Physpage`] is recycled — nothing in this
/// crate ever mutates `arg` after the initial decode (single-step mode
/// and code invalidation instead reset the whole slot back to
/// `to_be_translated`, which is simply overwriting it wholesale).
pub struct InstrCall<Cpu> {
    pub f: HandlerFn<Cpu>,
    pub arg: [u64; 3],
}

// Manually implemented rather than derived: `#[derive(Copy, Clone)]` on a
// generic struct adds a `Cpu: Copy` bound, which is wrong here — `Cpu` is
// the (non-Copy) CPU state type, not part of the copied payload.
impl<Cpu> Clone for InstrCall<Cpu> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Cpu> Copy for InstrCall<Cpu> {}

impl<Cpu> InstrCall<Cpu> {
    pub const fn new(f: HandlerFn<Cpu>, arg: [u64; 3]) -> Self {
        Self { f, arg }
    }
}

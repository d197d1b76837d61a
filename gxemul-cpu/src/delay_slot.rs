//! The branch-delay-slot state machine, modelled as an explicit enum
//! with transitions only at instruction boundaries (per the design notes
//! on turning "a pair of bools mutated from many sites" into something a
//! debug build can assert the legal transitions of).

/// Where the CPU is with respect to a pending delay slot. A fault taken
/// while `Delayed` is not a distinct state here: `Isa::exception` reads
/// `delay == Delayed` to apply EPC's `-4` adjustment and then resets it
/// to `NotDelayed` itself, in the same call, before the dispatch loop's
/// generic per-step finalisation ever runs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DelayState {
    #[default]
    NotDelayed,
    /// The just-executed instruction was a taken branch; the next `ic` is
    /// the delay slot.
    ToBeDelayed,
    /// Currently executing the delay slot itself.
    Delayed,
}

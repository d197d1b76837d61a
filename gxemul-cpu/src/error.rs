use thiserror_no_std::Error;

/// Fatal errors raised by the dispatch core. None of these are guest
/// faults — a guest fault is handled entirely by [`crate::exception`] and
/// never reaches here. Everything in this enum corresponds to §7's "host
/// resource exhaustion" or "configuration error" categories.
#[derive(Error, Debug)]
pub enum CpuError {
    #[error("ISA decoder left ic.f as to_be_translated for pc {pc:#x}")]
    DecoderLeftUntranslated { pc: u64 },

    #[error("unknown tick entry index {0}")]
    UnknownTickEntry(usize),

    #[error("CPU family plug rejected configuration: {0}")]
    BadConfiguration(&'static str),
}

pub type Result<T> = core::result::Result<T, CpuError>;

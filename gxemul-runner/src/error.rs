use thiserror_no_std::Error;

/// Fatal, non-guest errors the runner itself can raise: configuration
/// errors and host resource exhaustion, as opposed to guest faults.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("bad machine configuration: {0}")]
    BadConfiguration(&'static str),
}

pub type Result<T> = core::result::Result<T, RunnerError>;

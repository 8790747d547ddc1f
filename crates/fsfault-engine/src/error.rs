use thiserror::Error;

use crate::config::{MAX_ERRNO, MAX_TARGET_LEN};
use crate::lifecycle::Phase;

/// Rejected injector settings. The engine never activates with these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target operation name must be non-empty")]
    EmptyTarget,

    #[error("target operation name is {0} bytes (limit {max})", max = MAX_TARGET_LEN)]
    TargetTooLong(usize),

    #[error("error code must be in 1..={max}, got {0}", max = MAX_ERRNO)]
    InvalidErrno(i32),
}

/// The target could not be resolved or instrumented.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error("target operation not found: {0}")]
    TargetNotFound(String),

    #[error("host rejected interception of {target}: {reason}")]
    Rejected { target: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("attachment error: {0}")]
    Attach(#[from] AttachError),

    #[error("cannot {op} an engine that is {from}")]
    InvalidTransition { from: Phase, op: &'static str },
}

pub type Result<T> = std::result::Result<T, EngineError>;

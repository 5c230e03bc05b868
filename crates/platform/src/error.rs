//! Error types for counter reads, samplers and affinity calls.

use std::io;
use std::path::PathBuf;

/// Failure to obtain a numeric value from a counter location.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The counter (and its fallback, if any) is missing or empty.
    #[error("counter unavailable: {path}")]
    Unavailable { path: PathBuf },

    /// The counter holds text that is not an integer.
    #[error("malformed counter value {content:?} in {path}")]
    Parse { path: PathBuf, content: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CounterError {
    /// Location the error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            CounterError::Unavailable { path }
            | CounterError::Parse { path, .. }
            | CounterError::Io { path, .. } => path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("sampling interval must be greater than zero")]
    ZeroInterval,

    #[error("failed to spawn sampler thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Failure to refresh CPU utilization from procfs.
#[derive(Debug, thiserror::Error)]
pub enum UtilizationError {
    #[error("failed to read {what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("malformed {what}: {reason}")]
    Parse {
        what: &'static str,
        reason: String,
    },
}

impl UtilizationError {
    pub(crate) fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        UtilizationError::Parse {
            what,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AffinityError {
    #[error("no cpus requested")]
    EmptySet,

    #[error("invalid cpu list {0:?}")]
    InvalidCpuList(String),

    #[error("cpu {cpu} is outside the supported range 0..{max}")]
    CpuOutOfRange { cpu: usize, max: usize },

    #[error("sched_setaffinity failed: {0}")]
    SetAffinity(#[source] io::Error),

    #[error("sched_getaffinity failed: {0}")]
    GetAffinity(#[source] io::Error),

    #[error("thread affinity is not supported on this platform")]
    Unsupported,
}

//! Request axes for a memory relief pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How urgently memory must be given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine, low-cost cleanup that is always safe to run.
    Noncritical,
    /// Measured memory pressure, or the process is about to be suspended.
    Critical,
}

impl Severity {
    pub fn is_critical(self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noncritical => write!(f, "noncritical"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Whether the caller waits for collection and pruning to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocking {
    /// Garbage collection runs to completion before returning.
    Synchronous,
    /// Collection is scheduled and may be coalesced with a recent pass.
    Asynchronous,
}

impl fmt::Display for Blocking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => write!(f, "synchronous"),
            Self::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// Why a cache is being pruned. Recorded for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningReason {
    MemoryPressure,
    ProcessSuspended,
}

impl fmt::Display for PruningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryPressure => write!(f, "memory pressure"),
            Self::ProcessSuspended => write!(f, "process suspended"),
        }
    }
}

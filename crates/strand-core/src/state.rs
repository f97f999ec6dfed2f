//! Suspension reasons for strands

use core::fmt;

/// Why a strand's resume returned control to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SuspendReason {
    /// No marker set; the strand yielded control without a request
    None = 0,

    /// Waiting for a file descriptor to become ready
    IoWait = 1,

    /// Explicit yield; the scheduler may migrate the strand
    Yield = 2,

    /// The strand finished execution
    Completed = 3,

    /// Advisory preemption hint; requeued behind other ready work
    Preempted = 4,
}

impl SuspendReason {
    /// Check if the strand has terminated
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SuspendReason::Completed)
    }

    /// Check if the worker should requeue the strand on its own queue
    #[inline]
    pub const fn requeues_locally(&self) -> bool {
        matches!(self, SuspendReason::None | SuspendReason::Preempted)
    }
}

impl From<u8> for SuspendReason {
    fn from(v: u8) -> Self {
        match v {
            1 => SuspendReason::IoWait,
            2 => SuspendReason::Yield,
            3 => SuspendReason::Completed,
            4 => SuspendReason::Preempted,
            _ => SuspendReason::None,
        }
    }
}

impl From<SuspendReason> for u8 {
    fn from(r: SuspendReason) -> u8 {
        r as u8
    }
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuspendReason::None => "none",
            SuspendReason::IoWait => "io-wait",
            SuspendReason::Yield => "yield",
            SuspendReason::Completed => "completed",
            SuspendReason::Preempted => "preempted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_roundtrip() {
        for r in [
            SuspendReason::None,
            SuspendReason::IoWait,
            SuspendReason::Yield,
            SuspendReason::Completed,
            SuspendReason::Preempted,
        ] {
            assert_eq!(SuspendReason::from(u8::from(r)), r);
        }
    }

    #[test]
    fn test_predicates() {
        assert!(SuspendReason::Completed.is_terminal());
        assert!(!SuspendReason::IoWait.is_terminal());
        assert!(SuspendReason::None.requeues_locally());
        assert!(SuspendReason::Preempted.requeues_locally());
        assert!(!SuspendReason::Yield.requeues_locally());
    }
}

use std::fmt;

use crate::config::ErrnoCode;
use crate::fixed::FixedString;
use crate::port::Invocation;

/// Process labels are kept at the kernel's `comm` width.
pub const LABEL_LEN: usize = 16;

/// Result of an operation in the kernel convention: `>= 0` is a success value,
/// `< 0` is `-errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Outcome(i64);

impl Outcome {
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn failure(code: ErrnoCode) -> Self {
        Self(-(code.get() as i64))
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// The positive error number carried by a failure.
    pub fn errno(self) -> Option<i32> {
        if self.0 >= 0 {
            return None;
        }
        self.0.checked_neg().and_then(|e| i32::try_from(e).ok())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finished libc call: its return value and the errno it left behind.
///
/// libc reports failure as `-1` with errno set; the engine sees that as
/// `Outcome(-errno)`. An errno of 0 on a failed call is read as `EPERM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibcReturn {
    pub ret: i64,
    pub errno: i32,
}

impl LibcReturn {
    pub const fn new(ret: i64, errno: i32) -> Self {
        Self { ret, errno }
    }

    pub fn outcome(self) -> Outcome {
        if self.ret < 0 {
            Outcome::from_raw(-i64::from(self.errno.max(1)))
        } else {
            Outcome::from_raw(self.ret)
        }
    }

    /// What the caller sees once the engine settled on `observed`. An
    /// unchanged outcome returns the call exactly as it finished.
    pub fn rewrite(self, observed: Outcome) -> Self {
        if observed == self.outcome() {
            return self;
        }
        match observed.errno() {
            Some(code) => Self::new(-1, code),
            None => Self::new(observed.raw(), self.errno),
        }
    }
}

/// Snapshot of one completed call, built on the firing's stack and dropped
/// when the firing returns.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext {
    pub pid: u32,
    pub label: FixedString<LABEL_LEN>,
    pub natural: Outcome,
    pub timestamp_ns: u64,
}

impl InvocationContext {
    pub fn capture(invocation: &dyn Invocation, timestamp_ns: u64) -> Self {
        Self {
            pid: invocation.caller_pid(),
            label: FixedString::from(invocation.caller_label()),
            natural: invocation.outcome(),
            timestamp_ns,
        }
    }
}

/// Wall-clock time in nanoseconds, or 0 when the clock cannot be read.
pub fn realtime_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Safety: `ts` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
        return 0;
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0);
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

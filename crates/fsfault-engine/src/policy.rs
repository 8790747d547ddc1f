//! Decision policy: `(config, counters, call) -> skip | override`.

use crate::config::{EngineConfig, ErrnoCode};
use crate::context::{InvocationContext, Outcome};
use crate::state::InjectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Caller is not the configured process.
    PidFiltered,
    /// The injection ceiling has been reached.
    CeilingReached,
    /// Conservative mode leaves successful calls alone.
    Conservative,
    /// Configured error code is outside the valid range.
    InvalidErrno,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            SkipReason::PidFiltered => "pid_filtered",
            SkipReason::CeilingReached => "ceiling",
            SkipReason::Conservative => "conservative",
            SkipReason::InvalidErrno => "invalid_errno",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Override(Outcome),
}

impl Decision {
    pub const fn is_override(&self) -> bool {
        matches!(self, Decision::Override(_))
    }

    /// Identity-filtered calls are never reported.
    pub const fn is_reported(&self) -> bool {
        !matches!(self, Decision::Skip(SkipReason::PidFiltered))
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Decision::Override(_) => "override",
            Decision::Skip(reason) => reason.as_str(),
        }
    }

    pub const fn replacement(&self) -> Option<Outcome> {
        match self {
            Decision::Override(outcome) => Some(*outcome),
            Decision::Skip(_) => None,
        }
    }
}

/// Evaluates the rules in order; the first skip wins.
///
/// A won override has already been counted against the ceiling when this
/// returns. The ceiling read in rule 2 is only a fast path: the
/// compare-and-increment in rule 5 is what holds under concurrent firings.
pub fn decide(config: &EngineConfig, state: &InjectionState, ctx: &InvocationContext) -> Decision {
    if let Some(pid) = config.pid_filter() {
        if ctx.pid != pid.get() {
            return Decision::Skip(SkipReason::PidFiltered);
        }
    }

    if state.read_injection_count() >= config.max_injections() {
        return Decision::Skip(SkipReason::CeilingReached);
    }

    if !config.aggressive() && ctx.natural.is_success() {
        return Decision::Skip(SkipReason::Conservative);
    }

    let Some(code) = ErrnoCode::new(config.errno()) else {
        return Decision::Skip(SkipReason::InvalidErrno);
    };

    if !state.try_increment_if_below(config.max_injections()) {
        return Decision::Skip(SkipReason::CeilingReached);
    }

    Decision::Override(Outcome::failure(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::FixedString;

    fn call(pid: u32, natural: i64) -> InvocationContext {
        InvocationContext {
            pid,
            label: FixedString::from("server"),
            natural: Outcome::from_raw(natural),
            timestamp_ns: 1,
        }
    }

    #[test]
    fn test_ceiling_one_conservative_failing_call() {
        let config = EngineConfig::unchecked("readlink", 0, 13, 1, false);
        let state = InjectionState::new();

        let first = decide(&config, &state, &call(100, -2));
        assert_eq!(first, Decision::Override(Outcome::from_raw(-13)));
        assert_eq!(state.read_injection_count(), 1);

        let second = decide(&config, &state, &call(100, -2));
        assert_eq!(second, Decision::Skip(SkipReason::CeilingReached));
        assert_eq!(state.read_injection_count(), 1);
    }

    #[test]
    fn test_aggressive_overrides_success() {
        let config = EngineConfig::unchecked("readlink", 0, 2, 5, true);
        let state = InjectionState::new();

        let decision = decide(&config, &state, &call(100, 11));
        assert_eq!(decision, Decision::Override(Outcome::from_raw(-2)));
        assert_eq!(state.read_injection_count(), 1);
    }

    #[test]
    fn test_pid_filter_blocks_other_callers() {
        let config = EngineConfig::unchecked("readlink", 4242, 13, 100, true);
        let state = InjectionState::new();

        let decision = decide(&config, &state, &call(1000, -1));
        assert_eq!(decision, Decision::Skip(SkipReason::PidFiltered));
        assert!(!decision.is_reported());
        assert_eq!(state.read_injection_count(), 0);

        assert!(decide(&config, &state, &call(4242, -1)).is_override());
    }

    #[test]
    fn test_conservative_never_touches_success() {
        let config = EngineConfig::unchecked("stat", 0, 5, 10, false);
        let state = InjectionState::new();

        for natural in [0, 1, 4096] {
            assert_eq!(
                decide(&config, &state, &call(1, natural)),
                Decision::Skip(SkipReason::Conservative)
            );
        }
        assert_eq!(state.read_injection_count(), 0);
    }

    #[test]
    fn test_invalid_errno_is_skipped() {
        let config = EngineConfig::unchecked("stat", 0, 0, 10, true);
        let state = InjectionState::new();

        assert_eq!(
            decide(&config, &state, &call(1, -1)),
            Decision::Skip(SkipReason::InvalidErrno)
        );
        assert_eq!(state.read_injection_count(), 0);
    }

    #[test]
    fn test_replacement_ignores_natural_magnitude() {
        let config = EngineConfig::unchecked("stat", 0, 28, 100, true);
        let state = InjectionState::new();

        for natural in [-1, -4095, 0, 7, i64::MAX] {
            let decision = decide(&config, &state, &call(1, natural));
            assert_eq!(decision.replacement(), Some(Outcome::from_raw(-28)));
        }
    }

    #[test]
    fn test_skip_order_pid_before_ceiling() {
        let config = EngineConfig::unchecked("stat", 7, 5, 0, false);
        let state = InjectionState::new();
        assert_eq!(
            decide(&config, &state, &call(8, 0)),
            Decision::Skip(SkipReason::PidFiltered)
        );
        assert_eq!(
            decide(&config, &state, &call(7, 0)),
            Decision::Skip(SkipReason::CeilingReached)
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(Decision::Override(Outcome::from_raw(-1)).label(), "override");
        assert_eq!(Decision::Skip(SkipReason::Conservative).label(), "conservative");
    }
}

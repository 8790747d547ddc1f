// =============================================================================
// intercept.rs: The firing path
// =============================================================================
//
// Runs on the thread that completed the target operation, before the caller
// sees the result. Everything below `fire` must hold:
//   - no heap allocation, no locks, no blocking I/O
//   - no unwinding into the host: panics are caught and turned into a defect
//   - a defect costs the firing its event line, never the caller's result
// =============================================================================

use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::{realtime_ns, InvocationContext};
use crate::fixed::StackWriter;
use crate::policy::{decide, Decision};
use crate::port::Invocation;
use crate::report::{EventRecord, EventSink, RECORD_CAPACITY};
use crate::state::InjectionState;

/// Internal inconsistency inside one firing. Contained by [`Interceptor::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiringDefect {
    Panicked,
    RecordTruncated,
}

/// Armed interception handed to a host port at activation. Holds the
/// activation's immutable config and shared counters.
pub struct Interceptor {
    config: EngineConfig,
    state: Arc<InjectionState>,
    sink: Arc<dyn EventSink>,
}

impl Interceptor {
    pub(crate) fn new(
        config: EngineConfig,
        state: Arc<InjectionState>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            state,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &InjectionState {
        &self.state
    }

    /// Evaluates one completed call and, when the policy says so, rewrites its
    /// outcome. Called exactly once per completion by the host port.
    ///
    /// The outcome is only rewritten once the decision has been fully
    /// evaluated and reported; a defect anywhere before that leaves the
    /// caller's natural outcome in place.
    pub fn fire(&self, invocation: &mut dyn Invocation) -> Option<Decision> {
        let decision = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(&*invocation)))
            .unwrap_or(Err(FiringDefect::Panicked))
            .ok()?;

        if let Decision::Override(outcome) = decision {
            panic::catch_unwind(AssertUnwindSafe(|| invocation.set_outcome(outcome))).ok()?;
        }
        Some(decision)
    }

    fn evaluate(&self, invocation: &dyn Invocation) -> Result<Decision, FiringDefect> {
        let ctx = InvocationContext::capture(invocation, realtime_ns());
        let decision = decide(&self.config, &self.state, &ctx);

        if decision.is_reported() {
            self.report(&ctx, &decision)?;
        }
        Ok(decision)
    }

    fn report(&self, ctx: &InvocationContext, decision: &Decision) -> Result<(), FiringDefect> {
        let record = EventRecord {
            id: self.state.next_event_id(),
            pid: ctx.pid,
            label: ctx.label.as_str(),
            target: self.config.target(),
            natural: ctx.natural,
            replaced: decision.replacement(),
            timestamp_ns: ctx.timestamp_ns,
            aggressive: self.config.aggressive(),
            decision: decision.label(),
        };

        let mut buf = [0u8; RECORD_CAPACITY];
        let mut writer = StackWriter::new(&mut buf);
        record
            .write_to(&mut writer)
            .map_err(|_| FiringDefect::RecordTruncated)?;
        self.sink.emit(writer.as_bytes());
        Ok(())
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

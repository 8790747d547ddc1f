//! # fsfault-engine
//!
//! Interception engine for filesystem fault injection.
//!
//! A host reports every completed call of the target operation to an
//! [`Interceptor`]. The decision policy may rewrite the outcome into a synthetic
//! error before the caller observes it, and the event reporter records the
//! decision.
//!
//! Everything reachable from [`Interceptor::fire`] is allocation-free, lock-free
//! and never unwinds into the host.

pub mod config;
pub mod context;
pub mod error;
pub mod fixed;
pub mod intercept;
pub mod lifecycle;
pub mod policy;
pub mod port;
pub mod report;
pub mod state;
pub mod testing;

pub use config::{EngineConfig, ErrnoCode, InjectorConfig, MAX_ERRNO, MAX_TARGET_LEN};
pub use context::{realtime_ns, InvocationContext, LibcReturn, Outcome};
pub use error::{AttachError, ConfigError, EngineError, Result};
pub use intercept::Interceptor;
pub use lifecycle::{Engine, Phase};
pub use policy::{decide, Decision, SkipReason};
pub use port::{normalize_target, Attachment, InterceptionPort, Invocation, Resolver, TargetOperation};
pub use report::{EventRecord, EventSink, FdSink, NullSink, ParsedEvent, RingSink};
pub use state::InjectionState;

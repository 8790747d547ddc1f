//! Lifecycle manager: `Unconfigured → Validated → Active → TornDown`.
//!
//! One [`Engine`] is one activation. Torn-down is terminal; reactivating means
//! building a fresh engine, which also starts from zeroed counters.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{EngineConfig, InjectorConfig};
use crate::error::{EngineError, Result};
use crate::intercept::Interceptor;
use crate::port::{Attachment, InterceptionPort, Resolver};
use crate::report::EventSink;
use crate::state::InjectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconfigured,
    Validated,
    Active,
    TornDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Unconfigured => "unconfigured",
            Phase::Validated => "validated",
            Phase::Active => "active",
            Phase::TornDown => "torn down",
        })
    }
}

pub struct Engine<P: InterceptionPort> {
    port: P,
    sink: Arc<dyn EventSink>,
    phase: Phase,
    config: Option<EngineConfig>,
    state: Arc<InjectionState>,
    attachment: Option<Box<dyn Attachment>>,
}

impl<P: InterceptionPort> Engine<P> {
    pub fn new(port: P, sink: Arc<dyn EventSink>) -> Self {
        Self {
            port,
            sink,
            phase: Phase::Unconfigured,
            config: None,
            state: Arc::new(InjectionState::new()),
            attachment: None,
        }
    }

    /// Validates and activates in one step.
    pub fn start(
        port: P,
        sink: Arc<dyn EventSink>,
        raw: &InjectorConfig,
        resolver: &dyn Resolver,
    ) -> Result<Self> {
        let mut engine = Self::new(port, sink);
        engine.configure(raw)?;
        engine.activate(resolver)?;
        Ok(engine)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Cumulative overrides performed by this activation.
    pub fn injections_done(&self) -> u64 {
        self.state.read_injection_count()
    }

    /// Unconfigured/Validated → Validated. A rejected config leaves the phase unchanged.
    pub fn configure(&mut self, raw: &InjectorConfig) -> Result<()> {
        if !matches!(self.phase, Phase::Unconfigured | Phase::Validated) {
            return Err(EngineError::InvalidTransition {
                from: self.phase,
                op: "configure",
            });
        }

        let config = raw.validate().inspect_err(|e| {
            warn!(component = "ENGINE", target = %raw.target, errno = raw.errno, "rejected configuration: {}", e);
        })?;
        self.config = Some(config);
        self.phase = Phase::Validated;
        Ok(())
    }

    /// Validated → Active: resolve the target, zero the counters, install the
    /// interception point. On failure the engine stays Validated.
    pub fn activate(&mut self, resolver: &dyn Resolver) -> Result<()> {
        let config = match (self.phase, self.config.as_ref()) {
            (Phase::Validated, Some(config)) => config.clone(),
            (from, _) => {
                return Err(EngineError::InvalidTransition {
                    from,
                    op: "activate",
                })
            }
        };

        let target = resolver.resolve(config.target()).inspect_err(|e| {
            warn!(component = "ENGINE", target = config.target(), "resolve failed: {}", e);
        })?;

        self.state.reset();
        let interceptor = Arc::new(Interceptor::new(
            config.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
        ));
        let attachment = self.port.attach(&target, interceptor).inspect_err(|e| {
            warn!(component = "ENGINE", target = target.name(), "attach failed: {}", e);
        })?;

        self.attachment = Some(attachment);
        self.phase = Phase::Active;
        info!(
            component = "ENGINE",
            target = target.name(),
            pid = config.pid_filter().map_or(0, |p| p.get()),
            errno = config.errno(),
            aggressive = config.aggressive(),
            max_injections = config.max_injections(),
            "loaded"
        );
        Ok(())
    }

    /// Any phase → TornDown. Safe to call repeatedly or without activation.
    pub fn deactivate(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.detach();
            info!(
                component = "ENGINE",
                injections_done = self.injections_done(),
                "unloaded"
            );
        }
        self.phase = Phase::TornDown;
    }
}

impl<P: InterceptionPort> Drop for Engine<P> {
    fn drop(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.detach();
        }
    }
}

impl<P: InterceptionPort> fmt::Debug for Engine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.phase)
            .field("config", &self.config)
            .field("injections_done", &self.injections_done())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Outcome;
    use crate::error::{AttachError, ConfigError};
    use crate::report::NullSink;
    use crate::testing::LoopbackPort;

    fn engine(port: &LoopbackPort) -> Engine<LoopbackPort> {
        Engine::new(port.clone(), Arc::new(NullSink))
    }

    #[test]
    fn test_full_lifecycle() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let mut e = engine(&port);
        assert_eq!(e.phase(), Phase::Unconfigured);

        e.configure(&InjectorConfig::default()).unwrap();
        assert_eq!(e.phase(), Phase::Validated);

        e.activate(&port).unwrap();
        assert_eq!(e.phase(), Phase::Active);
        assert!(port.is_attached("readlink"));

        let seen = port.invoke("readlink", 1, "t", Outcome::from_raw(-2));
        assert_eq!(seen.raw(), -13);
        assert_eq!(e.injections_done(), 1);

        e.deactivate();
        assert_eq!(e.phase(), Phase::TornDown);
        assert!(!port.is_attached("readlink"));
        assert_eq!(port.invoke("readlink", 1, "t", Outcome::from_raw(-2)).raw(), -2);
    }

    #[test]
    fn test_invalid_config_never_activates() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let mut e = engine(&port);
        let raw = InjectorConfig {
            errno: 0,
            ..Default::default()
        };

        let err = e.configure(&raw).unwrap_err();
        assert_eq!(err, EngineError::Config(ConfigError::InvalidErrno(0)));
        assert_eq!(e.phase(), Phase::Unconfigured);
        assert!(e.activate(&port).is_err());
        assert_eq!(e.injections_done(), 0);
        assert!(!port.is_attached("readlink"));
    }

    #[test]
    fn test_unknown_target_stays_validated() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let mut e = engine(&port);
        e.configure(&InjectorConfig {
            target: "no_such_op".into(),
            ..Default::default()
        })
        .unwrap();

        let err = e.activate(&port).unwrap_err();
        assert_eq!(
            err,
            EngineError::Attach(AttachError::TargetNotFound("no_such_op".into()))
        );
        assert_eq!(e.phase(), Phase::Validated);
    }

    #[test]
    fn test_rejected_attachment_stays_validated() {
        let port = LoopbackPort::with_operations(["readlink"]);
        port.reject_attachments("attach limit reached");
        let mut e = engine(&port);
        e.configure(&InjectorConfig::default()).unwrap();

        assert!(matches!(
            e.activate(&port),
            Err(EngineError::Attach(AttachError::Rejected { .. }))
        ));
        assert_eq!(e.phase(), Phase::Validated);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let mut never_active = engine(&port);
        never_active.deactivate();
        never_active.deactivate();
        assert_eq!(never_active.phase(), Phase::TornDown);

        let mut e = Engine::start(
            port.clone(),
            Arc::new(NullSink),
            &InjectorConfig::default(),
            &port,
        )
        .unwrap();
        e.deactivate();
        e.deactivate();
        assert_eq!(e.phase(), Phase::TornDown);
        assert!(!port.is_attached("readlink"));
    }

    #[test]
    fn test_torn_down_is_terminal() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let mut e = engine(&port);
        e.deactivate();
        assert_eq!(
            e.configure(&InjectorConfig::default()),
            Err(EngineError::InvalidTransition {
                from: Phase::TornDown,
                op: "configure"
            })
        );
    }

    #[test]
    fn test_drop_detaches() {
        let port = LoopbackPort::with_operations(["unlink"]);
        {
            let _e = Engine::start(
                port.clone(),
                Arc::new(NullSink),
                &InjectorConfig {
                    target: "unlink".into(),
                    ..Default::default()
                },
                &port,
            )
            .unwrap();
            assert!(port.is_attached("unlink"));
        }
        assert!(!port.is_attached("unlink"));
    }

    #[test]
    fn test_fresh_engine_starts_from_zero() {
        let port = LoopbackPort::with_operations(["readlink"]);
        let raw = InjectorConfig {
            max_injections: 10,
            ..Default::default()
        };

        let mut first = Engine::start(port.clone(), Arc::new(NullSink), &raw, &port).unwrap();
        port.invoke("readlink", 1, "t", Outcome::from_raw(0));
        port.invoke("readlink", 1, "t", Outcome::from_raw(0));
        assert_eq!(first.injections_done(), 2);
        first.deactivate();

        let second = Engine::start(port.clone(), Arc::new(NullSink), &raw, &port).unwrap();
        assert_eq!(second.injections_done(), 0);
    }
}

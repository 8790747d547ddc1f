//! # fsfault-preload
//!
//! `LD_PRELOAD` host for the fsfault engine on Linux/glibc.
//!
//! Loaded into a process, it interposes the filesystem entry points listed in
//! [`hooks`], reads the injector settings from `FSFAULT_*` variables and arms
//! the engine from an `.init_array` constructor. `FSFAULT_DEFER=1` postpones
//! arming until the host calls [`fsfault_activate`], so a host can finish its
//! own setup first.
//!
//! Any configuration or attachment failure is reported on stderr and leaves
//! every interposer as a pass-through.

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

pub mod hooks;
pub mod port;
pub mod reals;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fsfault_config::logging::{scoped_subscriber, LogLevel};
use fsfault_config::{log_preload_debug, log_preload_error, log_preload_warn};
use fsfault_config::{ENV_DEFER, ENV_EVENT_LOG};
use fsfault_engine::{Engine, EventSink, FdSink, Phase};

use crate::port::PreloadPort;

static ENGINE: Mutex<Option<Engine<PreloadPort>>> = Mutex::new(None);

fn engine() -> MutexGuard<'static, Option<Engine<PreloadPort>>> {
    ENGINE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle diagnostics go to stderr without claiming the host's global subscriber.
fn with_logging<R>(f: impl FnOnce() -> R) -> R {
    tracing::subscriber::with_default(scoped_subscriber(LogLevel::Warn), f)
}

fn event_sink() -> Arc<dyn EventSink> {
    match std::env::var_os(ENV_EVENT_LOG) {
        Some(path) if !path.is_empty() => match FdSink::append(Path::new(&path)) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                log_preload_warn!(
                    "event log unavailable, using stderr",
                    path = tracing::field::debug(&path),
                    error = tracing::field::display(&e)
                );
                Arc::new(FdSink::stderr())
            }
        },
        _ => Arc::new(FdSink::stderr()),
    }
}

/// 0 = armed now, 1 = already armed, -1 = configuration or attachment failed.
fn activate() -> i32 {
    let mut slot = engine();
    if slot.as_ref().is_some_and(|e| e.phase() == Phase::Active) {
        return 1;
    }

    let injector = match fsfault_config::injector_from_env(|key| std::env::var(key).ok()) {
        Ok(injector) => injector,
        Err(e) => {
            log_preload_error!("invalid injector environment", error = tracing::field::display(&e));
            return -1;
        }
    };

    match Engine::start(PreloadPort, event_sink(), &injector, &PreloadPort) {
        Ok(started) => {
            *slot = Some(started);
            0
        }
        Err(e) => {
            log_preload_error!(
                "injector not activated",
                target = injector.target.as_str(),
                error = tracing::field::display(&e)
            );
            -1
        }
    }
}

fn deactivate() {
    if let Some(mut active) = engine().take() {
        active.deactivate();
    }
}

/// Arms the engine from the environment. See the crate docs for return codes.
#[no_mangle]
pub extern "C" fn fsfault_activate() -> libc::c_int {
    with_logging(activate)
}

/// Disarms the engine. Safe to call more than once.
#[no_mangle]
pub extern "C" fn fsfault_deactivate() {
    with_logging(deactivate)
}

/// Overrides performed so far by the current activation.
#[no_mangle]
pub extern "C" fn fsfault_injections_done() -> u64 {
    engine().as_ref().map_or(0, |e| e.injections_done())
}

extern "C" fn on_load() {
    let deferred = std::env::var(ENV_DEFER)
        .ok()
        .and_then(|v| fsfault_config::parse_flag(&v))
        .unwrap_or(false);
    if deferred {
        with_logging(|| log_preload_debug!("activation deferred to host"));
        return;
    }
    fsfault_activate();
}

extern "C" fn on_unload() {
    fsfault_deactivate();
}

#[used]
#[link_section = ".init_array"]
static ON_LOAD: extern "C" fn() = on_load;

#[used]
#[link_section = ".fini_array"]
static ON_UNLOAD: extern "C" fn() = on_unload;

//! Structured logging utilities for fsfault components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use fsfault_config::logging::*;
//!
//! log_exerciser_warn!("scenario failed", scenario = "readlink", errno = 13);
//! log_controller_info!("variant done", errno = "EACCES");
//! ```

use tracing_subscriber::EnvFilter;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const ENGINE: &'static str = "ENGINE";
    pub const PRELOAD: &'static str = "PRELOAD";
    pub const EXERCISER: &'static str = "EXERCISER";
    pub const CONTROLLER: &'static str = "CONTROLLER";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `-v` counting: 0 keeps `base`, each step is one level noisier.
    pub fn from_verbosity(base: LogLevel, verbose: u8) -> Self {
        const ORDER: [LogLevel; 5] = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let start = ORDER.iter().position(|l| *l == base).unwrap_or(2);
        ORDER[(start + verbose as usize).min(ORDER.len() - 1)]
    }

    pub const fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === PRELOAD logging macros ===

#[macro_export]
macro_rules! log_preload_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_preload_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_preload_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

// === EXERCISER logging macros ===

#[macro_export]
macro_rules! log_exerciser_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "EXERCISER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_exerciser_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "EXERCISER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_exerciser_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "EXERCISER", $($key = $value,)* $msg)
    };
}

// === CONTROLLER logging macros ===

#[macro_export]
macro_rules! log_controller_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "CONTROLLER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_controller_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CONTROLLER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_controller_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CONTROLLER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_controller_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CONTROLLER", $($key = $value,)* $msg)
    };
}

/// `FSFAULT_LOG`, then `RUST_LOG`, then `level`.
fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(crate::ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Same format as [`init_logging`], but not installed globally. Code loaded
/// into a foreign process scopes it with `tracing::subscriber::with_default`
/// so the host stays free to install its own.
pub fn scoped_subscriber(level: LogLevel) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::ENGINE, "ENGINE");
        assert_eq!(Component::PRELOAD, "PRELOAD");
        assert_eq!(Component::CONTROLLER, "CONTROLLER");
    }

    #[test]
    fn test_verbosity_steps() {
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(LogLevel::Warn, 1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(LogLevel::Info, 9), LogLevel::Trace);
    }
}

//! Injector settings and their validated, activation-scoped form.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest error number the negative-return encoding can carry (kernel MAX_ERRNO).
pub const MAX_ERRNO: i32 = 4095;

/// Longest accepted target name; keeps every event record inside its stack buffer.
pub const MAX_TARGET_LEN: usize = 128;

/// A positive error number in `1..=MAX_ERRNO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrnoCode(i32);

impl ErrnoCode {
    pub const fn new(raw: i32) -> Option<Self> {
        if raw > 0 && raw <= MAX_ERRNO {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

/// Injector settings as supplied by an operator (file, environment or flags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    /// Operation to intercept (`readlink`, `__x64_sys_readlink`, ...)
    pub target: String,
    /// Only inject for this process id. 0 = every caller.
    pub pid: u32,
    /// Positive errno to inject; the caller observes `-errno`.
    pub errno: i32,
    /// Overrides allowed before the engine goes inert.
    pub max_injections: u64,
    /// Also override calls that would have succeeded.
    pub aggressive: bool,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            target: "readlink".to_string(),
            pid: 0,
            errno: libc::EACCES,
            max_injections: 1,
            aggressive: true,
        }
    }
}

impl InjectorConfig {
    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if target.len() > MAX_TARGET_LEN {
            return Err(ConfigError::TargetTooLong(target.len()));
        }
        if ErrnoCode::new(self.errno).is_none() {
            return Err(ConfigError::InvalidErrno(self.errno));
        }

        Ok(EngineConfig {
            target: target.to_string(),
            pid_filter: NonZeroU32::new(self.pid),
            errno: self.errno,
            max_injections: self.max_injections,
            aggressive: self.aggressive,
        })
    }
}

/// Immutable configuration of one activation. Only obtainable via
/// [`InjectorConfig::validate`], so firings read it without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    target: String,
    pid_filter: Option<NonZeroU32>,
    errno: i32,
    max_injections: u64,
    aggressive: bool,
}

impl EngineConfig {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pid_filter(&self) -> Option<NonZeroU32> {
        self.pid_filter
    }

    /// Raw configured error number. Always valid for configs built by `validate`.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn max_injections(&self) -> u64 {
        self.max_injections
    }

    pub fn aggressive(&self) -> bool {
        self.aggressive
    }

    #[cfg(test)]
    pub(crate) fn unchecked(target: &str, pid: u32, errno: i32, max: u64, aggressive: bool) -> Self {
        Self {
            target: target.to_string(),
            pid_filter: NonZeroU32::new(pid),
            errno,
            max_injections: max,
            aggressive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = InjectorConfig::default().validate().unwrap();
        assert_eq!(config.target(), "readlink");
        assert_eq!(config.errno(), 13);
        assert_eq!(config.max_injections(), 1);
        assert!(config.aggressive());
        assert!(config.pid_filter().is_none());
    }

    #[test]
    fn test_rejects_empty_target() {
        let raw = InjectorConfig {
            target: "   ".into(),
            ..Default::default()
        };
        assert_eq!(raw.validate(), Err(ConfigError::EmptyTarget));
    }

    #[test]
    fn test_rejects_non_positive_errno() {
        for errno in [0, -1, -13] {
            let raw = InjectorConfig {
                errno,
                ..Default::default()
            };
            assert_eq!(raw.validate(), Err(ConfigError::InvalidErrno(errno)));
        }
    }

    #[test]
    fn test_rejects_errno_outside_encoding() {
        let raw = InjectorConfig {
            errno: MAX_ERRNO + 1,
            ..Default::default()
        };
        assert!(matches!(raw.validate(), Err(ConfigError::InvalidErrno(_))));
    }

    #[test]
    fn test_rejects_oversized_target() {
        let raw = InjectorConfig {
            target: "x".repeat(MAX_TARGET_LEN + 1),
            ..Default::default()
        };
        assert_eq!(
            raw.validate(),
            Err(ConfigError::TargetTooLong(MAX_TARGET_LEN + 1))
        );
    }

    #[test]
    fn test_pid_zero_means_unfiltered() {
        let raw = InjectorConfig {
            pid: 4242,
            ..Default::default()
        };
        assert_eq!(raw.validate().unwrap().pid_filter().map(|p| p.get()), Some(4242));
    }

    #[test]
    fn test_target_is_trimmed() {
        let raw = InjectorConfig {
            target: "  unlink \n".into(),
            ..Default::default()
        };
        assert_eq!(raw.validate().unwrap().target(), "unlink");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let raw: InjectorConfig = serde_json::from_str(r#"{"target":"mkdir","errno":28}"#).unwrap();
        assert_eq!(raw.target, "mkdir");
        assert_eq!(raw.errno, 28);
        assert_eq!(raw.max_injections, 1);
    }
}

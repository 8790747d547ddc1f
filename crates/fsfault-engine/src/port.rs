//! Seams between the engine and the host that runs it.
//!
//! A host supplies a [`Resolver`] (name → live entry point) and an
//! [`InterceptionPort`] (run an [`Interceptor`] after each completion of that
//! entry point). `fsfault-preload` implements both over libc; the loopback
//! double in [`crate::testing`] implements them in-process.

use std::sync::Arc;

use crate::context::Outcome;
use crate::error::AttachError;
use crate::intercept::Interceptor;

/// A resolved, live entry point of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOperation {
    name: String,
    entry: usize,
}

impl TargetOperation {
    pub fn new(name: impl Into<String>, entry: usize) -> Self {
        Self {
            name: name.into(),
            entry,
        }
    }

    /// Canonical (normalized) operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host-specific address or slot of the entry point.
    pub fn entry(&self) -> usize {
        self.entry
    }
}

/// Opaque handle to a just-completed call of the target operation.
pub trait Invocation {
    fn caller_pid(&self) -> u32;

    fn caller_label(&self) -> &str;

    /// Outcome the caller will observe, in [`Outcome`] encoding.
    fn outcome(&self) -> Outcome;

    /// Replaces the outcome the caller will observe. Nothing else about the
    /// call may change.
    fn set_outcome(&mut self, outcome: Outcome);
}

pub trait Resolver {
    fn resolve(&self, name: &str) -> Result<TargetOperation, AttachError>;
}

/// Host capability: fire `interceptor` after every completion of `target`,
/// on the completing thread, before the caller sees the result.
pub trait InterceptionPort {
    fn attach(
        &self,
        target: &TargetOperation,
        interceptor: Arc<Interceptor>,
    ) -> Result<Box<dyn Attachment>, AttachError>;
}

/// An installed interception point.
pub trait Attachment: Send {
    /// Uninstalls the point. Once this returns, no new firing starts; firings
    /// already in flight finish against the interceptor they started with.
    fn detach(self: Box<Self>);
}

const ENTRY_PREFIXES: [&str; 3] = ["__x64_sys_", "__arm64_sys_", "__ia32_sys_"];

/// Maps kernel entry names and large-file aliases onto libc-style operation
/// names: `__x64_sys_readlink` → `readlink`, `__x64_sys_newstat` → `stat`,
/// `faccessat2` → `faccessat`, `open64` → `open`.
pub fn normalize_target(name: &str) -> &str {
    let name = name.trim();
    let base = ENTRY_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);

    match base {
        "newstat" => "stat",
        "newlstat" => "lstat",
        "newfstat" => "fstat",
        "newfstatat" => "fstatat",
        "faccessat2" => "faccessat",
        "open64" => "open",
        "openat64" => "openat",
        "stat64" => "stat",
        "lstat64" => "lstat",
        "fstat64" => "fstat",
        "fstatat64" => "fstatat",
        "truncate64" => "truncate",
        "ftruncate64" => "ftruncate",
        "fallocate64" => "fallocate",
        "sendfile64" => "sendfile",
        other => other,
    }
}

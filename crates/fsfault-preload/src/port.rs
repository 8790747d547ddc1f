//! Engine seams over the interposed libc entry points.

use std::ffi::CStr;
use std::sync::Arc;

use fsfault_engine::{
    normalize_target, AttachError, Attachment, InterceptionPort, Interceptor, Invocation, Outcome,
    Resolver, TargetOperation,
};

use crate::hooks::{self, HookSlot, HOOKS};

/// Resolver and interception port backed by the interposers in [`crate::hooks`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PreloadPort;

impl Resolver for PreloadPort {
    fn resolve(&self, name: &str) -> Result<TargetOperation, AttachError> {
        let canonical = normalize_target(name);
        let (index, slot) =
            hooks::find(canonical).ok_or_else(|| AttachError::TargetNotFound(name.to_string()))?;
        if slot.real.resolve().is_null() {
            return Err(AttachError::TargetNotFound(name.to_string()));
        }
        Ok(TargetOperation::new(canonical, index))
    }
}

impl InterceptionPort for PreloadPort {
    fn attach(
        &self,
        target: &TargetOperation,
        interceptor: Arc<Interceptor>,
    ) -> Result<Box<dyn Attachment>, AttachError> {
        let slot = HOOKS
            .get(target.entry())
            .copied()
            .filter(|slot| slot.name == target.name())
            .ok_or_else(|| AttachError::Rejected {
                target: target.name().to_string(),
                reason: "no interposer for this entry".into(),
            })?;

        if !slot.arm(interceptor) {
            return Err(AttachError::Rejected {
                target: target.name().to_string(),
                reason: "already attached".into(),
            });
        }
        Ok(Box::new(PreloadAttachment { slot }))
    }
}

struct PreloadAttachment {
    slot: &'static HookSlot,
}

impl Attachment for PreloadAttachment {
    fn detach(self: Box<Self>) {
        self.slot.disarm();
    }
}

/// One finished libc call as seen by the engine.
pub struct LibcCall {
    pid: u32,
    comm: [u8; 16],
    outcome: Outcome,
}

impl LibcCall {
    pub fn new(natural: Outcome) -> Self {
        let mut comm = [0u8; 16];
        // Safety: PR_GET_NAME writes at most 16 bytes, NUL included.
        unsafe { libc::prctl(libc::PR_GET_NAME, comm.as_mut_ptr() as libc::c_ulong, 0, 0, 0) };
        Self {
            // Safety: getpid has no preconditions.
            pid: unsafe { libc::getpid() } as u32,
            comm,
            outcome: natural,
        }
    }

    pub fn observed(&self) -> Outcome {
        self.outcome
    }
}

impl Invocation for LibcCall {
    fn caller_pid(&self) -> u32 {
        self.pid
    }

    fn caller_label(&self) -> &str {
        CStr::from_bytes_until_nul(&self.comm)
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("?")
    }

    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

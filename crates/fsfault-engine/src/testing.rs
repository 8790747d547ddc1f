//! In-process host for exercising the engine without a real interception layer.
//!
//! [`LoopbackPort`] knows a fixed set of operation names. Calling
//! [`LoopbackPort::invoke`] simulates one completion of an operation: if an
//! interceptor is attached it fires on the calling thread, and the returned
//! outcome is what a caller would observe.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::context::Outcome;
use crate::error::AttachError;
use crate::intercept::Interceptor;
use crate::port::{normalize_target, Attachment, InterceptionPort, Invocation, Resolver, TargetOperation};

#[derive(Debug, Default)]
struct Inner {
    operations: Vec<String>,
    attached: RwLock<HashMap<String, Arc<Interceptor>>>,
    reject: RwLock<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackPort {
    inner: Arc<Inner>,
}

impl LoopbackPort {
    pub fn with_operations<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                operations: operations.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
        }
    }

    /// Makes every later `attach` fail with `reason`.
    pub fn reject_attachments(&self, reason: &str) {
        *self.inner.reject.write().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.inner
            .attached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Simulates one completed call of `name` returning `natural`.
    pub fn invoke(&self, name: &str, pid: u32, label: &str, natural: Outcome) -> Outcome {
        let interceptor = self
            .inner
            .attached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        let mut call = LoopbackCall {
            pid,
            label,
            outcome: natural,
        };
        if let Some(interceptor) = interceptor {
            interceptor.fire(&mut call);
        }
        call.outcome
    }
}

impl Resolver for LoopbackPort {
    fn resolve(&self, name: &str) -> Result<TargetOperation, AttachError> {
        let canonical = normalize_target(name);
        self.inner
            .operations
            .iter()
            .position(|op| op == canonical)
            .map(|slot| TargetOperation::new(canonical, slot))
            .ok_or_else(|| AttachError::TargetNotFound(name.to_string()))
    }
}

impl InterceptionPort for LoopbackPort {
    fn attach(
        &self,
        target: &TargetOperation,
        interceptor: Arc<Interceptor>,
    ) -> Result<Box<dyn Attachment>, AttachError> {
        if let Some(reason) = self
            .inner
            .reject
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(AttachError::Rejected {
                target: target.name().to_string(),
                reason,
            });
        }

        let mut attached = self.inner.attached.write().unwrap_or_else(PoisonError::into_inner);
        if attached.contains_key(target.name()) {
            return Err(AttachError::Rejected {
                target: target.name().to_string(),
                reason: "already attached".into(),
            });
        }
        attached.insert(target.name().to_string(), interceptor);

        Ok(Box::new(LoopbackAttachment {
            port: self.clone(),
            name: target.name().to_string(),
        }))
    }
}

struct LoopbackAttachment {
    port: LoopbackPort,
    name: String,
}

impl Attachment for LoopbackAttachment {
    fn detach(self: Box<Self>) {
        self.port
            .inner
            .attached
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

struct LoopbackCall<'a> {
    pid: u32,
    label: &'a str,
    outcome: Outcome,
}

impl Invocation for LoopbackCall<'_> {
    fn caller_pid(&self) -> u32 {
        self.pid
    }

    fn caller_label(&self) -> &str {
        self.label
    }

    fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

//! Per-thread activation stack for cycle detection.
//!
//! Every producer build, registration build and instance activation pushes a
//! frame onto a thread-local stack and pops it when the returned guard is
//! dropped. Meeting the same frame twice on one stack is a true cycle.
//! Two threads working on the same producer never see each other's frames,
//! so contention is never mistaken for a cycle.

use std::cell::RefCell;
use std::marker::PhantomData;

use tracing::warn;

use crate::error::{CyclicDependencyError, GraftError, Result};
use crate::key::ServiceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// An [`InstanceProducer`](crate::producer::InstanceProducer) building its factory
    Producer,
    /// A registration building its factory
    Registration,
    /// A registration's factory creating an instance
    Activation,
}

struct Frame {
    id: u64,
    kind: FrameKind,
    /// Implementation name reported in cycle errors
    implementation: ServiceKey,
}

thread_local! {
    static ACTIVATION_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops its frame on drop. Not `Send`: it must be dropped on the thread that
/// pushed it.
#[derive(Debug)]
pub(crate) struct ActivationGuard {
    _not_send: PhantomData<*const ()>,
}

impl ActivationGuard {
    /// Pushes a frame, or fails when the same frame is already on this
    /// thread's stack.
    pub fn enter(id: u64, kind: FrameKind, implementation: &ServiceKey) -> Result<Self> {
        ACTIVATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            if let Some(start) = stack.iter().position(|f| f.id == id && f.kind == kind) {
                let mut chain: Vec<ServiceKey> = stack[start..]
                    .iter()
                    .filter(|f| f.kind != FrameKind::Producer)
                    .map(|f| f.implementation.clone())
                    .collect();
                if chain.is_empty() {
                    chain.push(implementation.clone());
                }
                chain.push(implementation.clone());

                warn!(
                    implementation = %implementation,
                    depth = stack.len(),
                    "Cyclic dependency detected"
                );

                return Err(GraftError::CyclicDependency(CyclicDependencyError {
                    implementation: implementation.clone(),
                    chain,
                }));
            }

            stack.push(Frame {
                id,
                kind,
                implementation: implementation.clone(),
            });
            Ok(ActivationGuard {
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let _ = ACTIVATION_STACK.try_with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Number of frames on the current thread's stack.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    ACTIVATION_STACK.with(|stack| stack.borrow().len())
}

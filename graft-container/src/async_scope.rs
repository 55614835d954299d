//! Task-local ambient scopes for async code.
//!
//! A thread-local "current scope" breaks as soon as a task moves between
//! worker threads. [`AsyncScopeManager`] keeps the current scope in a
//! `tokio` task-local instead, so it follows the future wherever it runs.
//!
//! ```
//! use graft_container::prelude::*;
//!
//! struct RequestContext;
//! impl Component for RequestContext {
//!     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
//!         Ok(RequestContext)
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let scopes = AsyncScopeManager::new();
//! let container = Container::new();
//! container
//!     .register::<RequestContext, RequestContext>(scopes.lifestyle())
//!     .unwrap();
//!
//! let same = scopes
//!     .run_in_scope(&container, async {
//!         let a = container.get_instance::<RequestContext>().unwrap();
//!         let b = container.get_instance::<RequestContext>().unwrap();
//!         std::sync::Arc::ptr_eq(&a, &b)
//!     })
//!     .await;
//! assert!(same);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::container::Container;
use crate::lifestyle::{ASYNC_SCOPED_LENGTH, Lifestyle, ScopedLifestyle};
use crate::scope::{AmbientScope, Scope};

struct ScopeSlot(Mutex<Option<Scope>>);

tokio::task_local! {
    static CURRENT_SCOPE: Arc<ScopeSlot>;
}

/// Tracks one current scope per task.
#[derive(Default)]
pub struct AsyncScopeManager {
    _private: (),
}

impl AsyncScopeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A scoped lifestyle that finds its scope through the current task.
    pub fn lifestyle(self: &Arc<Self>) -> Lifestyle {
        Lifestyle::Scoped(
            ScopedLifestyle::new("Async Scoped")
                .with_length(ASYNC_SCOPED_LENGTH)
                .with_ambient(self.clone()),
        )
    }

    /// Runs `future` with a new scope as the task's current scope, then
    /// disposes the scope. The scope is nested in the current one when that
    /// belongs to the same container.
    ///
    /// The scope is also disposed when `future` panics or the returned
    /// future is dropped before completion.
    pub async fn run_in_scope<F>(self: &Arc<Self>, container: &Container, future: F) -> F::Output
    where
        F: Future,
    {
        let parent = self
            .current_scope()
            .filter(|scope| scope.container_id() == container.id());
        let ambient: Arc<dyn AmbientScope> = self.clone();
        let scope = container.create_scope(parent, Some(Arc::downgrade(&ambient)));
        debug!(scope = scope.id(), "Entering async scope");

        let slot = Arc::new(ScopeSlot(Mutex::new(Some(scope.clone()))));
        let _guard = DisposeOnExit(scope);
        CURRENT_SCOPE.scope(slot, future).await
    }
}

struct DisposeOnExit(Scope);

impl Drop for DisposeOnExit {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.0.dispose();
            return;
        }
        // A disposer panicking during an unwind would abort.
        if catch_unwind(AssertUnwindSafe(|| self.0.dispose())).is_err() {
            warn!(scope = self.0.id(), "Disposer panicked while unwinding");
        }
    }
}

impl AmbientScope for AsyncScopeManager {
    fn current_scope(&self) -> Option<Scope> {
        CURRENT_SCOPE
            .try_with(|slot| slot.0.lock().clone())
            .ok()
            .flatten()
    }

    fn set_current_scope(&self, scope: Option<Scope>) {
        // Outside run_in_scope there is no slot to update.
        let _ = CURRENT_SCOPE.try_with(|slot| *slot.0.lock() = scope);
    }
}

impl fmt::Debug for AsyncScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncScopeManager")
            .field("current", &self.current_scope().map(|scope| scope.id()))
            .finish()
    }
}

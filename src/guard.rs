//! Context-affine resources.
//!
//! A [`ResourceGuard`] tags a resource with the affinity context that owns
//! it, the way a UI toolkit only lets its widgets be touched from the UI
//! thread. Access from any other thread is a programming error and fails
//! immediately; nothing is retried.

use crate::error::{Error, Result};
use crate::runtime::AffinityContext;
use crate::tracing_compat::warn;
use parking_lot::Mutex;
use std::fmt;

/// A resource reachable only from its owning context's thread.
pub struct ResourceGuard<R> {
    name: String,
    owner: AffinityContext,
    resource: Mutex<R>,
}

impl<R> ResourceGuard<R> {
    /// Tags `resource` with `owner`.
    pub fn new(name: impl Into<String>, owner: AffinityContext, resource: R) -> Self {
        Self {
            name: name.into(),
            owner,
            resource: Mutex::new(resource),
        }
    }

    /// Resource name used in errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning context.
    #[must_use]
    pub fn owner(&self) -> &AffinityContext {
        &self.owner
    }

    /// Runs `f` with exclusive access to the resource.
    ///
    /// Fails with [`Error::AccessViolation`] unless the caller is the owner
    /// thread of the resource's context.
    pub fn access<U>(&self, f: impl FnOnce(&mut R) -> U) -> Result<U> {
        if !self.owner.current_thread_is_owner() {
            warn!(
                resource = %self.name,
                owner = %self.owner.id(),
                thread = ?std::thread::current().name(),
                "resource accessed off its owning context"
            );
            return Err(Error::AccessViolation {
                resource: self.name.clone(),
                owner: self.owner.id(),
            });
        }
        Ok(f(&mut self.resource.lock()))
    }
}

impl<R> fmt::Debug for ResourceGuard<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("name", &self.name)
            .field("owner", &self.owner.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContextThread;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn access_on_owner_succeeds_elsewhere_fails() {
        let ui = ContextThread::spawn("ui-guard").expect("ui");
        let guard = Arc::new(ResourceGuard::new("counter", ui.context().clone(), 0_u32));

        for _ in 0..3 {
            let err = guard.access(|n| *n += 1).expect_err("off owner");
            assert!(matches!(
                &err,
                Error::AccessViolation { resource, owner }
                    if resource == "counter" && *owner == ui.context().id()
            ));
        }

        let (tx, rx) = mpsc::channel();
        let on_owner = Arc::clone(&guard);
        ui.context()
            .post(move || {
                let result = on_owner.access(|n| {
                    *n += 1;
                    *n
                });
                tx.send(result).expect("send");
            })
            .expect("post");
        let value = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("recv")
            .expect("owner access");
        assert_eq!(value, 1, "failed accesses never touched the resource");
        ui.shutdown_and_join().expect("join");
    }

    #[test]
    fn unbound_context_rejects_everyone() {
        let ctx = AffinityContext::new("never-run");
        let guard = ResourceGuard::new("window", ctx, ());
        assert!(guard.access(|_| ()).is_err());
    }
}

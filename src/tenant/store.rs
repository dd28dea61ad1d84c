//! Request-scoped tenant context storage.
//!
//! Each request runs inside its own [`scope`], which owns a private slot in
//! tokio task-local storage. Nothing here is process-wide: two requests on
//! different tasks (or different threads via [`sync_scope`]) can never see
//! each other's slot, and a slot disappears together with the future that
//! owns it, including when that future is cancelled or panics.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use super::context::{LifecyclePhase, RequestContext};
use super::error::TenantError;
use super::id::TenantId;

tokio::task_local! {
    static SLOT: RefCell<ContextSlot>;
}

#[derive(Debug)]
struct ContextSlot {
    phase: LifecyclePhase,
    context: Option<Arc<RequestContext>>,
}

impl Default for ContextSlot {
    fn default() -> Self {
        Self {
            phase: LifecyclePhase::Unresolved,
            context: None,
        }
    }
}

impl ContextSlot {
    fn advance(&mut self, next: LifecyclePhase) -> Result<(), TenantError> {
        if !self.phase.can_advance_to(next) {
            return Err(TenantError::InvalidLifecycle {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

fn with_slot<R>(f: impl FnOnce(&mut ContextSlot) -> R) -> Result<R, TenantError> {
    SLOT.try_with(|cell| f(&mut cell.borrow_mut()))
        .map_err(|_| TenantError::ContextStoreUnavailable)
}

/// Run `future` with a fresh, empty context slot
pub async fn scope<F: Future>(future: F) -> F::Output {
    SLOT.scope(RefCell::new(ContextSlot::default()), future).await
}

/// Blocking counterpart of [`scope`] for work running on a plain thread
pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
    SLOT.sync_scope(RefCell::new(ContextSlot::default()), f)
}

/// Record that the resolver produced an identity for this request
pub fn mark_resolved() -> Result<(), TenantError> {
    with_slot(|slot| slot.advance(LifecyclePhase::Resolved))?
}

/// Install the request's context. A slot accepts exactly one context
/// over its whole life.
pub fn set(context: RequestContext) -> Result<Arc<RequestContext>, TenantError> {
    with_slot(|slot| {
        if slot.context.is_some() || slot.phase == LifecyclePhase::Active {
            return Err(TenantError::ContextAlreadyActive);
        }
        if slot.phase == LifecyclePhase::Unresolved {
            slot.advance(LifecyclePhase::Resolved)?;
        }
        slot.advance(LifecyclePhase::Active)?;

        let context = Arc::new(context);
        slot.context = Some(Arc::clone(&context));
        Ok(context)
    })?
}

/// The active context, or `NoActiveContext` when none is installed
/// (including when called outside of any request scope).
pub fn get() -> Result<Arc<RequestContext>, TenantError> {
    with_slot(|slot| slot.context.clone())
        .ok()
        .flatten()
        .ok_or(TenantError::NoActiveContext)
}

/// Drop the active context and close the slot. Safe to call repeatedly
/// and outside a scope. Returns whether a context was removed.
pub fn clear() -> bool {
    with_slot(|slot| {
        let removed = slot.context.take();
        slot.phase = LifecyclePhase::Cleared;
        if let Some(ctx) = &removed {
            tracing::trace!(request_id = %ctx.request_id(), "tenant context cleared");
        }
        removed.is_some()
    })
    .unwrap_or(false)
}

/// Current lifecycle phase, `None` outside a scope
pub fn phase() -> Option<LifecyclePhase> {
    with_slot(|slot| slot.phase).ok()
}

/// The accessor every data path goes through
pub fn current_tenant() -> Result<TenantId, TenantError> {
    get().map(|ctx| ctx.tenant_id().clone())
}

/// Calls [`clear`] when dropped, so teardown also happens on early
/// returns, panics and cancellation.
#[derive(Debug)]
pub struct ClearGuard {
    _private: (),
}

impl ClearGuard {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ClearGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClearGuard {
    fn drop(&mut self) {
        clear();
    }
}

/// Run `future` as `context`'s tenant outside the HTTP gate, e.g. for a
/// background job that was enqueued with an explicit tenant.
pub async fn run_as<F: Future>(context: RequestContext, future: F) -> Result<F::Output, TenantError> {
    scope(async move {
        set(context)?;
        let _guard = ClearGuard::new();
        Ok(future.await)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::context::{Resolution, ResolutionSource};
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::Mutex;
    use std::time::Duration;

    fn context(id: i64) -> RequestContext {
        RequestContext::new(
            Resolution {
                tenant_id: TenantId::Int(id),
                source: ResolutionSource::Header,
            },
            format!("req-{}", id),
            None,
        )
    }

    #[test]
    fn nothing_is_visible_outside_a_scope() {
        assert!(matches!(get(), Err(TenantError::NoActiveContext)));
        assert!(matches!(set(context(1)), Err(TenantError::ContextStoreUnavailable)));
        assert!(phase().is_none());
        assert!(!clear());
    }

    #[tokio::test]
    async fn set_get_clear_walks_the_lifecycle() {
        scope(async {
            assert_eq!(phase(), Some(LifecyclePhase::Unresolved));
            mark_resolved().unwrap();
            assert_eq!(phase(), Some(LifecyclePhase::Resolved));

            set(context(7)).unwrap();
            assert_eq!(phase(), Some(LifecyclePhase::Active));
            assert_eq!(current_tenant().unwrap(), TenantId::Int(7));

            assert!(clear());
            assert_eq!(phase(), Some(LifecyclePhase::Cleared));
            assert!(matches!(get(), Err(TenantError::NoActiveContext)));
        })
        .await;
    }

    #[tokio::test]
    async fn context_cannot_be_replaced() {
        scope(async {
            set(context(1)).unwrap();
            assert!(matches!(set(context(2)), Err(TenantError::ContextAlreadyActive)));
            assert_eq!(current_tenant().unwrap(), TenantId::Int(1));
        })
        .await;
    }

    #[tokio::test]
    async fn cleared_slot_cannot_be_reused() {
        scope(async {
            set(context(1)).unwrap();
            clear();
            assert!(matches!(
                set(context(2)),
                Err(TenantError::InvalidLifecycle { .. })
            ));
        })
        .await;
    }

    #[tokio::test]
    async fn sequential_scopes_start_empty() {
        scope(async {
            set(context(11)).unwrap();
        })
        .await;

        scope(async {
            assert_eq!(phase(), Some(LifecyclePhase::Unresolved));
            assert!(get().is_err());
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_are_isolated() {
        let handles: Vec<_> = (1..=64)
            .map(|id| {
                tokio::spawn(scope(async move {
                    set(context(id)).unwrap();
                    for _ in 0..20 {
                        tokio::task::yield_now().await;
                        assert_eq!(current_tenant().unwrap(), TenantId::Int(id));
                    }
                    clear();
                    id
                }))
            })
            .collect();

        for (expected, handle) in (1..=64).zip(handles) {
            assert_eq!(handle.await.unwrap(), expected);
        }
    }

    #[test]
    fn threads_are_isolated() {
        let handles: Vec<_> = (1..=8)
            .map(|id| {
                std::thread::spawn(move || {
                    sync_scope(|| {
                        set(context(id)).unwrap();
                        std::thread::sleep(Duration::from_millis(5));
                        current_tenant().unwrap()
                    })
                })
            })
            .collect();

        for (id, handle) in (1..=8).zip(handles) {
            assert_eq!(handle.join().unwrap(), TenantId::Int(id));
        }
    }

    struct DropObserver(Arc<Mutex<Option<(Option<LifecyclePhase>, bool)>>>);

    impl Drop for DropObserver {
        fn drop(&mut self) {
            *self.0.lock().unwrap() = Some((phase(), get().is_ok()));
        }
    }

    #[tokio::test]
    async fn cancellation_still_clears() {
        let seen = Arc::new(Mutex::new(None));
        let observer_seen = Arc::clone(&seen);

        let request = scope(async move {
            let _observer = DropObserver(observer_seen);
            set(context(5)).unwrap();
            let _guard = ClearGuard::new();
            std::future::pending::<()>().await;
        });

        let timed_out = tokio::time::timeout(Duration::from_millis(10), request).await;
        assert!(timed_out.is_err());

        let observed = seen.lock().unwrap().take();
        assert_eq!(observed, Some((Some(LifecyclePhase::Cleared), false)));
    }

    #[tokio::test]
    async fn panic_does_not_leak_into_next_request() {
        let crashed = AssertUnwindSafe(scope(async {
            set(context(9)).unwrap();
            let _guard = ClearGuard::new();
            panic!("handler blew up");
        }))
        .catch_unwind()
        .await;
        assert!(crashed.is_err());

        scope(async {
            assert!(matches!(get(), Err(TenantError::NoActiveContext)));
        })
        .await;
    }

    #[tokio::test]
    async fn run_as_installs_and_clears() {
        let tenant = run_as(context(21), async { current_tenant() }).await.unwrap();
        assert_eq!(tenant.unwrap(), TenantId::Int(21));
        assert!(get().is_err());
    }
}

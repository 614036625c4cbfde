use futures::channel::oneshot;
use futures::future::Shared;
use futures::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cancellation token that tells dependent tasks to stop.
///
/// Lifetimes form a tree. Cancelling a lifetime cancels all of its children
/// created with [Lifetime::child], but not its parent. Cloning a lifetime
/// returns a handle to the same lifetime.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<oneshot::Sender<()>>>,
    signal: Shared<oneshot::Receiver<()>>,
    parent: Option<Lifetime>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Create a lifetime that is cancelled when `self` is cancelled.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<Lifetime>) -> Self {
        let (trigger, signal) = oneshot::channel();
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal: signal.shared(),
                parent,
            }),
        }
    }

    /// Cancel this lifetime and all its children. Calling this more than once
    /// has no effect.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let trigger = match self.inner.trigger.lock() {
            Ok(mut trigger) => trigger.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // Dropping the sender wakes all waiters
        drop(trigger);
    }

    pub fn is_cancelled(&self) -> bool {
        self.ancestry()
            .any(|lifetime| lifetime.inner.cancelled.load(Ordering::SeqCst))
    }

    /// Resolves once this lifetime or one of its ancestors is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let signals = self
            .ancestry()
            .map(|lifetime| lifetime.inner.signal.clone())
            .collect::<Vec<_>>();
        let lifetime = self.clone();
        async move {
            let _lifetime = lifetime;
            futures::future::select_all(signals).await;
        }
    }

    /// Returns true if both handles refer to the same lifetime.
    pub fn ptr_eq(&self, other: &Lifetime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ancestry(&self) -> impl Iterator<Item = &Lifetime> {
        std::iter::successors(Some(self), |&lifetime| lifetime.inner.parent.as_ref())
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifetime")
            .field("cancelled", &self.is_cancelled())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[async_std::test]
    async fn cancel_wakes_waiter() {
        let lifetime = Lifetime::new();
        let cancelled = async_std::task::spawn(lifetime.cancelled());
        assert!(!lifetime.is_cancelled());
        lifetime.cancel();
        assert!(lifetime.is_cancelled());
        async_std::future::timeout(Duration::from_secs(1), cancelled)
            .await
            .unwrap();
    }

    #[async_std::test]
    async fn parent_cancels_child() {
        let parent = Lifetime::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        async_std::future::timeout(Duration::from_secs(1), grandchild.cancelled())
            .await
            .unwrap();
    }

    #[async_std::test]
    async fn child_does_not_cancel_parent() {
        let parent = Lifetime::new();
        let child = parent.child();
        child.cancel();
        child.cancel();
        assert!(!parent.is_cancelled());
        let result =
            async_std::future::timeout(Duration::from_millis(20), parent.cancelled()).await;
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn waiting_keeps_lifetime() {
        let cancelled = Lifetime::new().cancelled();
        let result = async_std::future::timeout(Duration::from_millis(20), cancelled).await;
        assert!(result.is_err());
    }

    #[test]
    fn clones_are_equal() {
        let lifetime = Lifetime::new();
        assert!(lifetime.ptr_eq(&lifetime.clone()));
        assert!(!lifetime.ptr_eq(&lifetime.child()));
    }
}

//! Write-once "open the browser at most once" latch (§3 OpenBrowserGate).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct OpenBrowserGate(Arc<OnceCell<()>>);

impl OpenBrowserGate {
    pub fn new() -> Self {
        Self(Arc::new(OnceCell::new()))
    }

    /// Runs `action` on the first call across the gate's lifetime, including
    /// across reconnect iterations; subsequent calls are no-ops. The gate is
    /// never reset.
    pub async fn fire<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.0.get_or_init(|| async move { action().await }).await;
    }
}

impl Default for OpenBrowserGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use super::*;

    #[tokio::test]
    async fn fires_exactly_once_across_calls() {
        let gate = OpenBrowserGate::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let count = count.clone();
            gate.fire(|| async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

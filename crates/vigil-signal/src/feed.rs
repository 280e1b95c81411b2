//! Live, snapshot-replacing views over a store collection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vigil_common::{Document, Error, Result};

use crate::store::{Subscription, SubscriptionGuard};

/// The latest projected snapshot of a collection.
///
/// The exposed list is always exactly the most recent snapshot. When the
/// underlying subscription fails, `on_error` is called once and the feed
/// freezes at its last value until the caller builds a new one.
pub struct LiveFeed<T> {
    rx: watch::Receiver<Vec<T>>,
    frozen: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    guard: Option<SubscriptionGuard>,
    task: Option<JoinHandle<()>>,
}

impl<T> LiveFeed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fails with `InvalidState` outside a tokio runtime; the subscription
    /// is released in that case.
    pub(crate) fn spawn<P, E>(
        label: &'static str,
        subscription: Subscription<Vec<Document>>,
        project: P,
        mut on_error: E,
    ) -> Result<Self>
    where
        P: Fn(&[Document]) -> Vec<T> + Send + 'static,
        E: FnMut(Error) + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|_| Error::invalid_state("follow feed", "outside a tokio runtime"))?;
        let (mut snapshots, guard) = subscription.into_parts();
        let (tx, rx) = watch::channel(Vec::new());
        let frozen = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        let task = {
            let frozen = frozen.clone();
            let closing = closing.clone();
            runtime.spawn(async move {
                while let Some(event) = snapshots.recv().await {
                    match event {
                        Ok(docs) => {
                            let items = project(&docs);
                            debug!(feed = label, count = items.len(), "snapshot");
                            tx.send_replace(items);
                        }
                        Err(err) => {
                            warn!(feed = label, error = %err, "subscription failed, feed frozen");
                            frozen.store(true, Ordering::SeqCst);
                            on_error(err);
                            return;
                        }
                    }
                }
                if !closing.load(Ordering::SeqCst) {
                    warn!(feed = label, "store closed the subscription, feed frozen");
                    frozen.store(true, Ordering::SeqCst);
                    on_error(Error::subscription(format!("{label} subscription closed")));
                }
            })
        };

        Ok(Self {
            rx,
            frozen,
            closing,
            guard: Some(guard),
            task: Some(task),
        })
    }

    pub fn current(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. Fails once the feed is frozen or released.
    pub async fn changed(&mut self) -> Result<Vec<T>> {
        self.rx
            .changed()
            .await
            .map_err(|_| Error::subscription("feed is no longer updating"))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the current snapshot satisfies `pred`.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&[T]) -> bool) -> Result<Vec<T>> {
        self.rx
            .wait_for(|items| pred(items.as_slice()))
            .await
            .map(|items| items.clone())
            .map_err(|_| Error::subscription("feed is no longer updating"))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}

impl<T> LiveFeed<T> {
    /// Release the store subscription. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(mut guard) = self.guard.take() {
            guard.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for LiveFeed<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

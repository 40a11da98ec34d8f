//! Concurrency primitives shared by every fan-out
//!
//! - [`ErrorGroup`]: a set of tasks where the first error wins, cancels
//!   its peers and is returned from [`ErrorGroup::wait`]
//! - [`SharedReceiver`]: a multi-consumer view over a bounded channel
//! - [`spawn_feeder`]: publishes a list of work items to a shared queue

use crate::error::{Result, ShardPipeError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Group of tasks sharing one cancellation token
pub struct ErrorGroup {
    tasks: JoinSet<Result<()>>,
    token: CancellationToken,
}

impl ErrorGroup {
    /// Create a group with a fresh cancellation token
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a group whose token is a child of `parent`
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token,
        }
    }

    /// Token cancelled as soon as any task fails
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task into the group; its failure cancels the group token
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            let result = task.await;
            if result.is_err() {
                token.cancel();
            }
            result
        });
    }

    /// Number of tasks not yet joined
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task and return the first error, if any
    pub async fn wait(mut self) -> Result<()> {
        let mut first: Option<ShardPipeError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => ShardPipeError::from(join_err),
            };
            if first.is_none() {
                self.token.cancel();
                first = Some(err);
            } else {
                debug!(error = %err, "discarding error from cancelled peer");
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for ErrorGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a bounded channel that many workers can draw from
///
/// Draws are serialized, so no two workers ever receive the same item.
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Receive the next item; `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Receive the next item unless `token` is cancelled first
    pub async fn recv_or_cancel(&self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = self.recv() => item,
        }
    }

    /// Close the channel so that producers stop, keeping buffered items
    pub async fn close(&self) {
        self.inner.lock().await.close();
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Create a bounded channel with a shareable receiving half
pub fn shared_channel<T>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, SharedReceiver::new(rx))
}

/// Send `item`, giving up if `token` is cancelled or all receivers are gone.
///
/// Returns `false` when the item could not be delivered.
pub async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, item: T, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Publish `items` in order to a bounded shared queue from a background task.
///
/// The queue closes once every item has been sent, or early on cancellation.
pub fn spawn_feeder<T>(items: Vec<T>, capacity: usize, token: CancellationToken) -> SharedReceiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = shared_channel(capacity);
    tokio::spawn(async move {
        for item in items {
            if !send_or_cancel(&tx, item, &token).await {
                return;
            }
        }
    });
    rx
}

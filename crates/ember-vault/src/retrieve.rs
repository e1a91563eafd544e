use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use ember_store::{ByteStream, ClaimToken, ObjectStore, ReadSource, StoreResult};
use ember_types::{ObjectId, RetentionMode};
use futures::Stream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{VaultError, VaultResult};

/// File name suggested to downloaders. Payloads are opaque, usually
/// client-side encrypted, so no original name is kept.
pub const SUGGESTED_FILENAME: &str = "encrypted.bin";

/// An object resolved for download.
pub struct Retrieval {
    pub id: ObjectId,
    pub mode: RetentionMode,
    pub size: u64,
    pub filename: &'static str,
    pub stream: ByteStream,
}

impl fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrieval")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Decides whether and how an identifier's payload is served.
///
/// Normal objects are opened for shared reading. Burn objects go through the
/// store's atomic take, so of any number of concurrent callers exactly one
/// gets a stream and the rest see `NotFound`. The winner's stream carries a
/// guard that deletes the claimed bytes once the stream is dropped,
/// whether the download finished or was abandoned.
pub struct RetrievalArbiter {
    store: Arc<dyn ObjectStore>,
    burn_grace: Duration,
    pending: Arc<PendingDeletions>,
}

impl RetrievalArbiter {
    pub fn new(store: Arc<dyn ObjectStore>, burn_grace: Duration) -> Self {
        Self {
            store,
            burn_grace,
            pending: Arc::default(),
        }
    }

    /// Number of burn deletions scheduled but not yet finished.
    pub fn pending_deletions(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every scheduled burn deletion has run. Short-lived
    /// processes call this before exiting so claimed bytes do not outlive
    /// the runtime.
    pub async fn wait_for_deletions(&self) {
        self.pending.wait_idle().await
    }

    /// Resolve an identifier as received from a client. Malformed input is
    /// reported as `NotFound`, same as any other miss.
    pub async fn retrieve(&self, raw_id: &str) -> VaultResult<Retrieval> {
        let id = ObjectId::parse(raw_id).map_err(|_| VaultError::NotFound)?;
        self.retrieve_id(&id).await
    }

    pub async fn retrieve_id(&self, id: &ObjectId) -> VaultResult<Retrieval> {
        match self.store.exists(id).await? {
            None => Err(VaultError::NotFound),
            Some(RetentionMode::Normal) => {
                let source = self.store.open_read(id).await?;
                debug!(object_id = %id.short(), size = source.size, "serving normal object");
                Ok(Self::into_retrieval(source))
            }
            Some(RetentionMode::Burn) => {
                // Losing a take race surfaces as NotFound through the From impl.
                let claim = self.store.take(id).await?;
                debug!(object_id = %id, size = claim.source.size, "serving burn object");
                let guard = BurnGuard {
                    store: Arc::clone(&self.store),
                    token: Some(claim.token),
                    grace: self.burn_grace,
                    pending: Arc::clone(&self.pending),
                    completed: false,
                };
                let ReadSource {
                    id,
                    mode,
                    size,
                    stream,
                } = claim.source;
                Ok(Retrieval {
                    id,
                    mode,
                    size,
                    filename: SUGGESTED_FILENAME,
                    stream: Box::pin(BurnStream {
                        inner: stream,
                        guard,
                    }),
                })
            }
        }
    }

    fn into_retrieval(source: ReadSource) -> Retrieval {
        Retrieval {
            id: source.id,
            mode: source.mode,
            size: source.size,
            filename: SUGGESTED_FILENAME,
            stream: source.stream,
        }
    }
}

#[derive(Default)]
struct PendingDeletions {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingDeletions {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Schedules deletion of a claimed burn object when dropped.
///
/// Deletion runs on the tokio runtime after the grace delay and does not
/// hold up the response. Without a runtime the claimed file is left for the
/// sweeper's stale-artifact purge.
struct BurnGuard {
    store: Arc<dyn ObjectStore>,
    token: Option<ClaimToken>,
    grace: Duration,
    pending: Arc<PendingDeletions>,
    completed: bool,
}

impl Drop for BurnGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if !self.completed {
            debug!(object_id = %token.id(), "burn download abandoned; object consumed anyway");
        }

        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                pending.start();
                handle.spawn(async move {
                    if !grace.is_zero() {
                        tokio::time::sleep(grace).await;
                    }
                    match store.discard_claim(&token).await {
                        Ok(()) => debug!(object_id = %token.id(), "burn object deleted"),
                        Err(e) => {
                            warn!(object_id = %token.id().short(), error = %e, "failed to delete burn object")
                        }
                    }
                    pending.finish();
                });
            }
            Err(_) => {
                warn!(object_id = %token.id().short(), "no runtime to delete burn object; leaving it to the sweeper");
            }
        }
    }
}

/// Payload stream of a burn object; owns the guard so deletion follows the
/// stream's lifetime.
struct BurnStream {
    inner: ByteStream,
    guard: BurnGuard,
}

impl Stream for BurnStream {
    type Item = StoreResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            this.guard.completed = true;
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ember_types::{ObjectId, ObjectInfo, RetentionMode};
use futures::Stream;

use crate::error::StoreResult;

/// A boxed stream of payload bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// A boxed stream of object metadata, produced by [`ObjectStore::list_all`].
pub type InfoStream = Pin<Box<dyn Stream<Item = StoreResult<ObjectInfo>> + Send>>;

/// An opened object, ready to be streamed to a caller.
pub struct ReadSource {
    pub id: ObjectId,
    pub mode: RetentionMode,
    /// Payload size in bytes.
    pub size: u64,
    pub stream: ByteStream,
}

impl fmt::Debug for ReadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSource")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Receipt for a burn object removed from the namespace by
/// [`ObjectStore::take`]. The bytes stay on the backend until the token is
/// handed to [`ObjectStore::discard_claim`] or the stale-artifact purge runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimToken {
    id: ObjectId,
    key: String,
}

impl ClaimToken {
    pub fn new(id: ObjectId, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Backend-specific location of the claimed bytes.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Result of a successful [`ObjectStore::take`].
#[derive(Debug)]
pub struct Claim {
    pub source: ReadSource,
    pub token: ClaimToken,
}

/// Staged write for a single object.
///
/// Nothing written through a sink is visible to `exists`, `open_read`, `take`
/// or `list_all` until [`WriteSink::commit`] returns. Dropping a sink without
/// committing has the same effect as [`WriteSink::abort`].
#[async_trait]
pub trait WriteSink: Send {
    /// Append a chunk of payload bytes.
    async fn write(&mut self, data: Bytes) -> StoreResult<()>;

    /// Total bytes accepted so far.
    fn bytes_written(&self) -> u64;

    /// Atomically publish the object under its id.
    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo>;

    /// Discard everything written so far, leaving no trace.
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

/// Storage for ephemeral objects.
///
/// All implementations must satisfy these invariants:
/// - A staged write is invisible until committed, and commit is atomic with
///   respect to concurrent readers.
/// - Burn objects are never returned by `open_read`; the only way to read one
///   is `take`, which removes it from the namespace in the same step. Of any
///   number of concurrent `take` calls for one id, exactly one succeeds.
/// - `delete` is idempotent and never touches other ids.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Open a staging location for `id`.
    ///
    /// Fails with `Unavailable` if the backing medium cannot be opened.
    async fn begin_write(&self, id: &ObjectId, mode: RetentionMode)
        -> StoreResult<Box<dyn WriteSink>>;

    /// Which kind of committed object `id` names, if any.
    ///
    /// If both forms were somehow present, `Burn` wins.
    async fn exists(&self, id: &ObjectId) -> StoreResult<Option<RetentionMode>>;

    /// Open a committed normal object for reading.
    async fn open_read(&self, id: &ObjectId) -> StoreResult<ReadSource>;

    /// Atomically remove a committed burn object from the namespace and open
    /// it for reading. Losers of a race observe `NotFound`.
    async fn take(&self, id: &ObjectId) -> StoreResult<Claim>;

    /// Release the bytes held by a claim. Idempotent.
    async fn discard_claim(&self, token: &ClaimToken) -> StoreResult<()>;

    /// Delete a committed object of either mode. Returns `true` if something
    /// was removed; a missing object is not an error.
    async fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Lazily list committed objects.
    fn list_all(&self) -> InfoStream;

    /// Remove staging files and claimed burn payloads last modified more
    /// than `older_than` ago. Returns the number of artifacts removed.
    async fn purge_stale_artifacts(&self, older_than: Duration) -> StoreResult<usize>;

    /// Static name of this backend, for logs.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use ember_types::{ObjectId, ObjectInfo, RetentionMode};
use uuid::Uuid;

use super::STREAM_CHUNK_SIZE;
use crate::error::{StoreError, StoreResult};
use crate::traits::{ByteStream, Claim, ClaimToken, InfoStream, ObjectStore, ReadSource, WriteSink};

#[derive(Clone)]
struct MemObject {
    mode: RetentionMode,
    created_at: DateTime<Utc>,
    data: Bytes,
}

impl MemObject {
    fn info(&self, id: ObjectId) -> ObjectInfo {
        ObjectInfo {
            id,
            mode: self.mode,
            created_at: self.created_at,
            size: self.data.len() as u64,
        }
    }
}

#[derive(Default)]
struct MemState {
    objects: HashMap<ObjectId, MemObject>,
    /// Taken burn objects, keyed by claim key.
    claimed: HashMap<String, (DateTime<Utc>, Bytes)>,
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Staged bytes live in the sink itself,
/// so they cannot be observed before commit; commit and take each happen
/// under a single write lock.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<MemState>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed objects.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").objects.len()
    }

    /// Returns `true` if no objects are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of taken burn objects whose bytes have not been discarded.
    pub fn claimed_len(&self) -> usize {
        self.state.read().expect("lock poisoned").claimed.len()
    }

    /// Rewrite the creation time of a committed object. Returns `false` if
    /// the object does not exist. Used to exercise expiry.
    pub fn backdate(&self, id: &ObjectId, created_at: DateTime<Utc>) -> bool {
        let mut state = self.state.write().expect("lock poisoned");
        match state.objects.get_mut(id) {
            Some(object) => {
                object.created_at = created_at;
                true
            }
            None => false,
        }
    }
}

fn chunked(data: Bytes) -> ByteStream {
    let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
        .step_by(STREAM_CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..data.len().min(start + STREAM_CHUNK_SIZE))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn begin_write(
        &self,
        id: &ObjectId,
        mode: RetentionMode,
    ) -> StoreResult<Box<dyn WriteSink>> {
        Ok(Box::new(InMemorySink {
            id: *id,
            mode,
            buf: BytesMut::new(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn exists(&self, id: &ObjectId) -> StoreResult<Option<RetentionMode>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.objects.get(id).map(|object| object.mode))
    }

    async fn open_read(&self, id: &ObjectId) -> StoreResult<ReadSource> {
        let state = self.state.read().expect("lock poisoned");
        match state.objects.get(id) {
            Some(object) if object.mode == RetentionMode::Normal => Ok(ReadSource {
                id: *id,
                mode: RetentionMode::Normal,
                size: object.data.len() as u64,
                stream: chunked(object.data.clone()),
            }),
            _ => Err(StoreError::NotFound(*id)),
        }
    }

    async fn take(&self, id: &ObjectId) -> StoreResult<Claim> {
        let mut state = self.state.write().expect("lock poisoned");
        match state.objects.get(id) {
            Some(object) if object.mode == RetentionMode::Burn => {}
            _ => return Err(StoreError::NotFound(*id)),
        }
        let object = state
            .objects
            .remove(id)
            .ok_or(StoreError::NotFound(*id))?;
        let key = format!("{id}.{}", Uuid::new_v4().simple());
        state
            .claimed
            .insert(key.clone(), (object.created_at, object.data.clone()));

        Ok(Claim {
            source: ReadSource {
                id: *id,
                mode: RetentionMode::Burn,
                size: object.data.len() as u64,
                stream: chunked(object.data),
            },
            token: ClaimToken::new(*id, key),
        })
    }

    async fn discard_claim(&self, token: &ClaimToken) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.claimed.remove(token.key());
        Ok(())
    }

    async fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().expect("lock poisoned");
        Ok(state.objects.remove(id).is_some())
    }

    fn list_all(&self) -> InfoStream {
        // Snapshot under the lock; the stream itself holds no lock.
        let infos: Vec<StoreResult<ObjectInfo>> = {
            let state = self.state.read().expect("lock poisoned");
            state
                .objects
                .iter()
                .map(|(id, object)| Ok(object.info(*id)))
                .collect()
        };
        Box::pin(futures::stream::iter(infos))
    }

    async fn purge_stale_artifacts(&self, older_than: Duration) -> StoreResult<usize> {
        let cutoff = match chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };
        let mut state = self.state.write().expect("lock poisoned");
        let before = state.claimed.len();
        state.claimed.retain(|_, (created_at, _)| *created_at > cutoff);
        Ok(before - state.claimed.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .field("claimed_count", &self.claimed_len())
            .finish()
    }
}

struct InMemorySink {
    id: ObjectId,
    mode: RetentionMode,
    buf: BytesMut,
    state: Arc<RwLock<MemState>>,
}

#[async_trait]
impl WriteSink for InMemorySink {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.objects.contains_key(&self.id) {
            return Err(StoreError::AlreadyExists(self.id));
        }
        let object = MemObject {
            mode: self.mode,
            created_at: Utc::now(),
            data: self.buf.freeze(),
        };
        let info = object.info(self.id);
        state.objects.insert(self.id, object);
        Ok(info)
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

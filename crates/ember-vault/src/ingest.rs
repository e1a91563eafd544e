use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use ember_store::{ObjectStore, StoreError, WriteSink};
use ember_types::{ObjectId, RetentionMode};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{VaultError, VaultResult};

/// Outcome of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub id: ObjectId,
    pub mode: RetentionMode,
    /// Bytes actually stored.
    pub size: u64,
}

/// Streams uploads into the store, enforcing the size bound on the bytes
/// that actually arrive.
///
/// A declared length is only used to reject obviously oversized uploads
/// before any store resource is opened; it is never trusted as an upper
/// bound. On every failure path the staged write is aborted before the error
/// is returned. If the ingest future itself is dropped mid-stream, the sink's
/// own drop handling removes the staged bytes.
pub struct IngestionGate {
    store: Arc<dyn ObjectStore>,
    max_file_size: u64,
}

impl IngestionGate {
    pub fn new(store: Arc<dyn ObjectStore>, max_file_size: u64) -> Self {
        Self {
            store,
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Store `stream` under a fresh identifier.
    pub async fn ingest<S, E>(
        &self,
        stream: S,
        declared_size: Option<u64>,
        mode: RetentionMode,
    ) -> VaultResult<IngestReceipt>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        if let Some(declared) = declared_size {
            if declared > self.max_file_size {
                debug!(declared, limit = self.max_file_size, "upload rejected by declared size");
                return Err(self.too_large());
            }
        }

        let id = ObjectId::generate().map_err(|e| VaultError::Internal(e.to_string()))?;
        let mut sink = self.store.begin_write(&id, mode).await.map_err(VaultError::from)?;

        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let reason = e.to_string();
                    abort(sink, &id).await;
                    warn!(object_id = %id.short(), error = %reason, "upload stream failed");
                    return Err(VaultError::IngestFailed(reason));
                }
            };

            if sink.bytes_written() + chunk.len() as u64 > self.max_file_size {
                let received = sink.bytes_written() + chunk.len() as u64;
                abort(sink, &id).await;
                info!(object_id = %id.short(), received, limit = self.max_file_size, "upload exceeded size limit");
                return Err(self.too_large());
            }

            if let Err(e) = sink.write(chunk).await {
                let reason = e.to_string();
                abort(sink, &id).await;
                warn!(object_id = %id.short(), error = %reason, "failed to write upload chunk");
                return Err(VaultError::IngestFailed(reason));
            }
        }

        let info = sink.commit().await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => VaultError::from(e),
            other => VaultError::IngestFailed(other.to_string()),
        })?;

        info!(object_id = %id.short(), mode = %mode, bytes = info.size, "object ingested");
        Ok(IngestReceipt {
            id,
            mode,
            size: info.size,
        })
    }

    fn too_large(&self) -> VaultError {
        VaultError::TooLarge {
            limit: self.max_file_size,
        }
    }
}

async fn abort(sink: Box<dyn WriteSink>, id: &ObjectId) {
    if let Err(e) = sink.abort().await {
        warn!(object_id = %id.short(), error = %e, "failed to abort staged write");
    }
}

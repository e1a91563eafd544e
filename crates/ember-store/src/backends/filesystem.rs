//! Local filesystem storage backend.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<id>.bin            committed normal object
//! <root>/<id>.burn.bin       committed burn object
//! <root>/.incoming/...       staged writes, invisible until renamed into <root>
//! <root>/.claimed/<id>.<n>   burn objects taken by a reader, awaiting deletion
//! ```
//!
//! Commit and take are both a single `rename`, which is atomic on one
//! filesystem; that is the only synchronisation the backend needs.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ember_types::{ObjectId, ObjectInfo, RetentionMode};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::STREAM_CHUNK_SIZE;
use crate::error::{StoreError, StoreResult};
use crate::traits::{ByteStream, Claim, ClaimToken, InfoStream, ObjectStore, ReadSource, WriteSink};

const INCOMING_DIR: &str = ".incoming";
const CLAIMED_DIR: &str = ".claimed";

/// One-file-per-object store rooted at a local directory.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.clone(), root.join(INCOMING_DIR), root.join(CLAIMED_DIR)] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the committed file for `id` in `mode`.
    pub fn object_path(&self, id: &ObjectId, mode: RetentionMode) -> PathBuf {
        self.root.join(mode.file_name(id))
    }

    fn claimed_path(&self, key: &str) -> PathBuf {
        self.root.join(CLAIMED_DIR).join(key)
    }

    fn nonce() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

fn not_found_or_io(err: io::Error, id: &ObjectId) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(*id)
    } else {
        StoreError::Io(err)
    }
}

fn modified_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    // Without an mtime the object is treated as brand new rather than expired.
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Stream a file in fixed-size chunks instead of loading it into memory.
fn file_stream(file: fs::File) -> ByteStream {
    let stream = async_stream::try_stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    Box::pin(stream)
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn begin_write(
        &self,
        id: &ObjectId,
        mode: RetentionMode,
    ) -> StoreResult<Box<dyn WriteSink>> {
        let temp_path = self
            .root
            .join(INCOMING_DIR)
            .join(format!("{}.{}", mode.file_name(id), Self::nonce()));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot open staging file: {e}")))?;

        Ok(Box::new(FilesystemSink {
            id: *id,
            mode,
            file: Some(file),
            temp_path,
            final_path: self.object_path(id, mode),
            sibling_path: self.object_path(
                id,
                match mode {
                    RetentionMode::Normal => RetentionMode::Burn,
                    RetentionMode::Burn => RetentionMode::Normal,
                },
            ),
            bytes_written: 0,
            done: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, id: &ObjectId) -> StoreResult<Option<RetentionMode>> {
        for mode in [RetentionMode::Burn, RetentionMode::Normal] {
            if fs::try_exists(self.object_path(id, mode)).await? {
                return Ok(Some(mode));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open_read(&self, id: &ObjectId) -> StoreResult<ReadSource> {
        let path = self.object_path(id, RetentionMode::Normal);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        let size = file.metadata().await?.len();
        Ok(ReadSource {
            id: *id,
            mode: RetentionMode::Normal,
            size,
            stream: file_stream(file),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn take(&self, id: &ObjectId) -> StoreResult<Claim> {
        let key = format!("{id}.{}", Self::nonce());
        let claimed_path = self.claimed_path(&key);

        // The rename is the consume step: once it returns, no other caller
        // can find the object under its id.
        fs::rename(self.object_path(id, RetentionMode::Burn), &claimed_path)
            .await
            .map_err(|e| not_found_or_io(e, id))?;
        debug!(object_id = %id, "burn object claimed");

        let opened = async {
            let file = fs::File::open(&claimed_path).await?;
            let size = file.metadata().await?.len();
            Ok::<_, io::Error>((file, size))
        }
        .await;
        let (file, size) = match opened {
            Ok(opened) => opened,
            // A stale-artifact purge may remove the claim before it is opened;
            // the object is gone either way.
            Err(e) => {
                let _ = fs::remove_file(&claimed_path).await;
                return Err(not_found_or_io(e, id));
            }
        };

        Ok(Claim {
            source: ReadSource {
                id: *id,
                mode: RetentionMode::Burn,
                size,
                stream: file_stream(file),
            },
            token: ClaimToken::new(*id, key),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn discard_claim(&self, token: &ClaimToken) -> StoreResult<()> {
        let key = token.key();
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("malformed claim key: {key:?}"),
            )));
        }
        match fs::remove_file(self.claimed_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut removed = false;
        for mode in [RetentionMode::Burn, RetentionMode::Normal] {
            match fs::remove_file(self.object_path(id, mode)).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(removed)
    }

    fn list_all(&self) -> InfoStream {
        let root = self.root.clone();
        let stream = async_stream::try_stream! {
            let mut entries = fs::read_dir(&root).await?;
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks, so links are skipped.
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let parsed = entry
                    .file_name()
                    .to_str()
                    .and_then(RetentionMode::parse_file_name);
                let (id, mode) = match parsed {
                    Some(parsed) => parsed,
                    None => continue,
                };
                // Deleted between readdir and stat: no longer ours to report.
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => Err(StoreError::Io(e))?,
                };
                yield ObjectInfo {
                    id,
                    mode,
                    created_at: modified_at(&metadata),
                    size: metadata.len(),
                };
            }
        };
        Box::pin(stream)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn purge_stale_artifacts(&self, older_than: Duration) -> StoreResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut purged = 0;

        for dir in [INCOMING_DIR, CLAIMED_DIR] {
            let mut entries = fs::read_dir(self.root.join(dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StoreError::Io(e)),
                };
                if !metadata.is_file() {
                    continue;
                }
                if metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH) > cutoff {
                    continue;
                }
                match fs::remove_file(entry.path()).await {
                    Ok(()) => purged += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to purge stale artifact"),
                }
            }
        }

        Ok(purged)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StoreResult<()> {
        let metadata = fs::metadata(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage root not accessible: {e}")))?;
        if !metadata.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "storage root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Staged write into `.incoming/`.
struct FilesystemSink {
    id: ObjectId,
    mode: RetentionMode,
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    /// Committed path of the same id in the other mode.
    sibling_path: PathBuf,
    bytes_written: u64,
    done: bool,
}

#[async_trait]
impl WriteSink for FilesystemSink {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::Io(io::Error::other("write to a finished sink")))?;
        file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<ObjectInfo> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        if fs::try_exists(&self.final_path).await? || fs::try_exists(&self.sibling_path).await? {
            return Err(StoreError::AlreadyExists(self.id));
        }
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.done = true;

        let metadata = fs::metadata(&self.final_path).await?;
        debug!(object_id = %self.id, mode = %self.mode, bytes = self.bytes_written, "object committed");
        Ok(ObjectInfo {
            id: self.id,
            mode: self.mode,
            created_at: modified_at(&metadata),
            size: metadata.len(),
        })
    }

    async fn abort(mut self: Box<Self>) -> StoreResult<()> {
        drop(self.file.take());
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        self.done = true;
        debug!(object_id = %self.id, bytes = self.bytes_written, "staged write aborted");
        Ok(())
    }
}

impl Drop for FilesystemSink {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.temp_path.display(), error = %e, "failed to remove abandoned staging file");
            }
        }
    }
}

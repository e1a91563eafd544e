pub mod filesystem;
pub mod memory;

/// Chunk size for streaming reads (64 KiB).
pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;

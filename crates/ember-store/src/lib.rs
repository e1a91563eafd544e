//! Object storage for Ember.
//!
//! The store keeps opaque payloads under random identifiers and never looks
//! inside them. Each object is tagged with a [`RetentionMode`]: normal objects
//! are readable until the expiry sweeper removes them, burn objects can only
//! be taken once.
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`FilesystemStore`] -- one file per object, `<id>.bin` / `<id>.burn.bin`
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Writes are staged out of sight and become visible only on commit,
//!    atomically (rename on the filesystem backend).
//! 2. A burn object is reachable only through [`ObjectStore::take`], which is
//!    a single atomic step: exactly one concurrent caller wins.
//! 3. Deletes are idempotent.
//! 4. Listings are lazy and only eventually consistent with writers.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemStore;
pub use backends::memory::InMemoryObjectStore;
pub use error::{StoreError, StoreResult};
pub use traits::{ByteStream, Claim, ClaimToken, InfoStream, ObjectStore, ReadSource, WriteSink};

#[doc(no_inline)]
pub use ember_types::{ObjectId, ObjectInfo, RetentionMode};

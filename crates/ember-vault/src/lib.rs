//! Ephemeral object lifecycle for Ember.
//!
//! Clients upload opaque payloads and get back a random identifier. A payload
//! is either *normal* (downloadable until its TTL elapses) or *burn*
//! (downloadable exactly once). This crate owns the rules around that
//! lifecycle:
//!
//! - [`IngestionGate`] streams uploads into the store and enforces the size
//!   bound on actual bytes, aborting staged writes on any failure.
//! - [`RetrievalArbiter`] serves normal objects freely and hands each burn
//!   object to exactly one caller, deleting it after the stream ends.
//! - [`ExpirySweeper`] deletes objects past their TTL on a fixed interval.
//! - [`Vault`] ties the three to one store.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use ember_store::InMemoryObjectStore;
//! use ember_vault::{Vault, VaultConfig, VaultError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let vault = Vault::new(Arc::new(InMemoryObjectStore::new()), VaultConfig::default()).unwrap();
//! let payload = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"secret"))]);
//! let receipt = vault.ingest(payload, None, true).await.unwrap();
//!
//! let first = vault.retrieve(&receipt.id.to_string()).await;
//! assert!(first.is_ok());
//! let second = vault.retrieve(&receipt.id.to_string()).await;
//! assert!(matches!(second, Err(VaultError::NotFound)));
//! # });
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod retrieve;
pub mod sweeper;
pub mod vault;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use ingest::{IngestReceipt, IngestionGate};
pub use retrieve::{Retrieval, RetrievalArbiter, SUGGESTED_FILENAME};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
pub use vault::Vault;

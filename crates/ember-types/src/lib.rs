//! Foundation types for Ember, an ephemeral anonymous blob store.
//!
//! Every other Ember crate depends on `ember-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: unguessable random identifier issued at upload time
//! - [`RetentionMode`]: `Normal` (kept until expiry) or `Burn` (served once)
//! - [`ObjectInfo`]: metadata the expiry sweeper works from

pub mod error;
pub mod id;
pub mod info;
pub mod mode;

pub use error::TypeError;
pub use id::ObjectId;
pub use info::ObjectInfo;
pub use mode::RetentionMode;

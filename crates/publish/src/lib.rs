//! Artifact publishing for Ferry.
//!
//! A publish stores the artifact under a fresh timestamped key, then repoints
//! a fixed alias key at it by copy-then-replace. Every write carries the
//! artifact's fingerprint and publisher identity as object metadata.

pub mod error;
pub mod identity;
pub mod publisher;

pub use error::{PublishError, PublishResult};
pub use identity::{IdentityProvider, LocalIdentity, StaticIdentity, StsIdentity};
pub use publisher::{PruneReport, Publisher};

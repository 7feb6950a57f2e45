//! forksync-state: persistence layer for forksync
//!
//! This crate owns everything that has to survive a process restart: the
//! durable key-value collaborator used by the Repository State Store and the
//! Analysis Cache, content digests used as stable keys, and the record types
//! written through it.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic writes, explicit TTLs, and surfacing corruption instead of
//! crashing on it.
//!
//! ## Key Components
//!
//! - [`KvStore`]: namespaced byte storage with an optional TTL per write
//! - [`FsKvStore`]: filesystem backend (one file per key, persist-by-rename)
//! - [`fakes::MemoryKvStore`]: in-memory backend for tests
//! - [`TrackedRepository`] / [`SyncResult`]: persisted fork records
//! - [`Contribution`]: persisted contribution history

mod error;
pub mod fakes;
mod fs_store;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsKvStore;
pub use schema::{
    Contribution, ContributionKind, ContributionState, RepoId, SyncErrorDetail, SyncErrorKind,
    SyncOutcome, SyncResult, TrackedRepository,
};
pub use storage_traits::{ContentDigest, KvStore, StorageResult};

// src/store/mod.rs

//! Client side of the distributed key/value store.
//!
//! The supervisor only needs two leader-required operations, `get` and
//! `put`, to persist one-time coordination flags ("cluster already
//! provisioned"). The real store is an external collaborator; this module
//! provides the trait plus two local implementations:
//!
//! - [`MemoryStore`]: process-local map, used by default and in tests.
//! - [`FileStore`]: TOML file, lets single-node setups keep flags across
//!   supervisor restarts.
//!
//! [`flag`] layers the retry policy on top of the raw client.

pub mod file;
pub mod flag;
pub mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use flag::IdempotencyFlag;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has no quorum leader yet; leader-required requests fail.
    #[error("store has no leader")]
    NoLeader,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store data is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::NoLeader | StoreError::Unavailable(_))
    }
}

/// Leader-required reads and writes against the store.
#[async_trait]
pub trait KvStore: Send + Sync + Debug {
    /// `Ok(None)` means the key has definitively no value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

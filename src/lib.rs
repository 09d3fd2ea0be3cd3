//! # spv-relay
//!
//! A Bitcoin SPV relay core: a pure validation engine over block
//! headers, Merkle inclusion proofs and raw transactions.
//!
//! The crate maintains a tamper-resistant model of the Bitcoin header
//! chain without trusting any single data source. Submitters feed it
//! raw 80-byte headers; it validates linkage, proof of work and
//! difficulty retargeting exactly as Bitcoin consensus does, tracks
//! competing forks by cumulative work, and answers confirmation and
//! transaction-inclusion queries for downstream bridge logic.
//!
//! ## Design
//!
//! - Pure and synchronous: no I/O, no retries, no timeouts. Headers,
//!   proofs and transaction bytes are supplied by the caller; fetching
//!   them belongs to external collaborators.
//! - Strongly typed: raw bytes enter only through fallible codec
//!   functions ([`header`], [`tx`]); everything downstream works on
//!   structured values.
//! - Explicit state: chain state lives in a [`ChainStore`] (or the
//!   [`SpvRelay`] facade) passed by handle. There is no process-wide
//!   singleton.
//!
//! ## Byte order
//!
//! Hashes are little-endian wire order ("natural order") everywhere
//! inside the crate. Functions touching the reversed explorer/RPC form
//! say so in their names ([`header::to_display_hex`],
//! [`header::from_display_hex`]).
//!
//! ## Usage
//!
//! ```rust
//! use spv_relay::{header, ChainParams, SpvRelay};
//!
//! // mainnet genesis header
//! let raw = hex::decode(
//!     "0100000000000000000000000000000000000000000000000000000000000000\
//!      000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa\
//!      4b1e5e4a29ab5f49ffff001d1dac2b7c",
//! )
//! .unwrap();
//! let genesis = header::decode(&raw).unwrap();
//!
//! let relay = SpvRelay::new(ChainParams::mainnet());
//! relay.initialize(&genesis, 0, header::id(&genesis)).unwrap();
//! assert_eq!(relay.current_best_height().unwrap(), 0);
//! ```

pub mod constants;
pub mod error;
pub mod header;
pub mod merkle;
pub mod retarget;
pub mod store;
pub mod tx;
pub mod types;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use store::{ChainParams, ChainStore};
pub use types::*;

use std::sync::{PoisonError, RwLock};

/// Thread-safe facade over a [`ChainStore`].
///
/// Header submission is serialized through a write lock, so one batch
/// commits or rejects before the next is evaluated. Queries share a
/// read lock and always observe the state left by the last committed
/// batch, never a partial one.
pub struct SpvRelay {
    store: RwLock<ChainStore>,
}

impl SpvRelay {
    /// Create an uninitialized relay with the given chain policy
    pub fn new(params: ChainParams) -> Self {
        SpvRelay {
            store: RwLock::new(ChainStore::new(params)),
        }
    }

    /// One-time setup with a trusted genesis header; see
    /// [`ChainStore::initialize`]
    pub fn initialize(
        &self,
        genesis_header: &BlockHeader,
        genesis_height: u64,
        period_start_hash: Hash,
    ) -> Result<()> {
        self.write()
            .initialize(genesis_header, genesis_height, period_start_hash)
    }

    /// Validate and append a batch of serialized headers linking to
    /// `anchor`; see [`ChainStore::add_headers`]
    pub fn submit_headers(&self, anchor: &Hash, raw: &[u8]) -> Result<()> {
        self.write().add_headers(anchor, raw)
    }

    /// Append the first header of a new retarget period; see
    /// [`ChainStore::add_headers_with_retarget`]
    pub fn submit_retarget(
        &self,
        period_start: &BlockHeader,
        period_end: &BlockHeader,
        raw_new: &[u8],
    ) -> Result<()> {
        self.write()
            .add_headers_with_retarget(period_start, period_end, raw_new)
    }

    /// Check a transaction inclusion claim; see
    /// [`ChainStore::check_inclusion`]
    pub fn verify_inclusion(
        &self,
        txid: &Hash,
        height: u64,
        proof: &MerkleProof,
        confirmations: u64,
    ) -> Result<bool> {
        self.read()
            .check_inclusion(txid, height, proof, confirmations)
    }

    /// Height of the canonical tip
    pub fn current_best_height(&self) -> Result<u64> {
        self.read().best_height()
    }

    /// Id of the canonical tip, natural byte order
    pub fn current_best_hash(&self) -> Result<Hash> {
        self.read().best_hash()
    }

    /// Stored header at a canonical height
    pub fn header_at(&self, height: u64) -> Result<StoredHeader> {
        self.read().header_at(height)
    }

    /// Cumulative work of the canonical chain up to `height`
    pub fn cumulative_work(&self, height: u64) -> Result<primitive_types::U256> {
        self.read().cumulative_work(height)
    }

    /// Any stored header by id: canonical, fork or retired
    pub fn header_by_hash(&self, hash: &Hash) -> Option<StoredHeader> {
        self.read().header_by_hash(hash)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChainStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChainStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

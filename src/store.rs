//! The header chain store: accepted headers, fork tracking and reorgs.
//!
//! A single `ChainStore` owns every header it has accepted, canonical or
//! not. Submissions validate against the store's current state and
//! commit all-or-nothing; a rejected batch leaves no trace. Competing
//! branches are tracked as bounded forks and promoted to canonical when
//! their cumulative work overtakes the best chain's.

use crate::constants::{HEADER_SIZE, RETARGET_INTERVAL};
use crate::error::{RelayError, Result};
use crate::header;
use crate::merkle;
use crate::retarget;
use crate::types::{BlockHeader, Hash, MerkleProof, StoredHeader};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Chain policy knobs.
///
/// `check_retarget` resolves the testnet question: Bitcoin testnet
/// allows minimum-difficulty blocks after a 20-minute gap, so the
/// 2016-block boundary invariant cannot be enforced there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Compact encoding of the network's proof-of-work limit, the
    /// easiest target a retarget may produce
    pub pow_limit_bits: u32,
    /// Enforce recomputed bits at retarget boundaries
    pub check_retarget: bool,
    /// Maximum number of concurrently tracked forks
    pub max_fork_count: usize,
    /// Maximum headers per tracked fork
    pub max_fork_depth: usize,
    /// Retired (reorged-away) headers kept for historical queries
    pub retired_window: usize,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        ChainParams {
            pow_limit_bits: crate::constants::MAX_TARGET_BITS,
            check_retarget: true,
            max_fork_count: 8,
            max_fork_depth: 144,
            retired_window: 288,
        }
    }

    /// Testnet keeps the mainnet proof-of-work limit but allows
    /// minimum-difficulty blocks, so boundary bits are not enforced
    pub fn testnet() -> Self {
        ChainParams {
            check_retarget: false,
            ..Self::mainnet()
        }
    }

    /// Regtest mines at the easiest representable difficulty
    pub fn regtest() -> Self {
        ChainParams {
            pow_limit_bits: 0x207f_ffff,
            check_retarget: false,
            ..Self::mainnet()
        }
    }

    fn pow_limit(&self) -> Result<U256> {
        retarget::decode_target(self.pow_limit_bits)
    }
}

/// A competing branch. `hashes` always spans the whole branch from the
/// first non-canonical header up to the fork tip, so promotion can
/// splice it into the canonical index wholesale.
#[derive(Debug, Clone)]
struct Fork {
    /// Height of the first fork header
    start_height: u64,
    /// Fork header hashes from `start_height` upward
    hashes: Vec<Hash>,
}

impl Fork {
    fn tip_hash(&self) -> Hash {
        // a fork always holds at least one header
        self.hashes[self.hashes.len() - 1]
    }
}

/// Where a validated batch attaches to the stored chain
enum Attachment {
    /// Extends the canonical tip
    Canonical,
    /// Extends the tip of an existing fork
    ForkTip(u64),
    /// Branches off mid-chain, creating a new fork
    NewBranch,
}

/// The accepted header chain and its competing branches
#[derive(Debug)]
pub struct ChainStore {
    params: ChainParams,
    /// Every accepted header (canonical, fork or retired), by id
    headers: HashMap<Hash, StoredHeader>,
    /// Canonical chain index: height to header id
    canonical: BTreeMap<u64, Hash>,
    /// Tracked forks by id
    forks: HashMap<u64, Fork>,
    next_fork_id: u64,
    /// Reorged-away canonical headers, oldest first
    retired: VecDeque<Hash>,
    genesis_height: u64,
    /// Hash of the first header of the genesis period; the headers
    /// below the relay's genesis are not stored, so the retarget path
    /// authenticates the period-start header against this hash
    period_start_hash: Hash,
    best: Option<Hash>,
}

impl ChainStore {
    pub fn new(params: ChainParams) -> Self {
        ChainStore {
            params,
            headers: HashMap::new(),
            canonical: BTreeMap::new(),
            forks: HashMap::new(),
            next_fork_id: 0,
            retired: VecDeque::new(),
            genesis_height: 0,
            period_start_hash: [0u8; 32],
            best: None,
        }
    }

    /// One-time setup with a trusted genesis header.
    ///
    /// `genesis_height` is the absolute chain height of `genesis_header`.
    /// Deployments start the relay a few blocks behind the data-source
    /// tip: a relay anchored exactly at the tip can be stranded by a
    /// reorg happening while it is being set up. `period_start_hash`
    /// identifies the first header of the retarget period containing
    /// genesis (display-order callers must reverse it first); it
    /// authenticates the period-start header handed to
    /// [`Self::add_headers_with_retarget`] when that header predates
    /// genesis.
    ///
    /// Fails with `AlreadyInitialized` on a second call.
    pub fn initialize(
        &mut self,
        genesis_header: &BlockHeader,
        genesis_height: u64,
        period_start_hash: Hash,
    ) -> Result<()> {
        if self.best.is_some() {
            return Err(RelayError::AlreadyInitialized);
        }

        let hash = header::id(genesis_header);
        if !header::check_proof_of_work(genesis_header)? {
            return Err(RelayError::InsufficientWork(genesis_height));
        }

        let stored = StoredHeader {
            header: genesis_header.clone(),
            hash,
            height: genesis_height,
            chain_work: header::work(genesis_header)?,
        };
        self.headers.insert(hash, stored);
        self.canonical.insert(genesis_height, hash);
        self.genesis_height = genesis_height;
        self.period_start_hash = period_start_hash;
        self.best = Some(hash);

        info!(
            height = genesis_height,
            hash = %header::to_display_hex(&hash),
            "relay initialized"
        );
        Ok(())
    }

    fn best_stored(&self) -> Result<&StoredHeader> {
        let best = self.best.as_ref().ok_or(RelayError::NotInitialized)?;
        self.headers.get(best).ok_or(RelayError::NotInitialized)
    }

    /// Height of the canonical tip
    pub fn best_height(&self) -> Result<u64> {
        Ok(self.best_stored()?.height)
    }

    /// Id of the canonical tip, natural byte order
    pub fn best_hash(&self) -> Result<Hash> {
        Ok(self.best_stored()?.hash)
    }

    /// Stored header at a canonical height
    pub fn header_at(&self, height: u64) -> Result<StoredHeader> {
        let hash = self
            .canonical
            .get(&height)
            .ok_or(RelayError::UnknownHeight(height))?;
        self.headers
            .get(hash)
            .cloned()
            .ok_or(RelayError::UnknownHeight(height))
    }

    /// Cumulative work of the canonical chain up to `height`
    pub fn cumulative_work(&self, height: u64) -> Result<U256> {
        Ok(self.header_at(height)?.chain_work)
    }

    /// Any stored header by id: canonical, fork or retired
    pub fn header_by_hash(&self, hash: &Hash) -> Option<StoredHeader> {
        self.headers.get(hash).cloned()
    }

    /// Walk back from `from` to the stored ancestor at `height`
    fn ancestor_at(&self, from: &Hash, height: u64) -> Result<&StoredHeader> {
        let mut current = self.headers.get(from).ok_or(RelayError::UnknownAnchor)?;
        while current.height > height {
            current = self
                .headers
                .get(&current.header.prev_block_hash)
                .ok_or(RelayError::UnknownAnchor)?;
        }
        if current.height == height {
            Ok(current)
        } else {
            Err(RelayError::UnknownAnchor)
        }
    }

    /// Expected bits for a header at `height` whose predecessor (on its
    /// own branch) is `prev`. The period-start header is found in the
    /// not-yet-committed `staged` prefix when the batch spans the
    /// boundary, otherwise by walking back from `anchor`. `None` when
    /// the boundary cannot be checked: mid-period heights, retarget
    /// checking disabled, or a period start below the relay's genesis.
    fn boundary_bits(
        &self,
        height: u64,
        prev: &StoredHeader,
        staged: &[StoredHeader],
        anchor: &Hash,
    ) -> Result<Option<u32>> {
        if !self.params.check_retarget || height % RETARGET_INTERVAL != 0 {
            return Ok(None);
        }
        let start_height = height - RETARGET_INTERVAL;
        if start_height < self.genesis_height {
            // the period start predates the relay; the explicit
            // retarget path carries the missing header
            return Ok(None);
        }
        let staged_start = staged
            .first()
            .filter(|first| start_height >= first.height)
            .map(|first| &staged[(start_height - first.height) as usize]);
        let start = match staged_start {
            Some(start) => start,
            None => self.ancestor_at(anchor, start_height)?,
        };
        let bits = retarget::next_bits(
            &start.header,
            start.height,
            &prev.header,
            prev.height,
            prev.header.bits,
            self.params.pow_limit()?,
        )?;
        Ok(Some(bits))
    }

    /// Decode and validate a batch against its anchor, without touching
    /// store state. Returns the headers in commit order.
    fn validate_batch(&self, anchor: &Hash, raw: &[u8]) -> Result<Vec<StoredHeader>> {
        if raw.is_empty() || raw.len() % HEADER_SIZE != 0 {
            return Err(RelayError::MalformedHeader(raw.len() % HEADER_SIZE));
        }

        let anchor_stored = self
            .headers
            .get(anchor)
            .cloned()
            .ok_or(RelayError::UnknownAnchor)?;

        let mut staged: Vec<StoredHeader> = Vec::with_capacity(raw.len() / HEADER_SIZE);
        let mut prev = anchor_stored;

        for chunk in raw.chunks(HEADER_SIZE) {
            let decoded = header::decode(chunk)?;
            let height = prev.height + 1;

            if decoded.prev_block_hash != prev.hash {
                return Err(RelayError::BrokenChainLink(height));
            }
            if let Some(expected) = self.boundary_bits(height, &prev, &staged, anchor)? {
                if decoded.bits != expected {
                    return Err(RelayError::WrongBits {
                        height,
                        expected,
                        got: decoded.bits,
                    });
                }
            }
            if !header::check_proof_of_work(&decoded)? {
                return Err(RelayError::InsufficientWork(height));
            }

            let hash = header::id(&decoded);
            if self.headers.contains_key(&hash) {
                return Err(RelayError::DuplicateHeader(height));
            }

            let stored = StoredHeader {
                chain_work: prev.chain_work + header::work(&decoded)?,
                header: decoded,
                hash,
                height,
            };
            staged.push(stored.clone());
            prev = stored;
        }

        Ok(staged)
    }

    /// Validate and append a batch of serialized headers.
    ///
    /// `raw` is a concatenation of 80-byte headers; the first must link
    /// to `anchor` (a known header id in natural byte order), each
    /// subsequent one to its predecessor. Every header must satisfy its
    /// own proof of work, and a header landing on a retarget boundary
    /// must carry the recomputed bits (policy permitting). The batch
    /// commits atomically: on any failure the store is unchanged.
    ///
    /// A batch anchored below the canonical tip opens (or extends) a
    /// tracked fork; the store reorganizes as soon as a fork's
    /// cumulative work exceeds the best chain's.
    pub fn add_headers(&mut self, anchor: &Hash, raw: &[u8]) -> Result<()> {
        self.best_stored()?;
        let staged = self.validate_batch(anchor, raw)?;

        let attachment = self.classify_attachment(anchor)?;
        match attachment {
            Attachment::Canonical => {
                for stored in &staged {
                    self.canonical.insert(stored.height, stored.hash);
                    self.best = Some(stored.hash);
                }
            }
            Attachment::ForkTip(fork_id) => {
                let fork = self.forks.get(&fork_id).ok_or(RelayError::UnknownAnchor)?;
                if fork.hashes.len() + staged.len() > self.params.max_fork_depth {
                    return Err(RelayError::ForkStorageExhausted);
                }
                let fork = self.forks.get_mut(&fork_id).ok_or(RelayError::UnknownAnchor)?;
                for stored in &staged {
                    fork.hashes.push(stored.hash);
                }
            }
            Attachment::NewBranch => {
                if self.forks.len() >= self.params.max_fork_count {
                    return Err(RelayError::ForkStorageExhausted);
                }
                // the anchor may itself sit off the canonical chain (on
                // another fork, or retired); the new fork carries the
                // whole branch back to the canonical chain so a later
                // promotion splices a complete suffix
                let mut branch = self.branch_to_canonical(anchor)?;
                if branch.len() + staged.len() > self.params.max_fork_depth {
                    return Err(RelayError::ForkStorageExhausted);
                }
                branch.extend(staged.iter().map(|s| s.hash));
                let start_height = staged[0].height - branch.len() as u64 + staged.len() as u64;
                let fork = Fork {
                    start_height,
                    hashes: branch,
                };
                let fork_id = self.next_fork_id;
                self.next_fork_id += 1;
                debug!(fork_id, start_height = fork.start_height, "fork opened");
                self.forks.insert(fork_id, fork);
            }
        }

        let batch_len = staged.len();
        let tip = staged[batch_len - 1].height;
        for stored in staged {
            self.headers.insert(stored.hash, stored);
        }
        debug!(count = batch_len, tip, "header batch committed");

        self.try_reorg()?;
        self.gc_forks();
        Ok(())
    }

    /// Append the first header of a new retarget period, carrying the
    /// period-boundary proof explicitly.
    ///
    /// `period_start` and `period_end` are the first and last headers of
    /// the closing period. Both are authenticated against stored state:
    /// `period_end` must be a stored header at a period-closing height,
    /// and `period_start` must be the stored header 2015 blocks below it
    /// on the same branch, or match the `period_start_hash` pinned at
    /// initialization when the period began before the relay's genesis.
    /// The recomputed bits are enforced on `raw_new` even when
    /// `check_retarget` is off; this path exists to prove the retarget.
    pub fn add_headers_with_retarget(
        &mut self,
        period_start: &BlockHeader,
        period_end: &BlockHeader,
        raw_new: &[u8],
    ) -> Result<()> {
        self.best_stored()?;

        let end_hash = header::id(period_end);
        let end_stored = self
            .headers
            .get(&end_hash)
            .cloned()
            .ok_or(RelayError::UnknownAnchor)?;
        let end_height = end_stored.height;
        let start_height = (end_height + 1).checked_sub(RETARGET_INTERVAL).ok_or(
            RelayError::InvalidRetargetInputs {
                start_height: 0,
                end_height,
            },
        )?;
        if (end_height + 1) % RETARGET_INTERVAL != 0 {
            return Err(RelayError::InvalidRetargetInputs {
                start_height,
                end_height,
            });
        }

        let start_hash = header::id(period_start);
        if start_height >= self.genesis_height {
            let stored_start = self.ancestor_at(&end_hash, start_height)?;
            if stored_start.hash != start_hash {
                return Err(RelayError::UnknownAnchor);
            }
        } else if start_hash != self.period_start_hash {
            return Err(RelayError::UnknownAnchor);
        }

        let expected = retarget::next_bits(
            period_start,
            start_height,
            period_end,
            end_height,
            period_end.bits,
            self.params.pow_limit()?,
        )?;
        let new_header = header::decode(raw_new)?;
        if new_header.bits != expected {
            return Err(RelayError::WrongBits {
                height: end_height + 1,
                expected,
                got: new_header.bits,
            });
        }

        self.add_headers(&end_hash, raw_new)
    }

    /// Check a transaction inclusion claim against the canonical chain.
    ///
    /// `txid` is in natural byte order and must match the proof's leaf;
    /// a mismatch is a false claim, not an error. Fails with
    /// `UnknownHeight` when `height` is not canonical and with
    /// `InsufficientConfirmations` when the tip has not buried the block
    /// deep enough.
    pub fn check_inclusion(
        &self,
        txid: &Hash,
        height: u64,
        proof: &MerkleProof,
        confirmations: u64,
    ) -> Result<bool> {
        let best_height = self.best_height()?;
        let stored = self.header_at(height)?;

        let have = best_height - height + 1;
        if have < confirmations {
            return Err(RelayError::InsufficientConfirmations {
                have,
                need: confirmations,
            });
        }

        if &proof.leaf != txid {
            return Ok(false);
        }
        merkle::verify(proof, &stored.header.merkle_root)
    }

    /// Hashes of the non-canonical ancestors of `anchor` (inclusive),
    /// oldest first. Empty when `anchor` is on the canonical chain.
    fn branch_to_canonical(&self, anchor: &Hash) -> Result<Vec<Hash>> {
        let mut branch = Vec::new();
        let mut cursor = *anchor;
        loop {
            let stored = self.headers.get(&cursor).ok_or(RelayError::UnknownAnchor)?;
            if self.canonical.get(&stored.height) == Some(&cursor) {
                break;
            }
            branch.push(cursor);
            cursor = stored.header.prev_block_hash;
        }
        branch.reverse();
        Ok(branch)
    }

    fn classify_attachment(&self, anchor: &Hash) -> Result<Attachment> {
        if Some(*anchor) == self.best {
            return Ok(Attachment::Canonical);
        }
        for (fork_id, fork) in &self.forks {
            if fork.tip_hash() == *anchor {
                return Ok(Attachment::ForkTip(*fork_id));
            }
        }
        Ok(Attachment::NewBranch)
    }

    /// Promote any fork whose cumulative work exceeds the best chain's.
    /// Loops because promoting one branch can leave another ahead.
    fn try_reorg(&mut self) -> Result<()> {
        loop {
            let best_work = self.best_stored()?.chain_work;
            let winner = self
                .forks
                .iter()
                .filter_map(|(id, fork)| {
                    let tip = self.headers.get(&fork.tip_hash())?;
                    (tip.chain_work > best_work).then_some((*id, tip.chain_work))
                })
                .max_by_key(|(_, work)| *work)
                .map(|(id, _)| id);

            let Some(fork_id) = winner else {
                return Ok(());
            };
            self.reorganize(fork_id)?;
        }
    }

    /// Make `fork_id` canonical: retire the displaced canonical suffix
    /// and splice the fork in. Headers below the fork point are
    /// untouched.
    fn reorganize(&mut self, fork_id: u64) -> Result<()> {
        let fork = self
            .forks
            .remove(&fork_id)
            .ok_or(RelayError::UnknownAnchor)?;
        let old_best_height = self.best_height()?;

        // the fork may share a prefix with the canonical chain (left by
        // an earlier promotion); only heights that actually change are
        // retired
        let mut divergence = fork.start_height;
        for (offset, hash) in fork.hashes.iter().enumerate() {
            let height = fork.start_height + offset as u64;
            if self.canonical.get(&height) == Some(hash) {
                divergence = height + 1;
            } else {
                break;
            }
        }

        let displaced: Vec<u64> = self
            .canonical
            .range(divergence..)
            .map(|(height, _)| *height)
            .collect();
        for height in displaced {
            if let Some(hash) = self.canonical.remove(&height) {
                self.retired.push_back(hash);
            }
        }

        for (offset, hash) in fork.hashes.iter().enumerate() {
            self.canonical.insert(fork.start_height + offset as u64, *hash);
        }
        self.best = Some(fork.tip_hash());

        let new_best_height = self.best_height()?;
        info!(
            fork_point = fork.start_height - 1,
            old_best_height,
            new_best_height,
            "chain reorganized"
        );

        self.prune_retired();
        Ok(())
    }

    /// A header may only leave the store when nothing references it:
    /// not the canonical index, no tracked fork, not the retired window.
    fn is_referenced(&self, hash: &Hash) -> bool {
        if let Some(stored) = self.headers.get(hash) {
            if self.canonical.get(&stored.height) == Some(hash) {
                return true;
            }
        }
        self.forks.values().any(|fork| fork.hashes.contains(hash))
            || self.retired.contains(hash)
    }

    /// Drop the oldest retired headers beyond the configured window
    fn prune_retired(&mut self) {
        while self.retired.len() > self.params.retired_window {
            if let Some(hash) = self.retired.pop_front() {
                if !self.is_referenced(&hash) {
                    self.headers.remove(&hash);
                }
            }
        }
    }

    /// Discard forks whose tips have fallen hopelessly behind the
    /// canonical tip; their headers stop being reachable as anchors.
    fn gc_forks(&mut self) {
        let Ok(best_height) = self.best_height() else {
            return;
        };
        let max_depth = self.params.max_fork_depth as u64;
        let stale: Vec<u64> = self
            .forks
            .iter()
            .filter_map(|(id, fork)| {
                let tip_height = fork.start_height + fork.hashes.len() as u64 - 1;
                (tip_height + max_depth < best_height).then_some(*id)
            })
            .collect();
        for fork_id in stale {
            if let Some(fork) = self.forks.remove(&fork_id) {
                warn!(fork_id, start_height = fork.start_height, "stale fork dropped");
                for hash in fork.hashes {
                    if !self.is_referenced(&hash) {
                        self.headers.remove(&hash);
                    }
                }
            }
        }
    }
}

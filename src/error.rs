//! Error types for relay validation

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("malformed header: expected 80 bytes, got {0}")]
    MalformedHeader(usize),

    #[error("malformed hash string: {0}")]
    MalformedHash(String),

    #[error("malformed merkle proof: index {index} does not fit in {depth} levels")]
    MalformedProof { index: u64, depth: usize },

    #[error("transaction truncated: needed {needed} more bytes at offset {offset}")]
    TruncatedTransaction { offset: usize, needed: usize },

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    #[error("unsupported segwit flag: {0:#04x}")]
    UnsupportedEncoding(u8),

    #[error("invalid compact target: {0:#010x}")]
    InvalidCompactTarget(u32),

    #[error("invalid retarget inputs: period {start_height}..{end_height}")]
    InvalidRetargetInputs { start_height: u64, end_height: u64 },

    #[error("relay already initialized")]
    AlreadyInitialized,

    #[error("relay not initialized")]
    NotInitialized,

    #[error("unknown anchor header")]
    UnknownAnchor,

    #[error("header at height {0} does not link to its predecessor")]
    BrokenChainLink(u64),

    #[error("header hash exceeds target at height {0}")]
    InsufficientWork(u64),

    #[error("wrong bits at retarget boundary {height}: expected {expected:#010x}, got {got:#010x}")]
    WrongBits { height: u64, expected: u32, got: u32 },

    #[error("duplicate header at height {0}")]
    DuplicateHeader(u64),

    #[error("height {0} is not in the canonical chain")]
    UnknownHeight(u64),

    #[error("insufficient confirmations: have {have}, need {need}")]
    InsufficientConfirmations { have: u64, need: u64 },

    #[error("fork storage exhausted")]
    ForkStorageExhausted,
}

pub type Result<T> = std::result::Result<T, RelayError>;

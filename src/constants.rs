//! Bitcoin consensus constants used by the relay

use primitive_types::U256;

/// Serialized block header size in bytes
pub const HEADER_SIZE: usize = 80;

/// Difficulty adjustment interval: 2016 blocks
pub const RETARGET_INTERVAL: u64 = 2016;

/// Target time per block: 10 minutes
pub const TARGET_TIME_PER_BLOCK: u64 = 600;

/// Target timespan of one retarget period: 2 weeks
pub const TARGET_TIMESPAN: u64 = RETARGET_INTERVAL * TARGET_TIME_PER_BLOCK;

/// Retarget clamp factor: the actual timespan is bounded to
/// [TARGET_TIMESPAN / 4, TARGET_TIMESPAN * 4]
pub const TIMESPAN_DIVISOR: u64 = 4;

/// Compact encoding of the maximum (easiest) target
pub const MAX_TARGET_BITS: u32 = 0x1d00ffff;

/// Unrounded maximum target
/// 0x00000000FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF
pub const UNROUNDED_MAX_TARGET: U256 = U256([
    u64::MAX,
    u64::MAX,
    u64::MAX,
    0x0000_0000_ffff_ffff,
]);

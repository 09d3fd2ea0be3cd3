//! Difficulty retargeting: the compact target codec and the 2016-block
//! adjustment rule.
//!
//! `bits` is Bitcoin's compact floating-point target encoding: a 1-byte
//! exponent (byte length of the target) followed by a 3-byte mantissa.
//! Bit 23 of the mantissa is a sign bit inherited from OpenSSL bignums;
//! a set sign bit never encodes a valid target.

use crate::constants::{RETARGET_INTERVAL, TARGET_TIMESPAN, TIMESPAN_DIVISOR};
use crate::error::{RelayError, Result};
use crate::types::BlockHeader;
use primitive_types::{U256, U512};

/// Decode a compact-encoded target into a 256-bit integer.
///
/// Fails with `InvalidCompactTarget` on a set sign bit or an encoding
/// whose value overflows 256 bits.
pub fn decode_target(bits: u32) -> Result<U256> {
    let size = bits >> 24;
    let word = bits & 0x007f_ffff;

    if word != 0 && (bits & 0x0080_0000) != 0 {
        return Err(RelayError::InvalidCompactTarget(bits));
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(RelayError::InvalidCompactTarget(bits));
    }

    if size <= 3 {
        Ok(U256::from(word >> (8 * (3 - size))))
    } else {
        Ok(U256::from(word) << (8 * (size - 3) as usize))
    }
}

/// Encode a target in compact form, choosing the canonical
/// smallest-mantissa representation. Inverse of [`decode_target`] for
/// every canonically encoded value.
pub fn encode_target(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    // a set sign bit pushes the mantissa down one byte
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Compute the compact target for the period following `period_end`.
///
/// `period_start` and `period_end` are the first and last headers of a
/// full 2016-block period; `previous_bits` is the target in force during
/// that period, and `max_target` the network's proof-of-work limit
/// (mainnet: the decoded [`crate::constants::MAX_TARGET_BITS`]). The
/// observed timespan is clamped to
/// `[TARGET_TIMESPAN / 4, TARGET_TIMESPAN * 4]`, the previous target is
/// scaled by `actual / expected` in exact integer arithmetic, and the
/// result is bounded by `max_target` before re-encoding.
///
/// Fails with `InvalidRetargetInputs` unless `start_height` is
/// period-aligned and exactly 2015 blocks below `end_height`.
pub fn next_bits(
    period_start: &BlockHeader,
    start_height: u64,
    period_end: &BlockHeader,
    end_height: u64,
    previous_bits: u32,
    max_target: U256,
) -> Result<u32> {
    if start_height % RETARGET_INTERVAL != 0
        || end_height.checked_sub(start_height) != Some(RETARGET_INTERVAL - 1)
    {
        return Err(RelayError::InvalidRetargetInputs {
            start_height,
            end_height,
        });
    }

    let mut actual_timespan =
        (period_end.timestamp as u64).saturating_sub(period_start.timestamp as u64);
    if actual_timespan < TARGET_TIMESPAN / TIMESPAN_DIVISOR {
        actual_timespan = TARGET_TIMESPAN / TIMESPAN_DIVISOR;
    }
    if actual_timespan > TARGET_TIMESPAN * TIMESPAN_DIVISOR {
        actual_timespan = TARGET_TIMESPAN * TIMESPAN_DIVISOR;
    }

    // widen for the scaling step; a near-limit target times the clamped
    // timespan does not fit 256 bits
    let previous_target = decode_target(previous_bits)?;
    let wide = U512::from(previous_target) * U512::from(actual_timespan)
        / U512::from(TARGET_TIMESPAN);
    let target = if wide > U512::from(max_target) {
        max_target
    } else {
        U256::try_from(wide).unwrap_or(max_target)
    };

    Ok(encode_target(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(timestamp: u32, bits: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp,
            bits,
            nonce: 0,
        }
    }

    fn mainnet_limit() -> U256 {
        decode_target(crate::constants::MAX_TARGET_BITS).unwrap()
    }

    fn retarget(first_time: u32, last_time: u32, previous_bits: u32) -> Result<u32> {
        // heights from the corresponding mainnet periods
        next_bits(
            &header_with(first_time, previous_bits),
            0,
            &header_with(last_time, previous_bits),
            2015,
            previous_bits,
            mainnet_limit(),
        )
    }

    // vectors from Bitcoin Core's pow_tests.cpp

    #[test]
    fn test_next_bits_normal() {
        // period ending at block 32255
        assert_eq!(retarget(1261130161, 1262152739, 0x1d00ffff), Ok(0x1d00d86a));
    }

    #[test]
    fn test_next_bits_pow_limit() {
        // genesis period: slow blocks, clamped by the maximum target
        assert_eq!(retarget(1231006505, 1233061996, 0x1d00ffff), Ok(0x1d00ffff));
    }

    #[test]
    fn test_next_bits_lower_clamp() {
        // period ending at block 68543: faster than the /4 bound
        assert_eq!(retarget(1279008237, 1279297671, 0x1c05a3f4), Ok(0x1c0168fd));
    }

    #[test]
    fn test_next_bits_upper_clamp() {
        // first block time is synthetic, beyond the *4 bound
        assert_eq!(retarget(1263163443, 1269211443, 0x1c387f6f), Ok(0x1d00e1fd));
    }

    #[test]
    fn test_next_bits_recent_period() {
        // period ending at block 703583
        assert_eq!(retarget(1632234876, 1633390031, 0x170ed0eb), Ok(0x170e2632));
    }

    #[test]
    fn test_next_bits_one_second_timespan_is_quarter_target() {
        let previous_bits = 0x1c05a3f4;
        let next = retarget(1279008237, 1279008238, previous_bits).unwrap();
        let expected = decode_target(previous_bits).unwrap() / 4;
        assert_eq!(decode_target(next).unwrap(), expected);
    }

    #[test]
    fn test_next_bits_huge_timespan_is_quadruple_target() {
        let previous_bits = 0x1c05a3f4;
        // the largest timespan a u32 timestamp pair can express, more
        // than a century and far past the *4 bound
        let next = retarget(0, u32::MAX, previous_bits).unwrap();
        let expected = decode_target(previous_bits).unwrap() * 4;
        assert_eq!(decode_target(next).unwrap(), expected);
    }

    #[test]
    fn test_next_bits_rejects_short_period() {
        let start = header_with(1261130161, 0x1d00ffff);
        let end = header_with(1262152739, 0x1d00ffff);
        assert_eq!(
            next_bits(&start, 0, &end, 2014, 0x1d00ffff, mainnet_limit()),
            Err(RelayError::InvalidRetargetInputs {
                start_height: 0,
                end_height: 2014
            })
        );
    }

    #[test]
    fn test_next_bits_rejects_unaligned_start() {
        let start = header_with(1261130161, 0x1d00ffff);
        let end = header_with(1262152739, 0x1d00ffff);
        assert_eq!(
            next_bits(&start, 1, &end, 2016, 0x1d00ffff, mainnet_limit()),
            Err(RelayError::InvalidRetargetInputs {
                start_height: 1,
                end_height: 2016
            })
        );
    }

    // compact codec vectors from Bitcoin Core's arith_uint256_tests.cpp

    #[test]
    fn test_decode_target_zero_forms() {
        for bits in [
            0x0000_0000u32,
            0x0012_3456,
            0x0100_3456,
            0x0200_0056,
            0x0300_0000,
            0x0400_0000,
            0x0092_3456,
            0x0180_3456,
            0x0280_0056,
            0x0380_0000,
            0x0480_0000,
        ] {
            assert_eq!(decode_target(bits), Ok(U256::zero()), "bits {bits:#010x}");
            assert_eq!(encode_target(decode_target(bits).unwrap()), 0);
        }
    }

    #[test]
    fn test_compact_round_trips() {
        for (bits, canonical) in [
            (0x0112_3456u32, 0x0112_0000u32),
            (0x0212_3456, 0x0212_3400),
            (0x0312_3456, 0x0312_3456),
            (0x0412_3456, 0x0412_3456),
            (0x0500_9234, 0x0500_9234),
            (0x2012_3456, 0x2012_3456),
            (0x1d00_ffff, 0x1d00_ffff),
        ] {
            let target = decode_target(bits).unwrap();
            assert_eq!(encode_target(target), canonical, "bits {bits:#010x}");
        }
    }

    #[test]
    fn test_decode_target_rejects_sign_bit() {
        assert_eq!(
            decode_target(0x01fe_dcba),
            Err(RelayError::InvalidCompactTarget(0x01fe_dcba))
        );
        assert_eq!(
            decode_target(0x0492_3456),
            Err(RelayError::InvalidCompactTarget(0x0492_3456))
        );
    }

    #[test]
    fn test_decode_target_rejects_overflow() {
        assert_eq!(
            decode_target(0xff12_3456),
            Err(RelayError::InvalidCompactTarget(0xff12_3456))
        );
        assert_eq!(
            decode_target(0x2101_0000),
            Err(RelayError::InvalidCompactTarget(0x2101_0000))
        );
    }

    #[test]
    fn test_encode_target_avoids_sign_bit() {
        // 0x80 would set the mantissa sign bit; the canonical form shifts
        assert_eq!(encode_target(U256::from(0x80u64)), 0x0200_8000);
    }
}

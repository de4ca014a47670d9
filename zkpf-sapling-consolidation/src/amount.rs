//! Consolidation chunk amounts and display formatting.

use rand::rngs::OsRng;
use rand::Rng;
use rand_core::{CryptoRng, RngCore};

use crate::{ConsolidationError, Result};

/// Zatoshis per coin.
pub const COIN: u64 = 100_000_000;

/// Smallest amount [`choose_amount`] can ever return (`1 * 10^6`).
pub const MIN_CHUNK_ZATS: u64 = 1_000_000;

const MIN_EXPONENT: u32 = 6;
const MAX_EXPONENT: u32 = 8;
const MAX_MANTISSA: u64 = 99;

/// Choose a pseudo-random chunk amount no larger than `available_funds`.
///
/// The amount has the form `mantissa * 10^exponent` with the exponent drawn
/// uniformly from `6..=8` and the mantissa from `1..=99`; draws exceeding the
/// available funds are rejected and resampled. Output amounts of this shape
/// avoid revealing the exact wallet balance.
///
/// Returns [`ConsolidationError::InsufficientFunds`] when no draw could ever
/// succeed (`available_funds < 10^6`).
pub fn choose_amount<R: RngCore + CryptoRng>(rng: &mut R, available_funds: u64) -> Result<u64> {
    if available_funds < MIN_CHUNK_ZATS {
        return Err(ConsolidationError::InsufficientFunds {
            available: available_funds,
            minimum: MIN_CHUNK_ZATS,
        });
    }

    loop {
        let exponent = rng.gen_range(MIN_EXPONENT..=MAX_EXPONENT);
        let mantissa = rng.gen_range(1..=MAX_MANTISSA);
        let amount = mantissa * 10u64.pow(exponent);
        if amount <= available_funds {
            return Ok(amount);
        }
    }
}

/// [`choose_amount`] backed by the operating system's secure RNG.
pub fn choose_amount_os(available_funds: u64) -> Result<u64> {
    choose_amount(&mut OsRng, available_funds)
}

/// Render a zatoshi amount in coin units.
///
/// Eight fractional digits are printed and trailing zeros trimmed, keeping at
/// least two: `5_000_000` renders as `0.05`, `COIN` as `1.00`.
pub fn format_money(zats: i64) -> String {
    let sign = if zats < 0 { "-" } else { "" };
    let abs = zats.unsigned_abs();
    let mut out = format!("{sign}{}.{:08}", abs / COIN, abs % COIN);

    let bytes = out.as_bytes();
    let mut trim = 0;
    let mut i = bytes.len() - 1;
    while bytes[i] == b'0' && bytes[i - 2].is_ascii_digit() {
        trim += 1;
        i -= 1;
    }
    out.truncate(out.len() - trim);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn decompose(amount: u64) -> Option<(u64, u32)> {
        (MIN_EXPONENT..=MAX_EXPONENT).find_map(|exp| {
            let scale = 10u64.pow(exp);
            let mantissa = amount / scale;
            (amount % scale == 0 && (1..=MAX_MANTISSA).contains(&mantissa))
                .then_some((mantissa, exp))
        })
    }

    #[test]
    fn below_minimum_chunk_is_rejected() {
        let err = choose_amount(&mut OsRng, MIN_CHUNK_ZATS - 1).unwrap_err();
        assert!(matches!(
            err,
            ConsolidationError::InsufficientFunds { available: 999_999, .. }
        ));
    }

    #[test]
    fn exact_minimum_always_returns_minimum() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(choose_amount(&mut rng, MIN_CHUNK_ZATS).unwrap(), MIN_CHUNK_ZATS);
        }
    }

    #[test]
    fn ten_thousand_draws_never_exceed_available() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let available = 37 * COIN / 10;
        for _ in 0..10_000 {
            let amount = choose_amount(&mut rng, available).unwrap();
            assert!(amount <= available);
            assert!(amount >= MIN_CHUNK_ZATS);
        }
    }

    proptest! {
        #[test]
        fn amount_has_mantissa_exponent_shape(available in MIN_CHUNK_ZATS..=200 * COIN, seed in any::<u64>()) {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let amount = choose_amount(&mut rng, available).unwrap();
            prop_assert!(amount >= MIN_CHUNK_ZATS);
            prop_assert!(amount <= available);
            prop_assert!(decompose(amount).is_some());
        }
    }

    #[test]
    fn money_formatting_keeps_two_decimals() {
        assert_eq!(format_money(0), "0.00");
        assert_eq!(format_money(COIN as i64), "1.00");
        assert_eq!(format_money(5_000_000), "0.05");
        assert_eq!(format_money(4_990_000), "0.0499");
        assert_eq!(format_money(1), "0.00000001");
        assert_eq!(format_money(123 * COIN as i64 + 45_000_000), "123.45");
        assert_eq!(format_money(-10_000), "-0.0001");
    }
}

//! Synthetic bars aligned to the interval grid.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use livebar_core::{Candle, Interval};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Start of the period containing `now` (the bar that is still forming).
///
/// Fixed intervals align to the Unix epoch; months align to the first day of
/// the calendar month.
pub fn open_bar_start(interval: Interval, now: DateTime<Utc>) -> DateTime<Utc> {
    match interval.fixed_step() {
        Some(step) => {
            let step_secs = step.num_seconds();
            let aligned = now.timestamp().div_euclid(step_secs) * step_secs;
            DateTime::from_timestamp(aligned, 0).unwrap_or(now)
        }
        None => Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now),
    }
}

/// Start of the period `back` periods before `start`.
pub fn step_back(interval: Interval, start: DateTime<Utc>, back: u32) -> DateTime<Utc> {
    match interval.fixed_step() {
        Some(step) => step
            .checked_mul(i32::try_from(back).unwrap_or(i32::MAX))
            .and_then(|d| start.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        None => start
            .checked_sub_months(Months::new(back))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
    }
}

/// The last `count` bars up to and including the one containing `now`, oldest first.
pub fn bars(
    symbol: &str,
    seed: u64,
    interval: Interval,
    now: DateTime<Utc>,
    count: usize,
) -> Vec<Candle> {
    let open = open_bar_start(interval, now);
    let n = u32::try_from(count).unwrap_or(u32::MAX);
    (0..n)
        .rev()
        .map(|back| synthetic(symbol, seed, step_back(interval, open, back)))
        .collect()
}

/// Deterministic OHLCV row for `(symbol, seed, ts)`.
pub fn synthetic(symbol: &str, seed: u64, ts: DateTime<Utc>) -> Candle {
    let h = fnv1a(symbol.as_bytes());
    let base = 100 + i64::try_from(h % 900).unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed ^ h ^ ts.timestamp().unsigned_abs());
    let open_c: i64 = base * 100 + rng.random_range(-500..=500);
    let close_c: i64 = open_c + rng.random_range(-200..=200);
    let high_c = open_c.max(close_c) + rng.random_range(0..=100);
    let low_c = open_c.min(close_c) - rng.random_range(0..=100);
    let volume: i64 = rng.random_range(1_000..=1_000_000);
    Candle::new(
        ts,
        Decimal::new(open_c, 2),
        Decimal::new(high_c, 2),
        Decimal::new(low_c, 2),
        Decimal::new(close_c, 2),
        Decimal::from(volume),
    )
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

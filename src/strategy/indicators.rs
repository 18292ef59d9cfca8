//! Indicator math shared by the built-in strategies

use rust_decimal::{Decimal, MathematicalOps};

/// Exponential moving average over the whole series
///
/// Seeded with the first value, then `ema[i] = (x[i] - ema[i-1]) * k + ema[i-1]`
/// with `k = 2 / (period + 1)`. A zero period yields zeros.
pub fn ema(series: &[Decimal], period: usize) -> Vec<Decimal> {
    let mut out = vec![Decimal::ZERO; series.len()];
    if period == 0 || series.is_empty() {
        return out;
    }
    let k = Decimal::TWO / Decimal::from(period + 1);
    let mut prev = series[0];
    out[0] = prev;
    for (i, price) in series.iter().enumerate().skip(1) {
        prev = (*price - prev) * k + prev;
        out[i] = prev;
    }
    out
}

/// Population mean and standard deviation
pub fn mean_std<'a, I>(values: I) -> (Decimal, Decimal)
where
    I: IntoIterator<Item = &'a Decimal>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let (sum, n) = iter
        .clone()
        .fold((Decimal::ZERO, 0u32), |(s, n), v| (s + *v, n + 1));
    if n == 0 {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let count = Decimal::from(n);
    let mean = sum / count;
    let squares: Decimal = iter.map(|v| (*v - mean) * (*v - mean)).sum();
    let variance = squares / count;
    (mean, variance.sqrt().unwrap_or(Decimal::ZERO))
}

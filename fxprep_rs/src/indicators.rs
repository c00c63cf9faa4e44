//! Windowed technical indicators.
//!
//! Every function is pure: it takes equal-length price sequences plus its
//! parameters and returns same-length columns whose leading or structurally
//! undefined entries are `None`. Empty input, misaligned lengths, and zero
//! periods are `PrepError::InvalidInput`; a series shorter than the window is
//! not an error and simply yields undefined entries.

use crate::config::STOCH_D_PERIOD;
use crate::error::{PrepError, ensure_aligned, ensure_period};
use crate::numeric::{self, Column, Ddof, checked_div, defined, lift, rolling, zip_with};

/// CCI scaling constant so that roughly 70-80% of values fall in ±100.
const CCI_SCALE: f64 = 0.015;

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Column,
    pub signal: Column,
    pub histogram: Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub upper: Column,
    pub middle: Column,
    pub lower: Column,
    /// (upper - lower) / middle
    pub width: Column,
    /// (close - lower) / (upper - lower), unclamped.
    pub position: Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stochastic {
    pub k: Column,
    pub d: Column,
}

fn ensure_input(name: &str, values: &[f64], period: usize) -> Result<(), PrepError> {
    ensure_aligned(&[(name, values.len())])?;
    ensure_period(name, period)
}

fn ensure_hlc(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Result<(), PrepError> {
    ensure_aligned(&[
        ("high", high.len()),
        ("low", low.len()),
        ("close", close.len()),
    ])?;
    ensure_period("window", period)
}

/// Simple moving average over a column; windows touching `None` are `None`.
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Column {
    rolling(values, period, numeric::mean)
}

pub fn rolling_std(values: &[Option<f64>], period: usize, ddof: Ddof) -> Column {
    rolling(values, period, |w| numeric::std_dev(w, ddof))
}

pub fn rolling_min(values: &[Option<f64>], period: usize) -> Column {
    rolling(values, period, numeric::min)
}

pub fn rolling_max(values: &[Option<f64>], period: usize) -> Column {
    rolling(values, period, numeric::max)
}

/// Exponential smoothing with `alpha = 2 / (span + 1)`, seeded by the first
/// defined value. Early outputs carry warm-up bias but are defined.
pub fn ewm(values: &[Option<f64>], span: usize) -> Column {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev: Option<f64> = None;
    values
        .iter()
        .map(|value| {
            let x = (*value)?;
            let next = match prev {
                Some(p) => alpha * x + (1.0 - alpha) * p,
                None => x,
            };
            prev = Some(next);
            defined(next)
        })
        .collect()
}

pub fn sma(values: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_input("sma", values, period)?;
    Ok(rolling_mean(&lift(values), period))
}

pub fn ema(values: &[f64], span: usize) -> Result<Column, PrepError> {
    ensure_input("ema", values, span)?;
    Ok(ewm(&lift(values), span))
}

/// Relative strength index over simple averages of gains and losses.
///
/// A window with no losses and some gains saturates at 100; a window with
/// neither gains nor losses (flat prices) is undefined.
pub fn rsi(close: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_input("rsi", close, period)?;
    let len = close.len();
    let mut gains: Column = vec![None; len];
    let mut losses: Column = vec![None; len];
    for i in 1..len {
        let change = close[i] - close[i - 1];
        gains[i] = defined(change.max(0.0));
        losses[i] = defined((-change).max(0.0));
    }
    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);
    Ok(zip_with(&avg_gain, &avg_loss, |gain, loss| {
        if loss == 0.0 {
            (gain > 0.0).then_some(100.0)
        } else {
            Some(100.0 - 100.0 / (1.0 + gain / loss))
        }
    }))
}

pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Result<Macd, PrepError> {
    ensure_input("macd fast", close, fast)?;
    ensure_period("macd slow", slow)?;
    ensure_period("macd signal", signal)?;
    let prices = lift(close);
    let line = zip_with(&ewm(&prices, fast), &ewm(&prices, slow), |f, s| Some(f - s));
    let signal_line = ewm(&line, signal);
    let histogram = zip_with(&line, &signal_line, |m, s| Some(m - s));
    Ok(Macd {
        line,
        signal: signal_line,
        histogram,
    })
}

/// Bollinger bands with a population standard deviation.
pub fn bollinger(close: &[f64], period: usize, multiplier: f64) -> Result<Bollinger, PrepError> {
    ensure_input("bollinger", close, period)?;
    let prices = lift(close);
    let middle = rolling_mean(&prices, period);
    let std = rolling_std(&prices, period, Ddof::Population);
    let upper = zip_with(&middle, &std, |m, s| Some(m + multiplier * s));
    let lower = zip_with(&middle, &std, |m, s| Some(m - multiplier * s));
    let band = zip_with(&upper, &lower, |u, l| Some(u - l));
    let width = zip_with(&band, &middle, checked_div);
    let offset = zip_with(&prices, &lower, |c, l| Some(c - l));
    let position = zip_with(&offset, &band, checked_div);
    Ok(Bollinger {
        upper,
        middle,
        lower,
        width,
        position,
    })
}

/// Greatest of the bar range and the gaps to the previous close. The first
/// bar has no previous close and uses its own range.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Result<Column, PrepError> {
    ensure_hlc(high, low, close, 1)?;
    Ok((0..close.len())
        .map(|i| {
            let high_low = high[i] - low[i];
            if i == 0 {
                return defined(high_low);
            }
            let prev = close[i - 1];
            defined(
                high_low
                    .max((high[i] - prev).abs())
                    .max((low[i] - prev).abs()),
            )
        })
        .collect())
}

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_hlc(high, low, close, period)?;
    Ok(rolling_mean(&true_range(high, low, close)?, period))
}

/// Position of close within the trailing high/low channel, scaled to 0..100.
/// Undefined when the channel is flat.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Result<Stochastic, PrepError> {
    ensure_hlc(high, low, close, period)?;
    let highest = rolling_max(&lift(high), period);
    let lowest = rolling_min(&lift(low), period);
    let range = zip_with(&highest, &lowest, |h, l| Some(h - l));
    let above_low = zip_with(&lift(close), &lowest, |c, l| Some(c - l));
    let k = zip_with(&above_low, &range, |num, den| {
        checked_div(num, den).map(|v| 100.0 * v)
    });
    let d = rolling_mean(&k, STOCH_D_PERIOD);
    Ok(Stochastic { k, d })
}

pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_hlc(high, low, close, period)?;
    let typical: Column = (0..close.len())
        .map(|i| defined((high[i] + low[i] + close[i]) / 3.0))
        .collect();
    let average = rolling_mean(&typical, period);
    let mad = rolling(&typical, period, |w| {
        let m = numeric::mean(w)?;
        numeric::mean(&w.iter().map(|x| (x - m).abs()).collect::<Vec<_>>())
    });
    let deviation = zip_with(&typical, &average, |tp, avg| Some(tp - avg));
    Ok(zip_with(&deviation, &mad, |dev, mad| {
        checked_div(dev, CCI_SCALE * mad)
    }))
}

pub fn williams_r(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Result<Column, PrepError> {
    ensure_hlc(high, low, close, period)?;
    let highest = rolling_max(&lift(high), period);
    let lowest = rolling_min(&lift(low), period);
    let range = zip_with(&highest, &lowest, |h, l| Some(h - l));
    let below_high = zip_with(&highest, &lift(close), |h, c| Some(h - c));
    Ok(zip_with(&below_high, &range, |num, den| {
        checked_div(num, den).map(|v| -100.0 * v)
    }))
}

/// `close[t] - close[t - period]`.
pub fn momentum(close: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_input("momentum", close, period)?;
    Ok((0..close.len())
        .map(|i| {
            let base = close[i.checked_sub(period)?];
            defined(close[i] - base)
        })
        .collect())
}

/// Percent rate of change over `period` rows.
pub fn roc(close: &[f64], period: usize) -> Result<Column, PrepError> {
    ensure_input("roc", close, period)?;
    Ok((0..close.len())
        .map(|i| {
            let base = close[i.checked_sub(period)?];
            checked_div(close[i] - base, base).map(|v| v * 100.0)
        })
        .collect())
}

/// `close / ma - 1`, undefined where the average is undefined or zero.
pub fn relative_deviation(close: &[f64], ma: &[Option<f64>]) -> Result<Column, PrepError> {
    ensure_aligned(&[("close", close.len()), ("moving average", ma.len())])?;
    Ok(zip_with(&lift(close), ma, |c, m| {
        checked_div(c, m).map(|r| r - 1.0)
    }))
}

/// `+1` while the short average is strictly above the long one, `-1`
/// otherwise; undefined until both averages are defined.
pub fn crossover(short: &[Option<f64>], long: &[Option<f64>]) -> Result<Vec<Option<i64>>, PrepError> {
    ensure_aligned(&[("short average", short.len()), ("long average", long.len())])?;
    Ok(numeric::sign_cross(short, long))
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PrepError;

pub const DEFAULT_INSTRUMENTS: [&str; 5] = ["EUR_USD", "GBP_USD", "USD_JPY", "AUD_USD", "USD_CHF"];
pub const DEFAULT_TIMEFRAMES: [&str; 3] = ["daily", "4h", "1h"];

/// Length of the %D smoothing applied to stochastic %K.
pub const STOCH_D_PERIOD: usize = 3;

fn default_lag_periods() -> Vec<usize> {
    vec![1, 2, 3, 5, 7, 14, 21]
}

fn default_ma_periods() -> Vec<usize> {
    vec![7, 14, 21, 50, 100, 200]
}

fn default_crossover_pairs() -> Vec<(usize, usize)> {
    vec![(7, 21), (50, 200)]
}

fn default_stat_windows() -> Vec<usize> {
    vec![5, 10, 20]
}

fn default_cumulative_return_periods() -> Vec<usize> {
    vec![3, 5, 10, 20]
}

/// Numeric parameters for one run. Built once at startup, validated, and then
/// passed by reference into every stage; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
    pub atr_period: usize,
    pub stochastic_period: usize,
    pub cci_period: usize,
    pub williams_period: usize,
    /// Look-back for momentum and rate of change.
    pub momentum_period: usize,
    pub lag_periods: Vec<usize>,
    pub ma_periods: Vec<usize>,
    /// (short, long) pairs of entries in `ma_periods` compared by SMA.
    pub crossover_pairs: Vec<(usize, usize)>,
    /// Windows for the rolling standard deviation of simple returns.
    pub volatility_windows: Vec<usize>,
    /// Windows for rolling mean/std/min/max of close.
    pub rolling_windows: Vec<usize>,
    pub cumulative_return_periods: Vec<usize>,
    pub forecast_horizon: usize,
    /// Neutral-zone half width for the multi-class label, as a fraction.
    pub neutral_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
            atr_period: 14,
            stochastic_period: 14,
            cci_period: 20,
            williams_period: 14,
            momentum_period: 10,
            lag_periods: default_lag_periods(),
            ma_periods: default_ma_periods(),
            crossover_pairs: default_crossover_pairs(),
            volatility_windows: default_stat_windows(),
            rolling_windows: default_stat_windows(),
            cumulative_return_periods: default_cumulative_return_periods(),
            forecast_horizon: 1,
            neutral_threshold: 0.001,
        }
    }
}

impl FeatureConfig {
    /// Reject parameter sets the pipeline cannot honour. Called before any
    /// item is processed so a bad configuration aborts the whole run.
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.forecast_horizon < 1 {
            return Err(PrepError::InvalidHorizon(self.forecast_horizon));
        }

        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
            ("atr_period", self.atr_period),
            ("stochastic_period", self.stochastic_period),
            ("cci_period", self.cci_period),
            ("williams_period", self.williams_period),
            ("momentum_period", self.momentum_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(PrepError::invalid_config(format!("{name} must be at least 1")));
            }
        }
        if self.macd_fast >= self.macd_slow {
            return Err(PrepError::invalid_config(format!(
                "macd_fast ({}) must be shorter than macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }

        let sets: [(&str, &[usize], usize); 5] = [
            ("lag_periods", self.lag_periods.as_slice(), 1),
            ("ma_periods", self.ma_periods.as_slice(), 1),
            (
                "cumulative_return_periods",
                self.cumulative_return_periods.as_slice(),
                1,
            ),
            // Sample standard deviation needs at least two observations.
            ("volatility_windows", self.volatility_windows.as_slice(), 2),
            ("rolling_windows", self.rolling_windows.as_slice(), 2),
        ];
        for (name, values, floor) in sets {
            if let Some(bad) = values.iter().find(|&&v| v < floor) {
                return Err(PrepError::invalid_config(format!(
                    "{name} entries must be at least {floor} (got {bad})"
                )));
            }
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != values.len() {
                return Err(PrepError::invalid_config(format!(
                    "{name} contains duplicate entries"
                )));
            }
        }

        for &(short, long) in &self.crossover_pairs {
            if !self.ma_periods.contains(&short) || !self.ma_periods.contains(&long) {
                return Err(PrepError::invalid_config(format!(
                    "crossover pair ({short}, {long}) references a period missing from ma_periods"
                )));
            }
            if short >= long {
                return Err(PrepError::invalid_config(format!(
                    "crossover pair ({short}, {long}) must list the shorter period first"
                )));
            }
        }

        if !self.bollinger_multiplier.is_finite() || self.bollinger_multiplier < 0.0 {
            return Err(PrepError::invalid_config(format!(
                "bollinger_multiplier must be a non-negative number (got {})",
                self.bollinger_multiplier
            )));
        }
        if !self.neutral_threshold.is_finite() || self.neutral_threshold < 0.0 {
            return Err(PrepError::invalid_config(format!(
                "neutral_threshold must be a non-negative number (got {})",
                self.neutral_threshold
            )));
        }
        if !(self.rsi_oversold.is_finite() && self.rsi_overbought.is_finite())
            || self.rsi_oversold >= self.rsi_overbought
        {
            return Err(PrepError::invalid_config(format!(
                "rsi_oversold ({}) must be below rsi_overbought ({})",
                self.rsi_oversold, self.rsi_overbought
            )));
        }
        Ok(())
    }

    /// Number of leading rows left undefined by the longest warm-up across
    /// every configured column. Retained rows after the burn-in trim equal
    /// `rows - warmup_rows() - forecast_horizon` when that is positive.
    pub fn warmup_rows(&self) -> usize {
        let max_of = |values: &[usize]| values.iter().copied().max().unwrap_or(0);
        let max_lag = max_of(&self.lag_periods);

        let candidates = [
            // Simple return, log return, gap.
            1,
            // RSI averages `rsi_period` deltas, the first delta is at row 1.
            self.rsi_period,
            self.rsi_period.saturating_add(max_lag),
            self.bollinger_period.saturating_sub(1),
            self.atr_period.saturating_sub(1),
            // %D averages three %K values.
            self.stochastic_period
                .saturating_add(STOCH_D_PERIOD)
                .saturating_sub(2),
            self.cci_period.saturating_sub(1),
            self.williams_period.saturating_sub(1),
            self.momentum_period,
            max_of(&self.ma_periods).saturating_sub(1),
            max_of(&self.volatility_windows),
            max_of(&self.rolling_windows).saturating_sub(1),
            max_of(&self.cumulative_return_periods),
            max_lag,
            max_lag.saturating_add(1),
        ];
        candidates.into_iter().max().unwrap_or(0)
    }
}

/// Run-level settings: where series come from, where tables go, and which
/// (instrument, timeframe) items to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    /// Worker threads for per-item processing; 1 runs sequentially.
    #[serde(default = "default_workers")]
    pub n_workers: usize,
    #[serde(default)]
    pub features: FeatureConfig,
}

fn default_instruments() -> Vec<String> {
    DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect()
}

fn default_timeframes() -> Vec<String> {
    DEFAULT_TIMEFRAMES.iter().map(|s| s.to_string()).collect()
}

fn default_workers() -> usize {
    1
}

impl Config {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            instruments: default_instruments(),
            timeframes: default_timeframes(),
            n_workers: default_workers(),
            features: FeatureConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), PrepError> {
        if self.instruments.is_empty() {
            return Err(PrepError::invalid_config("no instruments configured"));
        }
        if self.timeframes.is_empty() {
            return Err(PrepError::invalid_config("no timeframes configured"));
        }
        // Each item owns one output path.
        for (name, values) in [
            ("instruments", &self.instruments),
            ("timeframes", &self.timeframes),
        ] {
            let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != values.len() {
                return Err(PrepError::invalid_config(format!(
                    "{name} contains duplicate entries"
                )));
            }
        }
        self.features.validate()
    }
}

/// Load a JSON parameter file. Missing fields fall back to defaults.
pub fn load_feature_config(path: &Path) -> Result<FeatureConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Unable to read parameter file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse parameter file {}", path.display()))
}

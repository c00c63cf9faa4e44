use std::fmt;

use crate::config::FeatureConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureCategory {
    /// Input OHLCV fields carried through unchanged.
    Raw,
    /// Returns, candle geometry, gaps, return volatility.
    Price,
    /// Windowed indicators and moving averages.
    Technical,
    /// Values observed a fixed number of rows earlier.
    Lagged,
    /// Cumulative returns and rolling statistics of close.
    Rolling,
    /// Derived purely from the bar timestamp.
    Calendar,
    /// Forward-looking supervised labels.
    Target,
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureCategory::Raw => "raw",
            FeatureCategory::Price => "price",
            FeatureCategory::Technical => "technical",
            FeatureCategory::Lagged => "lagged",
            FeatureCategory::Rolling => "rolling",
            FeatureCategory::Calendar => "calendar",
            FeatureCategory::Target => "target",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub category: FeatureCategory,
    pub note: String,
}

impl FeatureDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: FeatureCategory,
        note: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            note: note.into(),
        }
    }
}

/// Ordered descriptors for every column emitted after the timestamp, in the
/// order the assembler and target generator write them.
pub fn feature_catalog(config: &FeatureConfig) -> Vec<FeatureDescriptor> {
    use FeatureCategory::*;

    let mut out = Vec::new();
    let mut add = |name: String, category: FeatureCategory, note: String| {
        out.push(FeatureDescriptor::new(name, category, note));
    };

    for name in ["open", "high", "low", "close", "volume"] {
        add(name.to_string(), Raw, "input bar field".to_string());
    }

    let price: [(&str, &str); 12] = [
        ("return", "close / prev close - 1"),
        ("log_return", "ln(close / prev close)"),
        ("price_change", "close - open"),
        ("price_change_percent", "(close - open) / open * 100"),
        ("range", "high - low"),
        ("body", "|close - open|"),
        ("body_percent", "body / range"),
        ("upper_shadow", "high - max(open, close)"),
        ("lower_shadow", "min(open, close) - low"),
        ("candle_color", "1 when close > open, else 0"),
        ("gap", "open - prev close"),
        ("gap_percent", "gap / prev close * 100"),
    ];
    for (name, note) in price {
        add(name.to_string(), Price, note.to_string());
    }
    for w in &config.volatility_windows {
        add(
            format!("volatility_{w}"),
            Price,
            format!("sample std of return over {w} rows"),
        );
    }
    add("hl_ratio".to_string(), Price, "high / low".to_string());
    add(
        "close_position".to_string(),
        Price,
        "(close - low) / (high - low)".to_string(),
    );

    let rsi = config.rsi_period;
    add("rsi".to_string(), Technical, format!("RSI({rsi})"));
    add(
        "rsi_overbought".to_string(),
        Technical,
        format!("1 when RSI > {}", config.rsi_overbought),
    );
    add(
        "rsi_oversold".to_string(),
        Technical,
        format!("1 when RSI < {}", config.rsi_oversold),
    );
    let macd_note = format!(
        "MACD({}, {}, {})",
        config.macd_fast, config.macd_slow, config.macd_signal
    );
    for name in ["macd", "macd_signal", "macd_histogram"] {
        add(name.to_string(), Technical, macd_note.clone());
    }
    add(
        "macd_crossover".to_string(),
        Technical,
        "+1 when MACD > signal, else -1".to_string(),
    );
    let bb_note = format!(
        "Bollinger({}, {})",
        config.bollinger_period, config.bollinger_multiplier
    );
    for name in ["bb_upper", "bb_middle", "bb_lower", "bb_width", "bb_position"] {
        add(name.to_string(), Technical, bb_note.clone());
    }
    add(
        "atr".to_string(),
        Technical,
        format!("ATR({})", config.atr_period),
    );
    add(
        "atr_percent".to_string(),
        Technical,
        "ATR / close * 100".to_string(),
    );
    let stoch_note = format!("Stochastic({})", config.stochastic_period);
    add("stoch_k".to_string(), Technical, stoch_note.clone());
    add("stoch_d".to_string(), Technical, stoch_note);
    add(
        "cci".to_string(),
        Technical,
        format!("CCI({})", config.cci_period),
    );
    add(
        "williams_r".to_string(),
        Technical,
        format!("Williams %R({})", config.williams_period),
    );
    let m = config.momentum_period;
    add(
        format!("momentum_{m}"),
        Technical,
        format!("close - close {m} rows earlier"),
    );
    add(
        format!("roc_{m}"),
        Technical,
        format!("percent change over {m} rows"),
    );
    for p in &config.ma_periods {
        add(format!("sma_{p}"), Technical, format!("simple average of close over {p}"));
        add(format!("ema_{p}"), Technical, format!("exponential average of close, span {p}"));
        add(format!("close_vs_sma_{p}"), Technical, format!("close / sma_{p} - 1"));
    }
    for (short, long) in &config.crossover_pairs {
        add(
            format!("ma_{short}_{long}_crossover"),
            Technical,
            format!("+1 when sma_{short} > sma_{long}, else -1"),
        );
    }

    for lag in &config.lag_periods {
        add(format!("close_lag_{lag}"), Lagged, format!("close {lag} rows earlier"));
        add(format!("return_lag_{lag}"), Lagged, format!("return {lag} rows earlier"));
    }
    for lag in &config.lag_periods {
        add(format!("rsi_lag_{lag}"), Lagged, format!("RSI {lag} rows earlier"));
    }

    for p in &config.cumulative_return_periods {
        add(
            format!("cumulative_return_{p}"),
            Rolling,
            format!("close / close {p} rows earlier - 1"),
        );
    }
    for w in &config.rolling_windows {
        add(format!("rolling_mean_{w}"), Rolling, format!("mean of close over {w}"));
        add(format!("rolling_std_{w}"), Rolling, format!("sample std of close over {w}"));
        add(format!("rolling_min_{w}"), Rolling, format!("min of close over {w}"));
        add(format!("rolling_max_{w}"), Rolling, format!("max of close over {w}"));
    }

    let calendar: [(&str, &str); 16] = [
        ("day_of_week", "0 = Monday .. 6 = Sunday"),
        ("day_of_month", "1..31"),
        ("month", "1..12"),
        ("quarter", "1..4"),
        ("year", "calendar year"),
        ("week_of_year", "ISO week number"),
        ("is_monday", "1 on Mondays"),
        ("is_friday", "1 on Fridays"),
        ("is_month_start", "1 on the first calendar day of the month"),
        ("is_month_end", "1 on the last calendar day of the month"),
        ("is_quarter_start", "1 on the first calendar day of a quarter"),
        ("is_quarter_end", "1 on the last calendar day of a quarter"),
        ("day_sin", "sin(2 pi day_of_week / 7)"),
        ("day_cos", "cos(2 pi day_of_week / 7)"),
        ("month_sin", "sin(2 pi month / 12)"),
        ("month_cos", "cos(2 pi month / 12)"),
    ];
    for (name, note) in calendar {
        add(name.to_string(), Calendar, note.to_string());
    }

    let h = config.forecast_horizon;
    add(
        "target_direction".to_string(),
        Target,
        format!("1 when close[t+{h}] > close[t], else 0"),
    );
    add(
        "target_return".to_string(),
        Target,
        format!("close[t+{h}] / close[t] - 1"),
    );
    add("target_close".to_string(), Target, format!("close[t+{h}]"));
    add(
        "target_direction_multi".to_string(),
        Target,
        format!(
            "2/1/0/-1/-2 by target_return against {} and twice that",
            config.neutral_threshold
        ),
    );

    out
}

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::config::FeatureConfig;
use crate::data::BarSeries;
use crate::error::PrepError;
use crate::feature::FeatureCategory;
use crate::indicators;
use crate::numeric::{self, Column, Ddof, checked_div, lift, shift, zip_with};
use crate::table::FeatureTable;

/// Builds the full causal feature table for one bar series.
///
/// Every value at row `t` is computed from rows `0..=t` only. Warm-up rows
/// are left undefined; nothing is trimmed here.
#[derive(Debug, Clone, Copy)]
pub struct FeatureAssembler<'a> {
    config: &'a FeatureConfig,
}

/// Intermediate columns consumed by later stages.
struct PriceDerived {
    returns: Column,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    pub fn assemble(&self, series: &BarSeries) -> Result<FeatureTable, PrepError> {
        if series.is_empty() {
            return Err(PrepError::invalid_input("bar series is empty"));
        }
        let mut table = FeatureTable::new(series.timestamps().to_vec());
        raw_columns(series, &mut table)?;
        let derived = price_features(series, self.config, &mut table)?;
        let rsi = technical_indicators(series, self.config, &mut table)?;
        lagged_features(series, &derived, &rsi, self.config, &mut table)?;
        rolling_features(series, self.config, &mut table)?;
        calendar_features(series.timestamps(), &mut table)?;
        Ok(table)
    }
}

fn raw_columns(series: &BarSeries, table: &mut FeatureTable) -> Result<(), PrepError> {
    let raw = [
        ("open", series.open()),
        ("high", series.high()),
        ("low", series.low()),
        ("close", series.close()),
        ("volume", series.volume()),
    ];
    for (name, values) in raw {
        table.push_float(name, FeatureCategory::Raw, lift(values))?;
    }
    Ok(())
}

fn price_features(
    series: &BarSeries,
    config: &FeatureConfig,
    table: &mut FeatureTable,
) -> Result<PriceDerived, PrepError> {
    let open = lift(series.open());
    let high = lift(series.high());
    let low = lift(series.low());
    let close = lift(series.close());
    let prev_close = shift(&close, 1);

    let returns = zip_with(&close, &prev_close, |c, p| checked_div(c, p).map(|r| r - 1.0));
    let log_returns = zip_with(&close, &prev_close, |c, p| {
        checked_div(c, p).filter(|r| *r > 0.0).map(f64::ln)
    });
    let change = zip_with(&close, &open, |c, o| Some(c - o));
    let change_pct = zip_with(&change, &open, |d, o| checked_div(d, o).map(|r| r * 100.0));
    let range = zip_with(&high, &low, |h, l| Some(h - l));
    let body = numeric::map(&change, |d| Some(d.abs()));
    let body_pct = zip_with(&body, &range, checked_div);
    let body_top = zip_with(&open, &close, |o, c| Some(o.max(c)));
    let body_bottom = zip_with(&open, &close, |o, c| Some(o.min(c)));
    let upper_shadow = zip_with(&high, &body_top, |h, t| Some(h - t));
    let lower_shadow = zip_with(&body_bottom, &low, |b, l| Some(b - l));
    let candle_color: Vec<Option<i64>> = series
        .close()
        .iter()
        .zip(series.open())
        .map(|(c, o)| Some(i64::from(c > o)))
        .collect();
    let gap = zip_with(&open, &prev_close, |o, p| Some(o - p));
    let gap_pct = zip_with(&gap, &prev_close, |g, p| checked_div(g, p).map(|r| r * 100.0));

    use FeatureCategory::Price;
    table.push_float("return", Price, returns.clone())?;
    table.push_float("log_return", Price, log_returns)?;
    table.push_float("price_change", Price, change)?;
    table.push_float("price_change_percent", Price, change_pct)?;
    table.push_float("range", Price, range.clone())?;
    table.push_float("body", Price, body)?;
    table.push_float("body_percent", Price, body_pct)?;
    table.push_float("upper_shadow", Price, upper_shadow)?;
    table.push_float("lower_shadow", Price, lower_shadow)?;
    table.push_int("candle_color", Price, candle_color)?;
    table.push_float("gap", Price, gap)?;
    table.push_float("gap_percent", Price, gap_pct)?;
    for &window in &config.volatility_windows {
        let volatility = indicators::rolling_std(&returns, window, Ddof::Sample);
        table.push_float(format!("volatility_{window}"), Price, volatility)?;
    }
    table.push_float("hl_ratio", Price, zip_with(&high, &low, checked_div))?;
    let position = zip_with(&close, &low, |c, l| Some(c - l));
    table.push_float("close_position", Price, zip_with(&position, &range, checked_div))?;

    Ok(PriceDerived { returns })
}

fn threshold_flag(values: &[Option<f64>], test: impl Fn(f64) -> bool) -> Vec<Option<i64>> {
    values
        .iter()
        .map(|v| v.map(|x| i64::from(test(x))))
        .collect()
}

/// Pushes the indicator block and hands back the RSI column for lagging.
fn technical_indicators(
    series: &BarSeries,
    config: &FeatureConfig,
    table: &mut FeatureTable,
) -> Result<Column, PrepError> {
    use FeatureCategory::Technical;
    let (high, low, close) = (series.high(), series.low(), series.close());

    let rsi = indicators::rsi(close, config.rsi_period)?;
    let overbought = config.rsi_overbought;
    let oversold = config.rsi_oversold;
    table.push_float("rsi", Technical, rsi.clone())?;
    table.push_int("rsi_overbought", Technical, threshold_flag(&rsi, |v| v > overbought))?;
    table.push_int("rsi_oversold", Technical, threshold_flag(&rsi, |v| v < oversold))?;

    let macd = indicators::macd(close, config.macd_fast, config.macd_slow, config.macd_signal)?;
    let macd_cross = indicators::crossover(&macd.line, &macd.signal)?;
    table.push_float("macd", Technical, macd.line)?;
    table.push_float("macd_signal", Technical, macd.signal)?;
    table.push_float("macd_histogram", Technical, macd.histogram)?;
    table.push_int("macd_crossover", Technical, macd_cross)?;

    let bands = indicators::bollinger(close, config.bollinger_period, config.bollinger_multiplier)?;
    table.push_float("bb_upper", Technical, bands.upper)?;
    table.push_float("bb_middle", Technical, bands.middle)?;
    table.push_float("bb_lower", Technical, bands.lower)?;
    table.push_float("bb_width", Technical, bands.width)?;
    table.push_float("bb_position", Technical, bands.position)?;

    let atr = indicators::atr(high, low, close, config.atr_period)?;
    let atr_pct = zip_with(&atr, &lift(close), |a, c| checked_div(a, c).map(|r| r * 100.0));
    table.push_float("atr", Technical, atr)?;
    table.push_float("atr_percent", Technical, atr_pct)?;

    let stoch = indicators::stochastic(high, low, close, config.stochastic_period)?;
    table.push_float("stoch_k", Technical, stoch.k)?;
    table.push_float("stoch_d", Technical, stoch.d)?;
    table.push_float("cci", Technical, indicators::cci(high, low, close, config.cci_period)?)?;
    table.push_float(
        "williams_r",
        Technical,
        indicators::williams_r(high, low, close, config.williams_period)?,
    )?;

    let m = config.momentum_period;
    table.push_float(format!("momentum_{m}"), Technical, indicators::momentum(close, m)?)?;
    table.push_float(format!("roc_{m}"), Technical, indicators::roc(close, m)?)?;

    let mut smas: Vec<(usize, Column)> = Vec::with_capacity(config.ma_periods.len());
    for &period in &config.ma_periods {
        let sma = indicators::sma(close, period)?;
        let ema = indicators::ema(close, period)?;
        let deviation = indicators::relative_deviation(close, &sma)?;
        table.push_float(format!("sma_{period}"), Technical, sma.clone())?;
        table.push_float(format!("ema_{period}"), Technical, ema)?;
        table.push_float(format!("close_vs_sma_{period}"), Technical, deviation)?;
        smas.push((period, sma));
    }
    for &(short, long) in &config.crossover_pairs {
        let cross = indicators::crossover(find_sma(&smas, short)?, find_sma(&smas, long)?)?;
        table.push_int(format!("ma_{short}_{long}_crossover"), Technical, cross)?;
    }

    Ok(rsi)
}

fn find_sma(smas: &[(usize, Column)], period: usize) -> Result<&Column, PrepError> {
    smas.iter()
        .find(|(p, _)| *p == period)
        .map(|(_, values)| values)
        .ok_or_else(|| {
            PrepError::invalid_config(format!("crossover period {period} is not in ma_periods"))
        })
}

fn lagged_features(
    series: &BarSeries,
    derived: &PriceDerived,
    rsi: &[Option<f64>],
    config: &FeatureConfig,
    table: &mut FeatureTable,
) -> Result<(), PrepError> {
    use FeatureCategory::Lagged;
    let close = lift(series.close());
    for &lag in &config.lag_periods {
        table.push_float(format!("close_lag_{lag}"), Lagged, shift(&close, lag))?;
        table.push_float(format!("return_lag_{lag}"), Lagged, shift(&derived.returns, lag))?;
    }
    for &lag in &config.lag_periods {
        table.push_float(format!("rsi_lag_{lag}"), Lagged, shift(rsi, lag))?;
    }
    Ok(())
}

fn rolling_features(
    series: &BarSeries,
    config: &FeatureConfig,
    table: &mut FeatureTable,
) -> Result<(), PrepError> {
    use FeatureCategory::Rolling;
    let close = lift(series.close());
    for &period in &config.cumulative_return_periods {
        let cumulative = zip_with(&close, &shift(&close, period), |c, base| {
            checked_div(c, base).map(|r| r - 1.0)
        });
        table.push_float(format!("cumulative_return_{period}"), Rolling, cumulative)?;
    }
    for &window in &config.rolling_windows {
        table.push_float(
            format!("rolling_mean_{window}"),
            Rolling,
            indicators::rolling_mean(&close, window),
        )?;
        table.push_float(
            format!("rolling_std_{window}"),
            Rolling,
            indicators::rolling_std(&close, window, Ddof::Sample),
        )?;
        table.push_float(
            format!("rolling_min_{window}"),
            Rolling,
            indicators::rolling_min(&close, window),
        )?;
        table.push_float(
            format!("rolling_max_{window}"),
            Rolling,
            indicators::rolling_max(&close, window),
        )?;
    }
    Ok(())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

fn calendar_features(
    timestamps: &[DateTime<Utc>],
    table: &mut FeatureTable,
) -> Result<(), PrepError> {
    use FeatureCategory::Calendar;
    let ints = |f: &dyn Fn(&DateTime<Utc>) -> i64| -> Vec<Option<i64>> {
        timestamps.iter().map(|ts| Some(f(ts))).collect()
    };
    let floats = |f: &dyn Fn(&DateTime<Utc>) -> f64| -> Column {
        timestamps.iter().map(|ts| numeric::defined(f(ts))).collect()
    };
    let weekday = |ts: &DateTime<Utc>| i64::from(ts.weekday().num_days_from_monday());
    let quarter = |ts: &DateTime<Utc>| i64::from((ts.month() - 1) / 3 + 1);
    let month_end = |ts: &DateTime<Utc>| ts.day() == days_in_month(ts.year(), ts.month());
    let quarter_month = |ts: &DateTime<Utc>| (ts.month() - 1) % 3;

    table.push_int("day_of_week", Calendar, ints(&weekday))?;
    table.push_int("day_of_month", Calendar, ints(&|ts| i64::from(ts.day())))?;
    table.push_int("month", Calendar, ints(&|ts| i64::from(ts.month())))?;
    table.push_int("quarter", Calendar, ints(&quarter))?;
    table.push_int("year", Calendar, ints(&|ts| i64::from(ts.year())))?;
    table.push_int("week_of_year", Calendar, ints(&|ts| i64::from(ts.iso_week().week())))?;
    table.push_int("is_monday", Calendar, ints(&|ts| i64::from(weekday(ts) == 0)))?;
    table.push_int("is_friday", Calendar, ints(&|ts| i64::from(weekday(ts) == 4)))?;
    table.push_int("is_month_start", Calendar, ints(&|ts| i64::from(ts.day() == 1)))?;
    table.push_int("is_month_end", Calendar, ints(&|ts| i64::from(month_end(ts))))?;
    table.push_int(
        "is_quarter_start",
        Calendar,
        ints(&|ts| i64::from(quarter_month(ts) == 0 && ts.day() == 1)),
    )?;
    table.push_int(
        "is_quarter_end",
        Calendar,
        ints(&|ts| i64::from(quarter_month(ts) == 2 && month_end(ts))),
    )?;

    let day_angle = |ts: &DateTime<Utc>| 2.0 * PI * weekday(ts) as f64 / 7.0;
    let month_angle = |ts: &DateTime<Utc>| 2.0 * PI * f64::from(ts.month()) / 12.0;
    table.push_float("day_sin", Calendar, floats(&|ts| day_angle(ts).sin()))?;
    table.push_float("day_cos", Calendar, floats(&|ts| day_angle(ts).cos()))?;
    table.push_float("month_sin", Calendar, floats(&|ts| month_angle(ts).sin()))?;
    table.push_float("month_cos", Calendar, floats(&|ts| month_angle(ts).cos()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use crate::feature::feature_catalog;
    use chrono::{Duration, TimeZone};

    fn trending_bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let wave = (i as f64 * 0.3).sin() * 0.01;
                let close = 1.1 + i as f64 * 0.0005 + wave;
                let open = close - 0.0003 * if i % 2 == 0 { 1.0 } else { -1.0 };
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open,
                    high: open.max(close) + 0.001,
                    low: open.min(close) - 0.001,
                    close,
                    volume: 1000.0 + i as f64,
                }
            })
            .collect()
    }

    fn small_config() -> FeatureConfig {
        FeatureConfig {
            ma_periods: vec![5, 10],
            crossover_pairs: vec![(5, 10)],
            lag_periods: vec![1, 2, 3],
            ..FeatureConfig::default()
        }
    }

    #[test]
    fn assembled_columns_follow_catalog_order() {
        let config = FeatureConfig::default();
        let series = BarSeries::from_bars(&trending_bars(60)).unwrap();
        let table = FeatureAssembler::new(&config).assemble(&series).unwrap();
        let catalog: Vec<String> = feature_catalog(&config)
            .into_iter()
            .filter(|d| d.category != FeatureCategory::Target)
            .map(|d| d.name)
            .collect();
        let names: Vec<&str> = table.column_names().into_iter().skip(1).collect();
        assert_eq!(names, catalog);
        for (column, descriptor) in table.columns().iter().zip(feature_catalog(&config)) {
            assert_eq!(column.category, descriptor.category, "{}", column.name);
        }
    }

    #[test]
    fn first_defined_rows_match_warmup_lengths() {
        let config = small_config();
        let series = BarSeries::from_bars(&trending_bars(80)).unwrap();
        let table = FeatureAssembler::new(&config).assemble(&series).unwrap();
        let first_defined = |name: &str| {
            let column = table.column(name).unwrap();
            (0..table.height()).find(|&i| column.data.is_defined(i))
        };
        assert_eq!(first_defined("return"), Some(1));
        assert_eq!(first_defined("rsi"), Some(14));
        assert_eq!(first_defined("rsi_lag_3"), Some(17));
        assert_eq!(first_defined("return_lag_3"), Some(4));
        assert_eq!(first_defined("volatility_20"), Some(20));
        assert_eq!(first_defined("stoch_d"), Some(15));
        assert_eq!(first_defined("sma_10"), Some(9));
        assert_eq!(first_defined("ema_10"), Some(0));
        assert_eq!(first_defined("cumulative_return_20"), Some(20));
        assert_eq!(first_defined("day_of_week"), Some(0));

        let last_undefined = table
            .complete_rows()
            .iter()
            .rposition(|complete| !complete)
            .unwrap();
        assert_eq!(last_undefined + 1, config.warmup_rows());
    }

    #[test]
    fn perturbing_future_bars_leaves_past_rows_unchanged() {
        let config = small_config();
        let bars = trending_bars(70);
        let baseline = FeatureAssembler::new(&config)
            .assemble(&BarSeries::from_bars(&bars).unwrap())
            .unwrap();

        let cut = 50;
        let mut shocked = bars.clone();
        for bar in shocked.iter_mut().skip(cut) {
            bar.close *= 1.5;
            bar.open *= 0.7;
            bar.high = bar.open.max(bar.close) + 0.2;
            bar.low = bar.open.min(bar.close) - 0.2;
            bar.volume = 1.0;
        }
        let altered = FeatureAssembler::new(&config)
            .assemble(&BarSeries::from_bars(&shocked).unwrap())
            .unwrap();

        for (before, after) in baseline.columns().iter().zip(altered.columns()) {
            match (&before.data, &after.data) {
                (crate::table::ColumnData::Float(a), crate::table::ColumnData::Float(b)) => {
                    assert_eq!(a[..cut], b[..cut], "{} changed", before.name)
                }
                (crate::table::ColumnData::Int(a), crate::table::ColumnData::Int(b)) => {
                    assert_eq!(a[..cut], b[..cut], "{} changed", before.name)
                }
                _ => panic!("column kind changed for {}", before.name),
            }
        }
    }

    #[test]
    fn calendar_fields_for_known_dates() {
        let config = small_config();
        // Friday 2024-03-29 ends Q1 on a weekday.
        let stamps = [
            Utc.with_ymd_and_hms(2024, 3, 29, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        ];
        let bars: Vec<Bar> = stamps
            .iter()
            .map(|&timestamp| Bar {
                timestamp,
                open: 1.0,
                high: 1.1,
                low: 0.9,
                close: 1.05,
                volume: 0.0,
            })
            .collect();
        let table = FeatureAssembler::new(&config)
            .assemble(&BarSeries::from_bars(&bars).unwrap())
            .unwrap();

        assert_eq!(table.int("day_of_week").unwrap(), &[Some(4), Some(0), Some(1)]);
        assert_eq!(table.int("is_friday").unwrap(), &[Some(1), Some(0), Some(0)]);
        assert_eq!(table.int("is_monday").unwrap(), &[Some(0), Some(1), Some(0)]);
        assert_eq!(table.int("quarter").unwrap(), &[Some(1), Some(2), Some(4)]);
        assert_eq!(table.int("is_month_end").unwrap(), &[Some(0), Some(0), Some(1)]);
        assert_eq!(table.int("is_quarter_start").unwrap(), &[Some(0), Some(1), Some(0)]);
        assert_eq!(table.int("is_quarter_end").unwrap(), &[Some(0), Some(0), Some(1)]);
        assert_eq!(table.int("week_of_year").unwrap(), &[Some(13), Some(14), Some(1)]);
        assert_eq!(table.int("candle_color").unwrap(), &[Some(1); 3]);
        let month_cos = table.float("month_cos").unwrap();
        assert!((month_cos[2].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_series_keeps_full_column_set() {
        let config = FeatureConfig::default();
        let series = BarSeries::from_bars(&trending_bars(5)).unwrap();
        let table = FeatureAssembler::new(&config).assemble(&series).unwrap();
        assert_eq!(table.width(), feature_catalog(&config).len() - 4 + 1);
        assert!(table.complete_rows().iter().all(|complete| !complete));
        assert!(table.float("sma_200").unwrap().iter().all(Option::is_none));
    }
}

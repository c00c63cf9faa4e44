use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use tracing::warn;

use crate::error::{PrepError, ensure_aligned};

/// Fields of a bar: timestamp plus OHLCV.
pub const BAR_FIELDS: usize = 6;

/// One open/high/low/close/volume record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered bars for one (instrument, timeframe), stored column-wise.
///
/// Timestamps are strictly increasing. The series is read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    timestamps: Vec<DateTime<Utc>>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    source_columns: usize,
}

impl BarSeries {
    pub fn from_bars(bars: &[Bar]) -> Result<Self, PrepError> {
        let series = Self {
            timestamps: bars.iter().map(|b| b.timestamp).collect(),
            open: bars.iter().map(|b| b.open).collect(),
            high: bars.iter().map(|b| b.high).collect(),
            low: bars.iter().map(|b| b.low).collect(),
            close: bars.iter().map(|b| b.close).collect(),
            volume: bars.iter().map(|b| b.volume).collect(),
            source_columns: BAR_FIELDS,
        };
        series.check_invariants()?;
        Ok(series)
    }

    fn check_invariants(&self) -> Result<(), PrepError> {
        ensure_aligned(&[
            ("timestamp", self.timestamps.len()),
            ("open", self.open.len()),
            ("high", self.high.len()),
            ("low", self.low.len()),
            ("close", self.close.len()),
            ("volume", self.volume.len()),
        ])?;
        if let Some(idx) = self.timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(PrepError::invalid_input(format!(
                "timestamps must be strictly increasing (row {} at {} is not after {})",
                idx + 1,
                self.timestamps[idx + 1].to_rfc3339(),
                self.timestamps[idx].to_rfc3339()
            )));
        }
        let prices = [
            ("open", &self.open),
            ("high", &self.high),
            ("low", &self.low),
            ("close", &self.close),
            ("volume", &self.volume),
        ];
        for (name, values) in prices {
            if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
                return Err(PrepError::invalid_input(format!(
                    "{name} contains a non-finite value at row {idx}"
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    /// Column count of the file the series was read from; extra columns
    /// beyond OHLCV are counted but not loaded.
    pub fn source_columns(&self) -> usize {
        self.source_columns
    }
}

const TIMESTAMP_ALIASES: [&str; 4] = ["timestamp", "datetime", "date", "time"];

/// Read a raw OHLCV CSV into a `BarSeries`.
///
/// Column names match case-insensitively. Rows are sorted by timestamp and
/// duplicate timestamps collapse to their last occurrence.
pub fn load_bars(path: &Path) -> Result<BarSeries> {
    let df = CsvReader::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .has_header(true)
        .infer_schema(None)
        .finish()
        .with_context(|| format!("Unable to read {} into DataFrame", path.display()))?;
    bars_from_frame(&df).with_context(|| format!("Invalid bar data in {}", path.display()))
}

pub fn bars_from_frame(df: &DataFrame) -> Result<BarSeries> {
    if df.height() == 0 {
        return Err(PrepError::invalid_input("series is empty").into());
    }

    let ts_name = TIMESTAMP_ALIASES
        .iter()
        .find_map(|alias| find_column(df, alias))
        .ok_or_else(|| {
            anyhow!("Missing timestamp column (expected one of {TIMESTAMP_ALIASES:?})")
        })?;
    let timestamps = timestamp_values(df.column(&ts_name)?)?;

    let mut prices = Vec::with_capacity(5);
    for name in ["open", "high", "low", "close", "volume"] {
        let actual = find_column(df, name)
            .ok_or_else(|| anyhow!("Missing required OHLCV column '{name}'"))?;
        prices.push(series_to_f64(df.column(&actual)?)?);
    }

    let mut rows: Vec<Bar> = timestamps
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| Bar {
            timestamp,
            open: prices[0][i],
            high: prices[1][i],
            low: prices[2][i],
            close: prices[3][i],
            volume: prices[4][i],
        })
        .collect();
    let before = rows.len();
    rows = dedup_sorted(rows);
    if rows.len() != before {
        warn!(
            collapsed = before - rows.len(),
            "Duplicate timestamps collapsed to their last occurrence"
        );
    }
    let mut series = BarSeries::from_bars(&rows)?;
    series.source_columns = df.width();
    Ok(series)
}

/// Sort by timestamp (stable) and keep the last bar for each timestamp.
fn dedup_sorted(mut rows: Vec<Bar>) -> Vec<Bar> {
    rows.sort_by_key(|bar| bar.timestamp);
    let mut out: Vec<Bar> = Vec::with_capacity(rows.len());
    for bar in rows {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

fn find_column(df: &DataFrame, wanted: &str) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted))
        .map(|name| name.to_string())
}

fn series_to_f64(series: &Series) -> Result<Vec<f64>> {
    let name = series.name().to_string();
    let values: Vec<Option<f64>> = match series.dtype() {
        DataType::Float64 => series.f64()?.into_iter().collect(),
        DataType::Float32 => series
            .f32()?
            .into_iter()
            .map(|v| v.map(|x| x as f64))
            .collect(),
        DataType::Int64 => series
            .i64()?
            .into_iter()
            .map(|v| v.map(|x| x as f64))
            .collect(),
        DataType::Int32 => series
            .i32()?
            .into_iter()
            .map(|v| v.map(|x| x as f64))
            .collect(),
        DataType::UInt64 => series
            .u64()?
            .into_iter()
            .map(|v| v.map(|x| x as f64))
            .collect(),
        DataType::UInt32 => series
            .u32()?
            .into_iter()
            .map(|v| v.map(|x| x as f64))
            .collect(),
        other => {
            return Err(PrepError::invalid_input(format!(
                "column {name} must be numeric (got {other:?})"
            ))
            .into());
        }
    };
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                PrepError::invalid_input(format!("column {name} has a null at row {row}")).into()
            })
        })
        .collect()
}

fn timestamp_values(series: &Series) -> Result<Vec<DateTime<Utc>>> {
    let mut out = Vec::with_capacity(series.len());
    for (row, value) in series.iter().enumerate() {
        let raw = match value {
            AnyValue::String(s) => s.to_string(),
            AnyValue::StringOwned(ref s) => s.to_string(),
            AnyValue::Null => {
                return Err(PrepError::invalid_input(format!("timestamp is null at row {row}")).into());
            }
            other => other.to_string(),
        };
        out.push(parse_timestamp(&raw).with_context(|| format!("row {row}"))?);
    }
    Ok(out)
}

/// Parse the timestamp spellings produced by common bar exporters. Naive
/// values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim().trim_matches('"');
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(anyhow!("Unrecognised timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn load_bars_sorts_dedups_and_matches_case_insensitively() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("EUR_USD_daily.csv");
        std::fs::write(
            &path,
            "Date,Open,High,Low,Close,Volume\n\
             2024-01-03,1.2,1.3,1.1,1.25,10\n\
             2024-01-01,1.0,1.1,0.9,1.05,10\n\
             2024-01-02,1.1,1.2,1.0,1.15,10\n\
             2024-01-02,1.1,1.2,1.0,1.16,12\n",
        )?;

        let series = load_bars(&path)?;
        assert_eq!(series.len(), 3);
        assert_eq!(series.source_columns(), BAR_FIELDS);
        assert_eq!(series.close(), &[1.05, 1.16, 1.25]);
        assert_eq!(series.volume(), &[10.0, 12.0, 10.0]);
        assert_eq!(
            series.timestamps()[0],
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        Ok(())
    }

    #[test]
    fn extra_source_columns_are_counted_but_not_loaded() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("GBP_USD_1h.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume,spread,complete
             2024-01-01T00:00:00Z,1.0,1.1,0.9,1.05,10,0.0002,true
             2024-01-01T01:00:00Z,1.05,1.2,1.0,1.15,11,0.0003,true
",
        )?;
        let series = load_bars(&path)?;
        assert_eq!(series.source_columns(), 8);
        assert_eq!(series.close(), &[1.05, 1.15]);
        Ok(())
    }

    #[test]
    fn missing_ohlcv_column_is_reported() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "timestamp,open,high,low,close\n2024-01-01,1,1,1,1\n")?;
        let err = load_bars(&path).unwrap_err();
        assert!(format!("{err:#}").contains("volume"));
        Ok(())
    }

    #[test]
    fn from_bars_rejects_empty_and_unordered_input() {
        assert!(matches!(
            BarSeries::from_bars(&[]),
            Err(PrepError::InvalidInput(_))
        ));
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bar = Bar {
            timestamp: t,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        assert!(matches!(
            BarSeries::from_bars(&[bar, bar]),
            Err(PrepError::InvalidInput(_))
        ));
    }

    #[test]
    fn parse_timestamp_accepts_common_spellings() -> Result<()> {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z")?, expected);
        assert_eq!(parse_timestamp("2024-03-01 12:00:00")?, expected);
        assert_eq!(parse_timestamp("2024-03-01 13:00:00+01:00")?, expected);
        assert_eq!(
            parse_timestamp("2024-03-01")?,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_timestamp("yesterday").is_err());
        Ok(())
    }
}

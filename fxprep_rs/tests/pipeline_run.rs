use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::Result;
use fxprep_rs::{
    Bar, BarSeries, Config, FeatureConfig, ItemStatus, WorkItem, prepare_table, read_table, run,
};
use polars::prelude::*;
use tempfile::tempdir;

/// Daily bars with close rising by `step` every row.
fn rising_bars(rows: usize, step: f64) -> Vec<Bar> {
    let start = chrono::DateTime::parse_from_rfc3339("2022-01-03T00:00:00Z")
        .expect("valid start")
        .with_timezone(&chrono::Utc);
    (0..rows)
        .map(|i| {
            let close = 1.1 + i as f64 * step;
            let open = close - step / 2.0;
            Bar {
                timestamp: start + chrono::Duration::days(i as i64),
                open,
                high: close + step,
                low: open - step,
                close,
                volume: 500.0 + i as f64,
            }
        })
        .collect()
}

fn write_bars(input_dir: &Path, item: &WorkItem, bars: &[Bar]) -> Result<()> {
    let dir = input_dir.join(&item.timeframe);
    fs::create_dir_all(&dir)?;
    let mut csv = String::from("Date,Open,High,Low,Close,Volume\n");
    for bar in bars {
        writeln!(
            csv,
            "{},{},{},{},{},{}",
            bar.timestamp.format("%Y-%m-%d %H:%M:%S"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        )?;
    }
    fs::write(
        dir.join(format!("{}_{}.csv", item.instrument, item.timeframe)),
        csv,
    )?;
    Ok(())
}

fn single_item_config(input: &Path, output: &Path, instruments: &[&str]) -> Config {
    let mut config = Config::new(input, output);
    config.instruments = instruments.iter().map(|s| s.to_string()).collect();
    config.timeframes = vec!["daily".to_string()];
    config
}

#[test]
fn rising_series_keeps_one_hundred_rows_labelled_up() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    let item = WorkItem::new("EUR_USD", "daily");
    write_bars(input.path(), &item, &rising_bars(300, 0.0001))?;

    let config = single_item_config(input.path(), output.path(), &["EUR_USD"]);
    let summary = run(&config)?;
    assert_eq!(summary.succeeded(), 1, "{summary}");

    let ItemStatus::Succeeded(stats) = &summary.reports[0].status else {
        panic!("expected success: {summary}");
    };
    assert_eq!(stats.input_rows, 300);
    assert_eq!(stats.output_rows, 100);

    let df = read_table(&stats.output)?;
    assert_eq!(df.height(), 100);

    let direction = df.column("target_direction")?.cast(&DataType::Int64)?;
    assert!(direction.i64()?.into_iter().all(|v| v == Some(1)));

    let rsi = df.column("rsi")?.cast(&DataType::Float64)?;
    for value in rsi.f64()?.into_iter() {
        let value = value.expect("rsi defined on retained rows");
        assert!(value > 99.99 && value <= 100.0, "rsi {value}");
    }
    Ok(())
}

#[test]
fn second_run_produces_byte_identical_output() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    let item = WorkItem::new("GBP_USD", "daily");
    write_bars(input.path(), &item, &rising_bars(260, 0.0003))?;
    let config = single_item_config(input.path(), output.path(), &["GBP_USD"]);

    let first = run(&config)?;
    let ItemStatus::Succeeded(first_stats) = &first.reports[0].status else {
        panic!("expected success: {first}");
    };
    let first_bytes = fs::read(&first_stats.output)?;
    assert!(!first_stats.unchanged);

    let second = run(&config)?;
    let ItemStatus::Succeeded(second_stats) = &second.reports[0].status else {
        panic!("expected success: {second}");
    };
    assert!(second_stats.unchanged);
    assert_eq!(fs::read(&second_stats.output)?, first_bytes);
    Ok(())
}

#[test]
fn written_table_reads_back_with_same_shape_and_prices() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    let item = WorkItem::new("USD_JPY", "daily");
    let bars = rising_bars(240, 0.01);
    write_bars(input.path(), &item, &bars)?;
    let config = single_item_config(input.path(), output.path(), &["USD_JPY"]);
    run(&config)?;

    let expected = prepare_table(&BarSeries::from_bars(&bars)?, &config.features)?;
    let path = output
        .path()
        .join("daily")
        .join("USD_JPY_daily_processed.csv");
    let df = read_table(&path)?;

    assert_eq!(df.get_column_names(), expected.column_names());
    assert_eq!(df.height(), expected.height());

    let close = df.column("close")?.cast(&DataType::Float64)?;
    let expected_close = expected.float("close").expect("close column");
    for (read, want) in close.f64()?.into_iter().zip(expected_close) {
        let (read, want) = (read.expect("close"), want.expect("close"));
        assert!((read - want).abs() < 1e-12, "{read} vs {want}");
    }

    let stamps = df.column("timestamp")?;
    let first = stamps.str()?.get(0).expect("first timestamp");
    assert_eq!(
        first,
        expected.timestamps()[0].to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    Ok(())
}

#[test]
fn retained_rows_follow_warmup_and_horizon() -> Result<()> {
    let features = FeatureConfig::default();
    let warmup = features.warmup_rows();
    for rows in [150, warmup, warmup + 1, warmup + 2, 320] {
        let series = BarSeries::from_bars(&rising_bars(rows, 0.0002))?;
        let table = prepare_table(&series, &features)?;
        let expected = rows.saturating_sub(warmup + features.forecast_horizon);
        assert_eq!(table.height(), expected, "rows = {rows}");
        assert_eq!(table.width(), fxprep_rs::feature_catalog(&features).len() + 1);
    }

    let longer = FeatureConfig {
        forecast_horizon: 5,
        ..FeatureConfig::default()
    };
    let series = BarSeries::from_bars(&rising_bars(300, 0.0002))?;
    assert_eq!(prepare_table(&series, &longer)?.height(), 300 - warmup - 5);
    Ok(())
}

#[test]
fn missing_instrument_is_skipped_while_others_complete() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    write_bars(
        input.path(),
        &WorkItem::new("EUR_USD", "daily"),
        &rising_bars(230, 0.0001),
    )?;

    let mut config = single_item_config(input.path(), output.path(), &["EUR_USD", "AUD_USD"]);
    config.n_workers = 2;
    let summary = run(&config)?;

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.failed(), 0);
    assert!(matches!(
        summary.report("AUD_USD", "daily").map(|r| &r.status),
        Some(ItemStatus::Skipped { .. })
    ));
    assert!(output
        .path()
        .join("daily")
        .join("EUR_USD_daily_processed.csv")
        .exists());
    assert!(!output
        .path()
        .join("daily")
        .join("AUD_USD_daily_processed.csv")
        .exists());
    Ok(())
}

#[test]
fn duplicate_timestamps_keep_the_last_row() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    let item = WorkItem::new("USD_CHF", "daily");
    let mut bars = rising_bars(230, 0.0001);
    // Row 210 survives the 199-row warm-up, so its replacement must reach the output.
    let mut replacement = bars[210];
    replacement.close += 0.5;
    replacement.high += 0.5;
    bars.insert(211, replacement);
    write_bars(input.path(), &item, &bars)?;

    let config = single_item_config(input.path(), output.path(), &["USD_CHF"]);
    let summary = run(&config)?;
    let ItemStatus::Succeeded(stats) = &summary.reports[0].status else {
        panic!("expected success: {summary}");
    };
    assert_eq!(stats.input_rows, 230);

    let df = read_table(&stats.output)?;
    let stamp = replacement
        .timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let stamps = df.column("timestamp")?;
    let matches: Vec<usize> = stamps
        .str()?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| (value == Some(stamp.as_str())).then_some(idx))
        .collect();
    assert_eq!(matches.len(), 1, "timestamp {stamp} should appear once");

    let close = df.column("close")?.cast(&DataType::Float64)?;
    let kept = close.f64()?.get(matches[0]).expect("close on retained row");
    assert!((kept - replacement.close).abs() < 1e-12, "{kept} vs {}", replacement.close);
    Ok(())
}

#[test]
fn rerun_without_complete_rows_replaces_previous_table() -> Result<()> {
    let input = tempdir()?;
    let output = tempdir()?;
    let item = WorkItem::new("AUD_USD", "daily");
    write_bars(input.path(), &item, &rising_bars(260, 0.0002))?;
    let mut config = single_item_config(input.path(), output.path(), &["AUD_USD"]);

    let first = run(&config)?;
    let ItemStatus::Succeeded(first_stats) = &first.reports[0].status else {
        panic!("expected success: {first}");
    };
    assert_eq!(first_stats.output_rows, 60);
    assert_eq!(first_stats.input_columns, 6);

    // 260 bars cannot cover the 199-row warm-up plus a 100-bar horizon.
    config.features.forecast_horizon = 100;
    let second = run(&config)?;
    let ItemStatus::Succeeded(second_stats) = &second.reports[0].status else {
        panic!("expected success: {second}");
    };
    assert_eq!(second_stats.output_rows, 0);
    assert!(!second_stats.unchanged);
    assert_eq!(second_stats.output, first_stats.output);

    let written = fs::read_to_string(&second_stats.output)?;
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 1, "expected header only:\n{written}");
    assert!(lines[0].starts_with("timestamp,open,high,low,close,volume"));
    assert!(lines[0].ends_with("target_direction_multi"));
    Ok(())
}

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::data::{BarSeries, load_bars};
use crate::error::PrepError;
use crate::pipeline::{SeriesSource, TableSink, WorkItem, WriteOutcome};
use crate::table::FeatureTable;

/// Reads `<input_dir>/<timeframe>/<INSTRUMENT>_<timeframe>.csv`.
#[derive(Debug, Clone)]
pub struct CsvSeriesSource {
    input_dir: PathBuf,
}

impl CsvSeriesSource {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    pub fn path_for(&self, item: &WorkItem) -> PathBuf {
        self.input_dir
            .join(&item.timeframe)
            .join(format!("{}_{}.csv", item.instrument, item.timeframe))
    }
}

impl SeriesSource for CsvSeriesSource {
    fn load(&self, item: &WorkItem) -> Result<BarSeries> {
        let path = self.path_for(item);
        if !path.is_file() {
            return Err(PrepError::MissingSourceItem {
                instrument: item.instrument.clone(),
                timeframe: item.timeframe.clone(),
                path,
            }
            .into());
        }
        load_bars(&path)
    }
}

/// Writes `<output_dir>/<timeframe>/<INSTRUMENT>_<timeframe>_processed.csv`.
///
/// The table is streamed to a sibling temp file and hashed on the way out.
/// An existing output with the same digest is left untouched; otherwise the
/// temp file replaces it by rename, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct CsvTableSink {
    output_dir: PathBuf,
}

impl CsvTableSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, item: &WorkItem) -> PathBuf {
        self.output_dir
            .join(&item.timeframe)
            .join(format!("{}_{}_processed.csv", item.instrument, item.timeframe))
    }
}

impl TableSink for CsvTableSink {
    fn write(&self, item: &WorkItem, table: &FeatureTable) -> Result<WriteOutcome> {
        let path = self.path_for(item);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create {}", parent.display()))?;
        }
        let mut df = table
            .to_data_frame()
            .with_context(|| format!("Failed to build output frame for {item}"))?;

        let tmp_path = path.with_extension("csv.tmp");
        let new_hash = write_csv_hashed(&mut df, &tmp_path)?;

        if path.exists() {
            let old_hash = sha256_file(&path).map_err(|err| discard(&tmp_path, err))?;
            if old_hash == new_hash {
                fs::remove_file(&tmp_path)
                    .with_context(|| format!("Unable to remove {}", tmp_path.display()))?;
                info!(
                    rows = df.height(),
                    path = %path.display(),
                    "Processed table unchanged; keeping existing file"
                );
                return Ok(WriteOutcome {
                    path,
                    sha256: new_hash,
                    unchanged: true,
                });
            }
            debug!(
                existing_hash = %old_hash,
                new_hash = %new_hash,
                path = %path.display(),
                "Processed table differs; replacing"
            );
        }

        fs::rename(&tmp_path, &path)
            .with_context(|| {
                format!("Unable to move {} to {}", tmp_path.display(), path.display())
            })
            .map_err(|err| discard(&tmp_path, err))?;
        info!(
            rows = df.height(),
            columns = df.width(),
            path = %path.display(),
            "Processed table written"
        );
        Ok(WriteOutcome {
            path,
            sha256: new_hash,
            unchanged: false,
        })
    }
}

/// Stream `df` to `path` and return the SHA-256 of the bytes written. A
/// partially written file is removed before the error is returned.
fn write_csv_hashed(df: &mut DataFrame, path: &Path) -> Result<String> {
    let file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    let written = CsvWriter::new(&mut writer)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("Failed to write {}", path.display()));
    let flushed = written.and_then(|()| {
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", path.display()))
    });
    match flushed {
        Ok(()) => Ok(writer.finalize_hex()),
        Err(err) => {
            drop(writer);
            Err(discard(path, err))
        }
    }
}

fn discard(tmp_path: &Path, err: anyhow::Error) -> anyhow::Error {
    if let Err(remove_err) = fs::remove_file(tmp_path) {
        warn!(
            path = %tmp_path.display(),
            error = %remove_err,
            "Unable to remove temp file"
        );
    }
    err
}

/// Read a processed table back as a polars frame.
pub fn read_table(path: &Path) -> Result<DataFrame> {
    CsvReader::from_path(path)
        .with_context(|| format!("Unable to open {}", path.display()))?
        .has_header(true)
        .infer_schema(None)
        .finish()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureCategory;
    use chrono::{TimeZone, Utc};

    fn item() -> WorkItem {
        WorkItem::new("EUR_USD", "daily")
    }

    fn small_table(scale: f64) -> FeatureTable {
        let stamps = (0..3)
            .map(|i| Utc.with_ymd_and_hms(2024, 1, 1 + i, 0, 0, 0).unwrap())
            .collect();
        let mut table = FeatureTable::new(stamps);
        table
            .push_float(
                "close",
                FeatureCategory::Raw,
                vec![Some(1.25 * scale), Some(1.5 * scale), Some(1.75 * scale)],
            )
            .unwrap();
        table
            .push_int("target_direction", FeatureCategory::Target, vec![Some(1), Some(1), Some(0)])
            .unwrap();
        table
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp_path = dir.path().join("EUR_USD_daily_processed.csv.tmp");
        let nested = Series::new("nested", &[Series::new("", &[1i64, 2])]);
        let mut df = DataFrame::new(vec![nested]).unwrap();

        assert!(write_csv_hashed(&mut df, &tmp_path).is_err());
        assert!(!tmp_path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_input_is_reported_as_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSeriesSource::new(dir.path());
        let err = source.load(&item()).unwrap_err();
        let missing = err.downcast_ref::<PrepError>().unwrap();
        assert!(matches!(missing, PrepError::MissingSourceItem { .. }));
        assert!(source.path_for(&item()).ends_with("daily/EUR_USD_daily.csv"));
    }

    #[test]
    fn sink_skips_identical_rewrites_and_replaces_changed_tables() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = CsvTableSink::new(dir.path());

        let first = sink.write(&item(), &small_table(1.0))?;
        assert!(!first.unchanged);
        assert!(first.path.ends_with("daily/EUR_USD_daily_processed.csv"));
        assert_eq!(sha256_file(&first.path)?, first.sha256);

        let second = sink.write(&item(), &small_table(1.0))?;
        assert!(second.unchanged);
        assert_eq!(second.sha256, first.sha256);
        assert!(!first.path.with_extension("csv.tmp").exists());

        let third = sink.write(&item(), &small_table(2.0))?;
        assert!(!third.unchanged);
        assert_ne!(third.sha256, first.sha256);

        let df = read_table(&third.path)?;
        assert_eq!(df.shape(), (3, 3));
        assert_eq!(df.get_column_names(), vec!["timestamp", "close", "target_direction"]);
        Ok(())
    }
}

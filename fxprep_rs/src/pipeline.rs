use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::{Config, FeatureConfig};
use crate::data::BarSeries;
use crate::engineer::FeatureAssembler;
use crate::error::PrepError;
use crate::table::FeatureTable;
use crate::targets::TargetGenerator;

/// One (instrument, timeframe) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub instrument: String,
    pub timeframe: String,
}

impl WorkItem {
    pub fn new(instrument: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.instrument, self.timeframe)
    }
}

/// Where bar series come from. A missing item should surface as
/// [`PrepError::MissingSourceItem`] so the driver can skip it.
pub trait SeriesSource: Sync {
    fn load(&self, item: &WorkItem) -> Result<BarSeries>;
}

/// Where finished tables go.
pub trait TableSink: Sync {
    fn write(&self, item: &WorkItem, table: &FeatureTable) -> Result<WriteOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub sha256: String,
    /// True when an identical table was already in place.
    pub unchanged: bool,
}

/// Assemble features, attach labels, and drop every row with an undefined
/// value. Pure: no I/O, no logging.
pub fn prepare_table(series: &BarSeries, config: &FeatureConfig) -> Result<FeatureTable, PrepError> {
    let generator = TargetGenerator::from_config(config)?;
    let features = FeatureAssembler::new(config).assemble(series)?;
    let labelled = generator.attach(&features, series.close())?;
    Ok(labelled.retain_complete_rows())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStats {
    pub input_rows: usize,
    pub input_columns: usize,
    pub output_rows: usize,
    pub output_columns: usize,
    pub output: PathBuf,
    pub unchanged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded(ItemStats),
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub item: WorkItem,
    pub status: ItemStatus,
}

/// Per-item outcomes in the order items were scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub reports: Vec<ItemReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Succeeded(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    pub fn report(&self, instrument: &str, timeframe: &str) -> Option<&ItemReport> {
        self.reports
            .iter()
            .find(|r| r.item.instrument == instrument && r.item.timeframe == timeframe)
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.status)).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:<10} {:<10} {:>8} {:>8} {:>9} {:>9}",
            "instrument", "timeframe", "status", "rows_in", "cols_in", "rows_out", "cols_out"
        )?;
        for report in &self.reports {
            let WorkItem {
                instrument,
                timeframe,
            } = &report.item;
            match &report.status {
                ItemStatus::Succeeded(stats) => writeln!(
                    f,
                    "{:<12} {:<10} {:<10} {:>8} {:>8} {:>9} {:>9}",
                    instrument,
                    timeframe,
                    if stats.unchanged { "unchanged" } else { "ok" },
                    stats.input_rows,
                    stats.input_columns,
                    stats.output_rows,
                    stats.output_columns
                )?,
                ItemStatus::Skipped { reason } => {
                    writeln!(f, "{instrument:<12} {timeframe:<10} {:<10} {reason}", "skipped")?
                }
                ItemStatus::Failed { reason } => {
                    writeln!(f, "{instrument:<12} {timeframe:<10} {:<10} {reason}", "failed")?
                }
            }
        }
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Runs every configured (instrument, timeframe) item through load,
/// prepare and write. A failing item is reported and the run continues.
pub struct PipelineDriver<'a, S, W> {
    config: &'a Config,
    source: S,
    sink: W,
}

impl<'a, S: SeriesSource, W: TableSink> PipelineDriver<'a, S, W> {
    /// Rejects an invalid configuration before any item is touched.
    pub fn new(config: &'a Config, source: S, sink: W) -> Result<Self, PrepError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sink,
        })
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.config
            .instruments
            .iter()
            .flat_map(|instrument| {
                self.config
                    .timeframes
                    .iter()
                    .map(move |timeframe| WorkItem::new(instrument.as_str(), timeframe.as_str()))
            })
            .collect()
    }

    pub fn run(&self) -> Result<RunSummary> {
        let items = self.items();
        let started = Instant::now();
        info!(
            items = items.len(),
            n_workers = self.config.n_workers,
            horizon = self.config.features.forecast_horizon,
            warmup_rows = self.config.features.warmup_rows(),
            input = %self.config.input_dir.display(),
            output = %self.config.output_dir.display(),
            "Starting feature preparation"
        );

        let reports: Vec<ItemReport> = if self.config.n_workers > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.config.n_workers)
                .build()
                .context("Failed to build worker pool")?;
            pool.install(|| items.par_iter().map(|item| self.report(item)).collect())
        } else {
            items.iter().map(|item| self.report(item)).collect()
        };

        let summary = RunSummary { reports };
        info!(
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Feature preparation finished"
        );
        Ok(summary)
    }

    fn report(&self, item: &WorkItem) -> ItemReport {
        let status = match self.process_item(item) {
            Ok(stats) => ItemStatus::Succeeded(stats),
            Err(err) => match err.downcast_ref::<PrepError>() {
                Some(PrepError::MissingSourceItem { path, .. }) => {
                    warn!(
                        instrument = %item.instrument,
                        timeframe = %item.timeframe,
                        path = %path.display(),
                        "Source file missing; skipping"
                    );
                    ItemStatus::Skipped {
                        reason: format!("missing {}", path.display()),
                    }
                }
                _ => {
                    error!(
                        instrument = %item.instrument,
                        timeframe = %item.timeframe,
                        error = %format!("{err:#}"),
                        "Item failed"
                    );
                    ItemStatus::Failed {
                        reason: format!("{err:#}"),
                    }
                }
            },
        };
        ItemReport {
            item: item.clone(),
            status,
        }
    }

    /// Load, prepare and persist one item.
    pub fn process_item(&self, item: &WorkItem) -> Result<ItemStats> {
        info!(instrument = %item.instrument, timeframe = %item.timeframe, "Processing item");
        let series = self.source.load(item)?;
        info!(
            instrument = %item.instrument,
            timeframe = %item.timeframe,
            rows = series.len(),
            "Series loaded"
        );

        let table = prepare_table(&series, &self.config.features)
            .with_context(|| format!("Failed to prepare {item}"))?;
        if table.height() == 0 {
            // Still written so an earlier table for this item does not survive.
            warn!(
                instrument = %item.instrument,
                timeframe = %item.timeframe,
                rows = series.len(),
                warmup_rows = self.config.features.warmup_rows(),
                horizon = self.config.features.forecast_horizon,
                "No complete rows after burn-in trim; writing header-only table"
            );
        }

        let outcome = self.sink.write(item, &table)?;
        info!(
            instrument = %item.instrument,
            timeframe = %item.timeframe,
            rows_in = series.len(),
            rows_out = table.height(),
            columns_out = table.width(),
            dropped = series.len() - table.height(),
            "Item prepared"
        );
        Ok(ItemStats {
            input_rows: series.len(),
            input_columns: series.source_columns(),
            output_rows: table.height(),
            output_columns: table.width(),
            output: outcome.path,
            unchanged: outcome.unchanged,
        })
    }
}

pub mod config;
pub mod data;
pub mod engineer;
pub mod error;
pub mod feature;
pub mod indicators;
pub mod numeric;
pub mod pipeline;
pub mod storage;
pub mod table;
pub mod targets;

use anyhow::Result;

pub use config::{Config, FeatureConfig, load_feature_config};
pub use data::{Bar, BarSeries, load_bars};
pub use engineer::FeatureAssembler;
pub use error::PrepError;
pub use feature::{FeatureCategory, FeatureDescriptor, feature_catalog};
pub use pipeline::{
    ItemReport, ItemStats, ItemStatus, PipelineDriver, RunSummary, SeriesSource, TableSink,
    WorkItem, WriteOutcome, prepare_table,
};
pub use storage::{CsvSeriesSource, CsvTableSink, read_table};
pub use table::{ColumnData, FeatureColumn, FeatureTable};
pub use targets::{DirectionClass, TargetGenerator, Targets};

/// Process every configured item from CSV files under `input_dir` into
/// processed CSV tables under `output_dir`.
pub fn run(config: &Config) -> Result<RunSummary> {
    let source = CsvSeriesSource::new(&config.input_dir);
    let sink = CsvTableSink::new(&config.output_dir);
    let driver = PipelineDriver::new(config, source, sink)?;
    driver.run()
}

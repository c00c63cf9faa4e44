use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use fxprep_rs::config::{Config, FeatureConfig, load_feature_config};

#[derive(Parser, Debug)]
#[command(
    name = "fxprep",
    about = "Feature engineering and label generation for currency bar series"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build processed feature tables for every instrument and timeframe
    #[command(name = "run")]
    Run(RunArgs),
    /// Print the ordered list of output columns
    #[command(name = "catalog")]
    Catalog(CatalogArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ParamArgs {
    /// JSON file overriding feature parameters; missing fields keep defaults
    #[arg(long = "params", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub params: Option<PathBuf>,

    /// Forecast horizon in bars for the target labels
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Neutral-zone threshold for the multi-class label, as a fraction
    #[arg(long)]
    pub threshold: Option<f64>,
}

impl ParamArgs {
    pub fn feature_config(&self) -> Result<FeatureConfig> {
        let mut features = match &self.params {
            Some(path) => load_feature_config(path)?,
            None => FeatureConfig::default(),
        };
        if let Some(horizon) = self.horizon {
            features.forecast_horizon = horizon;
        }
        if let Some(threshold) = self.threshold {
            features.neutral_threshold = threshold;
        }
        Ok(features)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory holding <timeframe>/<INSTRUMENT>_<timeframe>.csv inputs
    #[arg(long = "input-dir", value_hint = clap::ValueHint::DirPath)]
    pub input_dir: PathBuf,

    /// Directory receiving processed tables and the run log
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Comma-separated instruments (default: EUR_USD,GBP_USD,USD_JPY,AUD_USD,USD_CHF)
    #[arg(long, value_delimiter = ',')]
    pub instruments: Vec<String>,

    /// Comma-separated timeframes (default: daily,4h,1h)
    #[arg(long, value_delimiter = ',')]
    pub timeframes: Vec<String>,

    /// Worker threads; defaults to available parallelism
    #[arg(long)]
    pub workers: Option<usize>,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Disable writing fxprep.log into the output directory
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,
}

#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub params: ParamArgs,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}

impl RunArgs {
    pub fn into_config(self) -> Result<Config> {
        let mut config = Config::new(self.input_dir, self.output_dir);
        if !self.instruments.is_empty() {
            config.instruments = self.instruments;
        }
        if !self.timeframes.is_empty() {
            config.timeframes = self.timeframes;
        }
        config.n_workers = normalize_workers(self.workers);
        config.features = self.params.feature_config()?;
        config.validate()?;
        Ok(config)
    }
}

fn normalize_workers(value: Option<usize>) -> usize {
    value.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

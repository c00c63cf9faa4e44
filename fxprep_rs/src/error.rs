use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the feature pipeline.
///
/// Insufficient history for a window is not represented here: it surfaces as
/// `None` entries in the affected column.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PrepError {
    /// Empty series or misaligned input sequences.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Forecast horizon below one bar.
    #[error("invalid forecast horizon {0}: must be at least 1")]
    InvalidHorizon(usize),

    /// Malformed parameter set.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Expected input resource is absent.
    #[error("missing source for {instrument} ({timeframe}): {}", path.display())]
    MissingSourceItem {
        instrument: String,
        timeframe: String,
        path: PathBuf,
    },
}

impl PrepError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PrepError::InvalidInput(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        PrepError::InvalidConfig(msg.into())
    }
}

/// Ensure every named sequence shares the first one's length and is non-empty.
pub(crate) fn ensure_aligned(inputs: &[(&str, usize)]) -> Result<usize, PrepError> {
    let Some(&(first_name, len)) = inputs.first() else {
        return Err(PrepError::invalid_input("no input sequences supplied"));
    };
    if len == 0 {
        return Err(PrepError::invalid_input(format!("{first_name} is empty")));
    }
    for &(name, other) in &inputs[1..] {
        if other != len {
            return Err(PrepError::invalid_input(format!(
                "length mismatch: {first_name} has {len} values, {name} has {other}"
            )));
        }
    }
    Ok(len)
}

pub(crate) fn ensure_period(name: &str, period: usize) -> Result<(), PrepError> {
    if period == 0 {
        return Err(PrepError::invalid_input(format!(
            "{name} period must be at least 1"
        )));
    }
    Ok(())
}

use std::fmt;

use crate::config::FeatureConfig;
use crate::error::{PrepError, ensure_aligned};
use crate::feature::FeatureCategory;
use crate::numeric::{Column, checked_div, lead};
use crate::table::FeatureTable;

/// Five-way bucket of a forward return around a neutral zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DirectionClass {
    StrongDown,
    Down,
    Neutral,
    Up,
    StrongUp,
}

impl DirectionClass {
    /// First matching rule wins and every comparison is strict, so a return
    /// sitting exactly on a boundary lands in the lower bucket.
    pub fn classify(forward_return: f64, threshold: f64) -> Self {
        if forward_return > 2.0 * threshold {
            DirectionClass::StrongUp
        } else if forward_return > threshold {
            DirectionClass::Up
        } else if forward_return > -threshold {
            DirectionClass::Neutral
        } else if forward_return > -2.0 * threshold {
            DirectionClass::Down
        } else {
            DirectionClass::StrongDown
        }
    }

    /// Integer code written to the output table.
    pub fn code(self) -> i64 {
        match self {
            DirectionClass::StrongUp => 2,
            DirectionClass::Up => 1,
            DirectionClass::Neutral => 0,
            DirectionClass::Down => -1,
            DirectionClass::StrongDown => -2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DirectionClass::StrongUp => "strong_up",
            DirectionClass::Up => "up",
            DirectionClass::Neutral => "neutral",
            DirectionClass::Down => "down",
            DirectionClass::StrongDown => "strong_down",
        }
    }
}

impl fmt::Display for DirectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Forward-looking labels for every row. The last `horizon` rows of each
/// vector are undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub direction: Vec<Option<i64>>,
    pub forward_return: Column,
    pub future_close: Column,
    pub direction_class: Vec<Option<DirectionClass>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGenerator {
    horizon: usize,
    threshold: f64,
}

impl TargetGenerator {
    pub fn new(horizon: usize, threshold: f64) -> Result<Self, PrepError> {
        if horizon < 1 {
            return Err(PrepError::InvalidHorizon(horizon));
        }
        Ok(Self { horizon, threshold })
    }

    pub fn from_config(config: &FeatureConfig) -> Result<Self, PrepError> {
        Self::new(config.forecast_horizon, config.neutral_threshold)
    }

    pub fn labels(&self, close: &[f64]) -> Targets {
        let future_close = lead(close, self.horizon);
        let forward_return: Column = close
            .iter()
            .zip(future_close.iter())
            .map(|(&now, later)| later.and_then(|f| checked_div(f - now, now)))
            .collect();
        let direction = close
            .iter()
            .zip(future_close.iter())
            .map(|(&now, later)| later.map(|f| i64::from(f > now)))
            .collect();
        let direction_class = forward_return
            .iter()
            .map(|r| r.map(|r| DirectionClass::classify(r, self.threshold)))
            .collect();
        Targets {
            direction,
            forward_return,
            future_close,
            direction_class,
        }
    }

    /// New table with the four label columns appended after the features.
    pub fn attach(&self, table: &FeatureTable, close: &[f64]) -> Result<FeatureTable, PrepError> {
        ensure_aligned(&[("feature rows", table.height()), ("close", close.len())])?;
        let targets = self.labels(close);
        let codes = targets
            .direction_class
            .iter()
            .map(|class| class.map(DirectionClass::code))
            .collect();

        let mut labelled = table.clone();
        labelled.push_int("target_direction", FeatureCategory::Target, targets.direction)?;
        labelled.push_float("target_return", FeatureCategory::Target, targets.forward_return)?;
        labelled.push_float("target_close", FeatureCategory::Target, targets.future_close)?;
        labelled.push_int("target_direction_multi", FeatureCategory::Target, codes)?;
        Ok(labelled)
    }
}

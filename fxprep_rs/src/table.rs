use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;

use crate::error::PrepError;
use crate::feature::FeatureCategory;

/// Values of one table column. Indicator outputs are floats; flags, signs,
/// calendar fields and class labels are integers.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i64>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(values) => values.len(),
            ColumnData::Int(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_defined(&self, row: usize) -> bool {
        match self {
            ColumnData::Float(values) => values.get(row).is_some_and(Option::is_some),
            ColumnData::Int(values) => values.get(row).is_some_and(Option::is_some),
        }
    }

    fn select(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(values) => ColumnData::Float(rows.iter().map(|&i| values[i]).collect()),
            ColumnData::Int(values) => ColumnData::Int(rows.iter().map(|&i| values[i]).collect()),
        }
    }

    fn to_series(&self, name: &str) -> Series {
        match self {
            ColumnData::Float(values) => Series::new(name, values.as_slice()),
            ColumnData::Int(values) => Series::new(name, values.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub category: FeatureCategory,
    pub data: ColumnData,
}

/// Row-aligned table keyed by bar timestamp.
///
/// Every column has exactly `height()` entries; row `i` of every column
/// belongs to `timestamps()[i]`. Column order is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: Vec<FeatureColumn>,
}

impl FeatureTable {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    pub fn height(&self) -> usize {
        self.timestamps.len()
    }

    /// Column count including the timestamp key.
    pub fn width(&self) -> usize {
        self.columns.len() + 1
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    /// Names in output order, starting with `timestamp`.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once("timestamp")
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn float(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Float(values)) => Some(values),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<&[Option<i64>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Int(values)) => Some(values),
            _ => None,
        }
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        category: FeatureCategory,
        data: ColumnData,
    ) -> Result<(), PrepError> {
        let name = name.into();
        if data.len() != self.height() {
            return Err(PrepError::invalid_input(format!(
                "column {name} has {} rows, table has {}",
                data.len(),
                self.height()
            )));
        }
        if name == "timestamp" || self.column(&name).is_some() {
            return Err(PrepError::invalid_input(format!("duplicate column {name}")));
        }
        self.columns.push(FeatureColumn {
            name,
            category,
            data,
        });
        Ok(())
    }

    pub fn push_float(
        &mut self,
        name: impl Into<String>,
        category: FeatureCategory,
        values: Vec<Option<f64>>,
    ) -> Result<(), PrepError> {
        self.push(name, category, ColumnData::Float(values))
    }

    pub fn push_int(
        &mut self,
        name: impl Into<String>,
        category: FeatureCategory,
        values: Vec<Option<i64>>,
    ) -> Result<(), PrepError> {
        self.push(name, category, ColumnData::Int(values))
    }

    /// True for rows where every column is defined.
    pub fn complete_rows(&self) -> Vec<bool> {
        (0..self.height())
            .map(|row| self.columns.iter().all(|c| c.data.is_defined(row)))
            .collect()
    }

    /// New table holding only the rows where every column is defined, in
    /// their original order. The column set is unchanged.
    pub fn retain_complete_rows(&self) -> FeatureTable {
        let keep: Vec<usize> = self
            .complete_rows()
            .into_iter()
            .enumerate()
            .filter_map(|(idx, complete)| complete.then_some(idx))
            .collect();
        FeatureTable {
            timestamps: keep.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| FeatureColumn {
                    name: c.name.clone(),
                    category: c.category,
                    data: c.data.select(&keep),
                })
                .collect(),
        }
    }

    /// Polars view of the table with the timestamp rendered as RFC 3339 UTC.
    pub fn to_data_frame(&self) -> PolarsResult<DataFrame> {
        let stamps: Vec<String> = self
            .timestamps
            .iter()
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            .collect();
        let mut series = Vec::with_capacity(self.width());
        series.push(Series::new("timestamp", stamps));
        for column in &self.columns {
            series.push(column.data.to_series(&column.name));
        }
        DataFrame::new(series)
    }
}

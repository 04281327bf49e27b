use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use polars::prelude::*;

use crate::error::{Result, SawyerError};
use crate::rules::Window;

/// Name of the row-index column whenever a table crosses the polars boundary.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// A value type that can live in a [`Table`] column and be written out as a polars series.
pub trait Cell: Clone + std::fmt::Debug {
    fn to_series(name: &str, values: &[Self]) -> Series;

    /// Text form used in delimited table files.
    fn to_field(&self) -> String;
}

/// Spelling of a missing value in delimited table files.
pub const MISSING_FIELD: &str = "NA";

impl Cell for Option<f64> {
    fn to_series(name: &str, values: &[Self]) -> Series {
        Series::new(name.into(), values.to_vec())
    }

    fn to_field(&self) -> String {
        match self {
            Some(value) => value.to_string(),
            None => MISSING_FIELD.to_string(),
        }
    }
}

impl Cell for bool {
    fn to_series(name: &str, values: &[Self]) -> Series {
        Series::new(name.into(), values.to_vec())
    }

    fn to_field(&self) -> String {
        if *self { "True" } else { "False" }.to_string()
    }
}

impl Cell for i64 {
    fn to_series(name: &str, values: &[Self]) -> Series {
        Series::new(name.into(), values.to_vec())
    }

    fn to_field(&self) -> String {
        self.to_string()
    }
}

/// Time-indexed table with named columns. The index is strictly increasing and shared by
/// every column; column order is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    index: Vec<NaiveDateTime>,
    columns: IndexMap<String, Vec<T>>,
}

/// Measured values; `None` is the missing sentinel.
pub type SeriesTable = Table<Option<f64>>;
/// `true` marks a cell slated for removal (or, for gap-filling, a filled cell).
pub type MaskTable = Table<bool>;
/// Identifier of the last QA flag that touched each cell, `0` when untouched.
pub type FlagTable = Table<i64>;

impl<T: Cell> Table<T> {
    pub fn new(index: Vec<NaiveDateTime>) -> Result<Self> {
        if let Some(pos) = index.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(SawyerError::Alignment(format!(
                "timestamp index is not strictly increasing at row {} ({} then {})",
                pos + 1,
                index[pos],
                index[pos + 1]
            )));
        }
        Ok(Self {
            index,
            columns: IndexMap::new(),
        })
    }

    /// Builder form of [`Table::insert_column`].
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<T>) -> Result<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<T>) -> Result<()> {
        let name = name.into();
        if name == TIMESTAMP_COLUMN {
            return Err(SawyerError::config(format!(
                "'{TIMESTAMP_COLUMN}' is reserved for the row index"
            )));
        }
        if values.len() != self.index.len() {
            return Err(SawyerError::Alignment(format!(
                "column '{}' has {} values but the index has {} rows",
                name,
                values.len(),
                self.index.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// A table with the same index and column names as `other`, every cell set to `value`.
    pub fn filled_like<U>(other: &Table<U>, value: T) -> Self {
        let height = other.index.len();
        Self {
            index: other.index.clone(),
            columns: other
                .columns
                .keys()
                .map(|name| (name.clone(), vec![value.clone(); height]))
                .collect(),
        }
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn height(&self) -> usize {
        self.index.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn column(&self, name: &str) -> Option<&[T]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<T>> {
        self.columns.get_mut(name)
    }

    pub fn require_column(&self, name: &str) -> Result<&[T]> {
        self.column(name)
            .ok_or_else(|| SawyerError::config(format!("table has no column named '{name}'")))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Appends `suffix` to every column name.
    pub fn with_suffix(self, suffix: &str) -> Self {
        Self {
            index: self.index,
            columns: self
                .columns
                .into_iter()
                .map(|(name, values)| (format!("{name}{suffix}"), values))
                .collect(),
        }
    }

    /// Rows whose timestamp falls inside `window`, with open bounds resolved against the
    /// table's first timestamp and `now`.
    pub fn rows_within(&self, window: &Window, now: NaiveDateTime) -> Vec<bool> {
        select_rows(&self.index, window, now)
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let micros: Vec<i64> = self.index.iter().map(|ts| to_micros(*ts)).collect();
        let mut columns: Vec<Column> = Vec::with_capacity(self.columns.len() + 1);
        columns.push(
            Series::new(TIMESTAMP_COLUMN.into(), micros)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
                .into(),
        );
        for (name, values) in &self.columns {
            columns.push(T::to_series(name, values).into());
        }
        Ok(DataFrame::new(columns)?)
    }
}

impl SeriesTable {
    /// Reads a frame with a `timestamp` datetime column; every other column must be numeric
    /// and is cast to `Float64`, with NaN normalised to missing.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let timestamps = df.column(TIMESTAMP_COLUMN).map_err(|_| {
            SawyerError::config(format!("table has no '{TIMESTAMP_COLUMN}' column"))
        })?;
        let micros_column = timestamps
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
            .cast(&DataType::Int64)?;
        let micros = micros_column.i64()?;

        let mut index = Vec::with_capacity(df.height());
        for (row, value) in micros.into_iter().enumerate() {
            let value = value.ok_or_else(|| {
                SawyerError::Alignment(format!("timestamp missing at row {row}"))
            })?;
            index.push(from_micros(value)?);
        }

        let mut table = Table::new(index)?;
        for column in df.get_columns() {
            let name = column.name().as_str();
            if name == TIMESTAMP_COLUMN {
                continue;
            }
            let dtype = column.dtype();
            if !(dtype.is_primitive_numeric() || matches!(dtype, DataType::Null)) {
                return Err(SawyerError::config(format!(
                    "column '{name}' has non-numeric type {dtype}"
                )));
            }
            let as_float = column.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = as_float
                .f64()?
                .into_iter()
                .map(|value| value.filter(|v| !v.is_nan()))
                .collect();
            table.insert_column(name, values)?;
        }
        Ok(table)
    }

    /// Copy of the table with every masked cell set to missing.
    pub fn apply_mask(&self, mask: &MaskTable) -> Self {
        let mut masked = self.clone();
        for (name, values) in masked.columns.iter_mut() {
            if let Some(flags) = mask.column(name) {
                for (value, remove) in values.iter_mut().zip(flags) {
                    if *remove {
                        *value = None;
                    }
                }
            }
        }
        masked
    }

    /// Left-joins `column` onto `target` by exact timestamp. Fails when the two timelines
    /// share no timestamp at all.
    pub fn align_column(&self, column: &str, target: &[NaiveDateTime]) -> Result<Vec<Option<f64>>> {
        let values = self.require_column(column)?;
        let positions: HashMap<NaiveDateTime, usize> = self
            .index
            .iter()
            .enumerate()
            .map(|(pos, ts)| (*ts, pos))
            .collect();

        let mut matched = 0usize;
        let aligned = target
            .iter()
            .map(|ts| match positions.get(ts) {
                Some(pos) => {
                    matched += 1;
                    values[*pos]
                }
                None => None,
            })
            .collect();

        if matched == 0 && !target.is_empty() {
            return Err(SawyerError::Alignment(format!(
                "column '{column}' shares no timestamps with the target series"
            )));
        }
        Ok(aligned)
    }
}

impl MaskTable {
    /// Cell-wise OR with `other`, matching columns by name.
    pub fn union_with(&mut self, other: &MaskTable) {
        for (name, values) in self.columns.iter_mut() {
            if let Some(incoming) = other.column(name) {
                for (cell, flag) in values.iter_mut().zip(incoming) {
                    *cell |= *flag;
                }
            }
        }
    }

    pub fn count(&self, column: &str) -> usize {
        self.column(column)
            .map(|values| values.iter().filter(|flag| **flag).count())
            .unwrap_or(0)
    }

    pub fn any(&self) -> bool {
        self.columns.values().any(|values| values.iter().any(|flag| *flag))
    }
}

impl FlagTable {
    /// Writes `code` wherever `mask` is set, replacing whatever flag was there before.
    pub fn overwrite_where(&mut self, mask: &MaskTable, code: i64) {
        for (name, values) in self.columns.iter_mut() {
            if let Some(flags) = mask.column(name) {
                for (cell, flagged) in values.iter_mut().zip(flags) {
                    if *flagged {
                        *cell = code;
                    }
                }
            }
        }
    }
}

/// Boolean row selector for an inclusive window.
pub fn select_rows(index: &[NaiveDateTime], window: &Window, now: NaiveDateTime) -> Vec<bool> {
    let Some(first) = index.first().copied() else {
        return Vec::new();
    };
    let (start, end) = window.resolve(first, now);
    tracing::debug!(%start, %end, "Resolved row window");
    index.iter().map(|ts| *ts >= start && *ts <= end).collect()
}

/// Every name in `available` containing any of `patterns` as a literal substring, in the
/// order of `available`.
pub fn match_columns(available: &[String], patterns: &[String]) -> Vec<String> {
    available
        .iter()
        .filter(|name| patterns.iter().any(|pattern| name.contains(pattern.as_str())))
        .cloned()
        .collect()
}

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses the timestamp spellings accepted in rule files and table files. A bare date means
/// midnight.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn to_micros(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| SawyerError::Alignment(format!("invalid timestamp micros {micros}")))
}

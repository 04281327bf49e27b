#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use sawyer_core::table::{to_micros, SeriesTable, TIMESTAMP_COLUMN};

/// 2021-06-01 00:00 plus `hours`.
pub fn at(hours: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(hours)
}

pub fn hourly(rows: usize) -> Vec<NaiveDateTime> {
    (0..rows as i64).map(at).collect()
}

/// Fixed evaluation time well after every fixture row.
pub fn pinned_now() -> NaiveDateTime {
    at(24 * 365)
}

pub fn table(index: Vec<NaiveDateTime>, columns: &[(&str, Vec<Option<f64>>)]) -> SeriesTable {
    let mut table = SeriesTable::new(index).unwrap();
    for (name, values) in columns {
        table.insert_column(*name, values.clone()).unwrap();
    }
    table
}

pub fn hourly_table(columns: &[(&str, Vec<Option<f64>>)]) -> SeriesTable {
    let rows = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
    table(hourly(rows), columns)
}

pub fn hourly_frame(columns: &[(&str, Vec<Option<f64>>)]) -> PolarsResult<DataFrame> {
    let rows = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
    let micros: Vec<i64> = hourly(rows).into_iter().map(to_micros).collect();
    let mut frame_columns: Vec<Column> = vec![Series::new(TIMESTAMP_COLUMN.into(), micros)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
        .into()];
    for (name, values) in columns {
        frame_columns.push(Series::new((*name).into(), values.clone()).into());
    }
    DataFrame::new(frame_columns)
}

pub fn values(table: &SeriesTable, column: &str) -> Vec<Option<f64>> {
    table.column(column).unwrap().to_vec()
}

pub fn approx(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|value| (value - expected).abs() < 1e-9)
}

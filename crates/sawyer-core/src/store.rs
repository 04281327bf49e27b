//! Filesystem-backed series storage for a project.
//!
//! Tables are stored as delimited text files with an optional metadata block:
//!
//! ```text
//! ---file metadata---
//! location: <logger>
//! date generated: <timestamp>
//! writer: <writer>
//! source: <description>
//! rows: <count>
//! -------------------
//! timestamp,<column>,...
//! ```

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::DataFrame;
use regex::Regex;
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::error::{Result, SawyerError};
use crate::gapfill::SeriesProvider;
use crate::table::{parse_timestamp, Cell, SeriesTable, Table, TIMESTAMP_COLUMN};

pub const METADATA_START: &str = "---file metadata---";
pub const METADATA_END: &str = "-------------------";
const METADATA_LINES: usize = 7;
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MISSING_SPELLINGS: [&str; 6] = ["", "NA", "NAN", "NaN", "Nan", "nan"];

/// Data level and file-name match used when another logger's data is a gap-fill source.
pub const SOURCE_LEVEL: &str = "qa";
pub const SOURCE_MATCH: &str = "masked";

pub struct ProjectStore<'a> {
    config: &'a ProjectConfig,
    filename_dt: Regex,
}

impl<'a> ProjectStore<'a> {
    pub fn new(config: &'a ProjectConfig) -> Result<Self> {
        Ok(Self {
            config,
            filename_dt: Regex::new(config.filename_dt_rexp())?,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        self.config
    }

    /// Directory for `logger` at `level`, created if missing.
    pub fn data_dir(&self, logger: &str, level: &str) -> Result<PathBuf> {
        let path = self.config.data_path(logger, level)?;
        if !path.is_dir() {
            std::fs::create_dir_all(&path).map_err(|source| SawyerError::io(&path, source))?;
            info!(path = %path.display(), "Created data directory");
        }
        Ok(path)
    }

    /// Timestamp embedded in a file name. Retries without the trailing seconds field.
    pub fn timestamp_from_filename(&self, file_name: &str) -> Option<NaiveDateTime> {
        let found = self.filename_dt.find(file_name)?.as_str();
        let fmt = self.config.filename_dt_fmt();
        parse_with_format(found, fmt).or_else(|| {
            fmt.get(..fmt.len().saturating_sub(3))
                .and_then(|short| parse_with_format(found, short))
        })
    }

    /// Files in the level directory whose names contain `optmatch`, with their file-name
    /// timestamps.
    pub fn list_files(
        &self,
        logger: &str,
        level: &str,
        optmatch: Option<&str>,
    ) -> Result<Vec<(PathBuf, Option<NaiveDateTime>)>> {
        let dir = self.data_dir(logger, level)?;
        let dir_text = dir.to_str().ok_or_else(|| {
            SawyerError::config(format!("data directory '{}' is not valid UTF-8", dir.display()))
        })?;
        let pattern = format!("{}/*", glob::Pattern::escape(dir_text));

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry.map_err(|err| {
                let path = err.path().to_path_buf();
                SawyerError::io(path, err.into())
            })?;
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if optmatch.is_some_and(|needle| !name.contains(needle)) {
                continue;
            }
            let stamp = self.timestamp_from_filename(name);
            files.push((path, stamp));
        }
        files.sort();
        Ok(files)
    }

    /// Newest matching file by file-name timestamp. Files without a parsable timestamp are
    /// not candidates.
    pub fn latest_file(&self, logger: &str, level: &str, optmatch: Option<&str>) -> Result<(PathBuf, NaiveDateTime)> {
        self.list_files(logger, level, optmatch)?
            .into_iter()
            .filter_map(|(path, stamp)| stamp.map(|stamp| (path, stamp)))
            .max_by_key(|(_, stamp)| *stamp)
            .ok_or_else(|| {
                SawyerError::config(format!(
                    "no dated file{} for logger '{logger}' at level '{level}'",
                    optmatch
                        .map(|needle| format!(" matching '{needle}'"))
                        .unwrap_or_default()
                ))
            })
    }

    pub fn load_latest(&self, logger: &str, level: &str, optmatch: Option<&str>) -> Result<(SeriesTable, NaiveDateTime)> {
        let (path, stamp) = self.latest_file(logger, level, optmatch)?;
        info!(logger, level, path = %path.display(), %stamp, "Loading latest table");
        let table = read_sawyer_file(&path, Some(logger))?;
        Ok((table, stamp))
    }

    /// `<prefix>_<logger>_<datestamp>_<suffix>.txt`, skipping absent parts. Underscores are
    /// stripped from the suffix.
    pub fn file_name(
        &self,
        prefix: Option<&str>,
        logger: &str,
        datestamp: Option<NaiveDateTime>,
        suffix: &str,
        extension: &str,
    ) -> Result<String> {
        let stamp = datestamp
            .map(|ts| format_timestamp(ts, self.config.filename_dt_fmt()))
            .transpose()?;
        let suffix = suffix.replace('_', "");
        let parts: Vec<&str> = [prefix, Some(logger), stamp.as_deref(), Some(suffix.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        Ok(format!("{}.{extension}", parts.join("_")))
    }
}

impl SeriesProvider for ProjectStore<'_> {
    fn is_known_source(&self, name: &str) -> bool {
        self.config.is_logger(name)
    }

    fn load_table(&self, name: &str) -> Result<(SeriesTable, NaiveDateTime)> {
        self.load_latest(name, SOURCE_LEVEL, Some(SOURCE_MATCH))
    }
}

fn parse_with_format(text: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

fn format_timestamp(ts: NaiveDateTime, fmt: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", ts.format(fmt))
        .map_err(|_| SawyerError::config(format!("invalid timestamp format '{fmt}'")))?;
    Ok(out)
}

/// Reads a table file. With `logger` set, a metadata block naming a different location is
/// rejected.
pub fn read_sawyer_file(path: &Path, logger: Option<&str>) -> Result<SeriesTable> {
    let content = std::fs::read_to_string(path).map_err(|source| SawyerError::io(path, source))?;

    let body = if content.lines().next().map(str::trim_end) == Some(METADATA_START) {
        let mut parts = content.splitn(METADATA_LINES + 1, '\n');
        let header: Vec<&str> = parts.by_ref().take(METADATA_LINES).map(str::trim_end).collect();
        if let (Some(expected), Some(location)) = (logger, header.get(1)) {
            if location.trim() != format!("location: {expected}") {
                return Err(SawyerError::config(format!(
                    "{} holds data for another logger ({location}), expected '{expected}'",
                    path.display()
                )));
            }
        }
        parts.next().unwrap_or("")
    } else {
        content.as_str()
    };

    let mut reader = csv::ReaderBuilder::new().from_reader(body.as_bytes());
    let headers = reader.headers()?.clone();
    let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut index = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let stamp_text = record.get(0).unwrap_or("");
        let stamp = parse_timestamp(stamp_text).ok_or_else(|| {
            SawyerError::config(format!(
                "{}: row {row} has unparsable timestamp '{stamp_text}'",
                path.display()
            ))
        })?;
        index.push(stamp);
        for (col, values) in columns.iter_mut().enumerate() {
            let field = record.get(col + 1).unwrap_or("");
            values.push(parse_field(field).ok_or_else(|| {
                SawyerError::config(format!(
                    "{}: row {row} column '{}' has non-numeric value '{field}'",
                    path.display(),
                    names[col]
                ))
            })?);
        }
    }

    let mut table = Table::new(index)?;
    for (name, values) in names.into_iter().zip(columns) {
        table.insert_column(name, values)?;
    }
    debug!(path = %path.display(), rows = table.height(), columns = table.width(), "Read table file");
    Ok(table)
}

/// `Some(None)` for a missing value, `None` when the field is not a number.
fn parse_field(field: &str) -> Option<Option<f64>> {
    let field = field.trim();
    if MISSING_SPELLINGS.contains(&field) {
        return Some(None);
    }
    field
        .parse::<f64>()
        .ok()
        .map(|value| (!value.is_nan()).then_some(value))
}

/// Writes `table` with a metadata block naming `logger` and `source`.
pub fn write_sawyer_file<T: Cell>(table: &Table<T>, path: &Path, logger: &str, source: &str) -> Result<()> {
    let io_err = |err: std::io::Error| SawyerError::io(path, err);
    let mut file = File::create(path).map_err(io_err)?;

    let metadata = [
        METADATA_START.to_string(),
        format!("location: {logger}"),
        format!(
            "date generated: {}",
            chrono::Local::now().naive_local().format(FILE_TIMESTAMP_FORMAT)
        ),
        format!("writer: sawyer-core {}", env!("CARGO_PKG_VERSION")),
        format!("source: {source}"),
        format!("rows: {}", table.height()),
        METADATA_END.to_string(),
    ];
    for line in &metadata {
        writeln!(file, "{line}").map_err(io_err)?;
    }

    let mut writer = csv::Writer::from_writer(file);
    let columns: Vec<(&str, &[T])> = table.columns().collect();
    let mut header = vec![TIMESTAMP_COLUMN.to_string()];
    header.extend(columns.iter().map(|(name, _)| name.to_string()));
    writer.write_record(&header)?;

    for (row, stamp) in table.index().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(stamp.format(FILE_TIMESTAMP_FORMAT).to_string());
        record.extend(columns.iter().map(|(_, values)| values[row].to_field()));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(io_err)?;

    info!(path = %path.display(), rows = table.height(), "Wrote table file");
    Ok(())
}

pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|source| SawyerError::io(path, source))?;
    let mut clone = df.clone();
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .with_statistics(StatisticsOptions::default())
        .finish(&mut clone)?;
    info!(path = %path.display(), rows = df.height(), "Wrote parquet file");
    Ok(())
}

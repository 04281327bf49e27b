pub mod functions;
pub mod optimize;
pub mod source;
pub mod validate;

use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::error::Result;
use crate::rules::GapfillRuleSet;
use crate::table::{MaskTable, SeriesTable};

pub use functions::{FillResult, GapfillStrategy, LinearModel};
pub use source::{GapfillSource, InMemoryProvider, SeriesProvider};
pub use validate::{validate, FillType, ValidatedGapfillRule, ValidatedRuleSet};

/// Appended to every filled-indicator column name.
pub const FILLED_SUFFIX: &str = "_f";

#[derive(Debug, Clone)]
pub struct GapfillOutcome {
    pub table: SeriesTable,
    /// `true` where a value was supplied by gap-filling. Columns carry [`FILLED_SUFFIX`].
    pub filled: MaskTable,
}

impl GapfillOutcome {
    pub fn to_frames(&self) -> Result<(DataFrame, DataFrame)> {
        Ok((self.table.to_frame()?, self.filled.to_frame()?))
    }

    /// Cells filled in `column` (data column name, without suffix).
    pub fn filled_count(&self, column: &str) -> usize {
        self.filled.count(&format!("{column}{FILLED_SUFFIX}"))
    }
}

pub struct GapfillEngine<'a> {
    provider: &'a dyn SeriesProvider,
    now: NaiveDateTime,
}

impl<'a> GapfillEngine<'a> {
    pub fn new(provider: &'a dyn SeriesProvider, now: NaiveDateTime) -> Self {
        Self { provider, now }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    /// Sources load before any column is touched, so an unresolved or failing source
    /// aborts the run with the input untouched.
    pub fn apply(&self, table: &SeriesTable, rules: &ValidatedRuleSet) -> Result<GapfillOutcome> {
        let sources = GapfillSource::new(rules, self.provider)?;

        let mut working = table.clone();
        let mut filled = MaskTable::filled_like(table, false);

        for rule in rules.iter() {
            let rows = working.rows_within(&rule.fill_window, self.now);
            if !rows.iter().any(|selected| *selected) {
                warn!(rule = %rule.id, "Fill window selects no rows");
            }

            for (position, column) in rule.columns.iter().enumerate() {
                let source_series = if rule.strategy.required_sources() > 0 {
                    sources.source_list(
                        rule.source_column_index(position),
                        rule,
                        working.index(),
                        self.now,
                    )?
                } else {
                    Vec::new()
                };

                let target = working.require_column(column)?;
                let result = rule
                    .strategy
                    .apply(target, working.index(), &rows, &source_series)?;
                let count = result.filled.iter().filter(|hit| **hit).count();

                if let Some(values) = working.column_mut(column) {
                    *values = result.values;
                }
                if let Some(indicator) = filled.column_mut(column) {
                    for (cell, hit) in indicator.iter_mut().zip(&result.filled) {
                        *cell |= *hit;
                    }
                }

                info!(
                    rule = %rule.id,
                    function = rule.strategy.name(),
                    fill_type = %rule.fill_type,
                    column = column.as_str(),
                    filled = count,
                    "Filled gaps"
                );
            }
        }

        Ok(GapfillOutcome {
            table: working,
            filled: filled.with_suffix(FILLED_SUFFIX),
        })
    }
}

/// Validates `rules` against `validate_against` (the frame's own columns when `None`) and fills
/// `df`. Open window ends resolve against `now`.
pub fn fill_dataframe(
    df: &DataFrame,
    rules: &GapfillRuleSet,
    validate_against: Option<&[String]>,
    provider: &dyn SeriesProvider,
    now: NaiveDateTime,
) -> Result<GapfillOutcome> {
    let table = SeriesTable::from_frame(df)?;
    let columns = match validate_against {
        Some(columns) => columns.to_vec(),
        None => table.column_names(),
    };
    let validated = validate(rules, &columns)?;
    GapfillEngine::new(provider, now).apply(&table, &validated)
}

pub mod functions;

use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::error::{Result, SawyerError};
use crate::rules::{QaRuleSet, RuleId, Window};
use crate::table::{FlagTable, MaskTable, SeriesTable};

pub use functions::{Comparison, Criterion, QaEffect, QaStrategy, RollingStat};

/// Appended to every flag-table column name.
pub const FLAG_SUFFIX: &str = "_flag";

/// Result of one QA pass. All three tables share the input's index.
#[derive(Debug, Clone)]
pub struct QaOutcome {
    /// Values after every transforming rule (scaling) ran; nothing is removed here.
    pub table: SeriesTable,
    /// Cells slated for removal, keyed by data column name.
    pub mask: MaskTable,
    /// Code of the last rule that touched each cell, `0` if none. Columns carry [`FLAG_SUFFIX`].
    pub flags: FlagTable,
}

impl QaOutcome {
    /// The QA'd table with every masked cell set to missing.
    pub fn masked(&self) -> SeriesTable {
        self.table.apply_mask(&self.mask)
    }

    pub fn to_frames(&self) -> Result<(DataFrame, DataFrame, DataFrame)> {
        Ok((
            self.table.to_frame()?,
            self.mask.to_frame()?,
            self.flags.to_frame()?,
        ))
    }
}

struct ResolvedFlag<'a> {
    id: &'a RuleId,
    code: i64,
    strategy: QaStrategy,
    window: Window,
    columns: Vec<String>,
}

/// Applies QA rules with open window ends resolved against a fixed `now`.
#[derive(Debug, Clone, Copy)]
pub struct QaEngine {
    now: NaiveDateTime,
}

impl QaEngine {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    /// Every rule is resolved before the first one runs, so a bad rule anywhere in the set
    /// leaves nothing half-applied.
    pub fn apply(&self, table: &SeriesTable, rules: &QaRuleSet) -> Result<QaOutcome> {
        let available = table.column_names();
        let mut resolved = Vec::with_capacity(rules.len());
        for (id, rule) in rules {
            if id.is_reserved() {
                return Err(SawyerError::config(format!(
                    "QA flag key cannot be zero (0): rule '{id}'"
                )));
            }
            let code = id.flag_code()?;
            let strategy = QaStrategy::from_rule(rule)?;
            let columns = rule.columns.resolve(&available);
            if columns.is_empty() {
                warn!(flag = %id, selector = ?rule.columns, "QA flag matches no column");
            }
            resolved.push(ResolvedFlag {
                id,
                code,
                strategy,
                window: rule.window(),
                columns,
            });
        }

        let mut working = table.clone();
        let mut mask = MaskTable::filled_like(table, false);
        let mut flags = FlagTable::filled_like(table, 0);

        for flag in resolved {
            let rows = working.rows_within(&flag.window, self.now);
            let effect = flag.strategy.apply(&mut working, &rows, &flag.columns)?;

            flags.overwrite_where(&effect.mask, flag.code);
            if effect.remove {
                mask.union_with(&effect.mask);
            }

            info!(
                flag = %flag.id,
                function = flag.strategy.name(),
                columns = ?flag.columns,
                rows = rows.iter().filter(|selected| **selected).count(),
                remove = effect.remove,
                "Applied QA flag"
            );
        }

        Ok(QaOutcome {
            table: working,
            mask,
            flags: flags.with_suffix(FLAG_SUFFIX),
        })
    }
}

/// Runs `rules` over `df` with open window ends resolved to the current wall-clock time.
/// Results therefore depend on when this is called; use [`apply_qa_flags_at`] to pin it.
pub fn apply_qa_flags(df: &DataFrame, rules: &QaRuleSet) -> Result<QaOutcome> {
    apply_qa_flags_at(df, rules, chrono::Local::now().naive_local())
}

pub fn apply_qa_flags_at(df: &DataFrame, rules: &QaRuleSet, now: NaiveDateTime) -> Result<QaOutcome> {
    let table = SeriesTable::from_frame(df)?;
    QaEngine::new(now).apply(&table, rules)
}

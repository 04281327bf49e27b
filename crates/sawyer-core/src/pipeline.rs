use chrono::NaiveDateTime;
use tracing::info;

use crate::error::Result;
use crate::gapfill::{validate, GapfillEngine, SeriesProvider};
use crate::qa::QaEngine;
use crate::store::{ProjectStore, SOURCE_LEVEL, SOURCE_MATCH};
use crate::table::{FlagTable, MaskTable, SeriesTable};

/// Level holding standardised raw tables, the input of a QA run.
pub const RAW_STD_LEVEL: &str = "raw_std";
/// Level gap-filled output is written to.
pub const GAPFILLED_LEVEL: &str = "gapfilled";

#[derive(Debug, Clone)]
pub struct QaRun {
    pub qa: SeriesTable,
    pub mask: MaskTable,
    pub flags: FlagTable,
    /// `qa` with masked cells set to missing.
    pub masked: SeriesTable,
    /// Currency of the input table.
    pub as_of: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct GapfillRun {
    pub filled: SeriesTable,
    pub indicator: MaskTable,
    pub as_of: NaiveDateTime,
}

/// QA for the newest standardised table of `logger`. A `corrected` table is QA'd in its place;
/// the run is still dated by the newest standardised file.
pub fn qa_logger(
    store: &ProjectStore<'_>,
    logger: &str,
    corrected: Option<&SeriesTable>,
    use_global: bool,
    now: NaiveDateTime,
) -> Result<QaRun> {
    let (table, as_of) = match corrected {
        Some(table) => {
            let (_, as_of) = store.latest_file(logger, RAW_STD_LEVEL, None)?;
            info!(logger, rows = table.height(), "Using caller-supplied corrected table");
            (table.clone(), as_of)
        }
        None => store.load_latest(logger, RAW_STD_LEVEL, None)?,
    };
    let rules = store.config().load_qa_rules(logger, use_global)?;
    info!(logger, rules = rules.len(), %as_of, "Running QA");

    let outcome = QaEngine::new(now).apply(&table, &rules)?;
    let masked = outcome.masked();
    Ok(QaRun {
        qa: outcome.table,
        mask: outcome.mask,
        flags: outcome.flags,
        masked,
        as_of,
    })
}

/// Gap-fills the newest masked QA table of `logger`.
pub fn fill_logger(store: &ProjectStore<'_>, logger: &str, now: NaiveDateTime) -> Result<GapfillRun> {
    let (table, as_of) = store.load_latest(logger, SOURCE_LEVEL, Some(SOURCE_MATCH))?;
    let rules = store.config().load_gapfill_rules(logger)?;
    let validated = validate(&rules, &table.column_names())?;
    info!(logger, rules = validated.len(), %as_of, "Running gap-fill");

    let provider: &dyn SeriesProvider = store;
    let outcome = GapfillEngine::new(provider, now).apply(&table, &validated)?;
    Ok(GapfillRun {
        filled: outcome.table,
        indicator: outcome.filled,
        as_of,
    })
}

//! Normalises a raw gap-fill rule set against the columns of the table it will fill.
//!
//! The caller's rule set is never modified; validation produces an independent
//! [`ValidatedRuleSet`] with concrete target columns and a [`FillType`] per rule.

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Result, SawyerError};
use crate::gapfill::functions::GapfillStrategy;
use crate::registry::find_gapfill_function;
use crate::rules::{ColumnSelector, GapfillRuleSet, RuleId, Window};
use crate::table::match_columns;

/// How a rule's sources map onto its target columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    /// No external source.
    SelfFill,
    /// One source column fills one target column.
    One2One,
    /// One source column per source fills every target column.
    One2Many,
    /// Source column `i` fills target column `i`.
    Many2Many,
}

impl FillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillType::SelfFill => "self",
            FillType::One2One => "one2one",
            FillType::One2Many => "one2many",
            FillType::Many2Many => "many2many",
        }
    }
}

impl fmt::Display for FillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedGapfillRule {
    pub id: RuleId,
    pub strategy: GapfillStrategy,
    pub fill_type: FillType,
    pub columns: Vec<String>,
    pub fill_window: Window,
    pub fit_window: Option<Window>,
    /// Empty for [`FillType::SelfFill`].
    pub sources: IndexMap<String, Vec<String>>,
}

impl ValidatedGapfillRule {
    /// Position in each source's column list that feeds the target column at `position`.
    pub fn source_column_index(&self, position: usize) -> usize {
        match self.fill_type {
            FillType::Many2Many => position,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedRuleSet {
    rules: Vec<ValidatedGapfillRule>,
}

impl ValidatedRuleSet {
    pub fn rules(&self) -> &[ValidatedGapfillRule] {
        &self.rules
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatedGapfillRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &RuleId) -> Option<&ValidatedGapfillRule> {
        self.rules.iter().find(|rule| &rule.id == id)
    }

    /// Distinct source names across all rules, in first-use order.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.rules.iter().flat_map(|rule| rule.sources.keys()) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

pub fn validate(rules: &GapfillRuleSet, target_columns: &[String]) -> Result<ValidatedRuleSet> {
    let mut validated = Vec::with_capacity(rules.len());

    for (id, rule) in rules {
        if id.is_reserved() {
            return Err(SawyerError::config(format!(
                "gap-fill key cannot be zero (0): rule '{id}'"
            )));
        }
        let missing = |key: &str| SawyerError::config(format!("gap-fill rule '{id}' is missing '{key}'"));
        let function = rule.function.as_deref().ok_or_else(|| missing("gf_function"))?;
        let selector = rule.gap_cols.as_ref().ok_or_else(|| missing("gap_cols"))?;
        let start_fill = rule.start_fill.ok_or_else(|| missing("start_fill"))?;
        let end_fill = rule.end_fill.ok_or_else(|| missing("end_fill"))?;

        let descriptor = find_gapfill_function(function).ok_or_else(|| {
            SawyerError::config(format!(
                "gap-fill rule '{id}' names unknown function '{function}'"
            ))
        })?;
        let strategy = GapfillStrategy::from_descriptor(descriptor, &rule.kwargs)?;

        let requested: Vec<String> = match selector {
            ColumnSelector::All => target_columns.to_vec(),
            ColumnSelector::Matching(patterns) => patterns.clone(),
        };

        let (fill_type, columns, sources) = if descriptor.requires_sources() {
            let sources = rule
                .sources
                .clone()
                .filter(|sources| !sources.is_empty())
                .ok_or_else(|| {
                    SawyerError::config(format!(
                        "gap-fill rule '{id}' uses {function}, which requires 'sources'"
                    ))
                })?;
            if sources.len() != descriptor.required_sources {
                return Err(SawyerError::config(format!(
                    "gap-fill rule '{id}': {function} takes {} source(s) but {} are configured",
                    descriptor.required_sources,
                    sources.len()
                )));
            }
            let (fill_type, columns) = classify(id, &sources, &requested, target_columns)?;
            (fill_type, columns, sources)
        } else {
            if rule.sources.as_ref().is_some_and(|sources| !sources.is_empty()) {
                warn!(rule = %id, function, "Ignoring sources for a function that takes none");
            }
            (
                FillType::SelfFill,
                match_columns(target_columns, &requested),
                IndexMap::new(),
            )
        };

        if columns.is_empty() {
            return Err(SawyerError::config(format!(
                "gap-fill rule '{id}': gap_cols {requested:?} match no column"
            )));
        }

        debug!(rule = %id, function, fill_type = %fill_type, columns = ?columns, "Validated gap-fill rule");
        validated.push(ValidatedGapfillRule {
            id: id.clone(),
            strategy,
            fill_type,
            columns,
            fill_window: Window {
                start: start_fill,
                end: end_fill,
            },
            fit_window: rule.fit(),
            sources,
        });
    }

    Ok(ValidatedRuleSet { rules: validated })
}

/// Picks the fill type from the common source width and the requested target columns,
/// expanding substrings when not every requested name is a literal column.
fn classify(
    id: &RuleId,
    sources: &IndexMap<String, Vec<String>>,
    requested: &[String],
    target_columns: &[String],
) -> Result<(FillType, Vec<String>)> {
    let mut widths = sources.values().map(Vec::len);
    let width = widths.next().unwrap_or(0);
    if width == 0 {
        return Err(SawyerError::config(format!(
            "gap-fill rule '{id}' lists a source with no columns"
        )));
    }
    if widths.any(|other| other != width) {
        return Err(SawyerError::config(format!(
            "gap-fill rule '{id}': every source must list the same number of columns"
        )));
    }

    let needs_expansion = !requested.iter().all(|name| target_columns.contains(name));

    match (width, requested.len(), needs_expansion) {
        (1, 1, false) => Ok((FillType::One2One, requested.to_vec())),
        (1, _, true) => Ok((FillType::One2Many, match_columns(target_columns, requested))),
        (1, _, false) => Ok((FillType::One2Many, requested.to_vec())),
        (width, count, false) if width == count => Ok((FillType::Many2Many, requested.to_vec())),
        (width, count, false) => Err(SawyerError::config(format!(
            "gap-fill rule '{id}': {width} source columns but {count} gap columns"
        ))),
        (_, _, true) => Err(SawyerError::config(format!(
            "gap-fill rule '{id}': gap_cols {requested:?} are not all columns of the table"
        ))),
    }
}

use std::collections::HashMap;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use tracing::info;

use crate::error::{Result, SawyerError};
use crate::gapfill::validate::{ValidatedGapfillRule, ValidatedRuleSet};
use crate::table::{select_rows, SeriesTable};

/// Data access for named series.
pub trait SeriesProvider {
    /// Whether `name` is a series registered in the project.
    fn is_known_source(&self, name: &str) -> bool;

    /// Most recent table for `name` and the timestamp marking its currency.
    fn load_table(&self, name: &str) -> Result<(SeriesTable, NaiveDateTime)>;
}

/// Provider over tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    tables: HashMap<String, (SeriesTable, NaiveDateTime)>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: SeriesTable, as_of: NaiveDateTime) {
        self.tables.insert(name.into(), (table, as_of));
    }

    pub fn with_table(mut self, name: impl Into<String>, table: SeriesTable, as_of: NaiveDateTime) -> Self {
        self.insert(name, table, as_of);
        self
    }
}

impl SeriesProvider for InMemoryProvider {
    fn is_known_source(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn load_table(&self, name: &str) -> Result<(SeriesTable, NaiveDateTime)> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| SawyerError::UnresolvedSource(name.to_string()))
    }
}

/// External series referenced by a rule set, loaded once each when constructed.
#[derive(Debug, Clone, Default)]
pub struct GapfillSource {
    tables: IndexMap<String, SeriesTable>,
}

impl GapfillSource {
    /// Every source name is checked before anything is loaded.
    pub fn new(rules: &ValidatedRuleSet, provider: &dyn SeriesProvider) -> Result<Self> {
        let names = rules.source_names();
        if names.is_empty() {
            info!("Gap-fill rules reference no external sources");
            return Ok(Self::default());
        }

        if let Some(unknown) = names.iter().find(|name| !provider.is_known_source(name)) {
            return Err(SawyerError::UnresolvedSource(unknown.to_string()));
        }

        let mut tables = IndexMap::with_capacity(names.len());
        for name in names {
            let (table, as_of) = provider.load_table(name)?;
            info!(source = name, rows = table.height(), %as_of, "Loaded gap-fill source");
            tables.insert(name.to_string(), table);
        }
        Ok(Self { tables })
    }

    pub fn has_external_sources(&self) -> bool {
        !self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&SeriesTable> {
        self.tables.get(name)
    }

    /// One series per configured source of `rule`, taking each source's column at
    /// `column_index`, aligned to `target_index`. A fit window blanks every value outside it.
    pub fn source_list(
        &self,
        column_index: usize,
        rule: &ValidatedGapfillRule,
        target_index: &[NaiveDateTime],
        now: NaiveDateTime,
    ) -> Result<Vec<Vec<Option<f64>>>> {
        if rule.sources.is_empty() || !self.has_external_sources() {
            return Err(SawyerError::config(format!(
                "gap-fill rule '{}' needs an external source but none is loaded",
                rule.id
            )));
        }

        let fit_rows = rule
            .fit_window
            .as_ref()
            .map(|window| select_rows(target_index, window, now));

        let mut series = Vec::with_capacity(rule.sources.len());
        for (name, columns) in &rule.sources {
            let table = self
                .tables
                .get(name)
                .ok_or_else(|| SawyerError::UnresolvedSource(name.clone()))?;
            let column = columns.get(column_index).ok_or_else(|| {
                SawyerError::config(format!(
                    "gap-fill rule '{}': source '{name}' has no column at position {column_index}",
                    rule.id
                ))
            })?;
            let mut values = table.align_column(column, target_index)?;
            if let Some(keep) = &fit_rows {
                for (value, inside) in values.iter_mut().zip(keep) {
                    if !inside {
                        *value = None;
                    }
                }
            }
            series.push(values);
        }
        Ok(series)
    }
}

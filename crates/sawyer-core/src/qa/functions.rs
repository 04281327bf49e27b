//! QA rule strategies. Each takes the working table, the rule's row selector and its resolved
//! columns, and reports which cells it touched and whether those cells should be removed.

use polars::prelude::{col, DataFrame, IntoLazy, NamedFrom, RollingOptionsFixedWindow, Series};
use serde_json::Value;

use crate::error::{Result, SawyerError};
use crate::registry::{find_qa_function, DEFAULT_QA_FUNCTION};
use crate::rules::{bind_arguments, BoundArguments, QaRule};
use crate::table::{MaskTable, SeriesTable};

const NAN_SPELLINGS: [&str; 4] = ["NAN", "NaN", "Nan", "nan"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Above,
    Below,
    Equals,
    IsNan,
}

impl Comparison {
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "above" => Ok(Comparison::Above),
            "below" => Ok(Comparison::Below),
            "equals" => Ok(Comparison::Equals),
            "isnan" => Ok(Comparison::IsNan),
            other => Err(SawyerError::config(format!(
                "invalid comparison '{other}' (expected above, below, equals, isnan)"
            ))),
        }
    }
}

/// A comparison against a fixed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criterion {
    pub comparison: Comparison,
    pub cval: f64,
}

impl Criterion {
    /// A NaN spelling as the threshold turns any comparison into a NaN test.
    fn from_arguments(bound: &BoundArguments) -> Result<Self> {
        let comparison = Comparison::parse(bound.str("comparison")?)?;
        match bound.required("cval")? {
            Value::String(text) if NAN_SPELLINGS.contains(&text.as_str()) => Ok(Criterion {
                comparison: Comparison::IsNan,
                cval: f64::NAN,
            }),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map(|cval| Criterion { comparison, cval })
                .map_err(|_| SawyerError::config(format!("cval '{text}' is not a number"))),
            _ => Ok(Criterion {
                comparison,
                cval: bound.f64("cval")?,
            }),
        }
    }

    pub fn matches(&self, value: Option<f64>) -> bool {
        match (self.comparison, value) {
            (Comparison::IsNan, value) => value.is_none(),
            (Comparison::Above, Some(v)) => v > self.cval,
            (Comparison::Below, Some(v)) => v < self.cval,
            (Comparison::Equals, Some(v)) => v == self.cval,
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingStat {
    Mean,
    Median,
}

impl RollingStat {
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "mean" => Ok(RollingStat::Mean),
            "median" => Ok(RollingStat::Median),
            "stdv" => Err(SawyerError::Unsupported(
                "rolling standard deviation filter is not available".to_string(),
            )),
            other => Err(SawyerError::config(format!(
                "invalid statistic '{other}' (expected mean, median)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QaStrategy {
    MaskByDatetime,
    ScaleByMultiplier {
        multiplier: f64,
    },
    MaskByComparison {
        criterion: Criterion,
    },
    MaskByComparisonInd {
        indvar: String,
        criterion: Criterion,
    },
    MaskByRollingStat {
        indvar: String,
        stat: RollingStat,
        window: usize,
        comparison: Comparison,
        thresh: f64,
    },
}

/// Cells a rule touched and whether they are slated for removal.
#[derive(Debug, Clone)]
pub struct QaEffect {
    pub mask: MaskTable,
    pub remove: bool,
}

impl QaStrategy {
    pub fn from_rule(rule: &QaRule) -> Result<Self> {
        if rule.function.is_none() && (!rule.args.is_empty() || !rule.kwargs.is_empty()) {
            return Err(SawyerError::config(
                "qa_args/qa_kwargs given without qa_function",
            ));
        }
        let name = rule.function.as_deref().unwrap_or(DEFAULT_QA_FUNCTION);
        let descriptor = find_qa_function(name)
            .ok_or_else(|| SawyerError::config(format!("unknown QA function '{name}'")))?;
        let bound = bind_arguments(descriptor.code, descriptor.parameters, &rule.args, &rule.kwargs)?;

        let strategy = match descriptor.code {
            "mask_by_datetime" => QaStrategy::MaskByDatetime,
            "scale_by_multiplier" => QaStrategy::ScaleByMultiplier {
                multiplier: bound.f64("multiplier")?,
            },
            "mask_by_comparison" => QaStrategy::MaskByComparison {
                criterion: Criterion::from_arguments(&bound)?,
            },
            "mask_by_comparison_ind" => QaStrategy::MaskByComparisonInd {
                indvar: bound.str("indvar")?.to_string(),
                criterion: Criterion::from_arguments(&bound)?,
            },
            "mask_by_rolling_stat" => {
                let window = bound
                    .optional_usize("window")?
                    .ok_or_else(|| {
                        SawyerError::config("mask_by_rolling_stat is missing required argument 'window'")
                    })?;
                if window == 0 {
                    return Err(SawyerError::config(
                        "mask_by_rolling_stat window must be at least one row",
                    ));
                }
                let comparison = Comparison::parse(bound.str("comparison")?)?;
                if comparison == Comparison::IsNan {
                    return Err(SawyerError::config(
                        "mask_by_rolling_stat supports above, below and equals comparisons",
                    ));
                }
                QaStrategy::MaskByRollingStat {
                    indvar: bound.str("indvar")?.to_string(),
                    stat: RollingStat::parse(bound.str("stat")?)?,
                    window,
                    comparison,
                    thresh: bound.optional_f64("thresh")?.unwrap_or(0.0),
                }
            }
            other => {
                return Err(SawyerError::config(format!(
                    "QA function '{other}' has no implementation"
                )))
            }
        };
        Ok(strategy)
    }

    pub fn name(&self) -> &'static str {
        match self {
            QaStrategy::MaskByDatetime => "mask_by_datetime",
            QaStrategy::ScaleByMultiplier { .. } => "scale_by_multiplier",
            QaStrategy::MaskByComparison { .. } => "mask_by_comparison",
            QaStrategy::MaskByComparisonInd { .. } => "mask_by_comparison_ind",
            QaStrategy::MaskByRollingStat { .. } => "mask_by_rolling_stat",
        }
    }

    pub fn apply(&self, table: &mut SeriesTable, rows: &[bool], columns: &[String]) -> Result<QaEffect> {
        let mut mask = MaskTable::filled_like(table, false);

        match self {
            QaStrategy::MaskByDatetime => {
                mark_rows(&mut mask, columns, rows);
                Ok(QaEffect { mask, remove: true })
            }
            QaStrategy::ScaleByMultiplier { multiplier } => {
                for column in columns {
                    if let Some(values) = table.column_mut(column) {
                        for (value, selected) in values.iter_mut().zip(rows) {
                            if *selected {
                                *value = value.map(|v| v * multiplier);
                            }
                        }
                    }
                }
                mark_rows(&mut mask, columns, rows);
                Ok(QaEffect {
                    mask,
                    remove: false,
                })
            }
            QaStrategy::MaskByComparison { criterion } => {
                for column in columns {
                    let values = table.require_column(column)?;
                    let hits: Vec<bool> = values
                        .iter()
                        .zip(rows)
                        .map(|(value, selected)| *selected && criterion.matches(*value))
                        .collect();
                    mark_rows(&mut mask, std::slice::from_ref(column), &hits);
                }
                Ok(QaEffect { mask, remove: true })
            }
            QaStrategy::MaskByComparisonInd { indvar, criterion } => {
                let independent = table.require_column(indvar)?;
                let hits: Vec<bool> = independent
                    .iter()
                    .zip(rows)
                    .map(|(value, selected)| *selected && criterion.matches(*value))
                    .collect();
                mark_rows(&mut mask, columns, &hits);
                Ok(QaEffect { mask, remove: true })
            }
            QaStrategy::MaskByRollingStat {
                indvar,
                stat,
                window,
                comparison,
                thresh,
            } => {
                let independent = table.require_column(indvar)?;
                let statistic = rolling_statistic(independent, *window, *stat)?;
                let hits: Vec<bool> = independent
                    .iter()
                    .zip(&statistic)
                    .zip(rows)
                    .map(|((value, stat_value), selected)| {
                        *selected && departs(*value, *stat_value, *comparison, *thresh)
                    })
                    .collect();
                mark_rows(&mut mask, columns, &hits);
                Ok(QaEffect { mask, remove: true })
            }
        }
    }
}

fn mark_rows(mask: &mut MaskTable, columns: &[String], rows: &[bool]) {
    for column in columns {
        if let Some(cells) = mask.column_mut(column) {
            for (cell, hit) in cells.iter_mut().zip(rows) {
                *cell |= *hit;
            }
        }
    }
}

fn departs(value: Option<f64>, statistic: Option<f64>, comparison: Comparison, thresh: f64) -> bool {
    let (Some(value), Some(statistic)) = (value, statistic) else {
        return false;
    };
    match comparison {
        Comparison::Above => value > statistic + thresh,
        Comparison::Below => value < statistic - thresh,
        Comparison::Equals => value == statistic,
        Comparison::IsNan => false,
    }
}

/// Centered rolling statistic over `window` rows; a row needs `window - 1` present values in
/// its window (at least one) to get a statistic.
pub fn rolling_statistic(
    values: &[Option<f64>],
    window: usize,
    stat: RollingStat,
) -> Result<Vec<Option<f64>>> {
    let options = RollingOptionsFixedWindow {
        window_size: window,
        min_periods: window.saturating_sub(1).max(1),
        center: true,
        ..Default::default()
    };
    let rolled = match stat {
        RollingStat::Mean => col("value").rolling_mean(options),
        RollingStat::Median => col("value").rolling_median(options),
    };
    let series = Series::new("value".into(), values.to_vec());
    let frame = DataFrame::new(vec![series.into()])?
        .lazy()
        .select([rolled.alias("stat")])
        .collect()?;
    Ok(frame.column("stat")?.f64()?.into_iter().collect())
}

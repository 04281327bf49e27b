//! Gap-fill strategies. Each receives one target column, the fill-window row selector and the
//! source series already aligned to the target timeline, and returns the new column plus a
//! per-row "filled here" vector.

use chrono::NaiveDateTime;
use polars::prelude::{FillNullStrategy, IdxSize, NamedFrom, Series};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, SawyerError};
use crate::gapfill::optimize::NelderMead;
use crate::registry::{find_gapfill_function, FunctionDescriptor};
use crate::rules::bind_arguments;
use crate::table::to_micros;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NaFill {
    Value(f64),
    Carry(FillDirection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMethod {
    /// Rows treated as equally spaced.
    Linear,
    /// Weighted by timestamp distance.
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapfillStrategy {
    FillNa { fill: NaFill, limit: Option<usize> },
    Interpolate { method: InterpolationMethod, limit: Option<usize> },
    Substitution,
    Midpoint,
    LinearFit { zero_intercept: bool },
    LinearFitOptimized { zero_intercept: bool },
}

/// New column values and the rows that went from missing to present.
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    pub values: Vec<Option<f64>>,
    pub filled: Vec<bool>,
}

/// `target = slope * source + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearModel {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

impl GapfillStrategy {
    pub fn from_name(name: &str, kwargs: &Map<String, Value>) -> Result<Self> {
        let descriptor = find_gapfill_function(name)
            .ok_or_else(|| SawyerError::config(format!("unknown gap-fill function '{name}'")))?;
        Self::from_descriptor(descriptor, kwargs)
    }

    pub fn from_descriptor(descriptor: &FunctionDescriptor, kwargs: &Map<String, Value>) -> Result<Self> {
        let bound = bind_arguments(descriptor.code, descriptor.parameters, &[], kwargs)?;

        let strategy = match descriptor.code {
            "fillna" => {
                let value = bound.optional_f64("value")?;
                let method = bound.optional_str("method")?;
                let fill = match (value, method) {
                    (Some(_), Some(_)) => {
                        return Err(SawyerError::config(
                            "fillna takes either 'value' or 'method', not both",
                        ))
                    }
                    (Some(value), None) => NaFill::Value(value),
                    (None, Some("ffill" | "pad")) => NaFill::Carry(FillDirection::Forward),
                    (None, Some("bfill" | "backfill")) => NaFill::Carry(FillDirection::Backward),
                    (None, Some(other)) => {
                        return Err(SawyerError::config(format!(
                            "invalid fillna method '{other}' (expected ffill, pad, bfill, backfill)"
                        )))
                    }
                    (None, None) => {
                        return Err(SawyerError::config(
                            "fillna requires a 'value' or a 'method'",
                        ))
                    }
                };
                GapfillStrategy::FillNa {
                    fill,
                    limit: positive_limit(bound.optional_usize("limit")?)?,
                }
            }
            "interpolate" => {
                let method = match bound.optional_str("method")? {
                    None | Some("linear") => InterpolationMethod::Linear,
                    Some("time") => InterpolationMethod::Time,
                    Some(other) => {
                        return Err(SawyerError::config(format!(
                            "invalid interpolation method '{other}' (expected linear, time)"
                        )))
                    }
                };
                GapfillStrategy::Interpolate {
                    method,
                    limit: positive_limit(bound.optional_usize("limit")?)?,
                }
            }
            "substitution" => GapfillStrategy::Substitution,
            "midpoint" => GapfillStrategy::Midpoint,
            "linearfit" => GapfillStrategy::LinearFit {
                zero_intercept: bound.bool_or("zero_intcpt", false)?,
            },
            "linearfit2" => GapfillStrategy::LinearFitOptimized {
                zero_intercept: bound.bool_or("zero_intcpt", false)?,
            },
            other => {
                return Err(SawyerError::config(format!(
                    "gap-fill function '{other}' has no implementation"
                )))
            }
        };
        Ok(strategy)
    }

    pub fn name(&self) -> &'static str {
        match self {
            GapfillStrategy::FillNa { .. } => "fillna",
            GapfillStrategy::Interpolate { .. } => "interpolate",
            GapfillStrategy::Substitution => "substitution",
            GapfillStrategy::Midpoint => "midpoint",
            GapfillStrategy::LinearFit { .. } => "linearfit",
            GapfillStrategy::LinearFitOptimized { .. } => "linearfit2",
        }
    }

    pub fn required_sources(&self) -> usize {
        match self {
            GapfillStrategy::FillNa { .. } | GapfillStrategy::Interpolate { .. } => 0,
            GapfillStrategy::Substitution
            | GapfillStrategy::LinearFit { .. }
            | GapfillStrategy::LinearFitOptimized { .. } => 1,
            GapfillStrategy::Midpoint => 2,
        }
    }

    pub fn apply(
        &self,
        target: &[Option<f64>],
        index: &[NaiveDateTime],
        fill_rows: &[bool],
        sources: &[Vec<Option<f64>>],
    ) -> Result<FillResult> {
        if sources.len() < self.required_sources() {
            return Err(SawyerError::config(format!(
                "{} needs {} source series but {} were supplied",
                self.name(),
                self.required_sources(),
                sources.len()
            )));
        }

        let values = match self {
            GapfillStrategy::FillNa { fill, limit } => fill_na(target, fill_rows, *fill, *limit)?,
            GapfillStrategy::Interpolate { method, limit } => {
                interpolate(target, index, fill_rows, *method, *limit)
            }
            GapfillStrategy::Substitution => {
                fill_where(target, fill_rows, |row| sources[0][row])
            }
            GapfillStrategy::Midpoint => fill_where(target, fill_rows, |row| {
                match (sources[0][row], sources[1][row]) {
                    (Some(a), Some(b)) => Some((a + b) / 2.0),
                    _ => None,
                }
            }),
            GapfillStrategy::LinearFit { zero_intercept } => {
                let model = fit_least_squares(&sources[0], target, *zero_intercept)?;
                fill_where(target, fill_rows, |row| sources[0][row].map(|x| model.predict(x)))
            }
            GapfillStrategy::LinearFitOptimized { zero_intercept } => {
                let model = fit_minimized(&sources[0], target, *zero_intercept)?;
                fill_where(target, fill_rows, |row| sources[0][row].map(|x| model.predict(x)))
            }
        };

        let filled = target
            .iter()
            .zip(&values)
            .zip(fill_rows)
            .map(|((before, after), selected)| *selected && before.is_none() && after.is_some())
            .collect();
        Ok(FillResult { values, filled })
    }
}

fn positive_limit(limit: Option<usize>) -> Result<Option<usize>> {
    match limit {
        Some(0) => Err(SawyerError::config("limit must be greater than 0")),
        other => Ok(other),
    }
}

/// Fills missing target rows inside the window wherever `candidate` yields a value.
fn fill_where<F>(target: &[Option<f64>], fill_rows: &[bool], candidate: F) -> Vec<Option<f64>>
where
    F: Fn(usize) -> Option<f64>,
{
    target
        .iter()
        .zip(fill_rows)
        .enumerate()
        .map(|(row, (value, selected))| match value {
            None if *selected => candidate(row),
            _ => *value,
        })
        .collect()
}

fn selected_positions(fill_rows: &[bool]) -> Vec<usize> {
    fill_rows
        .iter()
        .enumerate()
        .filter_map(|(row, selected)| selected.then_some(row))
        .collect()
}

fn fill_na(
    target: &[Option<f64>],
    fill_rows: &[bool],
    fill: NaFill,
    limit: Option<usize>,
) -> Result<Vec<Option<f64>>> {
    let mut values = target.to_vec();
    let positions = selected_positions(fill_rows);

    match fill {
        // A limit caps the total number of filled cells.
        NaFill::Value(constant) => {
            let mut budget = limit.unwrap_or(usize::MAX);
            for row in positions {
                if budget == 0 {
                    break;
                }
                if values[row].is_none() {
                    values[row] = Some(constant);
                    budget -= 1;
                }
            }
        }
        // A limit caps consecutive cells filled from one carried value.
        NaFill::Carry(direction) => {
            let window: Vec<Option<f64>> = positions.iter().map(|row| target[*row]).collect();
            let limit = limit.map(|cap| cap as IdxSize);
            let strategy = match direction {
                FillDirection::Forward => FillNullStrategy::Forward(limit),
                FillDirection::Backward => FillNullStrategy::Backward(limit),
            };
            let carried = Series::new("fill".into(), window).fill_null(strategy)?;
            for (row, value) in positions.iter().zip(carried.f64()?) {
                values[*row] = value;
            }
        }
    }
    Ok(values)
}

fn interpolate(
    target: &[Option<f64>],
    index: &[NaiveDateTime],
    fill_rows: &[bool],
    method: InterpolationMethod,
    limit: Option<usize>,
) -> Vec<Option<f64>> {
    let mut values = target.to_vec();
    let positions = selected_positions(fill_rows);
    let coordinate = |slot: usize| -> f64 {
        match method {
            InterpolationMethod::Linear => slot as f64,
            InterpolationMethod::Time => to_micros(index[positions[slot]]) as f64,
        }
    };

    let present: Vec<usize> = (0..positions.len())
        .filter(|slot| target[positions[*slot]].is_some())
        .collect();

    for slot in 0..positions.len() {
        let row = positions[slot];
        if target[row].is_some() {
            continue;
        }
        let previous = present.iter().rev().find(|p| **p < slot).copied();
        let next = present.iter().find(|p| **p > slot).copied();

        // Leading gaps stay empty.
        let Some(previous) = previous else {
            continue;
        };
        if limit.is_some_and(|cap| slot - previous > cap) {
            continue;
        }
        let Some(y0) = target[positions[previous]] else {
            continue;
        };
        values[row] = match next.and_then(|n| target[positions[n]].map(|y1| (n, y1))) {
            Some((next, y1)) => {
                let (x0, x1, x) = (coordinate(previous), coordinate(next), coordinate(slot));
                Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
            }
            // Trailing gaps hold the last value.
            None => Some(y0),
        };
    }
    values
}

/// Rows where both series have a value.
fn common_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> Result<Vec<(f64, f64)>> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.is_empty() {
        return Err(SawyerError::Alignment(
            "source and target share no rows where both have values".to_string(),
        ));
    }
    Ok(pairs)
}

/// Closed-form least squares; `zero_intercept` fits `y = a*x` as `a = dot(x,y)/dot(x,x)`.
pub fn fit_least_squares(x: &[Option<f64>], y: &[Option<f64>], zero_intercept: bool) -> Result<LinearModel> {
    let pairs = common_pairs(x, y)?;
    check_fit_data(&pairs, zero_intercept)?;

    if zero_intercept {
        let sxy: f64 = pairs.iter().map(|(x, y)| x * y).sum();
        let sxx: f64 = pairs.iter().map(|(x, _)| x * x).sum();
        return Ok(LinearModel {
            slope: sxy / sxx,
            intercept: 0.0,
        });
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = pairs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = pairs
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = sxy / sxx;
    Ok(LinearModel {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Same model as [`fit_least_squares`], found by minimising the sum of squared errors.
pub fn fit_minimized(x: &[Option<f64>], y: &[Option<f64>], zero_intercept: bool) -> Result<LinearModel> {
    let pairs = common_pairs(x, y)?;
    check_fit_data(&pairs, zero_intercept)?;

    let sse = |slope: f64, intercept: f64| -> f64 {
        pairs
            .iter()
            .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
            .sum()
    };

    let optimizer = NelderMead::default();
    let minimum = if zero_intercept {
        optimizer.minimize(|p| sse(p[0], 0.0), &[1.1])
    } else {
        optimizer.minimize(|p| sse(p[0], p[1]), &[1.1, 0.0])
    };
    if !minimum.converged {
        warn!(
            iterations = minimum.iterations,
            sse = minimum.value,
            "Linear fit minimisation stopped before converging"
        );
    }

    Ok(LinearModel {
        slope: minimum.point[0],
        intercept: minimum.point.get(1).copied().unwrap_or(0.0),
    })
}

fn check_fit_data(pairs: &[(f64, f64)], zero_intercept: bool) -> Result<()> {
    if zero_intercept {
        if pairs.iter().all(|(x, _)| *x == 0.0) {
            return Err(SawyerError::Regression(
                "zero-intercept fit needs at least one non-zero source value".to_string(),
            ));
        }
        return Ok(());
    }
    if pairs.len() < 2 {
        return Err(SawyerError::Regression(format!(
            "linear fit needs at least 2 common rows, found {}",
            pairs.len()
        )));
    }
    let first = pairs[0].0;
    if pairs.iter().all(|(x, _)| *x == first) {
        return Err(SawyerError::Regression(
            "linear fit needs variation in the source values".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimized_fit_matches_closed_form() {
        let x = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)];
        let y = vec![Some(2.1), Some(3.9), Some(6.2), Some(7.8), None];

        for zero_intercept in [true, false] {
            let closed = fit_least_squares(&x, &y, zero_intercept).unwrap();
            let minimized = fit_minimized(&x, &y, zero_intercept).unwrap();
            assert!((closed.slope - minimized.slope).abs() < 1e-6);
            assert!((closed.intercept - minimized.intercept).abs() < 1e-6);
        }
    }

    #[test]
    fn degenerate_fits_are_regression_errors() {
        let x = vec![Some(2.0), Some(2.0)];
        let y = vec![Some(1.0), Some(3.0)];
        assert!(matches!(
            fit_least_squares(&x, &y, false),
            Err(SawyerError::Regression(_))
        ));

        let zeros = vec![Some(0.0), Some(0.0)];
        assert!(matches!(
            fit_least_squares(&zeros, &y, true),
            Err(SawyerError::Regression(_))
        ));
    }

    #[test]
    fn no_common_rows_is_an_alignment_error() {
        let x = vec![Some(1.0), None];
        let y = vec![None, Some(1.0)];
        assert!(matches!(
            fit_least_squares(&x, &y, true),
            Err(SawyerError::Alignment(_))
        ));
    }
}

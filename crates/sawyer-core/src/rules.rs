//! Rule descriptors as they appear in per-logger rule files.
//!
//! Both rule kinds are keyed by a non-zero [`RuleId`] inside an ordered map; iteration order
//! is document order.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SawyerError};
use crate::table::{match_columns, parse_timestamp};

pub type QaRuleSet = IndexMap<RuleId, QaRule>;
pub type GapfillRuleSet = IndexMap<RuleId, GapfillRule>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0` marks an untouched cell in the flag table, so no rule may use it.
    pub fn is_reserved(&self) -> bool {
        matches!(self.0.trim().parse::<i64>(), Ok(0))
    }

    /// Integer written into the flag table for cells this rule touches.
    pub fn flag_code(&self) -> Result<i64> {
        if self.is_reserved() {
            return Err(SawyerError::config("QA flag key cannot be zero (0)"));
        }
        self.0.trim().parse::<i64>().map_err(|_| {
            SawyerError::config(format!(
                "QA flag key '{}' must be an integer flag code",
                self.0
            ))
        })
    }
}

impl From<i64> for RuleId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One end of a rule window. Rule files spell an open bound as `"open"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowBound {
    #[default]
    Open,
    At(NaiveDateTime),
}

impl WindowBound {
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "open" | "none" | "null" | "" => Ok(WindowBound::Open),
            _ => parse_timestamp(text)
                .map(WindowBound::At)
                .ok_or_else(|| SawyerError::config(format!("invalid window timestamp '{text}'"))),
        }
    }
}

impl From<NaiveDateTime> for WindowBound {
    fn from(value: NaiveDateTime) -> Self {
        WindowBound::At(value)
    }
}

impl<'de> Deserialize<'de> for WindowBound {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        WindowBound::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Inclusive time window. An open start resolves to the first row of the data, an open end
/// to `now`; the latter makes open-ended rules depend on when they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub start: WindowBound,
    pub end: WindowBound,
}

impl Window {
    pub fn new(start: impl Into<WindowBound>, end: impl Into<WindowBound>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn open() -> Self {
        Self::default()
    }

    pub fn resolve(&self, first: NaiveDateTime, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let start = match self.start {
            WindowBound::Open => first,
            WindowBound::At(ts) => ts,
        };
        let end = match self.end {
            WindowBound::Open => now,
            WindowBound::At(ts) => ts,
        };
        (start, end)
    }
}

/// Target columns of a rule: the literal `"all"`, or substrings matched against column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelector {
    All,
    Matching(Vec<String>),
}

impl ColumnSelector {
    pub fn matching<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnSelector::Matching(patterns.into_iter().map(Into::into).collect())
    }

    pub fn resolve(&self, available: &[String]) -> Vec<String> {
        match self {
            ColumnSelector::All => available.to_vec(),
            ColumnSelector::Matching(patterns) => match_columns(available, patterns),
        }
    }
}

impl<'de> Deserialize<'de> for ColumnSelector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(text) if text == "all" => Ok(ColumnSelector::All),
            OneOrMany::One(text) => Ok(ColumnSelector::Matching(vec![text])),
            OneOrMany::Many(list) => Ok(ColumnSelector::Matching(list)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(text) => vec![text],
        OneOrMany::Many(list) => list,
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QaRule {
    #[serde(default)]
    pub start: WindowBound,
    #[serde(default)]
    pub end: WindowBound,
    pub columns: ColumnSelector,
    /// Falls back to `mask_by_datetime` when absent.
    #[serde(default, rename = "qa_function")]
    pub function: Option<String>,
    #[serde(default, rename = "qa_args")]
    pub args: Vec<Value>,
    #[serde(default, rename = "qa_kwargs")]
    pub kwargs: Map<String, Value>,
    /// Only meaningful in the project-wide rule file: loggers the rule applies to, or `all`.
    #[serde(default, deserialize_with = "one_or_many")]
    pub apply_logger: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl QaRule {
    pub fn new(columns: ColumnSelector) -> Self {
        Self {
            start: WindowBound::Open,
            end: WindowBound::Open,
            columns,
            function: None,
            args: Vec::new(),
            kwargs: Map::new(),
            apply_logger: Vec::new(),
            description: None,
        }
    }

    pub fn between(mut self, start: impl Into<WindowBound>, end: impl Into<WindowBound>) -> Self {
        self.start = start.into();
        self.end = end.into();
        self
    }

    pub fn with_function(mut self, name: &str, args: Vec<Value>) -> Self {
        self.function = Some(name.to_string());
        self.args = args;
        self
    }

    pub fn kwarg(mut self, name: &str, value: Value) -> Self {
        self.kwargs.insert(name.to_string(), value);
        self
    }

    pub fn window(&self) -> Window {
        Window {
            start: self.start,
            end: self.end,
        }
    }

    pub fn applies_to(&self, logger: &str) -> bool {
        self.apply_logger
            .iter()
            .any(|name| name == logger || name == "all")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GapfillRule {
    #[serde(default, rename = "gf_function")]
    pub function: Option<String>,
    #[serde(default, rename = "gf_kwargs")]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub gap_cols: Option<ColumnSelector>,
    #[serde(default)]
    pub start_fill: Option<WindowBound>,
    #[serde(default)]
    pub end_fill: Option<WindowBound>,
    #[serde(default)]
    pub start_fit: Option<WindowBound>,
    #[serde(default)]
    pub end_fit: Option<WindowBound>,
    /// External series name -> that series' columns, paired positionally with `gap_cols`.
    #[serde(default)]
    pub sources: Option<IndexMap<String, Vec<String>>>,
}

impl GapfillRule {
    pub fn new(function: &str, gap_cols: ColumnSelector, fill: Window) -> Self {
        Self {
            function: Some(function.to_string()),
            kwargs: Map::new(),
            gap_cols: Some(gap_cols),
            start_fill: Some(fill.start),
            end_fill: Some(fill.end),
            start_fit: None,
            end_fit: None,
            sources: None,
        }
    }

    pub fn source<I, S>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources
            .get_or_insert_with(IndexMap::new)
            .insert(name.to_string(), columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn fit_window(mut self, fit: Window) -> Self {
        self.start_fit = Some(fit.start);
        self.end_fit = Some(fit.end);
        self
    }

    pub fn kwarg(mut self, name: &str, value: Value) -> Self {
        self.kwargs.insert(name.to_string(), value);
        self
    }

    /// `None` unless the rule trims its sources to a fit window.
    pub fn fit(&self) -> Option<Window> {
        if self.start_fit.is_none() && self.end_fit.is_none() {
            return None;
        }
        Some(Window {
            start: self.start_fit.unwrap_or_default(),
            end: self.end_fit.unwrap_or_default(),
        })
    }
}

/// Rule-function arguments after positional and keyword values have been matched to
/// parameter names.
#[derive(Debug, Clone)]
pub struct BoundArguments {
    function: &'static str,
    values: HashMap<&'static str, Value>,
}

/// Matches positional `args` to `params` in order and `kwargs` by name.
pub fn bind_arguments(
    function: &'static str,
    params: &[&'static str],
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<BoundArguments> {
    if args.len() > params.len() {
        return Err(SawyerError::config(format!(
            "{function} takes {} argument(s) but {} were given",
            params.len(),
            args.len()
        )));
    }

    let mut values: HashMap<&'static str, Value> = params
        .iter()
        .copied()
        .zip(args.iter().cloned())
        .collect();

    for (name, value) in kwargs {
        let Some(param) = params.iter().copied().find(|param| *param == name.as_str()) else {
            return Err(SawyerError::config(format!(
                "{function} got an unexpected keyword argument '{name}'"
            )));
        };
        if values.insert(param, value.clone()).is_some() {
            return Err(SawyerError::config(format!(
                "{function} got multiple values for argument '{name}'"
            )));
        }
    }

    Ok(BoundArguments { function, values })
}

impl BoundArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|value| !value.is_null())
    }

    pub fn required(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| {
            SawyerError::config(format!(
                "{} is missing required argument '{name}'",
                self.function
            ))
        })
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        let value = self.required(name)?;
        value.as_f64().ok_or_else(|| self.invalid(name, "a number", value))
    }

    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.get(name) {
            Some(_) => self.f64(name).map(Some),
            None => Ok(None),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        let value = self.required(name)?;
        value.as_str().ok_or_else(|| self.invalid(name, "a string", value))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            Some(_) => self.str(name).map(Some),
            None => Ok(None),
        }
    }

    pub fn optional_usize(&self, name: &str) -> Result<Option<usize>> {
        match self.get(name) {
            Some(value) => value
                .as_u64()
                .map(|v| Some(v as usize))
                .ok_or_else(|| self.invalid(name, "a non-negative integer", value)),
            None => Ok(None),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.invalid(name, "a boolean", value)),
            None => Ok(default),
        }
    }

    fn invalid(&self, name: &str, expected: &str, value: &Value) -> SawyerError {
        SawyerError::config(format!(
            "{} argument '{name}' must be {expected}, got {value}",
            self.function
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positional_and_keyword_arguments_bind_by_name() {
        let mut kwargs = Map::new();
        kwargs.insert("cval".into(), json!(40.0));
        let bound = bind_arguments(
            "mask_by_comparison",
            &["comparison", "cval"],
            &[json!("above")],
            &kwargs,
        )
        .unwrap();

        assert_eq!(bound.str("comparison").unwrap(), "above");
        assert_eq!(bound.f64("cval").unwrap(), 40.0);
    }

    #[test]
    fn duplicate_and_unknown_arguments_are_rejected() {
        let mut kwargs = Map::new();
        kwargs.insert("comparison".into(), json!("below"));
        let duplicate = bind_arguments(
            "mask_by_comparison",
            &["comparison", "cval"],
            &[json!("above")],
            &kwargs,
        );
        assert!(matches!(duplicate, Err(SawyerError::Configuration(_))));

        let mut unknown = Map::new();
        unknown.insert("threshold".into(), json!(1));
        let result = bind_arguments("scale_by_multiplier", &["multiplier"], &[], &unknown);
        assert!(matches!(result, Err(SawyerError::Configuration(_))));

        let too_many = bind_arguments("mask_by_datetime", &[], &[json!(1)], &Map::new());
        assert!(matches!(too_many, Err(SawyerError::Configuration(_))));
    }

    #[test]
    fn reserved_rule_ids() {
        assert!(RuleId::from(0).is_reserved());
        assert!(RuleId::from("0").is_reserved());
        assert!(!RuleId::from("10").is_reserved());
        assert!(RuleId::from("bad").flag_code().is_err());
        assert_eq!(RuleId::from(" 7 ").flag_code().unwrap(), 7);
    }

    #[test]
    fn window_bounds_parse_open_and_timestamps() {
        assert_eq!(WindowBound::parse("open").unwrap(), WindowBound::Open);
        assert!(matches!(
            WindowBound::parse("2021-06-01").unwrap(),
            WindowBound::At(_)
        ));
        assert!(WindowBound::parse("June first").is_err());
    }
}

//! Project configuration: data layout, registered loggers and per-logger rule files.
//!
//! A [`ProjectConfig`] is built once from a configuration directory and passed by reference to
//! whatever needs it.
//!
//! ```text
//! <config>/project.toml
//! <config>/loggers.toml
//! <config>/qa_flags.toml              project-wide QA flags ([meta] logger = "all")
//! <config>/<logger>/qa_flags.toml
//! <config>/<logger>/gapfill.toml
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SawyerError};
use crate::rules::{GapfillRuleSet, QaRuleSet, RuleId};

pub const PROJECT_FILE: &str = "project.toml";
pub const LOGGERS_FILE: &str = "loggers.toml";
/// Target name of the project-wide rule files.
pub const GLOBAL_TARGET: &str = "all";

pub const DEFAULT_FILENAME_DT_FMT: &str = "%Y-%m-%d_%H-%M-%S";
pub const DEFAULT_FILENAME_DT_REXP: &str = r"\d{4}(?:[_-]\d{2}){5}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    QaFlags,
    Gapfill,
}

impl RuleKind {
    /// Value of `meta.conftype`, and the rule file's stem.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::QaFlags => "qa_flags",
            RuleKind::Gapfill => "gapfill",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.toml", self.as_str())
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    projectname: String,
    #[serde(default)]
    base_path: PathBuf,
    default_data_paths: IndexMap<String, String>,
    #[serde(default)]
    user_subdirs: IndexMap<String, String>,
    #[serde(default)]
    filename_dt_fmt: Option<String>,
    #[serde(default)]
    filename_dt_rexp: Option<String>,
}

/// One `[<logger>]` table in `loggers.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoggerSettings {
    /// Expected sampling interval of raw files, e.g. `"10min"`.
    #[serde(default)]
    pub rawfreq: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFileMeta {
    logger: String,
    conftype: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
struct RuleFile<R> {
    meta: RuleFileMeta,
    #[serde(default = "IndexMap::new")]
    items: IndexMap<RuleId, R>,
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    config_dir: PathBuf,
    project_name: String,
    base_path: PathBuf,
    loggers: IndexMap<String, LoggerSettings>,
    /// Data level -> directory under which `<logger>/<level>/` lives.
    level_roots: IndexMap<String, PathBuf>,
    filename_dt_fmt: String,
    filename_dt_rexp: String,
}

impl ProjectConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        let project = read_to_string(&config_dir.join(PROJECT_FILE))?;
        let loggers = read_to_string(&config_dir.join(LOGGERS_FILE))?;
        let config = Self::from_toml(config_dir, &project, &loggers)?;
        info!(
            project = %config.project_name,
            loggers = config.loggers.len(),
            levels = ?config.data_levels(),
            "Loaded project configuration"
        );
        Ok(config)
    }

    /// Builds a configuration from the contents of `project.toml` and `loggers.toml`.
    pub fn from_toml(config_dir: impl Into<PathBuf>, project_toml: &str, loggers_toml: &str) -> Result<Self> {
        let project: ProjectFile = toml::from_str(project_toml)?;
        let loggers: IndexMap<String, LoggerSettings> = toml::from_str(loggers_toml)?;

        let required = |level: &str| {
            project
                .default_data_paths
                .get(level)
                .filter(|path| !path.is_empty())
                .map(|path| project.base_path.join(path))
                .ok_or_else(|| {
                    SawyerError::config(format!(
                        "{PROJECT_FILE}: default_data_paths.{level} is required"
                    ))
                })
        };
        let qa_root = required("qa")?;
        required("raw_in")?;

        let mut level_roots = IndexMap::new();
        for (level, path) in &project.default_data_paths {
            let root = if path.is_empty() {
                qa_root.clone()
            } else {
                project.base_path.join(path)
            };
            level_roots.insert(level.clone(), root);
        }
        for (level, path) in &project.user_subdirs {
            let candidate = PathBuf::from(path);
            let root = if candidate.is_dir() {
                candidate
            } else {
                qa_root.clone()
            };
            level_roots.insert(level.clone(), root);
        }

        Ok(Self {
            config_dir: config_dir.into(),
            project_name: project.projectname,
            base_path: project.base_path,
            loggers,
            level_roots,
            filename_dt_fmt: project
                .filename_dt_fmt
                .unwrap_or_else(|| DEFAULT_FILENAME_DT_FMT.to_string()),
            filename_dt_rexp: project
                .filename_dt_rexp
                .unwrap_or_else(|| DEFAULT_FILENAME_DT_REXP.to_string()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn filename_dt_fmt(&self) -> &str {
        &self.filename_dt_fmt
    }

    pub fn filename_dt_rexp(&self) -> &str {
        &self.filename_dt_rexp
    }

    pub fn loggers(&self) -> impl Iterator<Item = &str> {
        self.loggers.keys().map(String::as_str)
    }

    pub fn logger(&self, name: &str) -> Option<&LoggerSettings> {
        self.loggers.get(name)
    }

    pub fn is_logger(&self, name: &str) -> bool {
        self.loggers.contains_key(name)
    }

    pub fn validate_logger(&self, name: &str) -> Result<()> {
        if self.is_logger(name) {
            return Ok(());
        }
        Err(SawyerError::config(format!(
            "'{name}' is not a logger in project '{}' (available: {})",
            self.project_name,
            self.loggers.keys().cloned().collect::<Vec<_>>().join(", ")
        )))
    }

    pub fn data_levels(&self) -> Vec<&str> {
        self.level_roots.keys().map(String::as_str).collect()
    }

    /// `<level root>/<logger>/<level>/`, without touching the filesystem.
    pub fn data_path(&self, logger: &str, level: &str) -> Result<PathBuf> {
        self.validate_logger(logger)?;
        let root = self.level_roots.get(level).ok_or_else(|| {
            SawyerError::config(format!(
                "unknown data level '{level}' (available: {})",
                self.data_levels().join(", ")
            ))
        })?;
        Ok(root.join(logger).join(level))
    }

    pub fn rule_file_path(&self, target: &str, kind: RuleKind) -> PathBuf {
        if target == GLOBAL_TARGET {
            self.config_dir.join(kind.file_name())
        } else {
            self.config_dir.join(target).join(kind.file_name())
        }
    }

    /// Rules from one rule file. A missing file is an empty set; a file whose `[meta]` names
    /// another target or kind is rejected.
    pub fn load_rule_set<R: DeserializeOwned>(&self, target: &str, kind: RuleKind) -> Result<IndexMap<RuleId, R>> {
        if target != GLOBAL_TARGET {
            self.validate_logger(target)?;
        }
        let path = self.rule_file_path(target, kind);
        if !path.is_file() {
            warn!(path = %path.display(), "Rule file not present, using no rules");
            return Ok(IndexMap::new());
        }

        let content = read_to_string(&path)?;
        let file: RuleFile<R> = toml::from_str(&content)?;
        if file.meta.logger != target || file.meta.conftype != kind.as_str() {
            return Err(SawyerError::config(format!(
                "{}: [meta] declares logger '{}' / conftype '{}', expected '{target}' / '{kind}'",
                path.display(),
                file.meta.logger,
                file.meta.conftype
            )));
        }
        debug!(path = %path.display(), rules = file.items.len(), "Read rule file");
        Ok(file.items)
    }

    /// QA flags for `logger`, optionally merged with the project-wide flags that apply to it.
    pub fn load_qa_rules(&self, logger: &str, use_global: bool) -> Result<QaRuleSet> {
        let rules: QaRuleSet = self.load_rule_set(logger, RuleKind::QaFlags)?;
        if !use_global {
            return Ok(rules);
        }
        let global: QaRuleSet = self.load_rule_set(GLOBAL_TARGET, RuleKind::QaFlags)?;
        Ok(merge_global_rules(rules, global, logger))
    }

    pub fn load_gapfill_rules(&self, logger: &str) -> Result<GapfillRuleSet> {
        self.load_rule_set(logger, RuleKind::Gapfill)
    }
}

/// Appends the global flags that apply to `logger` after the logger's own flags. On a key
/// collision the logger's flag is kept.
pub fn merge_global_rules(target: QaRuleSet, global: QaRuleSet, logger: &str) -> QaRuleSet {
    let mut merged = target;
    for (id, rule) in global {
        if !rule.applies_to(logger) {
            continue;
        }
        if merged.contains_key(&id) {
            debug!(flag = %id, logger, "Logger flag overrides project-wide flag");
            continue;
        }
        merged.insert(id, rule);
    }
    merged
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| SawyerError::io(path, source))
}

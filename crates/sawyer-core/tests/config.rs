mod common;

use std::fs;
use std::path::Path;

use common::at;
use sawyer_core::config::{merge_global_rules, ProjectConfig, RuleKind};
use sawyer_core::rules::{ColumnSelector, QaRule, QaRuleSet, RuleId, WindowBound};
use sawyer_core::SawyerError;
use tempfile::TempDir;

const LOGGERS: &str = r#"
[MatRd]
rawfreq = "10min"
description = "Matthews Road met tower"

[TowerA]
rawfreq = "30min"
"#;

fn project_toml(base: &Path) -> String {
    format!(
        r#"
projectname = "hillslope"
base_path = "{}"

[default_data_paths]
raw_in = "raw_in"
raw_std = "raw_std"
qa = "processed"
gapfilled = ""
"#,
        base.display()
    )
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn project() -> (TempDir, ProjectConfig) {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("project.toml"), &project_toml(dir.path()));
    write(&dir.path().join("loggers.toml"), LOGGERS);
    let config = ProjectConfig::load(dir.path()).unwrap();
    (dir, config)
}

#[test]
fn project_and_loggers_load() {
    let (dir, config) = project();

    assert_eq!(config.project_name(), "hillslope");
    assert_eq!(config.loggers().collect::<Vec<_>>(), vec!["MatRd", "TowerA"]);
    assert_eq!(config.logger("MatRd").unwrap().rawfreq.as_deref(), Some("10min"));
    assert!(config.logger("TowerA").unwrap().description.is_none());
    assert_eq!(config.data_levels(), vec!["raw_in", "raw_std", "qa", "gapfilled"]);
    assert_eq!(
        config.data_path("MatRd", "raw_std").unwrap(),
        dir.path().join("raw_std").join("MatRd").join("raw_std")
    );
}

#[test]
fn empty_level_path_falls_back_to_qa_root() {
    let (dir, config) = project();
    assert_eq!(
        config.data_path("TowerA", "gapfilled").unwrap(),
        dir.path().join("processed").join("TowerA").join("gapfilled")
    );
}

#[test]
fn unknown_logger_or_level_is_rejected() {
    let (_dir, config) = project();
    assert!(matches!(
        config.data_path("Nowhere", "qa"),
        Err(SawyerError::Configuration(_))
    ));
    assert!(matches!(
        config.data_path("MatRd", "level9"),
        Err(SawyerError::Configuration(_))
    ));
}

#[test]
fn qa_and_raw_in_paths_are_required() {
    let project = r#"
projectname = "bare"

[default_data_paths]
raw_in = "raw_in"
"#;
    let result = ProjectConfig::from_toml("/tmp/unused", project, LOGGERS);
    assert!(matches!(result, Err(SawyerError::Configuration(_))));
}

#[test]
fn logger_rule_file_parses_windows_and_arguments() {
    let (dir, config) = project();
    write(
        &dir.path().join("MatRd").join("qa_flags.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "qa_flags"

[items.1]
start = "2021-06-01 03:00"
end = "open"
columns = ["AirT", "RH"]
description = "Sensor swap"

[items.2]
columns = "all"
qa_function = "mask_by_comparison"
qa_args = ["below"]
qa_kwargs = { cval = -40 }
"#,
    );

    let rules = config.load_qa_rules("MatRd", false).unwrap();

    assert_eq!(rules.len(), 2);
    let swap = &rules[&RuleId::from(1)];
    assert_eq!(swap.start, WindowBound::At(at(3)));
    assert_eq!(swap.end, WindowBound::Open);
    assert_eq!(swap.columns, ColumnSelector::matching(["AirT", "RH"]));
    let clip = &rules[&RuleId::from(2)];
    assert_eq!(clip.columns, ColumnSelector::All);
    assert_eq!(clip.function.as_deref(), Some("mask_by_comparison"));
    assert_eq!(clip.kwargs["cval"], serde_json::json!(-40));
}

#[test]
fn missing_rule_file_means_no_rules() {
    let (_dir, config) = project();
    assert!(config.load_gapfill_rules("TowerA").unwrap().is_empty());
    assert!(config.load_qa_rules("TowerA", true).unwrap().is_empty());
}

#[test]
fn meta_must_match_target_and_kind() {
    let (dir, config) = project();
    write(
        &dir.path().join("TowerA").join("gapfill.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "gapfill"
"#,
    );
    assert!(matches!(
        config.load_gapfill_rules("TowerA"),
        Err(SawyerError::Configuration(_))
    ));

    write(
        &dir.path().join("MatRd").join("gapfill.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "qa_flags"
"#,
    );
    assert!(config.load_rule_set::<QaRule>("MatRd", RuleKind::Gapfill).is_err());
}

#[test]
fn gapfill_rule_file_keeps_sources_in_order() {
    let (dir, config) = project();
    write(
        &dir.path().join("TowerA").join("gapfill.toml"),
        r#"
[meta]
logger = "TowerA"
conftype = "gapfill"

[items.fill_t]
gf_function = "midpoint"
gap_cols = ["Tair"]
start_fill = "2021-06-01"
end_fill = "open"
start_fit = "2021-05-01"

[items.fill_t.sources]
MatRd = ["AirT"]
Ridge = ["T_2m"]
"#,
    );

    let rules = config.load_gapfill_rules("TowerA").unwrap();
    let rule = &rules[&RuleId::from("fill_t")];

    let sources: Vec<&str> = rule.sources.as_ref().unwrap().keys().map(String::as_str).collect();
    assert_eq!(sources, vec!["MatRd", "Ridge"]);
    assert_eq!(rule.start_fill, Some(WindowBound::At(at(0))));
    assert_eq!(rule.fit().unwrap().end, WindowBound::Open);
}

#[test]
fn global_flags_merge_after_logger_flags() {
    let (dir, config) = project();
    write(
        &dir.path().join("MatRd").join("qa_flags.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "qa_flags"

[items.1]
columns = "AirT"
description = "local"
"#,
    );
    write(
        &dir.path().join("qa_flags.toml"),
        r#"
[meta]
logger = "all"
conftype = "qa_flags"

[items.1]
columns = "all"
apply_logger = "all"
description = "global override attempt"

[items.7]
columns = "all"
apply_logger = ["MatRd"]

[items.8]
columns = "all"
apply_logger = "TowerA"
"#,
    );

    let rules = config.load_qa_rules("MatRd", true).unwrap();

    let ids: Vec<&str> = rules.keys().map(RuleId::as_str).collect();
    assert_eq!(ids, vec!["1", "7"]);
    assert_eq!(rules[&RuleId::from(1)].description.as_deref(), Some("local"));

    let local_only = config.load_qa_rules("MatRd", false).unwrap();
    assert_eq!(local_only.len(), 1);
}

#[test]
fn merge_skips_rules_for_other_loggers() {
    let mut local = QaRuleSet::new();
    local.insert(RuleId::from(2), QaRule::new(ColumnSelector::All));
    let mut global = QaRuleSet::new();
    let mut elsewhere = QaRule::new(ColumnSelector::All);
    elsewhere.apply_logger = vec!["TowerA".to_string()];
    global.insert(RuleId::from(3), elsewhere);
    global.insert(RuleId::from(4), QaRule::new(ColumnSelector::All));

    let merged = merge_global_rules(local, global, "MatRd");

    // Rule 4 names no logger at all.
    assert_eq!(merged.keys().map(RuleId::as_str).collect::<Vec<_>>(), vec!["2"]);
}

#[test]
fn rule_files_live_beside_or_under_the_config_dir() {
    let (dir, config) = project();
    assert_eq!(
        config.rule_file_path("all", RuleKind::QaFlags),
        dir.path().join("qa_flags.toml")
    );
    assert_eq!(
        config.rule_file_path("MatRd", RuleKind::Gapfill),
        dir.path().join("MatRd").join("gapfill.toml")
    );
}

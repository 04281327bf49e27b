mod common;

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use common::{at, hourly_table, pinned_now, values};
use sawyer_core::config::ProjectConfig;
use sawyer_core::gapfill::SeriesProvider;
use sawyer_core::pipeline::{fill_logger, qa_logger, RAW_STD_LEVEL};
use sawyer_core::store::{read_sawyer_file, write_sawyer_file, ProjectStore, METADATA_START, SOURCE_LEVEL};
use sawyer_core::SawyerError;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn project() -> (TempDir, ProjectConfig) {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("project.toml"),
        &format!(
            r#"
projectname = "hillslope"
base_path = "{}"

[default_data_paths]
raw_in = "raw_in"
raw_std = "raw_std"
qa = "processed"
gapfilled = "processed"
"#,
            dir.path().display()
        ),
    );
    write(
        &dir.path().join("loggers.toml"),
        r#"
[MatRd]
rawfreq = "60min"

[TowerA]
rawfreq = "60min"
"#,
    );
    let config = ProjectConfig::load(dir.path()).unwrap();
    (dir, config)
}

fn stamp(day: u32, hour: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 6, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

#[test]
fn table_files_round_trip_with_metadata() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    let table = hourly_table(&[
        ("AirT", vec![Some(12.5), None, Some(-3.25)]),
        ("RH", vec![Some(80.0), Some(81.0), None]),
    ]);
    let path = store
        .data_dir("MatRd", "qa")
        .unwrap()
        .join(store.file_name(None, "MatRd", Some(stamp(2, 0)), "qa", "txt").unwrap());

    write_sawyer_file(&table, &path, "MatRd", "unit test").unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(METADATA_START));
    assert!(text.contains("location: MatRd"));
    assert!(text.contains("NA"));
    assert_eq!(read_sawyer_file(&path, Some("MatRd")).unwrap(), table);
}

#[test]
fn location_mismatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("towerA.txt");
    write_sawyer_file(&hourly_table(&[("x", vec![Some(1.0)])]), &path, "TowerA", "test").unwrap();

    assert!(matches!(
        read_sawyer_file(&path, Some("MatRd")),
        Err(SawyerError::Configuration(_))
    ));
    assert!(read_sawyer_file(&path, None).is_ok());
}

#[test]
fn headerless_files_accept_every_missing_spelling() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.txt");
    write(
        &path,
        "timestamp,a,b\n2021-06-01 00:00:00,NaN,1\n2021-06-01 01:00:00,,nan\n2021-06-01 02:00:00,2.5,NA\n",
    );

    let table = read_sawyer_file(&path, Some("MatRd")).unwrap();

    assert_eq!(table.index(), &[at(0), at(1), at(2)]);
    assert_eq!(values(&table, "a"), vec![None, None, Some(2.5)]);
    assert_eq!(values(&table, "b"), vec![Some(1.0), None, None]);
}

#[test]
fn non_numeric_field_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.txt");
    write(&path, "timestamp,a\n2021-06-01 00:00:00,warm\n");
    assert!(read_sawyer_file(&path, None).is_err());
}

#[test]
fn file_names_join_present_parts() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();

    assert_eq!(
        store
            .file_name(Some("site"), "MatRd", Some(stamp(3, 14)), "gap_flags", "txt")
            .unwrap(),
        "site_MatRd_2021-06-03_14-00-00_gapflags.txt"
    );
    assert_eq!(
        store.file_name(None, "MatRd", None, "", "parquet").unwrap(),
        "MatRd.parquet"
    );
}

#[test]
fn latest_file_uses_the_file_name_timestamp() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    let dir = store.data_dir("MatRd", "qa").unwrap();
    for name in [
        "MatRd_2021-06-02_00-00-00_masked.txt",
        "MatRd_2021-06-10_06-30-00_masked.txt",
        "MatRd_2021-06-20_00-00-00_qa.txt",
        "MatRd_undated_masked.txt",
    ] {
        write(&dir.join(name), "timestamp,x\n");
    }

    let (path, newest) = store.latest_file("MatRd", "qa", Some("masked")).unwrap();
    assert_eq!(path.file_name().unwrap(), "MatRd_2021-06-10_06-30-00_masked.txt");
    assert_eq!(
        newest,
        NaiveDate::from_ymd_opt(2021, 6, 10).unwrap().and_hms_opt(6, 30, 0).unwrap()
    );

    let (_, overall) = store.latest_file("MatRd", "qa", None).unwrap();
    assert_eq!(overall, stamp(20, 0));
}

#[test]
fn no_candidate_file_is_an_error() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    assert!(matches!(
        store.latest_file("TowerA", "qa", Some("masked")),
        Err(SawyerError::Configuration(_))
    ));
}

#[test]
fn store_serves_registered_loggers_as_sources() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    let table = hourly_table(&[("AirT", vec![Some(1.0), Some(2.0)])]);
    let path = store
        .data_dir("TowerA", SOURCE_LEVEL)
        .unwrap()
        .join(store.file_name(None, "TowerA", Some(stamp(5, 0)), "masked", "txt").unwrap());
    write_sawyer_file(&table, &path, "TowerA", "test").unwrap();

    assert!(store.is_known_source("TowerA"));
    assert!(!store.is_known_source("Elsewhere"));
    let (loaded, as_of) = store.load_table("TowerA").unwrap();
    assert_eq!(loaded, table);
    assert_eq!(as_of, stamp(5, 0));
}

#[test]
fn qa_then_gapfill_runs_from_the_project_layout() {
    let (dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();

    let raw = hourly_table(&[
        ("AirT", vec![Some(10.0), Some(99.0), Some(12.0), Some(13.0)]),
        ("RH", vec![Some(50.0), Some(51.0), Some(52.0), Some(53.0)]),
    ]);
    let raw_path = store
        .data_dir("MatRd", RAW_STD_LEVEL)
        .unwrap()
        .join(store.file_name(None, "MatRd", Some(stamp(2, 0)), "rawstd", "txt").unwrap());
    write_sawyer_file(&raw, &raw_path, "MatRd", "test").unwrap();

    write(
        &dir.path().join("MatRd").join("qa_flags.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "qa_flags"

[items.3]
columns = "AirT"
qa_function = "mask_by_comparison"
qa_args = ["above", 50]
"#,
    );

    let qa = qa_logger(&store, "MatRd", None, true, pinned_now()).unwrap();
    assert_eq!(qa.as_of, stamp(2, 0));
    assert_eq!(values(&qa.masked, "AirT")[1], None);
    assert_eq!(qa.flags.column("AirT_flag").unwrap(), &[0, 3, 0, 0]);

    let masked_path = store
        .data_dir("MatRd", SOURCE_LEVEL)
        .unwrap()
        .join(store.file_name(None, "MatRd", Some(stamp(2, 0)), "masked", "txt").unwrap());
    write_sawyer_file(&qa.masked, &masked_path, "MatRd", "qa").unwrap();

    let tower = hourly_table(&[("Tair", vec![Some(10.5), Some(11.5), Some(12.5), Some(13.5)])]);
    let tower_path = store
        .data_dir("TowerA", SOURCE_LEVEL)
        .unwrap()
        .join(store.file_name(None, "TowerA", Some(stamp(2, 0)), "masked", "txt").unwrap());
    write_sawyer_file(&tower, &tower_path, "TowerA", "qa").unwrap();

    write(
        &dir.path().join("MatRd").join("gapfill.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "gapfill"

[items.1]
gf_function = "substitution"
gap_cols = "AirT"
start_fill = "open"
end_fill = "open"

[items.1.sources]
TowerA = ["Tair"]
"#,
    );

    let run = fill_logger(&store, "MatRd", pinned_now()).unwrap();
    assert_eq!(
        values(&run.filled, "AirT"),
        vec![Some(10.0), Some(11.5), Some(12.0), Some(13.0)]
    );
    assert_eq!(run.indicator.count("AirT_f"), 1);
    assert_eq!(run.indicator.count("RH_f"), 0);
}

#[test]
fn qa_runs_on_a_corrected_table_dated_by_the_raw_file() {
    let (dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    let raw = hourly_table(&[("AirT", vec![Some(10.0), Some(99.0), Some(12.0)])]);
    let raw_path = store
        .data_dir("MatRd", RAW_STD_LEVEL)
        .unwrap()
        .join(store.file_name(None, "MatRd", Some(stamp(4, 0)), "rawstd", "txt").unwrap());
    write_sawyer_file(&raw, &raw_path, "MatRd", "test").unwrap();
    write(
        &dir.path().join("MatRd").join("qa_flags.toml"),
        r#"
[meta]
logger = "MatRd"
conftype = "qa_flags"

[items.2]
columns = "AirT"
qa_function = "mask_by_comparison"
qa_args = ["above", 50]
"#,
    );

    let corrected = hourly_table(&[("AirT", vec![Some(60.0), Some(11.0), Some(12.0)])]);
    let run = qa_logger(&store, "MatRd", Some(&corrected), false, pinned_now()).unwrap();

    assert_eq!(run.as_of, stamp(4, 0));
    assert_eq!(values(&run.masked, "AirT"), vec![None, Some(11.0), Some(12.0)]);
}

#[test]
fn corrected_table_still_needs_a_raw_file() {
    let (_dir, config) = project();
    let store = ProjectStore::new(&config).unwrap();
    let corrected = hourly_table(&[("AirT", vec![Some(1.0)])]);

    assert!(matches!(
        qa_logger(&store, "TowerA", Some(&corrected), false, pinned_now()),
        Err(SawyerError::Configuration(_))
    ));
}

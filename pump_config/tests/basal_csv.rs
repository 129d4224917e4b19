use std::fs::File;
use std::io::Write;

use pump_config::{BasalRow, load_basal_schedule_csv, load_toml};
use tempfile::tempdir;

#[test]
fn loads_schedule_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "start_minutes,units_per_hour").unwrap();
    writeln!(f, "0, 0.85").unwrap();
    writeln!(f, "360,1.2").unwrap();
    drop(f);

    let rows = load_basal_schedule_csv(&path).expect("load CSV");
    assert_eq!(
        rows,
        vec![
            BasalRow {
                start_minutes: 0,
                units_per_hour: 0.85
            },
            BasalRow {
                start_minutes: 360,
                units_per_hour: 1.2
            }
        ]
    );
}

#[test]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basal.csv");
    std::fs::write(&path, "minute,rate\n0,1.0\n").unwrap();
    let err = load_basal_schedule_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("must have headers"));
}

#[test]
fn reports_row_number_of_bad_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basal.csv");
    std::fs::write(&path, "start_minutes,units_per_hour\n0,1.0\nsix,1.0\n").unwrap();
    let err = load_basal_schedule_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"), "got: {err}");
}

#[test]
fn rejects_unordered_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basal.csv");
    std::fs::write(&path, "start_minutes,units_per_hour\n0,1.0\n600,1.0\n300,1.0\n").unwrap();
    assert!(load_basal_schedule_csv(&path).is_err());
}

#[test]
fn csv_override_takes_precedence_over_inline_schedule() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basal.csv");
    std::fs::write(&path, "start_minutes,units_per_hour\n0,2.0\n").unwrap();
    let toml = format!(
        "[basal]\nschedule = [[0, 1.0]]\nschedule_csv = {:?}\n",
        path.display().to_string()
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("valid");
    let rows = cfg.basal_rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert!((rows[0].units_per_hour - 2.0).abs() < 1e-12);
}

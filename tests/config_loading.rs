use flash_overlap::config::TuningConfig;
use flash_overlap::OverlapError;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_lookup_by_problem_and_hardware() {
    let dir = tempdir().unwrap();
    let path = TuningConfig::path_for(dir.path(), 256, 512, 128, "a800");
    fs::write(
        &path,
        r#"{
            "BM": 64,
            "BN": 128,
            "Algo": 2,
            "cSeg": [1, 3, 4],
            "hint": [3, 7, 1],
            "dur": 0.0312
        }"#,
    )
    .unwrap();

    let config = TuningConfig::lookup(dir.path(), 256, 512, 128, "a800").unwrap();
    assert_eq!((config.bm, config.bn, config.algo), (64, 128, 2));
    assert_eq!(config.segments, vec![1, 3, 4]);

    let plan = config.plan(256, 512, 128).unwrap();
    assert_eq!(plan.grid().rows(), 4);
    assert_eq!(plan.grid().cols(), 4);
    assert_eq!(plan.schedule().order()[..3], [3, 7, 1]);
    assert_eq!(plan.segments().columns(1), 1..3);
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("record.json");
    let config = TuningConfig {
        bm: 32,
        bn: 32,
        algo: 1,
        segments: vec![2, 4],
        hint: vec![5, 2],
        dur: 1.5,
    };
    config.save(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"cSeg\""));
    assert!(text.contains("\"BM\""));
    assert_eq!(TuningConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_record() {
    let dir = tempdir().unwrap();
    let err = TuningConfig::lookup(dir.path(), 1, 2, 3, "h100").unwrap_err();
    match &err {
        OverlapError::Config { path, .. } => assert!(path.ends_with("m1n2k3_h100.json")),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_configuration());
}

#[test]
fn test_malformed_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, r#"{"BM": 64, "cSeg": [1]}"#).unwrap();
    let err = TuningConfig::load(&path).unwrap_err();
    assert!(matches!(err, OverlapError::Config { .. }));
    assert!(err.to_string().contains("BN"));
}

#[test]
fn test_record_that_does_not_fit_the_problem() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mismatch.json");
    // 4 column groups for N = 512, BN = 128, but cSeg ends at 3.
    fs::write(&path, r#"{"BM": 64, "BN": 128, "Algo": 0, "cSeg": [3], "hint": [], "dur": 0}"#).unwrap();
    let config = TuningConfig::load(&path).unwrap();
    let err = config.plan(256, 512, 128).unwrap_err();
    assert!(matches!(err, OverlapError::InvalidSegmentPlan { .. }));
}

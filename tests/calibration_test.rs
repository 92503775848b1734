//! Bias calibration against a scripted bench.

mod common;

use common::*;
use freq_sweep::SweepError;
use freq_sweep::calibration::BiasCalibrator;
use freq_sweep::config::Topology;
use freq_sweep::frequency::FrequencyRange;
use freq_sweep::mock::{MockChannel, Transcript};
use freq_sweep::record::{CALIBRATION_HEADER, ResultLog};
use freq_sweep::vmap::FrequencyVoltageMap;

#[test]
fn selects_maximum_power_voltage_per_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("freq_volt_map.csv");
    let mut config = fast_config(FrequencyRange::new(65.0, 75.0, 5.0));
    config.search.initial = 0.1;
    config.search.step = 0.1;
    config.search.count = 3;

    let transcript = Transcript::new();
    let analyzer = MockChannel::new(SA, &transcript).reply_to(
        MARKER_QUERY,
        powers([
            -40.0, -35.0, -38.0, // 65 GHz -> 0.2 V
            -30.0, -30.0, -31.0, // 70 GHz -> tie, 0.1 V
            -50.0, -49.0, -20.0, // 75 GHz -> 0.3 V
        ]),
    );
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let map = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &map_path)
        .unwrap();

    assert_eq!(map.len(), 3);
    assert_eq!(map.get(65.0), Some(0.2));
    assert_eq!(map.get(70.0), Some(0.1));
    assert_eq!(map.get(75.0), Some(0.3));

    // persisted and reloadable
    assert_eq!(FrequencyVoltageMap::load(&map_path), Some(map));

    // every candidate is logged, not just the optimum
    assert_eq!(log.rows(), 9);
    let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
    assert!(text.starts_with("FREQ,V_G,MEAS_PWR\n65,0.1,-40\n"));
    assert!(text.ends_with("75,0.3,-20\n"));
}

#[test]
fn source_is_zeroed_before_each_frequency_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(FrequencyRange::new(65.0, 80.0, 5.0));
    config.search.count = 2;

    let transcript = Transcript::new();
    let analyzer =
        MockChannel::new(SA, &transcript).reply_to(MARKER_QUERY, powers([-1.0; 8]));
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();
    BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &dir.path().join("map.csv"))
        .unwrap();

    // four points, three steps: never past the end of the range
    let steps = preceding(&transcript, SG, ":FREQ UP");
    assert_eq!(steps.len(), 3);
    for prev in steps {
        assert_eq!(prev, (VS.to_string(), "VOLT 0".to_string()));
    }

    // every reading comes from a freshly cleared average
    let sa = transcript.sent_to(SA);
    for (i, command) in sa.iter().enumerate() {
        if command == MARKER_QUERY {
            assert_eq!(sa[i - 1], "CALC:MARK:CENT");
            assert_eq!(sa[i - 2], "AVER:CLE");
        }
    }

    let sg = transcript.sent_to(SG);
    assert_eq!(sg[0], format!(":FREQ:FIX {} GHz", 65.0 + 0.047));
    assert_eq!(sg[1], ":FREQ:STEP 5 GHz");
}

#[test]
fn default_search_stays_below_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    // 0.1 V + 40 x 0.01 V, ceiling 0.65 V
    let config = fast_config(FrequencyRange::new(65.0, 65.0, 5.0));
    assert_eq!(config.search.count, 41);

    let transcript = Transcript::new();
    let analyzer = MockChannel::new(SA, &transcript)
        .reply_to(MARKER_QUERY, powers((0..41u32).map(|i| -60.0 + f64::from(i))));
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let map = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &dir.path().join("map.csv"))
        .unwrap();

    let written = voltages_written(&transcript);
    assert_eq!(written.len(), 42, "41 candidates and the final reset");
    assert_eq!(written[39], 0.49);
    assert_eq!(written[40], 0.5);
    assert_eq!(written[41], 0.0);
    assert_eq!(map.get(65.0), Some(0.5));
    assert!(map.iter().all(|(_, v)| v <= config.search.ceiling));
}

#[test]
fn candidate_above_ceiling_aborts_before_it_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.csv");
    let mut config = fast_config(FrequencyRange::new(65.0, 75.0, 5.0));
    config.search.initial = 0.5;
    config.search.step = 0.1;
    config.search.count = 3;

    let transcript = Transcript::new();
    let analyzer =
        MockChannel::new(SA, &transcript).reply_to(MARKER_QUERY, powers([-10.0; 9]));
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let err = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &map_path)
        .unwrap_err();

    match err {
        SweepError::SafetyBoundExceeded { voltage, ceiling } => {
            assert_eq!(voltage, 0.7);
            assert_eq!(ceiling, 0.65);
        }
        other => panic!("unexpected error: {other}"),
    }
    let written = voltages_written(&transcript);
    assert!(written.iter().all(|&v| v <= 0.65), "{written:?}");
    assert_eq!(written.last(), Some(&0.0), "source left at 0 V");
    // no frequency completed, so nothing to persist
    assert!(!map_path.exists());
    assert_eq!(log.rows(), 2);
}

#[test]
fn completed_entries_survive_a_failed_run() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.csv");
    let mut config = fast_config(FrequencyRange::new(65.0, 75.0, 5.0));
    config.search.count = 2;

    let transcript = Transcript::new();
    // enough readings for the first frequency and half of the second
    let analyzer =
        MockChannel::new(SA, &transcript).reply_to(MARKER_QUERY, powers([-20.0, -25.0, -30.0]));
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let err = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &map_path)
        .unwrap_err();
    assert!(matches!(err, SweepError::Instrument(_)));

    let saved = FrequencyVoltageMap::load(&map_path).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved.get(65.0), Some(0.1));
    assert_eq!(saved.get(70.0), None);
}

#[test]
fn two_instrument_bench_cannot_calibrate() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(FrequencyRange::new(65.0, 75.0, 5.0));
    config.topology = Topology::TwoInstrument;

    let transcript = Transcript::new();
    let mut bench = bench(&transcript, &config, MockChannel::new(SA, &transcript));
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let err = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &dir.path().join("map.csv"))
        .unwrap_err();
    assert!(matches!(err, SweepError::Config(_)));
    assert!(transcript.is_empty());
}

#[test]
fn non_numeric_power_reading_aborts_instead_of_winning() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.csv");
    let mut config = fast_config(FrequencyRange::new(65.0, 70.0, 5.0));
    config.search.count = 3;

    let transcript = Transcript::new();
    let analyzer = MockChannel::new(SA, &transcript)
        .reply_to(MARKER_QUERY, ["-20", "NaN", "-50", "-20", "-21", "-22"]);
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let err = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &map_path)
        .unwrap_err();
    assert!(matches!(err, SweepError::Instrument(_)), "{err}");
    assert!(err.to_string().contains("NaN"));
    // the first frequency never completed
    assert!(!map_path.exists());
    assert_eq!(log.rows(), 1);
    assert_eq!(voltages_written(&transcript).last(), Some(&0.0));
}

#[test]
fn fine_voltage_steps_are_logged_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(FrequencyRange::new(65.0, 65.0, 5.0));
    config.search.initial = 0.1;
    config.search.step = 0.005;
    config.search.count = 3;

    let transcript = Transcript::new();
    let analyzer =
        MockChannel::new(SA, &transcript).reply_to(MARKER_QUERY, powers([-30.0, -20.0, -40.0]));
    let mut bench = bench(&transcript, &config, analyzer);
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let map = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &dir.path().join("map.csv"))
        .unwrap();
    assert_eq!(map.get(65.0), Some(0.105));

    let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
    let rows: Vec<&str> = text.lines().skip(1).collect();
    assert_eq!(rows, vec!["65,0.1,-30", "65,0.105,-20", "65,0.11,-40"]);
}

#[test]
fn empty_range_is_rejected_before_any_command() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("map.csv");
    let config = fast_config(FrequencyRange::new(80.0, 65.0, 5.0));

    let transcript = Transcript::new();
    let mut bench = bench(&transcript, &config, MockChannel::new(SA, &transcript));
    let mut log = ResultLog::new(Vec::new(), &CALIBRATION_HEADER).unwrap();

    let err = BiasCalibrator::new(&mut bench, &config)
        .calibrate(&mut log, &map_path)
        .unwrap_err();
    assert!(matches!(err, SweepError::Config(_)));
    assert!(transcript.is_empty());
    assert!(!map_path.exists());
    assert_eq!(log.rows(), 0);
}

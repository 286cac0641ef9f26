//! Files written by `TextFileSink` read back consistently in both layouts.

use chrono::Local;
use frog_daq::acquisition::{
    read_column_major, read_row_major, AcquisitionEngine, AcquisitionParameters, Dataset,
    DatasetSink, RunState, SpectralFrame, TextFileSink, WavelengthAxis,
};
use frog_daq::hardware::mock::simulated_pair;
use frog_daq::hardware::{Spectrometer, SpectrometerOptions};
use frog_daq::timing::ManualClock;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn simulated_scan_transposes_exactly() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let (stage, device) = simulated_pair(clock.clone());
    let spectro = Spectrometer::new(Arc::new(device), SpectrometerOptions::default())
        .with_clock(clock.clone());

    let params = AcquisitionParameters::new(4, 80, 50, 2000);
    let mut sink = TextFileSink::with_stamp(dir.path(), "20250102_030405");
    let report = AcquisitionEngine::new(&stage, &spectro)
        .run(&params, &mut sink)
        .await;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.frames, 20);

    let row_path = report.artifacts.row_major.unwrap();
    let column_path = report.artifacts.column_major.unwrap();
    assert_eq!(
        row_path.file_name().unwrap().to_str(),
        Some("20250102_030405_FROG.txt")
    );
    assert_eq!(
        column_path.file_name().unwrap().to_str(),
        Some("20250102_030405_FROG.csv")
    );

    let row = read_row_major(&row_path).unwrap();
    let column = read_column_major(&column_path).unwrap();

    assert_eq!(row.wavelengths.len(), 3648 - 1002);
    assert_eq!(row.delays.len(), 20);
    assert_eq!(column.delays, row.delays);
    assert_eq!(column.wavelengths, row.wavelengths);
    assert_eq!(column.intensities, row.transpose());

    // Row maxima match the recorded intensities
    for (values, max) in row.intensities.iter().zip(&row.max_intensity) {
        let expected = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!((expected - max).abs() < 1e-3);
    }
    assert_eq!(row.timestamps.len(), 20);
}

#[tokio::test]
async fn rows_are_flushed_before_finish() {
    let dir = tempdir().unwrap();
    let axis = Arc::new(WavelengthAxis::new(vec![500.0, 501.5]));
    let mut sink = TextFileSink::new(dir.path());
    sink.begin(&axis).await.unwrap();

    let frame = SpectralFrame::new(0, 0.0, vec![1.25, 2.5], Local::now());
    sink.append(&frame).await.unwrap();

    // Readable mid-run
    let row = read_row_major(sink.artifacts().row_major.unwrap()).unwrap();
    assert_eq!(row.wavelengths, vec![500.0, 501.5]);
    assert_eq!(row.intensities, vec![vec![1.25, 2.5]]);
    assert_eq!(row.max_intensity, vec![2.5]);
}

#[tokio::test]
async fn empty_run_leaves_headers_only() {
    let dir = tempdir().unwrap();
    let axis = Arc::new(WavelengthAxis::new(vec![500.0, 501.0, 502.0]));
    let dataset = Dataset::new(Arc::clone(&axis), 6.67);
    let mut sink = TextFileSink::new(dir.path());

    sink.begin(&axis).await.unwrap();
    sink.finish(&dataset, &dataset.transpose()).await.unwrap();

    let artifacts = sink.artifacts();
    let row = read_row_major(artifacts.row_major.unwrap()).unwrap();
    assert_eq!(row.wavelengths.len(), 3);
    assert!(row.delays.is_empty());

    let column = read_column_major(artifacts.column_major.unwrap()).unwrap();
    assert!(column.delays.is_empty());
    assert!(column.wavelengths.is_empty());
}

#[tokio::test]
async fn delays_keep_two_decimals() {
    let dir = tempdir().unwrap();
    let axis = Arc::new(WavelengthAxis::new(vec![400.0]));
    let mut dataset = Dataset::new(Arc::clone(&axis), 20.0138);
    let mut sink = TextFileSink::new(dir.path());
    sink.begin(&axis).await.unwrap();

    for i in 0..3 {
        let frame = Arc::new(SpectralFrame::new(
            i,
            i as f64 * 20.0138,
            vec![10.0 * i as f64],
            Local::now(),
        ));
        dataset.push(Arc::clone(&frame)).unwrap();
        sink.append(&frame).await.unwrap();
    }
    sink.finish(&dataset, &dataset.transpose()).await.unwrap();

    let column_path = sink.artifacts().column_major.unwrap();
    let text = std::fs::read_to_string(&column_path).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header, "Wavelength[nm],0.00,20.01,40.03");

    let column = read_column_major(&column_path).unwrap();
    assert_eq!(column.intensities, vec![vec![0.0, 10.0, 20.0]]);
}

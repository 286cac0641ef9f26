//! DS102 command traffic as seen by the controller, driven through the public API.

mod common;

use common::{spectrometer, CallLog, FixedDevice};
use frog_daq::acquisition::{
    events, read_row_major, spawn_acquisition, AcquisitionParameters, RunState, TextFileSink,
};
use frog_daq::hardware::{mock_serial, Direction, Ds102Stage, StageLink, StageOptions};
use frog_daq::timing::{ManualClock, PollPolicy};
use frog_daq::DaqError;
use std::sync::Arc;
use std::time::Duration;

fn ds102(options: StageOptions) -> (Arc<Ds102Stage>, mock_serial::ScriptedController, Arc<ManualClock>) {
    let (port, harness) = mock_serial::new();
    let clock = Arc::new(ManualClock::new());
    let stage = Ds102Stage::from_port(Box::new(port), options).with_clock(clock.clone());
    (Arc::new(stage), harness, clock)
}

#[tokio::test]
async fn default_poll_budget_times_out_after_120_polls() {
    let (stage, mut device, clock) = ds102(StageOptions::default());
    assert_eq!(stage.options().poll, PollPolicy::default());

    let task = {
        let stage = Arc::clone(&stage);
        tokio::spawn(async move { stage.move_and_wait(1000, 3, Direction::Forward).await })
    };

    device.expect_command("AXIs1:Fspeed0 1000").await;
    device.expect_command("AXIs1:PULS 3:GO 0").await;
    for _ in 0..120 {
        device.expect_and_reply("AXIs1:MOTION?", "1").await;
    }

    match task.await.unwrap() {
        Err(DaqError::Timeout { attempts, elapsed }) => {
            assert_eq!(attempts, 120);
            assert_eq!(elapsed, Duration::from_secs(12));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(clock.sleep_count(), 120);
}

#[tokio::test]
async fn other_axis_is_addressed() {
    let options = StageOptions {
        axis: 2,
        ..StageOptions::default()
    };
    let (stage, mut device, _clock) = ds102(options);

    let task = {
        let stage = Arc::clone(&stage);
        tokio::spawn(async move { stage.position().await })
    };
    device.expect_and_reply("AXIs2:POS?", "-125").await;
    assert_eq!(task.await.unwrap().unwrap(), -125);
}

#[tokio::test]
async fn scan_over_serial_link() {
    let dir = tempfile::tempdir().unwrap();
    let (stage, mut device, _clock) = ds102(StageOptions::default());
    let spectro = Arc::new(spectrometer(Arc::new(FixedDevice::small(CallLog::default()))));
    let (tx, _rx) = events::channel();

    let params = AcquisitionParameters::new(2, 4, 10, 1000);
    let handle = spawn_acquisition(
        stage,
        spectro,
        Box::new(TextFileSink::new(dir.path())),
        params,
        tx,
    );

    // Step 0: no move, only the position read
    device.expect_and_reply("AXIs1:POS?", "0").await;
    // Step 1
    device.expect_command("AXIs1:Fspeed0 1000").await;
    device.expect_command("AXIs1:PULS 2:GO 0").await;
    device.expect_and_reply("AXIs1:MOTION?", "1").await;
    device.expect_and_reply("AXIs1:MOTION?", "0").await;
    device.expect_and_reply("AXIs1:POS?", "2").await;
    // Final position
    device.expect_and_reply("AXIs1:POS?", "2").await;

    let report = handle.join().await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.frames, 2);
    assert_eq!(report.final_position, Some(2));

    let row = read_row_major(report.artifacts.row_major.unwrap()).unwrap();
    assert_eq!(row.delays.len(), 2);
}

#[tokio::test]
async fn garbled_position_during_scan_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let (stage, mut device, _clock) = ds102(StageOptions::default());
    let spectro = Arc::new(spectrometer(Arc::new(FixedDevice::small(CallLog::default()))));
    let (tx, _rx) = events::channel();

    let handle = spawn_acquisition(
        stage,
        spectro,
        Box::new(TextFileSink::new(dir.path())),
        AcquisitionParameters::new(1, 1, 10, 1000),
        tx,
    );

    device.expect_and_reply("AXIs1:POS?", "??").await;
    device.expect_and_reply("AXIs1:POS?", "0").await;

    let report = handle.join().await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.frames, 1);
    assert_eq!(report.final_position, Some(0));
}

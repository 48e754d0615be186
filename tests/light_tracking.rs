//! Integration tests for photo-sensor driven tracking through the mount

use std::sync::Arc;
use std::time::Duration;

use tokio_test::io::Builder;

use sekstant::config::Config;
use sekstant::hardware::PinLevel;
use sekstant::hardware::sim::{PinLog, SimImu, SimPins};
use sekstant::mount::{Mount, MountError, MountHardware, PhotoSource};
use sekstant::time::SystemClock;
use sekstant::tracking::{TrackingError, TrackingMode};

const HORIZON_DIR: u8 = 20;
const ROTATION_DIR: u8 = 8;

fn mount_with_frames(frames: tokio_test::io::Mock, log: &PinLog) -> Mount {
    let mut config = Config::default();
    config.mount.pulse_delay_us = 1;
    config.photo_sensor.filter_window = 1;

    let hardware = MountHardware {
        horizon_pins: Box::new(SimPins::new(HORIZON_DIR, 21).with_log(log.clone())),
        rotation_pins: Box::new(SimPins::new(ROTATION_DIR, 7).with_log(log.clone())),
        imu: Box::new(SimImu::fixed(0.0, 0.0, 0.0)),
        compass: None,
        photo: PhotoSource::Stream(Some(Box::new(frames))),
        compass_counter: None,
    };
    Mount::new(&config, hardware, Arc::new(SystemClock))
}

async fn wait_for_light_loop_exit(mount: &Mount) {
    for _ in 0..200 {
        if !mount.status().tracking.light {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("light loop did not exit after the stream closed");
}

#[tokio::test]
async fn test_direction_follows_sign_of_differential() {
    // ldr1 < ldr2: clockwise; then ldr1 > ldr2: counter-clockwise.
    let frames = Builder::new()
        .read(b"100,200,100,200\n")
        .wait(Duration::from_millis(50))
        .read(b"200,100,200,100\n")
        .wait(Duration::from_millis(50))
        .build();
    let log = PinLog::new();
    let mut mount = mount_with_frames(frames, &log);

    mount.start_tracking(false, true).await.unwrap();
    wait_for_light_loop_exit(&mount).await;
    assert!(mount.stop_tracking().await.is_none());
    mount.motors().wait_all_idle().await;

    for pin in [HORIZON_DIR, ROTATION_DIR] {
        let levels = log.levels(pin);
        assert_eq!(levels.first(), Some(&PinLevel::High), "pin {}", pin);
        assert_eq!(levels.last(), Some(&PinLevel::Low), "pin {}", pin);
    }
    mount.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_tracking() {
    let frames = Builder::new()
        .read(b"100,200,100,200\n")
        .wait(Duration::from_millis(50))
        .read(b"1,2,x\n")
        .wait(Duration::from_millis(50))
        .read(b"200,100,200,100\n")
        .wait(Duration::from_millis(50))
        .build();
    let log = PinLog::new();
    let mut mount = mount_with_frames(frames, &log);

    mount.start_tracking(false, true).await.unwrap();
    wait_for_light_loop_exit(&mount).await;
    mount.stop_tracking().await;
    mount.motors().wait_all_idle().await;

    // The frame after the bad one still turned both axes back.
    for pin in [HORIZON_DIR, ROTATION_DIR] {
        let levels = log.levels(pin);
        assert_eq!(levels.first(), Some(&PinLevel::High), "pin {}", pin);
        assert_eq!(levels.last(), Some(&PinLevel::Low), "pin {}", pin);
    }
    mount.shutdown().await;
}

#[tokio::test]
async fn test_balanced_frames_issue_no_pulses() {
    let frames = Builder::new().read(b"300,300,250,250\n").build();
    let log = PinLog::new();
    let mut mount = mount_with_frames(frames, &log);

    mount.start_tracking(false, true).await.unwrap();
    wait_for_light_loop_exit(&mount).await;
    mount.stop_tracking().await;
    mount.motors().wait_all_idle().await;

    assert_eq!(log.pulses(21), 0);
    assert_eq!(log.pulses(7), 0);
    assert_eq!(mount.motors().positions(), [0, 0]);
}

#[tokio::test]
async fn test_second_light_start_is_rejected() {
    let frames = Builder::new()
        .wait(Duration::from_millis(200))
        .read(b"300,300,250,250\n")
        .build();
    let log = PinLog::new();
    let mut mount = mount_with_frames(frames, &log);

    mount.start_tracking(false, true).await.unwrap();
    assert!(matches!(
        mount.start_tracking(false, true).await,
        Err(MountError::Tracking(TrackingError::AlreadyRunning(TrackingMode::Light)))
    ));
    // Survey is independent and may still start.
    mount.start_tracking(true, false).await.unwrap();
    assert!(mount.status().tracking.survey);

    wait_for_light_loop_exit(&mount).await;
    mount.shutdown().await;
}

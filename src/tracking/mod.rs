// src/tracking/mod.rs - Survey and light-tracking loops over the mount
pub mod light;
pub mod record;

pub use light::{LightSettings, LightTracker};
pub use record::{LongitudeEstimate, Peak, TrackingRecord, longitude_from_solar_noon};

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::events::{EventBus, MountEvent};
use crate::hardware::serial::{BoxedReader, FrameReader};
use crate::hardware::{HardwareError, SensorError};
use crate::motion::MotorController;
use crate::sensing::{AngleEstimator, sample_blocking};
use crate::time::TimeInterface;

/// Pause after a photo sensor bus error before reading again.
const BUS_ERROR_BACKOFF: Duration = Duration::from_millis(200);
/// Light tracking gives up after this many bus errors in a row.
const MAX_CONSECUTIVE_BUS_ERRORS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Survey,
    Light,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Survey => write!(f, "survey"),
            TrackingMode::Light => write!(f, "light"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("{0} tracking is already running")]
    AlreadyRunning(TrackingMode),
    #[error("tracking input unavailable: {0}")]
    Hardware(#[from] HardwareError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub sample_period: Duration,
    pub light: LightSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(500),
            light: LightSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStatus {
    pub survey: bool,
    pub light: bool,
}

impl TrackingStatus {
    pub fn is_tracking(&self) -> bool {
        self.survey || self.light
    }
}

struct LoopHandle {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn stop(self, mode: TrackingMode) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::error!("{} loop failed: {}", mode, e);
        }
    }
}

/// Runs the angle survey and the light-tracking loop. Each mode starts and
/// stops on its own; they share the motors but never each other's data.
pub struct TrackingSession {
    motors: Arc<MotorController>,
    estimator: Arc<Mutex<AngleEstimator>>,
    record: Arc<StdMutex<TrackingRecord>>,
    clock: Arc<dyn TimeInterface>,
    events: EventBus,
    settings: SessionSettings,
    survey: Option<LoopHandle>,
    light: Option<LoopHandle>,
}

impl TrackingSession {
    pub fn new(
        motors: Arc<MotorController>,
        estimator: Arc<Mutex<AngleEstimator>>,
        clock: Arc<dyn TimeInterface>,
        events: EventBus,
        settings: SessionSettings,
    ) -> Self {
        Self {
            motors,
            estimator,
            record: Arc::new(StdMutex::new(TrackingRecord::new())),
            clock,
            events,
            settings,
            survey: None,
            light: None,
        }
    }

    pub fn status(&self) -> TrackingStatus {
        TrackingStatus {
            survey: self.survey.as_ref().is_some_and(LoopHandle::is_running),
            light: self.light.as_ref().is_some_and(LoopHandle::is_running),
        }
    }

    /// Copy of the survey record so far.
    pub fn record(&self) -> TrackingRecord {
        match self.record.lock() {
            Ok(record) => record.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn peak(&self) -> Option<Peak> {
        self.record().peak()
    }

    /// Start sampling the horizon angle every `sample_period`.
    ///
    /// Clears the record of any previous survey.
    pub fn start_survey(&mut self) -> Result<(), TrackingError> {
        if self.status().survey {
            return Err(TrackingError::AlreadyRunning(TrackingMode::Survey));
        }
        match self.record.lock() {
            Ok(mut record) => record.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(survey_loop(
            Arc::clone(&self.estimator),
            Arc::clone(&self.record),
            Arc::clone(&self.clock),
            self.events.clone(),
            self.settings.sample_period,
            shutdown_rx,
        ));
        self.survey = Some(LoopHandle { shutdown, handle });
        tracing::info!(
            "Survey started, sampling every {:?}",
            self.settings.sample_period
        );
        Ok(())
    }

    /// Start closed-loop tracking driven by frames from `reader`.
    pub fn start_light(&mut self, reader: FrameReader<BoxedReader>) -> Result<(), TrackingError> {
        if self.status().light {
            return Err(TrackingError::AlreadyRunning(TrackingMode::Light));
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(light_loop(
            reader,
            LightTracker::new(self.settings.light),
            Arc::clone(&self.motors),
            shutdown_rx,
        ));
        self.light = Some(LoopHandle { shutdown, handle });
        tracing::info!("Light tracking started");
        Ok(())
    }

    /// Stop both loops and derive longitude from the recorded peak.
    ///
    /// Motions started by light tracking are aborted. Returns `None` when no
    /// survey ran since the last stop, or when it never recorded a reading.
    pub async fn stop(&mut self) -> Option<LongitudeEstimate> {
        let surveyed = match self.survey.take() {
            Some(survey) => {
                survey.stop(TrackingMode::Survey).await;
                true
            }
            None => false,
        };
        if let Some(light) = self.light.take() {
            light.stop(TrackingMode::Light).await;
            self.motors.abort_all().await;
        }

        let estimate = if surveyed { self.record().longitude() } else { None };
        match &estimate {
            Some(e) => tracing::info!(
                "Tracking stopped: peak {:.2} deg at {}, longitude {:.2} deg",
                e.peak_angle_deg,
                e.solar_noon_utc,
                e.longitude_deg
            ),
            None => tracing::info!("Tracking stopped: no peak recorded, longitude unavailable"),
        }
        self.events.publish(MountEvent::TrackingStopped {
            longitude_deg: estimate.map(|e| e.longitude_deg),
        });
        estimate
    }
}

async fn survey_loop(
    estimator: Arc<Mutex<AngleEstimator>>,
    record: Arc<StdMutex<TrackingRecord>>,
    clock: Arc<dyn TimeInterface>,
    events: EventBus,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let started = clock.now_utc();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let sample = match sample_blocking(Arc::clone(&estimator)).await {
                    Ok(sample) => sample,
                    Err(e) => {
                        tracing::warn!("Skipping survey tick: {}", e);
                        continue;
                    }
                };

                let at = clock.now_utc();
                let elapsed_s = (at - started).num_milliseconds() as f64 / 1000.0;
                let new_peak = match record.lock() {
                    Ok(mut record) => record.record(elapsed_s, sample.horizon_deg, at),
                    Err(poisoned) => poisoned.into_inner().record(elapsed_s, sample.horizon_deg, at),
                };
                if new_peak {
                    tracing::debug!("New peak {:.2} deg at {}", sample.horizon_deg, at);
                }
                events.publish(MountEvent::AnglesSampled {
                    horizon_deg: sample.horizon_deg,
                    rotation_deg: sample.rotation_deg,
                    elapsed_s,
                });
            }
        }
    }
    tracing::debug!("Survey loop exited");
}

async fn light_loop(
    mut reader: FrameReader<BoxedReader>,
    mut tracker: LightTracker,
    motors: Arc<MotorController>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut bus_errors = 0;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            frame = reader.next_frame() => match frame {
                Ok(frame) => {
                    bus_errors = 0;
                    let [horizon, rotation] = tracker.process(&frame);
                    tokio::join!(motors.move_axis(horizon), motors.move_axis(rotation));
                }
                Err(SensorError::Closed) => {
                    tracing::warn!("Photo sensor stream closed, light tracking ends");
                    break;
                }
                Err(SensorError::Timeout(limit)) => {
                    tracing::debug!("No photo sensor frame within {:?}", limit);
                }
                Err(SensorError::Bus(e)) => {
                    bus_errors += 1;
                    if bus_errors >= MAX_CONSECUTIVE_BUS_ERRORS {
                        tracing::error!(
                            "Photo sensor failed {} times in a row, light tracking ends: {}",
                            bus_errors,
                            e
                        );
                        break;
                    }
                    tracing::warn!(
                        "Photo sensor read failed ({}/{}): {}",
                        bus_errors,
                        MAX_CONSECUTIVE_BUS_ERRORS,
                        e
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(BUS_ERROR_BACKOFF) => {}
                    }
                }
                Err(e) => tracing::warn!("Skipping photo sensor frame: {}", e),
            }
        }
    }
    let stats = reader.stats();
    tracing::debug!(
        "Light loop exited after {} frames ({} malformed)",
        stats.frames,
        stats.malformed
    );
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, ReadBuf};
    use tokio_test::io::Builder;

    use super::*;
    use crate::hardware::PinLevel;
    use crate::hardware::sim::{SimImu, SimPins};
    use crate::motion::{AxisDriver, AxisId};
    use crate::time::SystemClock;

    /// Serial port whose every read fails, counting the attempts.
    struct FailingPort(Arc<AtomicUsize>);

    impl AsyncRead for FailingPort {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Err(io::Error::other("input/output error")))
        }
    }

    fn session(imu: SimImu) -> TrackingSession {
        let events = EventBus::default();
        let horizon = AxisDriver::new(AxisId::Horizon, Box::new(SimPins::new(20, 21)), Duration::ZERO, PinLevel::High);
        let rotation = AxisDriver::new(AxisId::Rotation, Box::new(SimPins::new(8, 7)), Duration::ZERO, PinLevel::High);
        let motors = Arc::new(MotorController::new(horizon, rotation, 60, events.clone()));
        let estimator = Arc::new(Mutex::new(AngleEstimator::new(Box::new(imu), 1)));
        TrackingSession::new(motors, estimator, Arc::new(SystemClock), events, SessionSettings::default())
    }

    #[tokio::test]
    async fn test_stop_without_samples_is_unavailable() {
        let mut session = session(SimImu::fixed(0.0, 0.0, 0.0));
        assert!(!session.status().is_tracking());
        assert!(session.stop().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_survey_cannot_start_twice() {
        let mut session = session(SimImu::fixed(10.0, 0.0, 0.0));
        session.start_survey().unwrap();
        assert!(matches!(
            session.start_survey(),
            Err(TrackingError::AlreadyRunning(TrackingMode::Survey))
        ));
        assert!(session.status().survey);
        assert!(!session.status().light);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let estimate = session.stop().await.unwrap();
        assert!((estimate.peak_angle_deg - 10.0).abs() < 1e-9);
        assert!(!session.status().is_tracking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_are_skipped() {
        let imu = SimImu::scripted([2.0]).then_fail().then_angle(4.0);
        let mut session = session(imu);
        session.start_survey().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        session.stop().await;

        let record = session.record();
        let angles: Vec<f64> = record.history().iter().map(|(_, a)| *a).collect();
        assert_eq!(angles.len(), 2);
        assert!((angles[1] - 4.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_poisoned_record() {
        let mut session = session(SimImu::fixed(7.0, 0.0, 0.0));
        session.start_survey().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.stop().await;
        assert_eq!(session.record().history().len(), 1);

        let record = Arc::clone(&session.record);
        let _ = std::thread::spawn(move || {
            let _guard = record.lock().unwrap();
            panic!("recorder thread died");
        })
        .join();
        assert!(session.record.is_poisoned());

        // The loop has not ticked yet, so only the clear has run.
        session.start_survey().unwrap();
        assert!(session.record().history().is_empty());
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_light_only_stop_has_no_longitude() {
        let mut session = session(SimImu::fixed(12.0, 0.0, 0.0));
        let mut events = session.events.subscribe();

        session.start_survey().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.stop().await.is_some());

        let frames: BoxedReader = Box::new(Builder::new().wait(Duration::from_millis(100)).build());
        session.start_light(FrameReader::new(frames, None)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.stop().await.is_none());

        let mut stopped = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MountEvent::TrackingStopped { longitude_deg } = event {
                stopped.push(longitude_deg);
            }
        }
        assert_eq!(stopped.len(), 2);
        assert!(stopped[0].is_some());
        assert_eq!(stopped[1], None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_light_tracking_gives_up_on_dead_port() {
        let mut session = session(SimImu::fixed(0.0, 0.0, 0.0));
        let reads = Arc::new(AtomicUsize::new(0));
        let port: BoxedReader = Box::new(FailingPort(Arc::clone(&reads)));
        session.start_light(FrameReader::new(port, None)).unwrap();

        for _ in 0..100 {
            if !session.status().light {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!session.status().light);
        // One read per attempt, with a pause between attempts.
        assert_eq!(reads.load(Ordering::SeqCst), MAX_CONSECUTIVE_BUS_ERRORS as usize);
        session.stop().await;
    }
}

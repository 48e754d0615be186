// src/mount.rs - Mount assembly: hardware backend, motors, sensors and tracking in one owner
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::config::{Backend, Config, ConfigError, PhotoSensorConfig};
use crate::events::EventBus;
use crate::hardware::serial::{BoxedReader, FrameReader, open_photo_sensor};
use crate::hardware::sim::{SimCompass, SimImu, SimPins, spawn_photo_sensor};
use crate::hardware::{AxisPins, HardwareError, MagneticSensor, MotionSensor, SensorError};
use crate::motion::{AxisDriver, AxisId, MotionCommand, MotionError, MotorController, PositionCounter};
use crate::sensing::{
    AlignOutcome, AlignSettings, AngleEstimator, AngleSample, HeadingEstimator, align_north, sample_blocking,
};
use crate::time::{SystemClock, TimeInterface};
use crate::tracking::{LongitudeEstimate, TrackingError, TrackingMode, TrackingRecord, TrackingSession};
use crate::web::models::{AxisStatus, MountStatusResponse};
use crate::web::mount_channel::MountRequest;

#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("no compass configured")]
    NoCompass,
    #[error("nothing to track: enable survey, light or both")]
    NothingToTrack,
}

/// Where light-tracking frames come from.
pub enum PhotoSource {
    Serial { port: String, baud: u32 },
    /// Generated frames at the given period.
    Simulated(Duration),
    /// A stream handed in by the caller; usable once.
    Stream(Option<BoxedReader>),
}

impl PhotoSource {
    fn open(&mut self) -> Result<BoxedReader, HardwareError> {
        match self {
            PhotoSource::Serial { port, baud } => {
                let serial = open_photo_sensor(port, *baud)?;
                Ok(Box::new(serial))
            }
            PhotoSource::Simulated(period) => Ok(spawn_photo_sensor(*period)),
            PhotoSource::Stream(stream) => stream.take().ok_or_else(|| {
                HardwareError::BackendUnavailable("photo sensor stream already consumed".to_string())
            }),
        }
    }
}

/// Claimed devices, before they are wired into drivers and estimators.
pub struct MountHardware {
    pub horizon_pins: Box<dyn AxisPins>,
    pub rotation_pins: Box<dyn AxisPins>,
    pub imu: Box<dyn MotionSensor>,
    pub compass: Option<Box<dyn MagneticSensor>>,
    pub photo: PhotoSource,
    /// Counter the compass axis driver must share, when a simulated compass follows it.
    pub compass_counter: Option<PositionCounter>,
}

impl MountHardware {
    pub fn simulated(config: &Config) -> Self {
        let sim = &config.simulation;
        let counter = PositionCounter::default();
        let compass = SimCompass::following(counter.clone(), sim.heading_deg, sim.heading_deg_per_step);
        Self {
            horizon_pins: Box::new(SimPins::new(config.axes.horizon.dir_pin, config.axes.horizon.step_pin)),
            rotation_pins: Box::new(SimPins::new(config.axes.rotation.dir_pin, config.axes.rotation.step_pin)),
            imu: Box::new(SimImu::fixed(sim.horizon_deg, sim.rotation_deg, sim.noise_deg)),
            compass: Some(Box::new(compass)),
            photo: PhotoSource::Simulated(Duration::from_millis(100)),
            compass_counter: Some(counter),
        }
    }

    #[cfg(feature = "rpi")]
    pub fn raspberry_pi(config: &Config) -> Result<Self, HardwareError> {
        use crate::hardware::bmi160::Bmi160;
        use crate::hardware::qmc5883::Qmc5883;
        use crate::hardware::rpi::{GpioAxisPins, I2cRegisterBus, open_gpio};

        let gpio = open_gpio()?;
        let horizon = &config.axes.horizon;
        let rotation = &config.axes.rotation;
        let horizon_pins = GpioAxisPins::claim(&gpio, horizon.dir_pin, horizon.step_pin)?;
        let rotation_pins = GpioAxisPins::claim(&gpio, rotation.dir_pin, rotation.step_pin)?;

        let imu_bus = I2cRegisterBus::open(config.imu.bus, config.imu.address)?;
        let imu = Bmi160::new(imu_bus, config.imu.address)?;

        let compass: Option<Box<dyn MagneticSensor>> = if config.compass.enabled {
            let bus = I2cRegisterBus::open(config.compass.bus, config.compass.address)?;
            Some(Box::new(Qmc5883::new(bus, config.compass.address)?))
        } else {
            None
        };

        Ok(Self {
            horizon_pins: Box::new(horizon_pins),
            rotation_pins: Box::new(rotation_pins),
            imu: Box::new(imu),
            compass,
            photo: PhotoSource::Serial {
                port: config.photo_sensor.port.clone(),
                baud: config.photo_sensor.baud,
            },
            compass_counter: None,
        })
    }

    #[cfg(not(feature = "rpi"))]
    pub fn raspberry_pi(_config: &Config) -> Result<Self, HardwareError> {
        Err(HardwareError::BackendUnavailable(
            "raspberry_pi (rebuild with --features rpi)".to_string(),
        ))
    }

    pub fn from_config(config: &Config, force_simulation: bool) -> Result<Self, HardwareError> {
        match (force_simulation, config.mount.backend) {
            (true, _) | (false, Backend::Simulated) => {
                tracing::info!("Using simulated hardware");
                Ok(Self::simulated(config))
            }
            (false, Backend::RaspberryPi) => Self::raspberry_pi(config),
        }
    }
}

/// Owns everything that touches hardware. Front ends drive it through its
/// methods or, for the web API, through [`MountRequest`]s.
pub struct Mount {
    motors: Arc<MotorController>,
    estimator: Arc<Mutex<AngleEstimator>>,
    compass: Option<HeadingEstimator>,
    session: TrackingSession,
    photo: PhotoSource,
    photo_config: PhotoSensorConfig,
    align: AlignSettings,
    events: EventBus,
    last_longitude: Option<LongitudeEstimate>,
}

impl Mount {
    pub fn new(config: &Config, hardware: MountHardware, clock: Arc<dyn TimeInterface>) -> Self {
        let events = EventBus::new(config.api.event_buffer);
        let delay = config.pulse_delay();

        for axis in AxisId::ALL {
            if config.axes.get(axis).clockwise_level.is_none() {
                tracing::warn!(
                    "axes.{}.clockwise_level is not set; assuming 'high'. Verify the direction against the wiring.",
                    axis
                );
            }
        }

        let mut horizon = AxisDriver::new(
            AxisId::Horizon,
            hardware.horizon_pins,
            delay,
            config.axes.horizon.clockwise_level(),
        );
        let mut rotation = AxisDriver::new(
            AxisId::Rotation,
            hardware.rotation_pins,
            delay,
            config.axes.rotation.clockwise_level(),
        );
        if let Some(counter) = hardware.compass_counter {
            match config.compass.axis {
                AxisId::Horizon => horizon = horizon.with_counter(counter),
                AxisId::Rotation => rotation = rotation.with_counter(counter),
            }
        }

        let motors = Arc::new(MotorController::new(
            horizon,
            rotation,
            config.mount.steps_per_revolution,
            events.clone(),
        ));
        let estimator = Arc::new(Mutex::new(AngleEstimator::new(
            hardware.imu,
            config.imu.filter_window,
        )));
        let compass = hardware
            .compass
            .map(|sensor| HeadingEstimator::new(sensor, config.compass.filter_window));
        let session = TrackingSession::new(
            Arc::clone(&motors),
            Arc::clone(&estimator),
            clock,
            events.clone(),
            config.session_settings(),
        );

        tracing::info!(
            "Mount ready: pulse delay {:?}, {} steps/rev, IMU window {}, compass {}",
            delay,
            config.mount.steps_per_revolution,
            config.imu.filter_window,
            if compass.is_some() { "present" } else { "absent" }
        );

        Self {
            motors,
            estimator,
            compass,
            session,
            photo: hardware.photo,
            photo_config: config.photo_sensor.clone(),
            align: config.compass.align_settings(),
            events,
            last_longitude: None,
        }
    }

    /// Validate `config`, claim the configured backend and assemble the mount.
    pub fn from_config(config: &Config, force_simulation: bool) -> Result<Self, MountError> {
        config.validate()?;
        let hardware = MountHardware::from_config(config, force_simulation)?;
        Ok(Self::new(config, hardware, Arc::new(SystemClock)))
    }

    pub fn motors(&self) -> &Arc<MotorController> {
        &self.motors
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn move_axis(&self, command: MotionCommand) {
        self.motors.move_axis(command).await;
    }

    pub async fn abort(&self, axis: AxisId) {
        self.motors.abort(axis).await;
    }

    pub async fn return_to_zero(&self) {
        self.motors.return_to_zero().await;
    }

    pub async fn sample_angles(&self) -> Result<AngleSample, SensorError> {
        sample_blocking(Arc::clone(&self.estimator)).await
    }

    pub async fn start_tracking(&mut self, survey: bool, light: bool) -> Result<(), MountError> {
        if !survey && !light {
            return Err(MountError::NothingToTrack);
        }
        let status = self.session.status();
        if survey && status.survey {
            return Err(TrackingError::AlreadyRunning(TrackingMode::Survey).into());
        }
        if light && status.light {
            return Err(TrackingError::AlreadyRunning(TrackingMode::Light).into());
        }
        if light {
            let stream = self.photo.open().map_err(TrackingError::from)?;
            let reader = FrameReader::new(stream, self.photo_config.read_timeout());
            self.session.start_light(reader)?;
        }
        if survey {
            self.session.start_survey()?;
        }
        Ok(())
    }

    pub async fn stop_tracking(&mut self) -> Option<LongitudeEstimate> {
        let estimate = self.session.stop().await;
        if estimate.is_some() {
            self.last_longitude = estimate;
        }
        estimate
    }

    pub fn record(&self) -> TrackingRecord {
        self.session.record()
    }

    pub async fn align_north(&mut self) -> Result<AlignOutcome, MountError> {
        let compass = self.compass.as_mut().ok_or(MountError::NoCompass)?;
        compass.reset();
        Ok(align_north(compass, &self.motors, self.align).await)
    }

    pub fn status(&self) -> MountStatusResponse {
        MountStatusResponse {
            axes: AxisId::ALL
                .iter()
                .map(|&axis| AxisStatus {
                    axis,
                    position: self.motors.position(axis),
                    degrees: self.motors.degrees(axis),
                    state: self.motors.state(axis),
                })
                .collect(),
            tracking: self.session.status(),
            peak: self.session.peak(),
            last_longitude: self.last_longitude,
        }
    }

    /// Serve web requests until `shutdown` fires or every sender is gone.
    pub async fn serve(&mut self, mut requests: mpsc::Receiver<MountRequest>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                }
            }
        }
        tracing::debug!("Mount request loop exited");
    }

    async fn handle_request(&mut self, request: MountRequest) {
        // Motion goes through the shared controller so that no `&Mount` is
        // held across an await; `Mount` itself is only `Send`.
        // A dropped responder only means the client went away.
        match request {
            MountRequest::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            MountRequest::Move { command, respond_to } => {
                self.motors.move_axis(command).await;
                let _ = respond_to.send(());
            }
            MountRequest::Abort { axis, respond_to } => {
                self.motors.abort(axis).await;
                let _ = respond_to.send(());
            }
            MountRequest::ReturnToZero { respond_to } => {
                self.motors.return_to_zero().await;
                let _ = respond_to.send(());
            }
            MountRequest::StartTracking { survey, light, respond_to } => {
                let result = self.start_tracking(survey, light).await.map_err(|e| e.to_string());
                let _ = respond_to.send(result);
            }
            MountRequest::StopTracking { respond_to } => {
                let estimate = self.stop_tracking().await;
                let _ = respond_to.send(estimate.into());
            }
        }
    }

    /// Stop tracking, abort all motion and release the pins.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down mount");
        if self.session.status().is_tracking() {
            self.stop_tracking().await;
        }
        self.motors.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_mount_from_defaults() {
        let mut mount = Mount::from_config(&Config::default(), false).unwrap();
        let sample = mount.sample_angles().await.unwrap();
        assert!((sample.horizon_deg - 35.0).abs() < 1.0);

        let status = mount.status();
        assert_eq!(status.axes.len(), 2);
        assert!(!status.tracking.is_tracking());
        mount.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = Config::default();
        config.photo_sensor.filter_window = 0;
        assert!(matches!(
            Mount::from_config(&config, true),
            Err(MountError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn test_pi_backend_needs_feature() {
        let mut config = Config::default();
        config.mount.backend = Backend::RaspberryPi;
        assert!(matches!(
            MountHardware::from_config(&config, false),
            Err(HardwareError::BackendUnavailable(_))
        ));
        assert!(MountHardware::from_config(&config, true).is_ok());
    }

    #[tokio::test]
    async fn test_request_loop_runs_on_spawned_task() {
        fn assert_send<T: Send>(value: T) -> T {
            value
        }

        let mut config = Config::default();
        config.mount.pulse_delay_us = 1;
        let mut mount = Mount::from_config(&config, true).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(assert_send(async move {
            mount.serve(rx, shutdown_rx).await;
            mount.shutdown().await;
            mount
        }));

        let (respond_to, done) = tokio::sync::oneshot::channel();
        let command = MotionCommand::new(AxisId::Horizon, crate::motion::Direction::Clockwise, 4);
        tx.send(MountRequest::Move { command, respond_to }).await.unwrap();
        done.await.unwrap();

        let (respond_to, done) = tokio::sync::oneshot::channel();
        tx.send(MountRequest::Abort { axis: AxisId::Horizon, respond_to }).await.unwrap();
        done.await.unwrap();

        let (respond_to, status) = tokio::sync::oneshot::channel();
        tx.send(MountRequest::GetStatus { respond_to }).await.unwrap();
        let position = status.await.unwrap().axes[0].position;
        assert!((0..=4).contains(&position));

        shutdown_tx.send(()).unwrap();
        let mount = task.await.unwrap();
        assert_eq!(mount.motors().state(AxisId::Horizon), crate::motion::AxisState::Idle);
    }

    #[tokio::test]
    async fn test_nothing_to_track() {
        let mut mount = Mount::from_config(&Config::default(), true).unwrap();
        assert!(matches!(
            mount.start_tracking(false, false).await,
            Err(MountError::NothingToTrack)
        ));
    }

    #[tokio::test]
    async fn test_simulated_compass_alignment() {
        let mut config = Config::default();
        config.mount.pulse_delay_us = 1;
        config.compass.settle_ms = 0;
        let mut mount = Mount::from_config(&config, true).unwrap();
        let outcome = mount.align_north().await.unwrap();
        assert!(matches!(outcome, AlignOutcome::Aligned { .. }));
        mount.shutdown().await;
    }
}

// src/sensing/mod.rs - Orientation estimates from the inertial sensor and compass
pub mod angle;
pub mod compass;

pub use angle::{AngleEstimator, AngleSample, sample_blocking};
pub use compass::{AlignOutcome, AlignSettings, HeadingEstimator, align_north};

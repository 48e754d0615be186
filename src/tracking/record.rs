// src/tracking/record.rs - Angle history, running maximum and the longitude derived from it
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub angle: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LongitudeEstimate {
    pub longitude_deg: f64,
    pub solar_noon_utc: DateTime<Utc>,
    pub peak_angle_deg: f64,
}

/// `(hour + minute / 60 - 12) * 15`; seconds are ignored.
pub fn longitude_from_solar_noon(at: DateTime<Utc>) -> f64 {
    let hours = at.hour() as f64 + at.minute() as f64 / 60.0;
    (hours - 12.0) * 15.0
}

#[derive(Debug, Clone, Default)]
pub struct TrackingRecord {
    history: Vec<(f64, f64)>,
    peak: Option<Peak>,
}

#[derive(Serialize)]
struct CsvRow {
    elapsed_s: f64,
    angle_deg: f64,
}

impl TrackingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one filtered reading. Returns true when it became the new peak.
    pub fn record(&mut self, elapsed_s: f64, angle: f64, at: DateTime<Utc>) -> bool {
        self.history.push((elapsed_s, angle));
        let is_peak = self.peak.is_none_or(|peak| angle > peak.angle);
        if is_peak {
            self.peak = Some(Peak { angle, at });
        }
        is_peak
    }

    pub fn history(&self) -> &[(f64, f64)] {
        &self.history
    }

    pub fn peak(&self) -> Option<Peak> {
        self.peak
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.peak = None;
    }

    /// `None` until at least one reading has been recorded.
    pub fn longitude(&self) -> Option<LongitudeEstimate> {
        self.peak.map(|peak| LongitudeEstimate {
            longitude_deg: longitude_from_solar_noon(peak.at),
            solar_noon_utc: peak.at,
            peak_angle_deg: peak.angle,
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        for &(elapsed_s, angle_deg) in &self.history {
            csv.serialize(CsvRow {
                elapsed_s,
                angle_deg,
            })?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)?;
        tracing::info!("Wrote {} samples to {}", self.history.len(), path.display());
        Ok(())
    }
}

// src/hardware/serial.rs - Line-oriented photo-sensor frames over serial
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::timeout;

use super::{HardwareError, SensorError};

/// Reader type used once the port is opened, so sessions can take any stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// One photo-sensor frame: `ldr1,ldr2,ldr3,ldr4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdrFrame {
    pub values: [i32; 4],
}

impl FromStr for LdrFrame {
    type Err = SensorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| SensorError::MalformedFrame {
            line: line.to_string(),
            reason,
        };

        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() != 4 {
            return Err(malformed(format!("expected 4 fields, got {}", fields.len())));
        }

        let mut values = [0i32; 4];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .trim()
                .parse::<i32>()
                .map_err(|e| malformed(format!("field '{}': {}", field.trim(), e)))?;
        }
        Ok(Self { values })
    }
}

/// Counters for the frame stream
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub frames: u64,
    pub malformed: u64,
    pub timeouts: u64,
    pub bytes_received: u64,
}

/// Pulls newline-terminated frames out of a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    read_timeout: Option<Duration>,
    buffer: Vec<u8>,
    stats: FrameStats,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, read_timeout: Option<Duration>) -> Self {
        Self {
            reader: BufReader::new(reader),
            read_timeout,
            buffer: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    /// Wait for the next frame.
    ///
    /// Blank lines are skipped silently. A line that is not valid UTF-8 or not
    /// four integers yields [`SensorError::MalformedFrame`] and the stream stays
    /// usable; end of stream yields [`SensorError::Closed`].
    pub async fn next_frame(&mut self) -> Result<LdrFrame, SensorError> {
        loop {
            // A cancelled read leaves its partial line in `buffer`; keep it.
            let read = self.reader.read_until(b'\n', &mut self.buffer);
            let bytes_read = match self.read_timeout {
                Some(limit) => match timeout(limit, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.stats.timeouts += 1;
                        return Err(SensorError::Timeout(limit));
                    }
                },
                None => read.await,
            }
            .map_err(|e| SensorError::Bus(e.to_string()))?;

            if bytes_read == 0 {
                return Err(SensorError::Closed);
            }
            self.stats.bytes_received += bytes_read as u64;

            let raw = std::mem::take(&mut self.buffer);
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    self.stats.malformed += 1;
                    return Err(SensorError::MalformedFrame {
                        line: String::from_utf8_lossy(&raw).trim().to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            if line.is_empty() {
                continue;
            }

            tracing::trace!("Photo sensor RX: {}", line);
            return match line.parse::<LdrFrame>() {
                Ok(frame) => {
                    self.stats.frames += 1;
                    Ok(frame)
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    Err(e)
                }
            };
        }
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}

/// Open the photo-sensor UART.
pub fn open_photo_sensor(port: &str, baud: u32) -> Result<serial2_tokio::SerialPort, HardwareError> {
    tracing::info!("Opening photo sensor on {} at {} baud", port, baud);
    serial2_tokio::SerialPort::open(port, baud).map_err(|source| HardwareError::SerialOpen {
        port: port.to_string(),
        source,
    })
}

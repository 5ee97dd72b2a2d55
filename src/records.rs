use crate::fault::{EscalationRecord, FaultCounters, FaultLevel};
use crate::heater::HeaterState;
use crate::sensors::SensorReading;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("log I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("status encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("log {0} already closed")]
    Closed(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RecordError + '_ {
    move |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write-to-temp then rename; readers see the old or the new file, whole.
pub fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    {
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// One cycle as it lands in the logs. Undefined temperatures are already
/// replaced by the sentinel here and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub readings: Vec<SensorReading>,
    pub co2_ppm: Option<u16>,
    pub indoor: f64,
    pub outdoor: f64,
    pub heater_state: HeaterState,
}

impl LogRecord {
    pub fn new(
        timestamp: DateTime<Local>,
        readings: &[SensorReading],
        co2_ppm: Option<u16>,
        indoor: Option<f64>,
        outdoor: Option<f64>,
        heater_state: HeaterState,
        sentinel: f64,
    ) -> Self {
        Self {
            timestamp: timestamp.format(TIMESTAMP_FORMAT).to_string(),
            readings: readings.to_vec(),
            co2_ppm,
            indoor: indoor.unwrap_or(sentinel),
            outdoor: outdoor.unwrap_or(sentinel),
            heater_state,
        }
    }

    /// `timestamp,<reading>...[,<co2>ppm],<heater>`; unreadable sensors leave
    /// their column empty.
    pub fn sensor_row(&self, co2_column: bool) -> String {
        let mut row = self.timestamp.clone();
        for reading in &self.readings {
            row.push(',');
            if let Some(value) = reading.value() {
                row.push_str(&value.to_string());
            }
        }
        if co2_column {
            row.push(',');
            if let Some(ppm) = self.co2_ppm {
                row.push_str(&format!("{}ppm", ppm));
            }
        }
        row.push(',');
        row.push_str(self.heater_state.label());
        row
    }

    pub fn summary_row(&self) -> String {
        format!("{},{},{},{}", self.timestamp, self.indoor, self.outdoor, self.heater_state.label())
    }
}

pub fn sensor_header(sensor_count: usize, co2_column: bool) -> String {
    let mut header = String::from("Timestamp");
    for i in 1..=sensor_count {
        header.push_str(&format!(",Sensor#{}", i));
    }
    if co2_column {
        header.push_str(",CO2");
    }
    header.push_str(",Heater");
    header
}

/// Per-cycle CSV log of individual readings. Held open for the life of the
/// process and flushed after every row.
pub struct SensorLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    co2_column: bool,
    columns: Option<usize>,
}

impl SensorLog {
    /// Opens for append and starts a new block with a blank line.
    pub fn open(path: impl Into<PathBuf>, co2_column: bool) -> Result<Self, RecordError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"\n").map_err(io_error(&path))?;
        writer.flush().map_err(io_error(&path))?;
        Ok(Self {
            path,
            writer: Some(writer),
            co2_column,
            columns: None,
        })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<(), RecordError> {
        let writer = self.writer.as_mut().ok_or_else(|| RecordError::Closed(self.path.clone()))?;
        let count = record.readings.len();
        if self.columns != Some(count) {
            writeln!(writer, "{}", sensor_header(count, self.co2_column)).map_err(io_error(&self.path))?;
            self.columns = Some(count);
        }
        writeln!(writer, "{}", record.sensor_row(self.co2_column)).map_err(io_error(&self.path))?;
        writer.flush().map_err(io_error(&self.path))
    }

    /// Flushes and syncs; later appends fail with [`RecordError::Closed`].
    pub fn close(&mut self) -> Result<(), RecordError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(io_error(&self.path))?;
            writer.get_ref().sync_all().map_err(io_error(&self.path))?;
            debug!("Closed {}", self.path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Append a single line, opening and closing the file around it.
pub fn append_line(path: &Path, line: &str) -> Result<(), RecordError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    writeln!(file, "{}", line).map_err(io_error(path))
}

/// Latest indoor reading for a peer tent to poll.
pub fn write_reference(path: &Path, indoor: f64) -> Result<(), RecordError> {
    replace_file(path, indoor.to_string().as_bytes()).map_err(io_error(path))
}

pub fn connection_row(timestamp: DateTime<Local>, code: i32) -> String {
    format!("{},{}", timestamp.format(TIMESTAMP_FORMAT), code)
}

/// Machine-readable view of the latest cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub tent_id: String,
    pub record: LogRecord,
    pub sensors_detected: usize,
    pub indoor_avg: Option<f64>,
    pub outdoor: Option<f64>,
    pub counters: FaultCounters,
    pub fault_level: FaultLevel,
    pub history: Vec<EscalationRecord>,
}

impl StatusSnapshot {
    pub fn write(&self, path: &Path) -> Result<(), RecordError> {
        let json = serde_json::to_vec_pretty(self)?;
        replace_file(path, &json).map_err(io_error(path))
    }

    pub fn read(path: &Path) -> Result<Self, RecordError> {
        let text = fs::read_to_string(path).map_err(io_error(path))?;
        Ok(serde_json::from_str(&text)?)
    }
}

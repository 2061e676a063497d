// CSV session log for accepted samples
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::domain::sample::Sample;
use crate::error::MonitorResult;

const HEADER: [&str; 7] = [
    "Timestamp",
    "Voltage",
    "Current",
    "Power",
    "Temp",
    "Relay",
    "Status",
];

/// File name for a session started at the given time, e.g.
/// `power_log_20260807_143015.csv`.
pub fn session_file_name(prefix: &str, started_at: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, started_at.format("%Y%m%d_%H%M%S"))
}

/// Append-only CSV record of accepted samples, one file per session.
pub struct SampleLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl SampleLog {
    /// Create the session file and write the header row.
    pub fn create(path: &Path) -> MonitorResult<Self> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one sample row. Rows are flushed eagerly so an interrupted
    /// session never leaves a partial row behind.
    pub fn append(&mut self, sample: &Sample) -> MonitorResult<()> {
        self.writer.write_record([
            sample.arrival_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            sample.voltage.to_string(),
            sample.current.to_string(),
            sample.power.to_string(),
            sample.temperature.to_string(),
            sample.relay.as_str().to_string(),
            sample.safety.clone(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and close the session file.
    pub fn finish(mut self) -> MonitorResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

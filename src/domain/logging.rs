// Logging session status domain model
use std::path::PathBuf;

use chrono::{DateTime, Local};

/// Presentation-visible status of the CSV logging session. At most one
/// session is active at a time.
#[derive(Debug, Clone, Default)]
pub struct LogStatus {
    pub active: bool,
    pub file_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Local>>,
}

impl LogStatus {
    pub fn started(file_path: PathBuf, started_at: DateTime<Local>) -> Self {
        Self {
            active: true,
            file_path: Some(file_path),
            started_at: Some(started_at),
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }
}

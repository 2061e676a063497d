// Read-only state handles consumed by a front end
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use crate::application::inbox::IngestCounters;
use crate::application::pipeline::IngestionPipeline;
use crate::domain::connection::ConnectionState;
use crate::domain::history::{HistorySnapshot, HistoryStore};
use crate::domain::logging::LogStatus;
use crate::domain::sample::Sample;

/// Everything a front end needs to render the monitor: latest-value
/// watches, the diagnostic line stream and snapshot access to history.
/// None of it can mutate pipeline internals.
pub struct MonitorState {
    pub connection: watch::Receiver<ConnectionState>,
    pub latest_sample: watch::Receiver<Option<Sample>>,
    pub log_status: watch::Receiver<LogStatus>,
    pub diagnostics: mpsc::Receiver<String>,
    pub counters: Arc<IngestCounters>,
    history: Arc<Mutex<HistoryStore>>,
}

impl MonitorState {
    /// Attach to a pipeline. The diagnostic stream has a single consumer,
    /// so this succeeds at most once per pipeline.
    pub fn attach(pipeline: &IngestionPipeline) -> Option<Self> {
        let diagnostics = pipeline.take_diagnostics()?;
        Some(Self {
            connection: pipeline.connection(),
            latest_sample: pipeline.latest_sample(),
            log_status: pipeline.log_status(),
            diagnostics,
            counters: pipeline.counters(),
            history: pipeline.history_handle(),
        })
    }

    /// Owned copy of the rolling history, for chart redraws.
    pub fn history_snapshot(&self) -> HistorySnapshot {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .snapshot()
    }
}

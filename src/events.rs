//! Print lifecycle events derived from the printer host's job state.

/// Job state as reported by OctoPrint's `/api/job` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Operational,
    Starting,
    Printing,
    Pausing,
    Paused,
    Resuming,
    Finishing,
    Cancelling,
    Error,
    Offline,
    Other(String),
}

impl JobState {
    /// Parse the human readable state string OctoPrint returns.
    ///
    /// Variants such as "Printing from SD" or "Offline after error" map onto
    /// their base state.
    pub fn parse(raw: &str) -> Self {
        let state = raw.trim();
        match state {
            "Operational" => JobState::Operational,
            "Pausing" => JobState::Pausing,
            "Paused" => JobState::Paused,
            "Resuming" => JobState::Resuming,
            "Finishing" => JobState::Finishing,
            "Cancelling" => JobState::Cancelling,
            s if s.starts_with("Starting") => JobState::Starting,
            s if s.starts_with("Printing") => JobState::Printing,
            s if s.starts_with("Error") => JobState::Error,
            s if s.starts_with("Offline") => JobState::Offline,
            s => JobState::Other(s.to_string()),
        }
    }

    /// True while a job occupies the printer, paused or not.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Starting
                | JobState::Printing
                | JobState::Pausing
                | JobState::Paused
                | JobState::Resuming
                | JobState::Finishing
                | JobState::Cancelling
        )
    }

    fn is_running(&self) -> bool {
        matches!(self, JobState::Starting | JobState::Printing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintEvent {
    Started,
    Done,
    Failed,
    Cancelled,
}

/// Turns successive job state observations into lifecycle events.
#[derive(Debug, Clone, Default)]
pub struct PrintEventTracker {
    last: Option<JobState>,
    cancelling: bool,
}

impl PrintEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new observation and return the event it implies, if any.
    pub fn observe(&mut self, state: JobState) -> Option<PrintEvent> {
        let was_active = self.last.as_ref().is_some_and(JobState::is_active);

        let event = if !was_active && state.is_running() {
            self.cancelling = false;
            Some(PrintEvent::Started)
        } else if was_active && !state.is_active() {
            let event = if self.cancelling {
                PrintEvent::Cancelled
            } else if matches!(state, JobState::Error | JobState::Offline) {
                PrintEvent::Failed
            } else {
                PrintEvent::Done
            };
            self.cancelling = false;
            Some(event)
        } else {
            None
        };

        if state == JobState::Cancelling {
            self.cancelling = true;
        }
        self.last = Some(state);
        event
    }
}

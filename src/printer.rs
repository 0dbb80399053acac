use serde_json::json;

use crate::error::PrinterError;
use crate::events::JobState;

/// What the sensor needs from the print host.
pub trait PrintControl {
    /// Current job state of the printer.
    fn job_state(&self) -> Result<JobState, PrinterError>;

    /// Pause the running print job.
    fn pause_print(&self) -> Result<(), PrinterError>;

    fn is_printing(&self) -> Result<bool, PrinterError> {
        Ok(self.job_state()? == JobState::Printing)
    }
}

/// Printer control service for interacting with the OctoPrint REST API.
///
/// This service provides methods to query the job state and to pause prints
/// when the filament sensor reports runout.
pub struct PrinterService {
    pub api_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl PrinterService {
    /// Create a new PrinterService for an OctoPrint instance.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Base URL of OctoPrint (e.g., "http://octopi.local")
    /// * `api_key` - Application key sent as `X-Api-Key`
    ///
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            api_url,
            api_key,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    fn connection_failed(&self, e: reqwest::Error) -> PrinterError {
        PrinterError::ConnectionFailed {
            api_url: self.api_url.clone(),
            reason: e.to_string(),
        }
    }

    fn check_status(
        endpoint: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, PrinterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(PrinterError::ApiError {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message: response.text().unwrap_or_default(),
        })
    }
}

impl PrintControl for PrinterService {
    /// Get the current job state.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - OctoPrint returns an error status
    /// - The response has no `state` field
    fn job_state(&self) -> Result<JobState, PrinterError> {
        let endpoint = self.endpoint("/api/job");
        let response = self
            .client
            .get(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .send()
            .map_err(|e| self.connection_failed(e))?;
        let response = Self::check_status(&endpoint, response)?;

        let job: serde_json::Value =
            response.json().map_err(|e| PrinterError::InvalidResponse {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        let state = job["state"]
            .as_str()
            .ok_or_else(|| PrinterError::InvalidResponse {
                endpoint: endpoint.clone(),
                reason: "missing 'state' field".to_string(),
            })?;

        Ok(JobState::parse(state))
    }

    /// Pause the current print job.
    ///
    /// Uses the explicit `pause` action rather than a toggle, so a job that
    /// is already paused stays paused.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - OctoPrint returns an error status (409 when nothing is printing)
    fn pause_print(&self) -> Result<(), PrinterError> {
        let endpoint = self.endpoint("/api/job");
        let response = self
            .client
            .post(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(&json!({ "command": "pause", "action": "pause" }))
            .send()
            .map_err(|e| self.connection_failed(e))?;
        Self::check_status(&endpoint, response)?;
        Ok(())
    }
}

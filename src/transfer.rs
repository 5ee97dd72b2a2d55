use crate::config::TransferConfig;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

// Allowance on top of ssh's own connect timeout for the copy itself.
const COPY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("could not start scp: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("transfer timed out after {0:?}")]
    Timeout(Duration),
}

/// Best-effort copy of the summary log to the collector host.
#[derive(Debug, Clone)]
pub struct SummaryTransfer {
    destination: String,
    connect_timeout: Duration,
}

impl SummaryTransfer {
    pub fn new(destination: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            destination: destination.into(),
            connect_timeout,
        }
    }

    pub fn get_destination(&self) -> &str {
        &self.destination
    }

    /// Returns scp's exit code (0 on success); a process killed by a signal
    /// reports -1.
    pub async fn send(&self, file: &Path) -> Result<i32, TransferError> {
        debug!("Copying {} to {}", file.display(), self.destination);
        let child = Command::new("scp")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(file)
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        let limit = self.connect_timeout + COPY_MARGIN;
        match tokio::time::timeout(limit, child).await {
            Ok(status) => Ok(status?.code().unwrap_or(-1)),
            Err(_) => Err(TransferError::Timeout(limit)),
        }
    }
}

impl From<&TransferConfig> for SummaryTransfer {
    fn from(config: &TransferConfig) -> Self {
        Self::new(config.destination.clone(), Duration::from_secs(config.timeout_secs))
    }
}

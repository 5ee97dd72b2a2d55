use crate::config::OutdoorConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OutdoorError {
    #[error("outdoor reference timed out after {0:?}")]
    Timeout(Duration),
    #[error("outdoor reference I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("outdoor reference is not a temperature: {0:?}")]
    Parse(String),
    #[error("peer fetch exited with {status}: {stderr}")]
    Peer { status: String, stderr: String },
}

/// Where the outside temperature comes from.
#[derive(Debug, Clone)]
pub enum OutdoorSource {
    Fixed(f64),
    /// A file kept current by something else (mounted share, cron sync).
    File(PathBuf),
    /// The reference file on a peer tent, fetched over ssh.
    Remote {
        host: String,
        path: String,
        timeout: Duration,
    },
}

impl From<&OutdoorConfig> for OutdoorSource {
    fn from(config: &OutdoorConfig) -> Self {
        match config {
            OutdoorConfig::Fixed { value } => OutdoorSource::Fixed(*value),
            OutdoorConfig::File { path } => OutdoorSource::File(path.clone()),
            OutdoorConfig::Remote { host, path, timeout_secs } => OutdoorSource::Remote {
                host: host.clone(),
                path: path.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            },
        }
    }
}

pub fn parse_temperature(text: &str) -> Result<f64, OutdoorError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(OutdoorError::Parse(trimmed.to_string())),
    }
}

impl OutdoorSource {
    pub fn timeout(&self) -> Duration {
        match self {
            OutdoorSource::Remote { timeout, .. } => *timeout,
            _ => LOCAL_TIMEOUT,
        }
    }

    /// Fetches the reference, never blocking longer than [`Self::timeout`].
    pub async fn fetch(&self) -> Result<f64, OutdoorError> {
        let limit = self.timeout();
        match tokio::time::timeout(limit, self.fetch_unbounded()).await {
            Ok(result) => result,
            Err(_) => Err(OutdoorError::Timeout(limit)),
        }
    }

    async fn fetch_unbounded(&self) -> Result<f64, OutdoorError> {
        match self {
            OutdoorSource::Fixed(value) => Ok(*value),
            OutdoorSource::File(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                parse_temperature(&text)
            }
            OutdoorSource::Remote { host, path, timeout } => {
                debug!("Retrieving outdoor temp from {}:{}", host, path);
                let output = Command::new("ssh")
                    .arg("-o")
                    .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)))
                    .arg("-o")
                    .arg("BatchMode=yes")
                    .arg(host)
                    .arg("cat")
                    .arg(path)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output()
                    .await?;
                if !output.status.success() {
                    return Err(OutdoorError::Peer {
                        status: output.status.to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }
                parse_temperature(&String::from_utf8_lossy(&output.stdout))
            }
        }
    }
}

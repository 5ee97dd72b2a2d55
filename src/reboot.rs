use std::process::Command;
use tracing::error;

/// Host restart. Called as the very last action of a run.
pub trait Rebooter {
    fn request_reboot(&mut self) -> std::io::Result<()>;
}

/// Runs the configured OS command (`reboot` by default).
#[derive(Debug, Clone)]
pub struct SystemReboot {
    program: String,
    args: Vec<String>,
}

impl SystemReboot {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for SystemReboot {
    fn default() -> Self {
        Self::new("reboot", Vec::new())
    }
}

impl Rebooter for SystemReboot {
    fn request_reboot(&mut self) -> std::io::Result<()> {
        let status = Command::new(&self.program).args(&self.args).status()?;
        if !status.success() {
            error!("{} exited with {}", self.program, status);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} exited with {}", self.program, status),
            ));
        }
        Ok(())
    }
}

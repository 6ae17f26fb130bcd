//! Control channel to the external session recorder.
//!
//! The recorder listens for ASCII commands, one per line. A recording is
//! started with `update`, `select all`, `filename {root:<dir>\} {template:<file>}`
//! and `start`; `stop` ends it.

use cuex_core::{Classify, ErrorKind};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TEMPLATE: &str = "eeg_data.xdf";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder at {addr} is not reachable: {reason}")]
    NotConnected { addr: String, reason: String },

    #[error("recorder failed: {0}")]
    RecorderFailed(String),

    #[error("recorder has no output directory configured")]
    NotConfigured,
}

impl Classify for RecorderError {
    fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::NotConnected { .. } | RecorderError::NotConfigured => {
                ErrorKind::DeviceNotReady
            }
            RecorderError::RecorderFailed(_) => ErrorKind::DeviceFault,
        }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Start/stop surface used by the host controller.
pub trait SessionRecorder: Send {
    fn configure(&mut self, output_dir: &Path, template: &str);
    fn start(&mut self) -> RecorderResult<()>;
    fn stop(&mut self) -> RecorderResult<()>;
    fn is_connected(&self) -> bool;
    fn is_recording(&self) -> bool;
    fn output_path(&self) -> Option<PathBuf>;
}

/// TCP client for the recorder's remote control port.
pub struct RecorderControl {
    addr: String,
    stream: Option<TcpStream>,
    output_dir: Option<PathBuf>,
    template: String,
    recording: bool,
}

impl RecorderControl {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            output_dir: None,
            template: DEFAULT_TEMPLATE.to_string(),
            recording: false,
        }
    }

    fn not_connected(&self, reason: impl ToString) -> RecorderError {
        RecorderError::NotConnected {
            addr: self.addr.clone(),
            reason: reason.to_string(),
        }
    }

    /// Opens the control connection if it is not open yet.
    pub fn connect(&mut self) -> RecorderResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| self.not_connected(e))?
            .collect();
        let mut last_err = String::from("no address");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    tracing::info!(%addr, "recorder connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(self.not_connected(last_err))
    }

    fn send(&mut self, command: &str) -> RecorderResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RecorderError::NotConnected {
                addr: self.addr.clone(),
                reason: "not connected".into(),
            })?;
        tracing::debug!(command, "recorder command");
        if let Err(e) = stream
            .write_all(command.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
        {
            self.stream = None;
            return Err(RecorderError::RecorderFailed(format!("{command}: {e}")));
        }
        Ok(())
    }

    fn filename_command(root: &Path, template: &str) -> String {
        format!(
            "filename {{root:{}{}}} {{template:{}}}",
            root.display(),
            std::path::MAIN_SEPARATOR,
            template
        )
    }
}

impl SessionRecorder for RecorderControl {
    fn configure(&mut self, output_dir: &Path, template: &str) {
        self.output_dir = Some(output_dir.to_path_buf());
        self.template = template.to_string();
    }

    /// Creates the output directory and starts recording every visible
    /// stream into `<output_dir>/<template>`.
    fn start(&mut self) -> RecorderResult<()> {
        let dir = self.output_dir.clone().ok_or(RecorderError::NotConfigured)?;
        self.connect()?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| RecorderError::RecorderFailed(format!("{}: {e}", dir.display())))?;
        let root = std::path::absolute(&dir)
            .map_err(|e| RecorderError::RecorderFailed(format!("{}: {e}", dir.display())))?;

        self.send("update")?;
        self.send("select all")?;
        let filename = Self::filename_command(&root, &self.template);
        self.send(&filename)?;
        self.send("start")?;
        self.recording = true;
        tracing::info!(path = %root.join(&self.template).display(), "recording started");
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        if !self.recording {
            return Ok(());
        }
        self.send("stop")?;
        self.recording = false;
        tracing::info!("recording stopped");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|d| d.join(&self.template))
    }
}

/// Stand-in for dry runs: keeps the state machine and creates the output
/// directory but records nothing.
#[derive(Debug, Default)]
pub struct SimulatedRecorder {
    output_dir: Option<PathBuf>,
    template: String,
    recording: bool,
}

impl SessionRecorder for SimulatedRecorder {
    fn configure(&mut self, output_dir: &Path, template: &str) {
        self.output_dir = Some(output_dir.to_path_buf());
        self.template = template.to_string();
    }

    fn start(&mut self) -> RecorderResult<()> {
        let dir = self.output_dir.as_ref().ok_or(RecorderError::NotConfigured)?;
        std::fs::create_dir_all(dir)
            .map_err(|e| RecorderError::RecorderFailed(format!("{}: {e}", dir.display())))?;
        self.recording = true;
        tracing::info!(dir = %dir.display(), "simulated recording started");
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.recording = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|d| d.join(&self.template))
    }
}

//! Screen capture for Linux.
//! Grabs the full screen with whichever system tool is installed
//! (grim, maim, scrot) and returns PNG bytes.

use std::path::PathBuf;
use std::process::Command;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{CaptureError, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    Grim,
    Maim,
    Scrot,
}

impl CaptureBackend {
    fn program(self) -> &'static str {
        match self {
            CaptureBackend::Grim => "grim",
            CaptureBackend::Maim => "maim",
            CaptureBackend::Scrot => "scrot",
        }
    }

    fn command(self, out: &str) -> Command {
        let mut cmd = Command::new(self.program());
        match self {
            CaptureBackend::Scrot => {
                cmd.args(["-z", "-o", out]);
            }
            CaptureBackend::Grim | CaptureBackend::Maim => {
                cmd.arg(out);
            }
        }
        cmd
    }
}

/// Detect available screen capture backend.
pub fn detect_backend() -> Option<CaptureBackend> {
    // Wayland first, then X11
    let found = [CaptureBackend::Grim, CaptureBackend::Maim, CaptureBackend::Scrot]
        .into_iter()
        .find(|b| probe_command(b.program()));
    match found {
        Some(backend) => info!(backend = backend.program(), "screen capture backend detected"),
        None => warn!("no screen capture backend found"),
    }
    found
}

/// Capture the full screen and return PNG bytes.
pub fn capture_full_screen(backend: CaptureBackend) -> Result<Vec<u8>, CaptureError> {
    let tmp_path: PathBuf =
        std::env::temp_dir().join(format!("lexibridge-{}.png", uuid::Uuid::new_v4()));
    let out = tmp_path.to_string_lossy().into_owned();

    let output = backend.command(&out).output().map_err(|e| {
        CaptureError::CaptureFailed(format!("failed to run {}: {e}", backend.program()))
    })?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(CaptureError::CaptureFailed(format!(
            "{} failed: {}",
            backend.program(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let bytes = std::fs::read(&tmp_path)
        .map_err(|e| CaptureError::Io(format!("failed to read screenshot: {e}")));
    let _ = std::fs::remove_file(&tmp_path);
    let bytes = bytes?;

    debug!(size = bytes.len(), "screen captured");
    Ok(bytes)
}

/// Full-screen frame source with the backend probed once.
pub struct ScreenCapture {
    backend: Option<CaptureBackend>,
}

impl ScreenCapture {
    pub fn new() -> Self {
        Self {
            backend: detect_backend(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for ScreenCapture {
    async fn grab(&self) -> Result<Vec<u8>, CaptureError> {
        let backend = self.backend.ok_or(CaptureError::NoBackendAvailable)?;
        tokio::task::spawn_blocking(move || capture_full_screen(backend))
            .await
            .map_err(|e| CaptureError::CaptureFailed(format!("capture task failed: {e}")))?
    }
}

pub(crate) fn probe_command(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrot_overwrites_in_place() {
        let cmd = CaptureBackend::Scrot.command("/tmp/x.png");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-z", "-o", "/tmp/x.png"]);
        assert_eq!(CaptureBackend::Grim.command("/tmp/x.png").get_args().count(), 1);
    }

    #[tokio::test]
    async fn missing_backend_is_an_error() {
        let capture = ScreenCapture { backend: None };
        assert!(!capture.is_available());
        assert!(matches!(capture.grab().await, Err(CaptureError::NoBackendAvailable)));
    }
}

//! Stream muxing through an external ffmpeg binary

use crate::utils::error::{DownloadError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Merges downloaded elementary streams into one container without re-encoding
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Merge `inputs` into `output`; inputs are removed only on success
    async fn mux(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Human-readable version of the underlying tool
    async fn version(&self) -> Result<String>;
}

/// [`Muxer`] backed by the ffmpeg command line
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegMuxer {
    /// Resolve ffmpeg the usual way (see [`find_ffmpeg`])
    pub fn new() -> Self {
        Self {
            binary: find_ffmpeg(),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `-y -i <in>... -c:v copy -c:a copy <out>`
    pub fn mux_args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        for input in inputs {
            args.push("-i".into());
            args.push(input.as_os_str().to_owned());
        }
        args.extend(["-c:v", "copy", "-c:a", "copy"].into_iter().map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        debug!(
            "Muxing {} parts into {} with {}",
            inputs.len(),
            output.display(),
            self.binary.display()
        );

        let result = Command::new(&self.binary)
            .args(Self::mux_args(inputs, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                return Err(DownloadError::Mux {
                    message: e.to_string(),
                    stderr: String::new(),
                })
            }
        };

        if !out.status.success() {
            return Err(DownloadError::Mux {
                message: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        for input in inputs {
            if let Err(e) = tokio::fs::remove_file(input).await {
                warn!("Failed to remove muxed input {}: {}", input.display(), e);
            }
        }

        info!("Muxed {} parts into {}", inputs.len(), output.display());
        Ok(())
    }

    async fn version(&self) -> Result<String> {
        let out = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await?;

        if !out.status.success() {
            return Err(DownloadError::Mux {
                message: format!("{} -version: {}", self.binary.display(), out.status),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

/// Locate ffmpeg: bundled next to the executable (or in the macOS app's
/// `Resources`), then on `PATH`, else the bare name for the OS to resolve.
pub fn find_ffmpeg() -> PathBuf {
    let name = binary_name();

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        if exe_dir.ends_with("Contents/MacOS") {
            if let Some(contents) = exe_dir.parent() {
                let bundled = contents.join("Resources").join(name);
                if bundled.is_file() {
                    return bundled;
                }
            }
        }

        let adjacent = exe_dir.join(name);
        if adjacent.is_file() {
            return adjacent;
        }
    }

    which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ============================================================
    // ARGUMENTS
    // ============================================================

    #[test]
    fn test_mux_args_layout() {
        let inputs = vec![PathBuf::from("/a/video.mp4"), PathBuf::from("/a/audio.m4a")];
        let args = FfmpegMuxer::mux_args(&inputs, Path::new("/a/out.mp4"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-y", "-i", "/a/video.mp4", "-i", "/a/audio.m4a", "-c:v", "copy", "-c:a", "copy",
                "/a/out.mp4"
            ]
        );
    }

    #[test]
    fn test_find_ffmpeg_never_empty() {
        let path = find_ffmpeg();
        assert!(!path.as_os_str().is_empty());
    }

    // ============================================================
    // EXECUTION
    // ============================================================

    #[tokio::test]
    async fn test_missing_binary_keeps_inputs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("v.mp4");
        std::fs::write(&input, b"data").unwrap();

        let muxer = FfmpegMuxer::with_binary(dir.path().join("no-such-ffmpeg"));
        let err = muxer
            .mux(&[input.clone()], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Mux { .. }));
        assert!(input.exists(), "inputs must survive a failed mux");
    }

    #[cfg(unix)]
    fn fake_binary(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_mux_removes_inputs() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(dir.path(), r#"for last; do :; done; echo merged > "$last""#);
        let inputs = vec![dir.path().join("a.mp4"), dir.path().join("b.m4a")];
        for input in &inputs {
            std::fs::write(input, b"x").unwrap();
        }
        let output = dir.path().join("out.mp4");

        FfmpegMuxer::with_binary(binary)
            .mux(&inputs, &output)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "merged");
        assert!(inputs.iter().all(|p| !p.exists()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_mux_embeds_stderr() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(dir.path(), "echo 'Invalid data found' >&2; exit 1");
        let input = dir.path().join("a.mp4");
        std::fs::write(&input, b"x").unwrap();

        let err = FfmpegMuxer::with_binary(binary)
            .mux(&[input.clone()], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();

        match err {
            DownloadError::Mux { stderr, .. } => assert_eq!(stderr, "Invalid data found"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(input.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_first_line() {
        let dir = TempDir::new().unwrap();
        let binary = fake_binary(dir.path(), "echo 'ffmpeg version 6.1'; echo 'built with gcc'");
        let version = FfmpegMuxer::with_binary(binary).version().await.unwrap();
        assert_eq!(version, "ffmpeg version 6.1");
    }
}

// External transcode path for container formats without a native decoder
// Converts to a temporary 16-bit PCM WAV via ffmpeg

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempPath;
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the external transcoder looked up on PATH.
pub const TRANSCODER: &str = "ffmpeg";

/// Resolve the transcoder executable on PATH, if installed.
pub fn find_transcoder() -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(TRANSCODER);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", TRANSCODER));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Transcode `path` to a temporary 16-bit PCM WAV at 44100 Hz.
///
/// The returned temp path deletes the file when dropped, so the caller keeps
/// it alive exactly as long as the decoded stream needs it.
pub(crate) fn transcode_to_wav(path: &Path) -> Result<TempPath> {
    let tool = find_transcoder().ok_or_else(|| Error::MissingExternalTool(TRANSCODER.to_string()))?;

    let temp = tempfile::Builder::new()
        .prefix("soundboard_")
        .suffix(".wav")
        .tempfile()?
        .into_temp_path();

    debug!(input = %path.display(), output = %temp.display(), "transcoding to wav");

    let status = Command::new(&tool)
        .arg("-i")
        .arg(path)
        .arg("-y")
        .args(["-acodec", "pcm_s16le", "-ar", "44100"])
        .arg(temp.as_os_str())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingExternalTool(TRANSCODER.to_string())
            } else {
                Error::Io(e)
            }
        })?;

    if !status.success() {
        // TempPath drops here and removes the partial output
        return Err(Error::ExternalToolFailure(format!(
            "{} exited with {} for {}",
            TRANSCODER,
            status,
            path.display()
        )));
    }

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::AudioDecoder;
    use serial_test::serial;

    fn with_path<T>(value: &std::ffi::OsStr, f: impl FnOnce() -> T) -> T {
        let saved = env::var_os("PATH");
        env::set_var("PATH", value);
        let out = f();
        match saved {
            Some(p) => env::set_var("PATH", p),
            None => env::remove_var("PATH"),
        }
        out
    }

    #[test]
    #[serial]
    fn missing_transcoder_is_reported_distinctly() {
        let empty = tempfile::tempdir().unwrap();
        with_path(empty.path().as_os_str(), || {
            assert!(find_transcoder().is_none());

            let clip = empty.path().join("clip.m4a");
            std::fs::write(&clip, b"not really an m4a").unwrap();
            match AudioDecoder::open(&clip) {
                Err(Error::MissingExternalTool(tool)) => assert_eq!(tool, TRANSCODER),
                other => panic!("expected MissingExternalTool, got {:?}", other.map(|_| ())),
            }
        });
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn failing_transcoder_is_reported_distinctly() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let fake = bin.path().join(TRANSCODER);
        std::fs::write(&fake, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        with_path(bin.path().as_os_str(), || {
            assert_eq!(find_transcoder().as_deref(), Some(fake.as_path()));

            let clip = bin.path().join("clip.m4a");
            std::fs::write(&clip, b"not really an m4a").unwrap();
            match AudioDecoder::open(&clip) {
                Err(Error::ExternalToolFailure(_)) => {}
                other => panic!("expected ExternalToolFailure, got {:?}", other.map(|_| ())),
            }
        });
    }
}

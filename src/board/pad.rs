// Pad identity, color, and playback state machine fields

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::audio::{PlaybackSession, StreamFormat};

/// Stable handle identifying one pad on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadId(pub(crate) u64);

impl fmt::Display for PadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

/// Display color of a pad. Decorative only; playback ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    /// Parse a strict `#RRGGBB` string.
    pub fn from_hex(hex: &str) -> Option<Color> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Color { r, g, b })
    }

    /// Parse leniently: anything invalid or empty becomes white.
    pub fn from_hex_or_white(hex: &str) -> Color {
        Color::from_hex(hex).unwrap_or(Color::WHITE)
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Pad lifecycle: Stopped -> Playing -> {Paused, Stopped}; Paused -> {Playing, Stopped}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadState {
    Stopped,
    Playing,
    Paused,
}

/// One soundboard cell: a source file plus its playback state.
///
/// Timing model: `accumulated` carries the elapsed time of all finished
/// playing segments; `started_at` anchors the current one. While Playing,
/// elapsed = `now - started_at + accumulated`; while Paused it is frozen at
/// `accumulated`. This avoids querying the audio engine on every tick.
pub struct Pad {
    pub(crate) id: PadId,
    pub(crate) path: PathBuf,
    pub(crate) color: Color,
    pub(crate) format: StreamFormat,
    pub(crate) state: PadState,
    /// Computed once when the pad is created
    pub(crate) total: Duration,
    /// Source-frame offset to resume from
    pub(crate) paused_frame: u64,
    pub(crate) started_at: Option<Instant>,
    pub(crate) accumulated: Duration,
    /// Present exactly while a session is live (Playing or Paused)
    pub(crate) session: Option<PlaybackSession>,
    /// Bumped per session so stale completion signals are ignored
    pub(crate) generation: u64,
    pub(crate) reporter_stop: Option<oneshot::Sender<()>>,
}

impl Pad {
    pub(crate) fn new(id: PadId, path: PathBuf, color: Color, format: StreamFormat) -> Self {
        let total = format.duration();
        Self {
            id,
            path,
            color,
            format,
            state: PadState::Stopped,
            total,
            paused_frame: 0,
            started_at: None,
            accumulated: Duration::ZERO,
            session: None,
            generation: 0,
            reporter_stop: None,
        }
    }

    /// File stem shown on the pad.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Elapsed playback time, clamped to `[0, total]`.
    pub fn elapsed(&self) -> Duration {
        let raw = match self.state {
            PadState::Playing => {
                self.started_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO) + self.accumulated
            }
            _ => self.accumulated,
        };
        raw.min(self.total)
    }

    /// Progress fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        (self.elapsed().as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Fire the current reporter's stop signal, if one is running.
    pub(crate) fn fire_reporter_stop(&mut self) {
        if let Some(stop) = self.reporter_stop.take() {
            // Best effort: the reporter may already have exited
            let _ = stop.send(());
        }
    }

    pub(crate) fn info(&self) -> PadInfo {
        PadInfo {
            id: self.id,
            name: self.name(),
            path: self.path.clone(),
            color: self.color,
            state: self.state,
            duration: self.total,
            elapsed: self.elapsed(),
            progress: self.progress(),
        }
    }
}

/// Presentation-facing snapshot of a pad.
#[derive(Debug, Clone)]
pub struct PadInfo {
    pub id: PadId,
    pub name: String,
    pub path: PathBuf,
    pub color: Color,
    pub state: PadState,
    pub duration: Duration,
    pub elapsed: Duration,
    pub progress: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pad(total_frames: u64, sample_rate: u32) -> Pad {
        let format = StreamFormat { sample_rate, channels: 1, total_frames };
        Pad::new(PadId(1), PathBuf::from("/tmp/kazoo solo.wav"), Color::WHITE, format)
    }

    #[test]
    fn hex_colors_round_trip() {
        let c = Color { r: 244, g: 67, b: 54 };
        assert_eq!(c.to_hex(), "#F44336");
        assert_eq!(Color::from_hex("#F44336"), Some(c));
        assert_eq!(Color::from_hex("#f44336"), Some(c));
    }

    #[test]
    fn invalid_hex_defaults_to_white() {
        assert_eq!(Color::from_hex("F44336"), None);
        assert_eq!(Color::from_hex("#F4433"), None);
        assert_eq!(Color::from_hex("#GGGGGG"), None);
        assert_eq!(Color::from_hex_or_white(""), Color::WHITE);
        assert_eq!(Color::from_hex_or_white("nope"), Color::WHITE);
    }

    #[test]
    fn name_is_the_file_stem() {
        let pad = test_pad(44100, 44100);
        assert_eq!(pad.name(), "kazoo solo");
    }

    #[test]
    fn duration_uses_the_frame_count() {
        let pad = test_pad(132_300, 44100);
        assert!((pad.total.as_secs_f64() - 3.0).abs() < 1e-9);

        // A zero sample rate falls back instead of dividing by zero
        let pad = test_pad(44100, 0);
        assert!((pad.total.as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn elapsed_is_frozen_unless_playing() {
        let mut pad = test_pad(441_000, 44100); // 10s
        pad.accumulated = Duration::from_millis(1500);

        assert_eq!(pad.elapsed(), Duration::from_millis(1500));

        pad.state = PadState::Playing;
        pad.started_at = Some(Instant::now() - Duration::from_millis(500));
        let elapsed = pad.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "got {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2500), "got {:?}", elapsed);
    }

    #[test]
    fn elapsed_and_progress_clamp_to_total() {
        let mut pad = test_pad(44100, 44100); // 1s
        pad.state = PadState::Playing;
        pad.accumulated = Duration::from_secs(5);
        pad.started_at = Some(Instant::now());

        assert_eq!(pad.elapsed(), Duration::from_secs(1));
        assert_eq!(pad.progress(), 1.0);
    }

    #[test]
    fn zero_length_pad_reports_zero_progress() {
        let pad = test_pad(0, 44100);
        assert_eq!(pad.progress(), 0.0);
    }
}

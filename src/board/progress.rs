// Progress reporter
// One periodic task per playing pad, stopped by a per-session oneshot

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::pad::PadId;
use super::soundboard::BoardInner;

/// Tick interval for progress publication.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Run until the stop signal fires or the pad disappears.
///
/// Ticks where the pad is not Playing (or has no measurable duration) publish
/// nothing; the loop keeps waiting for its stop signal, mirroring the
/// lifetime of the session that spawned it.
pub(crate) async fn run(board: Arc<BoardInner>, id: PadId, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if !board.publish_progress_tick(id) {
                    break;
                }
            }
        }
    }
    debug!(%id, "progress reporter stopped");
}

/// Format a timestamp as `H:MM:SS.mmm`, omitting the hours segment when zero.
pub fn format_timestamp(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{}:{:02}.{:03}", minutes, seconds, millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_format_like_a_clock() {
        assert_eq!(format_timestamp(Duration::ZERO), "0:00.000");
        assert_eq!(format_timestamp(Duration::from_millis(1500)), "0:01.500");
        assert_eq!(format_timestamp(Duration::from_millis(61_250)), "1:01.250");
        assert_eq!(format_timestamp(Duration::from_millis(600_007)), "10:00.007");
        assert_eq!(format_timestamp(Duration::from_millis(3_661_007)), "1:01:01.007");
    }
}

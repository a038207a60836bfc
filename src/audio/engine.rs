// Playback engine
// One ephemeral session per play: decode -> resample -> ring buffer -> mixer

use std::sync::Arc;
use std::time::Duration;

use ringbuf::{
    traits::{Producer, Split},
    HeapProd, HeapRb,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::audio::decoder::SampleStream;
use crate::audio::output::{AudioOutput, SessionShared, SessionSource};
use crate::audio::resampler::StreamResampler;
use crate::error::Result;

/// Ring capacity between the feeder thread and the mixer, ~200ms.
const RING_SECONDS_DIV: usize = 5;

pub struct PlaybackEngine;

impl PlaybackEngine {
    /// Start playing `stream` on the shared output from `start_frame`.
    ///
    /// Seeks before any samples are produced, so a resume reproduces the
    /// exact sample position rather than an elapsed-time approximation.
    pub fn start(
        mut stream: SampleStream,
        start_frame: u64,
        output: &AudioOutput,
    ) -> Result<PlaybackSession> {
        if start_frame > 0 {
            stream.seek(start_frame)?;
        }

        let format = stream.format();
        let src_rate = format.effective_sample_rate();
        let out_rate = output.sample_rate();
        let out_channels = output.channels();

        let resampler = StreamResampler::new(src_rate, out_rate, out_channels)?;

        let capacity = (out_rate as usize / RING_SECONDS_DIV) * out_channels as usize;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let shared = Arc::new(SessionShared::new());
        let (done_tx, done_rx) = oneshot::channel();

        output.submit(SessionSource {
            consumer,
            shared: Arc::clone(&shared),
            done: Some(done_tx),
        });

        let feeder_shared = Arc::clone(&shared);
        let channels = format.channels;
        // Detached: the feeder exits on its own once stopped or drained
        let _feeder = std::thread::Builder::new()
            .name("soundboard-feeder".to_string())
            .spawn(move || feed(stream, feeder_shared, producer, resampler, channels))?;

        debug!(start_frame, src_rate, "playback session started");

        Ok(PlaybackSession {
            shared,
            done_rx: Some(done_rx),
            start_frame,
            src_rate,
            out_rate,
        })
    }
}

/// Handle to one in-flight playback: pause control, played position, and the
/// completion signal. Dropping the session stops it.
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
    done_rx: Option<oneshot::Receiver<()>>,
    start_frame: u64,
    src_rate: u32,
    out_rate: u32,
}

impl PlaybackSession {
    /// Set or clear the pause flag. While set, the mixer consumes nothing
    /// from this session; clearing it continues at exactly the next sample.
    pub fn set_paused(&self, paused: bool) {
        self.shared.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Source-frame position actually played so far, including the start
    /// offset. Within one resample window of the true position.
    pub fn position_frames(&self) -> u64 {
        let played = self.shared.frames_played() as u128;
        let converted = played * self.src_rate as u128 / self.out_rate as u128;
        self.start_frame + converted as u64
    }

    /// Stop the session: the mixer drops the source and the feeder exits.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Take the completion signal. Fires once when playback drains naturally;
    /// never fires for a stopped session.
    pub(crate) fn take_done(&mut self) -> Option<oneshot::Receiver<()>> {
        self.done_rx.take()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Feeder loop: decode, upmix, resample, hand off to the mixer's ring.
fn feed(
    mut stream: SampleStream,
    shared: Arc<SessionShared>,
    mut producer: HeapProd<f32>,
    mut resampler: StreamResampler,
    channels: u16,
) {
    loop {
        if shared.is_stopped() {
            break;
        }
        match stream.next_chunk() {
            Ok(Some(chunk)) => {
                let stereo = to_stereo(&chunk, channels);
                match resampler.push(&stereo) {
                    Ok(out) => {
                        if !push_all(&mut producer, &out, &shared) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("resampling failed mid-playback: {}", e);
                        shared.mark_eof();
                        break;
                    }
                }
            }
            Ok(None) => {
                match resampler.flush() {
                    Ok(tail) => {
                        push_all(&mut producer, &tail, &shared);
                    }
                    Err(e) => warn!("resampler flush failed: {}", e),
                }
                shared.mark_eof();
                break;
            }
            Err(e) => {
                warn!("decode failed mid-playback: {}", e);
                shared.mark_eof();
                break;
            }
        }
    }
    stream.close();
}

/// Push samples into the ring, waiting out a full buffer.
/// Returns false if the session was stopped while waiting.
fn push_all(producer: &mut HeapProd<f32>, samples: &[f32], shared: &SessionShared) -> bool {
    for &sample in samples {
        loop {
            if shared.is_stopped() {
                return false;
            }
            if producer.try_push(sample).is_ok() {
                break;
            }
            // Ring full: the mixer will drain it shortly
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    true
}

/// Upmix interleaved samples to stereo; extra channels keep the first two.
fn to_stereo(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks(n as usize)
            .filter(|frame| frame.len() >= 2)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

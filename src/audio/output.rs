// Audio output using cpal
// One shared sink per board; mixes every active playback session

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer},
    HeapCons,
};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Fixed output sample rate shared by all playback sessions.
pub const OUTPUT_SAMPLE_RATE: u32 = 44100;
/// The sink is always stereo; mono sources are upmixed before submission.
pub const OUTPUT_CHANNELS: u16 = 2;
/// ~100ms of output buffering.
const OUTPUT_BUFFER_FRAMES: u32 = 4410;
/// Headless pump cadence.
const HEADLESS_TICK: Duration = Duration::from_millis(10);

/// Control and accounting state shared between a session's feeder thread,
/// the mixer callback, and the pad that owns the session.
pub(crate) struct SessionShared {
    paused: AtomicBool,
    stopped: AtomicBool,
    /// Feeder pushed the final sample; the session ends when the ring drains
    eof: AtomicBool,
    /// Output-rate frames actually consumed by the mixer
    frames_played: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::SeqCst)
    }
}

/// One playing stream as seen by the mixer: a ring of device-rate stereo
/// samples plus the shared control flags and a completion signal.
pub(crate) struct SessionSource {
    pub(crate) consumer: HeapCons<f32>,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) done: Option<oneshot::Sender<()>>,
}

impl SessionSource {
    /// Mix this source into `buf`, returning false once it should be removed.
    fn mix_into(&mut self, buf: &mut [f32]) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        if self.shared.is_paused() {
            // Paused sessions consume nothing; production upstream halts
            // against the full ring
            return true;
        }

        let mut popped = 0usize;
        for slot in buf.iter_mut() {
            match self.consumer.try_pop() {
                Some(sample) => {
                    *slot += sample;
                    popped += 1;
                }
                None => break,
            }
        }
        self.shared
            .frames_played
            .fetch_add((popped / OUTPUT_CHANNELS as usize) as u64, Ordering::SeqCst);

        if self.consumer.is_empty() && self.eof() {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
            return false;
        }
        true
    }

    fn eof(&self) -> bool {
        self.shared.eof.load(Ordering::SeqCst)
    }
}

/// Sums all live sources; runs inside the audio callback.
pub(crate) struct Mixer {
    slots: Mutex<Vec<SessionSource>>,
}

impl Mixer {
    fn new() -> Self {
        Self { slots: Mutex::new(Vec::new()) }
    }

    fn mix_into(&self, buf: &mut [f32]) {
        buf.fill(0.0);
        let mut slots = self.slots.lock();
        slots.retain_mut(|source| source.mix_into(buf));
    }
}

/// The single shared output device.
///
/// Initialized once per board with a fixed rate and buffer; the underlying
/// cpal stream is intentionally leaked so it keeps producing for the process
/// lifetime (dropping it would stop the device for every pad).
pub struct AudioOutput {
    mixer: Arc<Mixer>,
}

impl AudioOutput {
    /// Open the default output device at the fixed rate.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Output("no output device available".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Output(format!("failed to get default output config: {}", e)))?;
        let sample_format = supported.sample_format();

        let mut config = StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate: SampleRate(OUTPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(OUTPUT_BUFFER_FRAMES),
        };

        let mixer = Arc::new(Mixer::new());

        let stream = match Self::build_stream(&device, &config, sample_format, mixer.clone()) {
            Ok(stream) => stream,
            Err(first) => {
                // Some backends refuse fixed buffer sizes
                warn!("fixed output buffer rejected ({}), retrying with device default", first);
                config.buffer_size = cpal::BufferSize::Default;
                Self::build_stream(&device, &config, sample_format, mixer.clone())?
            }
        };

        stream
            .play()
            .map_err(|e| Error::Output(format!("failed to start stream: {}", e)))?;

        // The stream must outlive this struct; see the type-level comment
        std::mem::forget(stream);

        debug!(
            sample_rate = OUTPUT_SAMPLE_RATE,
            buffer_frames = OUTPUT_BUFFER_FRAMES,
            "audio output running"
        );

        Ok(Self { mixer })
    }

    /// An output with no audio device: a plain thread pumps the mixer at the
    /// device cadence. For tests and machines without audio hardware.
    pub fn headless() -> Self {
        let mixer = Arc::new(Mixer::new());
        let weak: Weak<Mixer> = Arc::downgrade(&mixer);

        std::thread::Builder::new()
            .name("soundboard-headless-out".to_string())
            .spawn(move || {
                let frames = (OUTPUT_SAMPLE_RATE as u64 * HEADLESS_TICK.as_millis() as u64 / 1000)
                    as usize;
                let mut buf = vec![0.0f32; frames * OUTPUT_CHANNELS as usize];
                while let Some(mixer) = weak.upgrade() {
                    mixer.mix_into(&mut buf);
                    drop(mixer);
                    std::thread::sleep(HEADLESS_TICK);
                }
            })
            .expect("failed to spawn headless output thread");

        Self { mixer }
    }

    fn build_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: cpal::SampleFormat,
        mixer: Arc<Mixer>,
    ) -> Result<cpal::Stream> {
        match sample_format {
            cpal::SampleFormat::F32 => Self::build_stream_for::<f32>(device, config, mixer),
            cpal::SampleFormat::I16 => Self::build_stream_for::<i16>(device, config, mixer),
            cpal::SampleFormat::U16 => Self::build_stream_for::<u16>(device, config, mixer),
            format => Err(Error::Output(format!("unsupported sample format: {:?}", format))),
        }
    }

    fn build_stream_for<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        mixer: Arc<Mixer>,
    ) -> Result<cpal::Stream> {
        let mut scratch: Vec<f32> = Vec::new();
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    mixer.mix_into(&mut scratch);
                    for (out, mixed) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*mixed);
                    }
                },
                move |err| {
                    error!("audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::Output(format!("failed to build output stream: {}", e)))?;
        Ok(stream)
    }

    /// Register a session source; it plays (mixed with the others) until it
    /// stops, or drains after end of stream and fires its completion signal.
    pub(crate) fn submit(&self, source: SessionSource) {
        self.mixer.slots.lock().push(source);
    }

    pub fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    pub fn channels(&self) -> u16 {
        OUTPUT_CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::{
        traits::{Producer, Split},
        HeapRb,
    };

    fn source_with_samples(samples: &[f32]) -> (SessionSource, Arc<SessionShared>, oneshot::Receiver<()>) {
        let rb = HeapRb::<f32>::new(samples.len().max(1));
        let (mut prod, cons) = rb.split();
        for &s in samples {
            prod.try_push(s).unwrap();
        }
        let shared = Arc::new(SessionShared::new());
        let (tx, rx) = oneshot::channel();
        let source = SessionSource { consumer: cons, shared: shared.clone(), done: Some(tx) };
        (source, shared, rx)
    }

    #[test]
    fn mixer_sums_concurrent_sources() {
        let mixer = Mixer::new();
        let (a, _, _rx_a) = source_with_samples(&[0.25; 4]);
        let (b, _, _rx_b) = source_with_samples(&[0.5; 4]);
        mixer.slots.lock().push(a);
        mixer.slots.lock().push(b);

        let mut buf = [1.0f32; 4];
        mixer.mix_into(&mut buf);
        assert_eq!(buf, [0.75; 4]);
    }

    #[test]
    fn paused_source_consumes_nothing() {
        let mixer = Mixer::new();
        let (source, shared, _rx) = source_with_samples(&[0.5; 4]);
        shared.set_paused(true);
        mixer.slots.lock().push(source);

        let mut buf = [0.0f32; 4];
        mixer.mix_into(&mut buf);
        assert_eq!(buf, [0.0; 4]);
        assert_eq!(shared.frames_played(), 0);

        shared.set_paused(false);
        mixer.mix_into(&mut buf);
        assert_eq!(buf, [0.5; 4]);
        assert_eq!(shared.frames_played(), 2);
    }

    #[test]
    fn drained_source_fires_completion_once_removed() {
        let mixer = Mixer::new();
        let (source, shared, mut rx) = source_with_samples(&[0.1, 0.2]);
        shared.mark_eof();
        mixer.slots.lock().push(source);

        let mut buf = [0.0f32; 4];
        mixer.mix_into(&mut buf);
        assert!(rx.try_recv().is_ok());
        assert!(mixer.slots.lock().is_empty());
    }

    #[test]
    fn stopped_source_is_dropped_without_completion() {
        let mixer = Mixer::new();
        let (source, shared, mut rx) = source_with_samples(&[0.1; 8]);
        mixer.slots.lock().push(source);
        shared.stop();

        let mut buf = [0.0f32; 4];
        mixer.mix_into(&mut buf);
        assert!(mixer.slots.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }
}

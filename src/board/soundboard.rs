// The board: pad registry and the operations the presentation layer calls
// All pad actions serialize behind the registry lock

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::pad::{Color, Pad, PadId, PadInfo, PadState};
use super::progress::{self, format_timestamp};
use crate::audio::{transcode, AudioDecoder, AudioOutput, PlaybackEngine};
use crate::error::{Error, Result};
use crate::events::{BoardEvent, EventBus};
use crate::storage::saved_pads::{self, SavedPad};

/// Extensions accepted by `add`.
const ACCEPTED_EXTENSIONS: [&str; 4] = ["mp3", "wav", "m4a", "ogg"];

/// The soundboard core.
///
/// Owns the pad registry, the shared audio output, and a small runtime for
/// the progress reporters and completion waiters. The presentation layer
/// calls the operations below and renders the events from [`subscribe`].
///
/// [`subscribe`]: Soundboard::subscribe
pub struct Soundboard {
    inner: Arc<BoardInner>,
    _runtime: tokio::runtime::Runtime,
}

pub(crate) struct BoardInner {
    pads: Mutex<PadTable>,
    next_id: AtomicU64,
    output: AudioOutput,
    events: EventBus,
    storage_dir: PathBuf,
    handle: tokio::runtime::Handle,
}

/// Registry keyed by pad id, preserving board order for display and saving.
struct PadTable {
    map: HashMap<PadId, Pad>,
    order: Vec<PadId>,
}

impl PadTable {
    fn new() -> Self {
        Self { map: HashMap::new(), order: Vec::new() }
    }

    fn insert(&mut self, pad: Pad) {
        self.order.push(pad.id);
        self.map.insert(pad.id, pad);
    }

    fn remove(&mut self, id: PadId) -> Option<Pad> {
        self.order.retain(|other| *other != id);
        self.map.remove(&id)
    }

    fn get(&self, id: PadId) -> Option<&Pad> {
        self.map.get(&id)
    }

    fn get_mut(&mut self, id: PadId) -> Option<&mut Pad> {
        self.map.get_mut(&id)
    }

    fn infos(&self) -> Vec<PadInfo> {
        self.order
            .iter()
            .filter_map(|id| self.map.get(id))
            .map(Pad::info)
            .collect()
    }

    fn records(&self) -> Vec<SavedPad> {
        self.order
            .iter()
            .filter_map(|id| self.map.get(id))
            .map(|pad| SavedPad {
                file_path: pad.path.to_string_lossy().into_owned(),
                color: pad.color.to_hex(),
            })
            .collect()
    }
}

impl Soundboard {
    /// Open the default audio device and reload the saved pad list.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_output(AudioOutput::new()?, storage_dir)
    }

    /// Same as [`Soundboard::new`] but with a caller-provided output, e.g.
    /// [`AudioOutput::headless`] on machines without audio hardware.
    pub fn with_output(output: AudioOutput, storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("soundboard-worker")
            .enable_all()
            .build()?;

        let inner = Arc::new(BoardInner {
            pads: Mutex::new(PadTable::new()),
            next_id: AtomicU64::new(1),
            output,
            events: EventBus::new(),
            storage_dir: storage_dir.into(),
            handle: runtime.handle().clone(),
        });

        load_saved(&inner);

        Ok(Self { inner, _runtime: runtime })
    }

    /// Add a pad for an audio file.
    ///
    /// The file is decoded once to verify it and capture its format, then the
    /// stream is discarded; playback always decodes fresh. Errors distinguish
    /// a missing transcoder from a corrupt file so the presentation layer can
    /// tell the user to install the tool rather than blame the file.
    pub fn add(&self, path: impl Into<PathBuf>) -> Result<PadId> {
        let path: PathBuf = path.into();
        let ext = extension_of(&path);

        if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::UnsupportedFormat(format!(".{}", ext)));
        }
        if ext == "m4a" && transcode::find_transcoder().is_none() {
            return Err(Error::MissingExternalTool(transcode::TRANSCODER.to_string()));
        }

        let mut stream = AudioDecoder::open(&path)?;
        let format = stream.format();
        stream.close();

        let id = PadId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let pad = Pad::new(id, path, Color::WHITE, format);
        let pad_info = pad.info();
        info!(%id, path = %pad_info.path.display(), "pad added");

        self.inner.pads.lock().insert(pad);
        self.inner.save_snapshot();
        self.inner.events.emit(BoardEvent::PadAdded { pad: pad_info });
        Ok(id)
    }

    /// The single user-facing control: Stopped plays, Playing pauses,
    /// Paused resumes.
    pub fn toggle(&self, id: PadId) -> Result<()> {
        let inner = &self.inner;
        let mut pads = inner.pads.lock();
        let pad = pads.get_mut(id).ok_or(Error::PadNotFound(id))?;
        match pad.state {
            PadState::Stopped => start_playback(inner, pad, 0),
            PadState::Playing => {
                pause_pad(inner, pad);
                Ok(())
            }
            PadState::Paused => resume_pad(inner, pad),
        }
    }

    /// Stop playback and clear all progress. No-op on a stopped pad.
    pub fn stop(&self, id: PadId) -> Result<()> {
        let mut pads = self.inner.pads.lock();
        let pad = pads.get_mut(id).ok_or(Error::PadNotFound(id))?;
        stop_pad(&self.inner, pad);
        Ok(())
    }

    /// Stop and reset the progress display to zero. Does not replay; the
    /// user presses Play again.
    pub fn restart(&self, id: PadId) -> Result<()> {
        let mut pads = self.inner.pads.lock();
        let pad = pads.get_mut(id).ok_or(Error::PadNotFound(id))?;
        if pad.state != PadState::Stopped {
            stop_pad(&self.inner, pad);
        } else {
            // Already stopped: just clear a pinned completion display
            pad.paused_frame = 0;
            pad.accumulated = Duration::ZERO;
            self.inner.emit_progress_reset(pad);
        }
        Ok(())
    }

    /// Remove a pad, stopping it first. Confirmation is the presentation
    /// layer's job.
    pub fn remove(&self, id: PadId) -> Result<()> {
        {
            let mut pads = self.inner.pads.lock();
            let pad = pads.get_mut(id).ok_or(Error::PadNotFound(id))?;
            stop_pad(&self.inner, pad);
            pads.remove(id);
        }
        info!(%id, "pad removed");
        self.inner.save_snapshot();
        self.inner.events.emit(BoardEvent::PadRemoved { id });
        Ok(())
    }

    pub fn set_color(&self, id: PadId, color: Color) -> Result<()> {
        {
            let mut pads = self.inner.pads.lock();
            let pad = pads.get_mut(id).ok_or(Error::PadNotFound(id))?;
            pad.color = color;
        }
        self.inner.save_snapshot();
        self.inner.events.emit(BoardEvent::ColorChanged { id, color });
        Ok(())
    }

    /// Snapshot of every pad in board order.
    pub fn pads(&self) -> Vec<PadInfo> {
        self.inner.pads.lock().infos()
    }

    /// Snapshot of one pad.
    pub fn pad(&self, id: PadId) -> Option<PadInfo> {
        self.inner.pads.lock().get(id).map(Pad::info)
    }

    /// Subscribe to progress and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for Soundboard {
    fn drop(&mut self) {
        let mut pads = self.inner.pads.lock();
        for id in pads.order.clone() {
            if let Some(pad) = pads.get_mut(id) {
                pad.fire_reporter_stop();
                if let Some(session) = pad.session.take() {
                    session.stop();
                }
            }
        }
    }
}

impl BoardInner {
    /// One reporter tick: publish progress for `id`. Returns false once the
    /// pad is gone and the reporter should exit.
    pub(crate) fn publish_progress_tick(&self, id: PadId) -> bool {
        let (fraction, elapsed, total) = {
            let pads = self.pads.lock();
            let pad = match pads.get(id) {
                Some(pad) => pad,
                None => return false,
            };
            if pad.state != PadState::Playing || pad.total.is_zero() {
                return true;
            }
            (pad.progress(), pad.elapsed(), pad.total)
        };
        self.events.emit(BoardEvent::Progress {
            id,
            fraction,
            elapsed: format_timestamp(elapsed),
            total: format_timestamp(total),
        });
        true
    }

    /// A session's decoder ran out of frames and its buffer drained.
    /// Behaves like Stop, except progress is pinned at 100% until the next
    /// interaction resets it.
    pub(crate) fn handle_completion(&self, id: PadId, generation: u64) {
        let mut pads = self.pads.lock();
        let pad = match pads.get_mut(id) {
            Some(pad) => pad,
            None => return,
        };
        if pad.generation != generation {
            // A newer session replaced this one; its signal is stale
            return;
        }
        debug!(%id, "playback completed");
        pad.fire_reporter_stop();
        pad.session = None;
        pad.state = PadState::Stopped;
        pad.paused_frame = 0;
        pad.started_at = None;
        pad.accumulated = pad.total;

        let total = format_timestamp(pad.total);
        self.events.emit(BoardEvent::Progress {
            id,
            fraction: 1.0,
            elapsed: total.clone(),
            total,
        });
        self.events.emit(BoardEvent::StateChanged { id, state: PadState::Stopped });
    }

    fn emit_progress_reset(&self, pad: &Pad) {
        self.events.emit(BoardEvent::Progress {
            id: pad.id,
            fraction: 0.0,
            elapsed: format_timestamp(Duration::ZERO),
            total: format_timestamp(pad.total),
        });
    }

    /// Fire-and-forget snapshot of the current pad list. Never called with
    /// the registry lock held.
    fn save_snapshot(&self) {
        let records = self.pads.lock().records();
        if let Err(e) = saved_pads::save(&self.storage_dir, &records) {
            warn!("failed to persist pad list: {}", e);
        }
    }
}

/// Start a fresh session for `pad` at `start_frame` source frames.
fn start_playback(inner: &Arc<BoardInner>, pad: &mut Pad, start_frame: u64) -> Result<()> {
    // A lingering session would double-play; stop it first
    if pad.session.is_some() {
        stop_pad(inner, pad);
    }

    let stream = AudioDecoder::open(&pad.path)?;
    let mut session = PlaybackEngine::start(stream, start_frame, &inner.output)?;
    let generation = pad.bump_generation();
    let done_rx = session.take_done();

    pad.session = Some(session);
    pad.paused_frame = start_frame;
    pad.started_at = Some(Instant::now());
    // On a cold resume the earlier segments' time is reconstructed from the
    // frame offset so the displayed elapsed stays continuous
    pad.accumulated = if start_frame > 0 {
        Duration::from_secs_f64(start_frame as f64 / pad.format.effective_sample_rate() as f64)
    } else {
        Duration::ZERO
    };
    pad.state = PadState::Playing;

    if let Some(done_rx) = done_rx {
        let waiter = Arc::clone(inner);
        let id = pad.id;
        inner.handle.spawn(async move {
            if done_rx.await.is_ok() {
                waiter.handle_completion(id, generation);
            }
        });
    }

    start_reporter(inner, pad);
    inner.events.emit(BoardEvent::StateChanged { id: pad.id, state: PadState::Playing });
    Ok(())
}

fn pause_pad(inner: &Arc<BoardInner>, pad: &mut Pad) {
    if let Some(session) = pad.session.as_ref() {
        session.set_paused(true);
        // Captured under the registry lock, so a concurrent resume cannot
        // read it before it lands
        pad.paused_frame = session.position_frames();
    }
    if let Some(started) = pad.started_at.take() {
        pad.accumulated += started.elapsed();
    }
    pad.fire_reporter_stop();
    pad.state = PadState::Paused;
    inner.events.emit(BoardEvent::StateChanged { id: pad.id, state: PadState::Paused });
}

fn resume_pad(inner: &Arc<BoardInner>, pad: &mut Pad) -> Result<()> {
    match pad.session.as_ref() {
        Some(session) => {
            pad.started_at = Some(Instant::now());
            session.set_paused(false);
            pad.state = PadState::Playing;
            start_reporter(inner, pad);
            inner.events.emit(BoardEvent::StateChanged { id: pad.id, state: PadState::Playing });
            Ok(())
        }
        // Session was torn down while paused: rebuild at the saved frame
        None => start_playback(inner, pad, pad.paused_frame),
    }
}

fn stop_pad(inner: &BoardInner, pad: &mut Pad) {
    if pad.state == PadState::Stopped {
        return;
    }
    pad.fire_reporter_stop();
    if let Some(session) = pad.session.take() {
        session.stop();
    }
    // A completion that raced this stop must not resurrect the display
    pad.bump_generation();
    pad.paused_frame = 0;
    pad.accumulated = Duration::ZERO;
    pad.started_at = None;
    pad.state = PadState::Stopped;

    inner.emit_progress_reset(pad);
    inner.events.emit(BoardEvent::StateChanged { id: pad.id, state: PadState::Stopped });
}

/// Replace the pad's reporter: fire the old stop signal, spawn a new task.
fn start_reporter(inner: &Arc<BoardInner>, pad: &mut Pad) {
    pad.fire_reporter_stop();
    let (stop_tx, stop_rx) = oneshot::channel();
    pad.reporter_stop = Some(stop_tx);
    inner.handle.spawn(progress::run(Arc::clone(inner), pad.id, stop_rx));
}

/// Reload pads from the saved snapshot, silently skipping anything that can
/// no longer be decoded: a soundboard should not fail to launch because one
/// clip disappeared or a tool is missing.
fn load_saved(inner: &Arc<BoardInner>) {
    let records = match saved_pads::load(&inner.storage_dir) {
        Ok(records) => records,
        Err(e) => {
            warn!("ignoring saved pads: {}", e);
            return;
        }
    };

    let mut loaded = 0usize;
    for record in records {
        let path = PathBuf::from(&record.file_path);
        if !path.is_file() {
            debug!(path = %path.display(), "saved pad skipped: file missing");
            continue;
        }
        let ext = extension_of(&path);
        if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if ext == "m4a" && transcode::find_transcoder().is_none() {
            debug!(path = %path.display(), "saved pad skipped: transcoder missing");
            continue;
        }
        let mut stream = match AudioDecoder::open(&path) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(path = %path.display(), "saved pad skipped: {}", e);
                continue;
            }
        };
        let format = stream.format();
        stream.close();

        let id = PadId(inner.next_id.fetch_add(1, Ordering::SeqCst));
        let color = Color::from_hex_or_white(&record.color);
        inner.pads.lock().insert(Pad::new(id, path, color, format));
        loaded += 1;
    }

    if loaded > 0 {
        info!(count = loaded, "restored saved pads");
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

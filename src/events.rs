// Event bus for the presentation layer
// Lossy broadcast: a slow subscriber drops old values, never blocks the core

use tokio::sync::broadcast;

use crate::board::{Color, PadId, PadInfo, PadState};

/// Subscribers more than this far behind start losing the oldest events.
const EVENT_CAPACITY: usize = 64;

/// Push notifications consumed by the presentation layer for redraw.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    PadAdded {
        pad: PadInfo,
    },
    PadRemoved {
        id: PadId,
    },
    StateChanged {
        id: PadId,
        state: PadState,
    },
    ColorChanged {
        id: PadId,
        color: Color,
    },
    /// Periodic while a pad plays; also used to reset (0.0) and to pin
    /// completion (1.0). Labels are preformatted `M:SS.mmm` strings.
    Progress {
        id: PadId,
        fraction: f64,
        elapsed: String,
        total: String,
    },
}

pub(crate) struct EventBus {
    tx: broadcast::Sender<BoardEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.tx.subscribe()
    }

    /// Non-blocking, best-effort send; having no subscribers is fine.
    pub(crate) fn emit(&self, event: BoardEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.emit(BoardEvent::PadRemoved { id: PadId(7) });
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(BoardEvent::PadRemoved { id: PadId(1) });
        bus.emit(BoardEvent::PadRemoved { id: PadId(2) });

        match rx.try_recv().unwrap() {
            BoardEvent::PadRemoved { id } => assert_eq!(id, PadId(1)),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            BoardEvent::PadRemoved { id } => assert_eq!(id, PadId(2)),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

// Best-effort notifications and UI signals

use crate::models::Phase;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

const SIGNAL_CAPACITY: usize = 16;

/// Presents a user-facing notification. Fire-and-forget.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str);
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title, message, "Notification");
    }
}

/// Message to whichever UI surfaces happen to be listening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiSignal {
    PhaseChanged { phase: Phase, duration_minutes: u32 },
    PlaySound,
}

/// Broadcast channel for [`UiSignal`]s
///
/// Sending needs no async runtime. A signal with no listener is dropped.
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<UiSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiSignal> {
        self.tx.subscribe()
    }

    /// Send to every current subscriber. Returns how many there were.
    pub fn emit(&self, signal: UiSignal) -> usize {
        match self.tx.send(signal) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(?signal, "No UI listener, dropping signal");
                0
            }
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use std::cell::RefCell;

    /// Keeps every notification for inspection
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: RefCell<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn titles(&self) -> Vec<String> {
            self.sent.borrow().iter().map(|(title, _)| title.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) {
            self.sent.borrow_mut().push((title.to_string(), message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_listener_is_not_an_error() {
        let bus = SignalBus::new();
        assert_eq!(bus.emit(UiSignal::PlaySound), 0);
    }

    #[test]
    fn test_subscribers_receive_signals_in_order() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe();

        let changed = UiSignal::PhaseChanged {
            phase: Phase::Break,
            duration_minutes: 5,
        };
        assert_eq!(bus.emit(changed), 1);
        assert_eq!(bus.emit(UiSignal::PlaySound), 1);

        assert_eq!(rx.try_recv().unwrap(), changed);
        assert_eq!(rx.try_recv().unwrap(), UiSignal::PlaySound);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_string(&UiSignal::PhaseChanged {
            phase: Phase::Work,
            duration_minutes: 25,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"phase_changed","phase":"work","duration_minutes":25}"#);
        assert_eq!(
            serde_json::to_string(&UiSignal::PlaySound).unwrap(),
            r#"{"type":"play_sound"}"#
        );
    }
}

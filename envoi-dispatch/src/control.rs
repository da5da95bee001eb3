//! Cooperative pause, resume and cancel.
//!
//! Signals are observed at unit boundaries only: a send that is in flight
//! always runs to completion, retries included.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Handle used by the presentation layer to steer a running session.
///
/// Clones control the same dispatcher.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: watch::Sender<ControlSignal>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlSignal::Run);
        Self { tx }
    }

    /// Workers finish their current unit, then idle
    pub fn pause(&self) {
        self.tx.send_if_modified(|signal| {
            if *signal == ControlSignal::Run {
                *signal = ControlSignal::Pause;
                true
            } else {
                false
            }
        });
    }

    /// Idle workers start drawing units again
    pub fn resume(&self) {
        self.tx.send_if_modified(|signal| {
            if *signal == ControlSignal::Pause {
                *signal = ControlSignal::Run;
                true
            } else {
                false
            }
        });
    }

    /// In-flight units drain, everything still pending is marked not attempted
    pub fn cancel(&self) {
        self.tx.send_replace(ControlSignal::Cancel);
    }

    /// Clear a cancel left over from a previous run
    pub(crate) fn rearm(&self) {
        self.tx.send_if_modified(|signal| {
            if *signal == ControlSignal::Cancel {
                *signal = ControlSignal::Run;
                true
            } else {
                false
            }
        });
    }

    #[must_use]
    pub fn signal(&self) -> ControlSignal {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ControlSignal> {
        self.tx.subscribe()
    }
}

/// Wait out a pause. Returns [`ControlSignal::Run`] or [`ControlSignal::Cancel`].
pub(crate) async fn wait_until_runnable(rx: &mut watch::Receiver<ControlSignal>) -> ControlSignal {
    match rx.wait_for(|signal| *signal != ControlSignal::Pause).await {
        Ok(signal) => *signal,
        Err(_) => ControlSignal::Cancel,
    }
}

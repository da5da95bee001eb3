use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use envoi_common::SendUnit;

/// The units of one batch still waiting for a worker.
///
/// Workers draw from the front until it is empty or the batch is halted.
#[derive(Debug)]
pub(crate) struct BatchQueue {
    units: parking_lot::Mutex<VecDeque<(usize, SendUnit)>>,
    halted: AtomicBool,
}

impl BatchQueue {
    pub(crate) fn new(units: impl IntoIterator<Item = (usize, SendUnit)>) -> Self {
        Self {
            units: parking_lot::Mutex::new(units.into_iter().collect()),
            halted: AtomicBool::new(false),
        }
    }

    /// The next unit and its index in the session, unless halted
    pub(crate) fn next(&self) -> Option<(usize, SendUnit)> {
        if self.halted.load(Ordering::Acquire) {
            return None;
        }
        self.units.lock().pop_front()
    }

    /// Stop handing out units; those already drawn still finish
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.units.lock().len()
    }
}

/// How a batch ended
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    /// Every unit reached a final status
    Completed,
    /// Workers stopped drawing because of a cancel
    Cancelled,
}

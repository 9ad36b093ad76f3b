//! Human-in-the-loop suspension: the confirmation gate and the step wait.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::overlay::Overlay;
use crate::page::Page;

/// A single resumable wait.
///
/// [`suspend`](Self::suspend) installs a fresh waiter, dropping any earlier
/// one (its receiver then reports closed). [`resume`](Self::resume) wakes the
/// installed waiter exactly once; with nothing installed it does nothing and
/// the signal is not queued.
pub struct SuspendPoint<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Default for SuspendPoint<T> {
    fn default() -> Self {
        Self { slot: Mutex::new(None) }
    }
}

impl<T> SuspendPoint<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn resume(&self, value: T) -> bool {
        let pending = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match pending {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Forget the installed waiter without waking it.
    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Asks a human to approve a risky action.
pub struct ConfirmationGate<'a> {
    answers: &'a SuspendPoint<bool>,
    stop: &'a CancellationToken,
    poll: Duration,
}

impl<'a> ConfirmationGate<'a> {
    pub fn new(answers: &'a SuspendPoint<bool>, stop: &'a CancellationToken, poll: Duration) -> Self {
        Self { answers, stop, poll }
    }

    /// Show the modal and wait for an answer from either the page's buttons or
    /// an external confirm signal. Cancel, replacement by a newer prompt, and
    /// a stop request all count as a decline.
    pub async fn confirm<P: Page + ?Sized>(&self, overlay: &Overlay<P>, message: &str) -> bool {
        let mut answer_rx = self.answers.suspend();
        overlay.show_modal(message).await;

        let mut ticker = tokio::time::interval(self.poll);
        let approved = loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break false,
                answer = &mut answer_rx => break answer.unwrap_or(false),
                _ = ticker.tick() => {
                    if let Some(answer) = overlay.take_modal_answer().await {
                        break answer;
                    }
                }
            }
        };

        self.answers.clear();
        overlay.dismiss_modal().await;
        approved
    }
}

/// Block until a step-continue signal arrives or the run is stopped.
/// Returns `false` when woken by the stop.
pub async fn wait_for_step(step: &SuspendPoint<()>, stop: &CancellationToken) -> bool {
    let rx = step.suspend();
    let resumed = tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        signal = rx => signal.is_ok(),
    };
    step.clear();
    resumed
}

//! Single-slot deferred resume timer.
//!
//! At most one resume is armed at a time. Arming replaces (and cancels)
//! the previous timer. When a timer fires it sends its `resume_at` on the
//! channel handed to [`ResumeTimer::new`]; the governor's loop reacts.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Diagnostics for the armed resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedResume {
    /// Wall-clock time the resume targets.
    pub resume_at: DateTime<Utc>,
    /// Delay the timer was armed with.
    pub delay: Duration,
}

struct ArmedTimer {
    info: ArmedResume,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Holds the one pending deferred resume.
pub struct ResumeTimer {
    fire_tx: mpsc::Sender<DateTime<Utc>>,
    parent: CancellationToken,
    slot: Mutex<Option<ArmedTimer>>,
}

impl ResumeTimer {
    /// Create a timer that reports firings on `fire_tx`. Timers are child
    /// tokens of `parent`, so shutdown cancels them.
    #[must_use]
    pub fn new(fire_tx: mpsc::Sender<DateTime<Utc>>, parent: CancellationToken) -> Self {
        Self {
            fire_tx,
            parent,
            slot: Mutex::new(None),
        }
    }

    /// Arm a resume for `resume_at`, firing after `delay`. Any previously
    /// armed resume is cancelled.
    pub fn arm(&self, resume_at: DateTime<Utc>, delay: Duration) {
        let cancel = self.parent.child_token();
        let task_cancel = cancel.clone();
        let fire_tx = self.fire_tx.clone();

        let handle = tokio::spawn(
            async move {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("resume timer cancelled");
                    }
                    () = tokio::time::sleep(delay) => {
                        debug!("resume timer fired");
                        let _ = fire_tx.send(resume_at).await;
                    }
                }
            }
            .instrument(info_span!("resume_timer", %resume_at, delay_secs = delay.as_secs())),
        );

        let previous = self.lock().replace(ArmedTimer {
            info: ArmedResume { resume_at, delay },
            cancel,
            handle,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Cancel the armed resume, if any.
    pub fn disarm(&self) {
        if let Some(previous) = self.lock().take() {
            previous.cancel.cancel();
        }
    }

    /// The resume still pending, if any.
    #[must_use]
    pub fn armed(&self) -> Option<ArmedResume> {
        self.lock()
            .as_ref()
            .filter(|timer| !timer.handle.is_finished() && !timer.cancel.is_cancelled())
            .map(|timer| timer.info)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ArmedTimer>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ResumeTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

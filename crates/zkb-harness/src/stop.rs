//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Stop controller and the cancellation signal handed to workers."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};
use zkb_common::StopPolicy;

/// Read side of the stop signal. Cloned into every worker.
///
/// The signal is set when the controller triggers it or, under
/// [`StopPolicy::Deadline`], once the deadline has passed. It never resets.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    /// Whether workers must stop starting new work.
    pub fn is_set(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Deadline checked by the clock, if the policy uses one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Owns the stop signal for one run.
///
/// Clones share the same signal, so a clone can be moved into a Ctrl-C
/// handler while the runner keeps its own copy.
#[derive(Debug, Clone)]
pub struct StopController {
    tx: Arc<watch::Sender<bool>>,
    policy: StopPolicy,
    duration: Duration,
}

impl StopController {
    /// Controller for a run of `duration` under `policy`.
    pub fn new(policy: StopPolicy, duration: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            policy,
            duration,
        }
    }

    /// Signal for workers of a run that started at `started`.
    pub fn arm(&self, started: Instant) -> StopSignal {
        let deadline = match self.policy {
            StopPolicy::Deadline => Some(started + self.duration),
            StopPolicy::Broadcast => None,
        };
        StopSignal {
            rx: self.tx.subscribe(),
            deadline,
        }
    }

    /// Set the signal. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Whether the signal has been set explicitly.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait out the measurement window.
    ///
    /// Under [`StopPolicy::Broadcast`] this sleeps for the run duration and
    /// then sets the signal, unless it was triggered earlier. Under
    /// [`StopPolicy::Deadline`] workers watch the clock themselves and this
    /// returns immediately.
    pub async fn run_window(&self) {
        if self.policy != StopPolicy::Broadcast {
            return;
        }
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {
                if self.trigger() {
                    info!(
                        duration_ms = self.duration.as_millis() as u64,
                        "run window elapsed; stop broadcast"
                    );
                }
            }
            _ = rx.wait_for(|stopped| *stopped) => {
                debug!("stop triggered before run window elapsed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_sets_once_and_never_resets() {
        let controller = StopController::new(StopPolicy::Broadcast, Duration::from_secs(60));
        let signal = controller.arm(Instant::now());
        assert!(!signal.is_set());
        assert!(controller.trigger());
        assert!(!controller.trigger());
        assert!(signal.is_set());
        assert!(controller.is_triggered());
    }

    #[test]
    fn clones_share_the_signal() {
        let controller = StopController::new(StopPolicy::Deadline, Duration::from_secs(60));
        let signal = controller.arm(Instant::now());
        let handle = controller.clone();
        handle.trigger();
        assert!(signal.is_set());
        assert!(signal.clone().is_set());
    }

    #[test]
    fn deadline_signal_follows_the_clock() {
        let controller = StopController::new(StopPolicy::Deadline, Duration::from_millis(20));
        let signal = controller.arm(Instant::now());
        assert!(!signal.is_set());
        assert!(signal.deadline().is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(signal.is_set());
        assert!(!controller.is_triggered());
    }

    #[test]
    fn broadcast_signal_has_no_deadline() {
        let controller = StopController::new(StopPolicy::Broadcast, Duration::from_millis(1));
        let signal = controller.arm(Instant::now());
        std::thread::sleep(Duration::from_millis(10));
        assert!(signal.deadline().is_none());
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn broadcast_window_sets_signal_after_duration() {
        let controller = StopController::new(StopPolicy::Broadcast, Duration::from_millis(50));
        let signal = controller.arm(Instant::now());
        let started = Instant::now();
        controller.run_window().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn broadcast_window_ends_early_on_explicit_trigger() {
        let controller = StopController::new(StopPolicy::Broadcast, Duration::from_secs(30));
        let handle = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.trigger();
        });
        let started = Instant::now();
        controller.run_window().await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(controller.is_triggered());
    }

    #[tokio::test]
    async fn deadline_window_returns_immediately() {
        let controller = StopController::new(StopPolicy::Deadline, Duration::from_secs(30));
        let started = Instant::now();
        controller.run_window().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!controller.is_triggered());
    }
}

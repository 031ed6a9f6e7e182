//! Periodic background task driving incremental mesh updates.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

/// Runs a task on its own thread at a fixed period until stopped or dropped.
pub struct MeshUpdateTimer {
    period: Duration,
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MeshUpdateTimer {
    /// Start a timer firing every `period_s` seconds.
    ///
    /// Returns `None` for non-positive or non-finite periods.
    pub fn start<F>(period_s: f64, task: F) -> Option<Self>
    where
        F: Fn() + Send + 'static,
    {
        if !(period_s.is_finite() && period_s > 0.0) {
            return None;
        }
        let period = Duration::from_secs_f64(period_s);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("mesh-update".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => task(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match handle {
            Ok(handle) => Some(Self {
                period,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Err(err) => {
                log::error!("Failed to spawn mesh update thread: {}", err);
                None
            }
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Signal the thread and wait for the current run to finish.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            // The task itself may drop the last owner of the timer.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for MeshUpdateTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_not_started_for_non_positive_period() {
        assert!(MeshUpdateTimer::start(0.0, || {}).is_none());
        assert!(MeshUpdateTimer::start(-1.0, || {}).is_none());
        assert!(MeshUpdateTimer::start(f64::NAN, || {}).is_none());
    }

    #[test]
    fn test_fires_until_stopped() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let mut timer = MeshUpdateTimer::start(0.01, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.is_running());

        thread::sleep(Duration::from_millis(150));
        timer.stop();
        let after_stop = fired.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        assert!(!timer.is_running());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), after_stop);
    }
}

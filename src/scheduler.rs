//! A cancellable fixed-rate frame scheduler, standing in for a display's
//! animation callback.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Paces a loop to a fixed frame interval until cancelled. Frames are
/// waited out with [spin_sleep] so the cadence stays tight even at 60Hz.
#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    last_frame: Option<Instant>,
}

/// Stops a [`FrameScheduler`] from another scope or thread. Cancelling is
/// sticky and may be done any number of times.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancels the scheduler this handle belongs to.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelHandle::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl FrameScheduler {
    /// A scheduler firing every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cancelled: Arc::new(AtomicBool::new(false)),
            last_frame: None,
        }
    }

    /// A scheduler firing `frame_rate` times per second.
    pub fn with_frame_rate(frame_rate: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / frame_rate.max(1.0)))
    }

    /// A handle that can cancel this scheduler.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Cancels the schedule. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the schedule has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The configured frame interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the next frame is due and returns the time since the
    /// previous one. The first frame fires immediately and reports one
    /// nominal interval. Returns `None` once cancelled.
    pub fn next_frame(&mut self) -> Option<Duration> {
        if self.is_cancelled() {
            return None;
        }

        let dt = match self.last_frame {
            None => self.interval,
            Some(last) => {
                let due = last + self.interval;
                let now = Instant::now();
                if due > now {
                    spin_sleep::sleep(due - now);
                }
                last.elapsed()
            }
        };

        self.last_frame = Some(Instant::now());
        if self.is_cancelled() {
            None
        } else {
            Some(dt)
        }
    }

    /// Calls `frame` once per frame with the elapsed time until cancelled.
    pub fn run<F: FnMut(Duration)>(&mut self, mut frame: F) {
        while let Some(dt) = self.next_frame() {
            frame(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_until_cancelled() {
        let mut scheduler = FrameScheduler::new(Duration::from_millis(1));
        let handle = scheduler.cancel_handle();
        let mut frames = 0;

        scheduler.run(|_dt| {
            frames += 1;
            if frames == 5 {
                handle.cancel();
            }
        });

        assert_eq!(frames, 5);
        assert!(scheduler.is_cancelled());
    }

    #[test]
    fn frames_are_paced() {
        let mut scheduler = FrameScheduler::new(Duration::from_millis(5));
        assert_eq!(scheduler.next_frame(), Some(Duration::from_millis(5)));
        let dt = scheduler.next_frame().unwrap();
        assert!(dt >= Duration::from_millis(5), "{dt:?}");
    }

    #[test]
    fn cancel_before_start_is_fine() {
        let mut scheduler = FrameScheduler::with_frame_rate(60.0);
        scheduler.cancel();
        scheduler.cancel();
        assert_eq!(scheduler.next_frame(), None);
        assert!(scheduler.cancel_handle().is_cancelled());
    }
}

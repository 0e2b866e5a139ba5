//! A fixed-depth ring of recent status lines that the guidance components
//! write to and any observer (the terminal monitor, tests) can read back.
//! Everything recorded here also goes out through the [log] facade.

use log::Level;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

/// A cheap, clonable handle to a shared ring of the most recent messages.
/// Old lines fall off the front once `depth` is reached.
#[derive(Debug, Clone)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    depth: usize,
}

impl LogRing {
    /// Instantiates an empty ring that keeps at most `depth` lines.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(depth))),
            depth,
        }
    }

    /// Emits `msg` at `level` and appends it to the ring.
    pub fn record(&self, level: Level, msg: impl Into<String>) {
        let msg = msg.into();
        log::log!(level, "{}", msg);

        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.depth {
            lines.pop_front();
        }
        lines.push_back(msg);
    }

    /// Shorthand for [`LogRing::record`] at [`Level::Info`].
    pub fn info(&self, msg: impl Into<String>) {
        self.record(Level::Info, msg);
    }

    /// Shorthand for [`LogRing::record`] at [`Level::Warn`].
    pub fn warn(&self, msg: impl Into<String>) {
        self.record(Level::Warn, msg);
    }

    /// A copy of the retained lines, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The most recent line, if any.
    pub fn last(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_lines() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.info(format!("line {i}"));
        }
        assert_eq!(ring.recent(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(ring.last().as_deref(), Some("line 4"));
    }

    #[test]
    fn clones_share_the_ring() {
        let ring = LogRing::new(4);
        let other = ring.clone();
        other.warn("from the clone");
        assert_eq!(ring.recent(), vec!["from the clone"]);
    }

    #[test]
    fn zero_depth_still_keeps_one() {
        let ring = LogRing::new(0);
        ring.info("a");
        ring.info("b");
        assert_eq!(ring.recent(), vec!["b"]);
    }
}

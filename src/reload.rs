use std::time::{Duration, Instant};

/// Coalesces block events into at most one web server reload per interval.
#[derive(Debug)]
pub struct ReloadCoordinator {
    min_interval: Duration,
    pending: bool,
    last_reload: Instant,
}

impl ReloadCoordinator {
    pub fn new(min_interval: Duration, started_at: Instant) -> Self {
        Self {
            min_interval,
            pending: false,
            last_reload: started_at,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns true when the caller must issue a reload now. The coordinator
    /// is already back to idle at that point; a failed reload is not retried
    /// until the next `mark_dirty`.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.pending || now.saturating_duration_since(self.last_reload) < self.min_interval {
            return false;
        }
        self.mark_reloaded(now);
        true
    }

    /// Records a reload issued outside `tick`, e.g. at the end of history replay.
    pub fn mark_reloaded(&mut self, now: Instant) {
        self.pending = false;
        self.last_reload = now;
    }
}

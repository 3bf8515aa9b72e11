use crate::blocklist::{AllowList, BlockStore};
use crate::config::GuardConfig;
use crate::firewall::Action;
use crate::logsource::{self, LiveTail};
use crate::parser::{Detection, SignatureMatcher, SourceKind};
use crate::reload::ReloadCoordinator;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Report decisions only: no firewall calls, no deny file writes, no reloads.
    Simulate,
    Enforce,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub files: usize,
    pub lines: usize,
    pub blocked: usize,
}

/// Owns every piece of mutable state; nothing else touches the store or
/// the reload coordinator.
pub struct Guard {
    mode: RunMode,
    config: GuardConfig,
    matcher: SignatureMatcher,
    store: BlockStore,
    allowlist: AllowList,
    reload: ReloadCoordinator,
    actions: Option<UnboundedSender<Action>>,
}

impl Guard {
    /// `actions` is ignored in simulation mode.
    pub fn new(
        mode: RunMode,
        config: GuardConfig,
        store: BlockStore,
        allowlist: AllowList,
        actions: Option<UnboundedSender<Action>>,
    ) -> Self {
        let reload = ReloadCoordinator::new(config.reload_interval(), Instant::now());
        let actions = match mode {
            RunMode::Enforce => actions,
            RunMode::Simulate => None,
        };
        Self {
            mode,
            config,
            matcher: SignatureMatcher::new(),
            store,
            allowlist,
            reload,
            actions,
        }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Returns the detection if it produced a new block.
    pub fn process_line(&mut self, line: &str, kind: SourceKind) -> Option<Detection> {
        let detection = self.matcher.detect(line, kind)?;
        let address = detection.address;

        if self.allowlist.contains(&address) {
            debug!("⚪ Allowlisted activity: {} ({})", address, detection.signature);
            return None;
        }
        if self.store.contains(&address) {
            debug!("Already blocked: {}", address);
            return None;
        }
        if !self.store.try_add(address, &self.allowlist) {
            return None;
        }

        match self.mode {
            RunMode::Simulate => {
                warn!(
                    "🔎 Would block IP {} due to: {} (in {} log)",
                    address, detection.signature, kind
                );
            }
            RunMode::Enforce => {
                warn!(
                    "🚨 Blocking IP {} | Reason: {} (in {} log)",
                    address, detection.signature, kind
                );
                self.dispatch(Action::Block(address));
            }
        }
        Some(detection)
    }

    /// One pass over every rotated error log, then every rotated access log.
    pub fn replay_history(&mut self) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let sources = [
            (self.config.error_log.clone(), SourceKind::Error),
            (self.config.access_log.clone(), SourceKind::Access),
        ];

        for (base, kind) in sources {
            let files = match logsource::discover(&base) {
                Ok(files) => files,
                Err(e) => {
                    error!("❌ Cannot discover {} logs at {}: {:#}", kind, base.display(), e);
                    continue;
                }
            };
            for path in files {
                match self.replay_file(&path, kind, &mut summary) {
                    Ok(()) => {
                        summary.files += 1;
                        info!("📂 Processed log file: {}", path.display());
                    }
                    Err(e) => error!("❌ Error processing {}: {:#}", path.display(), e),
                }
            }
        }

        if self.mode == RunMode::Enforce && self.store.is_dirty() {
            if self.persist() {
                self.dispatch(Action::Reload);
                self.reload.mark_reloaded(Instant::now());
            } else {
                // retried by on_tick, which reloads once the write lands
                self.reload.mark_dirty();
            }
        }

        info!(
            "📊 History replay done: {} file(s), {} line(s), {} new block(s)",
            summary.files, summary.lines, summary.blocked
        );
        summary
    }

    fn replay_file(&mut self, path: &Path, kind: SourceKind, summary: &mut ReplaySummary) -> Result<()> {
        for line in logsource::read_lines(path)? {
            let line = line?;
            summary.lines += 1;
            if self.process_line(&line, kind).is_some() {
                summary.blocked += 1;
            }
        }
        Ok(())
    }

    /// Follows both live logs until the tail fails. Never returns `Ok`.
    pub async fn run_live(mut self, mut tail: LiveTail) -> Result<()> {
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("👀 Monitoring live logs...");

        loop {
            tokio::select! {
                next = tail.next_line() => {
                    let (kind, line) = next?;
                    self.on_live_line(&line, kind);
                }
                _ = ticker.tick() => {
                    self.on_tick(Instant::now());
                }
            }
        }
    }

    pub fn on_live_line(&mut self, line: &str, kind: SourceKind) {
        if self.process_line(line, kind).is_some() && self.mode == RunMode::Enforce {
            self.persist();
            self.reload.mark_dirty();
        }
    }

    pub fn on_tick(&mut self, now: Instant) {
        if self.mode != RunMode::Enforce {
            return;
        }
        if self.store.is_dirty() && !self.persist() {
            // a reload now would pick up a stale deny file
            self.reload.mark_dirty();
            return;
        }
        if self.reload.tick(now) {
            info!("🔄 Reloading web server ({} blocked)", self.store.len());
            self.dispatch(Action::Reload);
        }
    }

    fn persist(&mut self) -> bool {
        match self.store.persist() {
            Ok(_) => true,
            Err(e) => {
                error!("❌ Failed to write deny file {}: {:#}", self.store.path().display(), e);
                false
            }
        }
    }

    fn dispatch(&self, action: Action) {
        if let Some(tx) = &self.actions {
            if tx.send(action).is_err() {
                error!("❌ Action worker is gone, dropped {:?}", action);
            }
        }
    }
}

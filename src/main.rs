mod address;
mod blocklist;
mod config;
mod firewall;
mod guard;
mod logsource;
mod parser;
mod reload;

use anyhow::Result;
use blocklist::{AllowList, BlockStore};
use clap::Parser;
use config::{CONFIG_PATH_ENV, GuardConfig};
use firewall::{Enforcer, ShellRunner};
use guard::{Guard, RunMode};
use logsource::LiveTail;
use std::path::PathBuf;
use std::sync::Arc;

/// Watches nginx logs for exploit probes and denies the clients sending them.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Report what would be blocked, then exit without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// YAML config file; environment variables override its values
    #[arg(long, env = CONFIG_PATH_ENV, default_value = "nginx_guard.yaml")]
    config: PathBuf,

    /// Legacy positional mode; `dry_run` behaves like --dry-run
    #[arg(hide = true)]
    mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mode = if cli.dry_run || cli.mode.as_deref() == Some("dry_run") {
        RunMode::Simulate
    } else {
        RunMode::Enforce
    };

    let config = GuardConfig::load(&cli.config)?;

    // Firewall and nginx reload both need root
    if mode == RunMode::Enforce && unsafe { libc::geteuid() } != 0 {
        log::error!("❌ CRITICAL: Run this application with SUDO/ROOT (or use --dry-run)!");
        std::process::exit(1);
    }

    let allowlist = AllowList::load(&config.allowlist_file)?;

    match mode {
        RunMode::Simulate => {
            log::info!("🔎 Starting in dry run mode");
            let store = BlockStore::load_read_only(&config.deny_file)?;
            let mut guard = Guard::new(mode, config, store, allowlist, None);
            let summary = guard.replay_history();
            log::info!(
                "🔎 Dry run finished: {} address(es) would be blocked, {} in total",
                summary.blocked,
                guard.store().len()
            );
            Ok(())
        }
        RunMode::Enforce => {
            log::info!("🚀 nginx-guard started...");
            let store = BlockStore::load(&config.deny_file)?;
            let enforcer = Enforcer::new(
                config.block_template()?,
                config.reload_command.clone(),
                Arc::new(ShellRunner),
            );
            let (actions, _worker) = firewall::spawn_worker(enforcer);

            // Attach before replay so nothing appended in between is missed
            let tail = LiveTail::attach(&config.error_log, &config.access_log).await?;
            log::info!(
                "📂 Tailing {} and {}",
                config.error_log.display(),
                config.access_log.display()
            );

            let mut guard = Guard::new(mode, config, store, allowlist, Some(actions));
            tokio::task::block_in_place(|| guard.replay_history());
            guard.run_live(tail).await
        }
    }
}

use crate::address::Address;
use anyhow::{Result, anyhow, bail};
use log::{error, info, warn};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(test)]
use mockall::automock;

const PLACEHOLDER: &str = "%s";

/// A shell command with exactly one `%s` slot for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: &str) -> Result<Self> {
        match template.matches(PLACEHOLDER).count() {
            1 => Ok(Self(template.to_string())),
            n => bail!(
                "Command template must contain exactly one {} placeholder, found {}: {:?}",
                PLACEHOLDER,
                n,
                template
            ),
        }
    }

    /// Only a parsed [`Address`] can be substituted; that parse is what keeps
    /// arbitrary log text out of the shell.
    pub fn render(&self, address: &Address) -> String {
        self.0.replacen(PLACEHOLDER, &address.to_string(), 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

#[cfg_attr(test, automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, command_line: &str) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c`, so templates may use pipes or `&&`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command_line: &str) -> Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .output()
            .map_err(|e| anyhow!("Failed to execute {:?}: {}", command_line, e))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Block(Address),
    Reload,
}

/// Drives the firewall tool and the web server reload.
pub struct Enforcer {
    block: CommandTemplate,
    reload: String,
    runner: Arc<dyn CommandRunner>,
}

impl Enforcer {
    pub fn new(block: CommandTemplate, reload: String, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            block,
            reload,
            runner,
        }
    }

    pub fn block_address(&self, address: &Address) -> Result<()> {
        let command = self.block.render(address);
        self.run_checked(&command)
            .map_err(|e| anyhow!("Failed to block {}: {}", address, e))
    }

    pub fn reload_server(&self) -> Result<()> {
        self.run_checked(&self.reload)
            .map_err(|e| anyhow!("Failed to reload: {}", e))
    }

    /// Failures are logged and swallowed; the deny file stays authoritative.
    pub fn execute(&self, action: Action) {
        match action {
            Action::Block(address) => match self.block_address(&address) {
                Ok(()) => info!("🧱 Firewall rule added for {}", address),
                Err(e) => error!("❌ {}", e),
            },
            Action::Reload => match self.reload_server() {
                Ok(()) => info!("🔄 Web server reloaded"),
                Err(e) => error!("❌ {}", e),
            },
        }
    }

    fn run_checked(&self, command: &str) -> Result<()> {
        let output = self.runner.run(command)?;
        if output.success {
            Ok(())
        } else {
            let detail = match output.stderr.trim() {
                "" => output.stdout.trim(),
                stderr => stderr,
            };
            Err(anyhow!(
                "{:?} exited with {}: {}",
                command,
                output
                    .code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                detail
            ))
        }
    }
}

/// Executes queued actions one at a time on the blocking pool, keeping
/// external commands off the log polling path.
pub fn spawn_worker(enforcer: Enforcer) -> (mpsc::UnboundedSender<Action>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let enforcer = Arc::new(enforcer);
    let handle = tokio::spawn(async move {
        while let Some(action) = rx.recv().await {
            let enforcer = Arc::clone(&enforcer);
            if let Err(e) = tokio::task::spawn_blocking(move || enforcer.execute(action)).await {
                warn!("⚠️  Action worker task failed: {}", e);
            }
        }
    });
    (tx, handle)
}

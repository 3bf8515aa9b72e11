//! The persisted deny list and the allowlist that overrides it.

use crate::address::Address;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DENY_FILE_HEADER: &str =
    "# Managed by nginx-guard. Entries are regenerated; manual edits may be lost.";

static DENY_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*deny\s+(\S+?)\s*;\s*$").expect("Fatal: directive regex invalid"));

/// Addresses the guard has blocked, mirrored in an nginx `deny` include file.
#[derive(Debug)]
pub struct BlockStore {
    path: PathBuf,
    addresses: BTreeSet<Address>,
    dirty: bool,
}

impl BlockStore {
    /// Reads the deny file, creating it with just the header when absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let store = Self {
                path,
                addresses: BTreeSet::new(),
                dirty: false,
            };
            store.write_atomically()?;
            info!("📄 Created empty deny file: {}", store.path.display());
            return Ok(store);
        }
        Self::load_read_only(path)
    }

    /// Like [`BlockStore::load`] but never writes; a missing file is an empty store.
    pub fn load_read_only(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let addresses = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read deny file {}", path.display()))?;
            parse_deny_file(&contents)
        } else {
            BTreeSet::new()
        };
        info!(
            "📄 Loaded {} blocked address(es) from {}",
            addresses.len(),
            path.display()
        );
        Ok(Self {
            path,
            addresses,
            dirty: false,
        })
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts `address` unless it is already blocked or allowlisted.
    pub fn try_add(&mut self, address: Address, allowlist: &AllowList) -> bool {
        if allowlist.contains(&address) || !self.addresses.insert(address) {
            return false;
        }
        self.dirty = true;
        true
    }

    /// Rewrites the deny file if anything changed since the last write.
    /// Returns whether a write happened.
    pub fn persist(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.write_atomically()?;
        self.dirty = false;
        Ok(true)
    }

    /// Header followed by one `deny` directive per address, numerically sorted.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(DENY_FILE_HEADER.len() + 1 + self.addresses.len() * 24);
        out.push_str(DENY_FILE_HEADER);
        out.push('\n');
        for address in &self.addresses {
            out.push_str(&format!("deny {};\n", address));
        }
        out
    }

    fn write_atomically(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(self.render().as_bytes())
            .context("Failed to write deny list")?;
        tmp.as_file().sync_all().context("Failed to sync deny list")?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))
            .context("Failed to set deny file permissions")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_deny_file(contents: &str) -> BTreeSet<Address> {
    let mut addresses = BTreeSet::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed = DENY_DIRECTIVE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<Address>().ok());
        match parsed {
            Some(address) => {
                addresses.insert(address);
            }
            None => debug!("Skipping malformed deny line: {}", trimmed),
        }
    }
    addresses
}

/// Addresses that are never blocked. Loaded once at startup.
#[derive(Debug, Default)]
pub struct AllowList {
    addresses: HashSet<Address>,
}

impl AllowList {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("⚠️  Allowlist file not found: {}", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read allowlist {}", path.display()))?;
        let list = Self::parse(&contents);
        info!(
            "⚪ Loaded {} allowlisted address(es) from {}",
            list.len(),
            path.display()
        );
        Ok(list)
    }

    pub fn parse(contents: &str) -> Self {
        let mut addresses = HashSet::new();
        for line in contents.lines() {
            let entry = line.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            match entry.parse::<Address>() {
                Ok(address) => {
                    addresses.insert(address);
                }
                Err(e) => warn!("⚠️  Ignoring allowlist entry: {}", e),
            }
        }
        Self { addresses }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

impl FromIterator<Address> for AllowList {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

//! Validated IPv4 client addresses.
//!
//! Addresses end up interpolated into shell commands, so an [`Address`] can
//! only be built by parsing text that matches the strict dotted-quad pattern.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

const OCTET: &str = r"(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])";

static STRICT_IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{OCTET}(?:\.{OCTET}){{3}}$")).expect("Fatal: address regex invalid")
});

// Candidates are loose on purpose; every capture still goes through `Address::from_str`.
static CLIENT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"client: ([0-9]{1,3}(?:\.[0-9]{1,3}){3})\b").expect("Fatal: client regex invalid")
});

static LINE_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{1,3}(?:\.[0-9]{1,3}){3})\b").expect("Fatal: line start regex invalid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Malformed IPv4 address: {0:?}")]
    Malformed(String),
}

/// An IPv4 address that passed the strict pattern check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Ipv4Addr);

impl Address {
    /// Error-log rule: the address follows a `client: ` label anywhere in the line.
    pub fn after_client_label(line: &str) -> Option<Self> {
        let caps = CLIENT_LABEL.captures(line)?;
        caps.get(1)?.as_str().parse().ok()
    }

    /// Access-log rule: the address must open the line.
    pub fn at_line_start(line: &str) -> Option<Self> {
        let caps = LINE_START.captures(line)?;
        caps.get(1)?.as_str().parse().ok()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !STRICT_IPV4.is_match(s) {
            return Err(AddressError::Malformed(s.to_string()));
        }
        s.parse::<Ipv4Addr>()
            .map(Address)
            .map_err(|_| AddressError::Malformed(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

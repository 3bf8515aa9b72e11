use crate::address::Address;
use std::fmt;

/// Request fragments that only scanners and exploit kits ask for.
/// Order decides which one is reported when several match.
pub const SIGNATURES: &[&str] = &[
    "phpmyadmin",
    "wp-login.php",
    "CoordinatorPortType",
    "azenv.php",
    ".vscode",
    ".git",
    ".env",
    "phpinfo",
    "/cdn-cgi/",
    "/cgi-bin/",
    "paloaltonetworks.com",
    "/wp-config.php",
];

/// nginx writes this for requests a `deny` rule already rejected.
const ALREADY_DENIED: &str = "access forbidden by rule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Error,
    Access,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Error => f.write_str("error"),
            SourceKind::Access => f.write_str("access"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub address: Address,
    pub signature: &'static str,
}

pub struct SignatureMatcher {
    // (lowercased needle, signature as listed)
    needles: Vec<(String, &'static str)>,
}

impl SignatureMatcher {
    pub fn new() -> Self {
        Self::with_signatures(SIGNATURES)
    }

    pub fn with_signatures(signatures: &[&'static str]) -> Self {
        let needles = signatures
            .iter()
            .map(|sig| (sig.to_lowercase(), *sig))
            .collect();
        Self { needles }
    }

    /// Finds the client address for `kind` and the first signature contained
    /// in the line, ignoring case. Lines without an address are never detections.
    pub fn detect(&self, line: &str, kind: SourceKind) -> Option<Detection> {
        if kind == SourceKind::Error && line.contains(ALREADY_DENIED) {
            return None;
        }
        let address = match kind {
            SourceKind::Error => Address::after_client_label(line),
            SourceKind::Access => Address::at_line_start(line),
        }?;

        let haystack = line.to_lowercase();
        self.needles
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, signature)| Detection {
                address,
                signature: *signature,
            })
    }
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_access_line_phpmyadmin() {
        let matcher = SignatureMatcher::new();
        let detection = matcher
            .detect(r#"1.2.3.4 - - "GET /phpmyadmin/index.php""#, SourceKind::Access)
            .unwrap();
        assert_eq!(detection.address, addr("1.2.3.4"));
        assert_eq!(detection.signature, "phpmyadmin");
    }

    #[test]
    fn test_error_line_git() {
        let matcher = SignatureMatcher::new();
        let line = r#"2024/05/01 10:00:00 [error] 811#811: *42 open() "/srv/www/.git/config" failed (2: No such file or directory), client: 10.0.0.5, server: example.org, request: "GET /.git/config HTTP/1.1""#;
        let detection = matcher.detect(line, SourceKind::Error).unwrap();
        assert_eq!(detection.address, addr("10.0.0.5"));
        assert_eq!(detection.signature, ".git");
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = SignatureMatcher::new();
        let detection = matcher
            .detect(r#"5.6.7.8 - - "GET /PHPMyAdmin/ HTTP/1.1""#, SourceKind::Access)
            .unwrap();
        assert_eq!(detection.signature, "phpmyadmin");

        let detection = matcher
            .detect(r#"5.6.7.8 - - "POST /coordinatorporttype""#, SourceKind::Access)
            .unwrap();
        assert_eq!(detection.signature, "CoordinatorPortType");
    }

    #[test]
    fn test_first_signature_wins() {
        let matcher = SignatureMatcher::new();
        let detection = matcher
            .detect(r#"5.6.7.8 - - "GET /.env?x=/phpmyadmin""#, SourceKind::Access)
            .unwrap();
        assert_eq!(detection.signature, "phpmyadmin");
    }

    #[test]
    fn test_address_position_depends_on_source_kind() {
        let matcher = SignatureMatcher::new();
        let access_style = r#"1.2.3.4 - - "GET /wp-login.php""#;
        let error_style = r#"[error] client: 1.2.3.4, request: "GET /wp-login.php""#;

        assert!(matcher.detect(access_style, SourceKind::Error).is_none());
        assert!(matcher.detect(error_style, SourceKind::Access).is_none());
        assert!(matcher.detect(error_style, SourceKind::Error).is_some());
    }

    #[test]
    fn test_clean_lines() {
        let matcher = SignatureMatcher::new();
        assert!(matcher
            .detect(r#"1.2.3.4 - - "GET /index.html HTTP/1.1" 200"#, SourceKind::Access)
            .is_none());
        assert!(matcher
            .detect(r#"host - - "GET /phpmyadmin""#, SourceKind::Access)
            .is_none());
        assert!(matcher.detect("", SourceKind::Error).is_none());
    }

    #[test]
    fn test_every_signature_is_detected() {
        let matcher = SignatureMatcher::new();
        for sig in SIGNATURES {
            let line = format!(r#"9.9.9.9 - - "GET /x{sig}y""#);
            let detection = matcher.detect(&line, SourceKind::Access);
            assert!(detection.is_some(), "missed {sig}");
        }
    }

    #[test]
    fn test_skips_requests_nginx_already_denied() {
        let matcher = SignatureMatcher::new();
        let denied = r#"2024/05/01 10:00:00 [error] 811#811: *7 access forbidden by rule, client: 10.0.0.9, server: example.org, request: "GET /.env HTTP/1.1""#;
        let open = r#"2024/05/01 10:00:00 [error] 811#811: *8 open() failed, client: 10.0.0.9, server: example.org, request: "GET /.env HTTP/1.1""#;

        assert!(matcher.detect(denied, SourceKind::Error).is_none());
        assert!(matcher.detect(open, SourceKind::Error).is_some());
        assert!(matcher
            .detect(r#"10.0.0.9 - - "GET /.env?q=access forbidden by rule""#, SourceKind::Access)
            .is_some());
    }
}

//! Log line sources: one-shot reads of rotated history and a live tail.

use crate::parser::SourceKind;
use anyhow::{Context, Result, anyhow, bail};
use flate2::read::MultiGzDecoder;
use linemux::MuxedLines;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Every file next to `base` whose name starts with `base`'s file name
/// (`access.log`, `access.log.1`, `access.log.2.gz`, ...), newest first.
pub fn discover(base: &Path) -> Result<Vec<PathBuf>> {
    let prefix = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Log path has no file name: {}", base.display()))?;
    let dir = match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if !matches {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, entry.path()));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Lazily yields each line of a plain or gzip-compressed file once.
pub fn read_lines(path: &Path) -> Result<HistoryLines> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn BufRead + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(HistoryLines {
        reader,
        buf: Vec::new(),
    })
}

pub struct HistoryLines {
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
}

impl Iterator for HistoryLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                // nginx logs raw request bytes; don't let one bad byte end the file
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Follows the live error and access logs from their current end.
/// Rotated or recreated files are picked up again by path.
pub struct LiveTail {
    lines: MuxedLines,
    error_log: PathBuf,
    access_log: PathBuf,
}

impl LiveTail {
    pub async fn attach(error_log: &Path, access_log: &Path) -> Result<Self> {
        let mut lines = MuxedLines::new().context("Failed to start log watcher")?;
        let mut canonical = Vec::with_capacity(2);
        for path in [error_log, access_log] {
            if !path.exists() {
                bail!("Live log file not found: {}", path.display());
            }
            let resolved = fs::canonicalize(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            lines
                .add_file(&resolved)
                .await
                .with_context(|| format!("Failed to tail {}", path.display()))?;
            canonical.push(resolved);
        }
        let access_log = canonical.pop().unwrap_or_else(|| access_log.to_path_buf());
        let error_log = canonical.pop().unwrap_or_else(|| error_log.to_path_buf());
        Ok(Self {
            lines,
            error_log,
            access_log,
        })
    }

    /// Next appended line from either file. An error here means the guard
    /// can no longer see its input and is returned to the caller.
    pub async fn next_line(&mut self) -> Result<(SourceKind, String)> {
        let line = self
            .lines
            .next_line()
            .await
            .context("Failed to read live log")?
            .ok_or_else(|| anyhow!("Live log watcher stopped"))?;
        let kind = self.kind_of(line.source());
        Ok((kind, line.line().to_string()))
    }

    fn kind_of(&self, source: &Path) -> SourceKind {
        if source == self.error_log {
            SourceKind::Error
        } else if source == self.access_log {
            SourceKind::Access
        } else if source.file_name() == self.error_log.file_name() {
            SourceKind::Error
        } else {
            SourceKind::Access
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_with_mtime(path: &Path, contents: &[u8], age_secs: u64) {
        fs::write(path, contents).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    fn gzip(contents: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(contents.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_discover_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("access.log");
        write_with_mtime(&base, b"a\n", 0);
        write_with_mtime(&dir.path().join("access.log.1"), b"b\n", 100);
        write_with_mtime(&dir.path().join("access.log.2.gz"), &gzip("c\n"), 200);
        write_with_mtime(&dir.path().join("error.log"), b"x\n", 0);
        fs::create_dir(dir.path().join("access.log.d")).unwrap();

        let found = discover(&base).unwrap();

        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["access.log", "access.log.1", "access.log.2.gz"]);
    }

    #[test]
    fn test_discover_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("nope").join("access.log")).is_err());
    }

    #[test]
    fn test_read_plain_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "first\r\nsecond\nthird").unwrap();

        let lines: Vec<String> = read_lines(&path).unwrap().map(|l| l.unwrap()).collect();

        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_read_gzip_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log.3.gz");
        fs::write(&path, gzip("1.2.3.4 - - \"GET /\"\n5.6.7.8 - - \"GET /.env\"\n")).unwrap();

        let lines: Vec<String> = read_lines(&path).unwrap().map(|l| l.unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("/.env\""));
    }

    #[test]
    fn test_read_tolerates_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, b"1.2.3.4 \xff\xfe /phpinfo\nok\n").unwrap();

        let lines: Vec<String> = read_lines(&path).unwrap().map(|l| l.unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/phpinfo"));
    }

    #[tokio::test]
    async fn test_attach_requires_existing_files() {
        let dir = TempDir::new().unwrap();
        let error_log = dir.path().join("error.log");
        fs::write(&error_log, "").unwrap();

        let result = LiveTail::attach(&error_log, &dir.path().join("access.log")).await;

        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tail_yields_only_appended_lines_tagged_by_source() {
        let dir = TempDir::new().unwrap();
        let error_log = dir.path().join("error.log");
        let access_log = dir.path().join("access.log");
        fs::write(&error_log, "[error] client: 7.7.7.7, request: \"GET /.git\"\n").unwrap();
        fs::write(&access_log, "7.7.7.7 - - \"GET /.env\"\n").unwrap();

        let mut tail = LiveTail::attach(&error_log, &access_log).await.unwrap();
        for (path, line) in [
            (&error_log, "[error] client: 1.1.1.1, request: \"GET /phpinfo\"\n"),
            (&access_log, "2.2.2.2 - - \"GET /cgi-bin/\"\n"),
        ] {
            let mut file = File::options().append(true).open(path).unwrap();
            file.write_all(line.as_bytes()).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            let next = tokio::time::timeout(Duration::from_secs(5), tail.next_line())
                .await
                .expect("no line within 5s")
                .unwrap();
            seen.push(next);
        }
        seen.sort_by_key(|(kind, _)| *kind == SourceKind::Access);

        assert_eq!(seen[0].0, SourceKind::Error);
        assert!(seen[0].1.contains("client: 1.1.1.1"));
        assert_eq!(seen[1].0, SourceKind::Access);
        assert!(seen[1].1.starts_with("2.2.2.2"));
        assert!(seen.iter().all(|(_, line)| !line.contains("7.7.7.7")));
    }
}

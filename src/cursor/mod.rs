//! Ingestion cursor: how much of the log source has already been consumed.
//!
//! Progress is a small JSON record persisted atomically after each successful
//! pass. Fetching stages new progress in memory; only `commit` makes it
//! durable, so a crash between detection and commit replays the same lines on
//! the next start instead of losing them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorState {
    pub consumed_bytes: u64,
    pub consumed_lines: u64,
}

pub struct LogCursor {
    source_path: PathBuf,
    state_path: PathBuf,
    committed: CursorState,
    staged: Option<CursorState>,
}

impl LogCursor {
    /// Load persisted progress. A missing or corrupt state file means "start
    /// from the beginning of the current source", never an error.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(source_path: P, state_path: Q) -> Self {
        let state_path = state_path.as_ref().to_path_buf();
        let committed = match fs::read_to_string(&state_path) {
            Ok(content) => match serde_json::from_str::<CursorState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Corrupt cursor state in {:?}, resetting: {}", state_path, e);
                    CursorState::default()
                }
            },
            Err(_) => CursorState::default(),
        };

        Self {
            source_path: source_path.as_ref().to_path_buf(),
            state_path,
            committed,
            staged: None,
        }
    }

    pub fn consumed(&self) -> CursorState {
        self.committed
    }

    /// Read all complete lines appended since the committed offset.
    ///
    /// A trailing line without a newline is left in place for a later pass.
    /// If the source shrank below our offset it was rotated or replaced;
    /// reading restarts from the beginning.
    pub fn fetch_new(&mut self) -> Result<Vec<String>> {
        let metadata = fs::metadata(&self.source_path)
            .with_context(|| format!("stat log source {}", self.source_path.display()))?;

        let mut base = self.committed;
        if metadata.len() < base.consumed_bytes {
            info!(
                "Log source {} shrank ({} < {}), rereading from start",
                self.source_path.display(),
                metadata.len(),
                base.consumed_bytes,
            );
            base = CursorState::default();
        }

        if metadata.len() == base.consumed_bytes {
            self.staged = None;
            return Ok(Vec::new());
        }

        let file = File::open(&self.source_path)
            .with_context(|| format!("open log source {}", self.source_path.display()))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(base.consumed_bytes))
            .context("seek to committed offset")?;

        let mut lines = Vec::new();
        let mut next = base;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).context("read log line")?;
            if n == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                // Partial tail still being written; pick it up next pass.
                debug!("Leaving {} partial bytes for the next pass", n);
                break;
            }
            next.consumed_bytes += n as u64;
            next.consumed_lines += 1;
            let text = String::from_utf8_lossy(&buf);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }

        self.staged = (next != self.committed).then_some(next);
        Ok(lines)
    }

    /// Durably persist the progress staged by the last `fetch_new`. No-op
    /// when nothing was staged.
    pub fn commit(&mut self) -> Result<()> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        self.persist(&staged)?;
        self.committed = staged;
        Ok(())
    }

    fn persist(&self, state: &CursorState) -> Result<()> {
        let tmp = self.state_path.with_extension("json.tmp");
        let json = serde_json::to_string(state).context("serialize cursor state")?;
        {
            let mut f = File::create(&tmp)
                .with_context(|| format!("create cursor temp file {}", tmp.display()))?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.state_path)
            .with_context(|| format!("replace cursor state {}", self.state_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    struct Setup {
        _dir: tempfile::TempDir,
        source: PathBuf,
        state: PathBuf,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("access.log");
        let state = dir.path().join("cursor.json");
        fs::write(&source, "").unwrap();
        Setup {
            source,
            state,
            _dir: dir,
        }
    }

    fn append(path: &Path, text: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn lines_are_consumed_exactly_once() {
        let s = setup();
        append(&s.source, "one\ntwo\n");

        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.fetch_new().unwrap(), vec!["one", "two"]);
        cursor.commit().unwrap();

        assert!(cursor.fetch_new().unwrap().is_empty());

        append(&s.source, "three\n");
        assert_eq!(cursor.fetch_new().unwrap(), vec!["three"]);
        cursor.commit().unwrap();
        assert_eq!(cursor.consumed().consumed_lines, 3);
    }

    #[test]
    fn uncommitted_fetch_is_replayed_after_restart() {
        let s = setup();
        append(&s.source, "one\ntwo\n");

        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.fetch_new().unwrap().len(), 2);
        // Crash before commit: drop without persisting.
        drop(cursor);

        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.fetch_new().unwrap(), vec!["one", "two"]);
        cursor.commit().unwrap();
        assert_eq!(cursor.consumed().consumed_lines, 2);
    }

    #[test]
    fn committed_state_survives_restart() {
        let s = setup();
        append(&s.source, "one\n");

        let mut cursor = LogCursor::open(&s.source, &s.state);
        cursor.fetch_new().unwrap();
        cursor.commit().unwrap();
        drop(cursor);

        append(&s.source, "two\n");
        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.fetch_new().unwrap(), vec!["two"]);
    }

    #[test]
    fn partial_tail_line_is_withheld() {
        let s = setup();
        append(&s.source, "complete\npartial");

        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.fetch_new().unwrap(), vec!["complete"]);
        cursor.commit().unwrap();

        append(&s.source, " now finished\n");
        assert_eq!(cursor.fetch_new().unwrap(), vec!["partial now finished"]);
    }

    #[test]
    fn rotation_resets_to_start() {
        let s = setup();
        append(&s.source, "a longer first generation line\n");

        let mut cursor = LogCursor::open(&s.source, &s.state);
        cursor.fetch_new().unwrap();
        cursor.commit().unwrap();

        // Rotate: replace with a shorter file.
        fs::write(&s.source, "fresh\n").unwrap();
        assert_eq!(cursor.fetch_new().unwrap(), vec!["fresh"]);
        cursor.commit().unwrap();
        assert_eq!(cursor.consumed().consumed_lines, 1);
    }

    #[test]
    fn corrupt_state_file_resets_to_zero() {
        let s = setup();
        append(&s.source, "one\n");
        fs::write(&s.state, "{definitely not json").unwrap();

        let mut cursor = LogCursor::open(&s.source, &s.state);
        assert_eq!(cursor.consumed(), CursorState::default());
        assert_eq!(cursor.fetch_new().unwrap(), vec!["one"]);
    }

    #[test]
    fn missing_source_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut cursor = LogCursor::open(dir.path().join("absent.log"), dir.path().join("c.json"));
        assert!(cursor.fetch_new().is_err());
    }

    #[test]
    fn invalid_utf8_is_lossy_decoded() {
        let s = setup();
        let mut f = fs::OpenOptions::new().append(true).open(&s.source).unwrap();
        f.write_all(b"caf\xff line\n").unwrap();
        drop(f);

        let mut cursor = LogCursor::open(&s.source, &s.state);
        let lines = cursor.fetch_new().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains('\u{FFFD}'));
    }
}

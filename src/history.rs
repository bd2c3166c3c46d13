//! Ordered record of shown images with browser-history navigation semantics.
//!
//! The cursor always points at the entry currently on screen (`None` before
//! anything has been shown). Entries are only appended at the tail or
//! truncated when branching off mid-history into a fresh random pick.
//! Retention is bounded by a ring so a kiosk running for weeks cannot grow
//! without limit.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::info;

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<PathBuf>,
    cursor: Option<usize>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            limit: limit.max(2),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// The entry currently shown.
    pub fn current(&self) -> Option<&Path> {
        self.entries.get(self.cursor?).map(PathBuf::as_path)
    }

    /// Whether forward navigation would leave recorded history.
    pub fn at_tail(&self) -> bool {
        match self.cursor {
            None => true,
            Some(c) => c + 1 >= self.entries.len(),
        }
    }

    /// The recorded forward entry, or `None` when the cursor is at the tail
    /// (a forward step at the tail is a new pick).
    pub fn peek_next(&self) -> Option<&Path> {
        let next = self.cursor? + 1;
        self.entries.get(next).map(PathBuf::as_path)
    }

    /// The entry immediately before the cursor, or `None` at the head.
    pub fn peek_previous(&self) -> Option<&Path> {
        let c = self.cursor?;
        if c == 0 {
            return None;
        }
        self.entries.get(c - 1).map(PathBuf::as_path)
    }

    /// Last `n` entries, newest first. Used for repeat avoidance.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter().rev().take(n)
    }

    /// Append a fresh pick at the tail and move the cursor onto it. Any
    /// earlier occurrence of the same path is removed first so history never
    /// holds duplicates.
    pub fn push_new(&mut self, path: PathBuf) {
        self.remove_path(&path);
        self.entries.push_back(path);
        if self.entries.len() > self.limit {
            self.entries.pop_front();
            self.cursor = self.cursor.map(|c| c.saturating_sub(1));
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Discard the recorded forward branch beyond the cursor.
    pub fn truncate_forward(&mut self) {
        let keep = match self.cursor {
            None => return,
            Some(c) => c + 1,
        };
        self.entries.truncate(keep);
    }

    /// Advance the cursor onto the recorded next entry, purging entries whose
    /// files have been deleted externally. Returns `false` when no recorded
    /// forward entry survives (the caller should fall back to a new pick).
    pub fn roll_next(&mut self) -> bool {
        loop {
            let next = match self.cursor {
                None => 0,
                Some(c) => c + 1,
            };
            let Some(candidate) = self.entries.get(next) else {
                if !self.entries.is_empty() {
                    self.cursor = Some(self.entries.len() - 1);
                }
                return false;
            };
            if candidate.exists() {
                self.cursor = Some(next);
                return true;
            }
            info!(path = %candidate.display(), "forward entry missing from filesystem; purging");
            self.entries.remove(next);
        }
    }

    /// Move the cursor back one entry, purging externally-deleted entries as
    /// they are encountered. Returns `false` at the head.
    pub fn roll_previous(&mut self) -> bool {
        while !self.entries.is_empty() {
            let c = match self.cursor {
                None | Some(0) => return false,
                Some(c) => c,
            };
            self.cursor = Some(c - 1);
            let Some(candidate) = self.entries.get(c - 1).cloned() else {
                return false;
            };
            if candidate.exists() {
                return true;
            }
            info!(path = %candidate.display(), "previous entry missing from filesystem; purging");
            self.remove_path(&candidate);
        }
        false
    }

    /// Remove every occurrence of `path`, keeping the cursor on the entry it
    /// pointed at (or clamped to the new tail).
    pub fn remove_path(&mut self, path: &Path) {
        while let Some(idx) = self.entries.iter().position(|p| p == path) {
            self.entries.remove(idx);
            self.cursor = match self.cursor {
                Some(c) if idx < c => Some(c - 1),
                Some(c) if c >= self.entries.len() && !self.entries.is_empty() => {
                    Some(self.entries.len() - 1)
                }
                Some(_) if self.entries.is_empty() => None,
                other => other,
            };
        }
    }

    /// Snapshot of entries and cursor handed to the pre-render worker.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            entries: self.entries.iter().cloned().collect(),
            cursor: self.cursor,
        }
    }
}

/// Immutable copy of history state taken when a pre-render run starts. The
/// worker reads only this; the live `History` stays owned by the controller.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub entries: Vec<PathBuf>,
    pub cursor: Option<usize>,
}

impl HistorySnapshot {
    pub fn at_tail(&self) -> bool {
        match self.cursor {
            None => true,
            Some(c) => c + 1 >= self.entries.len(),
        }
    }

    pub fn peek_next(&self) -> Option<&Path> {
        let next = self.cursor? + 1;
        self.entries.get(next).map(PathBuf::as_path)
    }

    pub fn peek_previous(&self) -> Option<&Path> {
        let c = self.cursor?;
        if c == 0 {
            return None;
        }
        self.entries.get(c - 1).map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn mkfile(dir: &TempDir, name: &str) -> PathBuf {
        let p = dir.path().join(name);
        fs::write(&p, b"x").unwrap();
        p
    }

    #[test]
    fn cursor_starts_unset() {
        let h = History::new(8);
        assert!(h.current().is_none());
        assert!(h.at_tail());
        assert!(h.peek_next().is_none());
        assert!(h.peek_previous().is_none());
    }

    #[test]
    fn replaying_next_previous_is_monotonic() {
        let tmp = TempDir::new().unwrap();
        let a = mkfile(&tmp, "a.jpg");
        let b = mkfile(&tmp, "b.jpg");
        let c = mkfile(&tmp, "c.jpg");

        let mut h = History::new(8);
        h.push_new(a.clone());
        h.push_new(b.clone());
        h.push_new(c.clone());
        assert_eq!(h.current(), Some(c.as_path()));

        assert!(h.roll_previous());
        assert_eq!(h.current(), Some(b.as_path()));
        assert!(h.roll_previous());
        assert_eq!(h.current(), Some(a.as_path()));
        assert!(!h.roll_previous(), "head reached");

        // Forward retraces the same recorded entries in the same order.
        assert!(h.roll_next());
        assert_eq!(h.current(), Some(b.as_path()));
        assert!(h.roll_next());
        assert_eq!(h.current(), Some(c.as_path()));
        assert!(!h.roll_next(), "tail reached");
    }

    #[test]
    fn forced_new_truncates_forward_branch() {
        let tmp = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..5).map(|i| mkfile(&tmp, &format!("p{i}.jpg"))).collect();

        let mut h = History::new(16);
        for p in &paths {
            h.push_new(p.clone());
        }
        // Move back three steps, then branch off with a fresh pick.
        for _ in 0..3 {
            assert!(h.roll_previous());
        }
        let cursor = h.cursor().unwrap();
        let fresh = mkfile(&tmp, "fresh.jpg");
        h.truncate_forward();
        h.push_new(fresh.clone());

        assert_eq!(h.len(), cursor + 2);
        assert_eq!(h.current(), Some(fresh.as_path()));
        assert!(h.at_tail());
    }

    #[test]
    fn roll_previous_purges_deleted_entries() {
        let tmp = TempDir::new().unwrap();
        let a = mkfile(&tmp, "a.jpg");
        let b = mkfile(&tmp, "b.jpg");
        let c = mkfile(&tmp, "c.jpg");

        let mut h = History::new(8);
        h.push_new(a.clone());
        h.push_new(b.clone());
        h.push_new(c.clone());

        fs::remove_file(&b).unwrap();
        assert!(h.roll_previous());
        // b was purged; retreat lands on a directly.
        assert_eq!(h.current(), Some(a.as_path()));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn push_new_deduplicates_and_keeps_cursor() {
        let tmp = TempDir::new().unwrap();
        let a = mkfile(&tmp, "a.jpg");
        let b = mkfile(&tmp, "b.jpg");

        let mut h = History::new(8);
        h.push_new(a.clone());
        h.push_new(b.clone());
        h.push_new(a.clone());
        assert_eq!(h.len(), 2);
        assert_eq!(h.current(), Some(a.as_path()));
        assert_eq!(h.peek_previous(), Some(b.as_path()));
    }

    #[test]
    fn ring_bound_drops_oldest() {
        let tmp = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..6).map(|i| mkfile(&tmp, &format!("r{i}.jpg"))).collect();

        let mut h = History::new(4);
        for p in &paths {
            h.push_new(p.clone());
        }
        assert_eq!(h.len(), 4);
        assert_eq!(h.current(), Some(paths[5].as_path()));
        // Oldest two fell off the ring.
        assert!(h.recent(4).all(|p| *p != paths[0] && *p != paths[1]));
    }
}

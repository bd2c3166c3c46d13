//! Picture library discovery and random selection.
//!
//! A library is the configured root directory plus any sibling directories
//! whose name shares the root's prefix, so a collection can span multiple
//! mounted volumes (`Pictures`, `Pictures2`, `Pictures-archive`, ...).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::overlay::CLOCKPOS_SUFFIX;

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png"];

/// Repeat-avoidance knobs for [`Library::pick_new`].
#[derive(Debug, Clone, Copy)]
pub struct PickPolicy {
    /// Retry budget before a recently-shown pick is accepted anyway.
    pub retries: u32,
    /// Window is `max(5, total-files) / divisor` history entries.
    pub window_divisor: u32,
}

impl Default for PickPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            window_divisor: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    policy: PickPolicy,
}

/// Return `true` if `path` has an accepted image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTS.iter().any(|e| *e == ext)
        })
}

impl Library {
    pub fn new(root: impl Into<PathBuf>, policy: PickPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root plus sibling directories sharing the root's name prefix.
    ///
    /// # Errors
    /// Returns [`Error::BadDir`] if the root is missing or not a directory.
    pub fn parts(&self) -> Result<Vec<PathBuf>, Error> {
        if !self.root.is_dir() {
            return Err(Error::BadDir(self.root.to_string_lossy().into_owned()));
        }
        let Some(parent) = self.root.parent() else {
            return Ok(vec![self.root.clone()]);
        };
        let Some(prefix) = self.root.file_name().and_then(OsStr::to_str) else {
            return Ok(vec![self.root.clone()]);
        };
        let mut parts = Vec::new();
        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|name| name.starts_with(prefix))
            {
                parts.push(path);
            }
        }
        parts.sort();
        Ok(parts)
    }

    /// Enumerate all eligible image files across every library part,
    /// de-duplicated case-insensitively.
    pub fn enumerate(&self) -> Result<Vec<PathBuf>, Error> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for part in self.parts()? {
            for entry in WalkDir::new(&part)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                if !is_supported_image(path) {
                    continue;
                }
                if seen.insert(path.to_string_lossy().to_lowercase()) {
                    out.push(path.to_path_buf());
                }
            }
        }
        out.sort();
        debug!(count = out.len(), root = %self.root.display(), "library enumerated");
        Ok(out)
    }

    /// Pick a fresh image uniformly at random, avoiding anything within the
    /// recent tail of `shown` (oldest first, as recorded by history). The
    /// window is heuristic: after the retry budget runs out the repeat is
    /// accepted rather than spinning forever.
    ///
    /// With `prefer_unplaced_clock`, images that already carry a clock
    /// position sidecar are filtered out first so edit mode surfaces the
    /// unfinished ones.
    ///
    /// # Errors
    /// Returns [`Error::NoImagesFound`] when the library holds no images.
    pub fn pick_new(
        &self,
        shown: &[PathBuf],
        prefer_unplaced_clock: bool,
        rng: &mut impl Rng,
    ) -> Result<PathBuf, Error> {
        let mut files = self.enumerate()?;
        if files.is_empty() {
            warn!(root = %self.root.display(), "no files found");
            return Err(Error::NoImagesFound);
        }

        if prefer_unplaced_clock {
            let unplaced: Vec<PathBuf> = files
                .iter()
                .filter(|p| {
                    let mut sidecar = p.as_os_str().to_owned();
                    sidecar.push(CLOCKPOS_SUFFIX);
                    !Path::new(&sidecar).exists()
                })
                .cloned()
                .collect();
            if !unplaced.is_empty() {
                files = unplaced;
            }
        }

        let window = files.len().max(5) / self.policy.window_divisor.max(1) as usize;
        let mut retries = 0u32;
        loop {
            let candidate = files[rng.random_range(0..files.len())].clone();
            let repeat = shown
                .iter()
                .rev()
                .take(window)
                .any(|recent| paths_eq_fold(recent, &candidate));
            if !repeat || retries > self.policy.retries {
                return Ok(candidate);
            }
            retries += 1;
        }
    }
}

fn paths_eq_fold(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported_image(Path::new("a.JPG")));
        assert!(is_supported_image(Path::new("a.jpeg")));
        assert!(is_supported_image(Path::new("a.Png")));
        assert!(!is_supported_image(Path::new("a.webp")));
        assert!(!is_supported_image(Path::new("a.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    #[test]
    fn sibling_parts_share_name_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Pictures");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(tmp.path().join("Pictures2")).unwrap();
        fs::create_dir_all(tmp.path().join("Unrelated")).unwrap();
        touch(&root.join("a.jpg"));
        touch(&tmp.path().join("Pictures2").join("b.png"));
        touch(&tmp.path().join("Unrelated").join("c.jpg"));

        let lib = Library::new(&root, PickPolicy::default());
        let parts = lib.parts().unwrap();
        assert_eq!(parts.len(), 2);

        let files = lib.enumerate().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn missing_root_is_bad_dir() {
        let lib = Library::new("/definitely/not/here", PickPolicy::default());
        assert!(matches!(lib.parts(), Err(Error::BadDir(_))));
    }

    #[test]
    fn empty_library_is_no_images_found() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = Library::new(tmp.path(), PickPolicy::default());
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            lib.pick_new(&[], false, &mut rng),
            Err(Error::NoImagesFound)
        ));
    }

    #[test]
    fn repeat_avoidance_mostly_skips_recent_picks() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pics");
        fs::create_dir_all(&root).unwrap();
        for i in 0..24 {
            touch(&root.join(format!("img{i:02}.jpg")));
        }
        let lib = Library::new(&root, PickPolicy::default());
        let mut rng = StdRng::seed_from_u64(42);

        // window = max(5, 24) / 3 = 8 entries
        let mut shown: Vec<PathBuf> = Vec::new();
        let mut repeats = 0usize;
        let trials = 200usize;
        for _ in 0..trials {
            let pick = lib.pick_new(&shown, false, &mut rng).unwrap();
            if shown.iter().rev().take(8).any(|p| p == &pick) {
                repeats += 1;
            }
            shown.push(pick);
        }
        // Statistical, not absolute: retries are bounded, so a small
        // fraction of repeats is expected.
        assert!(
            repeats <= trials / 10,
            "too many repeats within window: {repeats}/{trials}"
        );
    }

    #[test]
    fn retry_budget_accepts_repeat_when_window_covers_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pics");
        fs::create_dir_all(&root).unwrap();
        touch(&root.join("only.jpg"));
        let lib = Library::new(&root, PickPolicy::default());
        let mut rng = StdRng::seed_from_u64(1);

        let shown = vec![root.join("only.jpg")];
        // Single-file library: every pick is a repeat, budget must cave in.
        let pick = lib.pick_new(&shown, false, &mut rng).unwrap();
        assert_eq!(pick.file_name().unwrap(), "only.jpg");
    }

    #[test]
    fn edit_mode_prefers_images_without_clock_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("pics");
        fs::create_dir_all(&root).unwrap();
        touch(&root.join("placed.jpg"));
        touch(&root.join("placed.jpg.clockpos.txt"));
        touch(&root.join("unplaced.jpg"));

        let lib = Library::new(&root, PickPolicy::default());
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10 {
            let pick = lib.pick_new(&[], true, &mut rng).unwrap();
            assert_eq!(pick.file_name().unwrap(), "unplaced.jpg");
        }
    }
}

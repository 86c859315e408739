//! Bounded file-system traversal behind an injectable abstraction.
//!
//! The assessment heuristic must stay cheap and testable: every probe is a
//! pure function of (filesystem, root, limits), the walk is an explicit
//! worklist with injected depth and file caps, and tests drive it with an
//! in-memory filesystem instead of a real project tree.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

/// Directories never descended into. Third-party and build output would
/// dominate any marker count.
const SKIPPED_DIRS: [&str; 7] = [
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "vendor",
    ".venv",
];

/// File extensions considered source code for marker scans.
const SOURCE_EXTENSIONS: [&str; 16] = [
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "h", "cpp", "cs", "swift",
    "kt", "vue",
];

/// A single directory entry as seen by the walker.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Minimal read-only filesystem surface used by the assessment heuristic.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>>;
}

/// The real filesystem.
pub struct RealFs;

impl FileSystem for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntryInfo {
                is_dir: entry.file_type()?.is_dir(),
                path: entry.path(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// In-memory filesystem for tests and dry inspection. Directories are
/// implied by the file paths stored.
#[derive(Debug, Default)]
pub struct MemFs {
    files: BTreeMap<PathBuf, String>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(PathBuf::from(path), content.to_string());
        self
    }

    fn is_implied_dir(&self, path: &Path) -> bool {
        self.files.keys().any(|p| p.starts_with(path) && p != path)
    }
}

impl FileSystem for MemFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.is_implied_dir(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        if !self.is_implied_dir(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }
        let mut seen = BTreeMap::new();
        for file in self.files.keys() {
            if let Ok(rest) = file.strip_prefix(path) {
                let mut components = rest.components();
                if let Some(first) = components.next() {
                    let child = path.join(first);
                    let is_dir = components.next().is_some();
                    seen.entry(child.clone()).or_insert(DirEntryInfo {
                        path: child,
                        is_dir,
                    });
                }
            }
        }
        Ok(seen.into_values().collect())
    }
}

/// Injected bounds for the traversal.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub max_files: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_files: 2000,
        }
    }
}

/// Result of a capped marker scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerScan {
    pub files_scanned: usize,
    pub matches: usize,
    /// True when the file cap was hit before the tree was exhausted.
    pub truncated: bool,
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn is_skipped_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| SKIPPED_DIRS.contains(&name))
        .unwrap_or(false)
}

/// Count regex matches across source files under `root`, breadth first,
/// stopping at the injected depth and file caps.
pub fn count_markers(
    fs: &dyn FileSystem,
    root: &Path,
    limits: ScanLimits,
    pattern: &Regex,
) -> MarkerScan {
    let mut scan = MarkerScan::default();
    let mut worklist: VecDeque<(PathBuf, usize)> = VecDeque::new();
    worklist.push_back((root.to_path_buf(), 0));

    while let Some((dir, depth)) = worklist.pop_front() {
        let entries = match fs.list_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries {
            if entry.is_dir {
                if depth + 1 <= limits.max_depth && !is_skipped_dir(&entry.path) {
                    worklist.push_back((entry.path, depth + 1));
                }
                continue;
            }
            if !is_source_file(&entry.path) {
                continue;
            }
            if scan.files_scanned >= limits.max_files {
                scan.truncated = true;
                return scan;
            }
            scan.files_scanned += 1;
            if let Ok(content) = fs.read_to_string(&entry.path) {
                scan.matches += pattern.find_iter(&content).count();
            }
        }
    }
    scan
}

/// True if any of `names` exists directly under `root`.
pub fn any_exists(fs: &dyn FileSystem, root: &Path, names: &[&str]) -> bool {
    names.iter().any(|name| fs.exists(&root.join(name)))
}

/// Read a file under `root` and check it contains `needle`. Missing files
/// read as not containing.
pub fn file_contains(fs: &dyn FileSystem, root: &Path, name: &str, needle: &str) -> bool {
    fs.read_to_string(&root.join(name))
        .map(|content| content.contains(needle))
        .unwrap_or(false)
}

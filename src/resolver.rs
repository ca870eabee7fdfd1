use std::fs;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use miette::{miette, IntoDiagnostic, Result};

/// Supplies file contents and canonical paths to the preprocessor.
///
/// Both operations may fail; errors propagate to the caller unchanged.
pub trait FileResolver {
    fn file_contents(&self, path: &str) -> Result<String>;
    fn canonical_path(&self, path: &str) -> Result<String>;
}

/// Resolver over the host filesystem. Relative paths are resolved against a
/// base directory (usually the directory of the program's main file).
pub struct DiskResolver {
    base: PathBuf,
}

impl DiskResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DiskResolver { base: base.into() }
    }

    /// Resolver rooted at the parent directory of `file`.
    pub fn for_file(file: &Path) -> Self {
        let base = file.parent().unwrap_or(Path::new(".")).to_path_buf();
        DiskResolver { base }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

impl FileResolver for DiskResolver {
    fn file_contents(&self, path: &str) -> Result<String> {
        fs::read_to_string(self.resolve(path)).into_diagnostic()
    }

    fn canonical_path(&self, path: &str) -> Result<String> {
        let full = self.resolve(path).canonicalize().into_diagnostic()?;
        Ok(full.to_string_lossy().into_owned())
    }
}

/// In-memory resolver keyed by exact path. Used by tests and by hosts that
/// already hold sources (editors, fixtures).
#[derive(Default)]
pub struct MemoryResolver {
    files: FxHashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl FileResolver for MemoryResolver {
    fn file_contents(&self, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| miette!("No such file: {path}"))
    }

    fn canonical_path(&self, path: &str) -> Result<String> {
        if self.files.contains_key(path) {
            Ok(path.to_string())
        } else {
            Err(miette!("No such file: {path}"))
        }
    }
}

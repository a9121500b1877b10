use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// An image file found by the walk. `key` is the path as text; it is exact
/// because paths that are not valid UTF-8 are never yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub key: String,
}

/// Lazy stream of image files under a root, in a stable order (directory
/// entries sorted by file name, depth first). Symlinks are not followed.
/// Entries that cannot be read, and paths that cannot be stored as text,
/// are skipped and counted.
pub struct Candidates {
    walker: walkdir::IntoIter,
    extensions: Vec<String>,
    walk_errors: usize,
    non_utf8_paths: usize,
}

impl Candidates {
    pub fn walk_errors(&self) -> usize {
        self.walk_errors
    }

    pub fn non_utf8_paths(&self) -> usize {
        self.non_utf8_paths
    }
}

impl Iterator for Candidates {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            match self.walker.next()? {
                Ok(entry) => {
                    if !entry.file_type().is_file() || !has_extension(entry.path(), &self.extensions) {
                        continue;
                    }
                    match entry.path().to_str() {
                        Some(key) => {
                            let key = key.to_owned();
                            return Some(Candidate {
                                path: entry.into_path(),
                                key,
                            });
                        }
                        None => {
                            warn!(path = ?entry.path(), "Skipping path that is not valid UTF-8");
                            self.non_utf8_paths += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    self.walk_errors += 1;
                }
            }
        }
    }
}

pub fn discover_images(directory: &Path, extensions: &[String]) -> Candidates {
    Candidates {
        walker: WalkDir::new(directory)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
        extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        walk_errors: 0,
        non_utf8_paths: 0,
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.contains(&ext))
}

//! CI file discovery.

use stagehand_core::{Error, Result};
use std::path::{Path, PathBuf};

pub const GITLAB_CI_FILENAME: &str = ".gitlab-ci.yml";

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Locate the GitLab CI file under `root`.
///
/// `root/.gitlab-ci.yml` wins; otherwise subdirectories are searched
/// depth-first in name order.
pub fn find_ci_file(root: &Path) -> Result<PathBuf> {
    search(root)?.ok_or_else(|| Error::CiFileNotFound(root.to_path_buf()))
}

fn search(dir: &Path) -> Result<Option<PathBuf>> {
    let candidate = dir.join(GITLAB_CI_FILENAME);
    if candidate.is_file() {
        return Ok(Some(candidate));
    }

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if SKIPPED_DIRS.iter().any(|s| name == *s) {
            continue;
        }
        subdirs.push(entry.path());
    }
    subdirs.sort();

    for subdir in subdirs {
        if let Some(found) = search(&subdir)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_finds_file_at_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(GITLAB_CI_FILENAME), "stages: []\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join(GITLAB_CI_FILENAME), "").unwrap();

        let found = find_ci_file(dir.path()).unwrap();
        assert_eq!(found, dir.path().join(GITLAB_CI_FILENAME));
    }

    #[test]
    fn test_finds_nested_file_in_name_order() {
        let dir = TempDir::new().unwrap();
        for sub in ["b", "a/deep"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join(GITLAB_CI_FILENAME), "").unwrap();
        }

        let found = find_ci_file(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("a/deep").join(GITLAB_CI_FILENAME));
    }

    #[test]
    fn test_skips_vendored_dirs() {
        let dir = TempDir::new().unwrap();
        let vendored = dir.path().join("node_modules/pkg");
        fs::create_dir_all(&vendored).unwrap();
        fs::write(vendored.join(GITLAB_CI_FILENAME), "").unwrap();

        let err = find_ci_file(dir.path()).unwrap_err();
        assert!(matches!(err, Error::CiFileNotFound(p) if p == dir.path()));
    }
}

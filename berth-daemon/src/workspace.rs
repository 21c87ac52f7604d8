//! Per-job directories on the host
//!
//! Every job id owns `{working_dir}/{job_id}` (its uploaded bundle) and
//! optionally `{archive_dir}/{job_id}` (whatever the job archived).
//! Scheduled jobs get a fresh copy of the base job's working directory for
//! every firing.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Host directories holding job working directories and archives
#[derive(Debug, Clone)]
pub struct Workspace {
    working_dir: PathBuf,
    archive_dir: PathBuf,
}

impl Workspace {
    pub fn new(working_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// # Errors
    /// `InvalidInput` if the job id is not a plain directory name
    pub fn job_dir(&self, job_id: &str) -> io::Result<PathBuf> {
        child_of(&self.working_dir, job_id)
    }

    /// # Errors
    /// `InvalidInput` if the job id is not a plain directory name
    pub fn archive_path(&self, job_id: &str) -> io::Result<PathBuf> {
        child_of(&self.archive_dir, job_id)
    }

    /// Returns true if the job's working directory exists
    pub fn has_job_dir(&self, job_id: &str) -> bool {
        self.job_dir(job_id).is_ok_and(|dir| dir.is_dir())
    }

    /// Copies the working directory of `from` to a fresh one for `to`
    ///
    /// Any existing directory for `to` is replaced.
    pub fn copy_job_dir(&self, from: &str, to: &str) -> io::Result<()> {
        let source = self.job_dir(from)?;
        let target = self.job_dir(to)?;

        remove_path(&target)?;
        copy_tree(&source, &target)?;

        debug!("Copied {} to {}", source.display(), target.display());
        Ok(())
    }

    /// Removes the job's working directory; returns whether it existed
    pub fn remove_job_dir(&self, job_id: &str) -> io::Result<bool> {
        remove_path(&self.job_dir(job_id)?)
    }

    /// Removes the job's archive; returns whether it existed
    pub fn remove_archive(&self, job_id: &str) -> io::Result<bool> {
        remove_path(&self.archive_path(job_id)?)
    }
}

/// Returns true if `job_id` names exactly one directory below a base
///
/// Absolute paths, `.`, `..` and anything with a separator are refused, so a
/// job id can never point outside the working or archive directory.
pub fn is_valid_job_id(job_id: &str) -> bool {
    if job_id.trim().is_empty() {
        return false;
    }
    let mut components = Path::new(job_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == job_id
    )
}

fn child_of(base: &Path, job_id: &str) -> io::Result<PathBuf> {
    if !is_valid_job_id(job_id) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not a valid job id", job_id),
        ));
    }
    Ok(base.join(job_id))
}

fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace(root: &TempDir) -> Workspace {
        Workspace::new(root.path().join("working"), root.path().join("archives"))
    }

    #[test]
    fn test_copy_job_dir_replaces_stale_copy() {
        let root = TempDir::new().unwrap();
        let workspace = workspace(&root);

        let base = workspace.job_dir("base").unwrap();
        fs::create_dir_all(base.join("src")).unwrap();
        fs::write(base.join("main.py"), "print('hi')").unwrap();
        fs::write(base.join("src/lib.py"), "x = 1").unwrap();

        let stale = workspace.job_dir("base_1").unwrap();
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.txt"), "stale").unwrap();

        workspace.copy_job_dir("base", "base_1").unwrap();

        assert_eq!(
            fs::read_to_string(stale.join("main.py")).unwrap(),
            "print('hi')"
        );
        assert_eq!(fs::read_to_string(stale.join("src/lib.py")).unwrap(), "x = 1");
        assert!(!stale.join("old.txt").exists());
        // The base bundle is untouched
        assert!(base.join("main.py").exists());
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let root = TempDir::new().unwrap();
        assert!(workspace(&root).copy_job_dir("missing", "copy").is_err());
    }

    #[test]
    fn test_remove_reports_existence() {
        let root = TempDir::new().unwrap();
        let workspace = workspace(&root);

        fs::create_dir_all(workspace.job_dir("job").unwrap()).unwrap();
        assert!(workspace.has_job_dir("job"));
        assert!(workspace.remove_job_dir("job").unwrap());
        assert!(!workspace.remove_job_dir("job").unwrap());
        assert!(!workspace.has_job_dir("job"));

        fs::create_dir_all(root.path().join("archives")).unwrap();
        fs::write(workspace.archive_path("job").unwrap(), "tarball").unwrap();
        assert!(workspace.remove_archive("job").unwrap());
        assert!(!workspace.archive_path("job").unwrap().exists());
    }

    #[test]
    fn test_job_id_must_be_a_plain_name() {
        assert!(is_valid_job_id("train"));
        assert!(is_valid_job_id("3f2a9c1e-0000_1700000000"));
        assert!(is_valid_job_id("v1.2"));

        for bad in ["", "  ", ".", "..", "/tmp/victim", "a/b", "../up", "a/", "./a"] {
            assert!(!is_valid_job_id(bad), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_invalid_job_id_never_touches_host_paths() {
        let root = TempDir::new().unwrap();
        let workspace = workspace(&root);

        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("precious.txt"), "keep").unwrap();
        let outside_id = outside.path().display().to_string();

        let other = workspace.job_dir("other").unwrap();
        fs::create_dir_all(&other).unwrap();

        for bad in [outside_id.as_str(), ".", ".."] {
            let err = workspace.remove_job_dir(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            assert!(workspace.remove_archive(bad).is_err());
            assert!(workspace.copy_job_dir("other", bad).is_err());
            assert!(!workspace.has_job_dir(bad));
        }

        assert!(outside.path().join("precious.txt").exists());
        assert!(other.is_dir());
    }
}

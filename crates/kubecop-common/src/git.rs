//! Repository discovery for locating scenario manifests

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::debug;

/// Working-tree root of the git repository containing `start`, if any
pub fn toplevel(start: &Path) -> Option<PathBuf> {
    match Repository::discover(start) {
        Ok(repo) => repo.workdir().map(Path::to_path_buf),
        Err(e) => {
            debug!(path = %start.display(), error = %e, "not inside a git repository");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toplevel_of_fresh_repo_is_its_workdir() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let top = toplevel(&nested).unwrap();
        assert_eq!(
            top.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn toplevel_outside_repo_is_none() {
        let dir = tempfile::tempdir().unwrap();
        // tempdirs may live under a repository on some machines; only assert
        // when discovery stops at the filesystem root
        if Repository::discover(dir.path()).is_err() {
            assert!(toplevel(dir.path()).is_none());
        }
    }
}

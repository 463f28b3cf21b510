//! Thin wrapper over the external `git` binary. Business logic never calls
//! git directly; everything routes through [`Git`] so the repository stays
//! usable without version control (operations degrade to no-ops when git or
//! the work tree is absent).

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use scs_core::error::{Result, ScsError};
use tracing::debug;

pub struct Git {
    repo: PathBuf,
}

impl Git {
    pub fn new(repo: impl AsRef<Path>) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
        }
    }

    /// Whether git can operate here: binary present and `.git` exists.
    pub fn available(&self) -> bool {
        which::which("git").is_ok() && self.repo.join(".git").exists()
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, repo = %self.repo.display(), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|e| ScsError::remote(format!("failed to run git: {}", e)))?;
        Ok(output)
    }

    fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(ScsError::remote(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// `git init` plus an initial commit; used when creating a repository.
    pub fn init(&self) -> Result<()> {
        self.run_ok(&["init", "-q"])?;
        Ok(())
    }

    /// Whether the work tree (or any submodule) has uncommitted changes.
    pub fn has_changes(&self) -> Result<bool> {
        Ok(!self.run_ok(&["status", "--porcelain"])?.trim().is_empty())
    }

    /// Diff against the working branch, a named branch, or the upstream.
    pub fn diff(&self, target: Option<&str>) -> Result<String> {
        match target {
            Some(t) => self.run_ok(&["diff", t]),
            None => self.run_ok(&["diff", "HEAD"]),
        }
    }

    /// Decorated one-line log.
    pub fn log(&self, limit: usize) -> Result<String> {
        self.run_ok(&["log", "--oneline", "--decorate", &format!("-{}", limit)])
    }

    /// Verbose status with ahead/behind counts against the tracking branch.
    pub fn status(&self) -> Result<String> {
        let mut out = self.run_ok(&["status", "--short", "--branch"])?;
        if let Some(upstream) = self.tracking_branch()? {
            let counts = self.run_ok(&[
                "rev-list",
                "--left-right",
                "--count",
                &format!("{}...HEAD", upstream),
            ])?;
            let mut it = counts.split_whitespace();
            if let (Some(behind), Some(ahead)) = (it.next(), it.next()) {
                out.push_str(&format!(
                    "tracking {}: ahead {}, behind {}\n",
                    upstream, ahead, behind
                ));
            }
        }
        Ok(out)
    }

    /// Stage and commit everything, submodules first.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        // submodule work trees must be committed before the superproject
        // records their new revisions
        let _ = self.run(&[
            "submodule",
            "foreach",
            "--recursive",
            &format!("git add -A && git diff --cached --quiet || git commit -m '{}'", message),
        ]);
        self.run_ok(&["add", "-A"])?;
        let staged = self.run(&["diff", "--cached", "--quiet"])?;
        if !staged.status.success() {
            self.run_ok(&["commit", "-q", "-m", message])?;
        }
        Ok(())
    }

    /// Discard the working tree, recursively into submodules.
    pub fn discard_all(&self) -> Result<()> {
        let _ = self.run(&[
            "submodule",
            "foreach",
            "--recursive",
            "git checkout -- . && git clean -fd",
        ]);
        self.run_ok(&["checkout", "--", "."])?;
        self.run_ok(&["clean", "-fdq"])?;
        Ok(())
    }

    /// Tracking branch in `remote/branch` form, if configured.
    pub fn tracking_branch(&self) -> Result<Option<String>> {
        let output = self.run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Push to the upstream tracking branch. Pushing to `origin/master` is
    /// refused; release history flows through working branches.
    pub fn push_tracking(&self) -> Result<()> {
        let Some(upstream) = self.tracking_branch()? else {
            return Err(ScsError::validation(
                "no upstream tracking branch is configured; not pushing",
            ));
        };
        if upstream == "origin/master" {
            return Err(ScsError::validation(
                "refusing to push directly to origin/master",
            ));
        }
        self.run_ok(&["push", "-q"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_repo() -> Option<(TempDir, Git)> {
        if which::which("git").is_err() {
            return None;
        }
        let dir = TempDir::new().unwrap();
        let git = Git::new(dir.path());
        git.init().unwrap();
        // identity so commit works in a bare environment
        git.run_ok(&["config", "user.email", "scs@test"]).unwrap();
        git.run_ok(&["config", "user.name", "scs"]).unwrap();
        Some((dir, git))
    }

    #[test]
    fn test_unavailable_without_dot_git() {
        let dir = TempDir::new().unwrap();
        assert!(!Git::new(dir.path()).available());
    }

    #[test]
    fn test_commit_and_log() {
        let Some((dir, git)) = git_repo() else { return };
        std::fs::write(dir.path().join("system"), "web01,...\n").unwrap();
        assert!(git.has_changes().unwrap());
        git.commit_all("add web01").unwrap();
        assert!(!git.has_changes().unwrap());
        assert!(git.log(5).unwrap().contains("add web01"));
    }

    #[test]
    fn test_commit_all_without_changes_is_noop() {
        let Some((_dir, git)) = git_repo() else { return };
        git.commit_all("empty").unwrap();
    }

    #[test]
    fn test_discard_all() {
        let Some((dir, git)) = git_repo() else { return };
        std::fs::write(dir.path().join("system"), "one\n").unwrap();
        git.commit_all("seed").unwrap();
        std::fs::write(dir.path().join("system"), "two\n").unwrap();
        std::fs::write(dir.path().join("stray"), "x\n").unwrap();
        git.discard_all().unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("system")).unwrap(), "one\n");
        assert!(!dir.path().join("stray").exists());
    }

    #[test]
    fn test_push_without_upstream_is_validation_error() {
        let Some((dir, git)) = git_repo() else { return };
        std::fs::write(dir.path().join("system"), "one\n").unwrap();
        git.commit_all("seed").unwrap();
        assert!(matches!(git.push_tracking(), Err(ScsError::Validation(_))));
    }
}

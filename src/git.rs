//! Ephemeral git checkouts for repository sources.
//!
//! Branch and tag references get a shallow single-branch clone; references
//! that look like commit identifiers (7–40 hex chars) need history, so they
//! get a full clone followed by a detached checkout. Hooks are disabled on
//! every invocation, and the working copy lives in a [`TempDir`] that is
//! removed when the checkout is dropped, success or failure.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A checked-out working copy, removed on drop.
pub struct GitCheckout {
    dir: TempDir,
}

impl GitCheckout {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Clone `url` at `reference` (default branch when `None`) into a temp dir.
pub fn checkout(url: &str, reference: Option<&str>) -> Result<GitCheckout> {
    let dir = TempDir::new().with_context(|| "Failed to create checkout directory")?;
    let dest = dir.path().join("repo");

    match reference {
        Some(r) if is_commit_sha(r) => {
            run_git(None, &clone_args(url, &dest, &[]))?;
            run_git(Some(&dest), &["checkout", "--detach", r])?;
        }
        Some(r) => {
            run_git(
                None,
                &clone_args(url, &dest, &["--depth", "1", "--branch", r, "--single-branch"]),
            )?;
        }
        None => {
            run_git(None, &clone_args(url, &dest, &["--depth", "1", "--single-branch"]))?;
        }
    }

    Ok(GitCheckout { dir })
}

/// The root of the working tree inside a checkout directory.
pub fn worktree(checkout: &GitCheckout) -> PathBuf {
    checkout.path().join("repo")
}

fn clone_args<'a>(url: &'a str, dest: &'a Path, extra: &[&'a str]) -> Vec<String> {
    let mut args = vec!["clone".to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    args.push(url.to_string());
    args.push(dest.to_string_lossy().to_string());
    args
}

fn run_git<S: AsRef<str>>(cwd: Option<&Path>, args: &[S]) -> Result<()> {
    let mut cmd = Command::new("git");
    // Hooks stay off for every operation against untrusted repos.
    cmd.args(["-c", "core.hooksPath="]);
    for arg in args {
        cmd.arg(arg.as_ref());
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .with_context(|| "Failed to execute git. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0].as_ref(), stderr.trim());
    }

    Ok(())
}

/// Whether a reference looks like a commit identifier: 7–40 hex characters.
pub fn is_commit_sha(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("abc1234"));
        assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("v1.2.3"));
        assert!(!is_commit_sha("abc123")); // too short
        assert!(!is_commit_sha("release/abc1234"));
    }

    #[test]
    fn test_checkout_local_repo() {
        // Build a throwaway repo and clone it by path.
        let src = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(src.path())
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@t")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@t")
                .output()
                .unwrap();
            assert!(status.status.success(), "git {:?} failed", args);
        };
        run(&["init"]);
        run(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(src.path().join("docdex.json"), "{}").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);

        let url = src.path().to_string_lossy().to_string();
        let checkout = checkout(&url, Some("main")).unwrap();
        assert!(worktree(&checkout).join("docdex.json").exists());

        let gone = worktree(&checkout);
        drop(checkout);
        assert!(!gone.exists(), "working copy must be removed on drop");
    }
}

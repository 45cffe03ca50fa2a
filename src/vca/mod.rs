//! Version-control adapter (§4.2): all repository-level primitives, wrapping
//! `git` through the [`crate::shell::ShellExecutor`]. Every operation takes
//! an explicit repository directory rather than relying on an implicit
//! current directory (see the "no chdir" design note, §9): arguments are
//! passed to `git` as `-C <dir>`.

pub mod synth;

use anyhow::{Context, Result};
use slog::Logger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::VcaError;
use crate::shell::ShellExecutor;

/// The sentinel branch that holds HEAD between short-lived branch
/// operations, so creating/deleting scratch branches never fights with
/// whatever happens to be checked out.
pub const PARKING_BRANCH: &str = "parking";

/// One commit as enumerated by [`GitVca::list_commits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub parents: Vec<String>,
    pub body: String,
}

impl CommitInfo {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// The `Change-Id: ...` trailer value, if the body carries one.
    pub fn change_id(&self) -> Option<String> {
        self.body
            .lines()
            .find_map(|line| line.trim().strip_prefix("Change-Id:").map(|v| v.trim().to_string()))
    }
}

/// Concrete version-control adapter shelling out to `git`.
#[derive(Clone)]
pub struct GitVca {
    pub(crate) shell: ShellExecutor,
    pub(crate) logger: Logger,
}

impl GitVca {
    pub fn new(logger: Logger) -> Self {
        Self {
            shell: ShellExecutor::new(),
            logger,
        }
    }

    fn git(&self, dir: &Path, args: &[&str]) -> Result<crate::shell::ShellOutput> {
        self.shell.run_in(&self.logger, dir, "git", args)
    }

    fn git_ok(&self, dir: &Path, args: &[&str]) -> Result<crate::shell::ShellOutput> {
        let out = self.git(dir, args)?;
        if !out.success() {
            anyhow::bail!(VcaError::Shell {
                command: format!("git {}", args.join(" ")),
                code: out.status,
                stderr: out.stderr_joined(),
            });
        }
        Ok(out)
    }

    /// Whether `url` answers a ref advertisement, without touching any local
    /// clone. Used by the `doctor` subcommand, which must validate remotes
    /// without creating or mutating a working repository.
    pub fn remote_reachable(&self, url: &str) -> bool {
        self.shell
            .run(&self.logger, "git", &["ls-remote", "--exit-code", url])
            .map(|out| out.success())
            .unwrap_or(false)
    }

    /// Ensure a repository exists at `dir` with the `parking` sentinel
    /// branch checked out. Idempotent.
    pub fn init(&self, dir: &Path) -> Result<()> {
        if !dir.join(".git").exists() {
            std::fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
            self.git_ok(dir, &["init"])?;
        }
        let checkout = self.git(dir, &["checkout", PARKING_BRANCH])?;
        if !checkout.success() {
            self.git_ok(dir, &["checkout", "--orphan", PARKING_BRANCH])?;
            self.git_ok(dir, &["commit", "--allow-empty", "-m", "parking"])?;
        }
        Ok(())
    }

    /// Register `name` -> `url` as a remote, optionally fetching it. For
    /// review-server remotes (`is_review_server`) additionally fetches
    /// `refs/changes/*` into `remotes/<name>/changes/*`.
    pub fn add_remote(&self, dir: &Path, name: &str, url: &str, fetch: bool, is_review_server: bool) -> Result<()> {
        let remotes = self.git(dir, &["remote"])?;
        if !remotes.stdout.iter().any(|r| r == name) {
            self.git_ok(dir, &["remote", "add", name, url])?;
        }
        if fetch {
            let out = self.git(dir, &["fetch", name]);
            match out {
                Ok(o) if o.success() => {}
                _ => {
                    return Err(VcaError::RemoteFetch {
                        remote: name.to_string(),
                        detail: "initial fetch failed".into(),
                    }
                    .into())
                }
            }
            if is_review_server {
                let refspec = format!("+refs/changes/*:refs/remotes/{name}/changes/*");
                self.git_ok(dir, &["fetch", name, &refspec])?;
            }
        }
        Ok(())
    }

    pub fn resolve_revision(&self, dir: &Path, reference: &str) -> Result<String> {
        let out = self.git_ok(dir, &["rev-parse", reference])?;
        out.stdout
            .first()
            .cloned()
            .context("git rev-parse produced no output")
    }

    /// Full commit message body at `revision`, used to recover a
    /// previously-uploaded recombination's metadata (§6) from its commit.
    pub fn commit_message(&self, dir: &Path, revision: &str) -> Result<String> {
        let out = self.git_ok(dir, &["show", "-s", "--pretty=%B", revision])?;
        Ok(out.stdout.join("\n"))
    }

    /// Rewrites `revision`'s commit message in place (tree and parents
    /// unchanged) and returns the new commit's hash, for amending a
    /// recombination's metadata without re-running synthesis (§4.5.3
    /// APPROVED, backport-proposal bookkeeping).
    pub fn amend_commit_message(&self, dir: &Path, revision: &str, message: &str) -> Result<String> {
        self.git_ok(dir, &["checkout", "--detach", revision])?;
        let msg_path = dir.join(".git").join("AMEND_MSG");
        std::fs::write(&msg_path, message).context("failed to write amended commit message")?;
        let path = msg_path.to_string_lossy().to_string();
        let commit = self.git(dir, &["commit", "--amend", "-F", &path]);
        let _ = std::fs::remove_file(&msg_path);
        commit?;
        let amended = self.resolve_revision(dir, "HEAD");
        self.git(dir, &["checkout", PARKING_BRANCH])?;
        amended
    }

    /// Enumerate commits in `start..end`. Does not recurse into merge-commit
    /// sub-history (§4.5.1 does that as an explicit, bounded second pass).
    pub fn list_commits(
        &self,
        dir: &Path,
        start: &str,
        end: &str,
        first_parent: bool,
        reverse: bool,
        no_merges: bool,
    ) -> Result<Vec<CommitInfo>> {
        let range = format!("{start}..{end}");
        let mut args = vec!["rev-list", "--pretty=%H"];
        if reverse {
            args.push("--reverse");
        }
        if first_parent {
            args.push("--first-parent");
        }
        if no_merges {
            args.push("--no-merges");
        }
        args.push(&range);
        let out = self.git_ok(dir, &args)?;

        let hashes: Vec<String> = out
            .stdout
            .iter()
            .filter(|line| !line.starts_with("commit "))
            .cloned()
            .collect();

        let mut commits = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let parents_out = self.git_ok(dir, &["show", "-s", "--pretty=%P", &hash])?;
            let parents = parents_out
                .stdout
                .first()
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            let body_out = self.git_ok(dir, &["show", "-s", "--pretty=%B", &hash])?;
            let body = body_out.stdout.join("\n");
            commits.push(CommitInfo { hash, parents, body });
        }
        Ok(commits)
    }

    pub fn list_branches(&self, dir: &Path, remote: &str, pattern: Option<&str>) -> Result<Vec<String>> {
        let refname = match pattern {
            Some(p) => format!("refs/remotes/{remote}/{p}"),
            None => format!("refs/remotes/{remote}/"),
        };
        let out = self.git_ok(dir, &["for-each-ref", "--format=%(refname)", &refname])?;
        let prefix = format!("refs/remotes/{remote}/");
        Ok(out
            .stdout
            .into_iter()
            .filter_map(|r| r.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    pub fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        self.git(dir, &["checkout", PARKING_BRANCH])?;
        self.git(dir, &["branch", "-D", branch])?;
        Ok(())
    }

    pub fn delete_remote_branches(&self, dir: &Path, remote: &str, branches: &[String]) -> Result<()> {
        for branch in branches {
            let refspec = format!(":{branch}");
            self.git(dir, &["push", remote, &refspec])?;
        }
        Ok(())
    }

    pub fn track_branch(&self, dir: &Path, local: &str, remote_ref: &str) -> Result<()> {
        self.git(dir, &["checkout", PARKING_BRANCH])?;
        self.git_ok(dir, &["branch", "--track", local, remote_ref])?;
        Ok(())
    }

    /// Fast-forward-merges `revision` into a local tracking branch of
    /// `replica_branch` and pushes it back.
    pub fn sync_replica(&self, dir: &Path, remote: &str, replica_branch: &str, revision: &str) -> Result<()> {
        self.git(dir, &["fetch", remote])?;
        let local = format!("replica-{replica_branch}");
        let remote_ref = format!("remotes/{remote}/{replica_branch}");
        let _ = self.git(dir, &["branch", "--track", &local, &remote_ref]);
        self.git_ok(dir, &["checkout", &local])?;
        let merge = self.git(dir, &["merge", "--ff-only", revision])?;
        if !merge.success() {
            self.git(dir, &["checkout", PARKING_BRANCH])?;
            return Err(VcaError::Merge {
                branch: replica_branch.to_string(),
                revision: revision.to_string(),
                detail: merge.stderr_joined(),
            }
            .into());
        }
        let refspec = format!("HEAD:{replica_branch}");
        let push = self.git(dir, &["push", remote, &refspec])?;
        self.git(dir, &["checkout", PARKING_BRANCH])?;
        self.git(dir, &["branch", "-D", &local])?;
        if !push.success() {
            return Err(VcaError::Push {
                remote: remote.to_string(),
                branch: replica_branch.to_string(),
                detail: push.stderr_joined(),
            }
            .into());
        }
        Ok(())
    }

    /// Force-pushes `replacement_branch` to `target_branch` and deletes the
    /// replacement branch afterward.
    pub fn update_target_branch(&self, dir: &Path, remote: &str, replacement_branch: &str, target_branch: &str) -> Result<()> {
        let refspec = format!("{replacement_branch}:{target_branch}");
        let push = self.git_ok(dir, &["push", "-f", remote, &refspec])?;
        let _ = push;
        self.delete_remote_branches(dir, remote, &[replacement_branch.to_string()])?;
        Ok(())
    }

    /// For each untested recombination, checks out its `refs/changes` ref
    /// and copies the working tree (without `.git`) into
    /// `<fetch_dir>/<number>/code`, the test-artifact layout's `code/`
    /// directory (§6). Returns the `<fetch_dir>/<number>` directory itself,
    /// since the caller also writes `vars.yaml` and reads `results/` there.
    pub fn fetch_recomb(
        &self,
        dir: &Path,
        fetch_dir: &Path,
        list: &[(String, String, String)], // (number, patchset, last-two-digits)
        remote: &str,
    ) -> Result<HashMap<String, PathBuf>> {
        let mut result = HashMap::new();
        self.git(dir, &["checkout", PARKING_BRANCH])?;
        for (number, patchset, last_two) in list {
            let recomb_dir = fetch_dir.join(number);
            let code_dir = recomb_dir.join("code");
            std::fs::create_dir_all(&code_dir)?;
            let recomb_ref = format!("remotes/{remote}/changes/{last_two}/{number}/{patchset}");
            self.git_ok(dir, &["checkout", &recomb_ref])?;
            copy_tree(dir, &code_dir)?;
            self.git(dir, &["checkout", PARKING_BRANCH])?;
            result.insert(number.clone(), recomb_dir);
        }
        Ok(result)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in walk_files(src)? {
        let rel = entry.strip_prefix(src).unwrap();
        if rel.starts_with(".git") {
            continue;
        }
        let target = dst.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&entry, &target)?;
        }
    }
    Ok(())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            out.push(path.clone());
            if path.is_dir() {
                stack.push(path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;
    use tempfile::tempdir;

    fn vca() -> GitVca {
        GitVca::new(discard_logger())
    }

    #[test]
    fn init_creates_parking_branch() {
        let dir = tempdir().unwrap();
        let adapter = vca();
        adapter.init(dir.path()).unwrap();
        let branch = adapter.git_ok(dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap();
        assert_eq!(branch.stdout.first().unwrap(), PARKING_BRANCH);
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempdir().unwrap();
        let adapter = vca();
        adapter.init(dir.path()).unwrap();
        adapter.init(dir.path()).unwrap();
    }

    #[test]
    fn resolve_revision_returns_full_hash() {
        let dir = tempdir().unwrap();
        let adapter = vca();
        adapter.init(dir.path()).unwrap();
        adapter.git_ok(dir.path(), &["checkout", "-b", "work"]).unwrap();
        std::fs::write(dir.path().join("f"), "1").unwrap();
        adapter.git_ok(dir.path(), &["add", "f"]).unwrap();
        adapter.git_ok(dir.path(), &["commit", "-m", "one"]).unwrap();
        let rev = adapter.resolve_revision(dir.path(), "work").unwrap();
        assert_eq!(rev.len(), 40);
    }

    #[test]
    fn list_commits_respects_first_parent_and_reverse() {
        let dir = tempdir().unwrap();
        let adapter = vca();
        adapter.init(dir.path()).unwrap();
        adapter.git_ok(dir.path(), &["checkout", "-b", "work"]).unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join("f"), i.to_string()).unwrap();
            adapter.git_ok(dir.path(), &["add", "f"]).unwrap();
            adapter
                .git_ok(dir.path(), &["commit", "-m", &format!("commit {i}\n\nChange-Id: I{i}")])
                .unwrap();
        }
        let commits = adapter
            .list_commits(dir.path(), PARKING_BRANCH, "work", true, true, false)
            .unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].change_id(), Some("I0".to_string()));
        assert_eq!(commits[2].change_id(), Some("I2".to_string()));
    }
}

//! The recombination synthesizer (§4.4): the three synthesis algorithms and
//! the iterative patch-eviction loop that resolves the narrow class of
//! conflicts caused by a patch whose effect is obsoleted upstream.

use anyhow::{Context, Result};
use std::path::Path;

use crate::commit_message::{self, RecombinationMetadata, SourcesBlock};
use crate::error::VcaError;
use crate::model::{Kind, RecombineStatus, ReplicationStrategy, SourceRef};
use crate::vca::{GitVca, PARKING_BRANCH};

/// Guidance shown to a human reviewer when cherry-pick synthesis conflicts;
/// reused verbatim by the engine's MISSING handler (§4.5.3) when it uploads
/// the failed attempt as a commented, `Verified: -1` review.
pub const CHERRYPICK_CONFLICT_HINT: &str = "automatic cherry-pick failed; resolve manually with \
`git review -d <number>`, `git cherry-pick -x <revision>`, fix conflicts, and re-upload, or comment \
`DISCARD` on this change to abandon the attempt";

/// Input to every synthesis algorithm: everything the synthesizer needs to
/// know about the two sources being combined.
#[derive(Debug, Clone)]
pub struct RecombineRequest {
    pub main: SourceRef,
    pub patches: SourceRef,
    pub replication_strategy: ReplicationStrategy,
    /// Only set for `change-by-change` (original-diversity, replica-mutation).
    pub target_replacement_branch: Option<String>,
    /// Commits that the eviction loop must never remove (algorithm M only).
    pub permanent_patches: Vec<String>,
    pub replica_remote: String,
}

/// Result of a successful synthesis attempt.
#[derive(Debug, Clone)]
pub struct RecombineOutcome {
    pub kind: Kind,
    pub recomb_branch: String,
    pub metadata: RecombinationMetadata,
    pub removed_commits: Vec<String>,
    /// Set when the eviction loop rewrote the patches branch; the caller
    /// must force-push this as the new `<patches-branch>` tip (already done
    /// by the synthesizer against `replica_remote`) and is informed here so
    /// it can update in-memory state.
    pub new_patches_revision: Option<String>,
}

impl GitVca {
    fn porcelain_status(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self.git(dir, &["status", "--porcelain"])?.stdout)
    }

    fn attempt_squash_merge(&self, dir: &Path, pick: &str, merge_rev: &str) -> Result<bool> {
        let out = self.git(dir, &["merge", "--squash", "--no-commit", pick, merge_rev])?;
        Ok(out.success())
    }

    fn write_recombination_commit(&self, dir: &Path, kind: Kind, metadata: &RecombinationMetadata) -> Result<String> {
        let message = commit_message::format_commit_message(kind, metadata)?;
        let msg_path = dir.join(".git").join("RECOMBINATION_MSG");
        std::fs::write(&msg_path, &message).context("failed to write recombination commit message")?;
        let path = msg_path.to_string_lossy().to_string();

        let commit = self.git(dir, &["commit", "-F", &path])?;
        let _ = std::fs::remove_file(&msg_path);
        if !commit.success() && commit.stdout_joined().contains("nothing to commit") {
            self.git_ok(dir, &["commit", "--allow-empty", "-F", &path])?;
            slog::warn!(self.logger, "upstream content merged twice, committing empty recombination";
                "revision" => metadata.sources.main.revision.clone());
        } else if !commit.success() {
            anyhow::bail!(VcaError::Attempt(format!("failed to commit recombination: {}", commit.stderr_joined())));
        }
        self.resolve_revision(dir, "HEAD")
    }

    /// Algorithm M (§4.4): merge-recombine for `original-diversity`.
    pub fn merge_recombine(&self, dir: &Path, request: &RecombineRequest, recomb_branch: &str) -> Result<RecombineOutcome> {
        self.git(dir, &["fetch", "replica"])?;
        self.git(dir, &["fetch", "original"])?;

        let pick = request.main.revision.clone();
        let pick_parent = format!("{pick}~1");
        let start = self.resolve_revision(dir, &pick_parent)?;
        let mut merge_rev = request.patches.revision.clone();
        let patches_branch = request.patches.branch.clone();

        let base_branch_name = format!("recomb_attempt-{patches_branch}-base");
        self.git_ok(dir, &["checkout", "-B", &base_branch_name, &merge_rev])?;
        self.git_ok(dir, &["checkout", "-B", recomb_branch, &start])?;

        let push = self.git(dir, &["push", &request.replica_remote, &format!("HEAD:{recomb_branch}")])?;
        if !push.success() {
            return Err(VcaError::Push {
                remote: request.replica_remote.clone(),
                branch: recomb_branch.to_string(),
                detail: push.stderr_joined(),
            }
            .into());
        }

        let mut clean = self.attempt_squash_merge(dir, &pick, &merge_rev)?;
        let mut removed: Vec<String> = Vec::new();

        if !clean {
            let mut prev_status = self.porcelain_status(dir)?;
            let ancestor = self
                .git_ok(dir, &["merge-base", &pick, &merge_rev])?
                .stdout
                .first()
                .cloned()
                .context("merge-base produced no output")?;

            let mut queue = self.rev_list_patches_queue(dir, &ancestor, &format!("remotes/replica/{patches_branch}"), &request.permanent_patches)?;

            while !clean && !queue.is_empty() {
                let candidate = queue.remove(0);

                self.git(dir, &["reset", "--hard", recomb_branch])?;
                self.git_ok(dir, &["checkout", &base_branch_name])?;
                let retry_branch = format!("recomb_attempt-{patches_branch}-retry-{candidate}", candidate = &candidate[..candidate.len().min(8)]);
                self.git_ok(dir, &["checkout", "-b", &retry_branch])?;
                let onto = format!("{candidate}^");
                self.git_ok(dir, &["rebase", "-p", "--onto", &onto, &candidate])?;
                let retry_merge = self.resolve_revision(dir, &retry_branch)?;

                self.git_ok(dir, &["checkout", recomb_branch])?;
                clean = self.attempt_squash_merge(dir, &pick, &retry_merge)?;

                if clean {
                    removed.push(candidate.clone());
                    merge_rev = retry_merge.clone();
                    let force_refspec = format!("{retry_branch}:refs/heads/{patches_branch}");
                    self.git(dir, &["push", "-f", &request.replica_remote, &force_refspec])?;
                } else {
                    let new_status = self.porcelain_status(dir)?;
                    if new_status != prev_status {
                        removed.push(candidate.clone());
                        self.git(dir, &["branch", "-D", &base_branch_name])?;
                        self.git_ok(dir, &["checkout", "-B", &base_branch_name, &retry_merge])?;
                        queue = self.rev_list_patches_queue(dir, &ancestor, &retry_branch, &request.permanent_patches)?;
                        prev_status = new_status;
                    }
                    self.git(dir, &["branch", "-D", &retry_branch])?;
                }
            }
        }

        if !clean {
            let status = self.porcelain_status(dir)?.join("\n");
            self.git(dir, &["push", &request.replica_remote, &format!(":{recomb_branch}")])?;
            self.git(dir, &["checkout", PARKING_BRANCH])?;
            return Err(VcaError::RecombinationFailed {
                status,
                hint: "patch eviction exhausted the candidate queue without a clean merge".to_string(),
            }
            .into());
        }

        let mut patches_source = request.patches.clone();
        patches_source.revision = merge_rev.clone();
        let metadata = RecombinationMetadata {
            sources: SourcesBlock {
                main: request.main.clone(),
                patches: patches_source,
            },
            replication_strategy: request.replication_strategy,
            recombine_status: RecombineStatus::Succeeded,
            target_replacement_branch: request.target_replacement_branch.clone(),
            patches_review: None,
            removed_commits: removed.clone(),
        };
        self.write_recombination_commit(dir, Kind::OriginalDiversity, &metadata)?;

        if let Some(target_replacement_branch) = &request.target_replacement_branch {
            self.git_ok(dir, &["checkout", "-B", target_replacement_branch, &start])?;
            self.git_ok(dir, &["merge", "--no-edit", &pick])?;
            self.git_ok(dir, &["merge", "--no-edit", &merge_rev])?;
            let refspec = format!("HEAD:{target_replacement_branch}");
            self.git_ok(dir, &["push", &request.replica_remote, &refspec])?;
        }

        self.git(dir, &["branch", "-D", &base_branch_name])?;
        self.git(dir, &["checkout", PARKING_BRANCH])?;

        Ok(RecombineOutcome {
            kind: Kind::OriginalDiversity,
            recomb_branch: recomb_branch.to_string(),
            metadata,
            removed_commits: removed,
            new_patches_revision: if merge_rev == request.patches.revision {
                None
            } else {
                Some(merge_rev)
            },
        })
    }

    fn rev_list_patches_queue(&self, dir: &Path, ancestor: &str, tip: &str, permanent: &[String]) -> Result<Vec<String>> {
        let range = format!("{ancestor}..{tip}");
        let out = self.git_ok(dir, &["rev-list", "--reverse", "--first-parent", &range])?;
        Ok(out
            .stdout
            .into_iter()
            .filter(|c| !permanent.contains(c))
            .collect())
    }

    /// Algorithm C (§4.4): cherry-pick-recombine for `evolution-diversity`.
    /// No eviction loop; a conflict is a terminal `RecombinationFailed`.
    pub fn cherrypick_recombine(&self, dir: &Path, request: &RecombineRequest, recomb_branch: &str) -> Result<RecombineOutcome> {
        self.git(dir, &["fetch", "replica"])?;
        self.git(dir, &["fetch", "original"])?;

        let patches_tip = format!("remotes/replica/{}", request.patches.branch);
        self.git_ok(dir, &["checkout", "-B", recomb_branch, &patches_tip])?;

        let push = self.git(dir, &["push", &request.replica_remote, &format!("HEAD:{recomb_branch}")])?;
        if !push.success() {
            return Err(VcaError::Push {
                remote: request.replica_remote.clone(),
                branch: recomb_branch.to_string(),
                detail: push.stderr_joined(),
            }
            .into());
        }

        let pick = &request.main.revision;
        let cherry = self.git(dir, &["cherry-pick", "-x", pick])?;

        if !cherry.success() {
            self.git(dir, &["cherry-pick", "--abort"])?;
            let status = self.porcelain_status(dir)?.join("\n");
            self.git(dir, &["push", &request.replica_remote, &format!(":{recomb_branch}")])?;
            self.git(dir, &["checkout", PARKING_BRANCH])?;
            return Err(VcaError::RecombinationFailed {
                status,
                hint: CHERRYPICK_CONFLICT_HINT.to_string(),
            }
            .into());
        }

        let upstream_url = request.main.url.as_deref().unwrap_or(&request.main.id);
        let mangled = request
            .patches
            .commit_message
            .as_deref()
            .map(|original| commit_message::mangle_cherrypick_message(original, &request.main.branch, upstream_url, pick));

        let mut patches_source = request.patches.clone();
        patches_source.commit_message = mangled;

        let metadata = RecombinationMetadata {
            sources: SourcesBlock {
                main: request.main.clone(),
                patches: patches_source,
            },
            replication_strategy: request.replication_strategy,
            recombine_status: RecombineStatus::Succeeded,
            target_replacement_branch: None,
            patches_review: None,
            removed_commits: Vec::new(),
        };

        self.git(dir, &["checkout", PARKING_BRANCH])?;

        Ok(RecombineOutcome {
            kind: Kind::EvolutionDiversity,
            recomb_branch: recomb_branch.to_string(),
            metadata,
            removed_commits: Vec::new(),
            new_patches_revision: None,
        })
    }

    /// Algorithm X (§4.4): mutation-recombine for `replica-mutation`. Same
    /// framing as algorithm M but without the eviction loop: a conflict is
    /// terminal, signaling the mutation is unsafe to submit as-is.
    pub fn mutation_recombine(&self, dir: &Path, request: &RecombineRequest, recomb_branch: &str) -> Result<RecombineOutcome> {
        self.git(dir, &["fetch", "replica"])?;

        let pick = request.main.revision.clone();
        let pick_parent = format!("{pick}~1");
        let start = self.resolve_revision(dir, &pick_parent)?;
        let merge_rev = request.patches.revision.clone();

        self.git_ok(dir, &["checkout", "-B", recomb_branch, &start])?;
        let push = self.git(dir, &["push", &request.replica_remote, &format!("HEAD:{recomb_branch}")])?;
        if !push.success() {
            return Err(VcaError::Push {
                remote: request.replica_remote.clone(),
                branch: recomb_branch.to_string(),
                detail: push.stderr_joined(),
            }
            .into());
        }

        let clean = self.attempt_squash_merge(dir, &pick, &merge_rev)?;
        if !clean {
            let status = self.porcelain_status(dir)?.join("\n");
            self.git(dir, &["push", &request.replica_remote, &format!(":{recomb_branch}")])?;
            self.git(dir, &["checkout", PARKING_BRANCH])?;
            return Err(VcaError::RecombinationFailed {
                status,
                hint: "mutation conflicts with the current replica tip; rebase the mutation and retry".to_string(),
            }
            .into());
        }

        let metadata = RecombinationMetadata {
            sources: SourcesBlock {
                main: request.main.clone(),
                patches: request.patches.clone(),
            },
            replication_strategy: request.replication_strategy,
            recombine_status: RecombineStatus::Succeeded,
            target_replacement_branch: request.target_replacement_branch.clone(),
            patches_review: None,
            removed_commits: Vec::new(),
        };
        self.write_recombination_commit(dir, Kind::ReplicaMutation, &metadata)?;

        if let Some(target_replacement_branch) = &request.target_replacement_branch {
            self.git_ok(dir, &["checkout", "-B", target_replacement_branch, &start])?;
            self.git_ok(dir, &["merge", "--no-edit", &pick])?;
            let refspec = format!("HEAD:{target_replacement_branch}");
            self.git_ok(dir, &["push", &request.replica_remote, &refspec])?;
        }

        self.git(dir, &["checkout", PARKING_BRANCH])?;

        Ok(RecombineOutcome {
            kind: Kind::ReplicaMutation,
            recomb_branch: recomb_branch.to_string(),
            metadata,
            removed_commits: Vec::new(),
            new_patches_revision: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;
    use crate::vca::GitVca;
    use tempfile::tempdir;

    fn init_bare_pair() -> (tempfile::TempDir, tempfile::TempDir) {
        let replica_bare = tempdir().unwrap();
        std::process::Command::new("git")
            .args(["init", "--bare"])
            .arg(replica_bare.path())
            .output()
            .unwrap();
        let original_bare = tempdir().unwrap();
        std::process::Command::new("git")
            .args(["init", "--bare"])
            .arg(original_bare.path())
            .output()
            .unwrap();
        (replica_bare, original_bare)
    }

    fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
        std::process::Command::new("git").args(["add", name]).current_dir(dir).output().unwrap();
        std::process::Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    #[test]
    fn clean_merge_produces_recombination_commit_with_expected_subject() {
        let adapter = GitVca::new(discard_logger());
        let dir = tempdir().unwrap();
        adapter.init(dir.path()).unwrap();

        adapter.git_ok(dir.path(), &["checkout", "-b", "master"]).unwrap();
        commit_file(dir.path(), "base.txt", "base", "base commit\n\nChange-Id: Ibase");
        let start = adapter.resolve_revision(dir.path(), "master").unwrap();
        commit_file(dir.path(), "upstream.txt", "new", "upstream change\n\nChange-Id: Iupstream");
        let pick = adapter.resolve_revision(dir.path(), "master").unwrap();

        adapter.git_ok(dir.path(), &["checkout", "-b", "master-patches", &start]).unwrap();
        commit_file(dir.path(), "patch.txt", "patch", "local patch\n\nChange-Id: Ipatch");
        let patches_rev = adapter.resolve_revision(dir.path(), "master-patches").unwrap();

        let (replica_bare, _original_bare) = init_bare_pair();
        adapter
            .git_ok(dir.path(), &["remote", "add", "replica", replica_bare.path().to_str().unwrap()])
            .unwrap();
        adapter.git_ok(dir.path(), &["push", "replica", "master-patches"]).unwrap();
        adapter.git_ok(dir.path(), &["checkout", PARKING_BRANCH]).unwrap();

        let request = RecombineRequest {
            main: SourceRef {
                name: "original".into(),
                branch: "master".into(),
                revision: pick.clone(),
                id: "Iupstream".into(),
                commit_message: None,
                url: None,
            },
            patches: SourceRef {
                name: "replica".into(),
                branch: "master-patches".into(),
                revision: patches_rev.clone(),
                id: patches_rev.clone(),
                commit_message: None,
                url: None,
            },
            replication_strategy: ReplicationStrategy::ChangeByChange,
            target_replacement_branch: None,
            permanent_patches: Vec::new(),
            replica_remote: "replica".into(),
        };

        let outcome = adapter.merge_recombine(dir.path(), &request, "recomb-original-master-test").unwrap();
        assert_eq!(outcome.kind, Kind::OriginalDiversity);
        assert!(outcome.removed_commits.is_empty());

        let head_branch = adapter
            .git_ok(dir.path(), &["rev-parse", "--abbrev-ref", "HEAD"])
            .unwrap();
        assert_eq!(head_branch.stdout.first().unwrap(), PARKING_BRANCH);

        let message = adapter
            .git_ok(dir.path(), &["show", "-s", "--pretty=%B", "recomb-original-master-test"])
            .unwrap();
        let full = message.stdout.join("\n");
        assert!(full.starts_with("Recombination: original-diversity:"));
    }

    #[test]
    fn cherrypick_recombine_mangles_patches_message_with_main_source_url() {
        let adapter = GitVca::new(discard_logger());
        let dir = tempdir().unwrap();
        adapter.init(dir.path()).unwrap();

        adapter.git_ok(dir.path(), &["checkout", "-b", "master"]).unwrap();
        commit_file(dir.path(), "base.txt", "base", "base commit\n\nChange-Id: Ibase");
        let start = adapter.resolve_revision(dir.path(), "master").unwrap();
        commit_file(dir.path(), "upstream.txt", "new", "upstream change\n\nChange-Id: Iupstream");
        let pick = adapter.resolve_revision(dir.path(), "master").unwrap();

        adapter.git_ok(dir.path(), &["checkout", "-b", "master-patches", &start]).unwrap();
        commit_file(dir.path(), "patch.txt", "patch", "local patch\n\nChange-Id: Ipatch");

        let (replica_bare, _original_bare) = init_bare_pair();
        adapter
            .git_ok(dir.path(), &["remote", "add", "replica", replica_bare.path().to_str().unwrap()])
            .unwrap();
        adapter.git_ok(dir.path(), &["push", "replica", "master-patches"]).unwrap();
        adapter.git_ok(dir.path(), &["checkout", PARKING_BRANCH]).unwrap();

        let request = RecombineRequest {
            main: SourceRef {
                name: "original".into(),
                branch: "master".into(),
                revision: pick.clone(),
                id: "Iupstream".into(),
                commit_message: None,
                url: Some("https://gerrit.example.com/c/original/+/42".into()),
            },
            patches: SourceRef {
                name: "replica".into(),
                branch: "master-patches".into(),
                revision: String::new(),
                id: "Ipatch".into(),
                commit_message: Some("local patch\n\nChange-Id: Ipatch".into()),
                url: None,
            },
            replication_strategy: ReplicationStrategy::LockAndBackports,
            target_replacement_branch: None,
            permanent_patches: Vec::new(),
            replica_remote: "replica".into(),
        };

        let outcome = adapter.cherrypick_recombine(dir.path(), &request, "recomb-evolution-master-test").unwrap();
        assert_eq!(outcome.kind, Kind::EvolutionDiversity);

        let mangled = outcome.metadata.sources.patches.commit_message.expect("mangled message");
        assert!(mangled.contains("Upstream-master: https://gerrit.example.com/c/original/+/42"));
        assert!(mangled.contains(&format!("(cherry picked from commit {pick})")));
        let upstream_line_idx = mangled.lines().position(|l| l.starts_with("Upstream-master:")).unwrap();
        let change_id_idx = mangled.lines().position(|l| l.trim_start().starts_with("Change-Id:")).unwrap();
        assert!(upstream_line_idx < change_id_idx);
    }
}

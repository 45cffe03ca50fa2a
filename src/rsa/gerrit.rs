//! Concrete [`ReviewServerAdapter`] talking to a real Gerrit host over SSH
//! (`ssh <host> gerrit query --format json`, `gerrit review ...`), grounded
//! in the original `Gerrit` adapter class this system was distilled from.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use slog::Logger;

use crate::error::RsaError;
use crate::model::Change;
use crate::rsa::{max_approvals, normalize_status, QueryPredicate, ReviewServerAdapter};
use crate::shell::ShellExecutor;

#[derive(Debug, Deserialize)]
struct ApprovalJson {
    #[serde(rename = "type")]
    label_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PatchSetJson {
    number: String,
    revision: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    approvals: Vec<ApprovalJson>,
}

#[derive(Debug, Deserialize)]
struct CommentJson {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChangeJson {
    project: String,
    branch: String,
    id: String,
    number: String,
    subject: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    url: Option<String>,
    status: String,
    #[serde(rename = "currentPatchSet", default)]
    current_patch_set: Option<PatchSetJson>,
    #[serde(default)]
    comments: Vec<CommentJson>,
}

fn to_change(json: ChangeJson) -> Change {
    let patchset = json.current_patch_set;
    let approvals = patchset
        .as_ref()
        .map(|ps| {
            max_approvals(
                ps.approvals
                    .iter()
                    .map(|a| (a.label_type.as_str(), a.value.parse::<i32>().unwrap_or(0))),
            )
        })
        .unwrap_or_default();
    let revision = patchset.as_ref().map(|ps| ps.revision.clone()).unwrap_or_default();
    let parent = patchset
        .as_ref()
        .and_then(|ps| ps.parents.first().cloned())
        .unwrap_or_default();
    let status = normalize_status(&json.status, &approvals);

    Change {
        id: json.id,
        branch: json.branch,
        revision,
        parent,
        project_name: json.project,
        number: Some(json.number),
        patchset_number: patchset.as_ref().map(|ps| ps.number.clone()),
        patchset_revision: patchset.as_ref().map(|ps| ps.revision.clone()),
        status,
        subject: json.subject,
        topic: json.topic,
        url: json.url,
        approvals,
        merge_commit: None,
    }
}

/// Talks to a Gerrit host identified by `ssh_target` (`user@host`, resolved
/// through the operator's own SSH config for port/identity).
pub struct GerritAdapter {
    ssh_target: String,
    port: u16,
    push_remote: String,
    shell: ShellExecutor,
    logger: Logger,
}

impl GerritAdapter {
    pub fn new(ssh_target: impl Into<String>, port: u16, push_remote: impl Into<String>, logger: Logger) -> Self {
        Self {
            ssh_target: ssh_target.into(),
            port,
            push_remote: push_remote.into(),
            shell: ShellExecutor::new(),
            logger,
        }
    }

    fn ssh_args<'a>(&self, extra: &[&'a str]) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string(), self.ssh_target.clone()];
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    fn run_ssh(&self, extra: &[&str]) -> Result<crate::shell::ShellOutput> {
        let owned = self.ssh_args(extra);
        let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.shell.run(&self.logger, "ssh", &refs)
    }

    fn query_changes_json(&self, query: &str) -> Result<Vec<ChangeJson>> {
        let out = self.run_ssh(&["gerrit", "query", "--current-patch-set", "--format", "json", query])?;
        if !out.success() {
            anyhow::bail!(RsaError::Decode(format!("gerrit query failed: {}", out.stderr_joined())));
        }
        Ok(out
            .stdout
            .iter()
            .filter_map(|line| serde_json::from_str::<ChangeJson>(line).ok())
            .collect())
    }

    fn gerrit_review(&self, number: &str, patchset: &str, extra: &[&str]) -> Result<()> {
        let id = format!("{number},{patchset}");
        let mut args: Vec<&str> = vec!["gerrit", "review"];
        args.extend_from_slice(extra);
        args.push(&id);
        let out = self.run_ssh(&args)?;
        if !out.success() {
            anyhow::bail!(RsaError::Approve {
                number: number.to_string(),
                detail: out.stderr_joined(),
            });
        }
        Ok(())
    }
}

impl ReviewServerAdapter for GerritAdapter {
    fn query(&self, predicate: &QueryPredicate) -> Result<Vec<Change>> {
        let query = predicate.to_gerrit_query();
        Ok(self.query_changes_json(&query)?.into_iter().map(to_change).collect())
    }

    fn upload(
        &self,
        dir: &Path,
        revision: &str,
        branch: &str,
        topic: &str,
        reviewers: &[String],
        publish_as_draft: bool,
    ) -> Result<Change> {
        let mut refspec = if publish_as_draft {
            format!("refs/drafts/{branch}")
        } else {
            format!("refs/for/{branch}")
        };
        let mut options = vec![format!("topic={topic}")];
        options.extend(reviewers.iter().map(|r| format!("r={r}")));
        refspec.push('%');
        refspec.push_str(&options.join(","));

        let push_refspec = format!("{revision}:{refspec}");
        let push = self.shell.run_in(&self.logger, dir, "git", &["push", &self.push_remote, &push_refspec])?;

        if !push.success() {
            anyhow::bail!(RsaError::Upload {
                branch: branch.to_string(),
                topic: topic.to_string(),
            });
        }

        let query = format!("topic:{topic} AND status:open");
        let found = self.query_changes_json(&query)?.into_iter().map(to_change).next();

        match found {
            Some(change) => Ok(change),
            None => {
                let rollback_refspec = format!(":{branch}");
                let _ = self.shell.run_in(&self.logger, dir, "git", &["push", &self.push_remote, &rollback_refspec]);
                Err(RsaError::Upload {
                    branch: branch.to_string(),
                    topic: topic.to_string(),
                }
                .into())
            }
        }
    }

    fn approve(&self, number: &str, patchset: &str) -> Result<()> {
        self.gerrit_review(number, patchset, &["--code-review", "2", "--verified", "1"])
    }

    fn reject(&self, number: &str, patchset: &str) -> Result<()> {
        self.gerrit_review(number, patchset, &["--code-review", "-2", "--verified", "-1"])
    }

    fn submit(&self, number: &str, patchset: &str) -> Result<()> {
        let _ = self.gerrit_review(number, patchset, &["--publish"]);
        self.gerrit_review(number, patchset, &["--submit"])
            .with_context(|| format!("submit of change {number}"))?;

        let merged = self.query(&QueryPredicate::by_number_merged(number))?;
        if merged.is_empty() {
            anyhow::bail!(RsaError::Submit { number: number.to_string() });
        }
        Ok(())
    }

    fn comment(&self, number: &str, patchset: &str, text: &str, verified: Option<i32>, code_review: Option<i32>) -> Result<()> {
        let verified_str = verified.map(|v| v.to_string());
        let code_review_str = code_review.map(|v| v.to_string());
        let mut extra: Vec<&str> = vec!["--message", text];
        if let Some(v) = &verified_str {
            extra.push("--verified");
            extra.push(v);
        }
        if let Some(c) = &code_review_str {
            extra.push("--code-review");
            extra.push(c);
        }
        self.gerrit_review(number, patchset, &extra)
    }

    fn abandon(&self, number: &str, patchset: &str) -> Result<()> {
        let current = self.query(&QueryPredicate::by_number(number))?;
        if current.iter().any(|c| c.status == crate::model::Status::Present) {
            let _ = self.gerrit_review(number, patchset, &["--publish"]);
        }
        self.gerrit_review(number, patchset, &["--abandon"]).map_err(|_| {
            RsaError::Abandon {
                number: number.to_string(),
                detail: "gerrit review --abandon failed".to_string(),
            }
            .into()
        })
    }

    fn list_comments(&self, number: &str) -> Result<Vec<String>> {
        let query = format!("change:{number}");
        let out = self.run_ssh(&["gerrit", "query", "--comments", "--format", "json", &query])?;
        if !out.success() {
            anyhow::bail!(RsaError::Decode(format!("gerrit query failed: {}", out.stderr_joined())));
        }
        Ok(out
            .stdout
            .iter()
            .filter_map(|line| serde_json::from_str::<ChangeJson>(line).ok())
            .flat_map(|change| change.comments.into_iter().map(|c| c.message))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_predicate_round_trips_into_gerrit_syntax() {
        let predicate = QueryPredicate::by_number("42");
        assert_eq!(predicate.to_gerrit_query(), "change:42");
    }

    #[test]
    fn change_json_normalizes_approved_status() {
        let json = ChangeJson {
            project: "proj".into(),
            branch: "master".into(),
            id: "I1".into(),
            number: "1".into(),
            subject: "s".into(),
            topic: Some("I1".into()),
            url: None,
            status: "NEW".into(),
            current_patch_set: Some(PatchSetJson {
                number: "1".into(),
                revision: "a".repeat(40),
                parents: vec!["b".repeat(40)],
                approvals: vec![
                    ApprovalJson {
                        label_type: "Code-Review".into(),
                        value: "2".into(),
                    },
                    ApprovalJson {
                        label_type: "Verified".into(),
                        value: "1".into(),
                    },
                ],
            }),
            comments: Vec::new(),
        };
        let change = to_change(json);
        assert_eq!(change.status, crate::model::Status::Approved);
    }
}

//! Serialization of recombination metadata into the review's commit message
//! (§6) and back. The first line is a fixed-format subject; everything after
//! the following blank line is a YAML document.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RsaError;
use crate::model::{short_rev, Kind, ReplicationStrategy, RecombineStatus, SourceRef};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcesBlock {
    pub main: SourceRef,
    pub patches: SourceRef,
}

/// The YAML body of a recombination commit message, independent of its
/// subject line (the subject is derived, not stored, to avoid the two
/// getting out of sync).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecombinationMetadata {
    pub sources: SourcesBlock,
    #[serde(rename = "replication-strategy")]
    pub replication_strategy: ReplicationStrategy,
    #[serde(rename = "recombine-status")]
    pub recombine_status: RecombineStatus,
    #[serde(rename = "target-replacement-branch", skip_serializing_if = "Option::is_none")]
    pub target_replacement_branch: Option<String>,
    #[serde(rename = "patches-review", skip_serializing_if = "Option::is_none")]
    pub patches_review: Option<String>,
    #[serde(rename = "removed-commits", default, skip_serializing_if = "Vec::is_empty")]
    pub removed_commits: Vec<String>,
}

/// The fixed-format first line, parsed back into its four components.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSubject {
    pub kind: Kind,
    pub main_rev6: String,
    pub patches_rev6: String,
    pub main_branch: String,
}

pub fn subject_line(kind: Kind, main_revision: &str, patches_revision: &str, main_branch: &str) -> String {
    format!(
        "Recombination: {kind}:{}-{}/{main_branch}",
        short_rev(main_revision),
        short_rev(patches_revision),
    )
}

pub fn parse_subject_line(line: &str) -> Result<ParsedSubject> {
    let rest = line
        .strip_prefix("Recombination: ")
        .context("commit message first line missing 'Recombination: ' prefix")?;
    let (kind_and_revs, main_branch) = rest
        .rsplit_once('/')
        .context("commit message subject missing '/<mainBranch>' suffix")?;
    let (kind_str, revs) = kind_and_revs
        .split_once(':')
        .context("commit message subject missing ':' separator")?;
    let (main_rev6, patches_rev6) = revs
        .split_once('-')
        .context("commit message subject missing '-' separator between revisions")?;
    Ok(ParsedSubject {
        kind: kind_str.parse().map_err(|_| RsaError::Decode(format!("unknown kind {kind_str}")))?,
        main_rev6: main_rev6.to_string(),
        patches_rev6: patches_rev6.to_string(),
        main_branch: main_branch.to_string(),
    })
}

/// Renders the full commit message: subject, blank line, YAML body.
pub fn format_commit_message(kind: Kind, metadata: &RecombinationMetadata) -> Result<String> {
    let subject = subject_line(
        kind,
        &metadata.sources.main.revision,
        &metadata.sources.patches.revision,
        &metadata.sources.main.branch,
    );
    let yaml = serde_yaml::to_string(metadata).context("failed to serialize recombination metadata")?;
    Ok(format!("{subject}\n\n{yaml}"))
}

/// Parses a full commit message back into its subject and metadata.
pub fn parse_commit_message(text: &str) -> Result<(ParsedSubject, RecombinationMetadata)> {
    let mut lines = text.lines();
    let first = lines.next().context("empty recombination commit message")?;
    let subject = parse_subject_line(first)?;
    let body: String = lines.collect::<Vec<_>>().join("\n");
    let metadata: RecombinationMetadata =
        serde_yaml::from_str(body.trim_start_matches('\n')).map_err(|e| RsaError::Decode(e.to_string()))?;
    Ok((subject, metadata))
}

/// Mangles the patches source's commit message for a cherry-pick
/// (evolution-diversity) recombination: inserts `Upstream-<branch>: <url>`
/// before the `Change-Id:` trailer and appends the cherry-pick provenance
/// line.
pub fn mangle_cherrypick_message(original: &str, branch: &str, url: &str, picked_from: &str) -> String {
    let upstream_line = format!("Upstream-{branch}: {url}");
    let mut out_lines: Vec<String> = Vec::new();
    let mut inserted = false;
    for line in original.lines() {
        if !inserted && line.trim_start().starts_with("Change-Id:") {
            out_lines.push(upstream_line.clone());
            inserted = true;
        }
        out_lines.push(line.to_string());
    }
    if !inserted {
        out_lines.push(upstream_line);
    }
    out_lines.push(format!("(cherry picked from commit {picked_from})"));
    out_lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRef;

    fn sample_metadata() -> RecombinationMetadata {
        RecombinationMetadata {
            sources: SourcesBlock {
                main: SourceRef {
                    name: "original".into(),
                    branch: "master".into(),
                    revision: "a".repeat(40),
                    id: "I1".into(),
                    commit_message: None,
                    url: None,
                },
                patches: SourceRef {
                    name: "replica".into(),
                    branch: "master-patches".into(),
                    revision: "b".repeat(40),
                    id: "b".repeat(40),
                    commit_message: None,
                    url: None,
                },
            },
            replication_strategy: ReplicationStrategy::ChangeByChange,
            recombine_status: RecombineStatus::Unattempted,
            target_replacement_branch: Some("target-original-master-aaaaaa".into()),
            patches_review: None,
            removed_commits: Vec::new(),
        }
    }

    #[test]
    fn round_trips_kind_revisions_and_branch() {
        let metadata = sample_metadata();
        let text = format_commit_message(Kind::OriginalDiversity, &metadata).unwrap();
        let (subject, parsed) = parse_commit_message(&text).unwrap();

        assert_eq!(subject.kind, Kind::OriginalDiversity);
        assert_eq!(subject.main_rev6, "aaaaaa");
        assert_eq!(subject.patches_rev6, "bbbbbb");
        assert_eq!(subject.main_branch, "master");
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn mangle_inserts_upstream_line_before_change_id() {
        let original = "Some commit\n\nChange-Id: I123\n";
        let mangled = mangle_cherrypick_message(original, "master", "ssh://host/project", "deadbeef");
        let lines: Vec<&str> = mangled.lines().collect();
        let upstream_idx = lines.iter().position(|l| l.starts_with("Upstream-master:")).unwrap();
        let change_id_idx = lines.iter().position(|l| l.starts_with("Change-Id:")).unwrap();
        assert!(upstream_idx < change_id_idx);
        assert_eq!(lines.last().unwrap(), &"(cherry picked from commit deadbeef)");
    }

    #[test]
    fn subject_line_uses_six_char_short_revisions() {
        let line = subject_line(Kind::EvolutionDiversity, &"c".repeat(40), &"d".repeat(40), "stable");
        assert_eq!(line, format!("Recombination: evolution-diversity:{}-{}/stable", "c".repeat(6), "d".repeat(6)));
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = parse_subject_line("Recombination: bogus:aaaaaa-bbbbbb/master").unwrap_err();
        assert!(err.to_string().contains("unknown kind") || format!("{err:#}").contains("bogus"));
    }
}

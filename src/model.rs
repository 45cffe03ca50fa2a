//! The core value types: `Change`, `Recombination`, `BranchMap`, `Slice`.
//!
//! These are plain structs, not the opportunistically-attributed records of
//! the system being modeled: a `Recombination`'s per-kind data lives in
//! `RecombinationSources`, one variant per kind, so a `replica-mutation`
//! recombination simply has no field for a target-replacement branch rather
//! than carrying one that's always `None`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a `Change` as normalized by the review-server adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Missing,
    Present,
    Approved,
    Merged,
    Abandoned,
}

impl Status {
    /// Monotonicity weight used by the slice scanner (§4.5.2).
    pub fn impact(self) -> u8 {
        match self {
            Status::Merged => 2,
            Status::Approved | Status::Present => 1,
            Status::Missing | Status::Abandoned => 0,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Missing => "MISSING",
            Status::Present => "PRESENT",
            Status::Approved => "APPROVED",
            Status::Merged => "MERGED",
            Status::Abandoned => "ABANDONED",
        };
        write!(f, "{s}")
    }
}

/// Which two sources a recombination combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    OriginalDiversity,
    EvolutionDiversity,
    ReplicaMutation,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::OriginalDiversity => "original-diversity",
            Kind::EvolutionDiversity => "evolution-diversity",
            Kind::ReplicaMutation => "replica-mutation",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original-diversity" => Ok(Kind::OriginalDiversity),
            "evolution-diversity" => Ok(Kind::EvolutionDiversity),
            "replica-mutation" => Ok(Kind::ReplicaMutation),
            other => Err(crate::error::EngineError::RecombinationType(other.to_string())),
        }
    }
}

/// Internal progress marker carried in recombination commit-message metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecombineStatus {
    Unattempted,
    Succeeded,
    Blocked,
    Discarded,
}

/// A single review record on the remote review server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub branch: String,
    pub revision: String,
    pub parent: String,
    pub project_name: String,
    pub number: Option<String>,
    pub patchset_number: Option<String>,
    pub patchset_revision: Option<String>,
    pub status: Status,
    pub subject: String,
    pub topic: Option<String>,
    pub url: Option<String>,
    /// Maximum approval value observed per label, e.g. `Code-Review` -> 2.
    pub approvals: HashMap<String, i32>,
    /// Set once `find_merge` locates the merge commit that absorbed this change.
    pub merge_commit: Option<String>,
}

impl Change {
    pub fn is_approved(&self) -> bool {
        self.approvals.get("Code-Review").copied().unwrap_or(-2) >= 2
            && self.approvals.get("Verified").copied().unwrap_or(-1) >= 1
    }

    /// The commit this change should be considered to advance to: the merge
    /// commit if one absorbed it, otherwise its own revision.
    pub fn effective_revision(&self) -> &str {
        self.merge_commit.as_deref().unwrap_or(&self.revision)
    }

    pub fn revision_short(&self) -> &str {
        short_rev(&self.revision)
    }
}

/// First 6 hex characters of a revision, the width the commit-message format uses.
pub fn short_rev(revision: &str) -> &str {
    &revision[..revision.len().min(6)]
}

/// A reference to one side of a recombination (main source or patches source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub branch: String,
    pub revision: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Kind-specific data a `Recombination` carries. Exactly one variant is ever
/// populated for a given recombination; a `replica-mutation` recombination
/// simply has no `target_replacement_branch` field to leave empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecombinationSources {
    OriginalDiversity {
        main: Change,
        patches: Change,
        target_replacement_branch: String,
    },
    EvolutionDiversity {
        main: Change,
        patches: Change,
        backport_review_id: Option<String>,
    },
    ReplicaMutation {
        main: Change,
        patches: Change,
        target_replacement_branch: String,
    },
}

impl RecombinationSources {
    pub fn kind(&self) -> Kind {
        match self {
            RecombinationSources::OriginalDiversity { .. } => Kind::OriginalDiversity,
            RecombinationSources::EvolutionDiversity { .. } => Kind::EvolutionDiversity,
            RecombinationSources::ReplicaMutation { .. } => Kind::ReplicaMutation,
        }
    }

    pub fn main(&self) -> &Change {
        match self {
            RecombinationSources::OriginalDiversity { main, .. }
            | RecombinationSources::EvolutionDiversity { main, .. }
            | RecombinationSources::ReplicaMutation { main, .. } => main,
        }
    }

    pub fn patches(&self) -> &Change {
        match self {
            RecombinationSources::OriginalDiversity { patches, .. }
            | RecombinationSources::EvolutionDiversity { patches, .. }
            | RecombinationSources::ReplicaMutation { patches, .. } => patches,
        }
    }

    pub fn target_replacement_branch(&self) -> Option<&str> {
        match self {
            RecombinationSources::OriginalDiversity {
                target_replacement_branch,
                ..
            }
            | RecombinationSources::ReplicaMutation {
                target_replacement_branch,
                ..
            } => Some(target_replacement_branch),
            RecombinationSources::EvolutionDiversity { .. } => None,
        }
    }
}

/// A trial merge of an upstream change with the local patches branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recombination {
    /// The underlying review record (id/number/status/etc. live here).
    pub change: Change,
    pub sources: RecombinationSources,
    pub replication_strategy: ReplicationStrategy,
    pub recombine_status: RecombineStatus,
    /// Populated only once an eviction loop (Algorithm M) has run.
    pub evicted_commits: Vec<String>,
}

impl Recombination {
    pub fn kind(&self) -> Kind {
        self.sources.kind()
    }

    pub fn status(&self) -> Status {
        self.change.status
    }

    /// First line of the recombination's commit message (§6).
    pub fn subject_first_line(&self) -> String {
        format!(
            "Recombination: {}:{}-{}/{}",
            self.kind(),
            short_rev(&self.sources.main().revision),
            short_rev(&self.sources.patches().revision),
            self.sources.main().branch,
        )
    }
}

/// `change-by-change` advances the replica one upstream change at a time;
/// `lock-and-backports` freezes the replica at a lock and manages backports
/// individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicationStrategy {
    ChangeByChange,
    LockAndBackports,
}

/// The four branch roles derived from one declared original branch, looked
/// up from any other role.
#[derive(Debug, Clone)]
pub struct BranchMap {
    original: String,
    replica: String,
    target: String,
    patches: String,
}

impl BranchMap {
    /// `replica = mappings[original] | original`, `target = replica + "-tag"`,
    /// `patches = replica + "-patches"`.
    pub fn new(original: &str, branch_mappings: &HashMap<String, String>) -> Self {
        let replica = branch_mappings
            .get(original)
            .cloned()
            .unwrap_or_else(|| original.to_string());
        let target = format!("{replica}-tag");
        let patches = format!("{replica}-patches");
        Self {
            original: original.to_string(),
            replica,
            target,
            patches,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }
    pub fn replica(&self) -> &str {
        &self.replica
    }
    pub fn target(&self) -> &str {
        &self.target
    }
    pub fn patches(&self) -> &str {
        &self.patches
    }
}

/// A half-open index range `[start, end)` into the ordered recombination
/// list, tagged with the status shared by every record in the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub status: Status,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Scanner output: one ordered list of segments per branch, grouped by
/// consecutive equal status, plus the impact-monotonicity check.
#[derive(Debug, Clone, Default)]
pub struct Slice {
    pub segments: Vec<Segment>,
}

impl Slice {
    pub fn segments_with_status(&self, status: Status) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| s.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_map_uses_mapping_when_present() {
        let mut mappings = HashMap::new();
        mappings.insert("master".to_string(), "downstream-master".to_string());
        let map = BranchMap::new("master", &mappings);
        assert_eq!(map.replica(), "downstream-master");
        assert_eq!(map.target(), "downstream-master-tag");
        assert_eq!(map.patches(), "downstream-master-patches");
        assert_eq!(map.original(), "master");
    }

    #[test]
    fn branch_map_falls_back_to_original_name() {
        let mappings = HashMap::new();
        let map = BranchMap::new("master", &mappings);
        assert_eq!(map.replica(), "master");
        assert_eq!(map.target(), "master-tag");
    }

    #[test]
    fn status_impact_is_monotonic_by_severity() {
        assert!(Status::Merged.impact() > Status::Approved.impact());
        assert_eq!(Status::Approved.impact(), Status::Present.impact());
        assert!(Status::Present.impact() > Status::Missing.impact());
    }

    #[test]
    fn change_is_approved_requires_both_labels() {
        let mut approvals = HashMap::new();
        approvals.insert("Code-Review".to_string(), 2);
        let change = sample_change(approvals);
        assert!(!change.is_approved());
    }

    fn sample_change(approvals: HashMap<String, i32>) -> Change {
        Change {
            id: "I1".into(),
            branch: "master".into(),
            revision: "a".repeat(40),
            parent: "b".repeat(40),
            project_name: "proj".into(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Present,
            subject: String::new(),
            topic: None,
            url: None,
            approvals,
            merge_commit: None,
        }
    }
}

//! Per-project engine (§4.5): branch map, interval scan, slice/monotonicity
//! check, and the per-recombination state-machine driver.

use std::path::Path;

use anyhow::{Context, Result};
use slog::Logger;

use crate::commit_message;
use crate::config::ProjectConfig;
use crate::error::EngineError;
use crate::model::{
    BranchMap, Change, Kind, Recombination, RecombinationSources, RecombineStatus, ReplicationStrategy, Segment, SourceRef,
    Slice, Status,
};
use crate::rsa::ReviewServerAdapter;
use crate::vca::synth::{RecombineRequest, CHERRYPICK_CONFLICT_HINT};
use crate::vca::GitVca;

/// Drives one project's watched branches through the scan/slice/state-machine
/// pipeline. Holds long-lived adapter handles; constructed once per
/// orchestrator command invocation.
pub struct ProjectEngine<'a> {
    pub project_name: String,
    pub config: &'a ProjectConfig,
    pub vca: &'a GitVca,
    pub rsa: &'a dyn ReviewServerAdapter,
    pub logger: Logger,
    pub dry_run: bool,
}

impl<'a> ProjectEngine<'a> {
    fn kind_word(kind: Kind) -> &'static str {
        match kind {
            Kind::OriginalDiversity => "original",
            Kind::EvolutionDiversity => "evolution",
            Kind::ReplicaMutation => "patches",
        }
    }

    /// §4.5.1: builds the ordered list of recombinations for one watched
    /// original branch, querying the review server for already-known
    /// records and synthesizing placeholders for unseen upstream commits.
    pub fn scan_branch(&self, dir: &Path, branch_map: &BranchMap) -> Result<Vec<Recombination>> {
        let replica_ref = format!("remotes/{}/{}", self.config.replica.name, branch_map.replica());
        let original_ref = format!("remotes/{}/{}", self.config.original.name, branch_map.original());

        let (start, first_parent, no_merges) = match self.config.replication_strategy {
            ReplicationStrategy::ChangeByChange => (replica_ref.clone(), true, false),
            ReplicationStrategy::LockAndBackports => {
                let start = self
                    .config
                    .original
                    .backports_start
                    .get(branch_map.original())
                    .cloned()
                    .or_else(|| self.config.replica.ref_locks.get(branch_map.replica()).cloned())
                    .unwrap_or_else(|| replica_ref.clone());
                (start, false, true)
            }
        };

        let commits = self
            .vca
            .list_commits(dir, &start, &original_ref, first_parent, false, no_merges)
            .with_context(|| format!("listing commits on {}", branch_map.original()))?;

        let mut identifiers: Vec<(String, String)> = Vec::new();
        for commit in &commits {
            if let Some(id) = commit.change_id() {
                identifiers.push((id, commit.hash.clone()));
                continue;
            }
            if commit.is_merge() && commit.parents.len() >= 2 {
                let sub = self
                    .vca
                    .list_commits(dir, &commit.parents[0], &commit.parents[1], false, false, true)?;
                if let Some(id) = sub.first().and_then(|c| c.change_id()) {
                    identifiers.push((id, commit.hash.clone()));
                    continue;
                }
            }
            slog::warn!(self.logger, "no Change-Id found for commit, skipping"; "commit" => commit.hash.clone());
        }

        let patches_ref = format!("remotes/{}/{}", self.config.replica.name, branch_map.patches());
        let patches_revision = self.vca.resolve_revision(dir, &patches_ref).unwrap_or_default();

        let mut recombinations = Vec::with_capacity(identifiers.len());
        for (change_id, main_revision) in identifiers {
            let existing = self.rsa.get_by_topic(&self.project_name, &change_id)?;
            let recomb = match existing {
                Some(change) => self.recombination_from_change(dir, change)?,
                None => self.missing_recombination(branch_map, &change_id, &main_revision, &patches_ref, &patches_revision),
            };
            recombinations.push(recomb);
        }
        Ok(recombinations)
    }

    fn missing_recombination(
        &self,
        branch_map: &BranchMap,
        change_id: &str,
        main_revision: &str,
        patches_ref: &str,
        patches_revision: &str,
    ) -> Recombination {
        let kind = match self.config.replication_strategy {
            ReplicationStrategy::ChangeByChange => Kind::OriginalDiversity,
            ReplicationStrategy::LockAndBackports => Kind::EvolutionDiversity,
        };
        let recomb_branch = format!(
            "recomb-{}-{}-{}",
            Self::kind_word(kind),
            branch_map.original(),
            &main_revision[..main_revision.len().min(12)],
        );
        let target_replacement_branch = format!(
            "target-{}-{}-{}",
            Self::kind_word(kind),
            branch_map.original(),
            &main_revision[..main_revision.len().min(12)],
        );

        let main = Change {
            id: change_id.to_string(),
            branch: branch_map.original().to_string(),
            revision: main_revision.to_string(),
            parent: String::new(),
            project_name: self.project_name.clone(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Merged,
            subject: String::new(),
            topic: Some(change_id.to_string()),
            url: None,
            approvals: Default::default(),
            merge_commit: None,
        };
        let patches = Change {
            id: patches_revision.to_string(),
            branch: branch_map.patches().to_string(),
            revision: patches_revision.to_string(),
            parent: String::new(),
            project_name: self.project_name.clone(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Present,
            subject: String::new(),
            topic: None,
            url: None,
            approvals: Default::default(),
            merge_commit: None,
        };

        let sources = match kind {
            Kind::OriginalDiversity => RecombinationSources::OriginalDiversity {
                main,
                patches,
                target_replacement_branch,
            },
            Kind::EvolutionDiversity => RecombinationSources::EvolutionDiversity {
                main,
                patches,
                backport_review_id: None,
            },
            Kind::ReplicaMutation => RecombinationSources::ReplicaMutation {
                main,
                patches,
                target_replacement_branch,
            },
        };

        let _ = patches_ref;
        Recombination {
            change: Change {
                id: change_id.to_string(),
                branch: recomb_branch,
                revision: String::new(),
                parent: String::new(),
                project_name: self.project_name.clone(),
                number: None,
                patchset_number: None,
                patchset_revision: None,
                status: Status::Missing,
                subject: String::new(),
                topic: Some(change_id.to_string()),
                url: None,
                approvals: Default::default(),
                merge_commit: None,
            },
            sources,
            replication_strategy: self.config.replication_strategy,
            recombine_status: RecombineStatus::Unattempted,
            evicted_commits: Vec::new(),
        }
    }

    /// `poll-replica`'s scan: discovers proposed local mutations (open
    /// reviews on the patches branch itself) and builds `ReplicaMutation`
    /// recombinations for whichever aren't already known to the review
    /// server, optionally restricted to a single mutation's change id
    /// (`new_replica_patch`); otherwise every open patches-branch change is
    /// considered (`scan_replica_patches`).
    pub fn scan_replica_mutations(&self, dir: &Path, branch_map: &BranchMap, change_id_filter: Option<&str>) -> Result<Vec<Recombination>> {
        let predicate = crate::rsa::QueryPredicate {
            branch: Some(branch_map.patches().to_string()),
            project: Some(self.project_name.clone()),
            status_open: true,
            change_id: change_id_filter.map(str::to_string),
            ..Default::default()
        };
        let mutation_changes = self.rsa.query(&predicate)?;

        let replica_ref = format!("remotes/{}/{}", self.config.replica.name, branch_map.original());
        let replica_revision = self
            .vca
            .resolve_revision(dir, &replica_ref)
            .with_context(|| format!("resolving replica tip for {}", branch_map.original()))?;

        let mut recombinations = Vec::with_capacity(mutation_changes.len());
        for mutation in mutation_changes {
            let existing = self.rsa.get_by_topic(&self.project_name, &mutation.id)?;
            let recomb = match existing {
                Some(change) => self.recombination_from_change(dir, change)?,
                None => self.missing_mutation_recombination(branch_map, &mutation, &replica_revision),
            };
            recombinations.push(recomb);
        }
        Ok(recombinations)
    }

    /// Builds a `MISSING` `replica-mutation` recombination: `main` is the
    /// current, already-settled replica tip (status `MERGED`), `patches` is
    /// the proposed mutation change itself, pending trial merge.
    fn missing_mutation_recombination(&self, branch_map: &BranchMap, mutation: &Change, replica_revision: &str) -> Recombination {
        let short_revision = &replica_revision[..replica_revision.len().min(12)];
        let recomb_branch = format!("recomb-patches-{}-{}", branch_map.original(), short_revision);
        let target_replacement_branch = format!("target-patches-{}-{}", branch_map.original(), short_revision);

        let main = Change {
            id: replica_revision.to_string(),
            branch: branch_map.original().to_string(),
            revision: replica_revision.to_string(),
            parent: String::new(),
            project_name: self.project_name.clone(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Merged,
            subject: String::new(),
            topic: None,
            url: None,
            approvals: Default::default(),
            merge_commit: None,
        };

        Recombination {
            change: Change {
                id: mutation.id.clone(),
                branch: recomb_branch,
                revision: String::new(),
                parent: String::new(),
                project_name: self.project_name.clone(),
                number: None,
                patchset_number: None,
                patchset_revision: None,
                status: Status::Missing,
                subject: String::new(),
                topic: Some(mutation.id.clone()),
                url: None,
                approvals: Default::default(),
                merge_commit: None,
            },
            sources: RecombinationSources::ReplicaMutation {
                main,
                patches: mutation.clone(),
                target_replacement_branch,
            },
            replication_strategy: self.config.replication_strategy,
            recombine_status: RecombineStatus::Unattempted,
            evicted_commits: Vec::new(),
        }
    }

    /// Reconstructs a known recombination's metadata from its own commit
    /// message (the review server's record carries status/approvals but not
    /// the synthesizer's structured metadata).
    fn recombination_from_change(&self, dir: &Path, change: Change) -> Result<Recombination> {
        let message = self.vca.commit_message(dir, &change.revision)?;
        let (subject, metadata) = commit_message::parse_commit_message(&message)?;

        let sources = match subject.kind {
            Kind::OriginalDiversity => RecombinationSources::OriginalDiversity {
                main: source_ref_to_change(&metadata.sources.main),
                patches: source_ref_to_change(&metadata.sources.patches),
                target_replacement_branch: metadata.target_replacement_branch.clone().unwrap_or_default(),
            },
            Kind::EvolutionDiversity => RecombinationSources::EvolutionDiversity {
                main: source_ref_to_change(&metadata.sources.main),
                patches: source_ref_to_change(&metadata.sources.patches),
                backport_review_id: metadata.patches_review.clone(),
            },
            Kind::ReplicaMutation => RecombinationSources::ReplicaMutation {
                main: source_ref_to_change(&metadata.sources.main),
                patches: source_ref_to_change(&metadata.sources.patches),
                target_replacement_branch: metadata.target_replacement_branch.clone().unwrap_or_default(),
            },
        };

        Ok(Recombination {
            change,
            sources,
            replication_strategy: metadata.replication_strategy,
            recombine_status: metadata.recombine_status,
            evicted_commits: metadata.removed_commits.clone(),
        })
    }

    /// §4.5.2: walks the ordered list, grouping consecutive equal statuses
    /// into segments and failing fast on an impact-monotonicity violation.
    pub fn build_slice(&self, branch: &str, recombinations: &[Recombination]) -> Result<Slice> {
        let mut segments = Vec::new();
        let mut idx = 0usize;
        let mut prev_impact: Option<u8> = None;

        while idx < recombinations.len() {
            let status = recombinations[idx].status();
            let impact = status.impact();
            if let Some(prev) = prev_impact {
                if impact > prev {
                    return Err(EngineError::ConstraintViolation {
                        branch: branch.to_string(),
                        previous: prev,
                        current: impact,
                        index: idx,
                    }
                    .into());
                }
            }
            let start = idx;
            while idx < recombinations.len() && recombinations[idx].status() == status {
                idx += 1;
            }
            segments.push(Segment { status, start, end: idx });
            prev_impact = Some(impact);
        }
        Ok(Slice { segments })
    }

    /// §4.5.4: drops APPROVED segments preceded by any PRESENT segment.
    pub fn approved_segments_to_process<'s>(slice: &'s Slice) -> Vec<&'s Segment> {
        let mut present_seen = false;
        let mut out = Vec::new();
        for segment in &slice.segments {
            match segment.status {
                Status::Present => present_seen = true,
                Status::Approved if !present_seen => out.push(segment),
                _ => {}
            }
        }
        out
    }

    /// §4.5.4: only the last record of a leading MERGED segment is processed.
    pub fn merged_record_to_process<'r>(slice: &Slice, recombinations: &'r [Recombination]) -> Option<&'r Recombination> {
        let first = slice.segments.first()?;
        if first.status == Status::Merged {
            recombinations.get(first.end - 1)
        } else {
            None
        }
    }

    /// §4.5.3 MISSING: run the appropriate synthesis algorithm and upload.
    pub fn handle_missing(&self, dir: &Path, recombination: &Recombination, branch_map: &BranchMap) -> Result<Recombination> {
        if self.dry_run {
            slog::info!(self.logger, "dry-run, skipping synthesis"; "recombination" => recombination.subject_first_line());
            return Ok(recombination.clone());
        }

        let request = self.build_request(recombination, branch_map);
        let kind = recombination.kind();
        let recomb_branch = recombination.change.branch.clone();

        let outcome = match kind {
            Kind::OriginalDiversity => self.vca.merge_recombine(dir, &request, &recomb_branch),
            Kind::EvolutionDiversity => self.vca.cherrypick_recombine(dir, &request, &recomb_branch),
            Kind::ReplicaMutation => self.vca.mutation_recombine(dir, &request, &recomb_branch),
        };

        match outcome {
            Ok(outcome) => {
                let revision = self.vca.resolve_revision(dir, &outcome.recomb_branch)?;
                let uploaded = self
                    .rsa
                    .upload(dir, &revision, &recomb_branch, &recombination.change.id, &[], false)
                    .context("uploading recombination for review")?;
                let mut updated = recombination.clone();
                updated.change = uploaded;
                updated.recombine_status = RecombineStatus::Succeeded;
                updated.evicted_commits = outcome.removed_commits;
                Ok(updated)
            }
            Err(err) if kind == Kind::EvolutionDiversity => {
                slog::warn!(self.logger, "cherry-pick recombination conflicted, uploading with conflict comment";
                    "error" => err.to_string());
                let mut updated = recombination.clone();
                updated.recombine_status = RecombineStatus::Blocked;
                if let Ok(uploaded) = self.rsa.upload(dir, &recombination.change.revision, &recomb_branch, &recombination.change.id, &[], false) {
                    let number = uploaded.number.clone().unwrap_or_default();
                    let patchset = uploaded.patchset_number.clone().unwrap_or_default();
                    let _ = self.rsa.comment(&number, &patchset, CHERRYPICK_CONFLICT_HINT, Some(-1), None);
                    updated.change = uploaded;
                }
                Ok(updated)
            }
            Err(err) => Err(err),
        }
    }

    fn build_request(&self, recombination: &Recombination, _branch_map: &BranchMap) -> RecombineRequest {
        let main = change_to_source_ref(recombination.sources.main());
        let patches = change_to_source_ref(recombination.sources.patches());
        RecombineRequest {
            main,
            patches,
            replication_strategy: recombination.replication_strategy,
            target_replacement_branch: recombination.sources.target_replacement_branch().map(str::to_string),
            permanent_patches: Vec::new(),
            replica_remote: self.config.replica.name.clone(),
        }
    }

    /// §4.5.3 PRESENT: for `lock-and-backports`, a `BLOCKED` record whose
    /// comments contain the literal `DISCARD` command is abandoned.
    pub fn handle_present(&self, recombination: &Recombination) -> Result<Recombination> {
        let mut updated = recombination.clone();
        if recombination.replication_strategy == ReplicationStrategy::LockAndBackports
            && recombination.recombine_status == RecombineStatus::Blocked
        {
            if self.dry_run {
                self.logger_note("would scan comments for DISCARD");
                return Ok(updated);
            }
            let number = recombination.change.number.clone().unwrap_or_default();
            let patchset = recombination.change.patchset_number.clone().unwrap_or_default();
            if !number.is_empty() {
                let comments = self.rsa.list_comments(&number)?;
                if comments.iter().any(|c| c.trim() == "DISCARD" || c.contains("DISCARD")) {
                    self.rsa.abandon(&number, &patchset)?;
                    updated.recombine_status = RecombineStatus::Discarded;
                } else {
                    slog::info!(self.logger, "PRESENT recombination still blocked, no DISCARD comment found";
                        "recombination" => recombination.subject_first_line());
                }
            }
        }
        Ok(updated)
    }

    fn logger_note(&self, action: &str) {
        slog::info!(self.logger, "dry-run, skipping"; "action" => action.to_string());
    }

    /// §4.5.3 APPROVED.
    pub fn handle_approved(&self, dir: &Path, recombination: &Recombination, branch_map: &BranchMap) -> Result<()> {
        if self.dry_run {
            self.logger_note(&format!("would advance approved recombination {}", recombination.subject_first_line()));
            return Ok(());
        }
        let number = recombination.change.number.clone().unwrap_or_default();
        let patchset = recombination.change.patchset_number.clone().unwrap_or_default();

        match &recombination.sources {
            RecombinationSources::OriginalDiversity {
                main,
                target_replacement_branch,
                ..
            } => {
                self.vca.sync_replica(dir, &self.config.replica.name, branch_map.replica(), &main.revision)?;
                self.vca
                    .update_target_branch(dir, &self.config.replica.name, target_replacement_branch, branch_map.target())?;
                self.rsa.submit(&number, &patchset)?;
            }
            RecombinationSources::EvolutionDiversity { backport_review_id, .. } => {
                match backport_review_id {
                    Some(id) => {
                        if let Some(backport) = self.rsa.get_by_number(id)? {
                            match backport.status {
                                Status::Merged => self.rsa.submit(&number, &patchset)?,
                                Status::Abandoned => self.rsa.abandon(&number, &patchset)?,
                                _ => {}
                            }
                        }
                    }
                    None => {
                        slog::info!(self.logger, "generating backport proposal for evolution-diversity recombination";
                            "recombination" => recombination.subject_first_line());
                        let uploaded = self
                            .rsa
                            .upload(
                                dir,
                                &recombination.change.revision,
                                branch_map.patches(),
                                &recombination.change.id,
                                &[],
                                false,
                            )
                            .context("uploading backport proposal to patches branch")?;
                        let backport_number = uploaded.number.clone().context("backport upload produced no change number")?;

                        let message = self.vca.commit_message(dir, &recombination.change.revision)?;
                        let (_subject, mut metadata) = commit_message::parse_commit_message(&message)?;
                        metadata.patches_review = Some(backport_number);
                        let amended_message = commit_message::format_commit_message(Kind::EvolutionDiversity, &metadata)?;
                        let amended_revision =
                            self.vca.amend_commit_message(dir, &recombination.change.revision, &amended_message)?;
                        self.rsa
                            .upload(dir, &amended_revision, &recombination.change.branch, &recombination.change.id, &[], false)
                            .context("re-uploading recombination with backport-review metadata")?;
                    }
                }
            }
            RecombinationSources::ReplicaMutation {
                patches,
                target_replacement_branch,
                ..
            } => {
                if patches.status != Status::Merged {
                    if let (Some(patches_number), Some(patches_patchset)) = (&patches.number, &patches.patchset_number) {
                        self.rsa.approve(patches_number, patches_patchset)?;
                        self.rsa.submit(patches_number, patches_patchset)?;
                    }
                }
                self.vca
                    .update_target_branch(dir, &self.config.replica.name, target_replacement_branch, branch_map.target())?;
                self.rsa.submit(&number, &patchset)?;
            }
        }
        Ok(())
    }

    /// §4.5.3 MERGED.
    pub fn handle_merged(&self, dir: &Path, recombination: &Recombination, branch_map: &BranchMap) -> Result<()> {
        if recombination.replication_strategy != ReplicationStrategy::ChangeByChange {
            return Ok(());
        }
        if self.dry_run {
            self.logger_note(&format!("would sync replica and advance target for merged {}", recombination.subject_first_line()));
            return Ok(());
        }
        self.vca
            .sync_replica(dir, &self.config.replica.name, branch_map.replica(), recombination.sources.main().effective_revision())?;
        if let Some(target_replacement_branch) = recombination.sources.target_replacement_branch() {
            self.vca
                .update_target_branch(dir, &self.config.replica.name, target_replacement_branch, branch_map.target())?;
        }
        Ok(())
    }
}

fn change_to_source_ref(change: &Change) -> SourceRef {
    SourceRef {
        name: change.project_name.clone(),
        branch: change.branch.clone(),
        revision: change.revision.clone(),
        id: change.id.clone(),
        commit_message: if change.subject.is_empty() { None } else { Some(change.subject.clone()) },
        url: change.url.clone(),
    }
}

fn source_ref_to_change(source: &SourceRef) -> Change {
    Change {
        id: source.id.clone(),
        branch: source.branch.clone(),
        revision: source.revision.clone(),
        parent: String::new(),
        project_name: source.name.clone(),
        number: None,
        patchset_number: None,
        patchset_revision: None,
        status: Status::Present,
        subject: source.commit_message.clone().unwrap_or_default(),
        topic: None,
        url: source.url.clone(),
        approvals: Default::default(),
        merge_commit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, Status};

    fn segment(status: Status, start: usize, end: usize) -> Segment {
        Segment { status, start, end }
    }

    #[test]
    fn approved_segment_dropped_when_preceded_by_present() {
        let slice = Slice {
            segments: vec![
                segment(Status::Present, 0, 1),
                segment(Status::Approved, 1, 2),
            ],
        };
        assert!(ProjectEngine::approved_segments_to_process(&slice).is_empty());
    }

    #[test]
    fn approved_segment_kept_without_preceding_present() {
        let slice = Slice {
            segments: vec![segment(Status::Approved, 0, 1)],
        };
        assert_eq!(ProjectEngine::approved_segments_to_process(&slice).len(), 1);
    }

    #[test]
    fn only_last_merged_record_is_processed() {
        let slice = Slice {
            segments: vec![segment(Status::Merged, 0, 3), segment(Status::Missing, 3, 4)],
        };
        let recombinations: Vec<Recombination> = Vec::new();
        assert!(ProjectEngine::merged_record_to_process(&slice, &recombinations).is_none());
    }

    fn sample_project_config() -> crate::config::ProjectConfig {
        use crate::config::{OriginalConfig, ReplicaConfig};
        use std::collections::HashMap;
        crate::config::ProjectConfig {
            deploy_name: "proj-deploy".into(),
            replication_strategy: ReplicationStrategy::LockAndBackports,
            original: OriginalConfig {
                source_type: "git".into(),
                location: "git://example.com/proj".into(),
                name: "original".into(),
                watch_method: "poll".into(),
                watch_branches: vec!["master".into()],
                backports_start: HashMap::new(),
            },
            replica: ReplicaConfig {
                location: "ssh://gerrit.example.com:29418/proj".into(),
                name: "replica".into(),
                branch_mappings: HashMap::new(),
                mirror: false,
                ref_locks: HashMap::new(),
                tests: Vec::new(),
                success_reviewers_list: Vec::new(),
            },
            test_deps: HashMap::new(),
        }
    }

    fn blocked_recombination() -> Recombination {
        let main = Change {
            id: "Iupstream".into(),
            branch: "master".into(),
            revision: "a".repeat(40),
            parent: String::new(),
            project_name: "proj".into(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Merged,
            subject: String::new(),
            topic: Some("Iupstream".into()),
            url: None,
            approvals: Default::default(),
            merge_commit: None,
        };
        let patches = Change {
            id: "b".repeat(40),
            branch: "master-patches".into(),
            revision: "b".repeat(40),
            parent: String::new(),
            project_name: "proj".into(),
            number: None,
            patchset_number: None,
            patchset_revision: None,
            status: Status::Present,
            subject: String::new(),
            topic: None,
            url: None,
            approvals: Default::default(),
            merge_commit: None,
        };
        Recombination {
            change: Change {
                id: "Iupstream".into(),
                branch: "recomb-evolution-master-a1b2c3".into(),
                revision: String::new(),
                parent: String::new(),
                project_name: "proj".into(),
                number: Some("1234".into()),
                patchset_number: Some("1".into()),
                patchset_revision: None,
                status: Status::Present,
                subject: String::new(),
                topic: Some("Iupstream".into()),
                url: None,
                approvals: Default::default(),
                merge_commit: None,
            },
            sources: RecombinationSources::EvolutionDiversity {
                main,
                patches,
                backport_review_id: None,
            },
            replication_strategy: ReplicationStrategy::LockAndBackports,
            recombine_status: RecombineStatus::Blocked,
            evicted_commits: Vec::new(),
        }
    }

    #[test]
    fn handle_present_leaves_blocked_record_untouched_without_discard_comment() {
        let config = sample_project_config();
        let vca = GitVca::new(crate::logging::discard_logger());
        let rsa = crate::rsa::mock::MockAdapter::new();
        rsa.stub_comments("1234", vec!["still reviewing".to_string()]);
        let engine = ProjectEngine {
            project_name: "proj".to_string(),
            config: &config,
            vca: &vca,
            rsa: &rsa,
            logger: crate::logging::discard_logger(),
            dry_run: false,
        };
        let recombination = blocked_recombination();
        let updated = engine.handle_present(&recombination).unwrap();
        assert_eq!(updated.recombine_status, RecombineStatus::Blocked);
        assert_eq!(rsa.call_count("abandon"), 0);
    }

    #[test]
    fn handle_present_abandons_blocked_record_with_discard_comment() {
        let config = sample_project_config();
        let vca = GitVca::new(crate::logging::discard_logger());
        let rsa = crate::rsa::mock::MockAdapter::new();
        rsa.stub_comments("1234", vec!["patch 123\nDISCARD".to_string()]);
        let engine = ProjectEngine {
            project_name: "proj".to_string(),
            config: &config,
            vca: &vca,
            rsa: &rsa,
            logger: crate::logging::discard_logger(),
            dry_run: false,
        };
        let recombination = blocked_recombination();
        let updated = engine.handle_present(&recombination).unwrap();
        assert_eq!(updated.recombine_status, RecombineStatus::Discarded);
        assert_eq!(rsa.call_count("abandon"), 1);
    }
}

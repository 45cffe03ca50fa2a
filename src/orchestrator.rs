//! Multi-project orchestrator (§4.6): fans the six top-level commands out
//! over the filtered project set, isolating per-project and per-branch
//! failures so one broken project or midstream never aborts its siblings.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::config::{ProjectConfig, ProjectsConfig};
use crate::engine::ProjectEngine;
use crate::error::ConfigError;
use crate::journal::{Journal, Operation};
use crate::model::{BranchMap, Recombination, ReplicationStrategy, Status};
use crate::rsa::gerrit::GerritAdapter;
use crate::rsa::{QueryPredicate, ReviewServerAdapter};
use crate::vca::GitVca;

/// Narrows the project set by name, watch-method, and watch-branches, each
/// filter narrowing the previous (§4.6).
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub names: Option<Vec<String>>,
    pub watch_method: Option<String>,
    pub watch_branches: Option<Vec<String>>,
}

impl ProjectFilter {
    fn matches(&self, name: &str, project: &ProjectConfig) -> bool {
        if let Some(names) = &self.names {
            if !names.iter().any(|n| n == name) {
                return false;
            }
        }
        if let Some(method) = &self.watch_method {
            if &project.original.watch_method != method {
                return false;
            }
        }
        if let Some(branches) = &self.watch_branches {
            if !branches.iter().any(|b| project.original.watch_branches.contains(b)) {
                return false;
            }
        }
        true
    }
}

/// One test's relative result-file path, keyed by test type, per the
/// `<project>/<recombNumber>/vars.yaml` layout (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TestsBlock {
    types: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VarsYaml {
    target_project: String,
    recombination_dir: String,
    recombination_id: String,
    tests: HashMap<String, TestsBlock>,
}

/// Multi-project driver. Holds the loaded configuration and the explicit
/// execution parameters (§9 "no chdir"/"no global context" design notes);
/// every mutating operation is threaded through `dry_run` rather than an
/// implicit flag.
pub struct Orchestrator {
    config: ProjectsConfig,
    rev_deps: HashMap<String, Vec<String>>,
    base_dir: PathBuf,
    no_fetch: bool,
    dry_run: bool,
    logger: Logger,
    journal: Journal,
}

impl Orchestrator {
    pub fn new(config: ProjectsConfig, base_dir: PathBuf, no_fetch: bool, dry_run: bool, logger: Logger) -> Result<Self> {
        let rev_deps = config.reverse_dependencies();
        let journal = Journal::open(&base_dir)?;
        Ok(Self {
            config,
            rev_deps,
            base_dir,
            no_fetch,
            dry_run,
            logger,
            journal,
        })
    }

    fn filtered_projects<'a>(&'a self, filter: &ProjectFilter) -> Result<Vec<(&'a str, &'a ProjectConfig)>> {
        let projects: Vec<(&str, &ProjectConfig)> = self
            .config
            .projects
            .iter()
            .filter(|(name, project)| filter.matches(name, project))
            .map(|(name, project)| (name.as_str(), project))
            .collect();
        if projects.is_empty() {
            return Err(ConfigError::EmptyAfterFiltering.into());
        }
        Ok(projects)
    }

    fn repo_dir(&self, project_name: &str) -> PathBuf {
        self.base_dir.join(project_name)
    }

    /// Ensures the working repository exists with both remotes registered,
    /// fetching unless `--no-fetch` was passed.
    fn prepare_repo(&self, project_name: &str, project: &ProjectConfig) -> Result<GitVca> {
        let vca = GitVca::new(self.logger.clone());
        let dir = self.repo_dir(project_name);
        vca.init(&dir)?;
        vca.add_remote(&dir, "original", &project.original.location, !self.no_fetch, false)?;
        vca.add_remote(&dir, "replica", &project.replica.location, !self.no_fetch, true)?;
        Ok(vca)
    }

    fn rsa_for(&self, project: &ProjectConfig) -> GerritAdapter {
        let (ssh_target, port) = parse_ssh_location(&project.replica.location);
        GerritAdapter::new(ssh_target, port, "replica", self.logger.clone())
    }

    fn watched_branches<'a>(&self, project: &'a ProjectConfig, branch_filter: Option<&str>) -> Vec<&'a str> {
        project
            .original
            .watch_branches
            .iter()
            .map(String::as_str)
            .filter(|b| branch_filter.map_or(true, |f| f == *b))
            .collect()
    }

    /// `poll-original`: scans each watched branch for new upstream commits
    /// and drives the MISSING records of its slice through synthesis.
    pub fn poll_original(&self, filter: &ProjectFilter, branch_filter: Option<&str>) -> Result<()> {
        for (project_name, project) in self.filtered_projects(filter)? {
            if let Err(err) = self.poll_original_project(project_name, project, branch_filter) {
                slog::error!(self.logger, "project failed, skipping"; "project" => project_name, "error" => err.to_string());
                self.journal.record_with_message(
                    Operation::ProjectSkipped {
                        project: project_name.to_string(),
                        reason: "poll-original".to_string(),
                    },
                    err.to_string(),
                )?;
            }
        }
        Ok(())
    }

    fn poll_original_project(&self, project_name: &str, project: &ProjectConfig, branch_filter: Option<&str>) -> Result<()> {
        let vca = self.prepare_repo(project_name, project)?;
        let rsa = self.rsa_for(project);
        let dir = self.repo_dir(project_name);

        for original_branch in self.watched_branches(project, branch_filter) {
            let branch_map = BranchMap::new(original_branch, &project.replica.branch_mappings);
            if let Err(err) = self.poll_original_branch(project_name, project, &vca, &rsa, &dir, &branch_map) {
                slog::error!(self.logger, "branch scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn poll_original_branch(
        &self,
        project_name: &str,
        project: &ProjectConfig,
        vca: &GitVca,
        rsa: &GerritAdapter,
        dir: &Path,
        branch_map: &BranchMap,
    ) -> Result<()> {
        let engine = ProjectEngine {
            project_name: project_name.to_string(),
            config: project,
            vca,
            rsa,
            logger: self.logger.clone(),
            dry_run: self.dry_run,
        };
        let recombinations = engine.scan_branch(dir, branch_map)?;
        let slice = engine.build_slice(branch_map.original(), &recombinations)?;

        for segment in slice.segments_with_status(Status::Missing) {
            for recombination in &recombinations[segment.start..segment.end] {
                let updated = engine.handle_missing(dir, recombination, branch_map)?;
                if updated.change.number.is_some() {
                    self.journal.record(Operation::RecombinationUploaded {
                        project: project_name.to_string(),
                        topic: updated.change.topic.clone().unwrap_or_default(),
                        branch: updated.change.branch.clone(),
                    })?;
                }
            }
        }
        Ok(())
    }

    /// `poll-replica`: scans for replica-side mutations pending trial merge,
    /// and for `lock-and-backports` branches, processes PRESENT records'
    /// `DISCARD` comments.
    pub fn poll_replica(&self, filter: &ProjectFilter, change_id_filter: Option<&str>) -> Result<()> {
        for (project_name, project) in self.filtered_projects(filter)? {
            if let Err(err) = self.poll_replica_project(project_name, project, change_id_filter) {
                slog::error!(self.logger, "project failed, skipping"; "project" => project_name, "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn poll_replica_project(&self, project_name: &str, project: &ProjectConfig, change_id_filter: Option<&str>) -> Result<()> {
        let vca = self.prepare_repo(project_name, project)?;
        let rsa = self.rsa_for(project);
        let dir = self.repo_dir(project_name);

        for original_branch in &project.original.watch_branches {
            let branch_map = BranchMap::new(original_branch, &project.replica.branch_mappings);
            let engine = ProjectEngine {
                project_name: project_name.to_string(),
                config: project,
                vca: &vca,
                rsa: &rsa,
                logger: self.logger.clone(),
                dry_run: self.dry_run,
            };

            let recombinations = match engine.scan_branch(&dir, &branch_map) {
                Ok(r) => r,
                Err(err) => {
                    slog::error!(self.logger, "branch scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };
            let filtered: Vec<&Recombination> = recombinations
                .iter()
                .filter(|r| change_id_filter.map_or(true, |f| r.change.topic.as_deref() == Some(f)))
                .collect();

            let slice = match engine.build_slice(branch_map.original(), &recombinations) {
                Ok(s) => s,
                Err(err) => {
                    slog::error!(self.logger, "branch scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };
            for segment in slice.segments_with_status(Status::Present) {
                for recombination in &recombinations[segment.start..segment.end] {
                    if !filtered.iter().any(|r| r.change.topic == recombination.change.topic) {
                        continue;
                    }
                    engine.handle_present(recombination)?;
                }
            }

            // `new_replica_patch`/`scan_replica_patches`: discover proposed
            // local mutations on the patches branch itself and drive any
            // MISSING ones through Algorithm X.
            let mutations = match engine.scan_replica_mutations(&dir, &branch_map, change_id_filter) {
                Ok(m) => m,
                Err(err) => {
                    slog::error!(self.logger, "replica patches scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };
            let mutation_slice = match engine.build_slice(branch_map.patches(), &mutations) {
                Ok(s) => s,
                Err(err) => {
                    slog::error!(self.logger, "replica patches scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };
            for segment in mutation_slice.segments_with_status(Status::Missing) {
                for recombination in &mutations[segment.start..segment.end] {
                    let updated = engine.handle_missing(&dir, recombination, &branch_map)?;
                    if updated.change.number.is_some() {
                        self.journal.record(Operation::RecombinationUploaded {
                            project: project_name.to_string(),
                            topic: updated.change.topic.clone().unwrap_or_default(),
                            branch: updated.change.branch.clone(),
                        })?;
                    }
                }
            }
            for segment in mutation_slice.segments_with_status(Status::Present) {
                for recombination in &mutations[segment.start..segment.end] {
                    engine.handle_present(recombination)?;
                }
            }
        }
        Ok(())
    }

    /// `merge-recombinations` (approved scan, §4.6): processes the APPROVED
    /// and leading MERGED segments of each branch's slice.
    pub fn merge_recombinations(&self, filter: &ProjectFilter, recomb_id_filter: Option<&str>) -> Result<()> {
        for (project_name, project) in self.filtered_projects(filter)? {
            if let Err(err) = self.merge_recombinations_project(project_name, project, recomb_id_filter) {
                slog::error!(self.logger, "project failed, skipping"; "project" => project_name, "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn merge_recombinations_project(&self, project_name: &str, project: &ProjectConfig, recomb_id_filter: Option<&str>) -> Result<()> {
        let vca = self.prepare_repo(project_name, project)?;
        let rsa = self.rsa_for(project);
        let dir = self.repo_dir(project_name);

        for original_branch in &project.original.watch_branches {
            let branch_map = BranchMap::new(original_branch, &project.replica.branch_mappings);
            let engine = ProjectEngine {
                project_name: project_name.to_string(),
                config: project,
                vca: &vca,
                rsa: &rsa,
                logger: self.logger.clone(),
                dry_run: self.dry_run,
            };

            let recombinations = match engine.scan_branch(&dir, &branch_map) {
                Ok(r) => r,
                Err(err) => {
                    slog::error!(self.logger, "branch scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };
            let slice = match engine.build_slice(branch_map.original(), &recombinations) {
                Ok(s) => s,
                Err(err) => {
                    slog::error!(self.logger, "branch scan aborted"; "project" => project_name, "branch" => original_branch, "error" => err.to_string());
                    continue;
                }
            };

            if let Some(merged) = ProjectEngine::merged_record_to_process(&slice, &recombinations) {
                if recomb_id_filter.map_or(true, |f| merged.change.number.as_deref() == Some(f)) {
                    if let Err(err) = engine.handle_merged(&dir, merged, &branch_map) {
                        slog::error!(self.logger, "MERGED advance failed, leaving for a later pass";
                            "project" => project_name, "error" => err.to_string());
                    } else {
                        self.journal.record(Operation::TargetAdvanced {
                            project: project_name.to_string(),
                            target_branch: branch_map.target().to_string(),
                        })?;
                    }
                }
            }

            for segment in ProjectEngine::approved_segments_to_process(&slice) {
                for recombination in &recombinations[segment.start..segment.end] {
                    if recomb_id_filter.map_or(true, |f| recombination.change.number.as_deref() == Some(f)) {
                        if let Err(err) = engine.handle_approved(&dir, recombination, &branch_map) {
                            slog::error!(self.logger, "APPROVED advance failed, leaving in prior state for a later pass";
                                "project" => project_name, "recombination" => recombination.subject_first_line(), "error" => err.to_string());
                            continue;
                        }
                        self.journal.record(Operation::RecombinationSubmitted {
                            project: project_name.to_string(),
                            number: recombination.change.number.clone().unwrap_or_default(),
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// `prepare-tests`: copies each PRESENT recombination's working tree and
    /// writes its `vars.yaml`, plus the shared `project-vars.yaml`.
    pub fn prepare_tests(&self, filter: &ProjectFilter, tests_basedir: &Path, recomb_id_filter: Option<&str>) -> Result<()> {
        fs::create_dir_all(tests_basedir).with_context(|| format!("failed to create {tests_basedir:?}"))?;
        let project_vars_path = tests_basedir.join("project-vars.yaml");
        let yaml = serde_yaml::to_string(&self.config).context("failed to serialize project-vars.yaml")?;
        fs::write(&project_vars_path, yaml).context("failed to write project-vars.yaml")?;

        for (project_name, project) in self.filtered_projects(filter)? {
            if let Err(err) = self.prepare_tests_project(project_name, project, tests_basedir, recomb_id_filter) {
                slog::error!(self.logger, "project failed, skipping"; "project" => project_name, "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn prepare_tests_project(&self, project_name: &str, project: &ProjectConfig, tests_basedir: &Path, recomb_id_filter: Option<&str>) -> Result<()> {
        let vca = self.prepare_repo(project_name, project)?;
        let rsa = self.rsa_for(project);
        let dir = self.repo_dir(project_name);
        let project_tests_dir = tests_basedir.join(project_name);

        for original_branch in &project.original.watch_branches {
            let branch_map = BranchMap::new(original_branch, &project.replica.branch_mappings);
            let engine = ProjectEngine {
                project_name: project_name.to_string(),
                config: project,
                vca: &vca,
                rsa: &rsa,
                logger: self.logger.clone(),
                dry_run: self.dry_run,
            };
            let recombinations = engine.scan_branch(&dir, &branch_map)?;

            let untested: Vec<(String, String, String)> = recombinations
                .iter()
                .filter(|r| r.status() == Status::Present)
                .filter(|r| recomb_id_filter.map_or(true, |f| r.change.number.as_deref() == Some(f)))
                .filter_map(|r| {
                    let number = r.change.number.clone()?;
                    let patchset = r.change.patchset_number.clone().unwrap_or_else(|| "1".to_string());
                    let last_two = last_two_digits(&number);
                    Some((number, patchset, last_two))
                })
                .collect();

            if untested.is_empty() {
                continue;
            }
            let fetched = vca.fetch_recomb(&dir, &project_tests_dir, &untested, "replica")?;

            for recombination in recombinations.iter().filter(|r| r.status() == Status::Present) {
                let Some(number) = recombination.change.number.clone() else { continue };
                let Some(recomb_dir) = fetched.get(&number).cloned() else { continue };

                let tests = self.build_tests_map(project_name);
                let vars = VarsYaml {
                    target_project: project_name.to_string(),
                    recombination_dir: recomb_dir.display().to_string(),
                    recombination_id: number.clone(),
                    tests,
                };
                let vars_path = recomb_dir.join("vars.yaml");
                let yaml = serde_yaml::to_string(&vars).context("failed to serialize vars.yaml")?;
                fs::write(&vars_path, yaml).with_context(|| format!("failed to write {vars_path:?}"))?;
            }
        }
        Ok(())
    }

    /// Own test types plus reverse-dependents' declared tags (§4.6).
    fn build_tests_map(&self, project_name: &str) -> HashMap<String, TestsBlock> {
        let mut tests = HashMap::new();
        if let Some(project) = self.config.projects.get(project_name) {
            if !project.replica.tests.is_empty() {
                let types = project
                    .replica
                    .tests
                    .iter()
                    .map(|t| (t.clone(), format!("results/{t}/{project_name}_results.xml")))
                    .collect();
                tests.insert(project_name.to_string(), TestsBlock { types });
            }
        }
        if let Some(dependents) = self.rev_deps.get(project_name) {
            for dependent in dependents {
                let Some(dependent_config) = self.config.projects.get(dependent) else { continue };
                let Some(tags) = dependent_config.test_deps.get(project_name) else { continue };
                let types = tags
                    .iter()
                    .map(|tag| (tag.clone(), format!("results/{tag}/{dependent}_results.xml")))
                    .collect();
                tests.insert(dependent.clone(), TestsBlock { types });
            }
        }
        tests
    }

    /// `vote-recombinations`: reads every `vars.yaml` under `tests_basedir`,
    /// scores the recombination by result-file presence, and approves or
    /// rejects it accordingly.
    pub fn vote_recombinations(&self, filter: &ProjectFilter, tests_basedir: &Path, recomb_id_filter: Option<&str>) -> Result<()> {
        let allowed_projects = self.filtered_projects(filter)?;
        for vars_path in find_vars_files(tests_basedir)? {
            if let Err(err) = self.vote_one(&vars_path, &allowed_projects, recomb_id_filter) {
                slog::error!(self.logger, "voting on recombination failed"; "vars_path" => vars_path.display().to_string(), "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn vote_one(&self, vars_path: &Path, allowed_projects: &[(&str, &ProjectConfig)], recomb_id_filter: Option<&str>) -> Result<()> {
        let text = fs::read_to_string(vars_path).with_context(|| format!("failed to read {vars_path:?}"))?;
        let vars: VarsYaml = serde_yaml::from_str(&text).with_context(|| format!("failed to parse {vars_path:?}"))?;

        if recomb_id_filter.map_or(false, |f| f != vars.recombination_id) {
            return Ok(());
        }
        let Some((_, project)) = allowed_projects.iter().find(|(name, _)| *name == vars.target_project) else {
            return Ok(());
        };

        let recomb_dir = vars_path.parent().unwrap_or(vars_path);
        let (score, reason) = score_results(recomb_dir, &vars.tests);

        let rsa = self.rsa_for(project);
        let patchset = "1";
        if score == 100 {
            rsa.approve(&vars.recombination_id, patchset)?;
            self.journal.record(Operation::RecombinationSubmitted {
                project: vars.target_project.clone(),
                number: vars.recombination_id.clone(),
            })?;
        } else {
            rsa.comment(&vars.recombination_id, patchset, &reason, Some(-1), Some(-2))?;
            rsa.reject(&vars.recombination_id, patchset)?;
        }
        Ok(())
    }

    /// `cleanup`: deletes replica scratch branches whose recombination is no
    /// longer open (merged, abandoned, or never found), advisory-locked by
    /// the caller so this never races a concurrent `merge-recombinations`.
    pub fn cleanup(&self, filter: &ProjectFilter) -> Result<()> {
        for (project_name, project) in self.filtered_projects(filter)? {
            if let Err(err) = self.cleanup_project(project_name, project) {
                slog::error!(self.logger, "cleanup failed for project"; "project" => project_name, "error" => err.to_string());
            }
        }
        Ok(())
    }

    fn cleanup_project(&self, project_name: &str, project: &ProjectConfig) -> Result<()> {
        let vca = self.prepare_repo(project_name, project)?;
        let rsa = self.rsa_for(project);
        let dir = self.repo_dir(project_name);

        let mut stale = Vec::new();
        for pattern in ["recomb-*", "target-*"] {
            for branch in vca.list_branches(&dir, "replica", Some(pattern))? {
                let predicate = QueryPredicate {
                    branch: Some(owning_recomb_branch(&branch)),
                    project: Some(project_name.to_string()),
                    ..Default::default()
                };
                let changes = rsa.query(&predicate)?;
                let is_active = changes
                    .iter()
                    .any(|c| !matches!(c.status, Status::Merged | Status::Abandoned));
                if !is_active {
                    stale.push(branch);
                }
            }
        }

        if stale.is_empty() {
            return Ok(());
        }
        if self.dry_run {
            slog::info!(self.logger, "dry-run, skipping branch deletion"; "project" => project_name, "count" => stale.len());
            return Ok(());
        }
        vca.delete_remote_branches(&dir, "replica", &stale)?;
        for branch in &stale {
            self.journal.record(Operation::BranchDeleted {
                project: project_name.to_string(),
                branch: branch.clone(),
            })?;
        }
        Ok(())
    }

    /// `doctor`: validates the filtered project set's configuration and
    /// remote reachability, and reports the base-dir lock's state, all
    /// without creating a working repository or writing the lock file.
    pub fn doctor(&self, filter: &ProjectFilter) -> Result<Vec<String>> {
        let vca = GitVca::new(self.logger.clone());
        let mut issues = Vec::new();
        for (project_name, project) in self.filtered_projects(filter)? {
            if lock_and_backports_misconfigured(project) {
                issues.push(format!(
                    "{project_name}: lock-and-backports strategy with neither backports-start nor ref-locks set, scans will fall back to the replica tip"
                ));
            }
            if !vca.remote_reachable(&project.original.location) {
                issues.push(format!(
                    "{project_name}: original remote unreachable ({})",
                    project.original.location
                ));
            }
            if !vca.remote_reachable(&project.replica.location) {
                issues.push(format!(
                    "{project_name}: replica remote unreachable ({})",
                    project.replica.location
                ));
            }
        }
        if let Some(issue) = self.lock_issue() {
            issues.push(issue);
        }
        Ok(issues)
    }

    fn lock_issue(&self) -> Option<String> {
        let lock_path = self.base_dir.join(".gitnetics").join("gitnetics.lock");
        let content = fs::read_to_string(&lock_path).ok()?;
        let holder_pid: u32 = content.trim().split(':').next()?.parse().ok()?;
        Some(format!(
            "base-dir lock held by pid {holder_pid} ({}); remove it if that process is no longer running",
            lock_path.display()
        ))
    }
}

/// `(ssh_target, port)` parsed out of a `ssh://[user@]host[:port]/path`
/// style replica location, defaulting to Gerrit's conventional SSH port.
fn parse_ssh_location(location: &str) -> (String, u16) {
    const DEFAULT_GERRIT_PORT: u16 = 29418;
    let stripped = location.strip_prefix("ssh://").unwrap_or(location);
    let authority = stripped.split('/').next().unwrap_or(stripped);
    match authority.rsplit_once(':') {
        Some((host_part, port_str)) => {
            let port = port_str.parse().unwrap_or(DEFAULT_GERRIT_PORT);
            (host_part.to_string(), port)
        }
        None => (authority.to_string(), DEFAULT_GERRIT_PORT),
    }
}

/// Reviews are only ever uploaded keyed to the `recomb-*` branch name
/// (never `target-*`, see spec.md:172); a `target-replacement` branch shares
/// its owning recombination's `<kind>-<originalBranch>-<rev>` suffix, so this
/// recovers the owning `recomb-*` name to query the review server with.
/// Branches that don't start with `target-` are returned unchanged.
fn owning_recomb_branch(branch: &str) -> String {
    match branch.strip_prefix("target-") {
        Some(rest) => format!("recomb-{rest}"),
        None => branch.to_string(),
    }
}

/// Last two digits of a Gerrit change number, used to shard `refs/changes`.
fn last_two_digits(number: &str) -> String {
    if number.len() <= 2 {
        format!("{number:0>2}")
    } else {
        number[number.len() - 2..].to_string()
    }
}

fn find_vars_files(tests_basedir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !tests_basedir.exists() {
        return Ok(out);
    }
    for project_entry in fs::read_dir(tests_basedir)? {
        let project_entry = project_entry?;
        if !project_entry.path().is_dir() {
            continue;
        }
        for recomb_entry in fs::read_dir(project_entry.path())? {
            let recomb_entry = recomb_entry?;
            let vars_path = recomb_entry.path().join("vars.yaml");
            if vars_path.exists() {
                out.push(vars_path);
            }
        }
    }
    Ok(out)
}

/// `lock-and-backports` with neither `backports-start` nor `ref-locks` set
/// falls back to scanning from the replica tip (§4.5.1), which silently
/// drops the "frozen at a lock" semantics the strategy is named for.
fn lock_and_backports_misconfigured(project: &ProjectConfig) -> bool {
    project.replication_strategy == ReplicationStrategy::LockAndBackports
        && project.original.backports_start.is_empty()
        && project.replica.ref_locks.is_empty()
}

/// Scores a recombination 100 if every declared result file is present,
/// else 0 with the literal reason string from §6.
fn score_results(recomb_dir: &Path, tests: &HashMap<String, TestsBlock>) -> (u8, String) {
    for block in tests.values() {
        for rel_path in block.types.values() {
            if !recomb_dir.join(rel_path).is_file() {
                return (0, "missing test results".to_string());
            }
        }
    }
    (100, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_filter_narrows_by_name_then_watch_method() {
        let mut project = sample_project();
        project.original.watch_method = "poll".to_string();

        let filter = ProjectFilter {
            names: Some(vec!["proj1".to_string()]),
            watch_method: Some("poll".to_string()),
            watch_branches: None,
        };
        assert!(filter.matches("proj1", &project));
        assert!(!filter.matches("proj2", &project));

        let filter_wrong_method = ProjectFilter {
            names: None,
            watch_method: Some("push".to_string()),
            watch_branches: None,
        };
        assert!(!filter_wrong_method.matches("proj1", &project));
    }

    #[test]
    fn parse_ssh_location_extracts_host_and_port() {
        assert_eq!(parse_ssh_location("ssh://user@gerrit.example.com:29419/proj"), ("user@gerrit.example.com".to_string(), 29419));
        assert_eq!(parse_ssh_location("gerrit.example.com"), ("gerrit.example.com".to_string(), 29418));
    }

    #[test]
    fn owning_recomb_branch_maps_target_replacement_to_its_recomb_branch() {
        assert_eq!(owning_recomb_branch("target-original-master-a1b2c3"), "recomb-original-master-a1b2c3");
        assert_eq!(owning_recomb_branch("target-patches-master-a1b2c3"), "recomb-patches-master-a1b2c3");
        assert_eq!(owning_recomb_branch("recomb-original-master-a1b2c3"), "recomb-original-master-a1b2c3");
    }

    #[test]
    fn last_two_digits_pads_small_numbers() {
        assert_eq!(last_two_digits("7"), "07");
        assert_eq!(last_two_digits("123"), "23");
    }

    #[test]
    fn score_results_reports_missing_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut types = HashMap::new();
        types.insert("unit".to_string(), "results/unit/proj_results.xml".to_string());
        let mut tests = HashMap::new();
        tests.insert("proj".to_string(), TestsBlock { types });

        let (score, reason) = score_results(dir.path(), &tests);
        assert_eq!(score, 0);
        assert_eq!(reason, "missing test results");

        fs::create_dir_all(dir.path().join("results/unit")).unwrap();
        fs::write(dir.path().join("results/unit/proj_results.xml"), "<xml/>").unwrap();
        let (score, _) = score_results(dir.path(), &tests);
        assert_eq!(score, 100);
    }

    #[test]
    fn lock_and_backports_misconfigured_requires_start_or_lock() {
        let mut project = sample_project();
        project.replication_strategy = ReplicationStrategy::LockAndBackports;
        assert!(lock_and_backports_misconfigured(&project));

        project.replica.ref_locks.insert("master".to_string(), "deadbeef".to_string());
        assert!(!lock_and_backports_misconfigured(&project));
    }

    #[test]
    fn lock_and_backports_misconfigured_ignores_change_by_change() {
        let project = sample_project();
        assert!(!lock_and_backports_misconfigured(&project));
    }

    #[test]
    fn lock_issue_reports_held_lock_pid() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join(".gitnetics");
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(state_dir.join("gitnetics.lock"), "4242:1700000000\n").unwrap();

        let orchestrator = Orchestrator::new(
            ProjectsConfig { projects: HashMap::new() },
            dir.path().to_path_buf(),
            true,
            true,
            crate::logging::discard_logger(),
        )
        .unwrap();

        let issue = orchestrator.lock_issue().expect("lock file present");
        assert!(issue.contains("4242"));
    }

    #[test]
    fn lock_issue_is_none_without_a_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            ProjectsConfig { projects: HashMap::new() },
            dir.path().to_path_buf(),
            true,
            true,
            crate::logging::discard_logger(),
        )
        .unwrap();
        assert!(orchestrator.lock_issue().is_none());
    }

    fn sample_project() -> ProjectConfig {
        use crate::config::{OriginalConfig, ReplicaConfig};
        use crate::model::ReplicationStrategy;
        ProjectConfig {
            deploy_name: "proj1-deploy".into(),
            replication_strategy: ReplicationStrategy::ChangeByChange,
            original: OriginalConfig {
                source_type: "git".into(),
                location: "git://example.com/proj1".into(),
                name: "original".into(),
                watch_method: "poll".into(),
                watch_branches: vec!["master".into()],
                backports_start: HashMap::new(),
            },
            replica: ReplicaConfig {
                location: "ssh://gerrit.example.com:29418/proj1".into(),
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
}

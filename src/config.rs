//! Project configuration (§6): a YAML map from project name to its
//! `original`/`replica` sources, loaded once per invocation, validated
//! before the orchestrator is constructed, and handed to it unmodified.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::ReplicationStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalConfig {
    #[serde(rename = "type")]
    pub source_type: String,
    pub location: String,
    pub name: String,
    #[serde(rename = "watch-method")]
    pub watch_method: String,
    #[serde(rename = "watch-branches", default)]
    pub watch_branches: Vec<String>,
    #[serde(rename = "backports-start", default)]
    pub backports_start: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub location: String,
    pub name: String,
    #[serde(rename = "branch-mappings", default)]
    pub branch_mappings: HashMap<String, String>,
    #[serde(default)]
    pub mirror: bool,
    #[serde(rename = "ref-locks", default)]
    pub ref_locks: HashMap<String, String>,
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub success_reviewers_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(rename = "deploy-name")]
    pub deploy_name: String,
    #[serde(rename = "replication-strategy")]
    pub replication_strategy: ReplicationStrategy,
    pub original: OriginalConfig,
    pub replica: ReplicaConfig,
    #[serde(rename = "test-deps", default)]
    pub test_deps: HashMap<String, Vec<String>>,
}

/// Overrides a local, uncommitted file may apply, following the same
/// "local overrides repo-committed config" precedence as the rest of the
/// layered-config ambient stack (§6 config layering).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalOverride {
    #[serde(rename = "watch-method")]
    pub watch_method: Option<String>,
    #[serde(rename = "watch-branches")]
    pub watch_branches: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    #[serde(flatten)]
    pub projects: HashMap<String, ProjectConfig>,
}

impl ProjectsConfig {
    /// Loads the authoritative projects file, then applies
    /// `<base_dir>/.gitnetics/local.yaml` overrides if present.
    pub fn load(projects_conf: &Path, base_dir: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(projects_conf)
            .map_err(|_| ConfigError::NotFound(projects_conf.display().to_string()))?;
        let mut config: ProjectsConfig =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let local_path = base_dir.join(".gitnetics").join("local.yaml");
        if local_path.exists() {
            let local_text = std::fs::read_to_string(&local_path)
                .with_context(|| format!("failed to read {}", local_path.display()))?;
            let overrides: HashMap<String, LocalOverride> =
                serde_yaml::from_str(&local_text).map_err(|e| ConfigError::Parse(e.to_string()))?;
            for (project, over) in overrides {
                if let Some(project_config) = config.projects.get_mut(&project) {
                    if let Some(method) = over.watch_method {
                        project_config.original.watch_method = method;
                    }
                    if let Some(branches) = over.watch_branches {
                        project_config.original.watch_branches = branches;
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, project) in &self.projects {
            if project.original.watch_branches.is_empty() {
                return Err(ConfigError::NoWatchedBranches { project: name.clone() }.into());
            }
        }
        Ok(())
    }

    /// `test-deps` inverted to `rev-deps`: for every `project -> {other:
    /// [tags]}` entry, `other` gains `project` in its reverse-dependents
    /// list. Computed once, handed to the orchestrator, never recomputed.
    pub fn reverse_dependencies(&self) -> HashMap<String, Vec<String>> {
        let mut rev_deps: HashMap<String, Vec<String>> = HashMap::new();
        for (project, config) in &self.projects {
            for other in config.test_deps.keys() {
                rev_deps.entry(other.clone()).or_default().push(project.clone());
            }
        }
        rev_deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_yaml() -> &'static str {
        r#"
proj1:
  deploy-name: proj1-deploy
  replication-strategy: change-by-change
  original:
    type: git
    location: git://example.com/proj1
    name: original
    watch-method: poll
    watch-branches: [master]
  replica:
    location: git://example.com/proj1-replica
    name: replica
    branch-mappings: {}
"#
    }

    #[test]
    fn loads_and_validates_minimal_config() {
        let dir = tempdir().unwrap();
        let conf_path = dir.path().join("projects.yaml");
        std::fs::write(&conf_path, sample_yaml()).unwrap();

        let config = ProjectsConfig::load(&conf_path, dir.path()).unwrap();
        let project = config.projects.get("proj1").unwrap();
        assert_eq!(project.original.watch_branches, vec!["master".to_string()]);
        assert_eq!(project.replication_strategy, ReplicationStrategy::ChangeByChange);
    }

    #[test]
    fn missing_watch_branches_is_a_config_error() {
        let dir = tempdir().unwrap();
        let conf_path = dir.path().join("projects.yaml");
        let yaml = sample_yaml().replace("watch-branches: [master]", "watch-branches: []");
        std::fs::write(&conf_path, yaml).unwrap();

        let err = ProjectsConfig::load(&conf_path, dir.path()).unwrap_err();
        assert!(err.to_string().contains("no watched branches"));
    }

    #[test]
    fn local_override_replaces_watch_branches() {
        let dir = tempdir().unwrap();
        let conf_path = dir.path().join("projects.yaml");
        std::fs::write(&conf_path, sample_yaml()).unwrap();

        let local_dir = dir.path().join(".gitnetics");
        std::fs::create_dir_all(&local_dir).unwrap();
        std::fs::write(local_dir.join("local.yaml"), "proj1:\n  watch-branches: [stable]\n").unwrap();

        let config = ProjectsConfig::load(&conf_path, dir.path()).unwrap();
        let project = config.projects.get("proj1").unwrap();
        assert_eq!(project.original.watch_branches, vec!["stable".to_string()]);
    }
}

//! Typed error kinds for each adapter layer.
//!
//! Adapters return these through `anyhow::Result` so callers can either
//! match on the concrete variant (state machine driver) or just propagate
//! with `.context(...)` (everything else).

use thiserror::Error;

/// Errors surfaced by the version-control adapter.
#[derive(Debug, Error)]
pub enum VcaError {
    #[error("failed to push {branch} to {remote}: {detail}")]
    Push {
        remote: String,
        branch: String,
        detail: String,
    },

    #[error("fast-forward merge of {revision} into {branch} failed: {detail}")]
    Merge {
        branch: String,
        revision: String,
        detail: String,
    },

    #[error("failed to fetch from remote {remote}: {detail}")]
    RemoteFetch { remote: String, detail: String },

    #[error("recombination could not produce a clean tree:\n{status}\nhint: {hint}")]
    RecombinationFailed { status: String, hint: String },

    #[error("synthesis attempt failed: {0}")]
    Attempt(String),

    #[error("shell command `{command}` exited with status {code}: {stderr}")]
    Shell {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Errors surfaced by the review-server adapter.
#[derive(Debug, Error)]
pub enum RsaError {
    #[error("upload of branch {branch} (topic {topic}) produced no review record")]
    Upload { branch: String, topic: String },

    #[error("submit of change {number} did not result in a merged status")]
    Submit { number: String },

    #[error("approve of change {number} failed: {detail}")]
    Approve { number: String, detail: String },

    #[error("abandon of change {number} failed: {detail}")]
    Abandon { number: String, detail: String },

    #[error("recombination commit message could not be decoded: {0}")]
    Decode(String),
}

/// Errors surfaced by the per-project engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "status monotonicity violated on branch {branch}: impact rose from {previous} to {current} at index {index}"
    )]
    ConstraintViolation {
        branch: String,
        previous: u8,
        current: u8,
        index: usize,
    },

    #[error("unknown recombination kind: {0}")]
    RecombinationType(String),
}

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("projects configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to parse projects configuration: {0}")]
    Parse(String),

    #[error("project {project} has no watched branches")]
    NoWatchedBranches { project: String },

    #[error("no projects remain after applying filters")]
    EmptyAfterFiltering,
}

/// Errors surfaced by the advisory base-dir lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another gitnetics invocation holds the lock for {base_dir} (pid {holder_pid:?})")]
    Held {
        base_dir: String,
        holder_pid: Option<u32>,
    },
}

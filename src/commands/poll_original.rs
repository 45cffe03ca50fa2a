//! `poll-original [-b BRANCH]`: detect new upstream commits and synthesize
//! the recombinations that cover them.

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter, branch: Option<String>) -> Result<()> {
    orchestrator.poll_original(filter, branch.as_deref())
}

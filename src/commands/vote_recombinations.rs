//! `vote-recombinations -t DIR [-r RECOMB_ID]`: score each prepared
//! recombination by test-result presence and approve or reject it.

use std::path::PathBuf;

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter, tests_basedir: PathBuf, recomb_id: Option<String>) -> Result<()> {
    orchestrator.vote_recombinations(filter, &tests_basedir, recomb_id.as_deref())
}

//! `merge-recombinations [-r RECOMB_ID]`: the approved scan (§4.6) — drives
//! APPROVED and leading MERGED segments of each branch's slice forward.

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter, recomb_id: Option<String>) -> Result<()> {
    orchestrator.merge_recombinations(filter, recomb_id.as_deref())
}

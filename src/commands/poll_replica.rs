//! `poll-replica [-c CHANGE_ID]`: advance PRESENT recombinations whose
//! comments carry a `DISCARD` command, per `lock-and-backports` branches.

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter, change_id: Option<String>) -> Result<()> {
    orchestrator.poll_replica(filter, change_id.as_deref())
}

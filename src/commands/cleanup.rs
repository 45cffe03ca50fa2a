//! `cleanup`: delete replica scratch branches for recombinations that are no
//! longer open.

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter) -> Result<()> {
    orchestrator.cleanup(filter)
}

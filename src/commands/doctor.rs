//! `doctor`: validates project configuration, remote reachability, and lock
//! state, without mutating any repository or review.

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter) -> Result<()> {
    let issues = orchestrator.doctor(filter)?;
    if issues.is_empty() {
        println!("All checks passed.");
        return Ok(());
    }
    println!("Found {} issue(s):", issues.len());
    for issue in &issues {
        println!("  - {issue}");
    }
    anyhow::bail!("{} issue(s) found", issues.len());
}

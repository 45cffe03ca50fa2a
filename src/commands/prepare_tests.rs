//! `prepare-tests -t DIR [-r RECOMB_ID]`: stage each PRESENT recombination's
//! working tree and `vars.yaml` under the external test runner's basedir.

use std::path::PathBuf;

use anyhow::Result;

use crate::orchestrator::{Orchestrator, ProjectFilter};

pub fn run(orchestrator: &Orchestrator, filter: &ProjectFilter, tests_basedir: PathBuf, recomb_id: Option<String>) -> Result<()> {
    orchestrator.prepare_tests(filter, &tests_basedir, recomb_id.as_deref())
}

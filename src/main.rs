use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod commit_message;
mod config;
mod engine;
mod error;
mod journal;
mod lock;
mod logging;
mod model;
mod orchestrator;
mod rsa;
mod shell;
mod vca;

use config::ProjectsConfig;
use lock::BaseDirLock;
use orchestrator::{Orchestrator, ProjectFilter};

#[derive(Parser)]
#[command(
    name = "gitnetics",
    about = "Reconciles a replica repository with its upstream original while preserving local patches",
    version,
    disable_help_subcommand = true
)]
struct Cli {
    /// Path to the YAML projects configuration file
    #[arg(long, global = true, default_value = "projects.yaml")]
    projects_conf: PathBuf,

    /// Working directory holding one clone per managed project
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Restrict to these projects (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    projects: Option<Vec<String>>,

    /// Restrict to projects whose original declares this watch-method
    #[arg(long, global = true)]
    watch_method: Option<String>,

    /// Restrict to projects watching at least one of these branches (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    watch_branches: Option<Vec<String>>,

    /// Skip fetching remotes before scanning
    #[arg(long, global = true)]
    no_fetch: bool,

    /// Log command execution and adapter calls at increasing verbosity
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Report what would happen without mutating any repository or review
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ═══════════════════════════════════════════════════════════════════
    // SCAN COMMANDS
    // ═══════════════════════════════════════════════════════════════════
    #[command(next_help_heading = "Scan Commands")]
    /// Detect new upstream commits and synthesize covering recombinations
    #[command(after_help = "\
Examples:
  poll-original           Scan every watched branch
  poll-original -b main    Scan only the main branch")]
    PollOriginal {
        /// Scan only this watched branch
        #[arg(short = 'b', long)]
        branch: Option<String>,
    },
    /// Process PRESENT recombinations' `DISCARD` comments
    PollReplica {
        /// Restrict to the recombination whose topic is this Change-Id
        #[arg(short = 'c', long = "change-id")]
        change_id: Option<String>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // REVIEW COMMANDS
    // ═══════════════════════════════════════════════════════════════════
    #[command(next_help_heading = "Review Commands")]
    /// Advance APPROVED and leading MERGED recombinations (the approved scan)
    MergeRecombinations {
        /// Restrict to this recombination's review number
        #[arg(short = 'r', long = "recomb-id")]
        recomb_id: Option<String>,
    },
    /// Stage PRESENT recombinations' working trees and vars.yaml for the test runner
    #[command(after_help = "\
Examples:
  prepare-tests -t /var/tests             Stage every untested recombination
  prepare-tests -t /var/tests -r 1234     Stage only change 1234")]
    PrepareTests {
        /// Test-artifact basedir
        #[arg(short = 't', long = "tests-basedir")]
        tests_basedir: PathBuf,
        /// Restrict to this recombination's review number
        #[arg(short = 'r', long = "recomb-id")]
        recomb_id: Option<String>,
    },
    /// Score prepared recombinations by test-result presence and vote
    #[command(after_help = "\
Examples:
  vote-recombinations -t /var/tests           Score every staged recombination
  vote-recombinations -t /var/tests -r 1234   Score only change 1234")]
    VoteRecombinations {
        /// Test-artifact basedir
        #[arg(short = 't', long = "tests-basedir")]
        tests_basedir: PathBuf,
        /// Restrict to this recombination's review number
        #[arg(short = 'r', long = "recomb-id")]
        recomb_id: Option<String>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // MAINTENANCE COMMANDS
    // ═══════════════════════════════════════════════════════════════════
    #[command(next_help_heading = "Maintenance Commands")]
    /// Delete replica scratch branches whose recombination is no longer open
    Cleanup,
    /// Validate project config, remote reachability, and lock state
    Doctor,
}

fn main() {
    let cli = Cli::parse();
    let logger = logging::root_logger(cli.verbosity);

    let exit_code = run(&cli, &logger).unwrap_or_else(|err| {
        slog::error!(logger, "fatal"; "error" => format!("{err:#}"));
        eprintln!("Error: {err:#}");
        1
    });
    std::process::exit(exit_code);
}

fn run(cli: &Cli, logger: &slog::Logger) -> anyhow::Result<i32> {
    let config = match ProjectsConfig::load(&cli.projects_conf, &cli.base_dir) {
        Ok(config) => config,
        Err(err) => {
            slog::error!(logger, "failed to load projects configuration"; "error" => err.to_string());
            eprintln!("Error: {err:#}");
            return Ok(1);
        }
    };

    // `doctor` reports lock state rather than acquiring it, so it can run
    // alongside another in-flight invocation instead of contending with it.
    let _lock = if matches!(cli.command, Commands::Doctor) {
        None
    } else {
        match BaseDirLock::acquire(&cli.base_dir) {
            Ok(lock) => Some(lock),
            Err(err) => {
                eprintln!("Error: {err:#}");
                return Ok(1);
            }
        }
    };

    let filter = ProjectFilter {
        names: cli.projects.clone(),
        watch_method: cli.watch_method.clone(),
        watch_branches: cli.watch_branches.clone(),
    };

    let orchestrator = Orchestrator::new(config, cli.base_dir.clone(), cli.no_fetch, cli.dry_run, logger.clone())?;

    let result = match &cli.command {
        Commands::PollOriginal { branch } => commands::poll_original::run(&orchestrator, &filter, branch.clone()),
        Commands::PollReplica { change_id } => commands::poll_replica::run(&orchestrator, &filter, change_id.clone()),
        Commands::MergeRecombinations { recomb_id } => {
            commands::merge_recombinations::run(&orchestrator, &filter, recomb_id.clone())
        }
        Commands::PrepareTests { tests_basedir, recomb_id } => {
            commands::prepare_tests::run(&orchestrator, &filter, tests_basedir.clone(), recomb_id.clone())
        }
        Commands::VoteRecombinations { tests_basedir, recomb_id } => {
            commands::vote_recombinations::run(&orchestrator, &filter, tests_basedir.clone(), recomb_id.clone())
        }
        Commands::Cleanup => commands::cleanup::run(&orchestrator, &filter),
        Commands::Doctor => commands::doctor::run(&orchestrator, &filter),
    };

    match result {
        Ok(()) => Ok(0),
        Err(err) => {
            if err.downcast_ref::<error::ConfigError>().is_some() {
                eprintln!("Error: {err:#}");
                Ok(1)
            } else {
                Err(err)
            }
        }
    }
}

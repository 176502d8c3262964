//! forkpool - run demo tasks on a pool of worker processes.
//!
//! Started normally this is the master: it launches `--workers` copies of
//! itself, submits `--tasks` demo tasks and prints each reply as one JSON
//! line on stdout. The copies see `role=worker` on their command line and
//! serve tasks instead.

use anyhow::Context;
use clap::Parser;
use forkpool::cli::Cli;
use forkpool::controller::{Controller, MasterController, WaitOutcome};
use forkpool::demo::{self, DemoReply};
use forkpool::{PoolConfig, Role, logging};
use std::io::Write;
use tracing::{info, warn};

fn main() {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let role = Role::detect(&args);
    let cli = Cli::parse_from(Role::strip(args));

    logging::init(cli.log_config(role));

    if let Err(e) = run(role, &cli) {
        eprintln!("error: {}", e);
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn run(role: Role, cli: &Cli) -> anyhow::Result<()> {
    let config = PoolConfig::for_current_exe(cli.workers)
        .context("Failed to determine the worker command")?;

    match Controller::new(role, config, demo::handle)
        .with_context(|| format!("Failed to start a pool of {} workers", cli.workers))?
    {
        Controller::Worker(worker) => worker.run(),
        Controller::Master(master) => run_master(master, cli),
    }
}

fn run_master(mut master: MasterController, cli: &Cli) -> anyhow::Result<()> {
    let tasks = demo::plan(cli.tasks, cli.sleep_ms, cli.crash_every);
    info!(
        workers = master.len(),
        tasks = tasks.len(),
        "Submitting demo tasks"
    );

    let replies = demo::submit_all(&mut master, &tasks)?;
    let outcome = master.wait(cli.timeout())?;

    print_replies(&replies.take())?;

    let stats = master.stats();
    match outcome {
        WaitOutcome::Drained => info!(
            completed = stats.tasks_completed,
            dropped = stats.tasks_dropped,
            respawns = stats.respawns,
            "All tasks finished"
        ),
        WaitOutcome::TimedOut { reclaimed } => warn!(
            reclaimed,
            completed = stats.tasks_completed,
            dropped = stats.tasks_dropped,
            "Gave up on unfinished tasks"
        ),
    }

    master.shutdown();
    Ok(())
}

fn print_replies(replies: &[DemoReply]) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for reply in replies {
        serde_json::to_writer(&mut out, reply)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

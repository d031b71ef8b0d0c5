//! Quilt CLI - recursive question answering at a prompt
//!
//! Usage:
//!   quilt                Start with a fresh in-memory state
//!   quilt state.json     Restore state from the file, write it back on exit
//!
//! The loop asks for a root question, presents one context at a time, and
//! reads actions: `ask <hypertext>`, `reply <hypertext>`,
//! `unlock <pointer>`, `scratch <hypertext>`. `exit` leaves (saving state if
//! a file was given); EOF does the same.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use quilt_engine::{load_state, save_state, Action, Scheduler, Step};

#[derive(Parser)]
#[command(name = "quilt")]
#[command(author, version, about = "Recursive question answering over pointer-locked workspaces")]
struct Cli {
    /// Snapshot file: restored on start when present, written back on exit
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set up logging")?;

    let mut scheduler = match &cli.db {
        Some(path) if path.exists() => load_state(path)
            .with_context(|| format!("failed to restore state from {}", path.display()))?,
        _ => Scheduler::new(),
    };

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!("What is your root question?");
        let Some(question) = read_line(&mut lines)? else {
            break;
        };
        if question.trim() == "exit" {
            break;
        }
        if question.trim().is_empty() {
            continue;
        }

        let session = match scheduler.start_session(question.trim()) {
            Ok(session) => session,
            Err(error) => {
                println!("Could not start on that question: {}", error);
                continue;
            }
        };

        'session: loop {
            match scheduler.next_step(session)? {
                Step::Done { answer } => {
                    println!("{}", "-".repeat(80));
                    println!("The final answer is: {}", answer);
                    break 'session;
                }
                Step::Blocked => {
                    println!("This session cannot make progress.");
                    break 'session;
                }
                Step::Prompt { rendering } => {
                    println!("{}", "-".repeat(80));
                    print!("{}> ", rendering);
                    std::io::stdout().flush()?;
                    let Some(line) = read_line(&mut lines)? else {
                        finish(&scheduler, &cli.db)?;
                        return Ok(());
                    };
                    let line = line.trim();
                    if line == "exit" {
                        finish(&scheduler, &cli.db)?;
                        return Ok(());
                    }
                    if line.is_empty() {
                        continue;
                    }
                    match Action::parse(line).and_then(|action| scheduler.act(session, &action)) {
                        Ok(()) => {}
                        Err(error) if error.is_recoverable() => {
                            println!("Encountered an error with your command: {}", error);
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
            }
        }
    }

    finish(&scheduler, &cli.db)?;
    Ok(())
}

fn read_line(
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
) -> Result<Option<String>> {
    match lines.next() {
        Some(line) => Ok(Some(line.context("failed to read input")?)),
        None => Ok(None),
    }
}

fn finish(scheduler: &Scheduler, db: &Option<PathBuf>) -> Result<()> {
    if let Some(path) = db {
        save_state(scheduler, path)
            .with_context(|| format!("failed to save state to {}", path.display()))?;
        info!(path = %path.display(), "state saved");
    }
    Ok(())
}

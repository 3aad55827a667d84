//! Workspace automation: `cargo xtask <task>`
//!
//! Output goes straight to the terminal, hence the print lints are relaxed.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::{Command, ExitCode};
use std::str::FromStr;

use anyhow::{bail, Context, Result};

mod tiers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Ci,
    Fmt,
    Lint,
    Test,
    Tiers,
    Bench,
    Help,
}

/// Task names, their variants and help text, in `ci` order
const TASKS: &[(&str, Task, &str)] = &[
    ("fmt", Task::Fmt, "rustfmt check over the workspace"),
    ("lint", Task::Lint, "clippy with warnings denied, all targets"),
    ("tiers", Task::Tiers, "build execguard-common per feature tier"),
    ("test", Task::Test, "every workspace test, paused-clock suites included"),
    ("bench", Task::Bench, "criterion benches of execguard-core"),
    ("ci", Task::Ci, "fmt, lint, tiers and test in sequence"),
    ("help", Task::Help, "this list"),
];

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        TASKS
            .iter()
            .find(|(task_name, ..)| *task_name == name)
            .map(|(_, task, _)| *task)
            .with_context(|| format!("no task named '{name}'"))
    }
}

impl Task {
    fn run(self) -> Result<()> {
        match self {
            Self::Fmt => cargo(&["fmt", "--all", "--", "--check"]),
            Self::Lint => {
                cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])
            }
            Self::Tiers => tiers::check_tiers(),
            Self::Test => cargo(&["test", "--workspace"]),
            Self::Bench => cargo(&["bench", "-p", "execguard-core", "--bench", "resilience_bench"]),
            Self::Ci => {
                for step in [Self::Fmt, Self::Lint, Self::Tiers, Self::Test] {
                    println!("==> {}", step.name());
                    step.run()?;
                }
                println!("==> ci passed");
                Ok(())
            }
            Self::Help => {
                print_tasks();
                Ok(())
            }
        }
    }

    fn name(self) -> &'static str {
        TASKS.iter().find(|(_, task, _)| *task == self).map_or("?", |(name, ..)| name)
    }
}

fn print_tasks() {
    println!("cargo xtask <task>\n");
    for (name, _, about) in TASKS {
        println!("  {name:<6} {about}");
    }
}

/// Run one cargo invocation, failing on a non-zero exit
pub(crate) fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo")
        .args(args)
        .status()
        .with_context(|| format!("could not spawn `cargo {}`", args.join(" ")))?;
    if !status.success() {
        bail!("`cargo {}` exited with {status}", args.join(" "));
    }
    Ok(())
}

fn main() -> ExitCode {
    let task = std::env::args().nth(1).map_or(Ok(Task::Help), |name| name.parse::<Task>());

    match task.and_then(Task::run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("xtask: {err:#}");
            ExitCode::FAILURE
        }
    }
}

//! Interactive front end: a small looping menu over the supervisor
//! operations.
//!
//! Prompt reads are interruptible (signal handlers are installed without
//! `SA_RESTART`), so every prompt error path re-checks the shutdown flag
//! before deciding whether to retry or leave.

use crate::core::LaunchMode;
use crate::error::SupervisorError;
use crate::instance::Instance;
use crate::signal::ShutdownFlag;
use crate::supervisor::{self, ProcessEntry};
use console::style;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use prettytable::{format, row, Table};
use tracing::debug;

const ACTIONS: [&str; 4] = [
    "Start a process",
    "List processes",
    "Stop a process",
    "Exit",
];

pub fn run(instance: &Instance, flag: &ShutdownFlag) {
    let theme = ColorfulTheme::default();
    while !flag.requested() {
        let choice = Select::with_theme(&theme)
            .with_prompt(format!("procx [instance {}]", instance.pid()))
            .items(&ACTIONS)
            .default(0)
            .interact();

        let choice = match choice {
            Ok(choice) => choice,
            Err(err) => {
                if flag.requested() {
                    break;
                }
                debug!(%err, "prompt interrupted; redrawing");
                continue;
            }
        };

        match choice {
            0 => prompt_start(instance, flag, &theme),
            1 => print_listing(instance),
            2 => prompt_stop(instance, flag, &theme),
            _ => break,
        }
    }
}

fn prompt_start(instance: &Instance, flag: &ShutdownFlag, theme: &ColorfulTheme) {
    let command: String = match Input::with_theme(theme)
        .with_prompt("Command")
        .allow_empty(true)
        .interact_text()
    {
        Ok(command) => command,
        Err(_) => return,
    };
    if flag.requested() {
        return;
    }

    let mode = match Select::with_theme(theme)
        .with_prompt("Mode")
        .items(&["Attached (wait for exit)", "Detached (background)"])
        .default(0)
        .interact()
    {
        Ok(0) => LaunchMode::Attached,
        Ok(_) => LaunchMode::Detached,
        Err(_) => return,
    };

    match supervisor::start(instance, &command, mode) {
        Ok(pid) if mode == LaunchMode::Attached => {
            println!("{} process {} finished", style("ok").green(), pid);
        }
        Ok(pid) => {
            println!("{} process {} running detached", style("ok").green(), pid);
        }
        Err(SupervisorError::EmptyCommand) => {
            println!("{} nothing to run", style("--").dim());
        }
        Err(err) => {
            println!("{} {}", style("error").red(), err);
        }
    }
}

fn prompt_stop(instance: &Instance, flag: &ShutdownFlag, theme: &ColorfulTheme) {
    let pid: String = match Input::with_theme(theme)
        .with_prompt("Pid to stop")
        .interact_text()
    {
        Ok(pid) => pid,
        Err(_) => return,
    };
    if flag.requested() {
        return;
    }
    let pid: i32 = match pid.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            println!("{} not a pid: {}", style("error").red(), pid.trim());
            return;
        }
    };
    match supervisor::stop(instance, pid) {
        Ok(()) => println!("{} stopped {}", style("ok").green(), pid),
        Err(err) => println!("{} {}", style("error").red(), err),
    }
}

fn print_listing(instance: &Instance) {
    match supervisor::list(instance) {
        Ok(entries) if entries.is_empty() => {
            println!("{}", style("no active processes").dim());
        }
        Ok(entries) => render_table(&entries).printstd(),
        Err(err) => println!("{} {}", style("error").red(), err),
    }
}

/// Tabular view of the active records.
pub fn render_table(entries: &[ProcessEntry]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["PID", "OWNER", "MODE", "STATUS", "ELAPSED", "COMMAND"]);
    for entry in entries {
        let owner = match entry.owner {
            Some(owner) => owner.to_string(),
            None => "-".to_string(),
        };
        table.add_row(row![
            entry.pid,
            owner,
            entry.mode,
            entry.status,
            format_elapsed(entry.elapsed()),
            entry.command,
        ]);
    }
    table
}

fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

use clap::Parser;
use procx::instance::Instance;
use procx::error::{MembershipError, ProcxError};
use procx::{config, listener, logging, menu, reaper, shutdown, signal};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Cooperative multi-instance process supervisor.
#[derive(Parser, Debug)]
#[command(name = "procx", version, about)]
struct Cli {
    /// Coordination namespace; instances sharing it see the same table.
    #[arg(long)]
    namespace: Option<String>,

    /// Reaper poll interval in seconds.
    #[arg(long)]
    poll_interval: Option<u64>,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let namespace = cli.namespace.unwrap_or_else(config::namespace);
    let poll_interval = cli
        .poll_interval
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(config::poll_interval);

    let flag = signal::ShutdownFlag::new();
    if let Err(err) = signal::install(&flag) {
        error!(%err, "signal handler installation failed");
        return ExitCode::FAILURE;
    }

    let instance = match Instance::connect(&namespace, poll_interval) {
        Ok(instance) => Arc::new(instance),
        Err(ProcxError::Membership(MembershipError::Rejected(max))) => {
            eprintln!("procx: all {max} instance slots for '{namespace}' are in use");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!(%err, namespace, "could not join namespace");
            return ExitCode::FAILURE;
        }
    };

    let reaper_handle = {
        let instance = Arc::clone(&instance);
        let flag = flag.clone();
        std::thread::Builder::new()
            .name("procx-reaper".to_string())
            .spawn(move || reaper::run(&instance, &flag))
    };
    let listener_handle = {
        let instance = Arc::clone(&instance);
        let flag = flag.clone();
        std::thread::Builder::new()
            .name("procx-listener".to_string())
            .spawn(move || listener::run(&instance, &flag))
    };
    let (reaper_handle, listener_handle) = match (reaper_handle, listener_handle) {
        (Ok(r), Ok(l)) => (r, l),
        (r, l) => {
            error!("worker thread spawn failed");
            // The full sequence still applies: whichever worker did start
            // must be woken and joined, and a sole instance must destroy
            // the shared resources on its way out.
            let workers: Vec<_> = [r, l].into_iter().flatten().collect();
            if let Err(err) = shutdown::run(&instance, &flag, workers) {
                error!(%err, "shutdown incomplete");
            }
            return ExitCode::FAILURE;
        }
    };

    menu::run(&instance, &flag);

    match shutdown::run(&instance, &flag, vec![reaper_handle, listener_handle]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "shutdown incomplete");
            ExitCode::FAILURE
        }
    }
}

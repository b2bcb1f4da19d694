//! clusterd worker process entry point

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clusterd_ipc::StdioTransport;
use clusterd_worker::{builtin_registry, run_worker};

/// Pool worker for the clusterd daemon. Spawned by the scheduler; not meant
/// to be run by hand.
#[derive(Parser, Debug)]
#[command(name = "clusterd-worker")]
struct WorkerArgs {
    /// Exit after completing this many tasks (1 for temporary workers)
    #[arg(long)]
    task_limit: Option<u32>,

    /// Log level filter, e.g. "info" or "clusterd_worker=debug"
    #[arg(long)]
    log_level: Option<String>,
}

/// Logs go to stderr; stdout is reserved for IPC frames.
fn init_worker_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    init_worker_tracing(args.log_level.as_deref());

    let registry = builtin_registry();
    let mut transport = StdioTransport::new();
    run_worker(&registry, &mut transport, args.task_limit)?;
    Ok(())
}

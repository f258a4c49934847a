use clap::Parser;

use pregel_cluster::{install_panic_hook, launch, logger, set_failure_handler, RunReport};

use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file shared by the master and the workers
    config: PathBuf,

    /// Process role: `master` or `worker`
    role: String,

    /// Transport binding: `local` or `cluster`
    mode: String,
}

fn main() {
    let args = Args::parse();
    logger::init();

    set_failure_handler(|err| {
        tracing::error!("Exiting: {}", err);
        process::exit(err.exit_code());
    });
    install_panic_hook();

    match launch(&args.config, &args.role, &args.mode) {
        Ok(RunReport::Master(outcome)) => {
            tracing::info!(
                "Run ended with {:?} after {} supersteps ({} vertices, {} edges)",
                outcome.decision,
                outcome.supersteps,
                outcome.summary.total_vertices,
                outcome.summary.total_edges
            );
        }
        Ok(RunReport::Worker(summary)) => {
            tracing::info!(
                "{} finished: {} after {} supersteps, {} vertices",
                summary.worker_id,
                summary.reason,
                summary.supersteps,
                summary.vertices
            );
        }
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(e.exit_code());
        }
    }
}

//! Starts the master or a worker from `(config, role, mode)`.

use crate::channel::Mode;
use crate::config::{Algorithm, Config};
use crate::error::{Error, Result};
use crate::graph::{EdgeListFile, GraphSource};
use crate::master::{Master, MasterOutcome};
use crate::program::VertexProgram;
use crate::programs::{ConnectedComponents, PageRank, Reachability, ShortestPaths};
use crate::protocol::{StopReason, WorkerId};
use crate::supervisor::supervise;
use crate::worker::Worker;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(Role::Master),
            "worker" => Ok(Role::Worker),
            other => Err(Error::IllegalArgument(format!(
                "unknown role '{}', expected 'master' or 'worker'",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub reason: StopReason,
    pub supersteps: u64,
    pub vertices: usize,
}

#[derive(Clone, Debug)]
pub enum RunReport {
    Master(MasterOutcome),
    Worker(WorkerSummary),
}

/// Parses role and mode before the configuration is read, so a bad
/// argument never touches the file system or the network.
pub fn launch<P: AsRef<Path>>(config_path: P, role: &str, mode: &str) -> Result<RunReport> {
    let role: Role = role.parse()?;
    let mode: Mode = mode.parse()?;
    let config = Config::load(config_path)?;
    launch_with(config, role, mode)
}

pub fn launch_with(config: Config, role: Role, mode: Mode) -> Result<RunReport> {
    config.validate()?;
    tracing::info!("Launching {} in {} mode", role, mode);

    match role {
        Role::Master => supervise("master", move || {
            let tolerate = tolerates_missing_partitions(&config.job.algorithm);
            let mut master = Master::bind(&config, mode)?.tolerate_missing_partitions(tolerate);
            master.run().map(RunReport::Master)
        }),
        Role::Worker => {
            if config.job.edges_path.is_none() {
                return Err(Error::InvalidConfig(
                    "job.edges_path is required for workers".to_string(),
                ));
            }
            let name = config.worker.name.clone();
            supervise(&name, move || run_worker(&config, mode))
        }
    }
}

fn tolerates_missing_partitions(algorithm: &Algorithm) -> bool {
    match algorithm {
        Algorithm::Reachability { sources } => {
            Reachability::new(sources.clone()).tolerates_missing_partitions()
        }
        Algorithm::ConnectedComponents => ConnectedComponents.tolerates_missing_partitions(),
        Algorithm::ShortestPaths { source } => ShortestPaths::new(*source).tolerates_missing_partitions(),
        Algorithm::PageRank {
            iterations,
            tolerance,
        } => PageRank::new(*iterations, *tolerance).tolerates_missing_partitions(),
    }
}

fn run_worker(config: &Config, mode: Mode) -> Result<RunReport> {
    let edges = match &config.job.edges_path {
        Some(path) => EdgeListFile::new(path),
        None => {
            return Err(Error::InvalidConfig(
                "job.edges_path is required for workers".to_string(),
            ))
        }
    };

    match &config.job.algorithm {
        Algorithm::Reachability { sources } => {
            work(config, mode, Reachability::new(sources.clone()), Box::new(edges))
        }
        Algorithm::ConnectedComponents => work(config, mode, ConnectedComponents, Box::new(edges)),
        Algorithm::ShortestPaths { source } => {
            work(config, mode, ShortestPaths::new(*source), Box::new(edges))
        }
        Algorithm::PageRank {
            iterations,
            tolerance,
        } => work(
            config,
            mode,
            PageRank::new(*iterations, *tolerance),
            Box::new(edges),
        ),
    }
}

fn work<P: VertexProgram>(
    config: &Config,
    mode: Mode,
    program: P,
    graph: Box<dyn GraphSource>,
) -> Result<RunReport> {
    let mut worker = Worker::new(config, mode, program, graph)?;
    let outcome = worker.run()?;
    Ok(RunReport::Worker(WorkerSummary {
        worker_id: outcome.worker_id,
        reason: outcome.reason,
        supersteps: outcome.supersteps,
        vertices: outcome.values.len(),
    }))
}

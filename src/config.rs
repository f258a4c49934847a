//! JSON configuration shared by the master and the workers.

use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::protocol::VertexId;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub master: MasterConfig,
    pub worker: WorkerConfig,
    pub job: JobConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub address: String,
    pub workers: u32,
    pub registration_timeout_ms: u64,
    pub superstep_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_supersteps: Option<u64>,
    pub failure_tolerance: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            address: "127.0.0.1:8090".to_string(),
            workers: 1,
            registration_timeout_ms: 30_000,
            superstep_timeout_ms: 60_000,
            poll_interval_ms: 50,
            max_supersteps: None,
            failure_tolerance: 0,
        }
    }
}

impl MasterConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn superstep_timeout(&self) -> Duration {
        Duration::from_millis(self.superstep_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    pub partition_hint: Option<u32>,
    /// Address peers deliver message batches to; a `:0` port picks a free one.
    pub data_address: String,
    pub batch_size: usize,
    pub io_timeout_ms: u64,
    /// Longest silence from the master tolerated between two commands.
    pub idle_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: "worker".to_string(),
            partition_hint: None,
            data_address: "127.0.0.1:0".to_string(),
            batch_size: 1024,
            io_timeout_ms: 10_000,
            idle_timeout_ms: 300_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Algorithm {
    Reachability {
        /// `None` makes every vertex a source.
        #[serde(default)]
        sources: Option<Vec<VertexId>>,
    },
    ConnectedComponents,
    ShortestPaths {
        source: VertexId,
    },
    PageRank {
        #[serde(default = "default_page_rank_iterations")]
        iterations: u64,
        #[serde(default = "default_page_rank_tolerance")]
        tolerance: f64,
    },
}

fn default_page_rank_iterations() -> u64 {
    30
}

fn default_page_rank_tolerance() -> f64 {
    1e-4
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Reachability { sources: None }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub algorithm: Algorithm,
    pub edges_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config = Config::from_json_str(&data)?;
        tracing::debug!("Loaded configuration from '{}'", path.display());
        Ok(config)
    }

    pub fn from_json_str(data: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let master = &self.master;
        let worker = &self.worker;

        if master.address.trim().is_empty() {
            return invalid("master.address must not be empty");
        }
        if master.workers == 0 {
            return invalid("master.workers must be at least 1");
        }
        if master.failure_tolerance >= master.workers {
            return invalid("master.failure_tolerance must be smaller than master.workers");
        }
        if master.registration_timeout_ms == 0
            || master.superstep_timeout_ms == 0
            || master.poll_interval_ms == 0
        {
            return invalid("master timeouts and poll interval must be positive");
        }
        if master.max_supersteps == Some(0) {
            return invalid("master.max_supersteps must be positive when set");
        }

        if worker.name.trim().is_empty() {
            return invalid("worker.name must not be empty");
        }
        if worker.batch_size == 0 {
            return invalid("worker.batch_size must be positive");
        }
        if worker.io_timeout_ms == 0 || worker.idle_timeout_ms == 0 {
            return invalid("worker timeouts must be positive");
        }
        if worker.retry.max_attempts == 0 {
            return invalid("worker.retry.max_attempts must be at least 1");
        }
        if worker.retry.initial_backoff_ms > worker.retry.max_backoff_ms {
            return invalid("worker.retry.initial_backoff_ms exceeds max_backoff_ms");
        }

        if let Algorithm::PageRank { iterations, tolerance } = &self.job.algorithm {
            if *iterations == 0 || !(*tolerance >= 0.0) {
                return invalid("page_rank needs positive iterations and a non-negative tolerance");
            }
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> Result<()> {
    Err(Error::InvalidConfig(reason.to_string()))
}

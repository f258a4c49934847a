#![allow(dead_code)]

use pregel_cluster::channel::{Connection, FrameReader, FrameWriter, Mode};
use pregel_cluster::{
    Config, GraphSource, Peer, Registration, Report, RetryPolicy, RunAction, RunCommand, StepPlan,
    StopReason, Superstep, SuperstepStats, ToMaster, ToWorker, VertexBatch, VertexProgram, Worker,
    WorkerId, WorkerOutcome,
};

use serde::Serialize;

use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Local-mode configuration with short timeouts. The `:0` suffixes make the
/// in-process hub pick unique addresses, so tests can run in parallel.
pub fn local_config(workers: u32) -> Config {
    let mut config = Config::default();
    config.master.address = "test-master:0".to_string();
    config.master.workers = workers;
    config.master.registration_timeout_ms = 5_000;
    config.master.superstep_timeout_ms = 5_000;
    config.master.poll_interval_ms = 10;
    config.worker.data_address = "test-worker:0".to_string();
    config.worker.io_timeout_ms = 2_000;
    config.worker.idle_timeout_ms = 10_000;
    config.worker.retry = RetryPolicy {
        initial_backoff_ms: 5,
        max_backoff_ms: 50,
        max_attempts: 20,
    };
    config
}

pub fn spawn_worker<P, G>(
    config: &Config,
    name: &str,
    program: P,
    graph: G,
) -> JoinHandle<pregel_cluster::Result<WorkerOutcome<P::Value>>>
where
    P: VertexProgram,
    P::Value: Send,
    G: GraphSource + 'static,
{
    let mut config = config.clone();
    config.worker.name = name.to_string();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut worker = Worker::new(&config, Mode::Local, program, Box::new(graph))?;
            worker.run()
        })
        .expect("spawn worker thread")
}

/// A hand-driven worker speaking the raw control protocol.
pub struct FakeWorker {
    pub id: Option<WorkerId>,
    pub peers: Vec<Peer>,
    writer: FrameWriter,
    reader: FrameReader,
}

impl FakeWorker {
    /// Connects and sends a registration without waiting for the reply.
    pub fn connect(master: &str, name: &str, hint: Option<u32>) -> FakeWorker {
        let connection = Connection::connect(Mode::Local, master, Duration::from_secs(1)).expect("connect to master");
        let (mut writer, reader) = connection.split(Duration::from_secs(1)).expect("split connection");
        writer
            .send(&ToMaster::Register(Registration {
                name: name.to_string(),
                partition_hint: hint,
                data_address: format!("{}-data:0", name),
            }))
            .expect("send registration");
        FakeWorker {
            id: None,
            peers: Vec::new(),
            writer,
            reader,
        }
    }

    pub fn recv(&mut self) -> Option<ToWorker> {
        self.reader.recv::<ToWorker>().expect("decode frame")
    }

    /// Reads the registration reply and the peer directory.
    pub fn accept(&mut self) -> WorkerId {
        match self.recv() {
            Some(ToWorker::Accepted(reply)) => self.id = Some(reply.worker_id),
            other => panic!("expected Accepted, got {:?}", other),
        }
        match self.recv() {
            Some(ToWorker::Start { peers, .. }) => self.peers = peers,
            other => panic!("expected Start, got {:?}", other),
        }
        self.id.expect("registered")
    }

    /// Waits for the next run command.
    pub fn next_command(&mut self) -> Option<(Superstep, RunAction)> {
        match self.recv() {
            Some(ToWorker::Run(RunCommand { superstep, action })) => Some((superstep, action)),
            Some(other) => panic!("expected a run command, got {:?}", other),
            None => None,
        }
    }

    pub fn report(&mut self, superstep: Superstep, stats: SuperstepStats) {
        let report = ToMaster::Report(Report {
            worker_id: self.id.expect("registered"),
            superstep,
            stats,
        });
        // The master may already have closed the connection.
        let _ = self.writer.send(&report);
    }

    pub fn abort(&mut self, superstep: Superstep, reason: &str) {
        let abort = ToMaster::Abort {
            worker_id: self.id.expect("registered"),
            superstep: Some(superstep),
            reason: reason.to_string(),
        };
        self.writer.send(&abort).expect("send abort");
    }

    /// Delivers `messages` to a peer's data listener as produced in
    /// `superstep`, over a connection of its own.
    pub fn send_batch<M: Serialize>(&self, to: WorkerId, superstep: Superstep, messages: Vec<(i64, M)>) {
        let address = self
            .peers
            .iter()
            .find(|p| p.worker_id == to)
            .map(|p| p.data_address.clone())
            .expect("peer address");
        let connection = Connection::connect(Mode::Local, &address, Duration::from_secs(1)).expect("connect to peer");
        let (mut writer, _) = connection.split(Duration::from_secs(1)).expect("split connection");
        writer
            .send(&VertexBatch {
                from: self.id.expect("registered"),
                to,
                superstep,
                messages,
            })
            .expect("send batch");
        writer.close();
    }

    /// Answers every run command with `stats` until stopped, waiting
    /// `delay` before each answer. Returns the plans and the stop reason.
    pub fn serve(mut self, stats: SuperstepStats, delay: Duration) -> JoinHandle<(Vec<StepPlan>, Option<StopReason>)> {
        thread::spawn(move || {
            let mut plans = Vec::new();
            while let Some((superstep, action)) = self.next_command() {
                match action {
                    RunAction::Continue(plan) => {
                        plans.push(plan);
                        thread::sleep(delay);
                        self.report(superstep, stats.clone());
                    }
                    RunAction::Stop(reason) => return (plans, Some(reason)),
                }
            }
            (plans, None)
        })
    }
}

/// Stats of a worker that sent `count` messages to `to`.
pub fn sending_stats(active: u64, to: WorkerId, count: u64) -> SuperstepStats {
    SuperstepStats {
        active_vertices: active,
        local_vertices: 1,
        messages_sent: count,
        sent_to: [(to, count)].into_iter().collect(),
        ..Default::default()
    }
}

/// Stats of a worker that always has one active vertex and never sends.
pub fn busy_stats() -> SuperstepStats {
    SuperstepStats {
        active_vertices: 1,
        local_vertices: 1,
        ..Default::default()
    }
}

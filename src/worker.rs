use crate::aggregate::{AggValue, Aggregate};
use crate::backoff::retry;
use crate::buffer::MessageBuffers;
use crate::channel::{self, Connection, FrameWriter, Listener, Mode};
use crate::combine::Combine;
use crate::config::{Config, WorkerConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::graph::{owner_of, GraphSource};
use crate::message::{Message, VertexBatch};
use crate::program::VertexProgram;
use crate::protocol::{
    Peer, Registration, RegistrationReply, RejectReason, Report, RunAction, RunCommand, StepPlan,
    StopReason, Superstep, ToMaster, ToWorker, VertexId, WorkerId,
};
use crate::state::WorkerState;
use crate::stats::SuperstepStats;
use crate::vertex::Vertex;

use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Vertices computed between two looks at the event queue.
const STOP_CHECK_INTERVAL: usize = 1024;

enum WorkerEvent<M> {
    Master(ToWorker),
    MasterClosed,
    Batch(VertexBatch<M>),
}

#[derive(Clone, Debug)]
pub struct WorkerOutcome<V> {
    pub worker_id: WorkerId,
    pub reason: StopReason,
    pub supersteps: u64,
    /// Final value of every local vertex that has one.
    pub values: BTreeMap<VertexId, V>,
}

pub struct Worker<P: VertexProgram> {
    config: WorkerConfig,
    master_address: String,
    mode: Mode,
    program: P,
    graph: Box<dyn GraphSource>,
    output_dir: Option<PathBuf>,
    data_address: String,

    id: Option<WorkerId>,
    worker_count: u32,
    state: WorkerState,
    supersteps: u64,
    vertices: HashMap<VertexId, Vertex<P::Value, P::Message>>,
    buffers: MessageBuffers<P::Message>,
    combiner: Option<Box<dyn Combine<P::Message>>>,
    aggregators: Vec<Box<dyn Aggregate<P::Value, P::Message>>>,

    peers: BTreeMap<WorkerId, String>,
    links: HashMap<WorkerId, FrameWriter>,
    master: Option<FrameWriter>,
    sender: Sender<WorkerEvent<P::Message>>,
    events: Receiver<WorkerEvent<P::Message>>,
    deferred: VecDeque<WorkerEvent<P::Message>>,
    pending_stop: Option<StopReason>,
    acceptor: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl<P: VertexProgram> Worker<P> {
    /// Binds the data listener peers deliver message batches to.
    pub fn new(config: &Config, mode: Mode, program: P, graph: Box<dyn GraphSource>) -> Result<Self> {
        let listener = Listener::bind(mode, &config.worker.data_address)?;
        let data_address = listener.local_address();
        let (sender, events) = mpsc::channel();

        let io_timeout = config.worker.io_timeout();
        let batches = sender.clone();
        let name = config.worker.name.clone();
        let acceptor = channel::spawn_acceptor(
            format!("{}-acceptor", config.worker.name),
            listener,
            Duration::from_millis(20),
            move |connection| accept_peer(&name, connection, io_timeout, &batches),
        )?;

        let combiner = program.combiner();
        let aggregators = program.aggregators();

        Ok(Worker {
            config: config.worker.clone(),
            master_address: config.master.address.clone(),
            mode,
            program,
            graph,
            output_dir: config.job.output_dir.clone(),
            data_address,
            id: None,
            worker_count: 0,
            state: WorkerState::AwaitingRegistrationAck,
            supersteps: 0,
            vertices: HashMap::new(),
            buffers: MessageBuffers::new(),
            combiner,
            aggregators,
            peers: BTreeMap::new(),
            links: HashMap::new(),
            master: None,
            sender,
            events,
            deferred: VecDeque::new(),
            pending_stop: None,
            acceptor: Some(acceptor),
        })
    }

    pub fn id(&self) -> Option<WorkerId> {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn data_address(&self) -> &str {
        &self.data_address
    }

    /// Connects to the master, retrying with backoff, and registers.
    pub fn register(&mut self) -> Result<RegistrationReply> {
        let address = self.master_address.clone();
        let mode = self.mode;
        let io_timeout = self.config.io_timeout();

        let connection = retry(&self.config.retry, "Connecting to master", || {
            Connection::connect(mode, &address, io_timeout)
        })
        .map_err(|(e, attempts)| {
            tracing::error!("Giving up on master at {} after {} attempts: {}", address, attempts, e);
            Error::ConnectionRefused {
                address: address.clone(),
                attempts,
            }
        })?;

        let (mut writer, mut reader) = connection.split(io_timeout)?;
        writer.send(&ToMaster::Register(Registration {
            name: self.config.name.clone(),
            partition_hint: self.config.partition_hint,
            data_address: self.data_address.clone(),
        }))?;
        self.master = Some(writer);

        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("{}-master-reader", self.config.name))
            .spawn(move || {
                loop {
                    match reader.recv::<ToWorker>() {
                        Ok(Some(frame)) => {
                            if sender.send(WorkerEvent::Master(frame)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Connection to master failed: {}", e);
                            break;
                        }
                    }
                }
                let _ = sender.send(WorkerEvent::MasterClosed);
            })?;

        let deadline = Instant::now() + io_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Disconnected(format!(
                    "no registration reply from {} within {} ms",
                    address, self.config.io_timeout_ms
                )));
            }
            match self.events.recv_timeout(deadline - now) {
                Ok(WorkerEvent::Master(ToWorker::Accepted(reply))) => {
                    tracing::info!(
                        "'{}' registered as {} of {} workers",
                        self.config.name,
                        reply.worker_id,
                        reply.expected_workers
                    );
                    self.id = Some(reply.worker_id);
                    self.worker_count = reply.expected_workers;
                    self.state = WorkerState::Ready;
                    return Ok(reply);
                }
                Ok(WorkerEvent::Master(ToWorker::Rejected(reason))) => {
                    return Err(match reason {
                        RejectReason::DuplicateRegistration { name } => Error::DuplicateRegistration { name },
                        RejectReason::RegistrationWindowClosed => Error::RegistrationWindowClosed,
                    });
                }
                Ok(WorkerEvent::Master(ToWorker::Run(RunCommand {
                    action: RunAction::Stop(reason),
                    ..
                }))) => return Err(Error::Stopped(reason)),
                Ok(WorkerEvent::MasterClosed) => {
                    return Err(Error::Disconnected("master closed the connection".to_string()))
                }
                Ok(other) => self.deferred.push_back(other),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Disconnected("worker event queue closed".to_string()))
                }
            }
        }
    }

    /// Registers if needed and serves the master until it stops the run.
    pub fn run(&mut self) -> Result<WorkerOutcome<P::Value>> {
        let result = match self.id {
            Some(_) => self.serve(),
            None => self.register().and_then(|_| self.serve()),
        };
        if let Err(e) = &result {
            self.abort(e);
        }
        self.close();
        result
    }

    fn serve(&mut self) -> Result<WorkerOutcome<P::Value>> {
        loop {
            if let Some(reason) = self.pending_stop.take() {
                return self.on_stop(reason);
            }

            let event = match self.deferred.pop_front() {
                Some(event) => event,
                None => match self.events.recv_timeout(self.config.idle_timeout()) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(Error::Disconnected(format!(
                            "no command from master within {} ms",
                            self.config.idle_timeout_ms
                        )))
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(Error::Disconnected("worker event queue closed".to_string()))
                    }
                },
            };

            match event {
                WorkerEvent::Master(ToWorker::Start { peers, worker_count }) => {
                    self.on_start(peers, worker_count)?
                }
                WorkerEvent::Master(ToWorker::Run(RunCommand { superstep, action })) => match action {
                    RunAction::Continue(plan) => self.on_run_command(superstep, plan)?,
                    RunAction::Stop(reason) => return self.on_stop(reason),
                },
                WorkerEvent::Master(frame) => tracing::warn!("Ignoring unexpected frame {:?}", frame),
                WorkerEvent::MasterClosed => {
                    return Err(Error::Disconnected("master closed the connection".to_string()))
                }
                WorkerEvent::Batch(batch) => self.on_batch(batch),
            }
        }
    }

    fn worker_id(&self) -> Result<WorkerId> {
        self.id
            .ok_or_else(|| Error::IllegalArgument("worker is not registered".to_string()))
    }

    fn on_start(&mut self, peers: Vec<Peer>, worker_count: u32) -> Result<()> {
        let id = self.worker_id()?;
        self.worker_count = worker_count;
        self.peers = peers
            .into_iter()
            .map(|p| (p.worker_id, p.data_address))
            .collect();

        let adjacency = self.graph.load_partition(id, worker_count)?;
        let mut edges = 0;
        for (source, targets) in adjacency {
            let vertex = self
                .vertices
                .entry(source)
                .or_insert_with(|| Vertex::new(source));
            for (target, weight) in targets {
                vertex.add_outer_edge(target, weight);
                edges += 1;
            }
        }

        tracing::info!(
            "{} loaded {} vertices and {} edges, {} peers",
            id,
            self.vertices.len(),
            edges,
            self.peers.len()
        );
        self.state = WorkerState::Ready;
        Ok(())
    }

    fn on_batch(&mut self, batch: VertexBatch<P::Message>) {
        if Some(batch.to) != self.id {
            tracing::warn!("Dropping batch from {} addressed to {}", batch.from, batch.to);
            return;
        }
        self.buffers.deliver(batch.from, batch.superstep, batch.messages);
    }

    /// Handles queued events without blocking. Batches go to the buffers, a
    /// stop is remembered, anything else waits for the serve loop.
    fn poll_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.dispatch_async(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn dispatch_async(&mut self, event: WorkerEvent<P::Message>) {
        match event {
            WorkerEvent::Batch(batch) => self.on_batch(batch),
            WorkerEvent::Master(ToWorker::Run(RunCommand {
                action: RunAction::Stop(reason),
                ..
            })) => self.pending_stop = Some(reason),
            other => self.deferred.push_back(other),
        }
    }

    /// Waits until every message sent to this worker during `superstep - 1`
    /// has been buffered.
    fn await_messages(&mut self, superstep: Superstep, plan: &StepPlan) -> Result<()> {
        let produced_in = superstep - 1;
        let deadline = Instant::now() + self.config.io_timeout();
        loop {
            self.poll_events();
            let received = self.buffers.received_from(produced_in, &plan.excluded);
            if received >= plan.expected_messages || self.pending_stop.is_some() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::MessagesLost {
                    superstep: produced_in,
                    expected: plan.expected_messages,
                    received,
                });
            }
            match self.events.recv_timeout((deadline - now).min(Duration::from_millis(10))) {
                Ok(event) => self.dispatch_async(event),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Disconnected("worker event queue closed".to_string()))
                }
            }
        }
    }

    pub fn on_run_command(&mut self, superstep: Superstep, plan: StepPlan) -> Result<()> {
        let id = self.worker_id()?;
        let now = Instant::now();
        self.state = WorkerState::Computing(superstep);

        if superstep > 0 {
            self.await_messages(superstep, &plan)?;
            if self.pending_stop.is_some() {
                return Ok(());
            }
        }

        let received = self
            .buffers
            .advance(superstep, &plan.excluded, self.combiner.as_deref());
        let unknown: Vec<VertexId> = self
            .buffers
            .receivers()
            .filter(|v| !self.vertices.contains_key(v))
            .collect();
        for vid in unknown {
            self.vertices.insert(vid, Vertex::new(vid));
        }

        let mut context = Context::new(superstep, id, self.worker_count);
        context.total_vertices = plan.total_vertices;
        context.aggregated_values = plan.aggregates;

        let mut vertices = std::mem::take(&mut self.vertices);
        let mut send_queues: HashMap<VertexId, Vec<P::Message>> = HashMap::new();
        let mut n_active_vertices: u64 = 0;

        for (i, vertex) in vertices.values_mut().enumerate() {
            if i > 0 && i % STOP_CHECK_INTERVAL == 0 {
                self.poll_events();
                if self.pending_stop.is_some() {
                    break;
                }
            }

            let messages = self.buffers.take(vertex.id());
            if messages.is_empty() && !vertex.active() {
                continue;
            }

            // Messages reactivate a halted vertex.
            vertex.activate();
            vertex.recv_queue = messages;
            self.program.compute(vertex, &context);
            vertex.recv_queue.clear();

            self.collect_vertex_messages(vertex, &mut send_queues);
            if vertex.active() {
                n_active_vertices += 1;
            }
        }

        let mut aggregates: BTreeMap<String, AggValue> = BTreeMap::new();
        for vertex in vertices.values() {
            for aggregator in &self.aggregators {
                if let Some(value) = aggregator.report(vertex) {
                    let merged = match aggregates.remove(aggregator.name()) {
                        Some(current) => current.merge(value),
                        None => value,
                    };
                    aggregates.insert(aggregator.name().to_string(), merged);
                }
            }
        }

        let local_vertices = vertices.len() as u64;
        let local_edges: u64 = vertices.values().map(|v| v.out_degree() as u64).sum();
        self.vertices = vertices;

        if self.pending_stop.is_some() {
            tracing::info!("{} abandoning superstep {} on stop", id, superstep);
            return Ok(());
        }

        let sent_to = self.send_messages(superstep, send_queues)?;
        let stats = SuperstepStats {
            active_vertices: n_active_vertices,
            messages_sent: sent_to.values().sum(),
            messages_received: received,
            compute_time_ms: now.elapsed().as_millis() as u64,
            local_vertices,
            local_edges,
            sent_to,
            aggregates,
        };

        self.state = WorkerState::Reporting(superstep);
        let report = ToMaster::Report(Report {
            worker_id: id,
            superstep,
            stats,
        });
        match self.master.as_mut() {
            Some(master) => master.send(&report)?,
            None => return Err(Error::Disconnected("no connection to master".to_string())),
        }

        self.supersteps = superstep + 1;
        self.state = WorkerState::Ready;
        Ok(())
    }

    fn collect_vertex_messages(
        &self,
        vertex: &mut Vertex<P::Value, P::Message>,
        queues: &mut HashMap<VertexId, Vec<P::Message>>,
    ) {
        for Message { value, receiver, .. } in vertex.send_queue.drain(..) {
            let queue = queues.entry(receiver).or_default();
            match (self.combiner.as_deref(), queue.pop()) {
                (Some(combiner), Some(initial)) => queue.push(combiner.combine(initial, value)),
                (_, Some(initial)) => {
                    queue.push(initial);
                    queue.push(value);
                }
                (_, None) => queue.push(value),
            }
        }
    }

    /// Delivers outgoing messages in batches of at most `batch_size`, local
    /// ones straight into the next generation. Returns the per-destination
    /// counts.
    fn send_messages(
        &mut self,
        superstep: Superstep,
        send_queues: HashMap<VertexId, Vec<P::Message>>,
    ) -> Result<BTreeMap<WorkerId, u64>> {
        let id = self.worker_id()?;
        let mut outgoing: BTreeMap<WorkerId, Vec<(VertexId, P::Message)>> = BTreeMap::new();
        for (receiver, messages) in send_queues {
            let owner = owner_of(receiver, self.worker_count);
            let queue = outgoing.entry(owner).or_default();
            queue.extend(messages.into_iter().map(|m| (receiver, m)));
        }

        let mut sent_to = BTreeMap::new();
        for (to, mut messages) in outgoing {
            sent_to.insert(to, messages.len() as u64);
            if to == id {
                self.buffers.deliver(id, superstep, messages);
                continue;
            }

            while !messages.is_empty() {
                let rest = messages.split_off(self.config.batch_size.min(messages.len()));
                let batch = VertexBatch {
                    from: id,
                    to,
                    superstep,
                    messages,
                };
                if let Err(e) = self.send_batch(&batch) {
                    tracing::warn!("Lost {} messages for {}: {}", batch.len(), to, e);
                    self.links.remove(&to);
                }
                messages = rest;
            }
        }
        Ok(sent_to)
    }

    fn send_batch(&mut self, batch: &VertexBatch<P::Message>) -> Result<()> {
        if !self.links.contains_key(&batch.to) {
            let address = self
                .peers
                .get(&batch.to)
                .cloned()
                .ok_or_else(|| Error::Disconnected(format!("no address for {}", batch.to)))?;
            let mode = self.mode;
            let io_timeout = self.config.io_timeout();
            let connection = retry(&self.config.retry, "Connecting to peer", || {
                Connection::connect(mode, &address, io_timeout)
            })
            .map_err(|(e, attempts)| {
                Error::Disconnected(format!("{} unreachable after {} attempts: {}", address, attempts, e))
            })?;
            let (writer, _) = connection.split(io_timeout)?;
            self.links.insert(batch.to, writer);
        }

        match self.links.get_mut(&batch.to) {
            Some(link) => link.send(batch),
            None => Ok(()),
        }
    }

    fn on_stop(&mut self, reason: StopReason) -> Result<WorkerOutcome<P::Value>> {
        let id = self.worker_id()?;
        self.state = WorkerState::Stopped;
        tracing::info!("{} stopped after {} supersteps: {}", id, self.supersteps, reason);

        if !reason.is_success() {
            return Err(Error::Stopped(reason));
        }
        if let Some(dir) = self.output_dir.clone() {
            self.write_output(&dir, id)?;
        }

        let values = self
            .vertices
            .iter()
            .filter_map(|(vid, v)| v.value.clone().map(|value| (*vid, value)))
            .collect();
        Ok(WorkerOutcome {
            worker_id: id,
            reason,
            supersteps: self.supersteps,
            values,
        })
    }

    fn write_output(&self, dir: &Path, id: WorkerId) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("part-{}.txt", id.0));
        let mut writer = io::BufWriter::new(File::create(&path)?);

        let mut ids: Vec<&VertexId> = self.vertices.keys().collect();
        ids.sort();
        for vid in ids {
            if let Some(value) = self.vertices[vid].value.as_ref() {
                writeln!(writer, "{}\t{}", vid, value)?;
            }
        }
        writer.flush()?;
        tracing::info!("{} wrote its partition to {}", id, path.display());
        Ok(())
    }

    /// Tells the master this worker is giving up, if it can still be told.
    fn abort(&mut self, err: &Error) {
        if matches!(err, Error::Stopped(_) | Error::Disconnected(_)) {
            return;
        }
        if let (Some(worker_id), Some(master)) = (self.id, self.master.as_mut()) {
            let superstep = match self.state {
                WorkerState::Computing(n) | WorkerState::Reporting(n) => Some(n),
                _ => None,
            };
            let abort = ToMaster::Abort {
                worker_id,
                superstep,
                reason: err.to_string(),
            };
            if let Err(e) = master.send(&abort) {
                tracing::debug!("Could not send abort to master: {}", e);
            }
        }
    }

    fn close(&mut self) {
        if let Some((stop, handle)) = self.acceptor.take() {
            stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                tracing::warn!("Worker acceptor panicked");
            }
        }
        for (_, link) in self.links.drain() {
            link.close();
        }
        if let Some(master) = self.master.take() {
            master.close();
        }
    }
}

impl<P: VertexProgram> Drop for Worker<P> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Starts a reader thread for a peer's data connection. Returns false once
/// the worker is gone.
fn accept_peer<M>(name: &str, connection: Connection, io_timeout: Duration, sender: &Sender<WorkerEvent<M>>) -> bool
where
    M: DeserializeOwned + Send + 'static,
{
    let (_, mut reader) = match connection.split(io_timeout) {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!("{}: dropping peer connection: {}", name, e);
            return true;
        }
    };

    let sender = sender.clone();
    let spawned = thread::Builder::new()
        .name(format!("{}-peer-reader", name))
        .spawn(move || loop {
            match reader.recv::<VertexBatch<M>>() {
                Ok(Some(batch)) => {
                    if sender.send(WorkerEvent::Batch(batch)).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("Peer connection failed: {}", e);
                    return;
                }
            }
        });

    match spawned {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("{}: failed to start peer reader: {}", name, e);
            false
        }
    }
}

//! Grows a binary tree of a given depth across three in-process workers.
//!
//! Every vertex adds edges to `2 * id` and `2 * id + 1` and messages them,
//! so vertices appear on whichever worker owns their id as the messages
//! arrive.

use pregel_cluster::{
    logger, AggValue, Aggregate, Config, Context, InMemoryGraph, Master, Mode, Vertex, VertexProgram,
    Worker,
};

use std::thread;

const DEPTH: u32 = 10;
const WORKERS: u32 = 3;

struct BinTree {
    depth: u32,
}

struct LeafCounter;

impl Aggregate<u32, u32> for LeafCounter {
    fn name(&self) -> &str {
        "leaves"
    }

    fn report(&self, v: &Vertex<u32, u32>) -> Option<AggValue> {
        match v.value {
            Some(_) if v.out_degree() == 0 => Some(AggValue::Count(1)),
            _ => None,
        }
    }
}

impl VertexProgram for BinTree {
    type Value = u32;
    type Message = u32;

    fn compute(&self, vertex: &mut Vertex<u32, u32>, context: &Context) {
        if vertex.value.is_none() {
            let depth = vertex.take_messages().into_iter().min().unwrap_or(0);
            vertex.value = Some(depth);
        }

        let depth = vertex.value.unwrap_or(0);
        if depth < self.depth && vertex.out_degree() == 0 {
            let left = vertex.id() * 2;
            for child in [left, left + 1] {
                vertex.add_outer_edge(child, 1.0);
                vertex.send_message_to(child, depth + 1);
            }
        }

        if let Some(AggValue::Count(leaves)) = context.get_aggregated_value("leaves") {
            tracing::debug!(
                "superstep {}: {} leaves among {} vertices",
                context.superstep(),
                leaves,
                context.num_vertices()
            );
        }
        vertex.vote_to_halt();
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<u32, u32>>> {
        vec![Box::new(LeafCounter)]
    }
}

fn main() {
    logger::init();

    let mut config = Config::default();
    config.master.address = "demo-master:0".to_string();
    config.master.workers = WORKERS;
    config.worker.data_address = "demo-worker:0".to_string();

    let mut master = match Master::bind(&config, Mode::Local) {
        Ok(master) => master,
        Err(e) => {
            eprintln!("Failed to start master: {}", e);
            return;
        }
    };
    config.master.address = master.local_address().to_string();

    let mut handles = Vec::new();
    for i in 0..WORKERS {
        let mut config = config.clone();
        config.worker.name = format!("tree-{}", i);
        handles.push(thread::spawn(move || {
            let mut graph = InMemoryGraph::new();
            graph.add_vertex(1);
            let mut worker = Worker::new(&config, Mode::Local, BinTree { depth: DEPTH }, Box::new(graph))?;
            worker.run()
        }));
    }

    match master.run() {
        Ok(outcome) => println!(
            "Grew {} vertices in {} supersteps ({:?})",
            outcome.summary.total_vertices, outcome.supersteps, outcome.decision
        ),
        Err(e) => eprintln!("Computation failed: {}", e),
    }

    for handle in handles {
        match handle.join() {
            Ok(Ok(outcome)) => println!(
                "{}: {} vertices, deepest {}",
                outcome.worker_id,
                outcome.values.len(),
                outcome.values.values().max().copied().unwrap_or(0)
            ),
            Ok(Err(e)) => eprintln!("Worker failed: {}", e),
            Err(_) => eprintln!("Worker panicked"),
        }
    }
}

use crate::error::{Error, Result};
use crate::protocol::{VertexId, WorkerId};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

/// Outer edges of every vertex a partition owns, vertices without outer
/// edges included.
pub type Adjacency = BTreeMap<VertexId, Vec<(VertexId, f64)>>;

/// The worker that owns `vertex` when the graph is split `partitions` ways.
pub fn owner_of(vertex: VertexId, partitions: u32) -> WorkerId {
    WorkerId(vertex.rem_euclid(partitions.max(1) as i64) as u32)
}

/// Where a worker gets its partition from.
pub trait GraphSource: Send {
    fn load_partition(&self, partition: WorkerId, partitions: u32) -> Result<Adjacency>;
}

fn partition_edges<I>(edges: I, vertices: &[VertexId], partition: WorkerId, partitions: u32) -> Adjacency
where
    I: IntoIterator<Item = (VertexId, VertexId, f64)>,
{
    let mut adjacency = Adjacency::new();
    for (source, target, weight) in edges {
        if owner_of(source, partitions) == partition {
            let outer = adjacency.entry(source).or_default();
            if outer.iter().any(|(t, _)| *t == target) {
                tracing::warn!("Duplicate edge from {} to {} ignored", source, target);
            } else {
                outer.push((target, weight));
            }
        }
        if owner_of(target, partitions) == partition {
            adjacency.entry(target).or_default();
        }
    }
    for vertex in vertices {
        if owner_of(*vertex, partitions) == partition {
            adjacency.entry(*vertex).or_default();
        }
    }
    adjacency
}

/// A graph held in memory, for embedding and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryGraph {
    edges: Vec<(VertexId, VertexId, f64)>,
    vertices: Vec<VertexId>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, source: VertexId, target: VertexId, weight: f64) -> &mut Self {
        self.edges.push((source, target, weight));
        self
    }

    pub fn add_vertex(&mut self, id: VertexId) -> &mut Self {
        self.vertices.push(id);
        self
    }

    /// A directed cycle `0 -> 1 -> ... -> n-1 -> 0` with unit weights.
    pub fn cycle(n: i64) -> Self {
        let mut graph = InMemoryGraph::new();
        for v in 0..n {
            graph.add_edge(v, (v + 1) % n, 1.0);
        }
        graph
    }
}

impl GraphSource for InMemoryGraph {
    fn load_partition(&self, partition: WorkerId, partitions: u32) -> Result<Adjacency> {
        Ok(partition_edges(
            self.edges.iter().copied(),
            &self.vertices,
            partition,
            partitions,
        ))
    }
}

/// A text edge list: one `source target [weight]` per line, separated by
/// tabs or spaces. Blank lines and lines starting with `#` are skipped.
#[derive(Clone, Debug)]
pub struct EdgeListFile {
    path: PathBuf,
}

impl EdgeListFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        EdgeListFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn parse_line(line: &str, number: usize) -> Result<Option<(VertexId, VertexId, f64)>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<_> = line.split_whitespace().collect();
        let bad = |what: &str| Error::InvalidGraph(format!("line {}: {} in '{}'", number, what, line));

        if parts.len() < 2 || parts.len() > 3 {
            return Err(bad("expected 'source target [weight]'"));
        }
        let source: VertexId = parts[0].parse().map_err(|_| bad("bad source id"))?;
        let target: VertexId = parts[1].parse().map_err(|_| bad("bad target id"))?;
        let weight: f64 = match parts.get(2) {
            Some(w) => w.parse().map_err(|_| bad("bad weight"))?,
            None => 1.0,
        };
        Ok(Some((source, target, weight)))
    }
}

impl GraphSource for EdgeListFile {
    fn load_partition(&self, partition: WorkerId, partitions: u32) -> Result<Adjacency> {
        let file = File::open(&self.path).map_err(|e| {
            Error::InvalidGraph(format!("cannot open '{}': {}", self.path.display(), e))
        })?;

        let mut edges = Vec::new();
        for (i, line) in io::BufReader::new(file).lines().enumerate() {
            if let Some(edge) = Self::parse_line(&line?, i + 1)? {
                edges.push(edge);
            }
        }

        let adjacency = partition_edges(edges, &[], partition, partitions);
        tracing::debug!(
            "Loaded {} vertices for partition {} of {} from '{}'",
            adjacency.len(),
            partition.0,
            partitions,
            self.path.display()
        );
        Ok(adjacency)
    }
}

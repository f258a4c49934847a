use crate::combine::Combine;
use crate::protocol::{Superstep, VertexId, WorkerId};

use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Buffered for the next superstep.
    Next,
    /// Held for a generation that is not open yet.
    Held,
    /// Produced in a superstep already consumed; dropped.
    Stale,
}

struct Generation<M> {
    produced_in: Superstep,
    batches: Vec<(WorkerId, Vec<(VertexId, M)>)>,
    received: u64,
}

impl<M> Generation<M> {
    fn new(produced_in: Superstep) -> Self {
        Generation {
            produced_in,
            batches: Vec::new(),
            received: 0,
        }
    }

    fn push(&mut self, from: WorkerId, messages: Vec<(VertexId, M)>) {
        self.received += messages.len() as u64;
        self.batches.push((from, messages));
    }
}

/// Two-generation inbox. Batches carry the superstep they were produced in;
/// batches for a generation that is not open yet are held, never dropped.
pub struct MessageBuffers<M> {
    /// Readable messages, per receiver, for the superstep being computed.
    current: HashMap<VertexId, Vec<M>>,
    next: Generation<M>,
    held: BTreeMap<Superstep, Generation<M>>,
}

impl<M> Default for MessageBuffers<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageBuffers<M> {
    pub fn new() -> Self {
        MessageBuffers {
            current: HashMap::new(),
            next: Generation::new(0),
            held: BTreeMap::new(),
        }
    }

    pub fn deliver(&mut self, from: WorkerId, produced_in: Superstep, messages: Vec<(VertexId, M)>) -> Delivery {
        if produced_in == self.next.produced_in {
            self.next.push(from, messages);
            Delivery::Next
        } else if produced_in > self.next.produced_in {
            self.held
                .entry(produced_in)
                .or_insert_with(|| Generation::new(produced_in))
                .push(from, messages);
            Delivery::Held
        } else {
            tracing::warn!(
                "Dropping {} stale messages from {} produced in superstep {}",
                messages.len(),
                from,
                produced_in
            );
            Delivery::Stale
        }
    }

    /// Messages received so far that were produced in `superstep` by
    /// senders other than `excluded`.
    pub fn received_from(&self, superstep: Superstep, excluded: &[WorkerId]) -> u64 {
        let generation = if self.next.produced_in == superstep {
            Some(&self.next)
        } else {
            self.held.get(&superstep)
        };
        generation
            .map(|g| {
                g.batches
                    .iter()
                    .filter(|(from, _)| !excluded.contains(from))
                    .map(|(_, messages)| messages.len() as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Swaps generations at the start of `superstep`: messages produced in
    /// `superstep - 1` become readable, except those from `excluded` senders.
    /// Returns the number of readable messages.
    pub fn advance(
        &mut self,
        superstep: Superstep,
        excluded: &[WorkerId],
        combiner: Option<&dyn Combine<M>>,
    ) -> u64 {
        let mut generations = std::mem::take(&mut self.held);
        let previous = std::mem::replace(&mut self.next, Generation::new(superstep));
        generations.insert(previous.produced_in, previous);

        let readable = match superstep.checked_sub(1) {
            Some(produced_in) => generations.remove(&produced_in),
            None => None,
        };
        if let Some(next) = generations.remove(&superstep) {
            self.next = next;
        }
        self.held = generations.split_off(&(superstep + 1));

        for (produced_in, lost) in &generations {
            if lost.received > 0 {
                tracing::warn!(
                    "Discarding {} messages produced in superstep {}, now at {}",
                    lost.received,
                    produced_in,
                    superstep
                );
            }
        }

        if !self.current.is_empty() {
            tracing::debug!("{} receivers left messages unread", self.current.len());
            self.current.clear();
        }

        let mut count = 0;
        if let Some(readable) = readable {
            for (from, messages) in readable.batches {
                if excluded.contains(&from) {
                    tracing::info!("Discarding {} messages from failed {}", messages.len(), from);
                    continue;
                }
                for (receiver, message) in messages {
                    count += 1;
                    let inbox = self.current.entry(receiver).or_default();
                    match (combiner, inbox.pop()) {
                        (Some(combiner), Some(initial)) => inbox.push(combiner.combine(initial, message)),
                        (_, Some(initial)) => {
                            inbox.push(initial);
                            inbox.push(message);
                        }
                        (_, None) => inbox.push(message),
                    }
                }
            }
        }
        count
    }

    /// Removes and returns the readable messages of `vertex`.
    pub fn take(&mut self, vertex: VertexId) -> Vec<M> {
        self.current.remove(&vertex).unwrap_or_default()
    }

    /// Receivers that still have readable messages.
    pub fn receivers(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.current.keys().copied()
    }
}

use crate::message::Message;
use crate::protocol::VertexId;

use std::collections::hash_map::{self, HashMap};

pub struct Vertex<V, M> {
    id: VertexId,
    pub value: Option<V>,
    active: bool,
    outer_edges: HashMap<VertexId, f64>,
    pub(crate) recv_queue: Vec<M>,
    pub(crate) send_queue: Vec<Message<M>>,
}

impl<V, M> Vertex<V, M> {
    pub fn new(id: VertexId) -> Self {
        Vertex {
            id,
            value: None,
            active: true,
            outer_edges: HashMap::new(),
            recv_queue: Vec::new(),
            send_queue: Vec::new(),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stops compute calls for this vertex until a message arrives for it.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn vote_to_halt(&mut self) {
        self.deactivate();
    }

    pub fn add_outer_edge(&mut self, target: VertexId, weight: f64) {
        self.outer_edges.insert(target, weight);
    }

    pub fn get_outer_edges(&self) -> hash_map::Iter<'_, VertexId, f64> {
        self.outer_edges.iter()
    }

    pub fn out_degree(&self) -> usize {
        self.outer_edges.len()
    }

    pub fn send_message_to(&mut self, receiver: VertexId, value: M) {
        let message = Message::new(value, self.id, receiver);
        self.send_queue.push(message);
    }

    pub fn has_messages(&self) -> bool {
        !self.recv_queue.is_empty()
    }

    pub fn read_message(&mut self) -> Option<M> {
        self.recv_queue.pop()
    }

    /// Takes every message delivered for this superstep.
    pub fn take_messages(&mut self) -> Vec<M> {
        std::mem::take(&mut self.recv_queue)
    }
}

impl<V, M: Clone> Vertex<V, M> {
    /// Sends `value` along every outer edge.
    pub fn send_message(&mut self, value: M) {
        let targets: Vec<VertexId> = self.outer_edges.keys().copied().collect();
        for target in targets {
            self.send_message_to(target, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_fans_out_over_edges() {
        let mut vertex: Vertex<(), u8> = Vertex::new(1);
        vertex.add_outer_edge(2, 1.0);
        vertex.add_outer_edge(3, 1.0);
        vertex.send_message(7);

        let mut receivers: Vec<_> = vertex.send_queue.iter().map(|m| m.receiver).collect();
        receivers.sort();
        assert_eq!(receivers, vec![2, 3]);
        assert!(vertex.send_queue.iter().all(|m| m.sender == 1 && m.value == 7));
    }

    #[test]
    fn read_message_drains_the_queue() {
        let mut vertex: Vertex<(), u8> = Vertex::new(1);
        vertex.recv_queue = vec![1, 2];
        assert!(vertex.has_messages());
        assert!(vertex.read_message().is_some());
        assert!(vertex.read_message().is_some());
        assert!(!vertex.has_messages());
        assert_eq!(vertex.read_message(), None);
    }
}

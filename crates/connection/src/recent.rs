use std::collections::VecDeque;

/// Most-recently-connected peer ids, newest first.
#[derive(Debug, Clone)]
pub struct RecentPeers {
    peers: VecDeque<String>,
    capacity: usize,
}

impl Default for RecentPeers {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl RecentPeers {
    pub const DEFAULT_CAPACITY: usize = 5;

    pub fn new(capacity: usize) -> Self {
        Self {
            peers: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Moves `peer_id` to the front, evicting the oldest entry when full.
    pub fn record(&mut self, peer_id: &str) {
        self.peers.retain(|p| p != peer_id);
        self.peers.push_front(peer_id.to_string());
        self.peers.truncate(self.capacity);
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }
}

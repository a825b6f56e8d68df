use tracing::{debug, trace};

use crate::error::{EndpointError, Result};
use crate::peer::{Peer, PeerId};

/// Result of [`PeerPool::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The pool was already empty; nothing happened.
    EmptyPool,
    /// Number of entries removed (zero when the id was not pooled).
    Removed(usize),
}

/// Ordered set of connected peers with a round-robin cursor.
///
/// The cursor may point past the end after removals; every accessor
/// normalizes it back to the front first. Removal drops every entry carrying
/// the id, so a peer admitted twice by mistake leaves in one step.
#[derive(Debug, Default)]
pub struct PeerPool {
    peers: Vec<Peer>,
    cursor: usize,
}

impl PeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Append a peer at the end of the rotation.
    pub fn push(&mut self, peer: Peer) {
        trace!(peer = %peer.id(), size = self.peers.len() + 1, "peer pooled");
        self.peers.push(peer);
    }

    /// Ids in rotation order, starting from index 0.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(Peer::id).collect()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.iter().any(|peer| peer.id() == id)
    }

    /// Id at the cursor, then advance the cursor.
    pub fn next(&mut self) -> Result<PeerId> {
        let index = self.normalize().ok_or(EndpointError::NoPeers)?;
        let id = self.peers[index].id();
        self.cursor = index + 1;
        Ok(id)
    }

    /// Peer at the (normalized) cursor, without advancing.
    pub fn current_mut(&mut self) -> Option<&mut Peer> {
        let index = self.normalize()?;
        self.peers.get_mut(index)
    }

    /// Move the cursor to the following peer, wrapping past the end.
    pub fn advance(&mut self) {
        if let Some(index) = self.normalize() {
            self.cursor = index + 1;
        }
    }

    /// Remove and close the peer at the cursor.
    ///
    /// The cursor stays put so the peer that slides into the slot is the next
    /// one visited.
    pub fn evict_current(&mut self) -> Option<PeerId> {
        let index = self.normalize()?;
        let id = self.peers[index].id();
        self.remove(id);
        Some(id)
    }

    /// Remove and close every entry with `id`.
    ///
    /// The cursor keeps pointing at the same upcoming peer.
    pub fn remove(&mut self, id: PeerId) -> Removal {
        if self.peers.is_empty() {
            debug!(peer = %id, "remove on empty pool");
            return Removal::EmptyPool;
        }

        let before_cursor = self.peers[..self.cursor.min(self.peers.len())]
            .iter()
            .filter(|peer| peer.id() == id)
            .count();

        let (removed, kept): (Vec<Peer>, Vec<Peer>) =
            std::mem::take(&mut self.peers)
                .into_iter()
                .partition(|peer| peer.id() == id);
        self.peers = kept;
        self.cursor = self.cursor.saturating_sub(before_cursor);

        let count = removed.len();
        for peer in removed {
            peer.close();
        }
        if count > 0 {
            debug!(peer = %id, remaining = self.peers.len(), "peer evicted");
        }
        Removal::Removed(count)
    }

    /// Close every pooled peer.
    pub fn close_all(&mut self) {
        for peer in self.peers.drain(..) {
            peer.close();
        }
        self.cursor = 0;
    }

    fn normalize(&mut self) -> Option<usize> {
        if self.peers.is_empty() {
            return None;
        }
        if self.cursor >= self.peers.len() {
            self.cursor = 0;
        }
        Some(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::peer::test_support::loopback_peer;

    fn pool_of(ids: &[u64]) -> (PeerPool, Vec<std::net::TcpStream>) {
        let mut pool = PeerPool::new();
        let mut clients = Vec::new();
        for &id in ids {
            let (peer, client) = loopback_peer(id);
            pool.push(peer);
            clients.push(client);
        }
        (pool, clients)
    }

    #[test]
    fn next_cycles_in_stable_order() {
        let (mut pool, _clients) = pool_of(&[1, 2, 3]);

        let visited: Vec<u64> = (0..6).map(|_| pool.next().unwrap().get()).collect();
        assert_eq!(visited, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn next_on_empty_pool_is_no_peers() {
        let mut pool = PeerPool::new();
        assert!(matches!(pool.next(), Err(EndpointError::NoPeers)));
        assert!(pool.current_mut().is_none());
    }

    #[test]
    fn evicted_peer_never_revisited() {
        let (mut pool, _clients) = pool_of(&[1, 2, 3]);
        assert_eq!(pool.next().unwrap().get(), 1);

        // cursor now at peer 2
        assert_eq!(pool.evict_current().unwrap().get(), 2);
        let visited: Vec<u64> = (0..4).map(|_| pool.next().unwrap().get()).collect();
        assert_eq!(visited, vec![3, 1, 3, 1]);
    }

    #[test]
    fn evicting_last_slot_wraps_to_front() {
        let (mut pool, _clients) = pool_of(&[1, 2]);
        pool.advance();
        assert_eq!(pool.evict_current().unwrap().get(), 2);
        assert_eq!(pool.next().unwrap().get(), 1);
        assert_eq!(pool.next().unwrap().get(), 1);
    }

    #[test]
    fn remove_before_cursor_keeps_upcoming_peer() {
        let (mut pool, _clients) = pool_of(&[1, 2, 3]);
        pool.next().unwrap();
        pool.next().unwrap();

        assert_eq!(pool.remove(PeerId::new(1)), Removal::Removed(1));
        assert_eq!(pool.next().unwrap().get(), 3);
        assert_eq!(pool.next().unwrap().get(), 2);
    }

    #[test]
    fn remove_drops_every_occurrence_and_closes() {
        let (mut pool, mut clients) = pool_of(&[5, 6, 5]);

        assert_eq!(pool.remove(PeerId::new(5)), Removal::Removed(2));
        assert_eq!(pool.ids(), vec![PeerId::new(6)]);
        assert!(!pool.contains(PeerId::new(5)));

        let mut buf = [0u8; 1];
        assert_eq!(clients[0].read(&mut buf).unwrap(), 0);
        assert_eq!(clients[2].read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let (mut pool, _clients) = pool_of(&[1, 2]);
        assert_eq!(pool.remove(PeerId::new(1)), Removal::Removed(1));
        assert_eq!(pool.remove(PeerId::new(1)), Removal::Removed(0));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remove_on_empty_pool_is_reported_noop() {
        let mut pool = PeerPool::new();
        assert_eq!(pool.remove(PeerId::new(9)), Removal::EmptyPool);
    }

    #[test]
    fn close_all_empties_pool() {
        let (mut pool, mut clients) = pool_of(&[1, 2]);
        pool.close_all();
        assert!(pool.is_empty());

        let mut buf = [0u8; 1];
        for client in &mut clients {
            assert_eq!(client.read(&mut buf).unwrap(), 0);
        }
    }
}

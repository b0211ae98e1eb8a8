use hashtable::{Address, OpenAddressMap};
use status::Status;

/// A bounded, per-UDP-socket queue of pending outbound writes, scheduled
/// round-robin across peers.
///
/// `entries[0..size)` are always the live entries; `pop_front` hands back
/// the entry under a rotating cursor without removing it, so a write that
/// only partially succeeds (or hits `EAGAIN`) stays queued for its next
/// turn. A write only leaves the queue when the caller explicitly calls
/// [`WriteQueue::remove`] after it fully completes. `size` therefore counts
/// live entries, not how many turns have been taken -- `pop_front` never
/// changes it. `add`ing a peer that's already enqueued is a caller error
/// (a peer's write interest is enabled at most once between enable and the
/// matching disable/drain) and is rejected with `Status::Occupied`.
pub struct WriteQueue<T> {
    capacity: usize,
    entries: Vec<Option<(Address, T)>>,
    index: OpenAddressMap<Address, usize>,
    size: usize,
    head: usize,
}

impl<T> WriteQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "write queue capacity must be positive");
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        WriteQueue {
            capacity,
            entries,
            index: OpenAddressMap::new(),
            size: 0,
            head: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn contains(&self, peer: &Address) -> bool {
        self.index.contains_key(peer)
    }

    /// Queues `value` for `peer`.
    pub fn add(&mut self, peer: Address, value: T) -> Result<(), Status> {
        if self.index.contains_key(&peer) {
            return Err(Status::Occupied);
        }
        if self.size >= self.capacity {
            return Err(Status::OutOfBuffer);
        }
        let idx = self.size;
        self.entries[idx] = Some((peer, value));
        self.index.insert(peer, idx).expect("peer was just confirmed absent");
        self.size += 1;
        Ok(())
    }

    /// Returns the entry under the rotating cursor and advances it, without
    /// removing the entry from the queue.
    pub fn pop_front(&mut self) -> Option<&(Address, T)> {
        if self.size == 0 {
            return None;
        }
        let idx = self.head;
        self.head = (self.head + 1) % self.size;
        self.entries[idx].as_ref()
    }

    /// Removes `peer`'s entry. Compacts by swapping the last live slot into
    /// the freed one, so `entries[0..size)` stays contiguous.
    pub fn remove(&mut self, peer: &Address) -> Option<T> {
        let idx = self.index.remove(peer).ok()?;
        let removed = self.entries[idx].take().map(|(_, v)| v);
        let last = self.size - 1;
        if idx != last {
            if let Some((moved_peer, moved_val)) = self.entries[last].take() {
                *self.index.get_mut(&moved_peer).expect("moved entry must still be indexed") = idx;
                self.entries[idx] = Some((moved_peer, moved_val));
            }
        }
        self.size -= 1;
        if self.head >= self.size {
            self.head = 0;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn peer(port: u16) -> Address {
        Address::from(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
    }

    #[test]
    fn add_then_remove_restores_prior_state() {
        let mut q: WriteQueue<u8> = WriteQueue::new(4);
        q.add(peer(1), 10).unwrap();
        let size_before = q.len();
        let head_before = q.head;
        q.add(peer(2), 20).unwrap();
        q.remove(&peer(2));
        assert_eq!(q.len(), size_before);
        assert_eq!(q.head, head_before);
        assert!(!q.contains(&peer(2)));
        assert!(q.contains(&peer(1)));
    }

    #[test]
    fn pop_front_rotates_without_shrinking() {
        let mut q: WriteQueue<u8> = WriteQueue::new(4);
        q.add(peer(1), 1).unwrap();
        q.add(peer(2), 2).unwrap();
        let first = q.pop_front().unwrap().0;
        let second = q.pop_front().unwrap().0;
        let third = q.pop_front().unwrap().0;
        assert_eq!(q.len(), 2);
        assert_eq!(first, peer(1));
        assert_eq!(second, peer(2));
        assert_eq!(third, peer(1));
    }

    #[test]
    fn add_rejects_already_enqueued_peer() {
        let mut q: WriteQueue<u8> = WriteQueue::new(4);
        q.add(peer(1), 1).unwrap();
        assert_eq!(q.add(peer(1), 2), Err(Status::Occupied));
        assert_eq!(q.len(), 1);
        assert_eq!(q.remove(&peer(1)), Some(1));
    }

    #[test]
    fn full_queue_rejects_new_peer() {
        let mut q: WriteQueue<u8> = WriteQueue::new(2);
        q.add(peer(1), 1).unwrap();
        q.add(peer(2), 2).unwrap();
        assert_eq!(q.add(peer(3), 3), Err(Status::OutOfBuffer));
    }

    #[test]
    fn remove_compacts_and_fixes_moved_index() {
        let mut q: WriteQueue<u8> = WriteQueue::new(4);
        q.add(peer(1), 1).unwrap();
        q.add(peer(2), 2).unwrap();
        q.add(peer(3), 3).unwrap();
        q.remove(&peer(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.remove(&peer(3)), Some(3));
        assert_eq!(q.remove(&peer(2)), Some(2));
        assert!(q.is_empty());
    }
}

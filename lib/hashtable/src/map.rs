use std::hash::{BuildHasher, Hash, Hasher};

use status::Status;

use crate::fnv::FnvBuildHasher;

const INITIAL_CAPACITY: usize = 16;
const MAX_LOAD_FACTOR: f64 = 0.7;
const MAX_TOMBSTONE_RATIO: f64 = 0.2;

#[derive(Clone)]
enum Slot<K, V> {
    Empty,
    Occupied(K, V),
    Tombstone,
}

/// Open-addressed, linear-probing hash map with power-of-two capacity.
///
/// Used for both the UDP peer table (keyed by remote [`Address`](crate::Address))
/// and the write-queue's peer-to-slot index. Deletions leave a `Tombstone`
/// behind so that probe chains that passed through the deleted slot remain
/// intact; tombstones are reclaimed wholesale on the next resize.
///
/// The default hasher is FNV-1a (see [`crate::fnv`]); a different
/// [`BuildHasher`] can be supplied for keys that don't need that specific
/// byte-stable behavior.
pub struct OpenAddressMap<K, V, S = FnvBuildHasher> {
    slots: Vec<Slot<K, V>>,
    size: usize,
    tombstones: usize,
    hash_builder: S,
}

impl<K: Hash + Eq, V> OpenAddressMap<K, V, FnvBuildHasher> {
    pub fn new() -> Self {
        Self::with_hasher(FnvBuildHasher::default())
    }
}

impl<K: Hash + Eq, V> Default for OpenAddressMap<K, V, FnvBuildHasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> OpenAddressMap<K, V, S> {
    pub fn with_hasher(hash_builder: S) -> Self {
        let slots = (0..INITIAL_CAPACITY).map(|_| Slot::Empty).collect();
        OpenAddressMap {
            slots,
            size: 0,
            tombstones: 0,
            hash_builder,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn bucket_of(&self, key: &K) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.capacity() - 1)
    }

    /// Finds the slot containing `key`, continuing past tombstones.
    fn probe_for_key(&self, key: &K) -> Option<usize> {
        let cap = self.capacity();
        let start = self.bucket_of(key);
        for step in 0..cap {
            let idx = (start + step) & (cap - 1);
            match &self.slots[idx] {
                Slot::Occupied(k, _) if k == key => return Some(idx),
                Slot::Empty => return None,
                Slot::Occupied(_, _) | Slot::Tombstone => continue,
            }
        }
        None
    }

    /// Finds the slot to insert `key` into: the first tombstone seen, unless
    /// the key is already occupied somewhere along the probe chain, in which
    /// case that index is returned instead (to let the caller reject the
    /// duplicate).
    fn probe_for_insert(&self, key: &K) -> Result<usize, usize> {
        let cap = self.capacity();
        let start = self.bucket_of(key);
        let mut first_tombstone: Option<usize> = None;
        for step in 0..cap {
            let idx = (start + step) & (cap - 1);
            match &self.slots[idx] {
                Slot::Occupied(k, _) if k == key => return Err(idx),
                Slot::Occupied(_, _) => continue,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Empty => return Ok(first_tombstone.unwrap_or(idx)),
            }
        }
        status::invariant(false, "open-addressed map has no empty/tombstone slot to insert into");
        unreachable!()
    }

    fn should_grow(&self) -> bool {
        let cap = self.capacity() as f64;
        let load = (self.size + 1) as f64 / cap;
        let tomb = self.tombstones as f64 / cap;
        load >= MAX_LOAD_FACTOR || tomb >= MAX_TOMBSTONE_RATIO
    }

    fn grow(&mut self) {
        let new_cap = (self.capacity() * 2).next_power_of_two();
        let old_slots = std::mem::replace(
            &mut self.slots,
            (0..new_cap).map(|_| Slot::Empty).collect(),
        );
        self.size = 0;
        self.tombstones = 0;
        for slot in old_slots {
            if let Slot::Occupied(k, v) = slot {
                let idx = match self.probe_for_insert(&k) {
                    Ok(idx) => idx,
                    Err(_) => {
                        status::invariant(false, "rehash produced a duplicate key");
                        unreachable!()
                    }
                };
                self.slots[idx] = Slot::Occupied(k, v);
                self.size += 1;
            }
        }
    }

    /// Inserts `key -> value`. Fails with [`Status::Occupied`] if the key is
    /// already present; the caller must `remove` first to replace a value.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), Status> {
        if self.should_grow() {
            self.grow();
        }
        match self.probe_for_insert(&key) {
            Err(_) => Err(Status::Occupied),
            Ok(idx) => {
                if matches!(self.slots[idx], Slot::Tombstone) {
                    self.tombstones -= 1;
                }
                self.slots[idx] = Slot::Occupied(key, value);
                self.size += 1;
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.probe_for_key(key)?;
        match &self.slots[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.probe_for_key(key)?;
        match &mut self.slots[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.probe_for_key(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Result<V, Status> {
        let idx = self.probe_for_key(key).ok_or(Status::NotFound)?;
        let slot = std::mem::replace(&mut self.slots[idx], Slot::Tombstone);
        match slot {
            Slot::Occupied(_, v) => {
                self.size -= 1;
                self.tombstones += 1;
                Ok(v)
            }
            _ => unreachable!("probe_for_key only returns indices of Occupied slots"),
        }
    }

    /// Returns the existing value for `key`, or inserts the result of `make`
    /// and returns a reference to it. Used where a caller needs
    /// get-or-create-on-miss semantics rather than insert's strict
    /// duplicate-rejection, e.g. the reactor's per-peer UDP session table.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        if !self.contains_key(&key) {
            self.insert(key, make()).expect("just checked absence");
        }
        self.get_mut(&key).expect("just inserted")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut map: OpenAddressMap<u32, &str> = OpenAddressMap::new();
        assert!(map.insert(1, "one").is_ok());
        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.remove(&1), Ok("one"));
        assert_eq!(map.get(&1), None);
    }

    #[test]
    fn duplicate_insert_fails_occupied() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        map.insert(5, 50).unwrap();
        assert_eq!(map.insert(5, 51), Err(Status::Occupied));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        assert_eq!(map.remove(&1), Err(Status::NotFound));
    }

    #[test]
    fn grows_under_load_and_keeps_all_entries() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        for i in 0..500 {
            map.insert(i, i * 2).unwrap();
        }
        assert_eq!(map.len(), 500);
        for i in 0..500 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn tombstones_do_not_break_probe_chains() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        for i in 0..8 {
            map.insert(i, i).unwrap();
        }
        // remove a handful, interleaved, then confirm survivors are all still reachable
        for i in [1, 3, 5] {
            map.remove(&i).unwrap();
        }
        for i in [0, 2, 4, 6, 7] {
            assert_eq!(map.get(&i), Some(&i));
        }
        for i in [1, 3, 5] {
            assert_eq!(map.get(&i), None);
        }
    }

    #[test]
    fn repeated_insert_remove_caps_tombstone_ratio() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        for round in 0..1000u32 {
            map.insert(round, round).unwrap();
            map.remove(&round).unwrap();
            let cap = map.capacity() as f64;
            assert!(map.tombstones as f64 / cap < MAX_TOMBSTONE_RATIO + f64::EPSILON);
        }
    }

    #[test]
    fn get_or_insert_with_only_calls_factory_on_miss() {
        let mut map: OpenAddressMap<u32, u32> = OpenAddressMap::new();
        let mut calls = 0;
        {
            let v = map.get_or_insert_with(1, || {
                calls += 1;
                100
            });
            assert_eq!(*v, 100);
        }
        map.get_or_insert_with(1, || {
            calls += 1;
            200
        });
        assert_eq!(calls, 1);
    }
}

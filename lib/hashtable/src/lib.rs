//! A generic open-addressed hash map, instantiated once for the UDP peer
//! table and once for the write-queue's peer-to-slot index, plus the
//! [`Address`] key type and its byte-stable FNV-1a hash.

mod address;
mod fnv;
mod map;

pub use address::{Address, Family};
pub use fnv::{FnvBuildHasher, FnvHasher};
pub use map::OpenAddressMap;

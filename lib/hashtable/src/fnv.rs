//! A small FNV-1a [`Hasher`](std::hash::Hasher) used for keys whose byte
//! layout must hash identically regardless of platform endianness.
//!
//! The standard library's default `Hasher::write_u16`/`write_u32` etc. use
//! native-endian byte order, which would make [`Address`](crate::Address)
//! hash differently on big-endian hosts. Callers that need a stable byte
//! order should feed bytes to [`std::hash::Hasher::write`] directly rather
//! than the `write_uNN` helpers.

use std::hash::{BuildHasherDefault, Hasher};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub struct FnvHasher(u64);

impl Default for FnvHasher {
    fn default() -> Self {
        FnvHasher(FNV_OFFSET_BASIS)
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = self.0;
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        self.0 = hash;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

pub type FnvBuildHasher = BuildHasherDefault<FnvHasher>;

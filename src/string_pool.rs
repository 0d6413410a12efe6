//! Interned byte strings with stable addresses. Symbol names are interned
//! once and then compared by identity for the rest of the link.

use crate::hash::PassThroughHashMap;
use bumpalo::Bump;
use smallvec::SmallVec;
use std::fmt::Display;
use std::hash::Hasher;

/// A handle to an interned string. Copyable; content-equal handles from the
/// same pool always point at the same bytes, so identity comparison is enough.
#[derive(Clone, Copy, Debug)]
pub struct InternedStr<'data> {
    /// Precomputed so that hash-table operations never have to touch the
    /// bytes again.
    hash: u64,
    bytes: &'data [u8],
}

pub(crate) struct StringPool<'data> {
    arena: &'data Bump,
    /// Hash of the bytes -> every distinct string seen with that hash.
    /// Collisions are rare enough that a linear scan of the bucket is fine.
    map: PassThroughHashMap<u64, SmallVec<[&'data [u8]; 1]>>,
}

impl<'data> StringPool<'data> {
    pub(crate) fn new(arena: &'data Bump) -> Self {
        Self {
            arena,
            map: Default::default(),
        }
    }

    /// Interns `bytes`, copying them into the pool on first sight. Idempotent;
    /// the returned handle's address is stable for the life of the pool.
    pub(crate) fn intern(&mut self, bytes: &[u8]) -> InternedStr<'data> {
        let hash = fxhash::hash64(bytes);
        if let Some(candidates) = self.map.get(&hash) {
            for &candidate in candidates {
                if candidate == bytes {
                    return InternedStr {
                        hash,
                        bytes: candidate,
                    };
                }
            }
        }
        let stored: &'data [u8] = self.arena.alloc_slice_copy(bytes);
        self.map.entry(hash).or_default().push(stored);
        InternedStr {
            hash,
            bytes: stored,
        }
    }

    /// Looks up an already-interned string without interning it.
    pub(crate) fn find(&self, bytes: &[u8]) -> Option<InternedStr<'data>> {
        let hash = fxhash::hash64(bytes);
        self.map
            .get(&hash)?
            .iter()
            .find(|&&candidate| candidate == bytes)
            .map(|&candidate| InternedStr {
                hash,
                bytes: candidate,
            })
    }
}

impl<'data> InternedStr<'data> {
    pub(crate) fn bytes(&self) -> &'data [u8] {
        self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if both handles point at the same pool storage.
    pub(crate) fn ptr_eq(&self, other: &InternedStr) -> bool {
        std::ptr::eq(self.bytes.as_ptr(), other.bytes.as_ptr()) && self.len() == other.len()
    }
}

impl PartialEq for InternedStr<'_> {
    fn eq(&self, other: &Self) -> bool {
        // Identity fast-path; content comparison keeps the impl correct for
        // handles that didn't come from the same pool (e.g. in tests).
        self.ptr_eq(other) || self.bytes == other.bytes
    }
}

impl Eq for InternedStr<'_> {}

impl std::hash::Hash for InternedStr<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The hash is already a hash of the bytes - that's the whole point of
        // storing it.
        state.write_u64(self.hash);
    }
}

impl Display for InternedStr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        String::from_utf8_lossy(self.bytes).fmt(f)
    }
}

//! Chunk splitting, reassembly and the running content hash.
//!
//! Everything here is pure: no I/O and no errors.

use std::num::NonZeroU32;

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Iterator over `(index, payload)` pairs of a byte sequence
pub struct Chunks {
    data: Bytes,
    chunk_size: usize,
    next_index: u32,
}

impl Iterator for Chunks {
    type Item = (u32, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let take = self.chunk_size.min(self.data.len());
        let payload = self.data.split_to(take);
        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);
        Some((index, payload))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.data.len() + self.chunk_size - 1) / self.chunk_size;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

/// Split `data` into chunks of `chunk_size` bytes, numbered from zero.
///
/// Payloads share the input buffer; only the last one may be short.
pub fn split(data: Bytes, chunk_size: NonZeroU32) -> Chunks {
    split_from(data, chunk_size, 0)
}

/// Like [`split`], numbering the first chunk `first_index`
pub fn split_from(data: Bytes, chunk_size: NonZeroU32, first_index: u32) -> Chunks {
    Chunks {
        data,
        chunk_size: chunk_size.get() as usize,
        next_index: first_index,
    }
}

/// Concatenate payloads back into one buffer, in the order given
pub fn reassemble<I>(chunks: I) -> Bytes
where
    I: IntoIterator<Item = Bytes>,
{
    let mut out = BytesMut::new();
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    out.freeze()
}

/// Running SHA-256 over a file's bytes, fed one chunk at a time
#[derive(Clone, Default)]
pub struct ContentDigest {
    hasher: Sha256,
    bytes: u64,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes hashed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Lower-case hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDigest").field("bytes", &self.bytes).finish()
    }
}

/// Digest of a whole chunk sequence
pub fn digest<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut digest = ContentDigest::new();
    for chunk in chunks {
        digest.update(chunk);
    }
    digest.finalize()
}

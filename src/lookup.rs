use std::io;

use rustc_hash::FxHashMap;

use crate::signature::{BlockHash, SignatureSink};

/// Searches a bucket of blocks sharing a weak hash for one with the given
/// strong hash and short size.
///
/// A full block never matches a short one, even with the same content
/// prefix. Blocks from `preferred_file` are tried first, which finds an
/// untouched file before a global scan would; otherwise the first match in
/// bucket order wins.
pub fn find_unique_hash<'a>(
    bucket: &'a [BlockHash],
    strong_hash: &[u8],
    short_size: i32,
    preferred_file: Option<i64>,
) -> Option<&'a BlockHash> {
    if strong_hash.is_empty() {
        return None;
    }

    let matches = |block: &&BlockHash| {
        block.short_size == short_size && block.strong_hash == strong_hash
    };

    if let Some(file_index) = preferred_file {
        if let Some(block) = bucket
            .iter()
            .filter(|block| block.file_index == file_index)
            .find(matches)
        {
            return Some(block);
        }
    }

    bucket.iter().find(matches)
}

/// Known blocks grouped by weak hash.
#[derive(Debug, Clone, Default)]
pub struct BlockLibrary {
    buckets: FxHashMap<u32, Vec<BlockHash>>,
    len: usize,
}

impl BlockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block. Blocks keep their insertion order within a bucket.
    pub fn insert(&mut self, hash: BlockHash) {
        self.buckets.entry(hash.weak_hash).or_default().push(hash);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket(&self, weak_hash: u32) -> &[BlockHash] {
        self.buckets.get(&weak_hash).map_or(&[][..], Vec::as_slice)
    }

    /// Looks up a block by its full signature. See [`find_unique_hash`].
    pub fn find(
        &self,
        weak_hash: u32,
        strong_hash: &[u8],
        short_size: i32,
        preferred_file: Option<i64>,
    ) -> Option<&BlockHash> {
        find_unique_hash(self.bucket(weak_hash), strong_hash, short_size, preferred_file)
    }
}

impl FromIterator<BlockHash> for BlockLibrary {
    fn from_iter<I: IntoIterator<Item = BlockHash>>(iter: I) -> Self {
        let mut library = Self::new();
        library.extend(iter);
        library
    }
}

impl Extend<BlockHash> for BlockLibrary {
    fn extend<I: IntoIterator<Item = BlockHash>>(&mut self, iter: I) {
        for hash in iter {
            self.insert(hash);
        }
    }
}

impl SignatureSink for BlockLibrary {
    fn write_hash(&mut self, hash: BlockHash) -> io::Result<()> {
        self.insert(hash);
        Ok(())
    }
}

//! Content addresses for blocks held in external storage.
//!
//! An address has the form `"<algorithm>/<hex hash>/<size>"`. Storage
//! splits files into [`BIG_BLOCK_SIZE`] blocks; only the last block of a
//! file can be smaller.

use std::fmt::{self, Write as _};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Block size used for content-addressed storage.
pub const BIG_BLOCK_SIZE: i64 = 4 * 1024 * 1024;

/// Hash algorithms a manifest may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHAKE128 with a 32-byte output. The only one addresses are built from.
    Shake128_32,
    Crc32c,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shake128_32 => f.write_str("shake128-32"),
            Self::Crc32c => f.write_str("crc32c"),
        }
    }
}

/// One file of a container description: only what address translation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    pub path: String,
    pub size: i64,
}

/// The files of a container, by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub files: Vec<ContainerFile>,
}

impl Container {
    fn file(&self, file_index: i64) -> Result<&ContainerFile> {
        usize::try_from(file_index)
            .ok()
            .and_then(|i| self.files.get(i))
            .ok_or_else(|| {
                Error::ContainerMismatch(format!(
                    "no file at index {} (container has {} files)",
                    file_index,
                    self.files.len()
                ))
            })
    }
}

/// Where a block lies in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockLocation {
    pub file_index: i64,
    pub block_index: i64,
}

impl BlockLocation {
    pub fn new(file_index: i64, block_index: i64) -> Self {
        Self {
            file_index,
            block_index,
        }
    }
}

/// Size of a storage block, given the size of its file.
pub fn block_size(file_size: i64, block_index: i64) -> i64 {
    if (block_index + 1) * BIG_BLOCK_SIZE > file_size {
        file_size % BIG_BLOCK_SIZE
    } else {
        BIG_BLOCK_SIZE
    }
}

/// Number of storage blocks in a file of `file_size` bytes.
pub fn block_count(file_size: i64) -> i64 {
    (file_size + BIG_BLOCK_SIZE - 1) / BIG_BLOCK_SIZE
}

/// Formats a content address.
pub fn block_address(algorithm: HashAlgorithm, hash: &[u8], size: i64) -> String {
    let mut addr = String::with_capacity(hash.len() * 2 + 24);
    // writing to a String cannot fail
    let _ = write!(addr, "{}/", algorithm);
    for byte in hash {
        let _ = write!(addr, "{:02x}", byte);
    }
    let _ = write!(addr, "/{}", size);
    addr
}

/// Block hashes by location, usually read from a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHashMap {
    files: FxHashMap<i64, FxHashMap<i64, Vec<u8>>>,
}

impl BlockHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, loc: BlockLocation, hash: Vec<u8>) {
        self.files
            .entry(loc.file_index)
            .or_default()
            .insert(loc.block_index, hash);
    }

    pub fn get(&self, loc: BlockLocation) -> Option<&[u8]> {
        self.files
            .get(&loc.file_index)?
            .get(&loc.block_index)
            .map(Vec::as_slice)
    }

    /// Translates every hash into a content address. The container supplies
    /// file sizes, which fix the size of each file's last block.
    pub fn to_address_map(&self, container: &Container, algorithm: HashAlgorithm) -> Result<BlockAddressMap> {
        if algorithm != HashAlgorithm::Shake128_32 {
            return Err(Error::UnsupportedHashAlgorithm(algorithm));
        }

        let mut bam = BlockAddressMap::new();
        for (&file_index, blocks) in &self.files {
            let file = container.file(file_index)?;
            for (&block_index, hash) in blocks {
                let size = block_size(file.size, block_index);
                bam.set(
                    BlockLocation::new(file_index, block_index),
                    block_address(algorithm, hash, size),
                );
            }
        }
        Ok(bam)
    }
}

/// Content addresses by location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockAddressMap {
    files: FxHashMap<i64, FxHashMap<i64, String>>,
}

impl BlockAddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, loc: BlockLocation, addr: String) {
        self.files
            .entry(loc.file_index)
            .or_default()
            .insert(loc.block_index, addr);
    }

    pub fn get(&self, loc: BlockLocation) -> Option<&str> {
        self.files
            .get(&loc.file_index)?
            .get(&loc.block_index)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.values().map(|blocks| blocks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-indexes this map, built against `current`, for `desired`: an
    /// equivalent container listing the same files, possibly in another
    /// order. Files are matched by path.
    ///
    /// Both containers are checked before anything is translated: they must
    /// have the same number of files and every current path must exist in
    /// `desired`.
    pub fn translate_file_indices(&self, current: &Container, desired: &Container) -> Result<Self> {
        if current.files.len() != desired.files.len() {
            return Err(Error::ContainerMismatch(format!(
                "current container has {} files, desired has {}",
                current.files.len(),
                desired.files.len()
            )));
        }

        let path_to_index: FxHashMap<&str, usize> = desired
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.as_str(), i))
            .collect();

        let mut targets = Vec::with_capacity(current.files.len());
        for file in &current.files {
            let Some(&index) = path_to_index.get(file.path.as_str()) else {
                return Err(Error::ContainerMismatch(format!(
                    "{} is missing from desired container",
                    file.path
                )));
            };
            targets.push(index as i64);
        }

        let mut translated = Self::new();
        for (current_index, (file, &desired_index)) in current.files.iter().zip(&targets).enumerate() {
            for block_index in 0..block_count(file.size) {
                let from = BlockLocation::new(current_index as i64, block_index);
                if let Some(addr) = self.get(from) {
                    translated.set(BlockLocation::new(desired_index, block_index), addr.to_owned());
                }
            }
        }

        debug!(addresses = translated.len(), "translated block addresses");
        Ok(translated)
    }
}

#![allow(clippy::needless_doctest_main)]
#![doc = include_str!("../README.md")]

mod address;
mod control;
mod diff;
mod error;
mod lookup;
mod partition;
mod patch;
mod signature;
mod suffix;
mod writer;

pub use address::{
    block_address, block_count, block_size, BlockAddressMap, BlockHashMap, BlockLocation, Container, ContainerFile,
    HashAlgorithm, BIG_BLOCK_SIZE,
};
pub use control::{Control, ControlSink, DiffStats, OwnedControl, ProgressSink};
pub use diff::{diff, DiffContext, COMMIT_MARGIN, MAX_FILE_SIZE, PROGRESS_INTERVAL};
pub use error::{Error, Input, Result};
pub use lookup::{find_unique_hash, BlockLibrary};
pub use partition::{partition_ranges, resolve_workers, PartitionedSuffixArray};
pub use patch::apply_patch;
pub use signature::{weak_hash, BlockHash, SignContext, SignatureSink, DEFAULT_BLOCK_SIZE, WEAK_HASH_MODULUS};
pub use suffix::{MatchIndex, SuffixArray, SuffixWorkspace};
pub use writer::{diff_bsdf2, diff_bsdiff40, CompressionAlgorithm, PatchWriter};

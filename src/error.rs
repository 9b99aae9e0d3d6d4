use std::fmt;
use std::io;

use crate::address::HashAlgorithm;

/// Which of the two diff inputs an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Old,
    New,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Old => f.write_str("old"),
            Self::New => f.write_str("new"),
        }
    }
}

/// Errors returned by diffing, signing and address translation.
///
/// Output already handed to a sink before an error is not retracted: a
/// stream produced by a failed operation must be discarded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input exceeds the configured size ceiling. Checked before any work.
    #[error("{which} file is {len} bytes, larger than the {max} bytes that can be diffed")]
    InputTooLarge {
        /// The offending input.
        which: Input,
        /// Length observed (may be a lower bound when reading from a stream).
        len: u64,
        /// Ceiling in effect.
        max: u64,
    },

    /// Reading an input or delivering a record to a sink failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A hash-to-address translation named an algorithm this crate does not map.
    #[error("unsupported hash algorithm {0}, want shake128-32")]
    UnsupportedHashAlgorithm(HashAlgorithm),

    /// Two container descriptions that should describe the same files do not.
    #[error("container mismatch: {0}")]
    ContainerMismatch(String),

    #[error("invalid block size {0}")]
    InvalidBlockSize(usize),

    /// The worker pool for partitioned suffix sorting could not be created.
    #[error("could not build suffix sort workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A patch container failed validation while being applied.
    #[error("corrupt patch: {0}")]
    CorruptPatch(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Fixed-size block signatures: a weak checksum for bucketing plus an MD5
//! digest to confirm matches.

use std::io::{self, Read};

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{Error, Result};

/// Modulus applied to both weak hash accumulators.
pub const WEAK_HASH_MODULUS: u32 = 1 << 16;

pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Signature of one block of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockHash {
    pub file_index: i64,
    pub block_index: i64,
    pub weak_hash: u32,
    pub strong_hash: Vec<u8>,
    /// Length of a final block shorter than the block size, 0 for full blocks.
    pub short_size: i32,
}

/// Weak checksum of a whole block.
///
/// `a` sums the bytes and `b` weights each byte by its distance from the
/// end of the block; the result packs `a mod M` in the low half and
/// `b mod M` in the high half.
pub fn weak_hash(block: &[u8]) -> u32 {
    let len = block.len() as u32;
    let (mut a, mut b) = (0u32, 0u32);
    for (i, &byte) in block.iter().enumerate() {
        a = a.wrapping_add(byte as u32);
        b = b.wrapping_add((len - i as u32).wrapping_mul(byte as u32));
    }
    (a % WEAK_HASH_MODULUS) + WEAK_HASH_MODULUS * (b % WEAK_HASH_MODULUS)
}

/// Receives block hashes in block order.
pub trait SignatureSink {
    fn write_hash(&mut self, hash: BlockHash) -> io::Result<()>;
}

impl<F> SignatureSink for F
where
    F: FnMut(BlockHash) -> io::Result<()>,
{
    #[inline]
    fn write_hash(&mut self, hash: BlockHash) -> io::Result<()> {
        self(hash)
    }
}

impl SignatureSink for Vec<BlockHash> {
    fn write_hash(&mut self, hash: BlockHash) -> io::Result<()> {
        self.push(hash);
        Ok(())
    }
}

/// Signs streams block by block. The block size is fixed for the lifetime
/// of the context.
#[derive(Debug, Clone)]
pub struct SignContext {
    block_size: usize,
    hasher: Md5,
    buf: Vec<u8>,
}

impl Default for SignContext {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            hasher: Md5::new(),
            buf: Vec::new(),
        }
    }
}

impl SignContext {
    /// `block_size` must be non-zero and fit the 32-bit short size field.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size > i32::MAX as usize {
            return Err(Error::InvalidBlockSize(block_size));
        }
        Ok(Self {
            block_size,
            ..Self::default()
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// MD5 digest of `block`.
    pub fn strong_hash(&mut self, block: &[u8]) -> Vec<u8> {
        self.hasher.update(block);
        self.hasher.finalize_reset().to_vec()
    }

    /// Reads `reader` to the end, sending one [`BlockHash`] per block to
    /// `sink`. Returns the number of blocks signed.
    ///
    /// An empty stream yields no blocks.
    pub fn create_signature<R, S>(&mut self, file_index: i64, mut reader: R, sink: &mut S) -> Result<u64>
    where
        R: Read,
        S: SignatureSink + ?Sized,
    {
        let mut buf = std::mem::take(&mut self.buf);
        buf.resize(self.block_size, 0);

        let result = self.sign_blocks(file_index, &mut reader, &mut buf, sink);
        self.buf = buf;

        let blocks = result?;
        debug!(file_index, blocks, block_size = self.block_size, "signed file");
        Ok(blocks)
    }

    fn sign_blocks<R, S>(&mut self, file_index: i64, reader: &mut R, buf: &mut [u8], sink: &mut S) -> Result<u64>
    where
        R: Read,
        S: SignatureSink + ?Sized,
    {
        let mut block_index = 0i64;
        loop {
            let n = read_block(reader, buf)?;
            if n == 0 {
                return Ok(block_index as u64);
            }

            let block = &buf[..n];
            let hash = BlockHash {
                file_index,
                block_index,
                weak_hash: weak_hash(block),
                strong_hash: self.strong_hash(block),
                short_size: if n < self.block_size { n as i32 } else { 0 },
            };
            sink.write_hash(hash)?;
            block_index += 1;

            if n < self.block_size {
                return Ok(block_index as u64);
            }
        }
    }
}

/// Fills `buf` as far as the reader allows. Only a short count at end of
/// stream is returned.
fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most three bytes per read.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    fn sign(block_size: usize, data: &[u8]) -> Vec<BlockHash> {
        let mut ctx = SignContext::new(block_size).unwrap();
        let mut hashes = Vec::new();
        ctx.create_signature(7, data, &mut hashes).unwrap();
        hashes
    }

    #[test]
    fn weak_hash_known_values() {
        // a = 6, b = 3*1 + 2*2 + 1*3 = 10
        assert_eq!(weak_hash(&[1, 2, 3]), 6 + (10 << 16));
        assert_eq!(weak_hash(&[]), 0);

        let block = vec![0xffu8; 1024];
        let a = 0xff * 1024u32;
        let b = (1..=1024u32).map(|w| w * 0xff).sum::<u32>();
        assert_eq!(
            weak_hash(&block),
            (a % WEAK_HASH_MODULUS) + WEAK_HASH_MODULUS * (b % WEAK_HASH_MODULUS)
        );
    }

    #[test]
    fn strong_hash_is_md5() {
        let mut ctx = SignContext::default();
        let digest = ctx.strong_hash(b"abc");
        assert_eq!(
            digest,
            [
                0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28,
                0xe1, 0x7f, 0x72
            ]
        );
        // the hasher is reset between blocks
        assert_eq!(ctx.strong_hash(b"abc"), digest);
    }

    #[test]
    fn exact_multiple_has_no_short_block() {
        let data = vec![42u8; 12];
        let hashes = sign(4, &data);
        assert_eq!(hashes.len(), 3);
        assert!(hashes.iter().all(|h| h.short_size == 0));
        assert_eq!(
            hashes.iter().map(|h| h.block_index).collect::<Vec<_>>(),
            [0, 1, 2]
        );
        assert!(hashes.iter().all(|h| h.file_index == 7));
    }

    #[test]
    fn trailing_short_block() {
        let data: Vec<u8> = (0..10).collect();
        let hashes = sign(4, &data);
        assert_eq!(hashes.len(), 3);
        assert_eq!(hashes[2].short_size, 2);
        assert_eq!(hashes[2].weak_hash, weak_hash(&[8, 9]));
        assert_eq!(hashes[0].short_size, 0);
    }

    #[test]
    fn empty_stream_has_no_blocks() {
        assert!(sign(16, b"").is_empty());
    }

    #[test]
    fn signing_is_idempotent_and_read_size_independent() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 37 % 256) as u8).collect();
        let first = sign(64, &data);
        assert_eq!(first, sign(64, &data));

        let mut ctx = SignContext::new(64).unwrap();
        let mut trickled = Vec::new();
        let blocks = ctx.create_signature(7, Trickle(&data), &mut trickled).unwrap();
        assert_eq!(blocks, 16);
        assert_eq!(trickled, first);
    }

    #[test]
    fn same_content_short_and_full_blocks_differ_only_in_size() {
        let hashes = sign(4, b"abcdabc");
        assert_eq!(hashes[0].short_size, 0);
        assert_eq!(hashes[1].short_size, 3);
        assert_ne!(hashes[0].strong_hash, hashes[1].strong_hash);
    }

    #[test]
    fn invalid_block_sizes() {
        assert!(matches!(SignContext::new(0), Err(Error::InvalidBlockSize(0))));
        assert!(SignContext::new(1).is_ok());
    }

    #[test]
    fn sink_errors_stop_signing() {
        let mut ctx = SignContext::new(2).unwrap();
        let mut seen = 0;
        let mut sink = |_: BlockHash| -> io::Result<()> {
            seen += 1;
            Err(io::Error::new(io::ErrorKind::Other, "stop"))
        };
        let err = ctx.create_signature(0, &b"abcdef"[..], &mut sink).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(seen, 1);
    }
}

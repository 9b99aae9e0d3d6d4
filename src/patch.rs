/*-
 * Copyright 2003-2005 Colin Percival
 * Copyright 2012 Matthew Endsley
 * Modified 2017 Pieter-Jan Briers
 * Modified 2021 Kornel Lesinski
 * Modified 2025 - Performance optimizations and validation
 * All rights reserved
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted providing that the following conditions
 * are met:
 * 1. Redistributions of source code must retain the above copyright
 *    notice, this list of conditions and the following disclaimer.
 * 2. Redistributions in binary form must reproduce the above copyright
 *    notice, this list of conditions and the following disclaimer in the
 *    documentation and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE AUTHOR ``AS IS'' AND ANY EXPRESS OR
 * IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
 * ARE DISCLAIMED.  IN NO EVENT SHALL THE AUTHOR BE LIABLE FOR ANY
 * DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
 * OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
 * HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT,
 * STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING
 * IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

//! Reading and applying BSDIFF40 / BSDF2 patch containers.

use std::io::Read;

use crate::diff::MAX_FILE_SIZE;
use crate::error::{Error, Result};
use crate::writer::{CompressionAlgorithm, BSDF2_MAGIC, BSDIFF_MAGIC, CONTROL_SIZE};

const HEADER_SIZE: usize = 32;

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptPatch(msg.into())
}

/// Reads sign-magnitude i64 as used in bspatch.
/// This is NOT plain little-endian - it uses sign-magnitude encoding.
#[inline]
fn offtin(buf: [u8; 8]) -> i64 {
    let y = i64::from_le_bytes(buf);
    if 0 == y & (1 << 63) {
        y
    } else {
        -(y & !(1 << 63))
    }
}

#[inline]
fn read_int(data: &[u8], at: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    offtin(buf)
}

fn decompress(alg: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    match alg {
        CompressionAlgorithm::None => decompressed.extend_from_slice(data),
        CompressionAlgorithm::Bz2 => {
            bzip2::read::BzDecoder::new(data).read_to_end(&mut decompressed)?;
        }
        CompressionAlgorithm::Brotli => {
            brotli::Decompressor::new(data, 4096).read_to_end(&mut decompressed)?;
        }
    }
    Ok(decompressed)
}

/// The decompressed streams of a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PatchStreams {
    pub(crate) new_size: usize,
    pub(crate) control: Vec<u8>,
    pub(crate) diff: Vec<u8>,
    pub(crate) extra: Vec<u8>,
}

/// Parses a BSDF2 or classic BSDIFF40 header and decompresses its streams.
pub(crate) fn parse_header(patch: &[u8]) -> Result<PatchStreams> {
    if patch.len() < HEADER_SIZE {
        return Err(corrupt("patch data too short"));
    }

    let magic = &patch[0..8];
    let (alg_control, alg_diff, alg_extra) = if magic == BSDIFF_MAGIC {
        (
            CompressionAlgorithm::Bz2,
            CompressionAlgorithm::Bz2,
            CompressionAlgorithm::Bz2,
        )
    } else if &magic[0..5] == BSDF2_MAGIC {
        let alg = |b: u8| {
            CompressionAlgorithm::from_u8(b)
                .ok_or_else(|| corrupt(format!("unknown compression algorithm: {}", b)))
        };
        (alg(magic[5])?, alg(magic[6])?, alg(magic[7])?)
    } else {
        return Err(corrupt("invalid BSDIFF/BSDF2 magic header"));
    };

    let len_control = read_int(patch, 8);
    let len_diff = read_int(patch, 16);
    let new_size = read_int(patch, 24);

    if len_control < 0 || len_diff < 0 || new_size < 0 {
        return Err(corrupt("negative length in patch header"));
    }
    if new_size as u64 > MAX_FILE_SIZE as u64 {
        return Err(corrupt(format!("new size {} exceeds limit", new_size)));
    }

    let control_end = (len_control as u64)
        .checked_add(HEADER_SIZE as u64)
        .filter(|&end| end <= patch.len() as u64)
        .ok_or_else(|| corrupt("control stream exceeds patch bounds"))? as usize;
    let diff_end = (len_diff as u64)
        .checked_add(control_end as u64)
        .filter(|&end| end <= patch.len() as u64)
        .ok_or_else(|| corrupt("diff stream exceeds patch bounds"))? as usize;

    let control = decompress(alg_control, &patch[HEADER_SIZE..control_end])?;
    if control.len() % CONTROL_SIZE != 0 {
        return Err(corrupt("control data is not a whole number of tuples"));
    }
    let diff = decompress(alg_diff, &patch[control_end..diff_end])?;
    let extra = decompress(alg_extra, &patch[diff_end..])?;

    Ok(PatchStreams {
        new_size: new_size as usize,
        control,
        diff,
        extra,
    })
}

/// Applies a patch container to `old`, returning the new file.
///
/// Every control tuple is bounds-checked against `old`, the streams and the
/// declared new size, and all streams must be consumed exactly.
pub fn apply_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let streams = parse_header(patch)?;
    let mut new = Vec::with_capacity(streams.new_size);

    let mut oldpos: usize = 0;
    let mut diff_pos: usize = 0;
    let mut extra_pos: usize = 0;

    for tuple in streams.control.chunks_exact(CONTROL_SIZE) {
        let add_len = read_int(tuple, 0);
        let copy_len = read_int(tuple, 8);
        let seek = read_int(tuple, 16);

        if add_len < 0 || copy_len < 0 {
            return Err(corrupt(format!(
                "negative length in control tuple: add={}, copy={}",
                add_len, copy_len
            )));
        }
        let add_len = add_len as usize;
        let copy_len = copy_len as usize;

        if new
            .len()
            .checked_add(add_len)
            .and_then(|n| n.checked_add(copy_len))
            .map_or(true, |total| total > streams.new_size)
        {
            return Err(corrupt("control tuple would exceed new size"));
        }

        let diff = diff_pos
            .checked_add(add_len)
            .and_then(|end| streams.diff.get(diff_pos..end))
            .ok_or_else(|| corrupt("diff data exhausted"))?;
        let base = oldpos
            .checked_add(add_len)
            .and_then(|end| old.get(oldpos..end))
            .ok_or_else(|| corrupt(format!("add reads past old file at {}", oldpos)))?;
        new.extend(diff.iter().zip(base).map(|(d, o)| d.wrapping_add(*o)));
        oldpos += add_len;
        diff_pos += add_len;

        let extra = extra_pos
            .checked_add(copy_len)
            .and_then(|end| streams.extra.get(extra_pos..end))
            .ok_or_else(|| corrupt("extra data exhausted"))?;
        new.extend_from_slice(extra);
        extra_pos += copy_len;

        let moved = (oldpos as i64)
            .checked_add(seek)
            .filter(|&p| p >= 0)
            .ok_or_else(|| corrupt(format!("seek out of range: oldpos={}, seek={}", oldpos, seek)))?;
        oldpos = moved as usize;
    }

    if new.len() != streams.new_size {
        return Err(corrupt(format!(
            "final size mismatch: expected {}, got {}",
            streams.new_size,
            new.len()
        )));
    }
    if diff_pos != streams.diff.len() || extra_pos != streams.extra.len() {
        return Err(corrupt("patch streams not fully consumed"));
    }

    Ok(new)
}

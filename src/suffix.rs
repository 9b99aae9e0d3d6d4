#![allow(non_snake_case)]
/*-
 * Copyright 2003-2005 Colin Percival
 * Copyright 2012 Matthew Endsley
 * Modified 2017 Pieter-Jan Briers
 * Modified 2025 - Performance optimizations
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

//! Larsson-Sadakane suffix sorting and longest-match search.

use std::cmp::Ordering;

/// Longest-match queries against an indexed old buffer.
pub trait MatchIndex {
    /// Finds the longest prefix of `new` occurring in the old buffer.
    ///
    /// Returns `(pos, len)` where `old[pos..pos + len] == new[..len]`. When
    /// nothing matches `len` is 0 and `pos` is unspecified but `<= old.len()`.
    fn search(&self, new: &[u8]) -> (usize, usize);
}

/// Scratch space for suffix sorting, reused across successive sorts.
///
/// A workspace belongs to one sort at a time; it is not `Sync`-shared
/// between concurrent diffs.
#[derive(Debug, Default)]
pub struct SuffixWorkspace {
    I: Vec<isize>,
    V: Vec<isize>,
}

impl SuffixWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts the suffixes of `old`, returning an index that borrows both
    /// the buffer and this workspace.
    pub fn sort<'a>(&'a mut self, old: &'a [u8]) -> SuffixArray<'a> {
        let n = old.len() + 1;
        self.I.clear();
        self.I.resize(n, 0);
        self.V.clear();
        self.V.resize(n, 0);

        qsufsort(&mut self.I, &mut self.V, old);

        SuffixArray { old, I: &self.I }
    }

    /// Bytes of scratch currently held.
    pub fn capacity_bytes(&self) -> usize {
        (self.I.capacity() + self.V.capacity()) * std::mem::size_of::<isize>()
    }
}

/// A sorted suffix index over one buffer.
///
/// Entry 0 is the empty suffix, which sorts first.
#[derive(Debug, Clone, Copy)]
pub struct SuffixArray<'a> {
    old: &'a [u8],
    I: &'a [isize],
}

impl<'a> SuffixArray<'a> {
    /// Suffix start offsets, in lexicographic order of the suffixes.
    pub fn offsets(&self) -> &'a [isize] {
        self.I
    }

    pub fn old(&self) -> &'a [u8] {
        self.old
    }
}

impl MatchIndex for SuffixArray<'_> {
    #[inline]
    fn search(&self, new: &[u8]) -> (usize, usize) {
        let (pos, len) = search(self.I, self.old, new);
        (usz(pos), len)
    }
}

/// Owned variant used when an index has to outlive its workspace, e.g.
/// one per partition.
#[derive(Debug, Clone, Default)]
pub(crate) struct OwnedSuffixArray {
    I: Vec<isize>,
}

impl OwnedSuffixArray {
    pub(crate) fn build(old: &[u8]) -> Self {
        let mut I = vec![0; old.len() + 1];
        let mut V = vec![0; old.len() + 1];
        qsufsort(&mut I, &mut V, old);
        Self { I }
    }

    pub(crate) fn view<'a>(&'a self, old: &'a [u8]) -> SuffixArray<'a> {
        debug_assert_eq!(self.I.len(), old.len() + 1);
        SuffixArray { old, I: &self.I }
    }
}

#[inline(always)]
fn usz(i: isize) -> usize {
    debug_assert!(i >= 0);
    i as usize
}

struct SplitParams {
    start: usize,
    len: usize,
}

#[inline]
fn split_internal(
    I: &mut [isize],
    V: &mut [isize],
    start: usize,
    len: usize,
    h: usize,
) -> Option<SplitParams> {
    let h = h as isize;
    if len < 16 {
        // short runs: selection-style grouping
        let mut k = start;
        while k < start + len {
            let mut j = 1;
            let mut x = V[usz(I[k] + h)];
            let mut i = 1;
            while k + i < start + len {
                let v = V[usz(I[k + i] + h)];
                if v < x {
                    x = v;
                    j = 0;
                }
                if v == x {
                    I.swap(k + j, k + i);
                    j += 1;
                }
                i += 1;
            }
            let group = (k + j) as isize - 1;
            for &Ii in &I[k..k + j] {
                V[usz(Ii)] = group;
            }
            if j == 1 {
                I[k] = -1;
            }
            k += j;
        }
        None
    } else {
        let x = V[usz(I[start + len / 2] + h)];

        let mut jj = 0;
        let mut kk = 0;
        for &Ii in &I[start..start + len] {
            let v = V[usz(Ii + h)];
            if v < x {
                jj += 1;
            }
            if v == x {
                kk += 1;
            }
        }
        let jj = jj + start;
        let kk = kk + jj;

        // three-way partition around x
        let mut j = 0;
        let mut k = 0;
        let mut i = start;
        while i < jj {
            match V[usz(I[i] + h)].cmp(&x) {
                Ordering::Less => i += 1,
                Ordering::Equal => {
                    I.swap(i, jj + j);
                    j += 1;
                }
                Ordering::Greater => {
                    I.swap(i, kk + k);
                    k += 1;
                }
            }
        }

        while jj + j < kk {
            if V[usz(I[jj + j] + h)] == x {
                j += 1;
            } else {
                I.swap(jj + j, kk + k);
                k += 1;
            }
        }

        if jj > start {
            split(I, V, start, jj - start, h as usize);
        }

        let group = (kk - 1) as isize;
        for &Ii in &I[jj..kk] {
            V[usz(Ii)] = group;
        }
        if jj == kk - 1 {
            I[jj] = -1;
        }

        // right side is handled by the caller's loop instead of recursing
        if start + len > kk {
            Some(SplitParams {
                start: kk,
                len: start + len - kk,
            })
        } else {
            None
        }
    }
}

fn split(I: &mut [isize], V: &mut [isize], start: usize, len: usize, h: usize) {
    let mut ret = Some(SplitParams { start, len });
    while let Some(params) = ret {
        ret = split_internal(I, V, params.start, params.len, h);
    }
}

/// Fills `I` with the suffix array of `old` (including the empty suffix).
/// `I` and `V` must both have length `old.len() + 1`.
fn qsufsort(I: &mut [isize], V: &mut [isize], old: &[u8]) {
    let n = old.len();
    let mut buckets: [isize; 256] = [0; 256];

    for &o in old {
        buckets[o as usize] += 1;
    }
    for i in 1..256 {
        buckets[i] += buckets[i - 1];
    }
    for i in (1..256).rev() {
        buckets[i] = buckets[i - 1];
    }
    buckets[0] = 0;

    for (i, &o) in old.iter().enumerate() {
        buckets[o as usize] += 1;
        I[usz(buckets[o as usize])] = i as isize;
    }
    I[0] = n as isize;

    for (i, &o) in old.iter().enumerate() {
        V[i] = buckets[o as usize];
    }
    V[n] = 0;

    for i in 1..256 {
        if buckets[i] == buckets[i - 1] + 1 {
            I[usz(buckets[i])] = -1;
        }
    }
    I[0] = -1;

    // prefix doubling until every group is a singleton
    let mut h = 1;
    while I[0] != -(n as isize + 1) {
        let mut len = 0;
        let mut i = 0;
        while i < n as isize + 1 {
            if I[usz(i)] < 0 {
                len -= I[usz(i)];
                i -= I[usz(i)];
            } else {
                if len != 0 {
                    I[usz(i - len)] = -len;
                }
                len = V[usz(I[usz(i)])] + 1 - i;
                split(I, V, usz(i), usz(len), h);
                i += len;
                len = 0;
            }
        }
        if len != 0 {
            I[usz(i - len)] = -len;
        }
        h += h;
    }

    for (i, &v) in V[0..=n].iter().enumerate() {
        I[usz(v)] = i as isize;
    }
}

/// Length of the common prefix of two slices.
#[inline]
pub(crate) fn matchlen(old: &[u8], new: &[u8]) -> usize {
    old.iter().zip(new).take_while(|(a, b)| a == b).count()
}

/// Binary search over the sorted suffixes for the longest match with `new`.
fn search(I: &[isize], old: &[u8], new: &[u8]) -> (isize, usize) {
    if I.len() < 3 {
        let x = matchlen(&old[usz(I[0])..], new);
        let y = matchlen(&old[usz(I[I.len() - 1])..], new);
        if x > y {
            (I[0], x)
        } else {
            (I[I.len() - 1], y)
        }
    } else {
        let mid = (I.len() - 1) / 2;
        let left = &old[usz(I[mid])..];

        // a suffix that is a proper prefix of `new` sorts before it
        if left < new {
            search(&I[mid..], old, new)
        } else {
            search(&I[..=mid], old, new)
        }
    }
}

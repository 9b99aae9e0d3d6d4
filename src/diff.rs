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

use std::io::Read;
use std::time::Instant;

use tracing::{debug, trace};

use crate::control::{Control, ControlSink, DiffStats, ProgressSink};
use crate::error::{Error, Input, Result};
use crate::partition::{resolve_workers, PartitionedSuffixArray};
use crate::suffix::{MatchIndex, SuffixWorkspace};

/// Largest input, old or new, that can be diffed: 2 GiB - 1.
pub const MAX_FILE_SIZE: usize = i32::MAX as usize;

/// How much longer than the current anchor's running score a new match must
/// be before the scanner commits to it. Keeps the scanner from flapping
/// between near-equal candidates.
pub const COMMIT_MARGIN: isize = 8;

/// Bytes of new input consumed between two progress reports.
pub const PROGRESS_INTERVAL: usize = 64 * 1024 * 1024;

/// Diff an "old" and a "new" buffer with default settings, sending every
/// record of the delta to `sink`.
pub fn diff<S>(old: &[u8], new: &[u8], sink: &mut S) -> Result<()>
where
    S: ControlSink + ?Sized,
{
    DiffContext::new().diff(old, new, sink, &mut ())
}

/// Settings for diffing plus scratch storage reused between runs.
///
/// Reusing a context avoids reallocating the suffix sort workspace and the
/// input buffers. One context runs one diff at a time; `&mut self` on every
/// entry point enforces it.
#[derive(Debug)]
pub struct DiffContext {
    /// Workers for partitioned suffix sorting. `0` sorts on the calling
    /// thread, a negative value means "available parallelism minus n".
    pub suffix_sort_concurrency: isize,

    /// Number of independently sorted partitions of the old buffer. `0`
    /// sorts the whole buffer as one.
    pub partitions: usize,

    /// Size ceiling for both inputs. Values above [`MAX_FILE_SIZE`] are capped.
    pub max_file_size: usize,

    /// Reports scratch buffer footprints through [`ProgressSink::debug`].
    pub measure_mem: bool,

    /// Accumulates timings when set.
    pub stats: Option<DiffStats>,

    workspace: SuffixWorkspace,
    db: Vec<u8>,
    obuf: Vec<u8>,
    nbuf: Vec<u8>,
}

impl Default for DiffContext {
    fn default() -> Self {
        Self {
            suffix_sort_concurrency: 0,
            partitions: 0,
            max_file_size: MAX_FILE_SIZE,
            measure_mem: false,
            stats: None,
            workspace: SuffixWorkspace::new(),
            db: Vec::new(),
            obuf: Vec::new(),
            nbuf: Vec::new(),
        }
    }
}

impl DiffContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective size ceiling.
    pub fn size_limit(&self) -> usize {
        self.max_file_size.min(MAX_FILE_SIZE)
    }

    fn check_size(&self, which: Input, len: usize) -> Result<()> {
        let max = self.size_limit();
        if len > max {
            return Err(Error::InputTooLarge {
                which,
                len: len as u64,
                max: max as u64,
            });
        }
        Ok(())
    }

    /// Buffers both readers into the context, then diffs them.
    ///
    /// Reading stops one byte past the size ceiling, so an oversized input is
    /// rejected without being read in full.
    pub fn diff_readers<O, N, S, P>(
        &mut self,
        old: O,
        new: N,
        sink: &mut S,
        progress: &mut P,
    ) -> Result<()>
    where
        O: Read,
        N: Read,
        S: ControlSink + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let limit = self.size_limit();
        let mut obuf = std::mem::take(&mut self.obuf);
        let mut nbuf = std::mem::take(&mut self.nbuf);

        let result = read_bounded(old, &mut obuf, limit, Input::Old)
            .and_then(|()| read_bounded(new, &mut nbuf, limit, Input::New))
            .and_then(|()| self.diff(&obuf, &nbuf, sink, progress));

        self.obuf = obuf;
        self.nbuf = nbuf;
        result
    }

    /// Computes the delta from `old` to `new`.
    ///
    /// Each record goes to `sink` as soon as it is resolved, and a terminal
    /// [`Control::EOF`] closes the stream. If the sink fails, scanning stops
    /// and the error is returned; records already delivered are not usable.
    pub fn diff<S, P>(&mut self, old: &[u8], new: &[u8], sink: &mut S, progress: &mut P) -> Result<()>
    where
        S: ControlSink + ?Sized,
        P: ProgressSink + ?Sized,
    {
        self.check_size(Input::Old, old.len())?;
        self.check_size(Input::New, new.len())?;

        if self.measure_mem {
            progress.debug(&format!(
                "buffers at start of diff: old {} B, new {} B",
                old.len(),
                new.len()
            ));
        }

        let start = Instant::now();
        if self.partitions > 0 {
            let workers = resolve_workers(self.suffix_sort_concurrency);
            let psa = PartitionedSuffixArray::build(old, self.partitions, workers)?;
            self.after_sort(start, progress);
            scan(&psa, old, new, &mut self.db, &mut self.stats, sink, progress)
        } else {
            let sa = self.workspace.sort(old);
            let sorted = start.elapsed();
            debug!(old_len = old.len(), elapsed = ?sorted, "suffix sort done");
            if let Some(stats) = self.stats.as_mut() {
                stats.time_spent_sorting += sorted;
            }
            if self.measure_mem {
                progress.debug(&format!(
                    "suffix array: {} B of scratch",
                    (old.len() + 1) * 2 * std::mem::size_of::<isize>()
                ));
            }
            scan(&sa, old, new, &mut self.db, &mut self.stats, sink, progress)
        }
    }

    fn after_sort<P: ProgressSink + ?Sized>(&mut self, start: Instant, progress: &mut P) {
        let sorted = start.elapsed();
        debug!(partitions = self.partitions, elapsed = ?sorted, "partitioned suffix sort done");
        if let Some(stats) = self.stats.as_mut() {
            stats.time_spent_sorting += sorted;
        }
        if self.measure_mem {
            progress.debug(&format!(
                "partitioned suffix arrays for {} partitions",
                self.partitions
            ));
        }
    }
}

fn read_bounded<R: Read>(reader: R, buf: &mut Vec<u8>, limit: usize, which: Input) -> Result<()> {
    buf.clear();
    reader.take(limit as u64 + 1).read_to_end(buf)?;
    if buf.len() > limit {
        return Err(Error::InputTooLarge {
            which,
            len: buf.len() as u64,
            max: limit as u64,
        });
    }
    Ok(())
}

/// Whether `new[i]` agrees with the old byte at the same offset from the
/// current anchor.
#[inline]
fn agrees(old: &[u8], new: &[u8], i: usize, offset: isize) -> bool {
    let o = i as isize + offset;
    o >= 0 && (o as usize) < old.len() && old[o as usize] == new[i]
}

/// Length of the forward extension of an anchor, maximizing
/// `2 * matches - length`. `old` and `new` both start at the anchor.
fn extend_forward(old: &[u8], new: &[u8]) -> usize {
    let (mut s, mut sf, mut lenf) = (0isize, 0isize, 0usize);
    for (i, (o, n)) in old.iter().zip(new).enumerate() {
        if o == n {
            s += 1;
        }
        let i = i + 1;
        if s * 2 - i as isize > sf * 2 - lenf as isize {
            sf = s;
            lenf = i;
        }
    }
    lenf
}

/// Length of the backward extension of a match, scoring like
/// [`extend_forward`]. `old` and `new` both end at the match start.
fn extend_backward(old: &[u8], new: &[u8]) -> usize {
    let (mut s, mut sb, mut lenb) = (0isize, 0isize, 0usize);
    for (i, (o, n)) in old.iter().rev().zip(new.iter().rev()).enumerate() {
        if o == n {
            s += 1;
        }
        let i = i + 1;
        if s * 2 - i as isize > sb * 2 - lenb as isize {
            sb = s;
            lenb = i;
        }
    }
    lenb
}

/// Picks how many bytes of an overlap stay with the forward extension.
///
/// The four slices cover the same overlap: as seen by the previous anchor
/// (`fwd_*`) and by the new match (`back_*`).
fn split_overlap(fwd_new: &[u8], fwd_old: &[u8], back_new: &[u8], back_old: &[u8]) -> usize {
    let (mut s, mut ss, mut lens) = (0isize, 0isize, 0usize);
    for i in 0..fwd_new.len() {
        if fwd_new[i] == fwd_old[i] {
            s += 1;
        }
        if back_new[i] == back_old[i] {
            s -= 1;
        }
        if s > ss {
            ss = s;
            lens = i + 1;
        }
    }
    lens
}

fn scan<M, S, P>(
    index: &M,
    old: &[u8],
    new: &[u8],
    db: &mut Vec<u8>,
    stats: &mut Option<DiffStats>,
    sink: &mut S,
    progress: &mut P,
) -> Result<()>
where
    M: MatchIndex + ?Sized,
    S: ControlSink + ?Sized,
    P: ProgressSink + ?Sized,
{
    let start = Instant::now();
    let newlen = new.len();

    progress.label(&format!("Scanning {} bytes...", newlen));

    let mut scan = 0;
    let mut len = 0usize;
    let mut pos = 0usize;
    let mut lastscan = 0;
    let mut lastpos = 0;
    let mut lastoffset = 0isize;
    let mut last_progress = 0;
    let mut records = 0u64;

    while scan < newlen {
        let mut oldscore = 0isize;
        scan += len;

        if scan - last_progress > PROGRESS_INTERVAL {
            last_progress = scan;
            progress.progress(scan as f64 / newlen as f64);
        }

        // Find the next match worth committing to
        let mut scsc = scan;
        while scan < newlen {
            (pos, len) = index.search(&new[scan..]);

            while scsc < scan + len {
                if agrees(old, new, scsc, lastoffset) {
                    oldscore += 1;
                }
                scsc += 1;
            }

            if (len as isize == oldscore && len != 0) || len as isize > oldscore + COMMIT_MARGIN {
                break;
            }

            if agrees(old, new, scan, lastoffset) {
                oldscore -= 1;
            }
            scan += 1;
        }

        if len as isize == oldscore && scan != newlen {
            continue;
        }

        let mut lenf = extend_forward(&old[lastpos..], &new[lastscan..scan]);
        let mut lenb = if scan < newlen {
            extend_backward(&old[..pos], &new[lastscan..scan])
        } else {
            0
        };

        if lastscan + lenf > scan - lenb {
            let overlap = lastscan + lenf - (scan - lenb);
            let lens = split_overlap(
                &new[lastscan + lenf - overlap..lastscan + lenf],
                &old[lastpos + lenf - overlap..lastpos + lenf],
                &new[scan - lenb..scan - lenb + overlap],
                &old[pos - lenb..pos - lenb + overlap],
            );
            lenf = lenf + lens - overlap;
            lenb -= lens;
        }

        db.clear();
        db.extend(
            new[lastscan..lastscan + lenf]
                .iter()
                .zip(&old[lastpos..lastpos + lenf])
                .map(|(n, o)| n.wrapping_sub(*o)),
        );

        let control = Control {
            add: &db[..],
            copy: &new[lastscan + lenf..scan - lenb],
            seek: (pos - lenb) as i64 - (lastpos + lenf) as i64,
            eof: false,
        };
        trace!(
            add = control.add.len(),
            copy = control.copy.len(),
            seek = control.seek,
            "control"
        );
        sink.write_control(&control)?;
        records += 1;

        if let Some(stats) = stats.as_mut() {
            stats.biggest_add = stats.biggest_add.max(lenf as u64);
        }

        lastscan = scan - lenb;
        lastpos = pos - lenb;
        lastoffset = pos as isize - scan as isize;
    }

    sink.write_control(&Control::EOF)?;
    progress.progress(1.0);

    let scanned = start.elapsed();
    debug!(new_len = newlen, records, elapsed = ?scanned, "scan done");
    if let Some(stats) = stats.as_mut() {
        stats.time_spent_scanning += scanned;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::OwnedControl;
    use proptest::prelude::*;
    use std::io;

    fn replay(old: &[u8], controls: &[OwnedControl]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut oldpos = 0i64;
        for c in controls {
            if c.eof {
                break;
            }
            for (i, &a) in c.add.iter().enumerate() {
                out.push(a.wrapping_add(old[oldpos as usize + i]));
            }
            oldpos += c.add.len() as i64;
            out.extend_from_slice(&c.copy);
            oldpos += c.seek;
        }
        out
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn run(ctx: &mut DiffContext, old: &[u8], new: &[u8]) -> Vec<OwnedControl> {
        let mut controls: Vec<OwnedControl> = Vec::new();
        ctx.diff(old, new, &mut controls, &mut ()).unwrap();
        controls
    }

    fn assert_well_formed(old: &[u8], new: &[u8], controls: &[OwnedControl]) {
        let (last, body) = controls.split_last().expect("stream is never empty");
        assert!(last.eof);
        assert!(last.add.is_empty() && last.copy.is_empty());
        assert!(body.iter().all(|c| !c.eof));

        let produced: usize = body.iter().map(|c| c.add.len() + c.copy.len()).sum();
        assert_eq!(produced, new.len());

        let mut oldpos = 0i64;
        for c in body {
            if !c.add.is_empty() {
                assert!(oldpos >= 0);
                assert!(oldpos as usize + c.add.len() <= old.len());
            }
            oldpos += c.add.len() as i64 + c.seek;
        }

        assert_eq!(replay(old, controls), new);
    }

    #[test]
    fn single_substitution() {
        let old = b"abcdefgh";
        let new = b"abcXefgh";
        let controls = run(&mut DiffContext::new(), old, new);
        assert_well_formed(old, new, &controls);

        assert_eq!(controls.len(), 2);
        let c = &controls[0];
        assert_eq!(&c.add[..3], &[0, 0, 0]);
        assert_eq!(c.add[3], b'X'.wrapping_sub(b'd'));
        assert_eq!(&c.add[4..], &[0, 0, 0, 0]);
        assert!(c.copy.is_empty());
        assert_eq!(c.seek, -4);
    }

    #[test]
    fn empty_old() {
        let controls = run(&mut DiffContext::new(), b"", b"hello");
        assert_eq!(
            controls,
            vec![
                OwnedControl {
                    add: vec![],
                    copy: b"hello".to_vec(),
                    seek: 0,
                    eof: false,
                },
                Control::EOF.to_owned_control(),
            ]
        );
    }

    #[test]
    fn empty_new() {
        let controls = run(&mut DiffContext::new(), b"hello", b"");
        assert_eq!(controls, vec![Control::EOF.to_owned_control()]);
    }

    #[test]
    fn identical_inputs() {
        let data = b"the same bytes on both sides";
        let controls = run(&mut DiffContext::new(), data, data);
        assert_well_formed(data, data, &controls);
        assert_eq!(controls.len(), 2);
        assert!(controls[0].add.iter().all(|&b| b == 0));
        assert!(controls[0].copy.is_empty());
    }

    #[test]
    fn disjoint_inputs() {
        let old = b"aaaaaaaaaaaaaaaa";
        let new = b"zyxwvutsrqponmlk";
        let controls = run(&mut DiffContext::new(), old, new);
        assert_well_formed(old, new, &controls);
    }

    #[test]
    fn moved_blocks() {
        let a: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 253) as u8).collect();
        let b: Vec<u8> = (0..1500u32).map(|i| (i * 13 % 241) as u8).collect();
        let old = [&a[..], &b[..]].concat();
        let new = [&b[..], b"inserted", &a[..1000]].concat();

        let controls = run(&mut DiffContext::new(), &old, &new);
        assert_well_formed(&old, &new, &controls);
        let literal: usize = controls.iter().map(|c| c.copy.len()).sum();
        assert!(literal < 100, "literal bytes: {literal}");
    }

    #[test]
    fn partitioned_mode_round_trips() {
        init_tracing();
        let old: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut new = old.clone();
        new[100] ^= 0xff;
        new.splice(2000..2010, b"hello world".iter().copied());
        new.extend_from_slice(&old[..300]);

        for (partitions, concurrency) in [(1, 0), (3, 0), (4, 2), (7, -1)] {
            let mut ctx = DiffContext {
                partitions,
                suffix_sort_concurrency: concurrency,
                ..DiffContext::default()
            };
            let controls = run(&mut ctx, &old, &new);
            assert_well_formed(&old, &new, &controls);
        }
    }

    #[test]
    fn context_is_reusable() {
        let mut ctx = DiffContext::new();
        let first = run(&mut ctx, b"first old buffer", b"first new buffer");
        let second = run(&mut ctx, b"second", b"second!");
        assert_well_formed(b"first old buffer", b"first new buffer", &first);
        assert_well_formed(b"second", b"second!", &second);
        assert_eq!(first, run(&mut DiffContext::new(), b"first old buffer", b"first new buffer"));
    }

    #[test]
    fn oversized_inputs_are_rejected_before_work() {
        let mut ctx = DiffContext {
            max_file_size: 4,
            ..DiffContext::default()
        };
        let mut calls = 0;
        let mut sink = |_: &Control<'_>| -> io::Result<()> {
            calls += 1;
            Ok(())
        };

        let err = ctx.diff(b"12345", b"1", &mut sink, &mut ()).unwrap_err();
        assert!(matches!(
            err,
            Error::InputTooLarge {
                which: Input::Old,
                len: 5,
                max: 4
            }
        ));

        let err = ctx
            .diff_readers(&b"1234"[..], &b"123456789"[..], &mut sink, &mut ())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InputTooLarge {
                which: Input::New,
                len: 5,
                max: 4
            }
        ));
        assert_eq!(calls, 0);
    }

    #[test]
    fn readers_match_slices() {
        let old = b"a reader full of old content".to_vec();
        let new = b"a reader full of new content!".to_vec();
        let mut from_readers: Vec<OwnedControl> = Vec::new();
        DiffContext::new()
            .diff_readers(&old[..], &new[..], &mut from_readers, &mut ())
            .unwrap();
        assert_eq!(from_readers, run(&mut DiffContext::new(), &old, &new));
    }

    #[test]
    fn sink_errors_abort_the_scan() {
        let old = b"0123456789abcdef0123456789";
        let new = b"0123X56789abcdefYY0123456789Z";
        let mut seen = 0;
        let mut sink = |_: &Control<'_>| -> io::Result<()> {
            seen += 1;
            Err(io::Error::new(io::ErrorKind::WriteZero, "full"))
        };
        let err = diff(old, new, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::WriteZero));
        assert_eq!(seen, 1);
    }

    #[test]
    fn stats_accumulate() {
        let mut ctx = DiffContext {
            stats: Some(DiffStats::default()),
            ..DiffContext::default()
        };
        run(&mut ctx, b"abcdefgh", b"abcXefgh");
        run(&mut ctx, b"0123456789", b"0123456789");
        assert_eq!(ctx.stats.unwrap().biggest_add, 10);
    }

    #[derive(Default)]
    struct Recorder {
        labels: Vec<String>,
        fractions: Vec<f64>,
        debug: Vec<String>,
    }

    impl ProgressSink for Recorder {
        fn label(&mut self, label: &str) {
            self.labels.push(label.to_owned());
        }
        fn progress(&mut self, fraction: f64) {
            self.fractions.push(fraction);
        }
        fn debug(&mut self, message: &str) {
            self.debug.push(message.to_owned());
        }
    }

    #[test]
    fn progress_is_observational() {
        let mut recorder = Recorder::default();
        let mut ctx = DiffContext {
            measure_mem: true,
            ..DiffContext::default()
        };
        let mut controls: Vec<OwnedControl> = Vec::new();
        ctx.diff(b"old", b"new", &mut controls, &mut recorder).unwrap();

        assert_eq!(recorder.labels, vec!["Scanning 3 bytes...".to_owned()]);
        assert_eq!(recorder.fractions.last(), Some(&1.0));
        assert!(recorder.fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!(!recorder.debug.is_empty());
        assert_eq!(controls, run(&mut DiffContext::new(), b"old", b"new"));
    }

    #[test]
    fn resolver_pieces() {
        assert_eq!(extend_forward(b"abcdef", b"abcxyz"), 3);
        assert_eq!(extend_forward(b"abXdefgh", b"abcdefgh"), 8);
        assert_eq!(extend_forward(b"", b"abc"), 0);
        assert_eq!(extend_backward(b"xyzabc", b"123abc"), 3);
        assert_eq!(extend_backward(b"abc", b""), 0);
        // previous anchor agrees on the first two overlap bytes only
        assert_eq!(split_overlap(b"aabb", b"aaxx", b"aabb", b"xxbb"), 2);
    }

    fn mutate(old: &[u8], edits: &[(usize, u8, u8)]) -> Vec<u8> {
        let mut new = old.to_vec();
        for &(at, op, byte) in edits {
            if new.is_empty() {
                new.push(byte);
                continue;
            }
            let at = at % new.len();
            match op % 3 {
                0 => new[at] = byte,
                1 => new.insert(at, byte),
                _ => {
                    new.remove(at);
                }
            }
        }
        new
    }

    proptest! {
        #[test]
        fn arbitrary_pairs_round_trip(
            old in proptest::collection::vec(any::<u8>(), 0..256),
            new in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let controls = run(&mut DiffContext::new(), &old, &new);
            assert_well_formed(&old, &new, &controls);
        }

        #[test]
        fn edited_copies_round_trip(
            old in proptest::collection::vec(0u8..4, 0..512),
            edits in proptest::collection::vec((any::<usize>(), any::<u8>(), any::<u8>()), 0..24),
            partitions in 0usize..5,
        ) {
            let new = mutate(&old, &edits);
            let mut ctx = DiffContext { partitions, ..DiffContext::default() };
            let controls = run(&mut ctx, &old, &new);
            assert_well_formed(&old, &new, &controls);
        }
    }
}

use std::io;
use std::time::Duration;

/// One record of the delta stream.
///
/// Replaying a record against the old buffer at the current read cursor:
/// add each byte of `add` to the old byte under the cursor (advancing it),
/// append `copy` verbatim, then move the cursor by `seek`.
///
/// The spans borrow from the diff's scratch space and from the new buffer,
/// so they are only valid for the duration of the sink call. A sink that
/// needs them afterwards must copy them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control<'a> {
    pub add: &'a [u8],
    pub copy: &'a [u8],
    pub seek: i64,
    /// Set on the terminal record only, which carries no data.
    pub eof: bool,
}

impl<'a> Control<'a> {
    /// The terminal record closing every successful stream.
    pub const EOF: Control<'static> = Control {
        add: &[],
        copy: &[],
        seek: 0,
        eof: true,
    };

    /// Number of new-file bytes this record produces.
    #[inline]
    pub fn output_len(&self) -> usize {
        self.add.len() + self.copy.len()
    }

    /// Copies the spans out of the borrowed scratch space.
    pub fn to_owned_control(&self) -> OwnedControl {
        OwnedControl {
            add: self.add.to_vec(),
            copy: self.copy.to_vec(),
            seek: self.seek,
            eof: self.eof,
        }
    }
}

/// A [`Control`] whose spans have been copied out of the diff's buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedControl {
    pub add: Vec<u8>,
    pub copy: Vec<u8>,
    pub seek: i64,
    pub eof: bool,
}

impl OwnedControl {
    pub fn as_control(&self) -> Control<'_> {
        Control {
            add: &self.add,
            copy: &self.copy,
            seek: self.seek,
            eof: self.eof,
        }
    }
}

/// Receives delta records as they are produced.
///
/// Any closure `FnMut(&Control<'_>) -> io::Result<()>` is a sink. Returning an
/// error stops the diff immediately.
pub trait ControlSink {
    fn write_control(&mut self, control: &Control<'_>) -> io::Result<()>;
}

impl<F> ControlSink for F
where
    F: FnMut(&Control<'_>) -> io::Result<()>,
{
    #[inline]
    fn write_control(&mut self, control: &Control<'_>) -> io::Result<()> {
        self(control)
    }
}

impl ControlSink for Vec<OwnedControl> {
    fn write_control(&mut self, control: &Control<'_>) -> io::Result<()> {
        self.push(control.to_owned_control());
        Ok(())
    }
}

/// Observational progress and diagnostics. Nothing here affects the output.
///
/// `()` ignores everything.
pub trait ProgressSink {
    /// Names the phase that subsequent progress values refer to.
    fn label(&mut self, _label: &str) {}

    /// Fraction of the current phase done, in `[0, 1]`.
    fn progress(&mut self, _fraction: f64) {}

    /// Free-form diagnostic text.
    fn debug(&mut self, _message: &str) {}
}

impl ProgressSink for () {}

/// Counters accumulated over every diff run on one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub time_spent_sorting: Duration,
    pub time_spent_scanning: Duration,
    /// Longest single `add` span emitted.
    pub biggest_add: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_record_is_empty() {
        assert!(Control::EOF.eof);
        assert_eq!(Control::EOF.output_len(), 0);
        assert_eq!(Control::EOF.seek, 0);
    }

    #[test]
    fn owned_copy_survives_buffer_reuse() {
        let mut scratch = vec![1u8, 2, 3];
        let mut records: Vec<OwnedControl> = Vec::new();
        records
            .write_control(&Control {
                add: &scratch,
                copy: b"xy",
                seek: -2,
                eof: false,
            })
            .unwrap();
        scratch.clear();
        scratch.push(9);

        assert_eq!(records[0].add, [1, 2, 3]);
        assert_eq!(records[0].as_control().output_len(), 5);
        assert_eq!(records[0].seek, -2);
    }

    #[test]
    fn closures_are_sinks() {
        let mut total = 0;
        let mut sink = |c: &Control<'_>| -> io::Result<()> {
            total += c.output_len();
            Ok(())
        };
        sink.write_control(&Control {
            add: b"ab",
            copy: b"c",
            seek: 0,
            eof: false,
        })
        .unwrap();
        assert_eq!(total, 3);
    }
}

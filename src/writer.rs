use std::io::{self, Write};

use bzip2::write::BzEncoder;
use bzip2::Compression as BzCompression;

use crate::control::{Control, ControlSink};
use crate::diff::DiffContext;
use crate::error::Result;

pub(crate) const BSDIFF_MAGIC: &[u8; 8] = b"BSDIFF40";
pub(crate) const BSDF2_MAGIC: &[u8; 5] = b"BSDF2";

/// Bytes per control tuple: add length, copy length, seek.
pub(crate) const CONTROL_SIZE: usize = 24;

/// Compression applied to one stream of a patch container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    None = 0,
    Bz2 = 1,
    Brotli = 2,
}

impl CompressionAlgorithm {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Bz2),
            2 => Some(Self::Brotli),
            _ => None,
        }
    }
}

fn compress(alg: CompressionAlgorithm, data: &[u8]) -> io::Result<Vec<u8>> {
    match alg {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Bz2 => {
            let mut encoder = BzEncoder::new(Vec::new(), BzCompression::best());
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionAlgorithm::Brotli => {
            let mut compressed = Vec::new();
            {
                let mut encoder = brotli::CompressorWriter::new(
                    &mut compressed,
                    4096, // buffer size
                    11,   // quality
                    20,   // lg_window_size
                );
                encoder.write_all(data)?;
                encoder.flush()?;
            } // dropping the encoder finishes the stream
            Ok(compressed)
        }
    }
}

/// Encodes a signed integer in bspatch sign-magnitude format.
#[inline]
pub(crate) fn encode_int64(x: i64, buf: &mut [u8]) {
    if x >= 0 {
        buf.copy_from_slice(&x.to_le_bytes());
    } else {
        let tmp = x.unsigned_abs() | (1u64 << 63);
        buf.copy_from_slice(&tmp.to_le_bytes());
    }
}

/// Collects a delta stream into a BSDF2 patch container.
///
/// Used as the sink of a diff: add spans go to the diff stream, copy spans
/// to the extra stream, and lengths plus seek to the control stream. Each
/// stream is compressed separately when the container is closed.
#[derive(Debug)]
pub struct PatchWriter {
    ctrl_data: Vec<u8>,
    diff_data: Vec<u8>,
    extra_data: Vec<u8>,
    ctrl_alg: CompressionAlgorithm,
    diff_alg: CompressionAlgorithm,
    extra_alg: CompressionAlgorithm,
    written_output: u64,
    finished: bool,
}

impl PatchWriter {
    pub fn new(
        ctrl_alg: CompressionAlgorithm,
        diff_alg: CompressionAlgorithm,
        extra_alg: CompressionAlgorithm,
    ) -> Self {
        Self {
            ctrl_data: Vec::new(),
            diff_data: Vec::new(),
            extra_data: Vec::new(),
            ctrl_alg,
            diff_alg,
            extra_alg,
            written_output: 0,
            finished: false,
        }
    }

    /// Writer for classic `BSDIFF40` patches: bz2 on every stream.
    pub fn new_legacy() -> Self {
        Self::new(
            CompressionAlgorithm::Bz2,
            CompressionAlgorithm::Bz2,
            CompressionAlgorithm::Bz2,
        )
    }

    /// Size of the file the patch reconstructs so far.
    pub fn new_size(&self) -> u64 {
        self.written_output
    }

    /// Whether the terminal record has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Compresses the streams and writes the container.
    ///
    /// Fails if the delta stream was never terminated, since the patch
    /// would silently truncate the new file.
    pub fn close<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        if !self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "delta stream was not terminated",
            ));
        }

        let ctrl_compressed = compress(self.ctrl_alg, &self.ctrl_data)?;
        let diff_compressed = compress(self.diff_alg, &self.diff_data)?;
        let extra_compressed = compress(self.extra_alg, &self.extra_data)?;

        self.write_header(
            writer,
            ctrl_compressed.len() as u64,
            diff_compressed.len() as u64,
        )?;

        writer.write_all(&ctrl_compressed)?;
        writer.write_all(&diff_compressed)?;
        writer.write_all(&extra_compressed)?;
        Ok(())
    }

    fn is_legacy(&self) -> bool {
        self.ctrl_alg == CompressionAlgorithm::Bz2
            && self.diff_alg == CompressionAlgorithm::Bz2
            && self.extra_alg == CompressionAlgorithm::Bz2
    }

    fn write_header<W: Write + ?Sized>(&self, writer: &mut W, ctrl_size: u64, diff_size: u64) -> io::Result<()> {
        let mut header = [0u8; 32];

        if self.is_legacy() {
            header[0..8].copy_from_slice(BSDIFF_MAGIC);
        } else {
            header[0..5].copy_from_slice(BSDF2_MAGIC);
            header[5] = self.ctrl_alg as u8;
            header[6] = self.diff_alg as u8;
            header[7] = self.extra_alg as u8;
        }

        encode_int64(ctrl_size as i64, &mut header[8..16]);
        encode_int64(diff_size as i64, &mut header[16..24]);
        encode_int64(self.written_output as i64, &mut header[24..32]);

        writer.write_all(&header)
    }
}

impl ControlSink for PatchWriter {
    fn write_control(&mut self, control: &Control<'_>) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record after end of delta stream",
            ));
        }
        if control.eof {
            self.finished = true;
            return Ok(());
        }

        let mut buf = [0u8; CONTROL_SIZE];
        encode_int64(control.add.len() as i64, &mut buf[0..8]);
        encode_int64(control.copy.len() as i64, &mut buf[8..16]);
        encode_int64(control.seek, &mut buf[16..24]);

        self.ctrl_data.extend_from_slice(&buf);
        self.diff_data.extend_from_slice(control.add);
        self.extra_data.extend_from_slice(control.copy);
        self.written_output += control.output_len() as u64;
        Ok(())
    }
}

/// Diffs `old` and `new` into a classic `BSDIFF40` patch.
pub fn diff_bsdiff40<W: Write + ?Sized>(old: &[u8], new: &[u8], writer: &mut W) -> Result<()> {
    diff_bsdf2(
        old,
        new,
        writer,
        CompressionAlgorithm::Bz2,
        CompressionAlgorithm::Bz2,
        CompressionAlgorithm::Bz2,
    )
}

/// Diffs `old` and `new` into a BSDF2 patch with per-stream compression.
pub fn diff_bsdf2<W: Write + ?Sized>(
    old: &[u8],
    new: &[u8],
    writer: &mut W,
    ctrl_alg: CompressionAlgorithm,
    diff_alg: CompressionAlgorithm,
    extra_alg: CompressionAlgorithm,
) -> Result<()> {
    let mut patch = PatchWriter::new(ctrl_alg, diff_alg, extra_alg);
    DiffContext::new().diff(old, new, &mut patch, &mut ())?;
    patch.close(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::SmallVec;

    #[test]
    fn test_encode_int64_positive() {
        let mut buf = [0u8; 8];
        encode_int64(42, &mut buf);
        assert_eq!(buf, [42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_int64_negative() {
        let mut buf = [0u8; 8];
        encode_int64(-42, &mut buf);
        assert_eq!(buf, [42, 0, 0, 0, 0, 0, 0, 0x80]);
    }

    #[test]
    fn test_encode_int64_min() {
        let mut buf = [0u8; 8];
        encode_int64(-i64::MAX, &mut buf);
        assert_eq!(buf, [0xff; 8]);
    }

    #[test]
    fn test_legacy_header() {
        let mut writer = PatchWriter::new_legacy();
        writer.write_control(&Control::EOF).unwrap();
        let mut out: SmallVec<[u8; 256]> = SmallVec::new();
        writer.close(&mut out).unwrap();
        assert_eq!(&out[..8], BSDIFF_MAGIC);
        assert_eq!(&out[24..32], &[0; 8]);
    }

    #[test]
    fn test_bsdf2_header_records_algorithms() {
        let mut writer = PatchWriter::new(
            CompressionAlgorithm::Brotli,
            CompressionAlgorithm::None,
            CompressionAlgorithm::Bz2,
        );
        writer
            .write_control(&Control {
                add: &[0, 0],
                copy: b"xyz",
                seek: -2,
                eof: false,
            })
            .unwrap();
        writer.write_control(&Control::EOF).unwrap();
        assert_eq!(writer.new_size(), 5);

        let mut out: SmallVec<[u8; 256]> = SmallVec::new();
        writer.close(&mut out).unwrap();
        assert_eq!(&out[..5], BSDF2_MAGIC);
        assert_eq!(&out[5..8], &[2, 0, 1]);
        assert_eq!(out[24], 5);
        // uncompressed diff stream: its length is the add length
        assert_eq!(out[16], 2);
    }

    #[test]
    fn test_unterminated_stream_cannot_close() {
        let writer = PatchWriter::new_legacy();
        let mut out = Vec::new();
        let err = writer.close(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(out.is_empty());
    }

    #[test]
    fn test_records_after_eof_are_rejected() {
        let mut writer = PatchWriter::new_legacy();
        writer.write_control(&Control::EOF).unwrap();
        assert!(writer.is_finished());
        assert!(writer.write_control(&Control::EOF).is_err());
    }
}

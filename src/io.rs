//! Byte adapters over the raw input and output streams.
//!
//! All integers in an HPROF stream are big-endian. Identifier reads and
//! writes are polymorphic on the id size declared in the file header (4 or
//! 8 bytes). `SegmentReader` bounds reads to the declared byte length of a
//! heap dump segment, which carries no per-subrecord framing of its own.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::errors::HprofRedactError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub(crate) fn premature_eof() -> HprofRedactError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of stream").into()
}

/// Opens an input path, transparently unwrapping gzip compression.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>, HprofRedactError> {
    let file = File::open(path)?;
    wrap_input(BufReader::new(file))
}

/// Sniffs the gzip magic bytes at the buffered head of the stream.
pub fn wrap_input<R: BufRead + 'static>(mut input: R) -> Result<Box<dyn Read>, HprofRedactError> {
    let head = input.fill_buf()?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(GzDecoder::new(input)))
    } else {
        Ok(Box::new(input))
    }
}

/// Opens an output path, gzip-encoding when the file name ends in ".gz".
pub fn open_output(path: &Path) -> Result<HprofSink, HprofRedactError> {
    let buffered = BufWriter::new(File::create(path)?);
    if is_gzip_path(path) {
        Ok(HprofSink::Gzip(GzEncoder::new(
            buffered,
            Compression::default(),
        )))
    } else {
        Ok(HprofSink::Plain(buffered))
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

pub enum HprofSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl HprofSink {
    /// Finalizes the sink; a gzip trailer is only valid once this ran.
    pub fn finish(self) -> Result<(), HprofRedactError> {
        match self {
            HprofSink::Plain(mut inner) => inner.flush()?,
            HprofSink::Gzip(inner) => inner.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for HprofSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            HprofSink::Plain(inner) => inner.write(buf),
            HprofSink::Gzip(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            HprofSink::Plain(inner) => inner.flush(),
            HprofSink::Gzip(inner) => inner.flush(),
        }
    }
}

pub struct HprofDataInput<R> {
    inner: R,
    id_size: u32,
}

impl<R: Read> HprofDataInput<R> {
    pub fn new(inner: R) -> Self {
        HprofDataInput { inner, id_size: 4 }
    }

    pub fn with_id_size(inner: R, id_size: u32) -> Self {
        HprofDataInput { inner, id_size }
    }

    pub fn set_id_size(&mut self, id_size: u32) {
        self.id_size = id_size;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Reads the next record tag, or `None` at a clean end of stream.
    pub fn read_tag(&mut self) -> Result<Option<u8>, HprofRedactError> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn read_u1(&mut self) -> Result<u8, HprofRedactError> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u2(&mut self) -> Result<u16, HprofRedactError> {
        Ok(self.inner.read_u16::<BE>()?)
    }

    pub fn read_u4(&mut self) -> Result<u32, HprofRedactError> {
        Ok(self.inner.read_u32::<BE>()?)
    }

    pub fn read_u8(&mut self) -> Result<u64, HprofRedactError> {
        Ok(self.inner.read_u64::<BE>()?)
    }

    pub fn read_id(&mut self) -> Result<u64, HprofRedactError> {
        match self.id_size {
            4 => Ok(u64::from(self.read_u4()?)),
            8 => self.read_u8(),
            id_size => Err(HprofRedactError::UnsupportedIdSize { id_size }),
        }
    }

    /// Discards `length` bytes, draining through reads when the source
    /// cannot seek. A short skip inside a declared length is fatal.
    pub fn skip_fully(&mut self, length: u64) -> Result<(), HprofRedactError> {
        if length == 0 {
            return Ok(());
        }
        let skipped = io::copy(&mut (&mut self.inner).take(length), &mut io::sink())?;
        if skipped != length {
            return Err(premature_eof());
        }
        Ok(())
    }
}

impl<R: Read> Read for HprofDataInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

pub struct HprofDataOutput<W> {
    inner: W,
    id_size: u32,
}

impl<W: Write> HprofDataOutput<W> {
    pub fn new(inner: W) -> Self {
        HprofDataOutput { inner, id_size: 4 }
    }

    pub fn set_id_size(&mut self, id_size: u32) {
        self.id_size = id_size;
    }

    pub fn write_u1(&mut self, value: u8) -> Result<(), HprofRedactError> {
        Ok(self.inner.write_u8(value)?)
    }

    pub fn write_u2(&mut self, value: u16) -> Result<(), HprofRedactError> {
        Ok(self.inner.write_u16::<BE>(value)?)
    }

    pub fn write_u4(&mut self, value: u32) -> Result<(), HprofRedactError> {
        Ok(self.inner.write_u32::<BE>(value)?)
    }

    pub fn write_u8(&mut self, value: u64) -> Result<(), HprofRedactError> {
        Ok(self.inner.write_u64::<BE>(value)?)
    }

    pub fn write_id(&mut self, value: u64) -> Result<(), HprofRedactError> {
        match self.id_size {
            4 => self.write_u4(value as u32),
            8 => self.write_u8(value),
            id_size => Err(HprofRedactError::UnsupportedIdSize { id_size }),
        }
    }

    pub fn write_bytes(&mut self, buffer: &[u8]) -> Result<(), HprofRedactError> {
        Ok(self.inner.write_all(buffer)?)
    }

    pub fn flush(&mut self) -> Result<(), HprofRedactError> {
        Ok(self.inner.flush()?)
    }
}

impl<W: Write> Write for HprofDataOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Bounds reads to the declared byte length of a heap dump segment.
///
/// The outstanding-byte counter is the sole framing authority: reads never
/// cross the boundary and the walker checks `remaining()` reaches exactly
/// zero at the end of the segment.
pub struct SegmentReader<'a, R> {
    inner: &'a mut R,
    remaining: u64,
}

impl<'a, R: Read> SegmentReader<'a, R> {
    pub fn new(inner: &'a mut R, limit: u64) -> Self {
        SegmentReader {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<'a, R: Read> Read for SegmentReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let cap = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let read = self.inner.read(&mut buf[..cap])?;
        self.remaining -= read as u64;
        Ok(read)
    }
}

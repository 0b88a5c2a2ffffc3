use crate::core::error::{Result, SpatialError};
use crate::core::fs::{delimiter_for, is_gzipped};
use flate2::read::MultiGzDecoder;
use grep_cli::stdout;
use gzp::{deflate::Gzip, Compression, ZBuilder, ZWriter};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use termcolor::ColorChoice;

const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Open a file, transparently decoding gzip/BGZF input.
pub fn open_raw_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read + Send>> {
    let gzipped = is_gzipped(&path);
    let reader = BufReader::with_capacity(READ_BUFFER_BYTES, File::open(path.as_ref())?);
    if gzipped {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER_BYTES,
            MultiGzDecoder::new(reader),
        )))
    } else {
        Ok(Box::new(reader))
    }
}

/// Build a CSV reader for a table path, choosing the delimiter from its extension.
pub fn get_reader<P: AsRef<Path>>(
    path: P,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn Read + Send>>> {
    let delimiter = delimiter_for(&path);
    let raw_reader = open_raw_reader(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(false)
        .from_reader(raw_reader))
}

/// Slot holding the first error raised beneath a compressor.
type FailureSlot = Arc<Mutex<Option<io::Error>>>;

/// Forwards to `inner` until a write fails, then records that error and
/// swallows every later byte.
///
/// gzp panics in `Drop` when finishing fails, so the compressor only ever sees
/// success and the recorded error is reported from [`TableSink::finish`].
struct FailureLatch<W> {
    inner: W,
    failure: FailureSlot,
}

impl<W: Write> FailureLatch<W> {
    fn record(&mut self, err: io::Error) {
        if let Ok(mut slot) = self.failure.lock() {
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }

    fn failed(&self) -> bool {
        self.failure.lock().map_or(true, |slot| slot.is_some())
    }
}

impl<W: Write> Write for FailureLatch<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.failed() {
            if let Err(err) = self.inner.write_all(buf) {
                self.record(err);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.failed() {
            if let Err(err) = self.inner.flush() {
                self.record(err);
            }
        }
        Ok(())
    }
}

/// Byte stream under a table writer. Must be closed with [`TableSink::finish`];
/// dropping it may leave a gzip stream without its trailer.
pub enum TableSink {
    Plain(Box<dyn Write + Send>),
    Gzip {
        encoder: Box<dyn ZWriter>,
        failure: FailureSlot,
    },
}

impl TableSink {
    /// Flush plain output, or write the gzip trailer, and report any error
    /// raised while writing.
    pub fn finish(self) -> Result<()> {
        match self {
            TableSink::Plain(mut writer) => writer.flush()?,
            TableSink::Gzip {
                mut encoder,
                failure,
            } => {
                encoder.finish().map_err(|e| {
                    SpatialError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("failed to finish gzip stream: {}", e),
                    ))
                })?;
                drop(encoder);
                let recorded = match failure.lock() {
                    Ok(mut slot) => slot.take(),
                    Err(_) => Some(io::Error::new(
                        io::ErrorKind::Other,
                        "gzip writer thread panicked",
                    )),
                };
                if let Some(err) = recorded {
                    return Err(SpatialError::Io(err));
                }
            }
        }
        Ok(())
    }
}

impl Write for TableSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TableSink::Plain(writer) => writer.write(buf),
            TableSink::Gzip { encoder, .. } => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TableSink::Plain(writer) => writer.flush(),
            TableSink::Gzip { encoder, .. } => encoder.flush(),
        }
    }
}

/// Wrap a sink in a gzip compressor when requested.
pub fn compress_writer(
    raw_writer: Box<dyn Write + Send>,
    gzipped: bool,
    threads: usize,
    compression_level: u32,
) -> TableSink {
    if gzipped {
        let failure = FailureSlot::default();
        let latched = FailureLatch {
            inner: raw_writer,
            failure: Arc::clone(&failure),
        };
        TableSink::Gzip {
            encoder: ZBuilder::<Gzip, _>::new()
                .num_threads(threads)
                .compression_level(Compression::new(compression_level))
                .from_writer(latched),
            failure,
        }
    } else {
        TableSink::Plain(raw_writer)
    }
}

/// Build a CSV writer over an already-open file.
///
/// Gzip output goes straight to the file since the compressor buffers whole
/// blocks itself and a `BufWriter` would be flushed only on drop.
pub fn writer_for_file(
    file: File,
    delimiter: u8,
    gzipped: bool,
    threads: usize,
    compression_level: u32,
) -> csv::Writer<TableSink> {
    let raw_writer: Box<dyn Write + Send> = if gzipped {
        Box::new(file)
    } else {
        Box::new(BufWriter::new(file))
    };
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(compress_writer(
            raw_writer,
            gzipped,
            threads,
            compression_level,
        ))
}

/// Line-buffered stdout when attached to a terminal, block-buffered otherwise.
pub fn stdout_writer() -> Box<dyn Write> {
    Box::new(stdout(ColorChoice::Never))
}

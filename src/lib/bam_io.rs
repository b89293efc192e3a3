//! Opening BAM inputs and outputs.
//!
//! With `threads > 1` BGZF blocks are inflated or deflated on that many worker threads;
//! otherwise the plain single-threaded reader and writer are used.

use anyhow::{Context, Result};
use noodles::bgzf::io::{
    MultithreadedReader, MultithreadedWriter, Reader as BgzfReader, Writer as BgzfWriter,
    multithreaded_writer, writer::CompressionLevel,
};
use noodles::sam::Header;
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::num::NonZero;
use std::path::Path;

/// Highest BGZF compression level accepted by the writers (zlib levels).
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// BGZF decompression over a file, on the calling thread or on worker threads.
pub enum BgzfSource {
    Serial(BgzfReader<File>),
    Parallel(MultithreadedReader<File>),
}

impl Read for BgzfSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Serial(r) => r.read(buf),
            Self::Parallel(r) => r.read(buf),
        }
    }
}

impl BufRead for BgzfSource {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Self::Serial(r) => r.fill_buf(),
            Self::Parallel(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Self::Serial(r) => r.consume(amt),
            Self::Parallel(r) => r.consume(amt),
        }
    }
}

/// BGZF compression into a file, on the calling thread or on worker threads.
pub enum BgzfSink {
    Serial(BgzfWriter<File>),
    Parallel(MultithreadedWriter<File>),
}

impl Write for BgzfSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Serial(w) => w.write(buf),
            Self::Parallel(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Serial(w) => w.flush(),
            Self::Parallel(w) => w.flush(),
        }
    }
}

impl BgzfSink {
    /// Writes the final block and the BGZF EOF marker, joining any worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the remaining data cannot be written.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Self::Serial(mut w) => w.try_finish(),
            Self::Parallel(mut w) => w.finish().map(|_| ()),
        }
    }
}

pub type BamReader = noodles::bam::io::Reader<BgzfSource>;
pub type BamWriter = noodles::bam::io::Writer<BgzfSink>;

/// Worker threads to use, or `None` for single-threaded BGZF.
fn worker_count(threads: usize) -> Option<NonZero<usize>> {
    NonZero::new(threads).filter(|n| n.get() > 1)
}

/// Opens a BAM file and reads its header.
///
/// # Errors
///
/// Returns an error naming `path` if the file cannot be opened or its header is invalid.
///
/// # Example
/// ```no_run
/// use fgtrim_lib::bam_io::create_bam_reader;
///
/// let (mut reader, header) = create_bam_reader("input.bam", 4).unwrap();
/// ```
pub fn create_bam_reader<P: AsRef<Path>>(path: P, threads: usize) -> Result<(BamReader, Header)> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open input BAM: {}", path.display()))?;

    let source = match worker_count(threads) {
        Some(workers) => {
            BgzfSource::Parallel(MultithreadedReader::with_worker_count(workers, file))
        }
        None => BgzfSource::Serial(BgzfReader::new(file)),
    };

    let mut reader = noodles::bam::io::Reader::from(source);
    let header = reader
        .read_header()
        .with_context(|| format!("Failed to read header from: {}", path.display()))?;
    Ok((reader, header))
}

/// Creates a BAM file at `path` and writes `header` to it.
///
/// # Errors
///
/// Returns an error if `compression_level` is above [`MAX_COMPRESSION_LEVEL`], or if the file
/// cannot be created or the header cannot be written.
pub fn create_bam_writer<P: AsRef<Path>>(
    path: P,
    header: &Header,
    threads: usize,
    compression_level: u32,
) -> Result<BamWriter> {
    let path = path.as_ref();
    let level = u8::try_from(compression_level)
        .ok()
        .and_then(CompressionLevel::new)
        .with_context(|| format!("Invalid BGZF compression level: {compression_level}"))?;

    let file = File::create(path)
        .with_context(|| format!("Failed to create output BAM: {}", path.display()))?;

    let sink = match worker_count(threads) {
        Some(workers) => BgzfSink::Parallel(
            multithreaded_writer::Builder::default()
                .set_worker_count(workers)
                .set_compression_level(level)
                .build_from_writer(file),
        ),
        None => BgzfSink::Serial(
            noodles::bgzf::io::writer::Builder::default()
                .set_compression_level(level)
                .build_from_writer(file),
        ),
    };

    let mut writer = noodles::bam::io::Writer::from(sink);
    writer
        .write_header(header)
        .with_context(|| format!("Failed to write header to: {}", path.display()))?;
    Ok(writer)
}

/// Finishes a BAM writer created by [`create_bam_writer`], writing the EOF marker.
///
/// # Errors
///
/// Returns an error if the final blocks cannot be written.
pub fn finish_bam_writer(writer: BamWriter, path: &Path) -> Result<()> {
    writer
        .into_inner()
        .finish()
        .with_context(|| format!("Failed to finish writing BAM: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::SamBuilder;
    use noodles::sam::alignment::io::Write as AlignmentWrite;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case::single_threaded(1, 1)]
    #[case::multi_threaded(3, 6)]
    #[case::uncompressed(1, 0)]
    fn test_writer_and_reader_agree(#[case] threads: usize, #[case] level: u32) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bam");

        let mut builder = SamBuilder::with_single_ref("chr1", 10_000);
        for i in 0..10 {
            let _ = builder.add_pair().start1(100 + i * 10).start2(300 + i * 10).build();
        }

        let mut writer = create_bam_writer(&path, &builder.header, threads, level).unwrap();
        for record in builder.records() {
            writer.write_alignment_record(&builder.header, record).unwrap();
        }
        finish_bam_writer(writer, &path).unwrap();

        let (mut reader, header) = create_bam_reader(&path, threads).unwrap();
        assert_eq!(header.reference_sequences().len(), 1);
        let names: Vec<_> = reader
            .record_bufs(&header)
            .map(|r| r.unwrap().name().map(|n| n.to_vec()).unwrap_or_default())
            .collect();
        let expected: Vec<_> =
            builder.records().iter().map(|r| r.name().unwrap().to_vec()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_writer_rejects_out_of_range_level() {
        let dir = TempDir::new().unwrap();
        let header = Header::default();
        let result = create_bam_writer(dir.path().join("out.bam"), &header, 1, 13);
        assert!(result.is_err());
    }

    #[test]
    fn test_reader_missing_file_names_path() {
        let err = create_bam_reader("/nonexistent/input.bam", 1).err().unwrap();
        assert!(format!("{err:#}").contains("/nonexistent/input.bam"));
    }
}

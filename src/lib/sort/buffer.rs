//! In-process sorting buffer that spills to disk.
//!
//! Records are accumulated in memory together with their sort keys. Once the estimated
//! memory use reaches the limit, the buffer is sorted (in parallel with rayon when more
//! than one thread is available) and written to a temporary BAM chunk. Iterating the
//! finished buffer performs a k-way merge of all chunks and any records still in memory
//! using a binary heap.

use anyhow::{Context, Result};
use log::{debug, info};
use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::bam_io::{create_bam_writer, finish_bam_writer};
use crate::sort::keys::SortKey;

/// Default memory limit before spilling (768 MB).
pub const DEFAULT_MEMORY_LIMIT: usize = 768 * 1024 * 1024;

/// Buffer size for reading temp files during merge.
const MERGE_BUFFER_SIZE: usize = 64 * 1024;

/// Compression level for temporary files (fast compression).
const TEMP_COMPRESSION_LEVEL: u32 = 1;

/// Accumulates records and yields them back in the order of `K`.
pub struct SortingBuffer<K: SortKey> {
    header: Header,
    memory_limit: usize,
    threads: usize,
    temp_dir: TempDir,
    records: Vec<(K, RecordBuf)>,
    memory_used: usize,
    chunk_files: Vec<PathBuf>,
    total_records: u64,
}

impl<K: SortKey> SortingBuffer<K> {
    /// Creates an empty buffer for records described by `header`.
    ///
    /// Spill files are created in a fresh directory under `temp_dir` (or the system temp
    /// directory) that is removed when the sorted iterator is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new(
        header: &Header,
        memory_limit: usize,
        temp_dir: Option<&Path>,
        threads: usize,
    ) -> Result<Self> {
        let temp_dir = match temp_dir {
            Some(base) => {
                std::fs::create_dir_all(base).with_context(|| {
                    format!("Failed to create temp directory: {}", base.display())
                })?;
                TempDir::new_in(base).context("Failed to create temp directory")?
            }
            None => TempDir::new().context("Failed to create temp directory")?,
        };

        Ok(Self {
            header: header.clone(),
            memory_limit,
            threads,
            temp_dir,
            records: Vec::new(),
            memory_used: 0,
            chunk_files: Vec::new(),
            total_records: 0,
        })
    }

    /// Adds a record, spilling the in-memory records to disk if the limit is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the sort key cannot be built or a spill file cannot be written.
    pub fn add(&mut self, record: RecordBuf) -> Result<()> {
        let key = K::from_record(&record, &self.header)?;
        self.memory_used += estimate_record_size(&record);
        self.records.push((key, record));
        self.total_records += 1;

        if self.memory_used >= self.memory_limit {
            self.spill()?;
        }
        Ok(())
    }

    /// Total number of records added.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.total_records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Number of chunks spilled to disk so far.
    #[must_use]
    pub fn chunks_written(&self) -> usize {
        self.chunk_files.len()
    }

    /// Finishes accumulating and returns an iterator over the records in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if a spill file cannot be opened.
    pub fn into_sorted_iter(mut self) -> Result<SortedRecords<K>> {
        self.sort_in_memory();

        if self.chunk_files.is_empty() {
            debug!("All {} records fit in memory", self.total_records);
            return Ok(SortedRecords {
                source: Source::Memory(self.records.into_iter()),
                _temp_dir: self.temp_dir,
            });
        }

        info!(
            "Merging {} spilled chunks and {} in-memory records",
            self.chunk_files.len(),
            self.records.len()
        );

        let mut chunks = self
            .chunk_files
            .iter()
            .map(|path| ChunkReader::new(path))
            .collect::<Result<Vec<_>>>()?;

        let mut heap = BinaryHeap::with_capacity(chunks.len() + 1);
        for (idx, chunk) in chunks.iter_mut().enumerate() {
            if let Some((key, record)) = chunk.next::<K>(&self.header)? {
                heap.push(Reverse(HeapEntry { key, record, source: idx }));
            }
        }

        let mut memory = self.records.into_iter();
        let memory_idx = chunks.len();
        if let Some((key, record)) = memory.next() {
            heap.push(Reverse(HeapEntry { key, record, source: memory_idx }));
        }

        Ok(SortedRecords {
            source: Source::Merge(Merge {
                header: self.header,
                chunks,
                memory,
                heap,
            }),
            _temp_dir: self.temp_dir,
        })
    }

    fn sort_in_memory(&mut self) {
        if self.threads > 1 {
            self.records.par_sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        } else {
            self.records.sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        }
    }

    fn spill(&mut self) -> Result<()> {
        self.sort_in_memory();

        let path = self.temp_dir.path().join(format!("chunk_{:04}.bam", self.chunk_files.len()));
        debug!("Spilling {} records to {}", self.records.len(), path.display());

        let mut writer = create_bam_writer(&path, &self.header, 1, TEMP_COMPRESSION_LEVEL)?;
        for (_, record) in &self.records {
            writer
                .write_alignment_record(&self.header, record)
                .with_context(|| format!("Failed to write chunk: {}", path.display()))?;
        }
        finish_bam_writer(writer, &path)?;

        self.chunk_files.push(path);
        self.records.clear();
        self.memory_used = 0;
        Ok(())
    }
}

/// Records from a [`SortingBuffer`] in sorted order.
///
/// Holds the buffer's temporary directory, which is deleted when this is dropped.
pub struct SortedRecords<K: SortKey> {
    source: Source<K>,
    _temp_dir: TempDir,
}

enum Source<K: SortKey> {
    Memory(std::vec::IntoIter<(K, RecordBuf)>),
    Merge(Merge<K>),
}

struct Merge<K: SortKey> {
    header: Header,
    chunks: Vec<ChunkReader>,
    memory: std::vec::IntoIter<(K, RecordBuf)>,
    heap: BinaryHeap<Reverse<HeapEntry<K>>>,
}

impl<K: SortKey> Merge<K> {
    fn next_record(&mut self) -> Result<Option<RecordBuf>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };

        let replacement = if entry.source == self.chunks.len() {
            self.memory.next()
        } else {
            self.chunks[entry.source].next::<K>(&self.header)?
        };
        if let Some((key, record)) = replacement {
            self.heap.push(Reverse(HeapEntry { key, record, source: entry.source }));
        }

        Ok(Some(entry.record))
    }
}

impl<K: SortKey> Iterator for SortedRecords<K> {
    type Item = Result<RecordBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Memory(records) => records.next().map(|(_, record)| Ok(record)),
            Source::Merge(merge) => merge.next_record().transpose(),
        }
    }
}

/// Estimate memory usage of a BAM record plus its sort key.
fn estimate_record_size(record: &RecordBuf) -> usize {
    // Base RecordBuf struct size + variable-length fields
    let record_size = std::mem::size_of::<RecordBuf>()
        + record.name().map_or(0, |n| n.len())
        + record.sequence().len()
        + record.quality_scores().as_ref().len()
        + record.cigar().as_ref().len() * 4
        + 256; // Estimated tag overhead

    // Sort keys carry the name again plus a few fixed fields
    record_size + record.name().map_or(0, |n| n.len()) + 32
}

/// Reader for a sorted chunk file.
struct ChunkReader {
    reader: bam::io::Reader<noodles::bgzf::io::Reader<BufReader<File>>>,
}

impl ChunkReader {
    fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open chunk file: {}", path.display()))?;
        let buf_reader = BufReader::with_capacity(MERGE_BUFFER_SIZE, file);
        let mut reader = bam::io::Reader::new(buf_reader);

        // Read and discard header
        reader.read_header()?;

        Ok(Self { reader })
    }

    fn next<K: SortKey>(&mut self, header: &Header) -> Result<Option<(K, RecordBuf)>> {
        let mut record = RecordBuf::default();
        match self.reader.read_record_buf(header, &mut record)? {
            0 => Ok(None),
            _ => {
                let key = K::from_record(&record, header)?;
                Ok(Some((key, record)))
            }
        }
    }
}

/// Entry in the merge heap.
///
/// Ties are broken by source index so that records with equal keys keep the order in
/// which their chunks were written.
struct HeapEntry<K> {
    key: K,
    record: RecordBuf,
    source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key).then_with(|| self.source.cmp(&other.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::SamBuilder;
    use crate::sort::keys::{CoordinateKey, QuerynameKey};
    use rstest::rstest;

    fn shuffled_pairs(count: usize) -> SamBuilder {
        let mut builder = SamBuilder::with_single_ref("chr1", 1_000_000);
        for i in 0..count {
            // Scatter names and positions so neither order matches insertion order.
            let n = (i * 7919) % count;
            builder
                .add_pair()
                .name(&format!("q{n}"))
                .start1(1 + (n * 131) % 50_000)
                .start2(60_000 + (n * 17) % 1_000)
                .build();
        }
        builder
    }

    #[rstest]
    #[case::in_memory(DEFAULT_MEMORY_LIMIT, 1)]
    #[case::spilled(4 * 1024, 1)]
    #[case::spilled_parallel(4 * 1024, 4)]
    fn test_sorts_by_coordinate(#[case] memory_limit: usize, #[case] threads: usize) {
        let builder = shuffled_pairs(200);
        let mut buffer =
            SortingBuffer::<CoordinateKey>::new(&builder.header, memory_limit, None, threads)
                .unwrap();
        for record in builder.records() {
            buffer.add(record.clone()).unwrap();
        }
        assert_eq!(buffer.len(), 400);
        if memory_limit < DEFAULT_MEMORY_LIMIT {
            assert!(buffer.chunks_written() > 1);
        }

        let sorted: Vec<RecordBuf> =
            buffer.into_sorted_iter().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(sorted.len(), 400);

        let keys: Vec<CoordinateKey> = sorted
            .iter()
            .map(|r| CoordinateKey::from_record(r, &builder.header).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[rstest]
    #[case::in_memory(DEFAULT_MEMORY_LIMIT)]
    #[case::spilled(2 * 1024)]
    fn test_sorts_by_queryname_keeping_templates_together(#[case] memory_limit: usize) {
        let builder = shuffled_pairs(100);
        let mut buffer =
            SortingBuffer::<QuerynameKey>::new(&builder.header, memory_limit, None, 1).unwrap();
        for record in builder.records() {
            buffer.add(record.clone()).unwrap();
        }

        let names: Vec<Vec<u8>> = buffer
            .into_sorted_iter()
            .unwrap()
            .map(|r| r.unwrap().name().unwrap().to_vec())
            .collect();

        let expected: Vec<Vec<u8>> = (0..100)
            .flat_map(|n| {
                let name = format!("q{n}").into_bytes();
                [name.clone(), name]
            })
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let builder = SamBuilder::with_single_ref("chr1", 1_000);
        let buffer = SortingBuffer::<CoordinateKey>::new(&builder.header, 1024, None, 1).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.into_sorted_iter().unwrap().count(), 0);
    }

    #[test]
    fn test_spills_into_requested_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = shuffled_pairs(50);
        let mut buffer =
            SortingBuffer::<CoordinateKey>::new(&builder.header, 1024, Some(dir.path()), 1)
                .unwrap();
        for record in builder.records() {
            buffer.add(record.clone()).unwrap();
        }
        assert!(buffer.chunks_written() > 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let sorted = buffer.into_sorted_iter().unwrap();
        assert_eq!(sorted.count(), 100);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

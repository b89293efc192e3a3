//! Reference FASTA held in memory for NM/MD/UQ recomputation.
//!
//! The whole reference is loaded up front: tag recomputation visits every mapped record
//! in coordinate order and needs constant-time lookups of arbitrary spans.

use crate::errors::FgtrimError;
use anyhow::{Context, Result};
use log::debug;
use noodles::core::Position;
use noodles::fasta;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Cheaply cloneable, read-only access to reference contigs by name.
#[derive(Clone, Debug)]
pub struct ReferenceReader {
    sequences: Arc<HashMap<String, Vec<u8>>>,
}

impl ReferenceReader {
    /// Reads every contig of the FASTA at `path` into memory.
    ///
    /// # Errors
    /// Returns an error if the file does not exist or is not valid FASTA.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FgtrimError::InvalidFileFormat {
                file_type: "Reference FASTA".to_string(),
                path: path.display().to_string(),
                reason: "File does not exist".to_string(),
            }
            .into());
        }

        debug!("Reading reference FASTA into memory: {}", path.display());
        let mut reader = fasta::io::reader::Builder
            .build_from_path(path)
            .with_context(|| format!("Failed to open reference FASTA: {}", path.display()))?;

        let mut sequences = HashMap::new();
        for result in reader.records() {
            let record = result
                .with_context(|| format!("Failed to read reference FASTA: {}", path.display()))?;
            let name = std::str::from_utf8(record.name())?.to_string();
            let bases: &[u8] = record.sequence().as_ref();
            sequences.insert(name, bases.to_vec());
        }

        debug!("Loaded {} contigs into memory", sequences.len());
        Ok(Self { sequences: Arc::new(sequences) })
    }

    /// Number of contigs loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True if the FASTA contained no contigs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Fetches the bases of `chrom` over the 1-based inclusive range `[start, end]`.
    ///
    /// # Errors
    /// Returns an error if the contig is unknown or the range runs off its end.
    pub fn fetch(&self, chrom: &str, start: Position, end: Position) -> Result<Vec<u8>> {
        let sequence = self
            .sequences
            .get(chrom)
            .ok_or_else(|| FgtrimError::ReferenceNotFound { ref_name: chrom.to_string() })?;

        let start_idx = usize::from(start) - 1;
        let end_idx = usize::from(end);
        sequence.get(start_idx..end_idx).map(<[u8]>::to_vec).ok_or_else(|| {
            FgtrimError::InvalidParameter {
                parameter: "region".to_string(),
                reason: format!(
                    "Requested region {chrom}:{start}-{end} exceeds sequence length {}",
                    sequence.len()
                ),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_fasta(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn pos(n: usize) -> Position {
        Position::new(n).unwrap()
    }

    #[test]
    fn test_fetch_multi_line_contigs() {
        let fasta = write_fasta(">chr1 description\nACGTACGT\nTTTT\n>chr2\nGGGGCCCC\n");
        let reference = ReferenceReader::new(fasta.path()).unwrap();
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.fetch("chr1", pos(1), pos(4)).unwrap(), b"ACGT");
        assert_eq!(reference.fetch("chr1", pos(7), pos(10)).unwrap(), b"GTTT");
        assert_eq!(reference.fetch("chr2", pos(5), pos(8)).unwrap(), b"CCCC");
    }

    #[test]
    fn test_fetch_unknown_contig() {
        let fasta = write_fasta(">chr1\nACGT\n");
        let reference = ReferenceReader::new(fasta.path()).unwrap();
        let err = reference.fetch("chrZ", pos(1), pos(2)).unwrap_err();
        assert!(err.to_string().contains("chrZ"));
    }

    #[test]
    fn test_fetch_past_end() {
        let fasta = write_fasta(">chr1\nACGT\n");
        let reference = ReferenceReader::new(fasta.path()).unwrap();
        let err = reference.fetch("chr1", pos(3), pos(5)).unwrap_err();
        assert!(err.to_string().contains("exceeds sequence length 4"));
    }

    #[test]
    fn test_missing_file() {
        let err = ReferenceReader::new("/nonexistent/ref.fa").unwrap_err();
        assert!(err.to_string().contains("File does not exist"));
    }
}

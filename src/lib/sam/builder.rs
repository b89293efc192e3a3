//! Builders for creating test SAM/BAM records and files.
//!
//! Modeled after fgbio's `SamBuilder`:
//!
//! - [`SamBuilder`]: accumulates pairs and fragments against a header and writes BAM files
//! - [`RecordBuilder`]: creates individual records without header management
//!
//! ## Examples
//!
//! ```rust
//! use fgtrim_lib::sam::builder::{SamBuilder, Strand};
//!
//! let mut builder = SamBuilder::with_single_ref("chr1", 10_000);
//! let (r1, r2) = builder
//!     .add_pair()
//!     .name("q1")
//!     .start1(100)
//!     .start2(300)
//!     .cigar1("50M")
//!     .cigar2("50M")
//!     .build();
//! assert!(r1.flags().is_first_segment());
//! assert!(r2.flags().is_reverse_complemented());
//! ```

use anyhow::Result;
use bstr::BString;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record::{Flags, MappingQuality};
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::{ReadGroup, ReferenceSequence};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

use crate::mate_info::reconcile;

pub const DEFAULT_READ_LENGTH: usize = 100;
pub const DEFAULT_BASE_QUALITY: u8 = 30;
pub const DEFAULT_MAPQ: u8 = 60;
pub const DEFAULT_READ_GROUP_ID: &str = "A";

/// Strand orientation for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    #[must_use]
    pub fn is_negative(&self) -> bool {
        matches!(self, Strand::Minus)
    }
}

/// Accumulates test records against a header and writes them to BAM.
#[derive(Debug)]
pub struct SamBuilder {
    /// SAM header
    pub header: Header,
    records: Vec<RecordBuf>,
    read_length: usize,
    base_quality: u8,
    read_group_id: String,
    counter: AtomicU64,
}

impl SamBuilder {
    /// Creates a builder with a single reference sequence and a read group `A`.
    ///
    /// # Panics
    ///
    /// Panics if `ref_length` is zero.
    #[must_use]
    pub fn with_single_ref(ref_name: &str, ref_length: usize) -> Self {
        let map = Map::<ReferenceSequence>::new(NonZeroUsize::new(ref_length).unwrap());
        let header = Header::builder()
            .add_reference_sequence(BString::from(ref_name), map)
            .add_read_group(BString::from(DEFAULT_READ_GROUP_ID), Map::<ReadGroup>::default())
            .build();
        Self::with_header(header)
    }

    /// Creates a builder around an existing header.
    #[must_use]
    pub fn with_header(header: Header) -> Self {
        Self {
            header,
            records: Vec::new(),
            read_length: DEFAULT_READ_LENGTH,
            base_quality: DEFAULT_BASE_QUALITY,
            read_group_id: DEFAULT_READ_GROUP_ID.to_string(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_name(&self) -> String {
        format!("{:04}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Generates deterministic bases of the requested length.
    fn bases_of_length(&self, length: usize) -> String {
        let offset = usize::try_from(self.counter.load(Ordering::SeqCst)).unwrap_or(0);
        (0..length).map(|i| ['A', 'C', 'G', 'T'][(i * 7 + offset) % 4]).collect()
    }

    /// Returns the accumulated records.
    #[must_use]
    pub fn records(&self) -> &[RecordBuf] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pushes a pre-built record to the collection.
    pub fn push_record(&mut self, record: RecordBuf) {
        self.records.push(record);
    }

    /// Starts building a paired-end read pair.
    #[must_use]
    pub fn add_pair(&mut self) -> PairBuilder<'_> {
        PairBuilder::new(self)
    }

    /// Starts building a single-end (fragment) read.
    #[must_use]
    pub fn add_frag(&mut self) -> FragBuilder<'_> {
        FragBuilder::new(self)
    }

    /// Writes accumulated records to a BAM file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_bam(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = noodles::bam::io::Writer::new(file);
        writer.write_header(&self.header)?;

        for record in &self.records {
            writer.write_alignment_record(&self.header, record)?;
        }

        Ok(())
    }

    /// Writes to a temporary BAM file.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or written.
    pub fn to_temp_file(&self) -> Result<NamedTempFile> {
        let temp = NamedTempFile::new()?;
        self.write_bam(temp.path())?;
        Ok(temp)
    }
}

/// Builder for a paired-end read pair. Mate information is filled in on build.
pub struct PairBuilder<'a> {
    parent: &'a mut SamBuilder,
    name: Option<String>,
    bases1: Option<String>,
    bases2: Option<String>,
    contig2: usize,
    start1: Option<usize>,
    start2: Option<usize>,
    cigar1: Option<String>,
    cigar2: Option<String>,
    strand1: Strand,
    strand2: Strand,
    attrs: Vec<(Tag, BufValue)>,
}

impl<'a> PairBuilder<'a> {
    fn new(parent: &'a mut SamBuilder) -> Self {
        Self {
            parent,
            name: None,
            bases1: None,
            bases2: None,
            contig2: 0,
            start1: None,
            start2: None,
            cigar1: None,
            cigar2: None,
            strand1: Strand::Plus,
            strand2: Strand::Minus,
            attrs: Vec::new(),
        }
    }

    /// Sets the read name (same for both reads in pair).
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn bases1(mut self, bases: &str) -> Self {
        self.bases1 = Some(bases.to_string());
        self
    }

    #[must_use]
    pub fn bases2(mut self, bases: &str) -> Self {
        self.bases2 = Some(bases.to_string());
        self
    }

    /// Places R2 on another reference sequence; both reads are on the first by default.
    #[must_use]
    pub fn contig2(mut self, contig: usize) -> Self {
        self.contig2 = contig;
        self
    }

    /// Sets the alignment start for R1 (1-based). If not set, R1 is unmapped.
    #[must_use]
    pub fn start1(mut self, start: usize) -> Self {
        self.start1 = Some(start);
        self
    }

    /// Sets the alignment start for R2 (1-based). If not set, R2 is unmapped.
    #[must_use]
    pub fn start2(mut self, start: usize) -> Self {
        self.start2 = Some(start);
        self
    }

    #[must_use]
    pub fn cigar1(mut self, cigar: &str) -> Self {
        self.cigar1 = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn cigar2(mut self, cigar: &str) -> Self {
        self.cigar2 = Some(cigar.to_string());
        self
    }

    #[must_use]
    pub fn strand1(mut self, strand: Strand) -> Self {
        self.strand1 = strand;
        self
    }

    #[must_use]
    pub fn strand2(mut self, strand: Strand) -> Self {
        self.strand2 = strand;
        self
    }

    #[must_use]
    pub fn unmapped2(mut self) -> Self {
        self.start2 = None;
        self
    }

    /// Adds a tag to both reads.
    #[must_use]
    pub fn attr<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        if let &[a, b] = tag.as_bytes() {
            self.attrs.push((Tag::new(a, b), value.into()));
        }
        self
    }

    /// Builds the pair, adds both records to the parent and returns them.
    ///
    /// # Panics
    ///
    /// Panics if a start position or mapping quality is invalid.
    #[must_use]
    pub fn build(self) -> (RecordBuf, RecordBuf) {
        let name = self.name.unwrap_or_else(|| self.parent.next_name());

        let mut r1 = build_segment(
            self.parent,
            SegmentSpec {
                name: &name,
                flags: Flags::SEGMENTED | Flags::FIRST_SEGMENT,
                bases: self.bases1,
                contig: 0,
                start: self.start1,
                cigar: self.cigar1,
                strand: self.strand1,
                attrs: &self.attrs,
            },
        );
        let mut r2 = build_segment(
            self.parent,
            SegmentSpec {
                name: &name,
                flags: Flags::SEGMENTED | Flags::LAST_SEGMENT,
                bases: self.bases2,
                contig: self.contig2,
                start: self.start2,
                cigar: self.cigar2,
                strand: self.strand2,
                attrs: &self.attrs,
            },
        );

        reconcile(&mut r1, &mut r2);

        self.parent.records.push(r1.clone());
        self.parent.records.push(r2.clone());

        (r1, r2)
    }
}

/// Builder for a single-end (fragment) read.
pub struct FragBuilder<'a> {
    parent: &'a mut SamBuilder,
    name: Option<String>,
    start: Option<usize>,
    cigar: Option<String>,
}

impl<'a> FragBuilder<'a> {
    fn new(parent: &'a mut SamBuilder) -> Self {
        Self {
            parent,
            name: None,
            start: None,
            cigar: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the alignment start (1-based). If not set, read is unmapped.
    #[must_use]
    pub fn start(mut self, start: usize) -> Self {
        self.start = Some(start);
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    /// Builds the record, adds it to the parent and returns a clone.
    ///
    /// # Panics
    ///
    /// Panics if the start position or mapping quality is invalid.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let name = self.name.unwrap_or_else(|| self.parent.next_name());
        let rec = build_segment(
            self.parent,
            SegmentSpec {
                name: &name,
                flags: Flags::empty(),
                bases: None,
                contig: 0,
                start: self.start,
                cigar: self.cigar,
                strand: Strand::Plus,
                attrs: &[],
            },
        );
        self.parent.records.push(rec.clone());
        rec
    }
}

struct SegmentSpec<'s> {
    name: &'s str,
    flags: Flags,
    bases: Option<String>,
    contig: usize,
    start: Option<usize>,
    cigar: Option<String>,
    strand: Strand,
    attrs: &'s [(Tag, BufValue)],
}

/// Builds one record of a pair or a fragment. Bases default to the CIGAR's read length.
fn build_segment(parent: &SamBuilder, spec: SegmentSpec<'_>) -> RecordBuf {
    let bases = spec.bases.unwrap_or_else(|| {
        let length = spec.cigar.as_deref().map_or(parent.read_length, cigar_seq_len);
        parent.bases_of_length(length)
    });
    let quals = vec![parent.base_quality; bases.len()];
    let cigar = spec.cigar.unwrap_or_else(|| format!("{}M", bases.len()));

    let mut rec = RecordBuf::default();
    *rec.name_mut() = Some(BString::from(spec.name));
    *rec.sequence_mut() = Sequence::from(bases.into_bytes());
    *rec.quality_scores_mut() = QualityScores::from(quals);

    let mut flags = spec.flags;
    if spec.strand.is_negative() {
        flags |= Flags::REVERSE_COMPLEMENTED;
    }

    match spec.start {
        Some(start) => {
            *rec.reference_sequence_id_mut() = Some(spec.contig);
            *rec.alignment_start_mut() = Some(Position::try_from(start).unwrap());
            *rec.cigar_mut() = parse_cigar(&cigar).into_iter().collect();
            *rec.mapping_quality_mut() = Some(MappingQuality::try_from(DEFAULT_MAPQ).unwrap());
        }
        None => flags |= Flags::UNMAPPED,
    }
    *rec.flags_mut() = flags;

    rec.data_mut().insert(Tag::READ_GROUP, BufValue::from(parent.read_group_id.clone()));
    for (tag, value) in spec.attrs {
        rec.data_mut().insert(*tag, value.clone());
    }

    rec
}

/// Parses a CIGAR string into a vector of operations.
///
/// # Panics
///
/// Panics if the CIGAR string contains invalid characters or formatting.
#[must_use]
pub fn parse_cigar(cigar_str: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut num_str = String::new();

    for c in cigar_str.chars() {
        if c.is_ascii_digit() {
            num_str.push(c);
        } else {
            let len: usize = num_str.parse().expect("Invalid CIGAR: expected number");
            let kind = match c {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => panic!("Unknown CIGAR operation: {c}"),
            };
            ops.push(Op::new(kind, len));
            num_str.clear();
        }
    }

    ops
}

/// Number of read bases implied by a CIGAR string.
#[must_use]
pub fn cigar_seq_len(cigar: &str) -> usize {
    parse_cigar(cigar)
        .iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::Insertion
                    | Kind::SoftClip
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
            )
        })
        .map(|op| op.len())
        .sum()
}

/// Builder for individual records without a parent [`SamBuilder`].
///
/// ```rust
/// use fgtrim_lib::sam::builder::RecordBuilder;
///
/// let record = RecordBuilder::mapped_read()
///     .name("read1")
///     .cigar("10S40M")
///     .alignment_start(100)
///     .tag("RG", "A")
///     .build();
/// assert_eq!(record.sequence().len(), 50);
/// ```
#[derive(Debug, Default)]
pub struct RecordBuilder {
    name: Option<Vec<u8>>,
    flags: Flags,
    reference_sequence_id: Option<usize>,
    alignment_start: Option<usize>,
    mapping_quality: Option<u8>,
    cigar: Option<String>,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
    tags: Vec<(Tag, BufValue)>,
}

impl RecordBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { mapping_quality: Some(DEFAULT_MAPQ), ..Self::default() }
    }

    /// Creates a builder for a read mapped to reference 0. CIGAR defaults to `{len}M`.
    #[must_use]
    pub fn mapped_read() -> Self {
        Self { reference_sequence_id: Some(0), ..Self::new() }
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.as_bytes().to_vec());
        self
    }

    /// Sets the sequence, generating default qualities if none are set.
    #[must_use]
    pub fn sequence(mut self, seq: &str) -> Self {
        self.sequence = seq.as_bytes().to_vec();
        if self.qualities.is_empty() {
            self.qualities = vec![DEFAULT_BASE_QUALITY; seq.len()];
        }
        self
    }

    /// Sets the quality scores (raw Phred values).
    #[must_use]
    pub fn qualities(mut self, quals: &[u8]) -> Self {
        self.qualities = quals.to_vec();
        self
    }

    /// Sets the first segment (R1) flag, or the last segment flag when `false`. Implies paired.
    #[must_use]
    pub fn first_segment(mut self, is_first: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.flags.set(Flags::FIRST_SEGMENT, is_first);
        self.flags.set(Flags::LAST_SEGMENT, !is_first);
        self
    }

    #[must_use]
    pub fn unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::UNMAPPED, unmapped);
        self
    }

    #[must_use]
    pub fn reverse_complement(mut self, reverse: bool) -> Self {
        self.flags.set(Flags::REVERSE_COMPLEMENTED, reverse);
        self
    }

    #[must_use]
    pub fn secondary(mut self, secondary: bool) -> Self {
        self.flags.set(Flags::SECONDARY, secondary);
        self
    }

    #[must_use]
    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.flags.set(Flags::SUPPLEMENTARY, supplementary);
        self
    }

    #[must_use]
    pub fn reference_sequence_id(mut self, id: usize) -> Self {
        self.reference_sequence_id = Some(id);
        self
    }

    /// Sets the alignment start position (1-based).
    #[must_use]
    pub fn alignment_start(mut self, pos: usize) -> Self {
        self.alignment_start = Some(pos);
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    /// Adds a SAM tag. Tags that are not two characters long are ignored.
    #[must_use]
    pub fn tag<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        if let &[a, b] = tag.as_bytes() {
            self.tags.push((Tag::from([a, b]), value.into()));
        }
        self
    }

    /// Builds the `RecordBuf`.
    ///
    /// # Panics
    ///
    /// Panics if a position is zero, the mapping quality is 255, or the CIGAR is malformed.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let mut record = RecordBuf::default();

        if let Some(name) = self.name {
            *record.name_mut() = Some(name.into());
        }
        *record.flags_mut() = self.flags;

        if let Some(ref_id) = self.reference_sequence_id {
            *record.reference_sequence_id_mut() = Some(ref_id);
        }
        if let Some(pos) = self.alignment_start {
            *record.alignment_start_mut() =
                Some(Position::try_from(pos).expect("alignment_start must be >= 1"));
        }
        if let Some(mapq) = self.mapping_quality {
            *record.mapping_quality_mut() =
                Some(MappingQuality::try_from(mapq).expect("mapping_quality must be valid"));
        }

        // With only a CIGAR, generate a sequence of the CIGAR's read length; with only a
        // sequence, generate an all-match CIGAR.
        let (cigar_str, sequence) = match (self.cigar, self.sequence.is_empty()) {
            (Some(cigar), true) => {
                let seq_len = cigar_seq_len(&cigar);
                let generated: Vec<u8> = (0..seq_len).map(|i| b"ACGT"[i % 4]).collect();
                (cigar, generated)
            }
            (Some(cigar), false) => (cigar, self.sequence),
            (None, false) => (format!("{}M", self.sequence.len()), self.sequence),
            (None, true) => (String::new(), Vec::new()),
        };

        if !cigar_str.is_empty() && !self.flags.is_unmapped() {
            *record.cigar_mut() = parse_cigar(&cigar_str).into_iter().collect();
        }

        let qualities = if self.qualities.is_empty() && !sequence.is_empty() {
            vec![DEFAULT_BASE_QUALITY; sequence.len()]
        } else {
            self.qualities
        };
        *record.sequence_mut() = Sequence::from(sequence);
        *record.quality_scores_mut() = QualityScores::from(qualities);

        for (tag, value) in self.tags {
            record.data_mut().insert(tag, value);
        }

        record
    }
}

//! Read clipping for mapped BAM records.
//!
//! All clipping is expressed in read bases. Clipping the start of an alignment moves its
//! alignment start by the number of reference bases consumed by the clipped operators;
//! clipping the end leaves the start untouched. The 5'/3' variants pick the side from the
//! read's strand.
//!
//! The `*_of_read` variants count clipping that already exists on the read towards the
//! requested amount, so asking for 20 bases on a read with `5S95M` clips 15 more.
//!
//! A request that would leave no aligned bases unmaps the read instead of producing an
//! alignment with an empty CIGAR.

use noodles::core::Position;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::MappingQuality;
use noodles::sam::alignment::record::cigar::Op as CigarOp;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::data::field::value::Array;
use noodles::sam::alignment::record_buf::{Cigar as CigarBuf, QualityScores, Sequence};

use crate::sam::alignment_tags::{md_tag, nm_tag, uq_tag};

macro_rules! array_len {
    ($arr:expr) => {
        match $arr {
            Array::Int8(a) => a.len(),
            Array::UInt8(a) => a.len(),
            Array::Int16(a) => a.len(),
            Array::UInt16(a) => a.len(),
            Array::Int32(a) => a.len(),
            Array::UInt32(a) => a.len(),
            Array::Float(a) => a.len(),
        }
    };
}

macro_rules! slice_array {
    ($arr:expr, $start:expr, $end:expr) => {
        match $arr {
            Array::Int8(a) => Array::Int8(a[$start..$end].to_vec()),
            Array::UInt8(a) => Array::UInt8(a[$start..$end].to_vec()),
            Array::Int16(a) => Array::Int16(a[$start..$end].to_vec()),
            Array::UInt16(a) => Array::UInt16(a[$start..$end].to_vec()),
            Array::Int32(a) => Array::Int32(a[$start..$end].to_vec()),
            Array::UInt32(a) => Array::UInt32(a[$start..$end].to_vec()),
            Array::Float(a) => Array::Float(a[$start..$end].to_vec()),
        }
    };
}

/// How clipped bases are represented in the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClippingMode {
    /// Clipped bases become `S` operators; bases and qualities are kept.
    Soft,
    /// Clipped bases become `H` operators and are removed from the record, along with
    /// any soft clipping they were adjacent to.
    Hard,
}

/// Which end of the stored (reference-oriented) record is being clipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Start,
    End,
}

/// Clips mapped records in a fixed [`ClippingMode`].
#[derive(Debug, Clone, Copy)]
pub struct SamRecordClipper {
    mode: ClippingMode,
    auto_clip_attributes: bool,
}

impl SamRecordClipper {
    /// Creates a new clipper with the specified mode
    #[must_use]
    pub fn new(mode: ClippingMode) -> Self {
        Self { mode, auto_clip_attributes: false }
    }

    /// Creates a clipper that, in hard clipping mode, also trims string and array
    /// attributes whose length equals the read length, keeping per-base tags in step with
    /// the bases.
    #[must_use]
    pub fn with_auto_clip(mode: ClippingMode, auto_clip_attributes: bool) -> Self {
        Self { mode, auto_clip_attributes }
    }

    /// The clipping mode in use.
    #[must_use]
    pub fn mode(&self) -> ClippingMode {
        self.mode
    }

    /// Clips `bases_to_clip` aligned read bases from the start of the alignment.
    ///
    /// Returns the number of read bases clipped, which can exceed the request when an
    /// insertion straddles the clip point.
    pub fn clip_start_of_alignment(&self, record: &mut RecordBuf, bases_to_clip: usize) -> usize {
        self.clip_alignment(record, bases_to_clip, End::Start)
    }

    /// Clips `bases_to_clip` aligned read bases from the end of the alignment.
    pub fn clip_end_of_alignment(&self, record: &mut RecordBuf, bases_to_clip: usize) -> usize {
        self.clip_alignment(record, bases_to_clip, End::End)
    }

    /// Clips aligned bases from the 3' end: the end for forward reads, the start for
    /// reverse reads.
    pub fn clip_3_prime_end_of_alignment(
        &self,
        record: &mut RecordBuf,
        bases_to_clip: usize,
    ) -> usize {
        if record.flags().is_reverse_complemented() {
            self.clip_start_of_alignment(record, bases_to_clip)
        } else {
            self.clip_end_of_alignment(record, bases_to_clip)
        }
    }

    /// Ensures at least `clip_length` bases are clipped at the start of the read, counting
    /// existing hard and soft clipping.
    ///
    /// Returns the number of additional bases clipped.
    pub fn clip_start_of_read(&self, record: &mut RecordBuf, clip_length: usize) -> usize {
        self.clip_read(record, clip_length, End::Start)
    }

    /// Ensures at least `clip_length` bases are clipped at the end of the read.
    pub fn clip_end_of_read(&self, record: &mut RecordBuf, clip_length: usize) -> usize {
        self.clip_read(record, clip_length, End::End)
    }

    /// Ensures at least `clip_length` bases are clipped at the 5' end of the read.
    pub fn clip_5_prime_end_of_read(&self, record: &mut RecordBuf, clip_length: usize) -> usize {
        if record.flags().is_reverse_complemented() {
            self.clip_end_of_read(record, clip_length)
        } else {
            self.clip_start_of_read(record, clip_length)
        }
    }

    fn clip_read(&self, record: &mut RecordBuf, clip_length: usize, end: End) -> usize {
        let ops = oriented_ops(record, end);
        let (hard, soft) = leading_clips(&ops);
        let existing = hard + soft;

        if clip_length > existing {
            self.clip_alignment(record, clip_length - existing, end)
        } else {
            self.upgrade_clipping(record, clip_length, end);
            0
        }
    }

    fn clip_alignment(&self, record: &mut RecordBuf, bases_to_clip: usize, end: End) -> usize {
        if bases_to_clip == 0 || record.flags().is_unmapped() || record.sequence().is_empty() {
            return 0;
        }

        let ops = oriented_ops(record, end);
        let (existing_hard, existing_soft) = leading_clips(&ops);
        let body: Vec<CigarOp> = ops
            .into_iter()
            .skip_while(|op| matches!(op.kind(), Kind::HardClip | Kind::SoftClip))
            .take_while(|op| !matches!(op.kind(), Kind::HardClip | Kind::SoftClip))
            .collect();

        let aligned: usize =
            body.iter().filter(|op| consumes_read(op.kind())).map(|op| op.len()).sum();
        if bases_to_clip >= aligned {
            make_unmapped(record);
            return aligned;
        }

        let mut read_bases_clipped = 0;
        let mut ref_bases_clipped = 0;
        let mut kept: Vec<CigarOp> = Vec::with_capacity(body.len() + 2);
        let mut iter = body.iter().peekable();

        // Deletions and insertions left at the new alignment boundary go with the clip.
        while read_bases_clipped < bases_to_clip
            || (read_bases_clipped == bases_to_clip
                && kept.is_empty()
                && iter
                    .peek()
                    .is_some_and(|op| matches!(op.kind(), Kind::Deletion | Kind::Insertion)))
        {
            let Some(op) = iter.next() else { break };
            let (kind, len) = (op.kind(), op.len());

            if consumes_read(kind) && len > bases_to_clip - read_bases_clipped {
                if kind == Kind::Insertion {
                    read_bases_clipped += len;
                } else {
                    let part = bases_to_clip - read_bases_clipped;
                    read_bases_clipped += part;
                    ref_bases_clipped += part;
                    kept.push(CigarOp::new(kind, len - part));
                }
            } else {
                if consumes_read(kind) {
                    read_bases_clipped += len;
                }
                if consumes_reference(kind) {
                    ref_bases_clipped += len;
                }
            }
        }
        kept.extend(iter.copied());
        if !kept.iter().any(|op| consumes_reference(op.kind()) && consumes_read(op.kind())) {
            make_unmapped(record);
            return aligned;
        }

        let trailing: Vec<CigarOp> = oriented_ops(record, end)
            .into_iter()
            .rev()
            .take_while(|op| matches!(op.kind(), Kind::HardClip | Kind::SoftClip))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let mut new_ops = Vec::with_capacity(kept.len() + trailing.len() + 2);
        let bases_to_remove = match self.mode {
            ClippingMode::Hard => {
                let removed = existing_soft + read_bases_clipped;
                new_ops.push(CigarOp::new(Kind::HardClip, existing_hard + removed));
                removed
            }
            ClippingMode::Soft => {
                if existing_hard > 0 {
                    new_ops.push(CigarOp::new(Kind::HardClip, existing_hard));
                }
                new_ops.push(CigarOp::new(Kind::SoftClip, existing_soft + read_bases_clipped));
                0
            }
        };
        new_ops.extend(kept);
        new_ops.extend(trailing);
        if end == End::End {
            new_ops.reverse();
        }
        *record.cigar_mut() = CigarBuf::from(new_ops);

        if end == End::Start && ref_bases_clipped > 0 {
            if let Some(start) = record.alignment_start() {
                *record.alignment_start_mut() =
                    Position::new(usize::from(start) + ref_bases_clipped);
            }
        }

        self.remove_bases(record, bases_to_remove, end);
        invalidate_alignment_tags(record);
        read_bases_clipped
    }

    /// Converts up to `length` bases of existing soft clipping at `end` into hard clipping.
    /// No-op in soft clipping mode.
    fn upgrade_clipping(&self, record: &mut RecordBuf, length: usize, end: End) {
        if self.mode == ClippingMode::Soft || length == 0 {
            return;
        }

        let ops = oriented_ops(record, end);
        let (hard, soft) = leading_clips(&ops);
        if hard >= length || soft == 0 {
            return;
        }
        let upgrade = soft.min(length - hard);

        let mut new_ops = vec![CigarOp::new(Kind::HardClip, hard + upgrade)];
        if soft > upgrade {
            new_ops.push(CigarOp::new(Kind::SoftClip, soft - upgrade));
        }
        new_ops.extend(
            ops.into_iter().skip_while(|op| matches!(op.kind(), Kind::HardClip | Kind::SoftClip)),
        );
        if end == End::End {
            new_ops.reverse();
        }
        *record.cigar_mut() = CigarBuf::from(new_ops);
        self.remove_bases(record, upgrade, end);
    }

    /// Drops `count` bases and qualities from `end` of the record.
    fn remove_bases(&self, record: &mut RecordBuf, count: usize, end: End) {
        if count == 0 {
            return;
        }

        let seq = record.sequence().as_ref();
        let quals = record.quality_scores().as_ref();
        let count = count.min(seq.len());
        let (new_seq, new_quals) = match end {
            End::Start => (seq[count..].to_vec(), quals.get(count..).unwrap_or_default().to_vec()),
            End::End => {
                let keep = seq.len() - count;
                (seq[..keep].to_vec(), quals.get(..keep).unwrap_or_default().to_vec())
            }
        };
        *record.sequence_mut() = Sequence::from(new_seq);
        *record.quality_scores_mut() = QualityScores::from(new_quals);

        if self.auto_clip_attributes {
            clip_extended_attributes(record, count, end);
        }
    }
}

/// Trims string and array attributes that were as long as the read before `removed`
/// bases were taken off `end`.
fn clip_extended_attributes(record: &mut RecordBuf, removed: usize, end: End) {
    let new_length = record.sequence().len();
    let old_length = new_length + removed;
    let (start, stop) = match end {
        End::Start => (removed, old_length),
        End::End => (0, new_length),
    };

    let mut updates: Vec<(Tag, Value)> = Vec::new();
    for (tag, value) in record.data().iter() {
        let clipped = match value {
            Value::String(s) if s.len() == old_length => {
                let bytes: &[u8] = s.as_ref();
                Value::String(bytes[start..stop].into())
            }
            Value::Array(arr) if array_len!(arr) == old_length => {
                Value::Array(slice_array!(arr, start, stop))
            }
            _ => continue,
        };
        updates.push((tag, clipped));
    }

    for (tag, value) in updates {
        record.data_mut().insert(tag, value);
    }
}

/// Removes NM, MD and UQ, which no longer describe a clipped alignment.
pub fn invalidate_alignment_tags(record: &mut RecordBuf) {
    record.data_mut().remove(&nm_tag());
    record.data_mut().remove(&md_tag());
    record.data_mut().remove(&uq_tag());
}

/// Unmaps a record whose alignment was clipped away entirely.
///
/// Reverse-strand reads are returned to their sequencing orientation. Reference and
/// position are kept so that mate fixup can place the read next to its mate.
fn make_unmapped(record: &mut RecordBuf) {
    let mut flags = record.flags();
    if flags.is_reverse_complemented() {
        let seq: Vec<u8> =
            record.sequence().as_ref().iter().rev().map(|&b| complement(b)).collect();
        let quals: Vec<u8> = record.quality_scores().as_ref().iter().rev().copied().collect();
        *record.sequence_mut() = Sequence::from(seq);
        *record.quality_scores_mut() = QualityScores::from(quals);
        flags.remove(Flags::REVERSE_COMPLEMENTED);
    }
    flags.remove(Flags::PROPERLY_SEGMENTED);
    flags.insert(Flags::UNMAPPED);
    *record.flags_mut() = flags;
    *record.cigar_mut() = CigarBuf::default();
    *record.mapping_quality_mut() = MappingQuality::new(0);
    *record.template_length_mut() = 0;
    invalidate_alignment_tags(record);
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        other => other,
    }
}

/// CIGAR operators ordered so that `end` comes first.
fn oriented_ops(record: &RecordBuf, end: End) -> Vec<CigarOp> {
    let mut ops: Vec<CigarOp> = record.cigar().as_ref().to_vec();
    if end == End::End {
        ops.reverse();
    }
    ops
}

/// (hard, soft) clipping at the front of `ops`.
fn leading_clips(ops: &[CigarOp]) -> (usize, usize) {
    let hard = ops.iter().take_while(|op| op.kind() == Kind::HardClip).map(|op| op.len()).sum();
    let soft = ops
        .iter()
        .skip_while(|op| op.kind() == Kind::HardClip)
        .take_while(|op| op.kind() == Kind::SoftClip)
        .map(|op| op.len())
        .sum();
    (hard, soft)
}

fn consumes_read(kind: Kind) -> bool {
    matches!(kind, Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch | Kind::Insertion)
}

fn consumes_reference(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch | Kind::Deletion | Kind::Skip
    )
}

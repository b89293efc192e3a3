//! Position and CIGAR helpers for individual records.
//!
//! Unclipped positions follow the HTSJDK convention: both soft and hard clips are
//! included when extending the alignment boundaries.

use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record_buf::RecordBuf;

/// Total leading clipping (hard and soft) of a CIGAR.
#[must_use]
pub fn leading_clipping(ops: &[Op]) -> usize {
    ops.iter()
        .take_while(|op| matches!(op.kind(), Kind::SoftClip | Kind::HardClip))
        .map(|op| op.len())
        .sum()
}

/// Total trailing clipping (hard and soft) of a CIGAR.
#[must_use]
pub fn trailing_clipping(ops: &[Op]) -> usize {
    ops.iter()
        .rev()
        .take_while(|op| matches!(op.kind(), Kind::SoftClip | Kind::HardClip))
        .map(|op| op.len())
        .sum()
}

/// Number of reference bases spanned by a CIGAR.
#[must_use]
pub fn reference_length(ops: &[Op]) -> usize {
    ops.iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
                    | Kind::Deletion
                    | Kind::Skip
            )
        })
        .map(|op| op.len())
        .sum()
}

/// Gets the 1-based inclusive alignment end of a mapped record.
#[must_use]
pub fn alignment_end(record: &RecordBuf) -> Option<usize> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = usize::from(record.alignment_start()?);
    let ref_len = reference_length(record.cigar().as_ref());
    Some(start + ref_len.saturating_sub(1))
}

/// Gets the unclipped start position of a read (alignment start minus leading clips).
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_start(record: &RecordBuf) -> Option<usize> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = usize::from(record.alignment_start()?);
    Some(start.saturating_sub(leading_clipping(record.cigar().as_ref())))
}

/// Gets the unclipped end position of a read (alignment end plus trailing clips).
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_end(record: &RecordBuf) -> Option<usize> {
    let end = alignment_end(record)?;
    Some(end + trailing_clipping(record.cigar().as_ref()))
}

/// Gets the unclipped 5' position: the unclipped end for reverse strand reads and the
/// unclipped start otherwise.
#[must_use]
pub fn unclipped_five_prime_position(record: &RecordBuf) -> Option<usize> {
    if record.flags().is_reverse_complemented() {
        unclipped_end(record)
    } else {
        unclipped_start(record)
    }
}

/// Formats CIGAR operations as a SAM CIGAR string. An empty CIGAR is rendered as `*`.
#[must_use]
pub fn format_cigar(ops: &[Op]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    ops.iter()
        .map(|op| {
            let c = match op.kind() {
                Kind::Match => 'M',
                Kind::Insertion => 'I',
                Kind::Deletion => 'D',
                Kind::Skip => 'N',
                Kind::SoftClip => 'S',
                Kind::HardClip => 'H',
                Kind::Pad => 'P',
                Kind::SequenceMatch => '=',
                Kind::SequenceMismatch => 'X',
            };
            format!("{}{c}", op.len())
        })
        .collect()
}

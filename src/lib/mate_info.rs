//! Mate information fixup for clipped read pairs.
//!
//! Clipping moves alignment starts and can unmap reads entirely, which invalidates the
//! mate fields (RNEXT, PNEXT, mate strand and mate unmapped flags, TLEN) and the `MQ`,
//! `MC` and `ms` tags carried by the other reads of the template. The functions here
//! follow htsjdk's `SamPairUtil.setMateInfo` and `setMateInformationOnSupplementalAlignment`.

use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;

use crate::sam::record_utils::{alignment_end, format_cigar};
use crate::sam::to_smallest_signed_int;

const MATE_MAPQ_TAG: Tag = Tag::new(b'M', b'Q');
const MATE_CIGAR_TAG: Tag = Tag::new(b'M', b'C');
const MATE_SCORE_TAG: Tag = Tag::new(b'm', b's');
const ALIGNMENT_SCORE_TAG: Tag = Tag::new(b'A', b'S');

/// Reconciles the mate information of a primary read pair.
///
/// - Both mapped: each read points at the other, with `MQ` and `MC` from the mate and
///   TLEN computed from the 5' aligned positions.
/// - Both unmapped: reference and position fields are cleared, `MQ`/`MC` removed and TLEN 0.
/// - One unmapped: the unmapped read is placed at the mapped read's position, only the
///   unmapped read carries `MQ`/`MC` and TLEN is 0.
///
/// In all cases `ms` is set from the mate's `AS` when present.
pub fn reconcile(rec1: &mut RecordBuf, rec2: &mut RecordBuf) {
    let rec1_unmapped = rec1.flags().is_unmapped();
    let rec2_unmapped = rec2.flags().is_unmapped();
    let rec1_score = alignment_score(rec1);
    let rec2_score = alignment_score(rec2);

    match (rec1_unmapped, rec2_unmapped) {
        (false, false) => reconcile_both_mapped(rec1, rec2),
        (true, true) => reconcile_both_unmapped(rec1, rec2),
        (true, false) => reconcile_one_unmapped(rec2, rec1),
        (false, true) => reconcile_one_unmapped(rec1, rec2),
    }

    if let Some(score) = rec2_score {
        rec1.data_mut().insert(MATE_SCORE_TAG, to_smallest_signed_int(score));
    }
    if let Some(score) = rec1_score {
        rec2.data_mut().insert(MATE_SCORE_TAG, to_smallest_signed_int(score));
    }
}

/// Points a supplementary alignment at the primary alignment of the opposite mate.
///
/// TLEN is the negation of the mate's TLEN. `MQ`, `MC` and `ms` come from the mate.
pub fn reconcile_supplementary(supplementary: &mut RecordBuf, mate: &RecordBuf) {
    let mate_unmapped = mate.flags().is_unmapped();

    *supplementary.mate_reference_sequence_id_mut() = mate.reference_sequence_id();
    *supplementary.mate_alignment_start_mut() = mate.alignment_start();
    set_mate_flags(supplementary, mate.flags().is_reverse_complemented(), mate_unmapped);
    *supplementary.template_length_mut() = -mate.template_length();

    supplementary.data_mut().insert(MATE_MAPQ_TAG, mapping_quality_value(mate));
    if mate_unmapped || mate.cigar().as_ref().is_empty() {
        supplementary.data_mut().remove(&MATE_CIGAR_TAG);
    } else {
        supplementary.data_mut().insert(MATE_CIGAR_TAG, mate_cigar_value(mate));
    }

    if let Some(score) = alignment_score(mate) {
        supplementary.data_mut().insert(MATE_SCORE_TAG, to_smallest_signed_int(score));
    }
}

/// Computes the insert size (TLEN) of `first` relative to `second`.
///
/// The 5' position of each read is its alignment end on the reverse strand and its
/// alignment start otherwise. Returns 0 when either read is unmapped or the reads are on
/// different references.
#[must_use]
pub fn compute_insert_size(first: &RecordBuf, second: &RecordBuf) -> i32 {
    if first.flags().is_unmapped() || second.flags().is_unmapped() {
        return 0;
    }
    if first.reference_sequence_id() != second.reference_sequence_id() {
        return 0;
    }

    let (Some(first_5prime), Some(second_5prime)) = (five_prime(first), five_prime(second))
    else {
        return 0;
    };

    let adjustment = if second_5prime >= first_5prime { 1 } else { -1 };
    second_5prime - first_5prime + adjustment
}

fn five_prime(record: &RecordBuf) -> Option<i32> {
    let position = if record.flags().is_reverse_complemented() {
        alignment_end(record)?
    } else {
        usize::from(record.alignment_start()?)
    };
    i32::try_from(position).ok()
}

fn reconcile_both_mapped(rec1: &mut RecordBuf, rec2: &mut RecordBuf) {
    *rec1.mate_reference_sequence_id_mut() = rec2.reference_sequence_id();
    *rec1.mate_alignment_start_mut() = rec2.alignment_start();
    set_mate_flags(rec1, rec2.flags().is_reverse_complemented(), false);
    rec1.data_mut().insert(MATE_MAPQ_TAG, mapping_quality_value(rec2));
    rec1.data_mut().insert(MATE_CIGAR_TAG, mate_cigar_value(rec2));

    *rec2.mate_reference_sequence_id_mut() = rec1.reference_sequence_id();
    *rec2.mate_alignment_start_mut() = rec1.alignment_start();
    set_mate_flags(rec2, rec1.flags().is_reverse_complemented(), false);
    rec2.data_mut().insert(MATE_MAPQ_TAG, mapping_quality_value(rec1));
    rec2.data_mut().insert(MATE_CIGAR_TAG, mate_cigar_value(rec1));

    let insert_size = compute_insert_size(rec1, rec2);
    *rec1.template_length_mut() = insert_size;
    *rec2.template_length_mut() = -insert_size;
}

fn reconcile_both_unmapped(rec1: &mut RecordBuf, rec2: &mut RecordBuf) {
    let rec1_reverse = rec1.flags().is_reverse_complemented();
    let rec2_reverse = rec2.flags().is_reverse_complemented();

    for (record, mate_reverse) in [(&mut *rec1, rec2_reverse), (&mut *rec2, rec1_reverse)] {
        *record.reference_sequence_id_mut() = None;
        *record.alignment_start_mut() = None;
        *record.mate_reference_sequence_id_mut() = None;
        *record.mate_alignment_start_mut() = None;
        set_mate_flags(record, mate_reverse, true);
        record.data_mut().remove(&MATE_MAPQ_TAG);
        record.data_mut().remove(&MATE_CIGAR_TAG);
        *record.template_length_mut() = 0;
    }
}

fn reconcile_one_unmapped(mapped: &mut RecordBuf, unmapped: &mut RecordBuf) {
    let reference_sequence_id = mapped.reference_sequence_id();
    let alignment_start = mapped.alignment_start();

    *unmapped.reference_sequence_id_mut() = reference_sequence_id;
    *unmapped.alignment_start_mut() = alignment_start;

    *mapped.mate_reference_sequence_id_mut() = reference_sequence_id;
    *mapped.mate_alignment_start_mut() = alignment_start;
    set_mate_flags(mapped, unmapped.flags().is_reverse_complemented(), true);
    mapped.data_mut().remove(&MATE_MAPQ_TAG);
    mapped.data_mut().remove(&MATE_CIGAR_TAG);
    *mapped.template_length_mut() = 0;

    *unmapped.mate_reference_sequence_id_mut() = reference_sequence_id;
    *unmapped.mate_alignment_start_mut() = alignment_start;
    set_mate_flags(unmapped, mapped.flags().is_reverse_complemented(), false);
    unmapped.data_mut().insert(MATE_MAPQ_TAG, mapping_quality_value(mapped));
    unmapped.data_mut().insert(MATE_CIGAR_TAG, mate_cigar_value(mapped));
    *unmapped.template_length_mut() = 0;
}

fn set_mate_flags(record: &mut RecordBuf, mate_reverse: bool, mate_unmapped: bool) {
    let flags = record.flags_mut();
    flags.set(Flags::MATE_REVERSE_COMPLEMENTED, mate_reverse);
    flags.set(Flags::MATE_UNMAPPED, mate_unmapped);
}

/// Missing mapping quality is encoded as 255.
fn mapping_quality_value(mate: &RecordBuf) -> BufValue {
    let mapq = mate.mapping_quality().map_or(255, |m| i32::from(u8::from(m)));
    to_smallest_signed_int(mapq)
}

fn mate_cigar_value(mate: &RecordBuf) -> BufValue {
    BufValue::from(format_cigar(mate.cigar().as_ref()))
}

fn alignment_score(record: &RecordBuf) -> Option<i32> {
    match record.data().get(&ALIGNMENT_SCORE_TAG)? {
        BufValue::Int8(v) => Some(i32::from(*v)),
        BufValue::UInt8(v) => Some(i32::from(*v)),
        BufValue::Int16(v) => Some(i32::from(*v)),
        BufValue::UInt16(v) => Some(i32::from(*v)),
        BufValue::Int32(v) => Some(*v),
        BufValue::UInt32(v) => i32::try_from(*v).ok(),
        _ => None,
    }
}

//! Recomputation of the NM, MD and UQ alignment tags against a reference.
//!
//! - **NM**: edit distance to the reference (mismatches, inserted and deleted bases)
//! - **MD**: string describing mismatched and deleted reference bases
//! - **UQ**: sum of the base qualities at mismatching positions
//!
//! A read base of `N` is always a mismatch. Reference case is preserved in MD.

use anyhow::{Context, Result};
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value;

use crate::reference::ReferenceReader;

#[must_use]
pub fn nm_tag() -> Tag {
    Tag::from([b'N', b'M'])
}

#[must_use]
pub fn md_tag() -> Tag {
    Tag::from([b'M', b'D'])
}

#[must_use]
pub fn uq_tag() -> Tag {
    Tag::from([b'U', b'Q'])
}

/// NM/MD/UQ computed for one alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlignmentTags {
    nm: u32,
    md: String,
    uq: Option<u32>,
}

/// Regenerates NM, MD and UQ for a record.
///
/// Unmapped records have the tags removed and `false` is returned. UQ is only written
/// when the record carries base qualities.
///
/// # Errors
/// Returns an error if the record's contig is missing from the header or reference, or
/// if its CIGAR is inconsistent with its sequence.
pub fn regenerate_alignment_tags(
    record: &mut RecordBuf,
    header: &Header,
    reference: &ReferenceReader,
) -> Result<bool> {
    if record.flags().is_unmapped() {
        record.data_mut().remove(&nm_tag());
        record.data_mut().remove(&md_tag());
        record.data_mut().remove(&uq_tag());
        return Ok(false);
    }

    let ref_id = record.reference_sequence_id().context("Missing reference sequence ID")?;
    let (ref_name, _) = header
        .reference_sequences()
        .get_index(ref_id)
        .context("Reference sequence ID not found in header")?;
    let ref_name = std::str::from_utf8(ref_name.as_ref())?;
    let ref_start = record.alignment_start().context("Missing alignment start")?;

    // Skips (N) do not contribute to the tags, so they are left out of the fetched span
    let ref_span: usize = record
        .cigar()
        .as_ref()
        .iter()
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch | Kind::Deletion
            )
        })
        .map(|op| op.len())
        .sum();

    let tags = if ref_span == 0 {
        AlignmentTags { nm: 0, md: "0".to_string(), uq: Some(0) }
    } else {
        let ref_end = Position::new(usize::from(ref_start) + ref_span - 1)
            .context("Invalid reference end position")?;
        let ref_bases = reference.fetch(ref_name, ref_start, ref_end)?;
        compute_tags(record, &ref_bases)?
    };

    let has_quals = !record.quality_scores().as_ref().is_empty();
    record.data_mut().insert(nm_tag(), Value::from(tags.nm as i32));
    record.data_mut().insert(md_tag(), Value::from(tags.md));
    match tags.uq {
        Some(uq) if has_quals => {
            record.data_mut().insert(uq_tag(), Value::from(uq as i32));
        }
        _ => {
            record.data_mut().remove(&uq_tag());
        }
    }

    Ok(true)
}

/// Walks the CIGAR against the reference bases spanned by the alignment.
fn compute_tags(record: &RecordBuf, ref_bases: &[u8]) -> Result<AlignmentTags> {
    let seq = record.sequence().as_ref();
    let quals = record.quality_scores().as_ref();
    let has_quals = !quals.is_empty();

    let mut nm = 0u32;
    let mut uq = 0u32;
    let mut md = String::new();
    let mut matches = 0usize;
    let mut ref_offset = 0usize;
    let mut seq_pos = 0usize;

    for op in record.cigar().as_ref() {
        let len = op.len();
        match op.kind() {
            Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch => {
                let ref_slice = ref_bases
                    .get(ref_offset..ref_offset + len)
                    .context("CIGAR references beyond fetched reference span")?;
                let read_slice =
                    seq.get(seq_pos..seq_pos + len).context("Sequence index out of bounds")?;
                for (i, (&read_base, &ref_base)) in read_slice.iter().zip(ref_slice).enumerate() {
                    if read_base == b'N' || !read_base.eq_ignore_ascii_case(&ref_base) {
                        nm += 1;
                        if has_quals {
                            uq += u32::from(
                                *quals.get(seq_pos + i).context("Quality index out of bounds")?,
                            );
                        }
                        md.push_str(&matches.to_string());
                        md.push(ref_base as char);
                        matches = 0;
                    } else {
                        matches += 1;
                    }
                }
                ref_offset += len;
                seq_pos += len;
            }
            Kind::Insertion => {
                nm += len as u32;
                seq_pos += len;
            }
            Kind::Deletion => {
                let ref_slice = ref_bases
                    .get(ref_offset..ref_offset + len)
                    .context("CIGAR references beyond fetched reference span")?;
                nm += len as u32;
                md.push_str(&matches.to_string());
                md.push('^');
                md.extend(ref_slice.iter().map(|&b| b as char));
                matches = 0;
                ref_offset += len;
            }
            Kind::SoftClip => seq_pos += len,
            Kind::HardClip | Kind::Pad | Kind::Skip => {}
        }
    }
    md.push_str(&matches.to_string());

    Ok(AlignmentTags { nm, md, uq: has_quals.then_some(uq) })
}

//! Amplicon-aware primer trimming of templates.
//!
//! For each template the primary pair's insert is matched against the [`AmpliconCatalog`]
//! and every record is clipped from its 5' end by the length of the primer it starts in.
//! Templates that cannot be matched fall back to clipping the longest primer in the
//! catalog. Mapped FR pairs that still extend past each other after clipping have the
//! excess trimmed from their 3' ends, and mate information is reconciled afterwards.

use bstr::ByteSlice;
use log::debug;
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;

use crate::amplicons::{Amplicon, AmpliconCatalog};
use crate::clipper::SamRecordClipper;
use crate::mate_info::{reconcile, reconcile_supplementary};
use crate::sam::record_utils::{alignment_end, unclipped_end, unclipped_start};
use crate::template::Template;

/// The result of looking up a pair's insert in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmpliconMatch<'a> {
    /// Both outer primer boundaries are within slop of the insert.
    Matched(&'a Amplicon),
    /// No amplicon is within slop; the longest primer length is clipped instead.
    Unmatched,
}

/// How a template was trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimCategory {
    /// The primary pair's insert matched an amplicon.
    Matched,
    /// The primary pair was eligible but matched no amplicon.
    Unmatched,
    /// The primary pair was not a mapped FR pair on one contig.
    Ineligible,
    /// The template had no primary R1 and R2.
    Unpaired,
}

/// Outcome of trimming one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimOutcome {
    pub category: TrimCategory,
    /// Whether either primary read had its 3' end trimmed back to its mate.
    pub overlap_trimmed: bool,
}

/// Per-template counts accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimmingStats {
    pub matched: u64,
    pub unmatched: u64,
    pub ineligible: u64,
    pub unpaired: u64,
    pub overlap_trimmed: u64,
}

impl TrimmingStats {
    pub fn record(&mut self, outcome: TrimOutcome) {
        match outcome.category {
            TrimCategory::Matched => self.matched += 1,
            TrimCategory::Unmatched => self.unmatched += 1,
            TrimCategory::Ineligible => self.ineligible += 1,
            TrimCategory::Unpaired => self.unpaired += 1,
        }
        if outcome.overlap_trimmed {
            self.overlap_trimmed += 1;
        }
    }

    /// Total number of templates seen.
    #[must_use]
    pub fn templates(&self) -> u64 {
        self.matched + self.unmatched + self.ineligible + self.unpaired
    }
}

/// Trims primers from templates using a catalog of amplicons.
#[derive(Clone, Copy)]
pub struct PrimerTrimmer<'a> {
    catalog: &'a AmpliconCatalog,
    clipper: SamRecordClipper,
    slop: usize,
}

impl<'a> PrimerTrimmer<'a> {
    #[must_use]
    pub fn new(catalog: &'a AmpliconCatalog, clipper: SamRecordClipper, slop: usize) -> Self {
        Self { catalog, clipper, slop }
    }

    #[must_use]
    pub fn slop(&self) -> usize {
        self.slop
    }

    /// Looks up the amplicon for the insert spanned by a forward read `left` and a reverse
    /// read `right`, from the unclipped start of `left` to the unclipped end of `right`.
    #[must_use]
    pub fn match_amplicon(
        &self,
        header: &Header,
        left: &RecordBuf,
        right: &RecordBuf,
    ) -> AmpliconMatch<'a> {
        let insert = unclipped_start(left).zip(unclipped_end(right));
        let chrom = left.reference_sequence_id().and_then(|id| reference_name(header, id));

        match (chrom, insert) {
            (Some(chrom), Some((start, end))) => {
                match self.catalog.find(&chrom, start, end, self.slop) {
                    Some(amplicon) => AmpliconMatch::Matched(amplicon),
                    None => AmpliconMatch::Unmatched,
                }
            }
            _ => AmpliconMatch::Unmatched,
        }
    }

    /// Trims every record of `template` in place and reconciles mate information.
    pub fn trim(&self, header: &Header, template: &mut Template) -> TrimOutcome {
        let longest = self.catalog.longest_primer_length();

        let Some((r1, r2)) = template.primary_pair() else {
            self.clip_all(template, |_| longest);
            return TrimOutcome { category: TrimCategory::Unpaired, overlap_trimmed: false };
        };

        let records = template.records();
        let category = match fr_orientation(&records[r1], &records[r2]) {
            None => {
                self.clip_all(template, |_| longest);
                TrimCategory::Ineligible
            }
            Some(r1_is_left) => {
                let (left, right) = if r1_is_left { (r1, r2) } else { (r2, r1) };
                let left_is_first = records[left].flags().is_first_segment();
                match self.match_amplicon(header, &records[left], &records[right]) {
                    AmpliconMatch::Matched(amplicon) => {
                        let name = template.name.as_bstr();
                        debug!("Template {name} matched amplicon {}", amplicon.id);
                        self.clip_all(template, |rec| {
                            if rec.flags().is_first_segment() == left_is_first {
                                amplicon.left_primer_length()
                            } else {
                                amplicon.right_primer_length()
                            }
                        });
                        TrimCategory::Matched
                    }
                    AmpliconMatch::Unmatched => {
                        self.clip_all(template, |_| longest);
                        TrimCategory::Unmatched
                    }
                }
            }
        };

        let overlap_trimmed = category != TrimCategory::Ineligible && {
            let (a, b) = template.two_mut(r1, r2);
            self.trim_overlap(a, b)
        };

        fix_mate_info(template, r1, r2);

        TrimOutcome { category, overlap_trimmed }
    }

    fn clip_all<F>(&self, template: &mut Template, clip_length: F)
    where
        F: Fn(&RecordBuf) -> usize,
    {
        for record in template.records_mut() {
            let length = clip_length(record);
            self.clipper.clip_5_prime_end_of_read(record, length);
        }
    }

    /// Trims the 3' ends of an FR pair whose reads extend past each other. Returns true if
    /// either read was trimmed.
    fn trim_overlap(&self, r1: &mut RecordBuf, r2: &mut RecordBuf) -> bool {
        if r1.flags().is_unmapped() || r2.flags().is_unmapped() {
            return false;
        }
        let (plus, minus) = if r1.flags().is_reverse_complemented() { (r2, r1) } else { (r1, r2) };

        let (Some(plus_start), Some(plus_end), Some(minus_start), Some(minus_end)) = (
            plus.alignment_start().map(usize::from),
            alignment_end(plus),
            minus.alignment_start().map(usize::from),
            alignment_end(minus),
        ) else {
            return false;
        };

        if plus_start >= minus_end {
            return false;
        }

        let plus_trim = plus_end.saturating_sub(minus_end);
        let minus_trim = plus_start.saturating_sub(minus_start);
        if plus_trim > 0 {
            self.clipper.clip_3_prime_end_of_alignment(plus, plus_trim);
        }
        if minus_trim > 0 {
            self.clipper.clip_3_prime_end_of_alignment(minus, minus_trim);
        }
        plus_trim > 0 || minus_trim > 0
    }
}

/// For a mapped FR pair on one contig, returns whether `r1` is the forward (left) read.
/// The forward read must start strictly before the reverse read ends.
/// Returns `None` for any other pair.
fn fr_orientation(r1: &RecordBuf, r2: &RecordBuf) -> Option<bool> {
    if r1.flags().is_unmapped() || r2.flags().is_unmapped() {
        return None;
    }
    if r1.reference_sequence_id()? != r2.reference_sequence_id()? {
        return None;
    }
    let r1_reverse = r1.flags().is_reverse_complemented();
    if r1_reverse == r2.flags().is_reverse_complemented() {
        return None;
    }

    let (plus, minus) = if r1_reverse { (r2, r1) } else { (r1, r2) };
    let plus_five_prime = usize::from(plus.alignment_start()?);
    let minus_five_prime = alignment_end(minus)?;
    (plus_five_prime < minus_five_prime).then_some(!r1_reverse)
}

/// Reconciles the primary pair, then points each supplementary alignment at the primary
/// of the opposite mate.
fn fix_mate_info(template: &mut Template, r1: usize, r2: usize) {
    {
        let (a, b) = template.two_mut(r1, r2);
        reconcile(a, b);
    }

    let supplementals: Vec<usize> = template.supplementary_indices().collect();
    for index in supplementals {
        let mate = if template.records()[index].flags().is_first_segment() { r2 } else { r1 };
        let (supplementary, mate) = template.two_mut(index, mate);
        reconcile_supplementary(supplementary, mate);
    }
}

fn reference_name(header: &Header, id: usize) -> Option<String> {
    header.reference_sequences().get_index(id).map(|(name, _)| name.to_str_lossy().into_owned())
}

//! Sort key types for BAM record sorting.
//!
//! - [`CoordinateKey`]: Standard genomic coordinate (tid, pos, strand)
//! - [`QuerynameKey`]: Read name with natural numeric ordering

use anyhow::Result;
use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;
use std::cmp::Ordering;

use crate::sam::header_sort_order;

/// Sort order of a BAM file, as recorded in the `@HD SO` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Coordinate sort: tid → pos → reverse strand
    Coordinate,
    /// Queryname sort: read name with natural ordering
    Queryname,
    /// No particular order
    Unsorted,
}

impl SortOrder {
    /// Get the SAM header sort order tag value.
    #[must_use]
    pub fn header_so_tag(&self) -> &'static str {
        match self {
            Self::Coordinate => "coordinate",
            Self::Queryname => "queryname",
            Self::Unsorted => "unsorted",
        }
    }

    /// Reads the sort order from a header. Returns `None` if `SO` is missing or is a value
    /// other than `coordinate`, `queryname` or `unsorted`.
    #[must_use]
    pub fn from_header(header: &Header) -> Option<Self> {
        match header_sort_order(header)? {
            b"coordinate" => Some(Self::Coordinate),
            b"queryname" => Some(Self::Queryname),
            b"unsorted" => Some(Self::Unsorted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header_so_tag())
    }
}

/// Trait for sort keys that can be extracted from BAM records.
pub trait SortKey: Ord + Clone + Send + Sync {
    /// The order this key produces.
    const ORDER: SortOrder;

    /// Extract a sort key from a BAM record.
    fn from_record(record: &RecordBuf, header: &Header) -> Result<Self>;
}

// ============================================================================
// Coordinate Sort Key
// ============================================================================

/// Sort key for coordinate ordering.
///
/// Sort order: reference ID → position → reverse strand flag.
/// Records without a reference are sorted to the end. Unmapped records placed next to
/// their mate sort with the mate.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoordinateKey {
    /// Reference sequence ID (tid), or `i32::MAX` for records without one.
    pub tid: i32,
    /// 1-based alignment start position.
    pub pos: i64,
    /// True if reverse strand.
    pub reverse: bool,
    /// Read name for tie-breaking (lexicographic).
    pub name: Vec<u8>,
}

impl CoordinateKey {
    /// Create a coordinate key for a read with no reference.
    #[must_use]
    pub fn unmapped(name: Vec<u8>) -> Self {
        Self { tid: i32::MAX, pos: i64::MAX, reverse: false, name }
    }
}

impl Ord for CoordinateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tid
            .cmp(&other.tid)
            .then_with(|| self.pos.cmp(&other.pos))
            .then_with(|| self.reverse.cmp(&other.reverse))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for CoordinateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl SortKey for CoordinateKey {
    const ORDER: SortOrder = SortOrder::Coordinate;

    fn from_record(record: &RecordBuf, _header: &Header) -> Result<Self> {
        let name = record.name().map_or_else(Vec::new, |n| n.to_vec());

        let Some(tid) = record.reference_sequence_id() else {
            return Ok(Self::unmapped(name));
        };

        let tid = i32::try_from(tid)?;
        let pos = record.alignment_start().map_or(0, |p| usize::from(p) as i64);
        let reverse = record.flags().is_reverse_complemented();

        Ok(Self { tid, pos, reverse, name })
    }
}

// ============================================================================
// Queryname Sort Key
// ============================================================================

/// Sort key for queryname ordering.
///
/// Uses natural string ordering where numeric runs are compared numerically.
/// Example: "read1" < "read2" < "read10" < "read11"
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct QuerynameKey {
    /// Read name bytes.
    pub name: Vec<u8>,
    /// Read pair flags for ordering R1 before R2.
    pub flags: u16,
}

impl Ord for QuerynameKey {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_compare(&self.name, &other.name).then_with(|| self.flags.cmp(&other.flags))
    }
}

impl PartialOrd for QuerynameKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl SortKey for QuerynameKey {
    const ORDER: SortOrder = SortOrder::Queryname;

    fn from_record(record: &RecordBuf, _header: &Header) -> Result<Self> {
        let name = record.name().map_or_else(Vec::new, |n| n.to_vec());
        let flags = u16::from(record.flags());
        Ok(Self { name, flags })
    }
}

/// Natural string comparison that handles numeric runs.
///
/// Compares strings such that "read1" < "read2" < "read10".
fn natural_compare(a: &[u8], b: &[u8]) -> Ordering {
    let mut i = 0;
    let mut j = 0;

    while i < a.len() && j < b.len() {
        match (a[i].is_ascii_digit(), b[j].is_ascii_digit()) {
            (true, true) => {
                let (a_num, a_end) = parse_number(&a[i..]);
                let (b_num, b_end) = parse_number(&b[j..]);

                match a_num.cmp(&b_num) {
                    Ordering::Equal => {
                        i += a_end;
                        j += b_end;
                    }
                    ord => return ord,
                }
            }
            (true, false) => return Ordering::Less, // Digits before non-digits
            (false, true) => return Ordering::Greater,
            (false, false) => match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ord => return ord,
            },
        }
    }

    // Shorter string sorts first if one is prefix of other
    (a.len() - i).cmp(&(b.len() - j))
}

/// Parse a numeric run from the start of a byte slice.
/// Returns (number, bytes consumed).
fn parse_number(bytes: &[u8]) -> (u64, usize) {
    let mut num: u64 = 0;
    let mut i = 0;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        num = num.saturating_mul(10).saturating_add(u64::from(bytes[i] - b'0'));
        i += 1;
    }

    (num, i)
}

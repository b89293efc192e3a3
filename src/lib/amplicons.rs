//! Amplicon definitions and the primer catalog.
//!
//! The primer table is a tab-separated file with a header row and the required columns
//! `chrom`, `left_start`, `left_end`, `right_start` and `right_end` (1-based inclusive).
//! An optional `id` column names each amplicon; other columns are ignored.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use coitrees::{COITree, IntervalNode, IntervalTree};
use fgoxide::io::{DelimFile, Io};
use log::info;
use serde::Deserialize;

use crate::errors::{FgtrimError, Result};

/// Columns that must be present in the primer table header.
pub const REQUIRED_COLUMNS: [&str; 5] =
    ["chrom", "left_start", "left_end", "right_start", "right_end"];

/// Anything with a span on a named contig, 1-based inclusive.
pub trait GenomicSpan {
    fn contig(&self) -> &str;
    fn start(&self) -> usize;
    fn end(&self) -> usize;
}

/// A targeted region bounded by a left and a right primer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amplicon {
    pub id: String,
    pub chrom: String,
    pub left_start: usize,
    pub left_end: usize,
    pub right_start: usize,
    pub right_end: usize,
}

impl Amplicon {
    /// Creates an amplicon with an id of the form `chrom:left_start-right_end`.
    #[must_use]
    pub fn new(
        chrom: &str,
        left_start: usize,
        left_end: usize,
        right_start: usize,
        right_end: usize,
    ) -> Self {
        Self {
            id: format!("{chrom}:{left_start}-{right_end}"),
            chrom: chrom.to_string(),
            left_start,
            left_end,
            right_start,
            right_end,
        }
    }

    #[must_use]
    pub fn left_primer_length(&self) -> usize {
        self.left_end - self.left_start + 1
    }

    #[must_use]
    pub fn right_primer_length(&self) -> usize {
        self.right_end - self.right_start + 1
    }

    #[must_use]
    pub fn longest_primer_length(&self) -> usize {
        self.left_primer_length().max(self.right_primer_length())
    }
}

impl GenomicSpan for Amplicon {
    fn contig(&self) -> &str {
        &self.chrom
    }

    fn start(&self) -> usize {
        self.left_start
    }

    fn end(&self) -> usize {
        self.right_end
    }
}

/// Overlap index over items with a genomic span, one interval tree per contig.
///
/// Query results are returned in insertion order.
pub struct OverlapIndex<T: GenomicSpan> {
    items: Vec<T>,
    trees: HashMap<String, COITree<usize, u32>>,
}

impl<T: GenomicSpan> OverlapIndex<T> {
    /// Builds the index.
    ///
    /// # Errors
    ///
    /// Returns [`FgtrimError::InvalidParameter`] if a coordinate does not fit the index.
    pub fn new(items: Vec<T>) -> Result<Self> {
        let mut nodes: HashMap<String, Vec<IntervalNode<usize, u32>>> = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            let node = IntervalNode::new(to_coord(item.start())?, to_coord(item.end())?, i);
            nodes.entry(item.contig().to_string()).or_default().push(node);
        }
        let trees =
            nodes.into_iter().map(|(contig, nodes)| (contig, COITree::new(&nodes))).collect();
        Ok(Self { items, trees })
    }

    /// Returns every item overlapping `[start, end]` on `contig`.
    #[must_use]
    pub fn query(&self, contig: &str, start: usize, end: usize) -> Vec<&T> {
        let Some(tree) = self.trees.get(contig) else {
            return Vec::new();
        };
        let start = i32::try_from(start).unwrap_or(i32::MAX);
        let end = i32::try_from(end).unwrap_or(i32::MAX);

        let mut hits: Vec<usize> = Vec::new();
        tree.query(start, end, |node| {
            let idx: usize = node.metadata.clone();
            hits.push(idx);
        });
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.items[i]).collect()
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

fn to_coord(pos: usize) -> Result<i32> {
    i32::try_from(pos).map_err(|_| FgtrimError::InvalidParameter {
        parameter: "position".to_string(),
        reason: format!("{pos} exceeds the maximum supported coordinate"),
    })
}

/// The required columns of one primer table row.
#[derive(Debug, Deserialize)]
struct PrimerRow {
    chrom: String,
    left_start: i64,
    left_end: i64,
    right_start: i64,
    right_end: i64,
}

/// A primer table row from a table that also has an `id` column.
#[derive(Debug, Deserialize)]
struct NamedPrimerRow {
    id: Option<String>,
    chrom: String,
    left_start: i64,
    left_end: i64,
    right_start: i64,
    right_end: i64,
}

impl NamedPrimerRow {
    fn split(self) -> (PrimerRow, Option<String>) {
        let row = PrimerRow {
            chrom: self.chrom,
            left_start: self.left_start,
            left_end: self.left_end,
            right_start: self.right_start,
            right_end: self.right_end,
        };
        (row, self.id)
    }
}

impl PrimerRow {
    /// Validates the row; `line` is the 1-based line number in the file.
    fn into_amplicon(self, id: Option<String>, line: usize) -> Result<Amplicon> {
        let invalid = |reason: String| FgtrimError::InvalidAmplicon { line, reason };

        if self.left_start < 1 {
            return Err(invalid(format!("left_start must be >= 1, found {}", self.left_start)));
        }
        if self.left_start > self.left_end {
            return Err(invalid(format!(
                "left_start ({}) is greater than left_end ({})",
                self.left_start, self.left_end
            )));
        }
        if self.right_start > self.right_end {
            return Err(invalid(format!(
                "right_start ({}) is greater than right_end ({})",
                self.right_start, self.right_end
            )));
        }
        if self.right_start < 1 {
            return Err(invalid(format!("right_start must be >= 1, found {}", self.right_start)));
        }

        let to_pos =
            |v: i64| usize::try_from(v).map_err(|_| invalid(format!("invalid position {v}")));
        let mut amplicon = Amplicon::new(
            &self.chrom,
            to_pos(self.left_start)?,
            to_pos(self.left_end)?,
            to_pos(self.right_start)?,
            to_pos(self.right_end)?,
        );
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            amplicon.id = id;
        }
        Ok(amplicon)
    }
}

/// The set of amplicons to trim against, indexed for overlap queries.
pub struct AmpliconCatalog {
    index: OverlapIndex<Amplicon>,
    longest_primer_length: usize,
}

impl AmpliconCatalog {
    /// Builds a catalog from amplicons. Query results follow the order given here.
    ///
    /// # Errors
    ///
    /// Returns an error if an amplicon coordinate does not fit the overlap index.
    pub fn new(amplicons: Vec<Amplicon>) -> Result<Self> {
        let longest_primer_length =
            amplicons.iter().map(Amplicon::longest_primer_length).max().unwrap_or(0);
        Ok(Self { index: OverlapIndex::new(amplicons)?, longest_primer_length })
    }

    /// Loads the primer table at `path`.
    ///
    /// # Errors
    ///
    /// - [`FgtrimError::MissingColumn`] if a required column is absent from the header
    /// - [`FgtrimError::EmptyPrimerTable`] if there are no data rows
    /// - [`FgtrimError::InvalidAmplicon`] if a row fails validation
    /// - [`FgtrimError::InvalidFileFormat`] if the file cannot be read or parsed
    pub fn from_path(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let format_error = |reason: String| FgtrimError::InvalidFileFormat {
            file_type: "primer table".to_string(),
            path: display.clone(),
            reason,
        };

        let mut header = String::new();
        Io::default()
            .new_reader(path)
            .map_err(|e| format_error(e.to_string()))?
            .read_line(&mut header)
            .map_err(|e| format_error(e.to_string()))?;
        let columns: Vec<&str> = header.trim_end_matches(['\r', '\n']).split('\t').collect();
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !columns.contains(c)) {
            return Err(FgtrimError::MissingColumn {
                path: display.clone(),
                column: (*missing).to_string(),
            });
        }

        let rows: Vec<(PrimerRow, Option<String>)> = if columns.contains(&"id") {
            DelimFile::default()
                .read_tsv::<NamedPrimerRow, _>(&path)
                .map(|rows| rows.into_iter().map(NamedPrimerRow::split).collect())
        } else {
            DelimFile::default()
                .read_tsv::<PrimerRow, _>(&path)
                .map(|rows| rows.into_iter().map(|row| (row, None)).collect())
        }
        .map_err(|e| format_error(e.to_string()))?;
        if rows.is_empty() {
            return Err(FgtrimError::EmptyPrimerTable { path: display.clone() });
        }

        let amplicons = rows
            .into_iter()
            .enumerate()
            .map(|(i, (row, id))| row.into_amplicon(id, i + 2))
            .collect::<Result<Vec<_>>>()?;

        let catalog = Self::new(amplicons)?;
        info!(
            "Loaded {} amplicons from {display}; longest primer is {}bp",
            catalog.len(),
            catalog.longest_primer_length()
        );
        Ok(catalog)
    }

    /// Returns every amplicon whose span `[left_start, right_end]` overlaps `[start, end]`.
    #[must_use]
    pub fn query(&self, chrom: &str, start: usize, end: usize) -> Vec<&Amplicon> {
        self.index.query(chrom, start, end)
    }

    /// Finds the amplicon whose outer primer boundaries are each within `slop` of the
    /// insert `[start, end]`.
    ///
    /// When several qualify, the one with the smallest summed deviation wins, and among
    /// equal deviations the one listed first.
    #[must_use]
    pub fn find(&self, chrom: &str, start: usize, end: usize, slop: usize) -> Option<&Amplicon> {
        self.query(chrom, start, end)
            .into_iter()
            .filter_map(|amplicon| {
                let left = amplicon.left_start.abs_diff(start);
                let right = amplicon.right_end.abs_diff(end);
                (left <= slop && right <= slop).then_some((left + right, amplicon))
            })
            .min_by_key(|(deviation, _)| *deviation)
            .map(|(_, amplicon)| amplicon)
    }

    /// The longest left or right primer across the catalog.
    #[must_use]
    pub fn longest_primer_length(&self) -> usize {
        self.longest_primer_length
    }

    #[must_use]
    pub fn amplicons(&self) -> &[Amplicon] {
        self.index.items()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.items().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_table(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn catalog() -> AmpliconCatalog {
        AmpliconCatalog::new(vec![
            Amplicon::new("chr1", 1_010_873, 1_010_894, 1_011_118, 1_011_137),
            Amplicon::new("chr1", 1_020_000, 1_020_019, 1_020_200, 1_020_224),
            Amplicon::new("chr2", 500, 517, 700, 719),
        ])
        .unwrap()
    }

    #[test]
    fn test_primer_lengths() {
        let amplicon = Amplicon::new("chr1", 1_010_873, 1_010_894, 1_011_118, 1_011_137);
        assert_eq!(amplicon.left_primer_length(), 22);
        assert_eq!(amplicon.right_primer_length(), 20);
        assert_eq!(amplicon.longest_primer_length(), 22);
        assert_eq!(amplicon.id, "chr1:1010873-1011137");
    }

    #[test]
    fn test_longest_primer_length_is_catalog_wide() {
        assert_eq!(catalog().longest_primer_length(), 25);
    }

    #[rstest]
    #[case::inside("chr1", 1_010_900, 1_010_950, 1)]
    #[case::touching_start("chr1", 1_010_800, 1_010_873, 1)]
    #[case::spanning_two("chr1", 1_011_000, 1_020_010, 2)]
    #[case::gap("chr1", 1_011_138, 1_019_999, 0)]
    #[case::other_contig("chr2", 1, 10_000, 1)]
    #[case::unknown_contig("chr3", 1, 10_000_000, 0)]
    fn test_query(
        #[case] chrom: &str,
        #[case] start: usize,
        #[case] end: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(catalog().query(chrom, start, end).len(), expected);
    }

    #[rstest]
    #[case::within_slop(1_010_875, 1_011_135, true)]
    #[case::exactly_at_slop(1_010_868, 1_011_135, true)]
    #[case::exactly_at_slop_right(1_010_873, 1_011_142, true)]
    #[case::one_past_slop_left(1_010_867, 1_011_137, false)]
    #[case::one_past_slop_right(1_010_873, 1_011_143, false)]
    #[case::far_left(1_010_860, 1_011_135, false)]
    fn test_find_with_slop(#[case] start: usize, #[case] end: usize, #[case] found: bool) {
        let catalog = catalog();
        let hit = catalog.find("chr1", start, end, 5);
        assert_eq!(hit.is_some(), found);
        if let Some(amplicon) = hit {
            assert_eq!(amplicon.left_start, 1_010_873);
        }
    }

    #[test]
    fn test_find_prefers_smallest_deviation() {
        let catalog = AmpliconCatalog::new(vec![
            Amplicon::new("chr1", 100, 119, 400, 419),
            Amplicon::new("chr1", 103, 120, 402, 420),
        ])
        .unwrap();
        let hit = catalog.find("chr1", 103, 421, 5).unwrap();
        assert_eq!(hit.left_start, 103);
    }

    #[test]
    fn test_find_breaks_equal_deviation_by_table_order() {
        let catalog = AmpliconCatalog::new(vec![
            Amplicon::new("chr1", 102, 119, 400, 420),
            Amplicon::new("chr1", 98, 115, 400, 420),
        ])
        .unwrap();
        let hit = catalog.find("chr1", 100, 420, 5).unwrap();
        assert_eq!(hit.left_start, 102);
    }

    #[test]
    fn test_from_path() {
        let file = write_table(
            "chrom\tleft_start\tleft_end\tright_start\tright_end\tid\tpool\n\
             chr1\t1010873\t1010894\t1011118\t1011137\tamp1\tA\n\
             chr1\t1020000\t1020019\t1020200\t1020224\t\tB\n",
        );
        let catalog = AmpliconCatalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.amplicons()[0].id, "amp1");
        assert_eq!(catalog.amplicons()[1].id, "chr1:1020000-1020224");
        assert_eq!(catalog.longest_primer_length(), 25);
    }

    #[test]
    fn test_from_path_required_columns_only() {
        let file = write_table(
            "chrom\tleft_start\tleft_end\tright_start\tright_end\n\
             chr1\t1010873\t1010894\t1011118\t1011137\n\
             chr2\t500\t517\t700\t719\n",
        );
        let catalog = AmpliconCatalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.amplicons()[0].id, "chr1:1010873-1011137");
        assert_eq!(catalog.amplicons()[1].chrom, "chr2");
        assert_eq!(catalog.longest_primer_length(), 22);
    }

    #[test]
    fn test_from_path_without_id_column() {
        let file = write_table(
            "right_end\tright_start\tleft_end\tleft_start\tchrom\n1137\t1118\t894\t873\tchr7\n",
        );
        let catalog = AmpliconCatalog::from_path(file.path()).unwrap();
        let amplicon = &catalog.amplicons()[0];
        assert_eq!(amplicon.chrom, "chr7");
        assert_eq!(amplicon.left_primer_length(), 22);
    }

    #[rstest]
    #[case("left_start\tleft_end\tright_start\tright_end\n", "chrom")]
    #[case("chrom\tleft_start\tleft_end\tright_start\n", "right_end")]
    #[case("chrom\tstart\tleft_end\tright_start\tright_end\n", "left_start")]
    fn test_missing_column(#[case] contents: &str, #[case] column: &str) {
        let file = write_table(contents);
        let result = AmpliconCatalog::from_path(file.path());
        assert!(matches!(
            result,
            Err(FgtrimError::MissingColumn { column: ref c, .. }) if c == column
        ));
    }

    #[test]
    fn test_empty_table() {
        let file = write_table("chrom\tleft_start\tleft_end\tright_start\tright_end\n");
        let result = AmpliconCatalog::from_path(file.path());
        assert!(matches!(result, Err(FgtrimError::EmptyPrimerTable { .. })));
    }

    #[rstest]
    #[case::left_reversed("chr1\t120\t100\t400\t419\n")]
    #[case::right_reversed("chr1\t100\t119\t420\t400\n")]
    #[case::zero_start("chr1\t0\t19\t400\t419\n")]
    fn test_invalid_amplicon(#[case] row: &str) {
        let contents = format!(
            "chrom\tleft_start\tleft_end\tright_start\tright_end\nchr1\t1\t20\t300\t320\n{row}"
        );
        let file = write_table(&contents);
        let result = AmpliconCatalog::from_path(file.path());
        assert!(matches!(result, Err(FgtrimError::InvalidAmplicon { line: 3, .. })));
    }

    #[test]
    fn test_non_numeric_coordinate() {
        let file = write_table(
            "chrom\tleft_start\tleft_end\tright_start\tright_end\nchr1\tone\t20\t300\t320\n",
        );
        let result = AmpliconCatalog::from_path(file.path());
        assert!(matches!(result, Err(FgtrimError::InvalidFileFormat { .. })));
    }
}

//! End-to-end CLI tests for the trim-primers command.
//!
//! These tests run the actual `fgtrim trim-primers` binary and validate:
//! 1. Clipping of matched and unmatched pairs
//! 2. Hard clipping
//! 3. NM/MD/UQ recalculation against a reference
//! 4. Output sort orders and sorting of unordered input
//! 5. Errors for malformed primer tables and missing files

use fgtrim_lib::sam::builder::SamBuilder;
use noodles::sam::alignment::record::Flags;
use std::path::Path;
use tempfile::TempDir;

use crate::helpers::{
    builder_with_sort_order, cigar, find, int_tag, read_bam, reference_bases, run_trim_primers,
    sort_order, start, string_tag, write_primers, write_reference,
};

const AMPLICONS: &[(&str, usize, usize, usize, usize)] =
    &[("chr1", 101, 120, 281, 300), ("chr1", 2001, 2025, 2281, 2300)];

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn write_input(dir: &Path, builder: &SamBuilder) -> std::path::PathBuf {
    let path = dir.join("input.bam");
    builder.write_bam(&path).unwrap();
    path
}

#[test]
fn test_matched_pair_is_soft_clipped_and_mates_updated() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("queryname");
    let _ = builder.add_pair().name("q1").start1(101).start2(201).build();
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (header, records) = read_bam(&output);
    assert_eq!(records.len(), 2);
    assert_eq!(sort_order(&header).as_deref(), Some("queryname"));
    assert!(header.programs().as_ref().keys().any(|id| id == "fgtrim"));

    let r1 = find(&records, "q1", true);
    let r2 = find(&records, "q1", false);
    assert_eq!(cigar(r1), "20S80M");
    assert_eq!(start(r1), Some(121));
    assert_eq!(cigar(r2), "80M20S");
    assert_eq!(start(r2), Some(201));

    assert_eq!(r1.mate_alignment_start().map(usize::from), Some(201));
    assert_eq!(r2.mate_alignment_start().map(usize::from), Some(121));
    assert_eq!(r1.template_length(), 160);
    assert_eq!(r2.template_length(), -160);
    assert_eq!(string_tag(r1, *b"MC").as_deref(), Some("80M20S"));
    assert_eq!(string_tag(r2, *b"MC").as_deref(), Some("20S80M"));
}

#[test]
fn test_hard_clip_removes_primer_bases() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("queryname");
    let _ = builder.add_pair().name("q1").start1(101).start2(201).build();
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
        "--hard-clip",
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (_, records) = read_bam(&output);
    let r1 = find(&records, "q1", true);
    let r2 = find(&records, "q1", false);
    assert_eq!(cigar(r1), "20H80M");
    assert_eq!(cigar(r2), "80M20H");
    assert_eq!(r1.sequence().len(), 80);
    assert_eq!(r2.quality_scores().as_ref().len(), 80);
}

#[test]
fn test_unmatched_pair_is_clipped_by_longest_primer() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("queryname");
    let _ = builder.add_pair().name("q1").start1(1001).start2(1101).build();
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (_, records) = read_bam(&output);
    let r1 = find(&records, "q1", true);
    let r2 = find(&records, "q1", false);
    assert_eq!(cigar(r1), "25S75M");
    assert_eq!(start(r1), Some(1026));
    assert_eq!(cigar(r2), "75M25S");
}

#[test]
fn test_secondary_alignments_clipped_with_their_read() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("queryname");
    let (r1, _) = builder.add_pair().name("q1").start1(101).start2(201).build();
    // R1's secondary alignment takes the left primer length of R1's amplicon
    let mut secondary = r1.clone();
    *secondary.flags_mut() |= Flags::SECONDARY;
    *secondary.alignment_start_mut() = noodles::core::Position::new(5001);
    builder.push_record(secondary);
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (_, records) = read_bam(&output);
    assert_eq!(records.len(), 3);
    let secondary = records.iter().find(|r| r.flags().is_secondary()).unwrap();
    assert_eq!(cigar(secondary), "20S80M");
    assert_eq!(start(secondary), Some(5021));
}

#[test]
fn test_reference_recalculates_alignment_tags() {
    let dir = TempDir::new().unwrap();
    let bases = reference_bases(10_000);
    let reference = write_reference(dir.path(), "chr1", &bases);

    // A mismatch inside the left primer is clipped away
    let mut read1: Vec<u8> = bases.as_bytes()[100..200].to_vec();
    read1[5] = if read1[5] == b'A' { b'C' } else { b'A' };
    let read1 = String::from_utf8(read1).unwrap();
    let read2 = bases[200..300].to_string();

    let mut builder = builder_with_sort_order("queryname");
    let _ = builder
        .add_pair()
        .name("q1")
        .start1(101)
        .start2(201)
        .bases1(&read1)
        .bases2(&read2)
        .attr("NM", 1)
        .build();
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
        "-r",
        path_str(&reference),
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (header, records) = read_bam(&output);
    assert_eq!(sort_order(&header).as_deref(), Some("queryname"));
    for record in &records {
        assert_eq!(int_tag(record, *b"NM"), Some(0));
        assert_eq!(string_tag(record, *b"MD").as_deref(), Some("80"));
        assert_eq!(int_tag(record, *b"UQ"), Some(0));
    }
}

#[test]
fn test_coordinate_sort_order_output() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("queryname");
    let _ = builder.add_pair().name("a").start1(2001).start2(2201).build();
    let _ = builder.add_pair().name("b").start1(101).start2(201).build();
    let _ = builder.add_pair().name("c").start1(1001).start2(1101).build();
    let input = write_input(dir.path(), &builder);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
        "--sort-order",
        "coordinate",
        "--threads",
        "2",
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (header, records) = read_bam(&output);
    assert_eq!(sort_order(&header).as_deref(), Some("coordinate"));
    let starts: Vec<usize> = records.iter().filter_map(start).collect();
    assert_eq!(starts.len(), 6);
    assert!(starts.windows(2).all(|w| w[0] <= w[1]), "not coordinate sorted: {starts:?}");
}

#[test]
fn test_unsorted_input_is_grouped_by_name() {
    let dir = TempDir::new().unwrap();
    let mut builder = builder_with_sort_order("unsorted");
    let pairs: Vec<_> = ["q10", "q2", "q1"]
        .into_iter()
        .map(|name| builder.add_pair().name(name).start1(101).start2(201).build())
        .collect();

    // Separate each read from its mate
    let mut shuffled = SamBuilder::with_header(builder.header.clone());
    for (r1, _) in &pairs {
        shuffled.push_record(r1.clone());
    }
    for (_, r2) in pairs.iter().rev() {
        shuffled.push_record(r2.clone());
    }
    let input = write_input(dir.path(), &shuffled);
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
        "--sort-order",
        "queryname",
        "--max-memory",
        "1K",
    ]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let (header, records) = read_bam(&output);
    assert_eq!(sort_order(&header).as_deref(), Some("queryname"));
    let names: Vec<String> = records.iter().map(|r| r.name().unwrap().to_string()).collect();
    assert_eq!(names, vec!["q1", "q1", "q2", "q2", "q10", "q10"]);
    for name in ["q1", "q2", "q10"] {
        assert_eq!(cigar(find(&records, name, true)), "20S80M");
        assert_eq!(cigar(find(&records, name, false)), "80M20S");
    }
}

#[test]
fn test_missing_primer_column_fails() {
    let dir = TempDir::new().unwrap();
    let builder = builder_with_sort_order("queryname");
    let input = write_input(dir.path(), &builder);
    let primers = dir.path().join("primers.tsv");
    std::fs::write(&primers, "chrom\tleft_start\tleft_end\tright_start\nchr1\t1\t20\t80\n")
        .unwrap();
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
    ]);
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("right_end"), "unexpected error: {stderr}");
}

#[test]
fn test_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let primers = write_primers(dir.path(), AMPLICONS);
    let output = dir.path().join("output.bam");

    let result = run_trim_primers(&[
        "-i",
        path_str(&dir.path().join("missing.bam")),
        "-o",
        path_str(&output),
        "-p",
        path_str(&primers),
    ]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("missing.bam"));
    assert!(!output.exists());
}

//! Helper utilities for integration tests.

#![allow(dead_code)]

use bstr::BString;
use fgtrim_lib::sam::builder::SamBuilder;
use fgtrim_lib::sam::format_cigar;
use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Header row of a primer table with the required columns.
pub const PRIMER_HEADER: &str = "chrom\tleft_start\tleft_end\tright_start\tright_end";

/// Writes a primer table with the required columns and the given rows.
pub fn write_primers(dir: &Path, rows: &[(&str, usize, usize, usize, usize)]) -> PathBuf {
    let mut contents = format!("{PRIMER_HEADER}\n");
    for (chrom, ls, le, rs, re) in rows {
        contents.push_str(&format!("{chrom}\t{ls}\t{le}\t{rs}\t{re}\n"));
    }
    let path = dir.join("primers.tsv");
    fs::write(&path, contents).expect("Failed to write primer table");
    path
}

/// Writes a single-contig FASTA file.
pub fn write_reference(dir: &Path, name: &str, bases: &str) -> PathBuf {
    let path = dir.join("ref.fa");
    let mut contents = format!(">{name}\n");
    for line in bases.as_bytes().chunks(60) {
        contents.push_str(std::str::from_utf8(line).expect("ASCII bases"));
        contents.push('\n');
    }
    fs::write(&path, contents).expect("Failed to write reference");
    path
}

/// A deterministic, non-repetitive reference sequence.
pub fn reference_bases(length: usize) -> String {
    (0..length).map(|i| ['A', 'C', 'G', 'T'][(i * i + i / 3) % 4]).collect()
}

/// A builder over `chr1` of length 10,000 whose header declares `@HD SO:{sort_order}`.
pub fn builder_with_sort_order(sort_order: &str) -> SamBuilder {
    let hd = Map::<noodles::sam::header::record::value::map::Header>::builder()
        .insert(header_tag::SORT_ORDER, BString::from(sort_order))
        .build()
        .expect("valid @HD");
    let mut header = SamBuilder::with_single_ref("chr1", 10_000).header;
    *header.header_mut() = Some(hd);
    SamBuilder::with_header(header)
}

/// Runs `fgtrim trim-primers` with the given arguments.
pub fn run_trim_primers(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fgtrim"))
        .arg("trim-primers")
        .args(args)
        .output()
        .expect("Failed to run fgtrim")
}

/// Reads every record of a BAM file.
pub fn read_bam(path: &Path) -> (Header, Vec<RecordBuf>) {
    let mut reader = bam::io::Reader::new(fs::File::open(path).expect("Failed to open BAM"));
    let header = reader.read_header().expect("Failed to read header");
    let records =
        reader.record_bufs(&header).map(|r| r.expect("Failed to read record")).collect();
    (header, records)
}

pub fn cigar(record: &RecordBuf) -> String {
    format_cigar(record.cigar().as_ref())
}

pub fn start(record: &RecordBuf) -> Option<usize> {
    record.alignment_start().map(usize::from)
}

pub fn int_tag(record: &RecordBuf, tag: [u8; 2]) -> Option<i64> {
    record.data().get(&Tag::from(tag)).and_then(Value::as_int)
}

pub fn string_tag(record: &RecordBuf, tag: [u8; 2]) -> Option<String> {
    match record.data().get(&Tag::from(tag)) {
        Some(Value::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

/// The `@HD SO` value of a header.
pub fn sort_order(header: &Header) -> Option<String> {
    header
        .header()
        .and_then(|hd| hd.other_fields().get(&header_tag::SORT_ORDER))
        .map(ToString::to_string)
}

/// Finds the record for read one or read two of the named template.
pub fn find<'a>(records: &'a [RecordBuf], name: &str, first: bool) -> &'a RecordBuf {
    records
        .iter()
        .find(|r| {
            r.name().is_some_and(|n| n == name.as_bytes())
                && r.flags().is_first_segment() == first
                && !r.flags().is_secondary()
                && !r.flags().is_supplementary()
        })
        .expect("record not found")
}

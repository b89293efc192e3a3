//! `TrimPrimers` command implementation.
//!
//! Trims PCR primer sequence from the 5' ends of aligned read pairs, using a table of
//! amplicon primer coordinates to decide how much to clip from each read.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fgtrim_lib::alignment_tags::regenerate_alignment_tags;
use fgtrim_lib::amplicons::AmpliconCatalog;
use fgtrim_lib::bam_io::{BamWriter, create_bam_reader, create_bam_writer, finish_bam_writer};
use fgtrim_lib::clipper::{ClippingMode, SamRecordClipper};
use fgtrim_lib::header::{add_pg_record, set_sort_order};
use fgtrim_lib::logging::{OperationTimer, format_count, log_trimming_summary};
use fgtrim_lib::primer_trimming::{PrimerTrimmer, TrimmingStats};
use fgtrim_lib::progress::ProgressTracker;
use fgtrim_lib::reference::ReferenceReader;
use fgtrim_lib::sam::is_query_grouped;
use fgtrim_lib::sort::{
    CoordinateKey, QuerynameKey, SortKey, SortOrder, SortedRecords, SortingBuffer,
};
use fgtrim_lib::template::TemplateIterator;
use fgtrim_lib::validation::validate_file_exists;
use log::info;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;
use std::path::PathBuf;

use super::command::Command;
use super::common::{BamIoOptions, CompressionOptions, parse_memory};

/// Output sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortOrderArg {
    /// Coordinate sort (tid → pos → strand)
    Coordinate,
    /// Queryname sort (read name with natural ordering)
    Queryname,
    /// No particular order
    Unsorted,
}

impl From<SortOrderArg> for SortOrder {
    fn from(arg: SortOrderArg) -> Self {
        match arg {
            SortOrderArg::Coordinate => SortOrder::Coordinate,
            SortOrderArg::Queryname => SortOrder::Queryname,
            SortOrderArg::Unsorted => SortOrder::Unsorted,
        }
    }
}

/// Trims primers from amplicon sequencing reads
#[derive(Parser, Debug)]
#[command(
    name = "trim-primers",
    about = "\x1b[38;5;173m[POST-ALIGNMENT]\x1b[0m \x1b[36mTrim primer sequence from amplicon reads\x1b[0m",
    long_about = r#"
Trims primers from reads post-alignment.

Takes in a BAM file of aligned reads and a tab-delimited file with five columns (`chrom`,
`left_start`, `left_end`, `right_start`, and `right_end`) which provide the 1-based inclusive
start and end positions of the primers for each amplicon. An optional `id` column names each
amplicon. The primer file must include headers.

Paired end reads that map to a given amplicon position are trimmed so that the alignment no
longer includes the primer sequences. Reads are matched to an amplicon when the unclipped
start of the leftmost read and the unclipped end of the rightmost read are within --slop bases
of the amplicon's outer primer boundaries. Reads that cannot be matched, and pairs that are not
in FR orientation on the same contig, are clipped by the length of the longest primer in the
file. Unpaired reads and pairs without both primary alignments are clipped the same way.

Where the reads of a pair overlap past the primers, the 3' end of each read is trimmed so that
neither read extends past its mate's 5' end.

Secondary and supplementary alignments are trimmed by the same primer length as the primary
read of the same end, and mate information is updated for the primary and supplementary records.

The input BAM must be queryname sorted or query grouped to be processed without an extra sort.
Otherwise the reads are sorted by queryname in memory, spilling to --tmp-dir beyond --max-memory.

The output sort order may be specified with --sort-order. If not given, then the output will be
in the same order as input.

When --ref is given, the NM, UQ, and MD tags are recalculated for all mapped reads, which
requires the reads to be coordinate sorted internally. Without --ref, existing NM, UQ, and MD
tags are removed from clipped reads.
"#
)]
pub struct TrimPrimers {
    /// Input/output BAM options
    #[command(flatten)]
    pub io: BamIoOptions,

    /// File with primer locations (TSV with chrom, left_start, left_end, right_start, right_end)
    #[arg(short = 'p', long = "primers")]
    pub primers: PathBuf,

    /// Hard clip primers instead of soft clipping them
    #[arg(short = 'H', long = "hard-clip", default_value = "false")]
    pub hard_clip: bool,

    /// Match to primer locations +/- this many bases
    #[arg(short = 'S', long = "slop", default_value = "5")]
    pub slop: usize,

    /// Output sort order (if not specified, output is in same order as input)
    #[arg(short = 's', long = "sort-order", value_enum)]
    pub sort_order: Option<SortOrderArg>,

    /// Reference FASTA used to recalculate NM, UQ and MD tags
    #[arg(short = 'r', long = "ref")]
    pub reference: Option<PathBuf>,

    /// Automatically clip extended attributes that match read length (hard clipping only)
    #[arg(short = 'a', long = "auto-clip-attributes", default_value = "false")]
    pub auto_clip_attributes: bool,

    /// Maximum memory held by each in-process sort before spilling to disk.
    ///
    /// Accepts values like "512M", "1G", "2G".
    #[arg(short = 'm', long = "max-memory", default_value = "768M", value_parser = parse_memory)]
    pub max_memory: usize,

    /// Directory for temporary sort files (defaults to the system temp directory)
    #[arg(short = 'T', long = "tmp-dir")]
    pub tmp_dir: Option<PathBuf>,

    /// Number of threads for BGZF compression and in-memory sorting
    #[arg(long = "threads", default_value = "1")]
    pub threads: usize,

    /// Compression options for output
    #[command(flatten)]
    pub compression: CompressionOptions,
}

impl Command for TrimPrimers {
    fn execute(&self, command_line: &str) -> Result<()> {
        self.io.validate()?;
        validate_file_exists(&self.primers, "Primer table")?;
        if let Some(reference) = &self.reference {
            validate_file_exists(reference, "Reference FASTA")?;
        }
        self.compression.validate()?;

        info!("TrimPrimers");
        info!("  Input: {}", self.io.input.display());
        info!("  Output: {}", self.io.output.display());
        info!("  Primers: {}", self.primers.display());
        info!("  Clipping mode: {}", if self.hard_clip { "hard" } else { "soft" });
        info!("  Slop: {}", self.slop);
        if let Some(reference) = &self.reference {
            info!("  Reference: {}", reference.display());
        }
        info!("  Threads: {}", self.threads);

        let timer = OperationTimer::new("Trimming primers");

        let catalog = AmpliconCatalog::from_path(&self.primers)?;
        let reference = self.reference.as_ref().map(ReferenceReader::new).transpose()?;

        let (mut reader, header) = create_bam_reader(&self.io.input, self.threads)?;
        let input_order = SortOrder::from_header(&header);
        let output_order = resolve_output_order(self.sort_order, input_order);
        info!("  Output sort order: {output_order}");

        let out_header = set_sort_order(header.clone(), output_order);
        let out_header =
            add_pg_record(out_header, crate::version::VERSION.as_str(), command_line)?;
        let mut writer = create_bam_writer(
            &self.io.output,
            &out_header,
            self.threads,
            self.compression.compression_level,
        )?;

        let mode = if self.hard_clip { ClippingMode::Hard } else { ClippingMode::Soft };
        let clipper = SamRecordClipper::with_auto_clip(mode, self.auto_clip_attributes);
        let trimmer = PrimerTrimmer::new(&catalog, clipper, self.slop);

        let records = reader.record_bufs(&header).map(|r| r.map_err(anyhow::Error::from));
        let (records, name_sorted): (Box<dyn Iterator<Item = Result<RecordBuf>>>, bool) =
            if input_order == Some(SortOrder::Queryname) {
                (Box::new(records), true)
            } else if is_query_grouped(&header) {
                (Box::new(records), false)
            } else {
                info!("Input is neither queryname sorted nor query grouped; sorting by queryname");
                (Box::new(self.sort::<QuerynameKey, _>(&header, records)?), true)
            };

        let mut stats = TrimmingStats::default();
        let mut progress = ProgressTracker::new("Processed records").with_interval(1_000_000);
        let trimmed = TrimmedRecords::new(
            TemplateIterator::new(records),
            &trimmer,
            &header,
            &mut stats,
            &mut progress,
        );

        let written = match &reference {
            None => {
                let arrival = name_sorted.then_some(SortOrder::Queryname);
                self.write_in_order(&mut writer, &out_header, trimmed, arrival, output_order)?
            }
            Some(reference) => {
                info!("Sorting trimmed records by coordinate to recalculate NM, UQ and MD");
                let sorted = self.sort::<CoordinateKey, _>(&header, trimmed)?;
                let regenerated = sorted.map(|r| -> Result<RecordBuf> {
                    let mut record = r?;
                    regenerate_alignment_tags(&mut record, &header, reference)?;
                    Ok(record)
                });
                self.write_in_order(
                    &mut writer,
                    &out_header,
                    regenerated,
                    Some(SortOrder::Coordinate),
                    output_order,
                )?
            }
        };

        finish_bam_writer(writer, &self.io.output)?;
        progress.log_final();
        info!("Wrote {} records to {}", format_count(written), self.io.output.display());
        log_trimming_summary(&stats);
        timer.log_completion(progress.count());
        Ok(())
    }
}

impl TrimPrimers {
    /// Sorts `records` into the order of `K`, spilling to the temp directory as needed.
    fn sort<K, I>(&self, header: &Header, records: I) -> Result<SortedRecords<K>>
    where
        K: SortKey,
        I: Iterator<Item = Result<RecordBuf>>,
    {
        let mut buffer = SortingBuffer::<K>::new(
            header,
            self.max_memory,
            self.tmp_dir.as_deref(),
            self.threads,
        )?;
        for record in records {
            buffer.add(record?)?;
        }
        info!(
            "Sorting {} records by {} ({} chunks spilled)",
            format_count(buffer.len()),
            K::ORDER,
            buffer.chunks_written()
        );
        buffer.into_sorted_iter()
    }

    /// Writes `records`, arriving in `arrival` order, to `writer` in `output` order.
    fn write_in_order<I>(
        &self,
        writer: &mut BamWriter,
        header: &Header,
        records: I,
        arrival: Option<SortOrder>,
        output: SortOrder,
    ) -> Result<u64>
    where
        I: Iterator<Item = Result<RecordBuf>>,
    {
        if arrival == Some(output) {
            return write_all(writer, header, records);
        }
        match output {
            SortOrder::Coordinate => {
                write_all(writer, header, self.sort::<CoordinateKey, _>(header, records)?)
            }
            SortOrder::Queryname => {
                write_all(writer, header, self.sort::<QuerynameKey, _>(header, records)?)
            }
            SortOrder::Unsorted => write_all(writer, header, records),
        }
    }
}

/// Chooses the output sort order: the requested order, else the input's, else unsorted.
fn resolve_output_order(requested: Option<SortOrderArg>, input: Option<SortOrder>) -> SortOrder {
    requested.map(SortOrder::from).or(input).unwrap_or(SortOrder::Unsorted)
}

fn write_all<I>(writer: &mut BamWriter, header: &Header, records: I) -> Result<u64>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    let mut count = 0;
    for record in records {
        writer.write_alignment_record(header, &record?)?;
        count += 1;
    }
    Ok(count)
}

/// Trims each template from a stream and yields its records in template order.
struct TrimmedRecords<'a, I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    templates: TemplateIterator<I>,
    trimmer: &'a PrimerTrimmer<'a>,
    header: &'a Header,
    stats: &'a mut TrimmingStats,
    progress: &'a mut ProgressTracker,
    pending: std::vec::IntoIter<RecordBuf>,
}

impl<'a, I> TrimmedRecords<'a, I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    fn new(
        templates: TemplateIterator<I>,
        trimmer: &'a PrimerTrimmer<'a>,
        header: &'a Header,
        stats: &'a mut TrimmingStats,
        progress: &'a mut ProgressTracker,
    ) -> Self {
        Self { templates, trimmer, header, stats, progress, pending: Vec::new().into_iter() }
    }
}

impl<I> Iterator for TrimmedRecords<'_, I>
where
    I: Iterator<Item = Result<RecordBuf>>,
{
    type Item = Result<RecordBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                self.progress.record(&record, self.header);
                return Some(Ok(record));
            }
            let mut template = match self.templates.next()? {
                Ok(template) => template,
                Err(e) => return Some(Err(e)),
            };
            self.stats.record(self.trimmer.trim(self.header, &mut template));
            self.pending = template.into_records().into_iter();
        }
    }
}

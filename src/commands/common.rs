//! Common CLI options shared across commands.
//!
//! This module provides shared argument structures that can be composed into
//! command structs using `#[command(flatten)]`.

use std::path::PathBuf;

use clap::Args;

use fgtrim_lib::validation::{
    validate_compression_level, validate_file_exists, validate_not_stream,
};

/// Common input/output options for commands that read a BAM and write a BAM.
#[derive(Debug, Clone, Args)]
pub struct BamIoOptions {
    /// Input BAM file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output BAM file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

impl BamIoOptions {
    /// Validates that the input is an existing regular file.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is a stream or does not exist.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_not_stream(&self.input, "input")?;
        validate_file_exists(&self.input, "Input BAM")?;
        Ok(())
    }
}

/// Options for output compression.
///
/// Controls BGZF compression level for BAM output files.
#[derive(Debug, Clone, Default, Args)]
pub struct CompressionOptions {
    /// Compression level for output BAM (0-9).
    ///
    /// Level 1 is fastest with larger files.
    /// Level 9 produces smallest files but is slowest.
    #[arg(long, default_value_t = 1)]
    pub compression_level: u32,
}

impl CompressionOptions {
    /// Validates the compression level.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is above the maximum BGZF level.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_compression_level(self.compression_level)?;
        Ok(())
    }
}

/// Parse memory size string (e.g., "512M", "1G", "2G").
///
/// Suffixes `K`, `M` and `G` are binary multiples; a bare number is a byte count.
pub fn parse_memory(s: &str) -> Result<usize, String> {
    let s = s.trim().to_uppercase();

    if s.is_empty() {
        return Err("Empty memory specification".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {num_str}"))?;

    if num <= 0.0 || !num.is_finite() {
        return Err("Memory size must be positive".to_string());
    }

    Ok((num * f64::from(multiplier)) as usize)
}
